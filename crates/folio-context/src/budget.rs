//! Word budget for reference material.
//!
//! The generation service accepts a fixed number of words per request. The
//! manuscript, the outline, and a fixed overhead are reserved first; source
//! materials may use whatever remains. The result is recomputed on every
//! request and never goes below zero.

use serde::{Deserialize, Serialize};

use folio_core::defaults;

/// Budget limits. Defaults come from [`folio_core::defaults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCalculator {
    pub total_budget: u64,
    pub overhead: u64,
}

impl Default for BudgetCalculator {
    fn default() -> Self {
        Self {
            total_budget: defaults::TOTAL_BUDGET_WORDS,
            overhead: defaults::CONTEXT_OVERHEAD_WORDS,
        }
    }
}

impl BudgetCalculator {
    pub fn new(total_budget: u64, overhead: u64) -> Self {
        Self {
            total_budget,
            overhead,
        }
    }

    /// Compute the snapshot for the given manuscript and outline sizes.
    pub fn compute(&self, manuscript_words: u64, outline_words: u64) -> BudgetSnapshot {
        let used = manuscript_words
            .saturating_add(outline_words)
            .saturating_add(self.overhead);
        BudgetSnapshot {
            total_budget: self.total_budget,
            manuscript_words,
            outline_words,
            overhead: self.overhead,
            used,
            available_for_sources: self.total_budget.saturating_sub(used),
        }
    }
}

/// Budget computed with the default limits.
pub fn compute_budget(manuscript_words: u64, outline_words: u64) -> BudgetSnapshot {
    BudgetCalculator::default().compute(manuscript_words, outline_words)
}

/// Point-in-time budget. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub total_budget: u64,
    pub manuscript_words: u64,
    pub outline_words: u64,
    pub overhead: u64,
    /// Manuscript + outline + overhead.
    pub used: u64,
    /// `max(0, total_budget - used)`.
    pub available_for_sources: u64,
}
