//! # folio-context
//!
//! Read-only services over completed source materials:
//!
//! - [`BudgetCalculator`]: words left for reference material
//! - [`ContextAssembler`]: strict FIFO selection under the budget, plus
//!   starred conversation turns, rendered for the generation service
//! - [`GrepSearch`]: unindexed, case-insensitive line search
//!
//! None of these hold state between calls; every request reads the ledger
//! fresh.

pub mod assembler;
pub mod budget;
pub mod grep;

pub use assembler::{
    select_within_budget, BundleBudget, ContextAssembler, ContextBudget, ContextBundle,
    ContextSource,
};
pub use budget::{compute_budget, BudgetCalculator, BudgetSnapshot};
pub use grep::{grep_materials, GrepConfig, GrepMatch, GrepSearch, SourceMatches};
