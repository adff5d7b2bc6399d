//! Context assembly: the block of reference material and starred turns
//! handed to the generation service.
//!
//! Selection is deterministic. Completed, active materials are taken oldest
//! first until the next one would overflow the budget, and iteration stops
//! there: later materials are not considered even if they would fit, and no
//! material is truncated. Nothing is cached between calls.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use folio_core::{
    defaults, MaterialLedger, ProjectDirectory, Result, SourceMaterial, StarredMessage,
    StarredMessageSource,
};

use crate::budget::{BudgetCalculator, BudgetSnapshot};

/// One material included in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    pub material_id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub word_count: u64,
    pub text: String,
}

/// Budget figures reported with a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleBudget {
    #[serde(flatten)]
    pub snapshot: BudgetSnapshot,
    /// Words taken by the included sources.
    pub source_words_used: u64,
}

/// Materials and starred turns selected for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub sources: Vec<ContextSource>,
    pub starred_messages: Vec<StarredMessage>,
    pub budget: BundleBudget,
    /// Eligible materials left out because the budget ran out.
    pub excluded_count: usize,
}

impl ContextBundle {
    /// Render the plain-text block sent to the generation service.
    ///
    /// Empty sections are omitted; a bundle with nothing in it renders as
    /// an empty string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.sources.is_empty() {
            out.push_str("=== SOURCE MATERIALS ===\n");
            for source in &self.sources {
                let _ = write!(out, "\n--- {}", source.title);
                if let Some(author) = &source.author {
                    let _ = write!(out, " by {author}");
                }
                let _ = writeln!(out, " ({} words) ---", source.word_count);
                out.push_str(source.text.trim_end());
                out.push('\n');
            }
        }

        if !self.starred_messages.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("=== STARRED MESSAGES ===\n");
            for message in &self.starred_messages {
                let _ = writeln!(out, "\n[{}] {}", message.role, message.content.trim_end());
            }
        }

        out
    }
}

/// Word totals for a project's materials alongside its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    #[serde(flatten)]
    pub snapshot: BudgetSnapshot,
    /// Words across completed, active materials.
    pub active_source_words: u64,
    /// Words across all completed materials.
    pub total_source_words: u64,
}

/// Strict FIFO selection with early stop.
///
/// Returns the included prefix and the number of materials left out.
pub fn select_within_budget(
    materials: &[SourceMaterial],
    available_for_sources: u64,
) -> (Vec<&SourceMaterial>, usize) {
    let mut used: u64 = 0;
    let mut included = Vec::new();
    for (i, material) in materials.iter().enumerate() {
        let words = word_count(material);
        if used.saturating_add(words) > available_for_sources {
            debug!(
                subsystem = "context",
                component = "assembler",
                material_id = %material.id,
                word_count = words,
                used,
                available_for_sources,
                "Budget exhausted, stopping selection"
            );
            return (included, materials.len() - i);
        }
        trace!(material_id = %material.id, word_count = words, "Including material");
        used += words;
        included.push(material);
    }
    (included, 0)
}

fn word_count(material: &SourceMaterial) -> u64 {
    material.word_count.max(0) as u64
}

/// Builds [`ContextBundle`]s from the ledger and project collaborators.
#[derive(Clone)]
pub struct ContextAssembler {
    ledger: Arc<dyn MaterialLedger>,
    projects: Arc<dyn ProjectDirectory>,
    starred: Arc<dyn StarredMessageSource>,
    calculator: BudgetCalculator,
    starred_limit: usize,
}

impl ContextAssembler {
    pub fn new(
        ledger: Arc<dyn MaterialLedger>,
        projects: Arc<dyn ProjectDirectory>,
        starred: Arc<dyn StarredMessageSource>,
    ) -> Self {
        Self {
            ledger,
            projects,
            starred,
            calculator: BudgetCalculator::default(),
            starred_limit: defaults::STARRED_MESSAGE_LIMIT,
        }
    }

    pub fn with_calculator(mut self, calculator: BudgetCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_starred_limit(mut self, limit: usize) -> Self {
        self.starred_limit = limit;
        self
    }

    /// Current budget for a project, from live manuscript and outline totals.
    pub async fn budget(&self, project_id: Uuid) -> Result<BudgetSnapshot> {
        let manuscript = self.projects.manuscript_word_count(project_id).await?;
        let outline = self.projects.outline_word_count(project_id).await?;
        Ok(self.calculator.compute(manuscript, outline))
    }

    /// Budget plus the word totals of the project's completed materials.
    pub async fn budget_report(&self, project_id: Uuid) -> Result<ContextBudget> {
        let snapshot = self.budget(project_id).await?;
        let completed = self.ledger.list_completed(project_id, false).await?;
        let total_source_words = completed.iter().map(word_count).sum();
        let active_source_words = completed
            .iter()
            .filter(|m| m.is_active)
            .map(word_count)
            .sum();
        Ok(ContextBudget {
            snapshot,
            active_source_words,
            total_source_words,
        })
    }

    /// Assemble the bundle for one generation request.
    ///
    /// Without a session there are no starred turns to include.
    pub async fn assemble(
        &self,
        project_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<ContextBundle> {
        let mut materials = self.ledger.list_completed(project_id, true).await?;
        materials.retain(|m| m.is_active && m.is_available());

        let snapshot = self.budget(project_id).await?;
        let (included, excluded_count) =
            select_within_budget(&materials, snapshot.available_for_sources);

        let sources: Vec<ContextSource> = included
            .into_iter()
            .map(|m| ContextSource {
                material_id: m.id,
                title: m.title.clone(),
                author: m.author.clone(),
                word_count: word_count(m),
                text: m.extracted_text.clone().unwrap_or_default(),
            })
            .collect();
        let source_words_used = sources.iter().map(|s| s.word_count).sum();

        let starred_messages = match session_id {
            Some(session_id) if self.starred_limit > 0 => {
                let mut messages = self
                    .starred
                    .recent_starred(project_id, session_id, self.starred_limit)
                    .await?;
                messages.truncate(self.starred_limit);
                messages
            }
            _ => Vec::new(),
        };

        debug!(
            subsystem = "context",
            component = "assembler",
            project_id = %project_id,
            included = sources.len(),
            excluded = excluded_count,
            starred = starred_messages.len(),
            source_words_used,
            available_for_sources = snapshot.available_for_sources,
            "Context assembled"
        );

        Ok(ContextBundle {
            sources,
            starred_messages,
            budget: BundleBudget {
                snapshot,
                source_words_used,
            },
            excluded_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use folio_core::{MaterialFormat, MaterialStatus};
    use folio_db::{MemoryMaterialLedger, MemoryProjectDirectory, MemoryStarredMessages};

    struct Fixture {
        ledger: Arc<MemoryMaterialLedger>,
        projects: Arc<MemoryProjectDirectory>,
        starred: Arc<MemoryStarredMessages>,
        project_id: Uuid,
    }

    impl Fixture {
        async fn new() -> Self {
            let projects = Arc::new(MemoryProjectDirectory::new());
            let project_id = Uuid::new_v4();
            projects.add_project(project_id, Uuid::new_v4()).await;
            Self {
                ledger: Arc::new(MemoryMaterialLedger::new()),
                projects,
                starred: Arc::new(MemoryStarredMessages::new()),
                project_id,
            }
        }

        fn assembler(&self, total: u64, overhead: u64) -> ContextAssembler {
            ContextAssembler::new(self.ledger.clone(), self.projects.clone(), self.starred.clone())
                .with_calculator(BudgetCalculator::new(total, overhead))
        }

        /// Insert a material created `minutes` after a fixed epoch.
        async fn material(
            &self,
            title: &str,
            words: i64,
            minutes: i64,
            status: MaterialStatus,
            is_active: bool,
        ) -> Uuid {
            let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes);
            let id = Uuid::new_v4();
            let completed = status == MaterialStatus::Completed;
            self.ledger
                .insert(SourceMaterial {
                    id,
                    project_id: self.project_id,
                    owner_id: Uuid::new_v4(),
                    title: title.to_string(),
                    original_filename: format!("{title}.txt"),
                    format: MaterialFormat::PlainText,
                    mime_type: "text/plain".to_string(),
                    size_bytes: 10,
                    storage_key: format!("uploads/x/{id}/{title}.txt"),
                    status,
                    error_message: (status == MaterialStatus::Failed).then(|| "boom".to_string()),
                    extracted_text: completed.then(|| format!("text of {title}")),
                    word_count: words,
                    page_count: None,
                    author: Some("Author".to_string()),
                    extraction_metadata: serde_json::json!({}),
                    is_active,
                    created_at: created,
                    updated_at: created,
                    processed_at: completed.then_some(created),
                })
                .await;
            id
        }
    }

    fn ids(bundle: &ContextBundle) -> Vec<Uuid> {
        bundle.sources.iter().map(|s| s.material_id).collect()
    }

    #[tokio::test]
    async fn test_fifo_with_early_stop() {
        let f = Fixture::new().await;
        // total 120, overhead 0, empty manuscript: 120 words available.
        let a = f.material("A", 100, 1, MaterialStatus::Completed, true).await;
        let _b = f.material("B", 50, 2, MaterialStatus::Completed, true).await;

        let bundle = f.assembler(120, 0).assemble(f.project_id, None).await.unwrap();
        assert_eq!(ids(&bundle), vec![a]);
        assert_eq!(bundle.budget.source_words_used, 100);
        assert_eq!(bundle.budget.snapshot.available_for_sources, 120);
        assert_eq!(bundle.excluded_count, 1);
    }

    #[tokio::test]
    async fn test_stops_even_when_later_material_fits() {
        let f = Fixture::new().await;
        let a = f.material("A", 60, 1, MaterialStatus::Completed, true).await;
        f.material("Big", 500, 2, MaterialStatus::Completed, true).await;
        f.material("Tiny", 1, 3, MaterialStatus::Completed, true).await;

        let bundle = f.assembler(100, 0).assemble(f.project_id, None).await.unwrap();
        assert_eq!(ids(&bundle), vec![a]);
        assert_eq!(bundle.excluded_count, 2);
    }

    #[tokio::test]
    async fn test_oldest_first_order() {
        let f = Fixture::new().await;
        let newer = f.material("Newer", 10, 5, MaterialStatus::Completed, true).await;
        let older = f.material("Older", 10, 1, MaterialStatus::Completed, true).await;

        let bundle = f.assembler(1_000, 0).assemble(f.project_id, None).await.unwrap();
        assert_eq!(ids(&bundle), vec![older, newer]);
    }

    #[tokio::test]
    async fn test_only_completed_active_materials() {
        let f = Fixture::new().await;
        let ok = f.material("ok", 10, 1, MaterialStatus::Completed, true).await;
        f.material("inactive", 10, 2, MaterialStatus::Completed, false).await;
        f.material("pending", 0, 3, MaterialStatus::Pending, true).await;
        f.material("processing", 0, 4, MaterialStatus::Processing, true).await;
        f.material("failed", 0, 5, MaterialStatus::Failed, true).await;

        let bundle = f.assembler(1_000, 0).assemble(f.project_id, None).await.unwrap();
        assert_eq!(ids(&bundle), vec![ok]);
    }

    #[tokio::test]
    async fn test_over_budget_manuscript_yields_empty_bundle() {
        let f = Fixture::new().await;
        f.projects.set_word_counts(f.project_id, 700_000, 0).await;
        f.material("A", 1, 1, MaterialStatus::Completed, true).await;

        let assembler = ContextAssembler::new(f.ledger.clone(), f.projects.clone(), f.starred.clone());
        let bundle = assembler.assemble(f.project_id, None).await.unwrap();
        assert!(bundle.sources.is_empty());
        assert_eq!(bundle.budget.snapshot.available_for_sources, 0);
        assert_eq!(bundle.budget.source_words_used, 0);
    }

    #[tokio::test]
    async fn test_assemble_is_idempotent() {
        let f = Fixture::new().await;
        f.projects.set_word_counts(f.project_id, 100, 20).await;
        f.material("A", 30, 1, MaterialStatus::Completed, true).await;
        f.material("B", 30, 2, MaterialStatus::Completed, true).await;
        f.material("C", 30, 3, MaterialStatus::Completed, true).await;

        let assembler = f.assembler(200, 10);
        let first = assembler.assemble(f.project_id, None).await.unwrap();
        let second = assembler.assemble(f.project_id, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_starred_messages_most_recent_first_capped() {
        let f = Fixture::new().await;
        let session = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        for i in 0..7 {
            f.starred
                .star(
                    f.project_id,
                    StarredMessage {
                        id: Uuid::new_v4(),
                        session_id: session,
                        role: "assistant".to_string(),
                        content: format!("turn {i}"),
                        starred_at: base + Duration::minutes(i),
                    },
                )
                .await;
        }

        let bundle = f
            .assembler(1_000, 0)
            .assemble(f.project_id, Some(session))
            .await
            .unwrap();
        let contents: Vec<&str> = bundle
            .starred_messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["turn 6", "turn 5", "turn 4", "turn 3", "turn 2"]);

        let without_session = f.assembler(1_000, 0).assemble(f.project_id, None).await.unwrap();
        assert!(without_session.starred_messages.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_material_never_assembled() {
        let f = Fixture::new().await;
        let a = f.material("A", 10, 1, MaterialStatus::Completed, true).await;
        let b = f.material("B", 10, 2, MaterialStatus::Completed, true).await;
        f.ledger.delete(a).await.unwrap();

        let bundle = f.assembler(1_000, 0).assemble(f.project_id, None).await.unwrap();
        assert_eq!(ids(&bundle), vec![b]);
    }

    #[tokio::test]
    async fn test_budget_report_totals() {
        let f = Fixture::new().await;
        f.projects.set_word_counts(f.project_id, 1_000, 500).await;
        f.material("A", 100, 1, MaterialStatus::Completed, true).await;
        f.material("B", 40, 2, MaterialStatus::Completed, false).await;
        f.material("C", 0, 3, MaterialStatus::Pending, true).await;

        let assembler = ContextAssembler::new(f.ledger.clone(), f.projects.clone(), f.starred.clone());
        let report = assembler.budget_report(f.project_id).await.unwrap();
        assert_eq!(report.snapshot.manuscript_words, 1_000);
        assert_eq!(report.snapshot.outline_words, 500);
        assert_eq!(report.snapshot.available_for_sources, 600_000 - 1_500 - 3_000);
        assert_eq!(report.active_source_words, 100);
        assert_eq!(report.total_source_words, 140);

        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["total_budget"], 600_000);
        assert_eq!(json["active_source_words"], 100);
    }

    #[test]
    fn test_render_block() {
        let bundle = ContextBundle {
            sources: vec![ContextSource {
                material_id: Uuid::nil(),
                title: "Field Notes".to_string(),
                author: Some("Ada".to_string()),
                word_count: 3,
                text: "The ghost wrote.\n".to_string(),
            }],
            starred_messages: vec![StarredMessage {
                id: Uuid::nil(),
                session_id: Uuid::nil(),
                role: "user".to_string(),
                content: "Keep the lighthouse.".to_string(),
                starred_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            }],
            budget: BundleBudget {
                snapshot: BudgetCalculator::default().compute(0, 0),
                source_words_used: 3,
            },
            excluded_count: 0,
        };

        assert_eq!(
            bundle.render(),
            "=== SOURCE MATERIALS ===\n\
             \n--- Field Notes by Ada (3 words) ---\n\
             The ghost wrote.\n\
             \n=== STARRED MESSAGES ===\n\
             \n[user] Keep the lighthouse.\n"
        );
    }

    #[test]
    fn test_render_empty_bundle() {
        let bundle = ContextBundle {
            sources: Vec::new(),
            starred_messages: Vec::new(),
            budget: BundleBudget {
                snapshot: BudgetCalculator::default().compute(0, 0),
                source_words_used: 0,
            },
            excluded_count: 0,
        };
        assert_eq!(bundle.render(), "");
    }
}
