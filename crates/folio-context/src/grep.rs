//! On-demand substring search over extracted text.
//!
//! Every call is a full linear scan of each completed material's text; no
//! index is built or kept. Matching is case-insensitive and line-oriented.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use folio_core::{defaults, MaterialLedger, Result, SourceMaterial};

/// Search limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrepConfig {
    /// Matches kept per material; scanning that material stops at the cap.
    pub max_matches_per_source: usize,
    /// Lines of context on each side of a match.
    pub context_lines: usize,
}

impl Default for GrepConfig {
    fn default() -> Self {
        Self {
            max_matches_per_source: defaults::GREP_MAX_MATCHES_PER_SOURCE,
            context_lines: defaults::GREP_CONTEXT_LINES,
        }
    }
}

impl GrepConfig {
    pub fn with_max_matches(mut self, max: usize) -> Self {
        self.max_matches_per_source = max;
        self
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    /// 1-based line number.
    pub line_number: usize,
    pub line_content: String,
    /// The surrounding window, matched line included, joined with `\n`.
    pub context: String,
}

/// Matches within one material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMatches {
    pub material_id: Uuid,
    pub source_title: String,
    pub matches: Vec<GrepMatch>,
}

/// Scan one text for `needle`, which must already be lowercase.
fn grep_text(text: &str, needle: &str, config: &GrepConfig) -> Vec<GrepMatch> {
    let lines: Vec<&str> = text.lines().collect();
    let mut matches = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if matches.len() >= config.max_matches_per_source {
            break;
        }
        if !line.to_lowercase().contains(needle) {
            continue;
        }
        let start = i.saturating_sub(config.context_lines);
        let end = (i + config.context_lines + 1).min(lines.len());
        matches.push(GrepMatch {
            line_number: i + 1,
            line_content: (*line).to_string(),
            context: lines[start..end].join("\n"),
        });
    }
    matches
}

/// Search the given materials. Only completed materials with text are
/// scanned; materials without a match are omitted.
pub fn grep_materials(
    materials: &[SourceMaterial],
    query: &str,
    config: &GrepConfig,
) -> Vec<SourceMatches> {
    if query.trim().is_empty() || config.max_matches_per_source == 0 {
        return Vec::new();
    }
    let needle = query.to_lowercase();

    materials
        .iter()
        .filter(|m| m.is_available())
        .filter_map(|m| {
            let text = m.extracted_text.as_deref().filter(|t| !t.is_empty())?;
            let matches = grep_text(text, &needle, config);
            trace!(material_id = %m.id, hits = matches.len(), "Scanned material");
            (!matches.is_empty()).then(|| SourceMatches {
                material_id: m.id,
                source_title: m.title.clone(),
                matches,
            })
        })
        .collect()
}

/// Grep over a project's completed materials, read fresh from the ledger.
#[derive(Clone)]
pub struct GrepSearch {
    ledger: Arc<dyn MaterialLedger>,
    config: GrepConfig,
}

impl GrepSearch {
    pub fn new(ledger: Arc<dyn MaterialLedger>) -> Self {
        Self {
            ledger,
            config: GrepConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GrepConfig) -> Self {
        self.config = config;
        self
    }

    /// Search every completed material in the project, active or not.
    ///
    /// An empty query or no hits yields an empty list, never an error.
    pub async fn search(&self, project_id: Uuid, query: &str) -> Result<Vec<SourceMatches>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let materials = self.ledger.list_completed(project_id, false).await?;
        let results = grep_materials(&materials, query, &self.config);

        debug!(
            subsystem = "context",
            component = "grep",
            project_id = %project_id,
            scanned = materials.len(),
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Grep search complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_core::{MaterialFormat, MaterialStatus};
    use folio_db::MemoryMaterialLedger;

    fn material(title: &str, status: MaterialStatus, text: Option<&str>) -> SourceMaterial {
        let now = Utc::now();
        let id = Uuid::new_v4();
        SourceMaterial {
            id,
            project_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            title: title.to_string(),
            original_filename: format!("{title}.txt"),
            format: MaterialFormat::PlainText,
            mime_type: "text/plain".to_string(),
            size_bytes: 1,
            storage_key: format!("uploads/o/{id}/{title}.txt"),
            status,
            error_message: None,
            extracted_text: text.map(String::from),
            word_count: 0,
            page_count: None,
            author: None,
            extraction_metadata: serde_json::json!({}),
            is_active: true,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    const STORY: &str = "one\ntwo\nthree\nThe ghost wrote all night\nfive\nsix\nseven";

    #[test]
    fn test_single_match_with_context() {
        let m = material("story", MaterialStatus::Completed, Some(STORY));
        let results = grep_materials(&[m.clone()], "ghost", &GrepConfig::default());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].material_id, m.id);
        assert_eq!(results[0].source_title, "story");
        assert_eq!(
            results[0].matches,
            vec![GrepMatch {
                line_number: 4,
                line_content: "The ghost wrote all night".to_string(),
                context: "two\nthree\nThe ghost wrote all night\nfive\nsix".to_string(),
            }]
        );
    }

    #[test]
    fn test_case_insensitive() {
        let m = material("story", MaterialStatus::Completed, Some(STORY));
        let results = grep_materials(&[m], "GHOST", &GrepConfig::default());
        assert_eq!(results[0].matches.len(), 1);
    }

    #[test]
    fn test_context_clamped_at_boundaries() {
        let m = material("edges", MaterialStatus::Completed, Some("ghost first\nb\nc\nd\nghost last"));
        let results = grep_materials(&[m], "ghost", &GrepConfig::default());
        let matches = &results[0].matches;
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line_number, 1);
        assert_eq!(matches[0].context, "ghost first\nb\nc");
        assert_eq!(matches[1].line_number, 5);
        assert_eq!(matches[1].context, "c\nd\nghost last");
    }

    #[test]
    fn test_absent_query_returns_empty() {
        let m = material("story", MaterialStatus::Completed, Some(STORY));
        assert!(grep_materials(&[m], "vampire", &GrepConfig::default()).is_empty());
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let m = material("story", MaterialStatus::Completed, Some(STORY));
        assert!(grep_materials(&[m], "  ", &GrepConfig::default()).is_empty());
    }

    #[test]
    fn test_cap_per_material() {
        let text = (0..25).map(|i| format!("ghost {i}")).collect::<Vec<_>>().join("\n");
        let m = material("many", MaterialStatus::Completed, Some(&text));
        let results = grep_materials(&[m.clone()], "ghost", &GrepConfig::default());
        assert_eq!(results[0].matches.len(), 10);
        assert_eq!(results[0].matches[9].line_number, 10);

        let results = grep_materials(&[m], "ghost", &GrepConfig::default().with_max_matches(3));
        assert_eq!(results[0].matches.len(), 3);
    }

    #[test]
    fn test_non_completed_and_non_matching_omitted() {
        let hit = material("hit", MaterialStatus::Completed, Some("a ghost"));
        let miss = material("miss", MaterialStatus::Completed, Some("nothing here"));
        let empty = material("empty", MaterialStatus::Completed, Some(""));
        let failed = material("failed", MaterialStatus::Failed, None);
        let results = grep_materials(&[miss, hit.clone(), empty, failed], "ghost", &GrepConfig::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].material_id, hit.id);
    }

    #[tokio::test]
    async fn test_search_reads_ledger_including_inactive() {
        let ledger = Arc::new(MemoryMaterialLedger::new());
        let mut inactive = material("shelved", MaterialStatus::Completed, Some("the ghost returns"));
        inactive.is_active = false;
        let pending = material("pending", MaterialStatus::Pending, None);
        ledger.insert(inactive.clone()).await;
        ledger.insert(pending).await;

        let search = GrepSearch::new(ledger);
        let results = search.search(Uuid::nil(), "Ghost").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].material_id, inactive.id);

        assert!(search.search(Uuid::nil(), "").await.unwrap().is_empty());
        assert!(search.search(Uuid::new_v4(), "ghost").await.unwrap().is_empty());
    }
}
