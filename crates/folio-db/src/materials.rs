//! Source material ledger backed by PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use folio_core::{
    Error, MaterialLedger, MaterialStatus, MaterialSummary, NewSourceMaterial, Result,
    SourceMaterial, Transition,
};

const MATERIAL_COLUMNS: &str = "id, project_id, owner_id, title, original_filename, format, \
     mime_type, size_bytes, storage_key, status, error_message, extracted_text, word_count, \
     page_count, author, extraction_metadata, is_active, created_at, updated_at, processed_at";

const SUMMARY_COLUMNS: &str = "id, project_id, title, original_filename, format, size_bytes, \
     status, error_message, word_count, page_count, author, is_active, created_at, updated_at, \
     processed_at";

/// PostgreSQL implementation of [`MaterialLedger`].
///
/// Transitions are a single conditional `UPDATE ... WHERE status = ANY(...)`,
/// so two racing writers cannot both move a material out of the same state.
#[derive(Clone)]
pub struct PgMaterialLedger {
    pool: Pool<Postgres>,
}

impl PgMaterialLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Result<SourceMaterial> {
        let format: String = row.get("format");
        let status: String = row.get("status");
        Ok(SourceMaterial {
            id: row.get("id"),
            project_id: row.get("project_id"),
            owner_id: row.get("owner_id"),
            title: row.get("title"),
            original_filename: row.get("original_filename"),
            format: format.parse()?,
            mime_type: row.get("mime_type"),
            size_bytes: row.get("size_bytes"),
            storage_key: row.get("storage_key"),
            status: status.parse()?,
            error_message: row.get("error_message"),
            extracted_text: row.get("extracted_text"),
            word_count: row.get("word_count"),
            page_count: row.get("page_count"),
            author: row.get("author"),
            extraction_metadata: row.get("extraction_metadata"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            processed_at: row.get("processed_at"),
        })
    }

    fn parse_summary_row(row: &PgRow) -> Result<MaterialSummary> {
        let format: String = row.get("format");
        let status: String = row.get("status");
        Ok(MaterialSummary {
            id: row.get("id"),
            project_id: row.get("project_id"),
            title: row.get("title"),
            original_filename: row.get("original_filename"),
            format: format.parse()?,
            size_bytes: row.get("size_bytes"),
            status: status.parse()?,
            error_message: row.get("error_message"),
            word_count: row.get("word_count"),
            page_count: row.get("page_count"),
            author: row.get("author"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            processed_at: row.get("processed_at"),
        })
    }
}

#[async_trait]
impl MaterialLedger for PgMaterialLedger {
    async fn create(&self, material: NewSourceMaterial) -> Result<SourceMaterial> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO source_materials
                 (id, project_id, owner_id, title, original_filename, format, mime_type,
                  size_bytes, storage_key, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $10)
             RETURNING {MATERIAL_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(material.id)
            .bind(material.project_id)
            .bind(material.owner_id)
            .bind(&material.title)
            .bind(&material.original_filename)
            .bind(material.format.as_str())
            .bind(&material.mime_type)
            .bind(material.size_bytes)
            .bind(&material.storage_key)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "ledger",
            op = "create",
            material_id = %material.id,
            project_id = %material.project_id,
            format = %material.format,
            "Source material created"
        );
        Self::parse_row(&row)
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<SourceMaterial> {
        let target = transition.target();
        let sources: Vec<String> = MaterialStatus::sources_of(target)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let now = Utc::now();
        let record = transition.record(now);

        let query = format!(
            "UPDATE source_materials
             SET status = $2, extracted_text = $3, word_count = $4, page_count = $5,
                 author = $6, extraction_metadata = $7, error_message = $8,
                 processed_at = $9, updated_at = $10
             WHERE id = $1 AND status = ANY($11)
             RETURNING {MATERIAL_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .bind(record.status.as_str())
            .bind(&record.extracted_text)
            .bind(record.word_count)
            .bind(record.page_count)
            .bind(&record.author)
            .bind(&record.extraction_metadata)
            .bind(&record.error_message)
            .bind(record.processed_at)
            .bind(now)
            .bind(&sources)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => {
                info!(
                    subsystem = "db",
                    component = "ledger",
                    op = "transition",
                    material_id = %id,
                    status = %target,
                    "Material status changed"
                );
                Self::parse_row(&row)
            }
            None => {
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM source_materials WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(Error::Database)?;
                match current {
                    Some(status) => Err(Error::InvalidTransition {
                        from: status.parse()?,
                        to: target,
                    }),
                    None => Err(Error::NotFound(format!("material {id}"))),
                }
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<SourceMaterial>> {
        let query = format!("SELECT {MATERIAL_COLUMNS} FROM source_materials WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<MaterialSummary>> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM source_materials
             WHERE project_id = $1
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(Self::parse_summary_row).collect()
    }

    async fn list_completed(
        &self,
        project_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<SourceMaterial>> {
        let query = format!(
            "SELECT {MATERIAL_COLUMNS} FROM source_materials
             WHERE project_id = $1
               AND status = 'completed'
               AND (is_active OR NOT $2)
               AND extracted_text IS NOT NULL
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(project_id)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn set_activation(&self, id: Uuid, is_active: bool) -> Result<SourceMaterial> {
        let query = format!(
            "UPDATE source_materials SET is_active = $2, updated_at = $3
             WHERE id = $1
             RETURNING {MATERIAL_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(is_active)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("material {id}")))?;
        Self::parse_row(&row)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM source_materials WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
