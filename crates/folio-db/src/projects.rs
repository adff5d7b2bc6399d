//! Read-only queries against project-side tables.
//!
//! Projects, chapters, outlines, and chat history are owned by the rest of
//! the product; folio only reads ownership, word totals, and starred turns.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use folio_core::{Error, ProjectDirectory, Result, StarredMessage, StarredMessageSource};

/// PostgreSQL implementation of [`ProjectDirectory`].
#[derive(Clone)]
pub struct PgProjectDirectory {
    pool: Pool<Postgres>,
}

impl PgProjectDirectory {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn sum_word_count(&self, table: &'static str, project_id: Uuid) -> Result<u64> {
        let query =
            format!("SELECT COALESCE(SUM(word_count), 0)::BIGINT FROM {table} WHERE project_id = $1");
        let total: i64 = sqlx::query_scalar(&query)
            .bind(project_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(total.max(0) as u64)
    }
}

#[async_trait]
impl ProjectDirectory for PgProjectDirectory {
    async fn project_owner(&self, project_id: Uuid) -> Result<Option<Uuid>> {
        sqlx::query_scalar("SELECT user_id FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn manuscript_word_count(&self, project_id: Uuid) -> Result<u64> {
        self.sum_word_count("chapters", project_id).await
    }

    async fn outline_word_count(&self, project_id: Uuid) -> Result<u64> {
        self.sum_word_count("outlines", project_id).await
    }
}

/// Starred chat turns read from `chat_messages`.
#[derive(Clone)]
pub struct PgStarredMessages {
    pool: Pool<Postgres>,
}

impl PgStarredMessages {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StarredMessageSource for PgStarredMessages {
    async fn recent_starred(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StarredMessage>> {
        let rows = sqlx::query(
            "SELECT m.id, m.session_id, m.role, m.content,
                    COALESCE(m.starred_at, m.created_at) AS starred_at
             FROM chat_messages m
             JOIN chat_sessions s ON s.id = m.session_id
             WHERE s.project_id = $1 AND m.session_id = $2 AND m.is_starred
             ORDER BY COALESCE(m.starred_at, m.created_at) DESC, m.id DESC
             LIMIT $3",
        )
        .bind(project_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| StarredMessage {
                id: row.get("id"),
                session_id: row.get("session_id"),
                role: row.get("role"),
                content: row.get("content"),
                starred_at: row.get("starred_at"),
            })
            .collect())
    }
}
