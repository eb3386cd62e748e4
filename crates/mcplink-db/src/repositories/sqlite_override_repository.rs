//! SQLite implementation of the tool override repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use mcplink_core::domain::ToolOverride;
use mcplink_core::ports::{RepositoryError, ToolOverrideRepository};

use super::parse_datetime;

/// SQLite-backed override store.
pub struct SqliteOverrideRepository {
    pool: SqlitePool,
}

impl SqliteOverrideRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OverrideRow {
    server_name: String,
    tool_name: String,
    disabled: bool,
    custom_name: Option<String>,
    custom_description: Option<String>,
    updated_at: String,
}

fn row_to_override(row: OverrideRow) -> ToolOverride {
    ToolOverride {
        server_name: row.server_name,
        tool_name: row.tool_name,
        disabled: row.disabled,
        custom_name: row.custom_name,
        custom_description: row.custom_description,
        updated_at: parse_datetime(&row.updated_at),
    }
}

const SELECT: &str = "SELECT server_name, tool_name, disabled, custom_name, \
                      custom_description, updated_at FROM tool_overrides";

#[async_trait]
impl ToolOverrideRepository for SqliteOverrideRepository {
    async fn upsert(&self, ov: &ToolOverride) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tool_overrides \
             (server_name, tool_name, disabled, custom_name, custom_description, updated_at) \
             VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP) \
             ON CONFLICT(server_name, tool_name) DO UPDATE SET \
             disabled = excluded.disabled, \
             custom_name = excluded.custom_name, \
             custom_description = excluded.custom_description, \
             updated_at = excluded.updated_at",
        )
        .bind(&ov.server_name)
        .bind(&ov.tool_name)
        .bind(ov.disabled)
        .bind(&ov.custom_name)
        .bind(&ov.custom_description)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, server_name: &str, tool_name: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM tool_overrides WHERE server_name = ? AND tool_name = ?")
            .bind(server_name)
            .bind(tool_name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ToolOverride>, RepositoryError> {
        let rows =
            sqlx::query_as::<_, OverrideRow>(&format!("{SELECT} ORDER BY server_name, tool_name"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryError::Internal(e.to_string()))?;
        Ok(rows.into_iter().map(row_to_override).collect())
    }

    async fn for_server(&self, server_name: &str) -> Result<Vec<ToolOverride>, RepositoryError> {
        let rows = sqlx::query_as::<_, OverrideRow>(&format!(
            "{SELECT} WHERE server_name = ? ORDER BY tool_name"
        ))
        .bind(server_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Internal(e.to_string()))?;
        Ok(rows.into_iter().map(row_to_override).collect())
    }
}
