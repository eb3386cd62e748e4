//! SQLite implementation of the endpoint repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use mcplink_core::domain::{ConnectionStatus, Endpoint, NewEndpoint, UpdateEndpoint};
use mcplink_core::ports::{EndpointRepository, RepositoryError};

use super::{map_sqlx_error, parse_datetime};

/// SQLite-backed endpoint store.
pub struct SqliteEndpointRepository {
    pool: SqlitePool,
}

impl SqliteEndpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EndpointRow {
    id: i64,
    name: String,
    url: String,
    enabled: bool,
    connection_status: String,
    last_connected_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

fn row_to_endpoint(row: EndpointRow) -> Endpoint {
    Endpoint {
        id: row.id,
        name: row.name,
        url: row.url,
        enabled: row.enabled,
        connection_status: ConnectionStatus::from_db(&row.connection_status),
        last_connected_at: row.last_connected_at.as_deref().map(parse_datetime),
        last_error: row.last_error,
        created_at: parse_datetime(&row.created_at),
        updated_at: parse_datetime(&row.updated_at),
    }
}

const SELECT: &str = "SELECT id, name, url, enabled, connection_status, last_connected_at, \
                      last_error, created_at, updated_at FROM endpoints";

#[async_trait]
impl EndpointRepository for SqliteEndpointRepository {
    async fn insert(&self, endpoint: NewEndpoint) -> Result<Endpoint, RepositoryError> {
        let result = sqlx::query("INSERT INTO endpoints (name, url, enabled) VALUES (?, ?, ?)")
            .bind(&endpoint.name)
            .bind(&endpoint.url)
            .bind(endpoint.enabled)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "endpoint name already exists"))?;

        self.get_by_id(result.last_insert_rowid()).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Endpoint, RepositoryError> {
        let row = sqlx::query_as::<_, EndpointRow>(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Internal(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(format!("endpoint id {id}")))?;
        Ok(row_to_endpoint(row))
    }

    async fn get_by_name(&self, name: &str) -> Result<Endpoint, RepositoryError> {
        let row = sqlx::query_as::<_, EndpointRow>(&format!("{SELECT} WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Internal(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(format!("endpoint '{name}'")))?;
        Ok(row_to_endpoint(row))
    }

    async fn list(&self) -> Result<Vec<Endpoint>, RepositoryError> {
        let rows = sqlx::query_as::<_, EndpointRow>(&format!("{SELECT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;
        Ok(rows.into_iter().map(row_to_endpoint).collect())
    }

    async fn list_enabled(&self) -> Result<Vec<Endpoint>, RepositoryError> {
        let rows =
            sqlx::query_as::<_, EndpointRow>(&format!("{SELECT} WHERE enabled = 1 ORDER BY id"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryError::Internal(e.to_string()))?;
        Ok(rows.into_iter().map(row_to_endpoint).collect())
    }

    async fn update(&self, id: i64, update: UpdateEndpoint) -> Result<Endpoint, RepositoryError> {
        let current = self.get_by_id(id).await?;
        let name = update.name.unwrap_or(current.name);
        let url = update.url.unwrap_or(current.url);
        let enabled = update.enabled.unwrap_or(current.enabled);

        sqlx::query(
            "UPDATE endpoints SET name = ?, url = ?, enabled = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(&name)
        .bind(&url)
        .bind(enabled)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "endpoint name already exists"))?;

        self.get_by_id(id).await
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<Endpoint, RepositoryError> {
        let result = sqlx::query(
            "UPDATE endpoints SET enabled = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(enabled)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("endpoint id {id}")));
        }
        self.get_by_id(id).await
    }

    async fn update_status(
        &self,
        id: i64,
        status: ConnectionStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let query = if status == ConnectionStatus::Connected {
            "UPDATE endpoints SET connection_status = ?, last_error = ?, \
             last_connected_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP WHERE id = ?"
        } else {
            "UPDATE endpoints SET connection_status = ?, last_error = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?"
        };

        let result = sqlx::query(query)
            .bind(status.as_str())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("endpoint id {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM endpoints WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("endpoint id {id}")));
        }
        Ok(())
    }
}
