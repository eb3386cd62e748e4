//! Integration tests for the SQLite repositories against in-memory pools.

use mcplink_core::domain::{ConnectionStatus, NewEndpoint, ToolOverride, UpdateEndpoint};
use mcplink_core::ports::{EndpointRepository, RepositoryError, ToolOverrideRepository};
use mcplink_db::{SqliteEndpointRepository, SqliteOverrideRepository, setup_test_database};

async fn endpoint_repo() -> SqliteEndpointRepository {
    let pool = setup_test_database().await.expect("in-memory db");
    SqliteEndpointRepository::new(pool)
}

#[tokio::test]
async fn insert_and_fetch_endpoint() {
    let repo = endpoint_repo().await;

    let created = repo
        .insert(NewEndpoint::new("prod", "wss://hub.example.com/mcp"))
        .await
        .unwrap();
    assert!(created.id > 0);
    assert!(created.enabled);
    assert_eq!(created.connection_status, ConnectionStatus::Disconnected);

    let by_name = repo.get_by_name("prod").await.unwrap();
    assert_eq!(by_name.id, created.id);
    assert_eq!(by_name.url, "wss://hub.example.com/mcp");
}

#[tokio::test]
async fn duplicate_name_is_a_conflict() {
    let repo = endpoint_repo().await;

    repo.insert(NewEndpoint::new("prod", "ws://a/mcp"))
        .await
        .unwrap();
    let err = repo
        .insert(NewEndpoint::new("prod", "ws://b/mcp"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));
}

#[tokio::test]
async fn list_enabled_filters_disabled_endpoints() {
    let repo = endpoint_repo().await;

    let a = repo.insert(NewEndpoint::new("a", "ws://a/mcp")).await.unwrap();
    let mut b = NewEndpoint::new("b", "ws://b/mcp");
    b.enabled = false;
    repo.insert(b).await.unwrap();

    let enabled = repo.list_enabled().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, a.id);

    repo.set_enabled(a.id, false).await.unwrap();
    assert!(repo.list_enabled().await.unwrap().is_empty());
}

#[tokio::test]
async fn partial_update_changes_only_given_fields() {
    let repo = endpoint_repo().await;
    let created = repo.insert(NewEndpoint::new("a", "ws://a/mcp")).await.unwrap();

    let updated = repo
        .update(
            created.id,
            UpdateEndpoint {
                url: Some("ws://a2/mcp".to_string()),
                ..UpdateEndpoint::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.url, "ws://a2/mcp");
    assert_eq!(updated.name, "a");
    assert!(updated.enabled);
}

#[tokio::test]
async fn status_updates_record_errors_and_connect_time() {
    let repo = endpoint_repo().await;
    let created = repo.insert(NewEndpoint::new("a", "ws://a/mcp")).await.unwrap();
    assert!(created.last_connected_at.is_none());

    repo.update_status(created.id, ConnectionStatus::Error, Some("dial timeout"))
        .await
        .unwrap();
    let errored = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(errored.connection_status, ConnectionStatus::Error);
    assert_eq!(errored.last_error.as_deref(), Some("dial timeout"));

    repo.update_status(created.id, ConnectionStatus::Connected, None)
        .await
        .unwrap();
    let connected = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(connected.connection_status, ConnectionStatus::Connected);
    assert!(connected.last_error.is_none());
    assert!(connected.last_connected_at.is_some());
}

#[tokio::test]
async fn delete_removes_the_endpoint() {
    let repo = endpoint_repo().await;
    let created = repo.insert(NewEndpoint::new("a", "ws://a/mcp")).await.unwrap();

    repo.delete(created.id).await.unwrap();
    assert!(matches!(
        repo.get_by_id(created.id).await,
        Err(RepositoryError::NotFound(_))
    ));
    assert!(matches!(
        repo.delete(created.id).await,
        Err(RepositoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn override_upsert_replaces_and_remove_is_idempotent() {
    let pool = setup_test_database().await.unwrap();
    let repo = SqliteOverrideRepository::new(pool);

    let mut ov = ToolOverride::disabled("calc", "add");
    repo.upsert(&ov).await.unwrap();

    ov.disabled = false;
    ov.custom_description = Some("adds two numbers".to_string());
    repo.upsert(&ov).await.unwrap();

    let stored = repo.for_server("calc").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].disabled);
    assert_eq!(
        stored[0].custom_description.as_deref(),
        Some("adds two numbers")
    );

    repo.remove("calc", "add").await.unwrap();
    repo.remove("calc", "add").await.unwrap();
    assert!(repo.list().await.unwrap().is_empty());
}
