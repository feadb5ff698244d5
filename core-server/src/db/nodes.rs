//! Routable node repository
//!
//! The node list answers `node.list_request`; only enabled nodes are
//! advertised to edges.

use sqlx::SqlitePool;

use shared::{AppError, AppResult};

/// A routable location node.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub node_type: String,
    pub enabled: bool,
}

/// Enabled nodes, by name.
pub async fn list_nodes(pool: &SqlitePool) -> AppResult<Vec<Node>> {
    sqlx::query_as::<_, Node>(
        "SELECT id, name, node_type, enabled FROM nodes WHERE enabled = 1 ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))
}

/// Insert or update a node by name.
pub async fn upsert_node(
    pool: &SqlitePool,
    name: &str,
    node_type: &str,
    enabled: bool,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO nodes (name, node_type, enabled) VALUES (?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET node_type = excluded.node_type, \
         enabled = excluded.enabled",
    )
    .bind(name)
    .bind(node_type)
    .bind(enabled)
    .execute(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_disabled_nodes_are_hidden() {
        let pool = test_pool().await;
        upsert_node(&pool, "line-3", "line", true).await.unwrap();
        upsert_node(&pool, "staging-1", "staging", true).await.unwrap();
        upsert_node(&pool, "scrap-1", "scrap", false).await.unwrap();

        let nodes = list_nodes(&pool).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "line-3");
        assert_eq!(nodes[1].node_type, "staging");
    }
}
