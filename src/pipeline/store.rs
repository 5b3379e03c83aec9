/// Webhook token store
///
/// Maps a webhook token to the pipeline it was minted for. The contract is
/// read-mostly and single-writer-per-key: a token is written once at
/// registration and never changes afterwards, so concurrent readers never
/// observe a partially updated mapping.

use crate::pipeline::types::Node;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use std::{collections::HashMap, sync::Arc};

/// What a webhook token is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub token: String,
    pub flow_id: String,
    pub nodes: Vec<Node>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token already registered: {0}")]
    Conflict(String),

    #[error("corrupt registration for token {token}: {source}")]
    Corrupt {
        token: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

/// Token → pipeline store injected into the trigger scheduler
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, token: &str) -> Result<Option<WebhookRegistration>, StoreError>;

    /// Insert a new mapping; an existing token is a `Conflict`
    async fn put(&self, registration: WebhookRegistration) -> Result<(), StoreError>;

    async fn exists(&self, token: &str) -> Result<bool, StoreError>;
}

/// Lock-free in-memory store
///
/// Reads load the current map pointer; writes clone-and-swap it, so readers are
/// never blocked by registration.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: ArcSwap<HashMap<String, Arc<WebhookRegistration>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, token: &str) -> Result<Option<WebhookRegistration>, StoreError> {
        Ok(self.tokens.load().get(token).map(|r| (**r).clone()))
    }

    async fn put(&self, registration: WebhookRegistration) -> Result<(), StoreError> {
        let token = registration.token.clone();
        let registration = Arc::new(registration);
        let mut conflict = false;

        self.tokens.rcu(|current| {
            if current.contains_key(&token) {
                conflict = true;
                return Arc::clone(current);
            }
            conflict = false;
            let mut next = (**current).clone();
            next.insert(token.clone(), Arc::clone(&registration));
            Arc::new(next)
        });

        if conflict {
            return Err(StoreError::Conflict(token));
        }
        Ok(())
    }

    async fn exists(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.tokens.load().contains_key(token))
    }
}

/// SQLite-backed store sharing the queue database
#[derive(Debug, Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn get(&self, token: &str) -> Result<Option<WebhookRegistration>, StoreError> {
        let row = sqlx::query("SELECT flow_id, nodes, created_at FROM webhooks WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let nodes_json: String = row.get("nodes");
        let nodes = serde_json::from_str(&nodes_json).map_err(|source| StoreError::Corrupt {
            token: token.to_string(),
            source,
        })?;
        let created_ms: i64 = row.get("created_at");

        Ok(Some(WebhookRegistration {
            token: token.to_string(),
            flow_id: row.get("flow_id"),
            nodes,
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        }))
    }

    async fn put(&self, registration: WebhookRegistration) -> Result<(), StoreError> {
        let nodes_json = serde_json::to_string(&registration.nodes).map_err(|source| StoreError::Corrupt {
            token: registration.token.clone(),
            source,
        })?;

        let result = sqlx::query(
            "INSERT INTO webhooks (token, flow_id, nodes, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&registration.token)
        .bind(&registration.flow_id)
        .bind(&nodes_json)
        .bind(registration.created_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict(registration.token))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, token: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM webhooks WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn registration(token: &str) -> WebhookRegistration {
        WebhookRegistration {
            token: token.to_string(),
            flow_id: "flow-a".to_string(),
            nodes: vec![Node::new("n1", "double_value")],
            created_at: Utc::now(),
        }
    }

    async fn exercise(store: &dyn TokenStore) {
        assert!(!store.exists("t1").await.unwrap());
        assert!(store.get("t1").await.unwrap().is_none());

        store.put(registration("t1")).await.unwrap();
        assert!(store.exists("t1").await.unwrap());

        let stored = store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.flow_id, "flow-a");
        assert_eq!(stored.nodes, vec![Node::new("n1", "double_value")]);

        let again = store.put(registration("t1")).await;
        assert!(matches!(again, Err(StoreError::Conflict(t)) if t == "t1"));
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryTokenStore::new();
        exercise(&store).await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let pool = db::connect_in_memory().await.unwrap();
        let store = SqliteTokenStore::new(pool);
        exercise(&store).await;
    }
}
