//! # Shared Key-Value Index
//!
//! The worker-handle registry lives in a shared key-value index: the
//! scheduler writes `agent_handle:{run_id}-{tool_id}` entries, session
//! controllers read them, and stale entries are tolerated and re-created on
//! demand. Redis backs the production deployment; an in-memory map backs
//! tests and single-process runs.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

use crate::error::{Result, RheaError};

#[async_trait]
pub trait KvIndex: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Number of keys under a prefix. Feeds the registry-size gauge.
    async fn count_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Redis-backed index using a multiplexed connection manager.
pub struct RedisIndex {
    manager: redis::aio::ConnectionManager,
}

impl RedisIndex {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{host}:{port}"))
            .map_err(|e| RheaError::ResourcesUnavailable(format!("redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| RheaError::ResourcesUnavailable(format!("redis connect: {e}")))?;
        Ok(Self { manager })
    }
}

fn index_err(e: redis::RedisError) -> RheaError {
    RheaError::ResourcesUnavailable(format!("kv index: {e}"))
}

#[async_trait]
impl KvIndex for RedisIndex {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(index_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(index_err)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(index_err)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(index_err)?;
        Ok(keys.len())
    }
}

/// In-process index for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: DashMap<String, String>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvIndex for MemoryIndex {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_index_round_trip() {
        let index = MemoryIndex::new();
        index.set("agent_handle:run1-tool1", "worker-a").await.unwrap();
        index.set("agent_handle:run1-tool2", "worker-b").await.unwrap();
        index.set("other:key", "x").await.unwrap();

        assert_eq!(
            index.get("agent_handle:run1-tool1").await.unwrap().as_deref(),
            Some("worker-a")
        );
        assert_eq!(index.count_prefix("agent_handle:").await.unwrap(), 2);

        index.delete("agent_handle:run1-tool1").await.unwrap();
        assert!(index.get("agent_handle:run1-tool1").await.unwrap().is_none());
        assert_eq!(index.count_prefix("agent_handle:").await.unwrap(), 1);
    }
}
