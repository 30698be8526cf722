//! # Worker Scheduler
//!
//! Maintains the bounded pool of worker blocks. Workers are born lazily on
//! the first call for their tool, reused for every subsequent call, and
//! reaped when idle past their TTL or at shutdown. At most one worker exists
//! per tool id across the fleet; when the pool is saturated, callers wait
//! for a slot until the acquire timeout expires.
//!
//! Where a block actually runs is a provider concern (local process,
//! container runtime, batch queue) — see [`provider`]. The scheduler
//! registers each provisioned worker's handle in the shared key-value index
//! under `agent_handle:{run_id}-{tool_id}` so other processes can find it;
//! stale entries are tolerated and re-created on demand.

pub mod provider;

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use uuid::Uuid;

use crate::descriptor::ToolDescriptor;
use crate::error::{Result, RheaError};
use crate::worker::ToolWorker;
use provider::BlockProvider;
use rhea_common::BlobStore;

/// Key prefix for worker handles in the shared index.
pub const HANDLE_PREFIX: &str = "agent_handle:";

/// Pool sizing and timeout knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently provisioned worker blocks.
    pub max_blocks: usize,
    /// How long `ensure` waits for a free slot before `ResourceExhausted`.
    pub acquire_timeout: Duration,
    /// Wall-clock limit on provisioning one worker.
    pub provision_timeout: Duration,
    /// Idle time after which a worker is drained.
    pub idle_ttl: Duration,
    /// Per-invocation subprocess limit handed to workers.
    pub command_timeout: Duration,
    /// Cadence of the idle reaper.
    pub reap_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_blocks: 5,
            acquire_timeout: Duration::from_secs(60),
            provision_timeout: Duration::from_secs(900),
            idle_ttl: Duration::from_secs(3600),
            command_timeout: Duration::from_secs(600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

struct WorkerSlot {
    worker: Arc<ToolWorker>,
    handle_key: String,
    _permit: OwnedSemaphorePermit,
}

/// Lazily provisions and pools workers, one per tool.
pub struct WorkerScheduler {
    config: SchedulerConfig,
    provider: Arc<dyn BlockProvider>,
    store: BlobStore,
    registry: Arc<dyn crate::kv::KvIndex>,
    run_id: String,
    workers: RwLock<HashMap<String, WorkerSlot>>,
    slots: Arc<Semaphore>,
    /// Serializes provisioning so two callers cannot race a worker for the
    /// same tool into existence.
    provision_lock: Mutex<()>,
}

impl WorkerScheduler {
    pub fn new(
        config: SchedulerConfig,
        provider: Arc<dyn BlockProvider>,
        store: BlobStore,
        registry: Arc<dyn crate::kv::KvIndex>,
        run_id: impl Into<String>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_blocks));
        tracing::info!(
            provider = provider.name(),
            max_blocks = config.max_blocks,
            "worker scheduler created"
        );
        Self {
            config,
            provider,
            store,
            registry,
            run_id: run_id.into(),
            workers: RwLock::new(HashMap::new()),
            slots,
            provision_lock: Mutex::new(()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the worker for a tool, provisioning it on first use.
    pub async fn ensure(&self, tool: &Arc<ToolDescriptor>) -> Result<Arc<ToolWorker>> {
        if let Some(worker) = self.lookup_live(&tool.id).await {
            return Ok(worker);
        }

        let _provisioning = self.provision_lock.lock().await;

        // Double-check under the lock; someone may have provisioned while
        // this caller waited, or the previous worker may have died.
        if let Some(worker) = self.lookup_live(&tool.id).await {
            return Ok(worker);
        }
        self.evict_terminal(&tool.id).await;

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        .map_err(|_| RheaError::ResourceExhausted(self.config.acquire_timeout))?
        .map_err(|_| RheaError::WorkerCrashed("scheduler shut down".to_string()))?;

        tracing::info!(tool_id = %tool.id, provider = self.provider.name(), "provisioning worker");
        let environment = tokio::time::timeout(
            self.config.provision_timeout,
            self.provider.provision(tool),
        )
        .await
        .map_err(|_| RheaError::Timeout(self.config.provision_timeout))??;

        let worker = Arc::new(ToolWorker::new(
            Arc::clone(tool),
            environment,
            self.store.clone(),
            self.config.command_timeout,
        ));

        let handle_key = format!("{HANDLE_PREFIX}{}-{}", self.run_id, tool.id);
        let worker_id = Uuid::new_v4().to_string();
        if let Err(e) = self.registry.set(&handle_key, &worker_id).await {
            // The index is advisory; readers re-resolve on demand.
            tracing::warn!(key = %handle_key, error = %e, "handle registration failed");
        }

        let mut workers = self.workers.write().await;
        workers.insert(
            tool.id.clone(),
            WorkerSlot {
                worker: Arc::clone(&worker),
                handle_key,
                _permit: permit,
            },
        );
        metrics::gauge!("worker_registry_size").set(workers.len() as f64);

        tracing::info!(tool_id = %tool.id, worker_id, "worker ready");
        Ok(worker)
    }

    async fn lookup_live(&self, tool_id: &str) -> Option<Arc<ToolWorker>> {
        let workers = self.workers.read().await;
        workers
            .get(tool_id)
            .filter(|slot| !slot.worker.state().is_terminal())
            .map(|slot| Arc::clone(&slot.worker))
    }

    async fn evict_terminal(&self, tool_id: &str) {
        let mut workers = self.workers.write().await;
        if workers
            .get(tool_id)
            .is_some_and(|slot| slot.worker.state().is_terminal())
        {
            if let Some(slot) = workers.remove(tool_id) {
                let _ = self.registry.delete(&slot.handle_key).await;
            }
            metrics::gauge!("worker_registry_size").set(workers.len() as f64);
        }
    }

    /// Number of currently pooled workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Start the idle reaper.
    pub fn start_background_tasks(self: Arc<Self>) {
        let interval = self.config.reap_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                self.reap_idle().await;
            }
        });
    }

    /// Drain workers idle beyond the TTL and drop ones already terminal.
    pub async fn reap_idle(&self) {
        let expired: Vec<(String, Arc<ToolWorker>, String)> = {
            let workers = self.workers.read().await;
            workers
                .iter()
                .filter(|(_, slot)| {
                    slot.worker.state().is_terminal()
                        || (slot.worker.idle_for() > self.config.idle_ttl
                            && slot.worker.state() == crate::worker::WorkerState::Ready)
                })
                .map(|(id, slot)| {
                    (
                        id.clone(),
                        Arc::clone(&slot.worker),
                        slot.handle_key.clone(),
                    )
                })
                .collect()
        };

        for (tool_id, worker, handle_key) in expired {
            tracing::info!(%tool_id, "reaping idle worker");
            worker.drain().await;
            let mut workers = self.workers.write().await;
            workers.remove(&tool_id);
            metrics::gauge!("worker_registry_size").set(workers.len() as f64);
            drop(workers);
            let _ = self.registry.delete(&handle_key).await;
        }
    }

    /// Drain every worker and clear the handle registry.
    pub async fn shutdown_all(&self) {
        tracing::info!("scheduler shutdown: draining all workers");
        let drained: Vec<WorkerSlot> = {
            let mut workers = self.workers.write().await;
            metrics::gauge!("worker_registry_size").set(0.0);
            workers.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            slot.worker.drain().await;
            let _ = self.registry.delete(&slot.handle_key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::provider::PlainProvider;
    use super::*;
    use crate::descriptor::{Inputs, Outputs, ToolDescriptor};
    use crate::kv::{KvIndex, MemoryIndex};

    fn tool(id: &str) -> Arc<ToolDescriptor> {
        Arc::new(ToolDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            version: None,
            description: String::new(),
            long_description: None,
            documentation: None,
            requirements: Vec::new(),
            interpreter: None,
            command: "true".to_string(),
            version_command: None,
            inputs: Inputs::default(),
            outputs: Outputs::default(),
            configfiles: Vec::new(),
            tests: Vec::new(),
        })
    }

    fn scheduler(config: SchedulerConfig) -> (WorkerScheduler, Arc<MemoryIndex>) {
        let registry = Arc::new(MemoryIndex::new());
        let scheduler = WorkerScheduler::new(
            config,
            Arc::new(PlainProvider),
            BlobStore::in_memory(),
            registry.clone(),
            "test-run",
        );
        (scheduler, registry)
    }

    #[tokio::test]
    async fn sequential_calls_reuse_one_worker() {
        let (scheduler, _) = scheduler(SchedulerConfig::default());
        let t = tool("tool-a");

        let first = scheduler.ensure(&t).await.unwrap();
        let second = scheduler.ensure(&t).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(scheduler.worker_count().await, 1);

        let other = scheduler.ensure(&tool("tool-b")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(scheduler.worker_count().await, 2);
    }

    #[tokio::test]
    async fn handle_is_registered_in_the_index() {
        let (scheduler, registry) = scheduler(SchedulerConfig::default());
        scheduler.ensure(&tool("tool-a")).await.unwrap();

        let value = registry.get("agent_handle:test-run-tool-a").await.unwrap();
        assert!(value.is_some());
        assert_eq!(registry.count_prefix(HANDLE_PREFIX).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn saturated_pool_times_out_with_resource_exhausted() {
        let config = SchedulerConfig {
            max_blocks: 1,
            acquire_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (scheduler, _) = scheduler(config);

        scheduler.ensure(&tool("tool-a")).await.unwrap();
        let err = scheduler.ensure(&tool("tool-b")).await.unwrap_err();
        assert!(matches!(err, RheaError::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn reaper_frees_slots_and_registry_entries() {
        let config = SchedulerConfig {
            max_blocks: 1,
            acquire_timeout: Duration::from_millis(100),
            idle_ttl: Duration::from_millis(0),
            ..Default::default()
        };
        let (scheduler, registry) = scheduler(config);

        scheduler.ensure(&tool("tool-a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        scheduler.reap_idle().await;

        assert_eq!(scheduler.worker_count().await, 0);
        assert_eq!(registry.count_prefix(HANDLE_PREFIX).await.unwrap(), 0);

        // The freed slot is usable again.
        scheduler.ensure(&tool("tool-b")).await.unwrap();
        assert_eq!(scheduler.worker_count().await, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_everything() {
        let (scheduler, registry) = scheduler(SchedulerConfig::default());
        scheduler.ensure(&tool("tool-a")).await.unwrap();
        scheduler.ensure(&tool("tool-b")).await.unwrap();

        scheduler.shutdown_all().await;
        assert_eq!(scheduler.worker_count().await, 0);
        assert_eq!(registry.count_prefix(HANDLE_PREFIX).await.unwrap(), 0);
    }
}
