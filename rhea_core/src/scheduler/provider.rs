//! Block providers: where a worker's isolate actually runs.
//!
//! The scheduler core only knows "ask for a block, get a worker reachable by
//! handle". Everything provider-specific — container runtime arguments, the
//! batch-queue submission wrapper — is confined to this module. A provider
//! yields a [`ToolEnvironment`] whose commands (install and execution alike)
//! are prefixed with the provider's launch wrapper.

use async_trait::async_trait;
use std::sync::Arc;

use crate::descriptor::ToolDescriptor;
use crate::environment::ToolEnvironment;
use crate::error::Result;

#[async_trait]
pub trait BlockProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allocate a block and bring up the package environment for one tool.
    async fn provision(&self, tool: &Arc<ToolDescriptor>) -> Result<ToolEnvironment>;
}

/// Runs workers as local processes with conda-managed environments.
#[derive(Debug, Default)]
pub struct LocalProvider;

#[async_trait]
impl BlockProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn provision(&self, tool: &Arc<ToolDescriptor>) -> Result<ToolEnvironment> {
        ToolEnvironment::create(&tool.id, &tool.requirements, Vec::new()).await
    }
}

/// Runs every environment command through a container runtime.
#[derive(Debug, Clone)]
pub struct ContainerProvider {
    /// `docker` or `podman`.
    pub backend: String,
    /// `host` or a named network.
    pub network: String,
    /// Image carrying the conda toolchain.
    pub image: String,
}

impl ContainerProvider {
    fn wrapper(&self) -> Vec<String> {
        vec![
            self.backend.clone(),
            "run".to_string(),
            "--rm".to_string(),
            "--network".to_string(),
            self.network.clone(),
            "-v".to_string(),
            "/tmp:/tmp".to_string(),
            self.image.clone(),
        ]
    }
}

#[async_trait]
impl BlockProvider for ContainerProvider {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn provision(&self, tool: &Arc<ToolDescriptor>) -> Result<ToolEnvironment> {
        ToolEnvironment::create(&tool.id, &tool.requirements, self.wrapper()).await
    }
}

/// Submits environment commands through a PBS-style grid scheduler.
/// `-W block=true` makes the submission synchronous, so the scheduler's
/// provisioning timeout still applies.
#[derive(Debug, Clone)]
pub struct BatchQueueProvider {
    pub queue: String,
    pub account: String,
    pub walltime: String,
}

impl BatchQueueProvider {
    fn wrapper(&self) -> Vec<String> {
        vec![
            "qsub".to_string(),
            "-W".to_string(),
            "block=true".to_string(),
            "-q".to_string(),
            self.queue.clone(),
            "-A".to_string(),
            self.account.clone(),
            "-l".to_string(),
            format!("walltime={}", self.walltime),
            "--".to_string(),
        ]
    }
}

#[async_trait]
impl BlockProvider for BatchQueueProvider {
    fn name(&self) -> &'static str {
        "batch-queue"
    }

    async fn provision(&self, tool: &Arc<ToolDescriptor>) -> Result<ToolEnvironment> {
        ToolEnvironment::create(&tool.id, &tool.requirements, self.wrapper()).await
    }
}

/// Direct execution without any package management. Smoke tests and
/// development runs where the host already has the tools installed.
#[derive(Debug, Default)]
pub struct PlainProvider;

#[async_trait]
impl BlockProvider for PlainProvider {
    fn name(&self) -> &'static str {
        "plain"
    }

    async fn provision(&self, tool: &Arc<ToolDescriptor>) -> Result<ToolEnvironment> {
        Ok(ToolEnvironment::plain(&tool.id))
    }
}
