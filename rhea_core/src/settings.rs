//! # Runtime Settings
//!
//! Every runtime parameter arrives through environment variables read once
//! at startup; a `.env` file is honored when present. Defaults match a
//! single-host development deployment (local Redis, local MinIO, local
//! vector index).

use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Which block provider backs the worker scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Container,
    BatchQueue,
    /// Direct execution without package management.
    Plain,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Port for the REST sidecar (upload/download/metrics).
    pub gateway_port: u16,
    pub debug_port: Option<u16>,

    /// Idle lifetime of a client session's tool bindings.
    pub client_ttl: Duration,

    pub provider: ProviderKind,
    pub container_backend: String,
    pub container_network: String,
    pub container_image: String,
    pub pbs_queue: String,
    pub pbs_account: String,
    pub pbs_walltime: String,

    pub max_blocks: usize,
    pub acquire_timeout: Duration,
    pub provision_timeout: Duration,
    pub command_timeout: Duration,
    pub worker_idle_ttl: Duration,

    pub redis_host: String,
    pub redis_port: u16,

    pub embedding_url: String,
    pub embedding_key: String,
    pub embedding_model: String,
    pub index_url: String,
    pub index_collection: String,
    pub find_tools_top_k: usize,

    pub store_endpoint: String,
    pub store_access_key: String,
    pub store_secret_key: String,
    pub store_bucket: String,
    pub store_secure: bool,

    pub catalog_path: String,
}

impl Settings {
    /// Read settings from the process environment, loading `.env` first.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: var_or("HOST", "localhost"),
            port: parse_or("PORT", 3001),
            gateway_port: parse_or("GATEWAY_PORT", 3002),
            debug_port: std::env::var("DEBUG_PORT").ok().and_then(|v| v.parse().ok()),

            client_ttl: Duration::from_secs(parse_or("CLIENT_TTL", 3600)),

            provider: match var_or("WORKER_PROVIDER", "local").as_str() {
                "docker" | "podman" | "container" => ProviderKind::Container,
                "pbs" | "batch" => ProviderKind::BatchQueue,
                "plain" => ProviderKind::Plain,
                _ => ProviderKind::Local,
            },
            container_backend: var_or("CONTAINER_BACKEND", "docker"),
            container_network: var_or("CONTAINER_NETWORK", "host"),
            container_image: var_or("CONTAINER_IMAGE", "rhea/worker:latest"),
            pbs_queue: var_or("PBS_QUEUE", "debug"),
            pbs_account: var_or("PBS_ACCOUNT", ""),
            pbs_walltime: var_or("PBS_WALLTIME", "01:00:00"),

            max_blocks: parse_or("MAX_BLOCKS", 5),
            acquire_timeout: Duration::from_secs(parse_or("ACQUIRE_TIMEOUT_SECONDS", 60)),
            provision_timeout: Duration::from_secs(parse_or("PROVISION_TIMEOUT_SECONDS", 900)),
            command_timeout: Duration::from_secs(parse_or("COMMAND_TIMEOUT_SECONDS", 600)),
            worker_idle_ttl: Duration::from_secs(parse_or("WORKER_IDLE_TTL_SECONDS", 3600)),

            redis_host: var_or("REDIS_HOST", "localhost"),
            redis_port: parse_or("REDIS_PORT", 6379),

            embedding_url: var_or("EMBEDDING_URL", "http://localhost:8000/v1"),
            embedding_key: var_or("EMBEDDING_KEY", ""),
            embedding_model: var_or("EMBEDDING_MODEL", "Qwen/Qwen3-Embedding-0.6B"),
            index_url: var_or("SEMANTIC_INDEX_URL", "http://localhost:6333"),
            index_collection: var_or("SEMANTIC_COLLECTION", "rhea-tools"),
            find_tools_top_k: parse_or("FIND_TOOLS_TOP_K", 10),

            store_endpoint: var_or("MINIO_ENDPOINT", "localhost:9000"),
            store_access_key: var_or("MINIO_ACCESS_KEY", "minioadmin"),
            store_secret_key: var_or("MINIO_SECRET_KEY", "minioadmin"),
            store_bucket: var_or("MINIO_BUCKET", "dev"),
            store_secure: parse_or("MINIO_SECURE", false),

            catalog_path: var_or("CATALOG_PATH", "tools.json"),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_blocks: self.max_blocks,
            acquire_timeout: self.acquire_timeout,
            provision_timeout: self.provision_timeout,
            idle_ttl: self.worker_idle_ttl,
            command_timeout: self.command_timeout,
            reap_interval: Duration::from_secs(60),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
