//! # Rhea Common
//!
//! Shared building blocks used by both the orchestration core (`rhea_core`)
//! and the REST gateway (`rhea_gateway`):
//!
//! - **`store`**: the content-addressed object store client. Every byte that
//!   moves between clients, workers, and tools travels through this store,
//!   keyed by opaque handles.
//! - **`proxy`**: the artifact envelope — file bytes plus metadata persisted
//!   behind a single handle. This is the only payload format workers write,
//!   so a client downloading any handle always receives the same shape.

pub mod proxy;
pub mod store;

pub use proxy::{ArtifactProxy, FileEnvelope, detect_format};
pub use store::{BlobStore, Handle, StoreError};
