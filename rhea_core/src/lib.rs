//! # Rhea Core
//!
//! Rhea is a request-driven execution fabric: it exposes a catalog of
//! externally-defined computational tools over the Model Context Protocol
//! and, on demand, materializes each tool as an isolated worker with a
//! pinned package environment, streams file inputs and outputs through a
//! content-addressed object store, and returns structured results.
//!
//! ## Pipeline
//!
//! A call arrives at the session controller referencing a tool by name. The
//! controller resolves the descriptor, asks the scheduler for that tool's
//! worker (provisioning one lazily through a block provider on first use),
//! coerces the user arguments into typed parameters, and dispatches. The
//! worker stages inputs out of the object store into a scratch directory,
//! renders the descriptor's command template into a shell script, executes
//! it inside the tool's package environment, then discovers and registers
//! the output artifacts before replying.
//!
//! ## Modules
//!
//! - **`descriptor`**: the read-only tool descriptor model and catalog.
//! - **`params`**: typed parameter variants and their coercions.
//! - **`template`**: the command templater — conditional directives and
//!   variable references over a parameter environment, rendered to bash.
//! - **`environment`**: per-tool conda environments with two-phase install.
//! - **`worker`**: the per-tool executor and its state machine.
//! - **`scheduler`**: the bounded worker pool and its block providers.
//! - **`mcp_service`**: the per-session MCP surface (`find_tools`, dynamic
//!   tool bindings, documentation resources, change notifications).
//! - **`harness`**: projects descriptor-embedded test cases into runnable
//!   invocations with content assertions.
//! - **`semantic`**: client interface to the external embedding index.
//! - **`kv`**: the shared key-value index holding worker handles.
//! - **`session`**, **`settings`**, **`metrics`**, **`retry`**,
//!   **`logging`**, **`error`**: ambient plumbing.

pub mod descriptor;
pub mod environment;
pub mod error;
pub mod harness;
pub mod kv;
pub mod logging;
pub mod mcp_service;
pub mod metrics;
pub mod params;
pub mod retry;
pub mod scheduler;
pub mod semantic;
pub mod session;
pub mod settings;
pub mod template;
pub mod worker;

pub use error::{Result, RheaError};
pub use mcp_service::{AppState, RheaMcpService};
pub use scheduler::WorkerScheduler;
pub use worker::{InvocationResult, ToolWorker};
