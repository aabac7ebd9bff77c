//! Shared-state coordination for independently spawned agent processes.
//!
//! All shared state lives in small JSON documents on the local filesystem.
//! Each document is mutated only under an advisory lock on a sidecar file and
//! written back through a temp file and rename, so readers never observe a
//! partial write.
//!
//! - [`store`]: the locked read-modify-write primitive every component uses
//! - [`tasks`]: hierarchical task queue with claim/complete/release and subtasks
//! - [`registry`]: pid-liveness directory of spawned agents
//! - [`safety`]: per-agent doom-loop and consecutive-failure breakers
//! - [`reconcile`]: release of claims held by dead agents

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod reconcile;
pub mod registry;
pub mod safety;
pub mod store;
pub mod tasks;
pub mod types;
