//! Layered configuration.
//!
//! Tiers, lowest to highest priority, merged field by field:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `$CWD/.swarm/config.yaml`
//! 3. **User** - `~/.swarm-coord/config.yaml`
//! 4. **Environment** - variables below
//!
//! ## Environment Variables
//! - `SWARM_CONFIG_PATH` - Explicit config file (replaces tier discovery)
//! - `SWARM_STATE_DIR` - Directory holding the shared documents
//! - `SWARM_LOCK_TIMEOUT_MS` / `SWARM_LOCK_RETRY_MS` - Lock wait tuning
//! - `SWARM_MAX_AGENTS` - Population cap
//! - `SWARM_PROJECT_DIR` / `SWARM_USER_DIR` - Tier directories

mod loader;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier, deep_merge};
pub use types::*;
