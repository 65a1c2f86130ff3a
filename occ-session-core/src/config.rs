//! Resolved configuration snapshot.
//!
//! Parsing `occserv.conf` is out of scope (spec §1); this module only holds
//! the already-resolved shape the binder and hook runner consume, as plain
//! serde-deserializable structs so a config-loading layer can be bolted on
//! without touching the engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global, server-wide configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    pub connect_script: Option<PathBuf>,
    pub disconnect_script: Option<PathBuf>,
    pub firewall_wrapper_script: Option<PathBuf>,
    pub use_accounting: bool,
    pub network: NetworkDefaults,
}

/// Server-wide route/DNS defaults. Each entry is a self-classifying textual
/// CIDR/address: IPv6 iff it contains a colon (spec §3's classifier).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkDefaults {
    pub routes: Vec<String>,
    pub no_routes: Vec<String>,
    pub dns: Vec<String>,
}

/// Per-session / per-group overrides layered on top of `NetworkDefaults`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionOverrides {
    pub routes: Vec<String>,
    pub no_routes: Vec<String>,
    pub dns: Vec<String>,
    pub restrict_user_to_routes: bool,
}
