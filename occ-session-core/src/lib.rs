//! Session lifecycle engine for an OpenConnect-compatible TLS VPN server.
//!
//! Owns the accounting writer, environment binder, hook runner, and the
//! per-session state machine described in the module docs of each submodule.
//! The binary entry point (`main.rs`) wires these into a single-task
//! supervisor loop; this library is usable on its own for testing.

pub mod accounting;
pub mod config;
pub mod control;
pub mod env_binder;
pub mod error;
pub mod hooks;
pub mod session;
pub mod signals;
pub mod supervisor;
