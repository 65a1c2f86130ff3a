//! Error taxonomy for the session lifecycle engine.
//!
//! Organized by cause, not by the Rust type that happened to produce it,
//! matching the taxonomy of the lifecycle engine's design notes: `Spawn`,
//! `HookExitNonZero`, `BindingOverflow`, `AddrRender`, `Accounting`, and
//! `ControlProtocol`. Only the first four are ever fatal to a session; the
//! last two are always recovered by the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// fork()/exec() failed before the child could even attempt the script.
    #[error("failed to spawn hook process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The hook script ran but exited non-zero (or was killed by a signal).
    #[error("hook script exited with failure status: {0}")]
    HookExitNonZero(String),

    /// A joined route/DNS binding would exceed the environment-size ceiling.
    #[error("binding {name} would exceed the environment size limit")]
    BindingOverflow { name: &'static str },

    /// Could not render a required numeric-host address.
    #[error("failed to render address for {binding}")]
    AddrRender { binding: &'static str },

    /// Accounting database write failed; never fatal, logged by the caller.
    #[error("accounting write failed: {0}")]
    Accounting(String),

    /// A control-surface request was malformed or otherwise unserviceable.
    #[error("malformed control request: {0}")]
    ControlProtocol(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
