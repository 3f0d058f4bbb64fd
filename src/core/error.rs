//! Error types for the task framework.

use thiserror::Error;

/// Errors raised while encoding or decoding the wire message format.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be represented in the wire format.
    #[error("encode error: {0}")]
    Encode(String),
    /// The bytes were malformed or did not match the `[name, args, kwargs]` shape.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors raised by the concurrency pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `spawn` was called while the pool was at capacity.
    #[error("pool full")]
    PoolFull,
    /// `wait_spawn`/`spawn` was called after `wait_close`/`force_close`.
    #[error("pool closed")]
    PoolClosed,
}

/// Errors raised while registering tasks.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two tasks were registered under the same name.
    #[error("duplicate task: {0}")]
    DuplicateTask(String),
    /// A transport policy combination was invalid (e.g. `ack_always` with `reject`).
    #[error("invalid task configuration: {0}")]
    Config(String),
}

/// Errors surfaced from the transport drivers (connect/declare/publish/consume).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying broker client returned an error.
    #[error("transport error: {0}")]
    Backend(String),
    /// The task being published was never registered on this runtime.
    #[error("task not registered: {0}")]
    UnregisteredTask(String),
}

/// The outcome of attempting to execute a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The user-supplied callable returned an error.
    #[error("task execution failed: {0}")]
    Execution(String),
    /// The task did not finish within its deadline.
    #[error("task timed out")]
    Timeout,
}

/// Application-facing result type for setup/bootstrap code, following the
/// teacher's split between typed domain errors and an opaque `anyhow` alias
/// for higher-level call sites.
pub type AppResult<T> = Result<T, anyhow::Error>;
