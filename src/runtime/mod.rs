//! Small runtime-facing helpers used by the pool worker and response handles.
//!
//! This crate targets `tokio` only, so these helpers are thin wrappers rather than a
//! runtime-agnostic enum.

mod worker_handle;

pub(crate) use worker_handle::{WorkerHandle, WorkerHandleListener};

use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Spawns a future on the current tokio runtime, detached.
///
/// Used for best-effort background work (closing an evicted or expired connection's stream)
/// where the caller cannot `.await` the result — notably from the worker task itself, which
/// must never block its own `select!` loop on a socket shutdown.
pub(crate) fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Runs `future`, failing with `None` if it does not complete within `timeout`.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, future).await.ok()
}
