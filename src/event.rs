//! The bit-exact trace event vocabulary and the callback hook that receives it.
//!
//! Grounded on `event/cmap.rs`'s per-event struct family, but reshaped into a single
//! `(event_name, fields)` callback: the vocabulary here is fixed, ordered data rather than a
//! Rust trait with one method per event, so a caller can log, assert on, or forward it without
//! implementing a trait.

use std::{collections::HashMap, fmt, sync::Arc};

/// Connection-establishment phase events, `https` only between the two `start_tls` events.
pub mod phase {
    pub const CONNECT_TCP_STARTED: &str = "connection.connect_tcp.started";
    pub const CONNECT_TCP_COMPLETE: &str = "connection.connect_tcp.complete";
    pub const CONNECT_TCP_FAILED: &str = "connection.connect_tcp.failed";
    pub const START_TLS_STARTED: &str = "connection.start_tls.started";
    pub const START_TLS_COMPLETE: &str = "connection.start_tls.complete";
    pub const START_TLS_FAILED: &str = "connection.start_tls.failed";
    pub const SEND_REQUEST_HEADERS_STARTED: &str = "http11.send_request_headers.started";
    pub const SEND_REQUEST_HEADERS_COMPLETE: &str = "http11.send_request_headers.complete";
    pub const SEND_REQUEST_HEADERS_FAILED: &str = "http11.send_request_headers.failed";
    pub const SEND_REQUEST_BODY_STARTED: &str = "http11.send_request_body.started";
    pub const SEND_REQUEST_BODY_COMPLETE: &str = "http11.send_request_body.complete";
    pub const SEND_REQUEST_BODY_FAILED: &str = "http11.send_request_body.failed";
    pub const RECEIVE_RESPONSE_HEADERS_STARTED: &str = "http11.receive_response_headers.started";
    pub const RECEIVE_RESPONSE_HEADERS_COMPLETE: &str = "http11.receive_response_headers.complete";
    pub const RECEIVE_RESPONSE_HEADERS_FAILED: &str = "http11.receive_response_headers.failed";
    pub const RECEIVE_RESPONSE_BODY_STARTED: &str = "http11.receive_response_body.started";
    pub const RECEIVE_RESPONSE_BODY_COMPLETE: &str = "http11.receive_response_body.complete";
    pub const RECEIVE_RESPONSE_BODY_FAILED: &str = "http11.receive_response_body.failed";
    pub const RESPONSE_CLOSED_STARTED: &str = "http11.response_closed.started";
    pub const RESPONSE_CLOSED_COMPLETE: &str = "http11.response_closed.complete";
}

/// The `kwargs` map passed alongside an event name. Values are kept as their `Display`
/// rendering rather than a full dynamic-typing scheme, since the hook exists for observability
/// (logging, metrics, assertions in tests), not for the hook to mutate pool behavior.
pub type TraceFields = HashMap<&'static str, String>;

/// A per-request tracing callback, supplied through [`crate::request::PoolRequest::trace`].
///
/// Invoked synchronously at each named lifecycle event. A hook that panics or returns an error
/// propagates to the caller unchanged — failures here are never swallowed, since a silently
/// broken trace hook is worse than a crashed one.
pub type TraceHook = Arc<dyn Fn(&str, TraceFields) + Send + Sync>;

pub(crate) fn fields() -> TraceFields {
    HashMap::new()
}

/// Fires `hook` (if present) for `event`, building the field map lazily via `build`.
pub(crate) fn emit(hook: Option<&TraceHook>, event: &str, build: impl FnOnce() -> TraceFields) {
    if let Some(hook) = hook {
        hook(event, build());
    }
}

/// A process-level warning raised when a `Connection: close` response prevents reservation.
///
/// Modeled as ordinary data rather than piping through the error channel (distilled spec's
/// design note: "forward this through the platform's diagnostic channel, not via the error
/// channel"). Emitted through `tracing::warn!` by the connection driver; also exposed here so
/// callers that want to assert on it in tests don't have to scrape log output.
#[derive(Clone, Debug)]
pub struct ConnectionCloseWarning {
    pub conn_id: u64,
}

impl fmt::Display for ConnectionCloseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection {} negotiated `Connection: close`; it will not be reserved",
            self.conn_id
        )
    }
}
