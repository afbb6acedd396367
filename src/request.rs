//! The inbound half of the external interface: what a caller hands to [`crate::pool::Pool::acquire`].

use std::time::Duration;

use bytes::Bytes;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{conn::ConnId, event::TraceHook};

/// One HTTP/1.1 request to be driven over a pooled connection.
#[derive(TypedBuilder)]
pub struct PoolRequest {
    /// The target URL. Only its scheme/host/port are used to pick an [`crate::origin::Origin`];
    /// path and query are forwarded to the wire as the request target verbatim.
    pub url: Url,

    #[builder(default = "GET".to_string(), setter(into))]
    pub method: String,

    #[builder(default)]
    pub headers: Vec<(String, String)>,

    #[builder(default)]
    pub body: Bytes,

    #[builder(default)]
    pub extensions: RequestExtensions,
}

/// Per-request knobs that steer pool behavior rather than the wire request itself.
#[derive(Clone, Default)]
pub struct RequestExtensions {
    /// A hint that this request would like to reuse a specific RESERVED connection (sticky
    /// session routing), per the dispatcher's step-2 "honor a caller-supplied `conn_id`" rule. A
    /// stale or origin-mismatched hint is silently ignored rather than rejected.
    pub conn_id: Option<ConnId>,

    /// Per-phase timeouts for this request, overriding no pool-wide default.
    pub timeout: RequestTimeouts,

    /// An optional hook invoked synchronously with the bit-exact trace event vocabulary (see
    /// [`crate::event::phase`]) as this request's connection establishment and exchange proceed.
    pub trace: Option<TraceHook>,

    /// If true, the response handle's `aclose()` additionally performs `release()`, so a caller
    /// that has no interest in pinning a follow-up request to this exact connection can let the
    /// pool make it available to any request for the origin (ACTIVE -> IDLE) in one call instead
    /// of reserving it for this request's `conn_id` first.
    pub release_on_close: bool,
}

/// Timeouts applied to the distinct phases of acquiring and driving a connection. Each is
/// independent: a generous `pool` timeout does not imply a generous `connect` timeout.
#[derive(Clone, Copy, Default)]
pub struct RequestTimeouts {
    /// How long to wait in the FIFO queue for a connection to become available.
    pub pool: Option<Duration>,
    /// How long to wait for TCP connect (and, for `https`, the TLS handshake) to complete.
    pub connect: Option<Duration>,
    /// How long to wait for any single read from the connection.
    pub read: Option<Duration>,
    /// How long to wait for any single write to the connection.
    pub write: Option<Duration>,
}
