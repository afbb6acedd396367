//! The `Connection` record: the minimal per-connection state the pool tracks, grounded on
//! `cmap/conn/mod.rs`'s `Connection` (id/address/generation/stream/ready-time fields), minus
//! the staleness/generation axis — this spec has no pool-clear/epoch operation, so a bare
//! `conn_id` is enough to detect a stale token (see DESIGN.md).

pub(crate) mod driver;

use std::time::{Duration, Instant};

use crate::{net::BoxedStream, origin::Origin};

/// Opaque, process-unique identifier for one physical connection's entire lifetime. A bare
/// monotonic counter: since `conn_id` is never reused, a stale or absent token is already
/// detected in O(1) by a registry miss, so no separate generation counter is carried.
pub type ConnId = u64;

/// The connection's own linear exchange-state axis, orthogonal to [`crate::pool::PoolStatus`].
/// A RESERVED connection is always `Idle` here (data model invariant 4); a connection actively
/// driving an exchange is `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DriverState {
    Connecting,
    Idle,
    Active,
    Closed,
}

/// One physical connection: its identity, origin, and the stream the driver reads and writes.
///
/// Lives in exactly one of three places at a time: the pool's `reserved` map, the pool's `idle`
/// list, or a caller's [`crate::response::ResponseHandle`] while ACTIVE — never in more than one,
/// which is what keeps the status-set invariants (data model §3, invariants 1-3) free from a
/// separate lock: only whoever currently owns the value can mutate it.
pub(crate) struct Connection {
    pub(crate) conn_id: ConnId,
    pub(crate) origin: Origin,
    pub(crate) driver_state: DriverState,
    pub(crate) request_count: u32,
    pub(crate) created_at: Instant,
    pub(crate) keepalive_deadline: Option<Instant>,
    /// Set once either side negotiates `Connection: close`. Such a connection is removed from
    /// the registry instead of entering RESERVED or IDLE (invariant 6).
    pub(crate) single_use: bool,
    pub(crate) stream: BoxedStream,
    /// Bytes already pulled off `stream` but not yet consumed by the current phase — a
    /// connection reused across several requests may read slightly past a header block in one
    /// read syscall, so the remainder is held here for the next phase or the next exchange.
    pub(crate) read_buffer: Vec<u8>,
}

impl Connection {
    pub(crate) fn new(conn_id: ConnId, origin: Origin, stream: BoxedStream) -> Self {
        Self {
            conn_id,
            origin,
            driver_state: DriverState::Active,
            request_count: 0,
            created_at: Instant::now(),
            keepalive_deadline: None,
            single_use: false,
            stream,
            read_buffer: Vec::new(),
        }
    }

    /// Marks this connection as available again after its response closed, stamping the
    /// deadline by which it must be evicted if left unused.
    pub(crate) fn mark_available(&mut self, keepalive_expiry: Duration) {
        self.driver_state = DriverState::Idle;
        self.keepalive_deadline = Some(Instant::now() + keepalive_expiry);
    }

    pub(crate) fn mark_active(&mut self) {
        self.driver_state = DriverState::Active;
        self.keepalive_deadline = None;
    }

    /// Whether this connection's keep-alive deadline has passed. Checked on `pick_idle` and by
    /// the periodic maintenance sweep; an expired connection is evicted rather than reused.
    pub(crate) fn is_expired(&self) -> bool {
        self.keepalive_deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("conn_id", &self.conn_id)
            .field("origin", &self.origin)
            .field("driver_state", &self.driver_state)
            .field("request_count", &self.request_count)
            .field("single_use", &self.single_use)
            .finish_non_exhaustive()
    }
}
