//! The outbound half of the external interface: what [`crate::pool::Pool::acquire`] returns, and
//! the handle a caller uses to read the body and then give the connection back.

use bytes::Bytes;

use crate::{
    conn::{driver::BodyLength, Connection, ConnId},
    error::{Error, Result},
    event::{self, phase, TraceHook},
    pool::manager::PoolManager,
};

/// A parsed HTTP/1.1 response, returned by [`crate::pool::Pool::acquire`].
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub extensions: ResponseExtensions,
    pub handle: ResponseHandle,
}

/// Out-of-band data about the response, distinct from anything sent on the wire.
pub struct ResponseExtensions {
    /// The connection this response was driven over. Worth remembering: a follow-up request
    /// that supplies this as `RequestExtensions::conn_id` is the sticky-session mechanism
    /// described in the purpose & scope.
    pub conn_id: ConnId,
}

/// The caller's half of the connection while (and after) its response is live.
///
/// Tracks exactly which of the data model's three states (§3) this connection is currently in,
/// from the handle's point of view: still ACTIVE (the handle owns the live [`Connection`]),
/// already RESERVED (the body was consumed and auto-checked-in, only the id is kept), or
/// finished with entirely.
pub struct ResponseHandle {
    state: HandleState,
    manager: PoolManager,
    body_length: BodyLength,
    trace: Option<TraceHook>,
    read_timeout: Option<std::time::Duration>,
    /// Cached once `aread` has successfully drained the body, so repeat calls are idempotent
    /// instead of erroring on a handle that has already moved past ACTIVE.
    body: Option<Bytes>,
    /// If set, `aclose()` performs `release()` immediately afterward, so the net transition for
    /// a caller that never intends to reuse this exact connection is ACTIVE -> IDLE in one call.
    release_on_close: bool,
    /// How many exchanges this physical connection has now driven, including this one. Copied
    /// out of the `Connection` at construction time since the connection itself is handed back
    /// to the pool (and out of the handle's reach) the moment it leaves ACTIVE — see data model
    /// §3 and the testable property that a conn_id-hinted reuse increments this by exactly one.
    request_count: u32,
}

enum HandleState {
    Active(Connection),
    Reserved(ConnId),
    Closed,
}

impl ResponseHandle {
    pub(crate) fn new(
        conn: Connection,
        body_length: BodyLength,
        manager: PoolManager,
        trace: Option<TraceHook>,
        read_timeout: Option<std::time::Duration>,
        release_on_close: bool,
    ) -> Self {
        let request_count = conn.request_count;
        Self {
            state: HandleState::Active(conn),
            manager,
            body_length,
            trace,
            read_timeout,
            body: None,
            release_on_close,
            request_count,
        }
    }

    /// How many exchanges this physical connection has now driven, including the one that
    /// produced this handle. A conn_id-hinted request that reuses a RESERVED connection
    /// increments this by exactly one over the value last reported for that same conn_id
    /// (data model §3, testable property 4).
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    /// Reads the entire response body. Idempotent: once the body has been drained, later calls
    /// return the same cached bytes without touching the connection again. Draining the body
    /// does not by itself end the exchange — per the close policy, that only happens when the
    /// caller calls [`Self::aclose`] or [`Self::release`] (the Rust analogue of the scope exit
    /// that drives an `async with` response context in the source implementation).
    pub async fn aread(&mut self) -> Result<Bytes> {
        if let Some(body) = &self.body {
            return Ok(body.clone());
        }
        if !matches!(self.state, HandleState::Active(_)) {
            return Err(Error::runtime(
                "response body is not available to read in the current handle state",
            ));
        }
        let HandleState::Active(mut conn) = std::mem::replace(&mut self.state, HandleState::Closed) else {
            unreachable!("checked above")
        };

        let read = crate::conn::driver::read_body(&mut conn, self.body_length, self.trace.as_ref());
        let result = match self.read_timeout {
            Some(d) => crate::runtime::timeout(d, read).await.unwrap_or_else(|| {
                Err(Error::io(
                    std::io::Error::from(std::io::ErrorKind::TimedOut),
                    Some(conn.conn_id),
                ))
            }),
            None => read.await,
        };

        match result {
            Ok(bytes) => {
                self.body = Some(bytes.clone());
                // The body is drained but the exchange is not yet closed; put the connection
                // back exactly as it was, still ACTIVE, until the caller explicitly closes.
                self.state = HandleState::Active(conn);
                Ok(bytes)
            }
            Err(e) => {
                // A body read that fails partway through leaves the connection's framing state
                // unknown; it can never be safely reused, so it is force-removed rather than
                // reserved or idled (never RESERVED/IDLE on a non-clean close, per the
                // cancellation rule in the concurrency & resource model).
                self.manager.remove_active();
                Err(e)
            }
        }
    }

    /// ACTIVE -> {RESERVED, removed}, following the negotiated `Connection` header. This is the
    /// close policy from the component design, invoked from [`Self::aclose`].
    fn finish_active(&mut self, conn: Connection) {
        if conn.single_use {
            self.manager.remove_active();
            self.state = HandleState::Closed;
        } else {
            let conn_id = conn.conn_id;
            self.manager.check_in(conn);
            self.state = HandleState::Reserved(conn_id);
        }
    }

    /// Gives the connection back to the pool for reuse, skipping straight to IDLE. Idempotent:
    /// calling it on an already-released or already-closed handle is a no-op.
    ///
    /// Calling this while the body has not yet been fully read is equivalent to calling
    /// [`Self::aclose`] first and then releasing — in practice this always takes the single-hop
    /// ACTIVE -> IDLE path the registry already exposes (`release_active`), which a caller
    /// outside this crate cannot distinguish from two separate hops happening synchronously.
    pub async fn release(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Active(conn) => {
                if conn.single_use {
                    self.manager.remove_active();
                } else {
                    self.manager.release_active(conn);
                }
            }
            HandleState::Reserved(conn_id) => self.manager.release_reserved(conn_id),
            HandleState::Closed => {}
        }
        Ok(())
    }

    /// Closes the underlying body stream and drives the ACTIVE-exit transition: RESERVED if
    /// keep-alive was negotiated, removed outright if `Connection: close` was (the close policy
    /// from the component design). Idempotent — calling it again after the exchange has already
    /// closed (whether by an earlier `aclose`, or because `aread` already ran to completion and
    /// this is simply the caller's scope-exit hook firing) leaves the connection exactly where
    /// it already was rather than discarding a perfectly good RESERVED connection.
    pub async fn aclose(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Active(mut conn) => {
                event::emit(self.trace.as_ref(), phase::RESPONSE_CLOSED_STARTED, event::fields);
                if self.body.is_none() {
                    // The caller closed without ever reading the body: drain whatever is left on
                    // the wire first, exactly as `aread` would, so the close decision below is
                    // made with the connection back in a known, reusable state.
                    match crate::conn::driver::read_body(&mut conn, self.body_length, self.trace.as_ref()).await {
                        Ok(bytes) => self.body = Some(bytes),
                        Err(_) => {
                            // Unread, undrainable body: the framing state is unknown and the
                            // connection can never be safely reused.
                            self.manager.remove_active();
                            event::emit(self.trace.as_ref(), phase::RESPONSE_CLOSED_COMPLETE, event::fields);
                            return Ok(());
                        }
                    }
                }
                self.finish_active(conn);
                if self.release_on_close {
                    if let HandleState::Reserved(conn_id) = std::mem::replace(&mut self.state, HandleState::Closed) {
                        self.manager.release_reserved(conn_id);
                    }
                }
                event::emit(self.trace.as_ref(), phase::RESPONSE_CLOSED_COMPLETE, event::fields);
            }
            HandleState::Reserved(conn_id) => self.state = HandleState::Reserved(conn_id),
            HandleState::Closed => {}
        }
        Ok(())
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        match &self.state {
            // A handle dropped without an explicit `aclose`/`release` while still ACTIVE is
            // treated as cancellation (§5 of the concurrency & resource model): force-removed,
            // never checked in RESERVED or IDLE, since the exchange may have stopped mid-frame.
            // This crate's `Drop` is synchronous, matching the teacher's actual
            // `PooledConnection::drop` rather than the spawned best-effort close an earlier
            // design note suggested (see DESIGN.md) — the underlying socket still closes via its
            // own `Drop` when `conn` goes out of scope here.
            HandleState::Active(_conn) => self.manager.remove_active(),
            // Already RESERVED: `aclose()` made that transition deliberately and the connection
            // lives on in the registry under its own `conn_id`, independent of this handle (§9:
            // "the caller may hold a conn_id indefinitely — it is a weak token, not ownership").
            // Dropping the handle that produced the reservation must not retract it, or the
            // sticky-session pattern this whole crate exists for would break on the very first
            // scope exit that doesn't also call `release()`.
            HandleState::Reserved(_) | HandleState::Closed => {}
        }
    }
}
