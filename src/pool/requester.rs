//! The checkout side of the dispatcher's channel pair, grounded directly on
//! `cmap/connection_requester.rs`: a cheap-to-clone handle that keeps the worker task alive
//! (via [`crate::runtime::WorkerHandle`]) and an unbounded `mpsc` used to submit one-shot
//! checkout requests.

use tokio::sync::{mpsc, oneshot};

use crate::{
    conn::{Connection, ConnId},
    error::Error,
    origin::Origin,
    runtime::WorkerHandle,
};

/// What the worker hands back immediately in response to a [`CheckoutRequest`].
pub(crate) enum CheckoutResult {
    /// An already-established connection (from a reserved-hint match or an IDLE reuse), already
    /// counted ACTIVE. The caller drives the exchange on it directly.
    Reuse(Connection),

    /// A fresh slot: the caller must dial `origin` itself (with the pool mutex conceptually
    /// released, since the worker has already moved on), then report back via
    /// [`super::manager::PoolManager`].
    Create { conn_id: ConnId, origin: Origin },

    /// No capacity right now; the caller waits on `receiver`, which the worker fulfills once a
    /// connection becomes available or the waiter is cancelled.
    Queued {
        waiter_id: u64,
        receiver: oneshot::Receiver<QueuedOutcome>,
    },
}

/// What a queued waiter is eventually woken with.
pub(crate) enum QueuedOutcome {
    Reuse(Connection),
    Create { conn_id: ConnId, origin: Origin },
    /// The pool was closed while this waiter was still queued.
    Closed,
}

pub(crate) struct CheckoutRequest {
    pub(crate) origin: Origin,
    pub(crate) conn_id_hint: Option<ConnId>,
    pub(crate) reply: oneshot::Sender<CheckoutResult>,
}

/// Returns a new requester/receiver pair. Once every clone of the requester is dropped, the
/// worker observes its `handle_listener` resolve and begins tearing down.
pub(crate) fn channel(handle: WorkerHandle) -> (Requester, RequestReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Requester { sender, _handle: handle }, RequestReceiver { receiver })
}

#[derive(Clone)]
pub(crate) struct Requester {
    sender: mpsc::UnboundedSender<CheckoutRequest>,
    _handle: WorkerHandle,
}

impl Requester {
    /// Submits a checkout request and returns the worker's immediate answer. If the pool has
    /// already shut down (the receiver end dropped), returns a `RuntimeError` describing the
    /// pool as closed rather than panicking — unlike the teacher, whose `ConnectionRequester`
    /// can rely on its own `WorkerHandle` to guarantee the worker is still alive, this crate's
    /// explicit `Pool::close` can race an in-flight `acquire` that has yet to send its request.
    pub(crate) async fn checkout(
        &self,
        origin: Origin,
        conn_id_hint: Option<ConnId>,
    ) -> Result<CheckoutResult, Error> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(CheckoutRequest {
                origin,
                conn_id_hint,
                reply,
            })
            .map_err(|_| Error::runtime("pool is closed"))?;
        rx.await.map_err(|_| Error::runtime("pool is closed"))
    }
}

pub(crate) struct RequestReceiver {
    receiver: mpsc::UnboundedReceiver<CheckoutRequest>,
}

impl RequestReceiver {
    pub(crate) async fn recv(&mut self) -> Option<CheckoutRequest> {
        self.receiver.recv().await
    }
}
