//! The check-in/release side of the dispatcher's channel pair, grounded on `cmap/manager.rs`'s
//! `PoolManager`: fire-and-forget notifications the caller sends once it is done driving a
//! connection, plus the one request-reply exception, `Shutdown`, whose caller needs to know
//! whether the close actually happened.

use tokio::sync::{mpsc, oneshot};

use crate::{
    conn::{Connection, ConnId},
    error::Result,
};

pub(crate) enum ManagementRequest {
    /// ACTIVE -> RESERVED: the response closed with keep-alive negotiated and no explicit
    /// release.
    CheckIn(Connection),

    /// RESERVED -> IDLE: an explicit `release()` call on a handle that had already checked in.
    ReleaseReserved(ConnId),

    /// ACTIVE -> IDLE directly: `release()` called on a still-ACTIVE handle, or
    /// `release_on_close`.
    ReleaseActive(Connection),

    /// The ACTIVE connection is gone for good (`Connection: close`, a protocol failure, or
    /// cancellation) and never touched RESERVED or IDLE.
    RemoveActive,

    /// A slot reserved by `reserve_active_slot` for a `Create` outcome was never turned into a
    /// connection — dialing the origin itself failed.
    CreateFailed,

    /// A queued waiter gave up (its own `timeout.pool` elapsed, or its future was dropped) and
    /// should be removed from the FIFO queue rather than woken later.
    CancelWait(u64),

    /// `Pool::close` was called explicitly; reply with whether it succeeded.
    Shutdown(oneshot::Sender<Result<()>>),
}

pub(crate) fn channel() -> (PoolManager, ManagementReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (PoolManager { sender }, ManagementReceiver { receiver })
}

#[derive(Clone)]
pub(crate) struct PoolManager {
    sender: mpsc::UnboundedSender<ManagementRequest>,
}

impl PoolManager {
    /// Every fire-and-forget send is best-effort: if the worker has already torn down, there is
    /// nothing left for it to do with this notification anyway.
    fn send(&self, req: ManagementRequest) {
        let _ = self.sender.send(req);
    }

    pub(crate) fn check_in(&self, conn: Connection) {
        self.send(ManagementRequest::CheckIn(conn));
    }

    pub(crate) fn release_reserved(&self, conn_id: ConnId) {
        self.send(ManagementRequest::ReleaseReserved(conn_id));
    }

    pub(crate) fn release_active(&self, conn: Connection) {
        self.send(ManagementRequest::ReleaseActive(conn));
    }

    pub(crate) fn remove_active(&self) {
        self.send(ManagementRequest::RemoveActive);
    }

    pub(crate) fn create_failed(&self) {
        self.send(ManagementRequest::CreateFailed);
    }

    pub(crate) fn cancel_wait(&self, waiter_id: u64) {
        self.send(ManagementRequest::CancelWait(waiter_id));
    }

    /// Requests that the worker close the pool. If the worker is already gone, treat the pool as
    /// already closed rather than erroring — there is no state left to reject the request.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(ManagementRequest::Shutdown(reply)).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

pub(crate) struct ManagementReceiver {
    receiver: mpsc::UnboundedReceiver<ManagementRequest>,
}

impl ManagementReceiver {
    pub(crate) async fn recv(&mut self) -> Option<ManagementRequest> {
        self.receiver.recv().await
    }
}
