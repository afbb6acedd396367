//! Handle/listener pair used to keep the pool worker task alive exactly as long as some
//! caller still holds a handle to the pool.

use tokio::sync::mpsc;

/// Handle to the pool worker. Once every clone of this handle has been dropped, the worker
/// stops waiting for new requests and begins tearing itself down.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    _sender: mpsc::Sender<()>,
}

/// Listener side, polled by the worker to learn when it has no more referents.
#[derive(Debug)]
pub(crate) struct WorkerHandleListener {
    receiver: mpsc::Receiver<()>,
}

impl WorkerHandleListener {
    /// Resolves once every [`WorkerHandle`] for this channel has been dropped. Only meant to be
    /// polled from within a `select!`, since it never resolves while handles remain live.
    pub(crate) async fn wait_for_all_handle_drops(&mut self) {
        self.receiver.recv().await;
    }

    /// Constructs a new handle/listener pair.
    pub(crate) fn channel() -> (WorkerHandle, WorkerHandleListener) {
        let (sender, receiver) = mpsc::channel(1);
        (WorkerHandle { _sender: sender }, WorkerHandleListener { receiver })
    }
}
