//! `PoolWorker`: the single task that owns the [`Registry`] and the FIFO waiter queue, grounded
//! on `cmap/worker.rs`'s `ConnectionPoolWorker` execute loop. Because every mutation of pool
//! state happens inside this one task, no mutex is needed anywhere else in the crate — exactly
//! the concurrency model described in the component design's dispatcher section.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{
    manager::{self, ManagementRequest, PoolManager},
    registry::{Registry, TakeReserved},
    requester::{self, CheckoutRequest, CheckoutResult, QueuedOutcome, Requester},
};
use crate::{
    conn::{Connection, ConnId},
    error::Error,
    net::NetworkBackend,
    options::ValidatedOptions,
    origin::Origin,
    runtime::WorkerHandleListener,
};

/// How often the worker sweeps the IDLE set for connections past their keep-alive deadline, so
/// that an idle pool with no further traffic still reclaims expired connections instead of
/// waiting for the next `acquire` to stumble over them in `pick_idle`.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// An immediate answer to a checkout, before it is wrapped for the caller as either a
/// [`CheckoutResult`] or a [`QueuedOutcome`].
enum DispatchOutcome {
    Reuse(Connection),
    Create { conn_id: ConnId, origin: Origin },
}

struct Waiter {
    id: u64,
    origin: Origin,
    conn_id_hint: Option<ConnId>,
    reply: tokio::sync::oneshot::Sender<QueuedOutcome>,
}

pub(crate) struct PoolWorker {
    registry: Registry,
    requests: requester::RequestReceiver,
    management: manager::ManagementReceiver,
    handle_listener: WorkerHandleListener,
    waiters: VecDeque<Waiter>,
    next_conn_id: ConnId,
    next_waiter_id: u64,
}

impl PoolWorker {
    /// Builds the worker and its two channel handles, then spawns the worker's execute loop on
    /// the current runtime. Mirrors `ConnectionPoolWorker::start`.
    pub(crate) fn spawn(options: ValidatedOptions) -> (Requester, PoolManager, Arc<dyn NetworkBackend>, bool) {
        let (worker_handle, handle_listener) = WorkerHandleListener::channel();
        let (checkout_requester, request_receiver) = requester::channel(worker_handle);
        let (manager, management_receiver) = manager::channel();

        let backend = options.network_backend.clone();
        let http2 = options.http2;

        let worker = PoolWorker {
            registry: Registry::new(
                options.max_connections,
                options.max_keepalive_connections,
                options.keepalive_expiry,
            ),
            requests: request_receiver,
            management: management_receiver,
            handle_listener,
            waiters: VecDeque::new(),
            next_conn_id: 0,
            next_waiter_id: 0,
        };

        crate::runtime::spawn(worker.run());
        (checkout_requester, manager, backend, http2)
    }

    async fn run(mut self) {
        let mut maintenance = tokio::time::interval(MAINTENANCE_INTERVAL);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.handle_listener.wait_for_all_handle_drops() => {
                    self.teardown().await;
                    return;
                }

                Some(req) = self.management.recv() => {
                    if self.handle_management(req).await {
                        return;
                    }
                }

                Some(req) = self.requests.recv() => {
                    self.handle_checkout(req);
                }

                _ = maintenance.tick() => {
                    self.sweep_expired();
                }

                else => return,
            }
        }
    }

    fn next_conn_id(&mut self) -> ConnId {
        self.next_conn_id += 1;
        self.next_conn_id
    }

    /// §4.2 dispatch algorithm, steps 2-5: a reserved-hint match, then an IDLE match, then new
    /// capacity, then evicting an IDLE connection of a different origin to make room. Returns
    /// `None` only when none of those apply, i.e. the caller must wait (step 6).
    fn try_dispatch(&mut self, origin: &Origin, conn_id_hint: Option<ConnId>) -> Option<DispatchOutcome> {
        if let Some(conn_id) = conn_id_hint {
            match self.registry.take_reserved(conn_id, origin) {
                Some(TakeReserved::Matched(mut conn)) => {
                    conn.mark_active();
                    return Some(DispatchOutcome::Reuse(conn));
                }
                Some(TakeReserved::Expired(conn)) => {
                    // Already removed from the registry, freeing its slot: close it and fall
                    // through to the remaining dispatch steps as if the hint had been absent.
                    crate::runtime::spawn(close_stream(conn));
                }
                None => {}
            }
        }

        if let Some(mut conn) = self.registry.pick_idle(origin) {
            conn.mark_active();
            return Some(DispatchOutcome::Reuse(conn));
        }

        if self.registry.can_insert() {
            self.registry.reserve_active_slot();
            return Some(DispatchOutcome::Create {
                conn_id: self.next_conn_id(),
                origin: origin.clone(),
            });
        }

        if let Some(evicted) = self.registry.evict_any_idle() {
            crate::runtime::spawn(close_stream(evicted));
            self.registry.reserve_active_slot();
            return Some(DispatchOutcome::Create {
                conn_id: self.next_conn_id(),
                origin: origin.clone(),
            });
        }

        None
    }

    fn handle_checkout(&mut self, req: CheckoutRequest) {
        let CheckoutRequest {
            origin,
            conn_id_hint,
            reply,
        } = req;

        match self.try_dispatch(&origin, conn_id_hint) {
            Some(DispatchOutcome::Reuse(conn)) => {
                let _ = reply.send(CheckoutResult::Reuse(conn));
            }
            Some(DispatchOutcome::Create { conn_id, origin }) => {
                let _ = reply.send(CheckoutResult::Create { conn_id, origin });
            }
            None => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                let waiter_id = self.next_waiter_id;
                self.next_waiter_id += 1;
                self.waiters.push_back(Waiter {
                    id: waiter_id,
                    origin,
                    conn_id_hint,
                    reply: tx,
                });
                let _ = reply.send(CheckoutResult::Queued {
                    waiter_id,
                    receiver: rx,
                });
            }
        }
    }

    /// Wakes the first waiter (FIFO order) for which capacity now exists or whose origin now has
    /// an IDLE match — not strictly the waiter at position 0 — per the dispatcher's wakeup rule.
    /// Called after every registry transition that can free capacity.
    fn try_wake_one_waiter(&mut self) {
        let mut candidate = None;
        for (i, w) in self.waiters.iter().enumerate() {
            if self.registry.would_satisfy(&w.origin, w.conn_id_hint) {
                candidate = Some(i);
                break;
            }
        }
        let Some(i) = candidate else { return };
        let waiter = self.waiters.remove(i).expect("index just found");

        match self.try_dispatch(&waiter.origin, waiter.conn_id_hint) {
            Some(DispatchOutcome::Reuse(conn)) => {
                let _ = waiter.reply.send(QueuedOutcome::Reuse(conn));
            }
            Some(DispatchOutcome::Create { conn_id, origin }) => {
                let _ = waiter.reply.send(QueuedOutcome::Create { conn_id, origin });
            }
            None => {
                // The optimistic check above and the real dispatch disagreed — extremely
                // unlikely since both run on this single task with nothing interleaved between
                // them, but if it ever happens, put the waiter back rather than lose it.
                self.waiters.push_front(waiter);
            }
        }
    }

    async fn handle_management(&mut self, req: ManagementRequest) -> bool {
        match req {
            ManagementRequest::CheckIn(conn) => {
                self.registry.check_in(conn);
                self.try_wake_one_waiter();
            }
            ManagementRequest::ReleaseReserved(conn_id) => {
                if let Some(result) = self.registry.release_reserved(conn_id) {
                    if let Err(conn) = result {
                        crate::runtime::spawn(close_stream(conn));
                    }
                    self.try_wake_one_waiter();
                }
            }
            ManagementRequest::ReleaseActive(conn) => {
                if let Err(conn) = self.registry.release_active(conn) {
                    crate::runtime::spawn(close_stream(conn));
                }
                self.try_wake_one_waiter();
            }
            ManagementRequest::RemoveActive => {
                self.registry.remove_active();
                self.try_wake_one_waiter();
            }
            ManagementRequest::CreateFailed => {
                self.registry.release_active_slot();
                self.try_wake_one_waiter();
            }
            ManagementRequest::CancelWait(id) => {
                self.waiters.retain(|w| w.id != id);
            }
            ManagementRequest::Shutdown(reply) => {
                return self.handle_shutdown(reply).await;
            }
        }
        false
    }

    /// Explicit `Pool::close`: rejected outright while any connection is ACTIVE (§4.6), since a
    /// caller is still mid-exchange on it and has no way to be told to stop. Otherwise every
    /// RESERVED and IDLE connection is closed and every queued waiter is failed.
    async fn handle_shutdown(&mut self, reply: tokio::sync::oneshot::Sender<crate::error::Result<()>>) -> bool {
        if self.registry.active_count() > 0 {
            let _ = reply.send(Err(Error::runtime(
                "cannot close the pool while connections are active",
            )));
            return false;
        }

        let conns = self.registry.drain_all();
        debug!(count = conns.len(), "closing pool: draining reserved and idle connections");
        futures_util::future::join_all(conns.into_iter().map(close_stream)).await;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(QueuedOutcome::Closed);
        }

        let _ = reply.send(Ok(()));
        true
    }

    /// Implicit teardown: every [`Requester`] handle has been dropped (i.e. every public `Pool`
    /// handle is gone). Unlike explicit `close()`, this never rejects — there is no caller left
    /// to reject to — it just closes what it can.
    async fn teardown(&mut self) {
        let conns = self.registry.drain_all();
        futures_util::future::join_all(conns.into_iter().map(close_stream)).await;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(QueuedOutcome::Closed);
        }
    }

    /// Reclaims any IDLE or RESERVED connection past its keep-alive deadline — §3's "removal
    /// occurs on ... keepalive expiry" applies to both, not just IDLE, since a sticky-session
    /// hint that's never redeemed would otherwise pin a slot forever.
    fn sweep_expired(&mut self) {
        let mut expired = self.registry.evict_expired_idle();
        expired.extend(self.registry.evict_expired_reserved());
        if expired.is_empty() {
            return;
        }
        let freed = expired.len();
        for conn in expired {
            crate::runtime::spawn(close_stream(conn));
        }
        // Each eviction frees at most one slot, same as every other capacity-freeing call site —
        // unlike those, a single sweep can free several at once, so wake once per freed slot
        // rather than leaving the rest of a satisfiable queue parked until the next tick.
        for _ in 0..freed {
            self.try_wake_one_waiter();
        }
    }
}

async fn close_stream(mut conn: Connection) {
    let _ = conn.stream.shutdown().await;
}
