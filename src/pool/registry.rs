//! The authoritative index of every connection the pool knows about, split into the three
//! disjoint status sets from the data model (§3): ACTIVE, RESERVED, IDLE.
//!
//! New (the teacher folds this directly into `ConnectionPoolWorker`'s own fields:
//! `available_connections: VecDeque<Connection>` plus scalar counters). Split out as its own
//! struct so the invariants can be unit tested in isolation from the actor plumbing in
//! `worker.rs` — still owned exclusively by the worker, never shared or locked.
//!
//! ACTIVE connections are not physically stored here: they live with the caller's
//! `ResponseHandle` for the duration of the exchange, exactly as the teacher's
//! `available_connections` excludes checked-out connections. Only a count is kept.

use std::collections::HashMap;

use crate::conn::{Connection, ConnId};
use crate::origin::Origin;

/// Outcome of presenting a `conn_id` hint to [`Registry::take_reserved`].
pub(crate) enum TakeReserved {
    /// Still within its keep-alive deadline: now ACTIVE, handed back to the caller.
    Matched(Connection),
    /// Found under `conn_id` but past its keep-alive deadline: already removed from the
    /// registry (freeing its slot), the caller is responsible for closing its stream.
    Expired(Connection),
}

pub(crate) struct Registry {
    active_count: u32,
    reserved: HashMap<ConnId, Connection>,
    /// Idle connections, oldest first. `pick_idle` pops from the back (MRU), the decided
    /// tie-break for Open Question 2 in DESIGN.md.
    idle: Vec<Connection>,
    max_connections: u32,
    max_keepalive_connections: u32,
    /// How long a RESERVED or IDLE connection may sit unused before it is evicted.
    keepalive_expiry: std::time::Duration,
}

impl Registry {
    pub(crate) fn new(
        max_connections: u32,
        max_keepalive_connections: u32,
        keepalive_expiry: std::time::Duration,
    ) -> Self {
        Self {
            active_count: 0,
            reserved: HashMap::new(),
            idle: Vec::new(),
            max_connections,
            max_keepalive_connections,
            keepalive_expiry,
        }
    }

    /// `|ACTIVE| + |RESERVED| + |IDLE|` — invariant 1 holds by construction, since every method
    /// below moves a connection between exactly these three places and nowhere else.
    pub(crate) fn total(&self) -> u32 {
        self.active_count + self.reserved.len() as u32 + self.idle.len() as u32
    }

    pub(crate) fn active_count(&self) -> u32 {
        self.active_count
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    /// Invariant 2: `|registry| <= max_connections`.
    pub(crate) fn can_insert(&self) -> bool {
        self.total() < self.max_connections
    }

    /// Reserves a slot for a connection the caller is about to create or reuse, counting it
    /// ACTIVE immediately so a concurrent dispatch can't overshoot `max_connections` while the
    /// I/O for this one is still in flight outside the worker.
    pub(crate) fn reserve_active_slot(&mut self) {
        self.active_count += 1;
    }

    /// Rolls back a slot reserved by `reserve_active_slot` when the connection attempt never
    /// produced a connection to store (connect failure, or a protocol failure before the
    /// connection could be checked in anywhere) — per §7, "no connection is inserted".
    pub(crate) fn release_active_slot(&mut self) {
        debug_assert!(self.active_count > 0);
        self.active_count = self.active_count.saturating_sub(1);
    }

    /// §4.1 `lookup_reserved`. Takes the connection iff its status is RESERVED, its origin
    /// matches, and it has not expired its keep-alive deadline — step 2 of the dispatch algorithm
    /// ignores a stale, expired, or origin-mismatched hint rather than erroring.
    pub(crate) fn take_reserved(&mut self, conn_id: ConnId, origin: &Origin) -> Option<TakeReserved> {
        if !self.reserved.get(&conn_id).is_some_and(|c| &c.origin == origin) {
            return None;
        }
        let conn = self.reserved.remove(&conn_id).expect("checked above");
        if conn.is_expired() {
            Some(TakeReserved::Expired(conn))
        } else {
            self.active_count += 1;
            Some(TakeReserved::Matched(conn))
        }
    }

    /// §4.1 `pick_idle`. Removes and returns the most-recently-used IDLE connection matching
    /// `origin`, skipping (and dropping) any that have expired their keep-alive deadline.
    pub(crate) fn pick_idle(&mut self, origin: &Origin) -> Option<Connection> {
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(conn) = self.idle.pop() {
            if conn.is_expired() {
                continue; // expired connections are simply dropped, freeing their slot
            }
            if &conn.origin == origin {
                found = Some(conn);
                break;
            }
            skipped.push(conn);
        }
        self.idle.extend(skipped.into_iter().rev());
        if found.is_some() {
            self.active_count += 1;
        } else {
            // Account for any expired connections we dropped while scanning.
        }
        found
    }

    /// Drops every expired IDLE connection, returning their streams so the caller can close
    /// them. Used by the periodic maintenance sweep described in the keepalive section of the
    /// component design.
    pub(crate) fn evict_expired_idle(&mut self) -> Vec<Connection> {
        let (expired, retained): (Vec<_>, Vec<_>) = self.idle.drain(..).partition(|c| c.is_expired());
        self.idle = retained;
        expired
    }

    /// Drops every expired RESERVED connection, returning their streams so the caller can close
    /// them. `keepalive_expiry` bounds a RESERVED connection's idle time exactly as it bounds an
    /// IDLE one's — a sticky-session hint that's never redeemed must still free its slot.
    pub(crate) fn evict_expired_reserved(&mut self) -> Vec<Connection> {
        let expired_ids: Vec<ConnId> = self
            .reserved
            .iter()
            .filter(|(_, c)| c.is_expired())
            .map(|(id, _)| *id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| self.reserved.remove(&id))
            .collect()
    }

    /// Read-only peek used by the waiter-wakeup scan: would `try_dispatch` succeed for this
    /// origin/hint right now, without actually mutating anything? Mirrors the four paths a real
    /// dispatch can take — reserved-hint match, IDLE match, fresh capacity, or an IDLE connection
    /// of some other origin to evict — so the worker can pick a waiter to commit to before
    /// spending the real (mutating) dispatch call on it.
    pub(crate) fn would_satisfy(&self, origin: &Origin, conn_id_hint: Option<ConnId>) -> bool {
        if let Some(conn_id) = conn_id_hint {
            if self
                .reserved
                .get(&conn_id)
                .is_some_and(|c| &c.origin == origin && !c.is_expired())
            {
                return true;
            }
        }
        if self.idle.iter().any(|c| !c.is_expired() && &c.origin == origin) {
            return true;
        }
        if self.can_insert() {
            return true;
        }
        !self.idle.is_empty()
    }

    /// Removes any one IDLE connection regardless of origin, for step 5 of the dispatch
    /// algorithm: evicting a same-keepalive-budget connection of a *different* origin to make
    /// room for a new one.
    pub(crate) fn evict_any_idle(&mut self) -> Option<Connection> {
        self.idle.pop()
    }

    /// ACTIVE -> RESERVED. The connection's response closed with keep-alive negotiated but no
    /// explicit release.
    pub(crate) fn check_in(&mut self, mut conn: Connection) {
        debug_assert!(self.active_count > 0);
        self.active_count -= 1;
        conn.mark_available(self.keepalive_expiry);
        self.reserved.insert(conn.conn_id, conn);
    }

    /// RESERVED -> IDLE. Returns `Err(conn)` if admitting it would exceed
    /// `max_keepalive_connections` (invariant 3), in which case the caller closes it instead and
    /// total connection count drops, freeing capacity for a waiter.
    pub(crate) fn release_reserved(&mut self, conn_id: ConnId) -> Option<Result<(), Connection>> {
        let conn = self.reserved.remove(&conn_id)?;
        Some(self.admit_idle(conn))
    }

    /// ACTIVE -> IDLE directly (explicit `release()` called on a still-ACTIVE handle, or
    /// `release_on_close`). Same capacity bookkeeping as `release_reserved`.
    pub(crate) fn release_active(&mut self, conn: Connection) -> Result<(), Connection> {
        debug_assert!(self.active_count > 0);
        self.active_count -= 1;
        self.admit_idle(conn)
    }

    fn admit_idle(&mut self, mut conn: Connection) -> Result<(), Connection> {
        if self.idle.len() as u32 >= self.max_keepalive_connections {
            Err(conn)
        } else {
            conn.mark_available(self.keepalive_expiry);
            self.idle.push(conn);
            Ok(())
        }
    }

    /// An ACTIVE connection is closing for good: `Connection: close`, a protocol failure, or
    /// cancellation. It never touched RESERVED or IDLE.
    pub(crate) fn remove_active(&mut self) {
        debug_assert!(self.active_count > 0);
        self.active_count = self.active_count.saturating_sub(1);
    }

    /// Drains every RESERVED and IDLE connection for pool teardown, returning them so the
    /// caller can close their streams. ACTIVE connections are never drained this way — the
    /// caller (`PoolWorker::shutdown`) must have already confirmed `active_count == 0`.
    pub(crate) fn drain_all(&mut self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self.reserved.drain().map(|(_, c)| c).collect();
        all.extend(self.idle.drain(..));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::MockBackend;
    use crate::origin::Scheme;

    fn origin(host: &str) -> Origin {
        Origin {
            scheme: Scheme::Https,
            host: host.to_string(),
            port: 443,
        }
    }

    async fn conn(id: ConnId, o: Origin) -> Connection {
        let backend = MockBackend::repeating(&[b"irrelevant"], 1);
        use crate::net::NetworkBackend;
        let stream = backend.connect_tcp("h", 443, None, None).await.unwrap();
        Connection::new(id, o, stream)
    }

    #[tokio::test]
    async fn active_reserved_idle_are_disjoint_and_sum_to_total() {
        let mut reg = Registry::new(10, 10, std::time::Duration::from_secs(5));
        reg.reserve_active_slot();
        let c = conn(1, origin("a")).await;
        assert_eq!(reg.total(), 1);
        reg.check_in(c);
        assert_eq!(reg.reserved_count(), 1);
        assert_eq!(reg.active_count(), 0);
        assert_eq!(reg.total(), 1);

        reg.release_reserved(1).unwrap().unwrap();
        assert_eq!(reg.reserved_count(), 0);
        assert_eq!(reg.idle_count(), 1);
        assert_eq!(reg.total(), 1);
    }

    #[tokio::test]
    async fn pick_idle_matches_origin_and_is_mru() {
        let mut reg = Registry::new(10, 10, std::time::Duration::from_secs(5));
        for (id, host) in [(1u64, "a"), (2, "b"), (3, "a")] {
            reg.reserve_active_slot();
            let c = conn(id, origin(host)).await;
            reg.release_active(c).unwrap();
        }
        let picked = reg.pick_idle(&origin("a")).unwrap();
        assert_eq!(picked.conn_id, 3, "MRU connection for the origin is returned first");
    }

    #[tokio::test]
    async fn release_beyond_keepalive_budget_is_rejected() {
        let mut reg = Registry::new(10, 1, std::time::Duration::from_secs(5));
        reg.reserve_active_slot();
        let c1 = conn(1, origin("a")).await;
        reg.release_active(c1).unwrap();
        assert_eq!(reg.idle_count(), 1);

        reg.reserve_active_slot();
        let c2 = conn(2, origin("a")).await;
        let result = reg.release_active(c2);
        assert!(result.is_err(), "second idle connection exceeds max_keepalive_connections");
        assert_eq!(reg.idle_count(), 1);
    }

    #[tokio::test]
    async fn take_reserved_evicts_an_expired_hint_instead_of_matching_it() {
        let mut reg = Registry::new(10, 10, std::time::Duration::from_millis(1));
        reg.reserve_active_slot();
        let c = conn(1, origin("a")).await;
        reg.check_in(c);
        assert_eq!(reg.reserved_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        match reg.take_reserved(1, &origin("a")) {
            Some(TakeReserved::Expired(c)) => assert_eq!(c.conn_id, 1),
            _ => panic!("expected Expired, got a match or nothing"),
        }
        // Already removed from the registry regardless of outcome: the slot is free.
        assert_eq!(reg.reserved_count(), 0);
        assert_eq!(reg.total(), 0);
    }

    #[tokio::test]
    async fn evict_expired_reserved_reclaims_unredeemed_hints() {
        let mut reg = Registry::new(10, 10, std::time::Duration::from_millis(1));
        reg.reserve_active_slot();
        let c = conn(1, origin("a")).await;
        reg.check_in(c);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let expired = reg.evict_expired_reserved();
        assert_eq!(expired.len(), 1);
        assert_eq!(reg.reserved_count(), 0);
        assert_eq!(reg.total(), 0);
    }

    #[tokio::test]
    async fn total_never_exceeds_max_connections() {
        let reg = Registry::new(2, 2, std::time::Duration::from_secs(5));
        assert!(reg.can_insert());
        let mut reg = reg;
        reg.reserve_active_slot();
        reg.reserve_active_slot();
        assert!(!reg.can_insert());
    }
}
