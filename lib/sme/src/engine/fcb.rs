// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow control block: everything the engine knows about one
//! connection.
//!
//! Exactly one block exists per active 5-tuple; both directions of a
//! connection resolve to the same block through the canonical key.
//! The block's state sits behind a short-held mutex: the two
//! directions may be pinned to different workers, and the egress side
//! reads the opposite direction's sequence map for ACK translation.

use super::flow_table::Dump;
use super::flow_table::FlowTable;
use super::flow_table::Ttl;
use super::packet::FlowId;
use super::reorder::ReorderState;
use super::seq_map::SeqMap;
use super::tcp::TcpState;
use super::tcp_state::TcpFlowState;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::time::Moment;
use core::num::NonZeroU32;
use core::time::Duration;
use serde::Deserialize;
use serde::Serialize;
use sme_api::Direction;
use sme_api::SmeError;
use std::sync::Arc;

/// How long a half-closed flow may linger before the reaper takes it.
pub const FCB_CLOSING_TIMEOUT_SECS: u64 = 60;

/// The per-flow state proper. Always accessed under the owning
/// [`FcbEntry`]'s lock.
#[derive(Debug, Default)]
pub struct Fcb {
    /// One sequence map per direction, indexed by
    /// [`Direction::idx`].
    pub maintainers: [SeqMap; 2],

    /// Per-direction reorder state. The hold-list nodes themselves
    /// live in the owning worker's pool.
    pub reorder: [ReorderState; 2],

    pub tcp: TcpFlowState,

    /// When set, the flow is half closed and will be reaped once this
    /// moment passes.
    pub closing_deadline: Option<Moment>,
}

impl Fcb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maintainer(&self, dir: Direction) -> &SeqMap {
        &self.maintainers[dir.idx()]
    }

    pub fn maintainer_mut(&mut self, dir: Direction) -> &mut SeqMap {
        &mut self.maintainers[dir.idx()]
    }

    /// Start the half-closed clock, if it is not already running.
    pub fn schedule_reap(&mut self, now: Moment) {
        if self.closing_deadline.is_none() {
            self.closing_deadline =
                Some(now + Duration::from_secs(FCB_CLOSING_TIMEOUT_SECS));
        }
    }

    /// A block is reapable once both directions closed, or once its
    /// half-closed deadline has lapsed.
    pub fn should_reap(&self, now: Moment) -> bool {
        if self.tcp.is_closed() {
            return true;
        }

        matches!(self.closing_deadline, Some(deadline) if now >= deadline)
    }
}

/// The external view of one flow control block.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FcbDump {
    pub tcp_state: TcpState,
    pub hits: u64,
    pub map_entries: [usize; 2],
    pub held_segments: [usize; 2],
    pub closing: bool,
}

/// One table slot: the lock plus the state it guards.
#[derive(Debug)]
pub struct FcbEntry {
    state: KMutex<Fcb>,
}

impl FcbEntry {
    fn new() -> Self {
        Self { state: KMutex::new(Fcb::new()) }
    }

    /// Take the per-flow lock. Held only across a single packet's
    /// bookkeeping, never across I/O.
    pub fn lock(&self) -> KMutexGuard<Fcb> {
        self.state.lock()
    }
}

impl Dump for Arc<FcbEntry> {
    type DumpVal = FcbDump;

    fn dump(&self, hits: u64) -> FcbDump {
        let fcb = self.lock();
        FcbDump {
            tcp_state: fcb.tcp.tcp_state(),
            hits,
            map_entries: [
                fcb.maintainers[0].num_entries(),
                fcb.maintainers[1].num_entries(),
            ],
            held_segments: [fcb.reorder[0].held(), fcb.reorder[1].held()],
            closing: fcb.closing_deadline.is_some(),
        }
    }
}

/// The table mapping canonical flow keys to control blocks.
#[derive(Debug)]
pub struct FcbTable {
    table: FlowTable<Arc<FcbEntry>>,
}

impl FcbTable {
    pub fn new(name: &str, limit: NonZeroU32, ttl: Option<Ttl>) -> Self {
        Self { table: FlowTable::new(name, limit, ttl) }
    }

    /// The canonical key for a 5-tuple, plus which direction the
    /// given orientation of the tuple represents. The lesser of the
    /// tuple and its mirror is canonical, so both directions land on
    /// one entry.
    pub fn canonical(flow: &FlowId) -> (FlowId, Direction) {
        let mirror = flow.mirror();
        if *flow <= mirror {
            (*flow, Direction::Fwd)
        } else {
            (mirror, Direction::Rev)
        }
    }

    /// Look up the block for `flow`, creating it on first sight.
    ///
    /// A full table evicts its coldest reapable entry to make room;
    /// if every flow is live the lookup fails and the caller drops
    /// the packet.
    pub fn lookup_or_create(
        &mut self,
        flow: &FlowId,
        now: Moment,
    ) -> Result<(Arc<FcbEntry>, Direction), SmeError> {
        let (key, dir) = Self::canonical(flow);

        if let Some(entry) = self.table.get_mut(&key) {
            entry.hit();
            return Ok((Arc::clone(entry.state()), dir));
        }

        let fcb = Arc::new(FcbEntry::new());
        self.table.add_or_evict(key, Arc::clone(&fcb), |entry| {
            entry.lock().should_reap(now)
        })?;

        Ok((fcb, dir))
    }

    pub fn lookup(&self, flow: &FlowId) -> Option<(Arc<FcbEntry>, Direction)> {
        let (key, dir) = Self::canonical(flow);
        self.table
            .get(&key)
            .map(|entry| (Arc::clone(entry.state()), dir))
    }

    /// Remove every block that is reapable or idle past its TTL,
    /// returning them so the caller can release pooled resources
    /// (held segments) they still reference.
    pub fn reap(&mut self, now: Moment) -> Vec<(FlowId, Arc<FcbEntry>)> {
        let ttl = self.table.ttl();
        let mut dead = Vec::new();

        self.table.retain(|id, entry| {
            if entry.state().lock().should_reap(now)
                || ttl.is_expired(*entry.last_hit(), now)
            {
                dead.push((*id, Arc::clone(entry.state())));
                return false;
            }
            true
        });

        dead
    }

    pub fn num_flows(&self) -> u32 {
        self.table.num_flows()
    }

    pub fn clear(&mut self) {
        self.table.clear()
    }

    pub fn dump(&self) -> Vec<(FlowId, FcbDump)> {
        self.table.dump()
    }
}
