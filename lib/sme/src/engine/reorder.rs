// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Per-direction TCP reordering.
//!
//! Out-of-order segments are parked on a hold list (pooled nodes
//! sorted by sequence number) until the contiguous prefix can be
//! released. The list is bounded: a direction never holds more than
//! [`TCP_REORDER_POOL_SIZE`] segments, and recovery from loss is the
//! sender's retransmission, never ours.

use super::element::config_err;
use super::element::Args;
use super::element::Element;
use super::element::PacketBatch;
use super::element::WorkerCtx;
use super::element::PORTS_1_1X2;
use super::fcb::FcbTable;
use super::packet::FlowId;
use super::packet::Packet;
use super::packet::Parsed;
use super::pool::MemoryPool;
use super::pool::SlotId;
use super::tcp::seq_gt;
use super::tcp::seq_leq;
use super::tcp::seq_lt;
use crate::ddi::sync::KMutex;
use sme_api::Direction;
use sme_api::SmeError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hold-list capacity per direction.
pub const TCP_REORDER_POOL_SIZE: usize = 20;

/// A held out-of-order segment.
#[derive(Debug)]
pub struct HoldNode {
    pkt: Packet<Parsed>,
    seq: u32,
    /// Sequence numbers the segment occupies (payload + SYN/FIN).
    span: u32,
    /// Arrival stamp, for oldest-first eviction on overflow.
    age: u64,
    next: Option<SlotId>,
}

/// The reorder state of one flow direction.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReorderState {
    head: Option<SlotId>,
    held: usize,
    expected_seq: Option<u32>,
    next_age: u64,
}

impl ReorderState {
    pub fn expected_seq(&self) -> Option<u32> {
        self.expected_seq
    }

    pub fn held(&self) -> usize {
        self.held
    }

    /// Drop every held segment, returning its node to the pool.
    pub fn flush(&mut self, pool: &mut MemoryPool<HoldNode>) -> usize {
        let mut freed = 0;
        let mut cur = self.head;
        while let Some(id) = cur {
            cur = pool.release(id).next;
            freed += 1;
        }
        self.head = None;
        self.held = 0;
        freed
    }
}

/// Why the reorderer dropped an input segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReorderDrop {
    /// The segment's whole span was already released.
    Retransmission,
    /// An identical segment is already held.
    Duplicate,
    /// The node pool could not supply a slot.
    Exhausted,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReorderCounters {
    pub retransmissions: u64,
    pub duplicates: u64,
    pub overflows: u64,
    pub exhausted: u64,
}

/// The per-direction reordering engine.
///
/// `merge_sort` selects the batch placement strategy: each segment of
/// a batch is prepended in O(1) and the list sorted once, instead of
/// one ordered insertion per segment.
#[derive(Debug)]
pub struct TcpReorder {
    direction: Direction,
    merge_sort: bool,
    table: Option<Arc<KMutex<FcbTable>>>,
    pub counters: ReorderCounters,
}

impl TcpReorder {
    pub fn new(merge_sort: bool) -> Self {
        Self {
            direction: Direction::Fwd,
            merge_sort,
            table: None,
            counters: ReorderCounters::default(),
        }
    }

    /// Wire the element form: reorder state is found through the
    /// flow table.
    pub fn with_table(table: Arc<KMutex<FcbTable>>) -> Self {
        Self { table: Some(table), ..Self::new(true) }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run one segment through the reorderer. Released segments are
    /// pushed onto `out` in sequence order; the return value reports
    /// whether (and why) the input segment was dropped instead.
    pub fn process(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
        pkt: Packet<Parsed>,
        out: &mut Vec<Packet<Parsed>>,
    ) -> Option<ReorderDrop> {
        let seq = pkt.tcp_hdr().seq();
        let span = seq_span(&pkt);

        self.check_first_packet(st, seq);

        if self.check_retransmission(st, seq, span) {
            self.counters.retransmissions += 1;
            return Some(ReorderDrop::Retransmission);
        }

        // An immediately eligible segment (at or overlapping the
        // release point) never touches the hold list.
        let expected = st.expected_seq.unwrap_or(seq);
        if seq_leq(seq, expected) {
            let end = seq.wrapping_add(span);
            if seq_gt(end, expected) {
                st.expected_seq = Some(end);
            }
            out.push(pkt);
            self.send_eligible_packets(st, pool, out);
            return None;
        }

        let res = self.put_packet_in_list(st, pool, pkt, seq, span);
        self.send_eligible_packets(st, pool, out);
        res
    }

    /// Run a batch through the reorderer. With `merge_sort` the
    /// placement cost is one sort per batch rather than one ordered
    /// insert per segment.
    pub fn process_batch(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
        batch: Vec<Packet<Parsed>>,
        out: &mut Vec<Packet<Parsed>>,
    ) {
        if !self.merge_sort {
            for pkt in batch {
                let _ = self.process(st, pool, pkt, out);
            }
            return;
        }

        // An unanchored direction anchors at the batch's earliest
        // segment, not at whichever arrived first in the burst.
        if st.expected_seq.is_none() {
            let anchor = batch
                .iter()
                .map(|p| p.tcp_hdr().seq())
                .reduce(|a, b| if seq_lt(b, a) { b } else { a });
            st.expected_seq = anchor;
        }

        for pkt in batch {
            let seq = pkt.tcp_hdr().seq();
            let span = seq_span(&pkt);

            self.check_first_packet(st, seq);

            if self.check_retransmission(st, seq, span) {
                self.counters.retransmissions += 1;
                continue;
            }

            if st.held == TCP_REORDER_POOL_SIZE {
                self.evict_oldest(st, pool);
            }

            let age = st.next_age;
            st.next_age += 1;
            match pool
                .acquire(HoldNode { pkt, seq, span, age, next: st.head })
            {
                Some(id) => {
                    st.head = Some(id);
                    st.held += 1;
                }
                None => self.counters.exhausted += 1,
            }
        }

        self.sort_list(st, pool);
        self.dedup_list(st, pool);
        self.send_eligible_packets(st, pool, out);
    }

    /// Drop every held segment (flow teardown).
    pub fn flush(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
    ) -> usize {
        st.flush(pool)
    }

    // The first segment of a direction anchors `expected_seq`: at its
    // own sequence number, whether it is the SYN or a mid-flow pickup.
    fn check_first_packet(&self, st: &mut ReorderState, seq: u32) {
        if st.expected_seq.is_none() {
            st.expected_seq = Some(seq);
        }
    }

    // A segment whose entire span precedes the release point carries
    // nothing new: the bytes were already delivered. Comparison is by
    // span only; the payload bytes are not inspected.
    fn check_retransmission(
        &self,
        st: &ReorderState,
        seq: u32,
        span: u32,
    ) -> bool {
        match st.expected_seq {
            Some(expected) => {
                seq_lt(seq, expected)
                    && seq_leq(seq.wrapping_add(span), expected)
            }
            None => false,
        }
    }

    fn put_packet_in_list(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
        pkt: Packet<Parsed>,
        seq: u32,
        span: u32,
    ) -> Option<ReorderDrop> {
        // Find the insertion point: before the first node past `seq`.
        let mut prev: Option<SlotId> = None;
        let mut cur = st.head;
        while let Some(id) = cur {
            let node = pool.get(id);
            if seq_gt(node.seq, seq) {
                break;
            }
            if node.seq == seq {
                if node.span >= span {
                    // Identical or superset already held.
                    self.counters.duplicates += 1;
                    return Some(ReorderDrop::Duplicate);
                }
                // The newcomer supersedes the held segment.
                let node = pool.get_mut(id);
                node.pkt = pkt;
                node.span = span;
                return None;
            }
            prev = Some(id);
            cur = node.next;
        }

        if st.held == TCP_REORDER_POOL_SIZE {
            self.evict_oldest(st, pool);
            // Eviction may have unlinked `prev`; re-find the spot.
            return self.put_packet_in_list(st, pool, pkt, seq, span);
        }

        let age = st.next_age;
        st.next_age += 1;
        let Some(id) =
            pool.acquire(HoldNode { pkt, seq, span, age, next: cur })
        else {
            self.counters.exhausted += 1;
            return Some(ReorderDrop::Exhausted);
        };

        match prev {
            Some(p) => pool.get_mut(p).next = Some(id),
            None => st.head = Some(id),
        }
        st.held += 1;
        None
    }

    // Release the contiguous prefix: every head segment starting at
    // (or overlapping) the release point goes out and advances it.
    fn send_eligible_packets(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
        out: &mut Vec<Packet<Parsed>>,
    ) {
        let Some(mut expected) = st.expected_seq else { return };

        while let Some(id) = st.head {
            let node = pool.get(id);
            let end = node.seq.wrapping_add(node.span);

            if seq_leq(end, expected) && node.seq != expected {
                // Stale while held; a newer arrival released its span.
                let node = pool.release(id);
                st.head = node.next;
                st.held -= 1;
                self.counters.retransmissions += 1;
                continue;
            }

            if seq_leq(node.seq, expected) {
                let node = pool.release(id);
                st.head = node.next;
                st.held -= 1;
                if seq_gt(end, expected) {
                    expected = end;
                }
                out.push(node.pkt);
                continue;
            }

            break;
        }

        st.expected_seq = Some(expected);
    }

    // Oldest-first eviction keeps the list bounded; the evicted
    // segment is recovered by the sender's retransmission.
    fn evict_oldest(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
    ) {
        let mut oldest: Option<(SlotId, u64)> = None;
        let mut cur = st.head;
        while let Some(id) = cur {
            let node = pool.get(id);
            if oldest.map_or(true, |(_, age)| node.age < age) {
                oldest = Some((id, node.age));
            }
            cur = node.next;
        }

        let Some((victim, _)) = oldest else { return };

        // Unlink.
        let mut prev: Option<SlotId> = None;
        let mut cur = st.head;
        while let Some(id) = cur {
            if id == victim {
                let node = pool.release(id);
                match prev {
                    Some(p) => pool.get_mut(p).next = node.next,
                    None => st.head = node.next,
                }
                st.held -= 1;
                self.counters.overflows += 1;
                return;
            }
            prev = cur;
            cur = pool.get(id).next;
        }
    }

    // Relink the list in ascending sequence order. The node ids are
    // collected and stable-sorted (a merge sort) in one pass; for a
    // freshly prepended batch this is the O((n + k) log (n + k))
    // placement path.
    fn sort_list(&self, st: &mut ReorderState, pool: &mut MemoryPool<HoldNode>) {
        let mut ids = Vec::with_capacity(st.held);
        let mut cur = st.head;
        while let Some(id) = cur {
            ids.push(id);
            cur = pool.get(id).next;
        }

        let base = st.expected_seq.unwrap_or(0);
        ids.sort_by_key(|&id| pool.get(id).seq.wrapping_sub(base));

        let mut next: Option<SlotId> = None;
        for &id in ids.iter().rev() {
            pool.get_mut(id).next = next;
            next = Some(id);
        }
        st.head = next;
    }

    // After a batch sort, equal-sequence neighbors collapse: the
    // longer segment wins.
    fn dedup_list(
        &mut self,
        st: &mut ReorderState,
        pool: &mut MemoryPool<HoldNode>,
    ) {
        let mut cur = st.head;
        while let Some(id) = cur {
            let node = pool.get(id);
            let Some(next_id) = node.next else { break };
            let next = pool.get(next_id);

            if node.seq == next.seq {
                self.counters.duplicates += 1;
                if next.span > node.span {
                    // Keep the successor's packet in this node.
                    let freed = pool.release(next_id);
                    let node = pool.get_mut(id);
                    node.pkt = freed.pkt;
                    node.span = freed.span;
                    node.next = freed.next;
                } else {
                    let freed = pool.release(next_id);
                    pool.get_mut(id).next = freed.next;
                }
                st.held -= 1;
            } else {
                cur = node.next;
            }
        }
    }
}

impl Element for TcpReorder {
    fn class_name(&self) -> &'static str {
        "TcpReorder"
    }

    fn port_count(&self) -> &'static str {
        PORTS_1_1X2
    }

    fn configure(&mut self, conf: &[String]) -> Result<(), SmeError> {
        let class = self.class_name();
        let mut args = Args::parse(conf).map_err(|e| config_err(class, e))?;
        self.direction = args
            .required("FLOWDIRECTION")
            .map_err(|e| config_err(class, e))?;
        self.merge_sort = args
            .optional_bool("MERGESORT", true)
            .map_err(|e| config_err(class, e))?;
        args.finish().map_err(|e| config_err(class, e))
    }

    fn initialize(&mut self) -> Result<(), SmeError> {
        if self.table.is_none() {
            return Err(SmeError::ConfigInvalid {
                element: self.class_name().to_string(),
                msg: "no flow table attached".to_string(),
            });
        }
        Ok(())
    }

    fn push_batch(
        &mut self,
        _port: u16,
        batch: PacketBatch,
        ctx: &mut WorkerCtx,
    ) -> PacketBatch {
        let Some(table) = self.table.clone() else { return batch };
        let dir = self.direction;
        let now = ctx.now();
        let mut out = Vec::with_capacity(batch.len());

        // A batch can span sessions; each flow's segments run through
        // its own hold list together.
        let mut by_flow: BTreeMap<FlowId, Vec<Packet<Parsed>>> =
            BTreeMap::new();
        for pkt in batch {
            let (key, _) = FcbTable::canonical(pkt.flow());
            by_flow.entry(key).or_default().push(pkt);
        }

        for (flow, pkts) in by_flow {
            let entry = match table.lock().lookup_or_create(&flow, now) {
                Ok((entry, _)) => entry,
                Err(_) => {
                    self.counters.exhausted += pkts.len() as u64;
                    continue;
                }
            };

            let mut fcb = entry.lock();
            let mut st = fcb.reorder[dir.idx()];
            self.process_batch(&mut st, &mut ctx.hold_pool, pkts, &mut out);
            fcb.reorder[dir.idx()] = st;
        }

        out
    }
}

fn seq_span(pkt: &Packet<Parsed>) -> u32 {
    use super::tcp::TcpFlags;

    let hdr = pkt.tcp_hdr();
    let mut span = pkt.payload_len() as u32;
    if hdr.has_flag(TcpFlags::SYN) {
        span += 1;
    }
    if hdr.has_flag(TcpFlags::FIN) {
        span += 1;
    }
    span
}
