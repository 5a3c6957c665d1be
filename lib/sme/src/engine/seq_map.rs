// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The running translation between the original and the modified
//! sequence space of one flow direction.
//!
//! Every committed edit contributes a `(position, delta)` entry;
//! between entries the translation is affine with slope one. The
//! forward map ([`SeqMap::map_seq`]) carries original sequence numbers
//! into the modified space the receiver observes; the inverse
//! ([`SeqMap::inv_seq`]) carries the receiver's acknowledgements back.
//!
//! Positions are stored relative to the direction's initial sequence
//! number, so the usual serial-number wraparound cannot reorder the
//! entry list. Entries below the receiver's cumulative ACK are
//! coalesced into a single base entry: the net byte delta must survive
//! pruning or every later translation would shear.

use crate::ddi::time::Moment;

/// Aged-out bound for the retransmit cache when no RTT sample has
/// been taken yet.
pub const RTT_DEF_WINDOW_MS: u64 = 200;

/// The most segments the retransmit cache will hold.
pub const RETRANS_CACHE_MAX: usize = 32;

#[derive(Clone, Copy, Debug)]
struct MapEntry {
    /// Position in the original space, relative to the ISN.
    pos: u32,
    /// This entry's own contribution.
    delta: i32,
    /// Cumulative delta at or before `pos`.
    cum: i64,
}

impl MapEntry {
    /// The mapped (modified-space) value of `pos` itself: for a
    /// removal the excised region collapses onto its left edge.
    fn mapped_floor(&self) -> i64 {
        i64::from(self.pos) + self.cum - i64::from(self.delta.min(0))
    }
}

/// A modified segment retained for retransmit alignment.
#[derive(Clone, Debug)]
struct CachedSegment {
    seq: u32,
    payload: Vec<u8>,
    emitted: Moment,
}

#[derive(Clone, Debug, Default)]
pub struct SeqMap {
    initial_seq: Option<u32>,
    initial_ack: Option<u32>,
    entries: Vec<MapEntry>,
    last_ack_sent: u32,
    last_window_sent: u16,
    highest_seq_seen: u32,
    srtt_ms: Option<u64>,
    rtt_probe: Option<(u32, Moment)>,
    retrans: Vec<CachedSegment>,
}

impl SeqMap {
    pub fn new(isn: u32) -> Self {
        Self { initial_seq: Some(isn), ..Default::default() }
    }

    pub fn is_init(&self) -> bool {
        self.initial_seq.is_some()
    }

    /// Record the initial sequence number for this direction. The
    /// first caller wins; a retransmitted SYN changes nothing.
    pub fn init(&mut self, isn: u32) {
        if self.initial_seq.is_none() {
            self.initial_seq = Some(isn);
            self.highest_seq_seen = isn;
        }
    }

    pub fn init_ack(&mut self, ack: u32) {
        if self.initial_ack.is_none() {
            self.initial_ack = Some(ack);
        }
    }

    fn base(&self) -> u32 {
        self.initial_seq.unwrap_or(0)
    }

    fn rel(&self, seq: u32) -> u32 {
        seq.wrapping_sub(self.base())
    }

    /// Insert an edit of `delta` bytes at original sequence number
    /// `seq`. An edit landing on an existing entry is summed into it;
    /// a sum of zero deletes the entry.
    pub fn insert(&mut self, seq: u32, delta: i32) {
        if delta == 0 {
            return;
        }

        let pos = self.rel(seq);
        let idx = self.entries.partition_point(|e| e.pos < pos);

        if idx < self.entries.len() && self.entries[idx].pos == pos {
            let sum = self.entries[idx].delta + delta;
            if sum == 0 {
                self.entries.remove(idx);
            } else {
                self.entries[idx].delta = sum;
            }
        } else {
            let prev_cum =
                if idx == 0 { 0 } else { self.entries[idx - 1].cum };
            self.entries.insert(
                idx,
                MapEntry { pos, delta, cum: prev_cum + i64::from(delta) },
            );
        }

        self.refresh_cums(idx);
    }

    // Recompute cumulative deltas from `idx` onward.
    fn refresh_cums(&mut self, idx: usize) {
        let mut cum = if idx == 0 {
            0
        } else {
            self.entries[idx - 1].cum
        };
        for e in &mut self.entries[idx..] {
            cum += i64::from(e.delta);
            e.cum = cum;
        }
    }

    /// Translate an original sequence number into the modified space.
    ///
    /// Non-decreasing over the whole space; positions inside a removed
    /// region map onto the left edge of the excision.
    pub fn map_seq(&self, seq: u32) -> u32 {
        let pos = self.rel(seq);
        let idx = self.entries.partition_point(|e| e.pos <= pos);

        if idx == 0 {
            return seq;
        }

        let e = &self.entries[idx - 1];
        let mapped = (i64::from(pos) + e.cum).max(e.mapped_floor());
        self.base().wrapping_add(mapped as u32)
    }

    /// Translate a modified-space value back: the smallest original
    /// sequence number whose mapping is at or past `seq`. For a value
    /// inside a removed region this is the conservative choice that
    /// preserves forward progress.
    pub fn inv_seq(&self, seq: u32) -> u32 {
        let pos = i64::from(self.rel(seq));
        // `mapped_floor` is also the mapped value at each entry's own
        // position, so it marks where that entry's region begins in
        // the modified space.
        let idx =
            self.entries.partition_point(|e| e.mapped_floor() <= pos);

        let mut orig = if idx == 0 {
            pos
        } else {
            let e = &self.entries[idx - 1];
            if pos <= e.mapped_floor() {
                i64::from(e.pos)
            } else {
                pos - e.cum
            }
        };

        // A value landing in the gap an insertion opened belongs to
        // the entry position itself, not past it.
        if idx < self.entries.len() {
            orig = orig.min(i64::from(self.entries[idx].pos));
        }

        self.base().wrapping_add(orig as u32)
    }

    /// The acknowledgement map: acknowledgements flow against the
    /// data and are expressed in the modified space.
    pub fn map_ack(&self, ack: u32) -> u32 {
        self.inv_seq(ack)
    }

    /// Drop translation state for everything the receiver has
    /// cumulatively acknowledged (`seq` in the original space).
    /// Acked entries collapse into one base entry carrying the net
    /// delta, so later translations keep their shift.
    pub fn prune(&mut self, seq: u32) {
        let pos = self.rel(seq);
        let idx = self.entries.partition_point(|e| e.pos < pos);

        if idx > 1 {
            let keep = self.entries[idx - 1];
            self.entries.drain(0..idx - 1);
            self.entries[0] = MapEntry {
                pos: keep.pos,
                delta: keep.cum as i32,
                cum: keep.cum,
            };
        }
    }

    /// The number of live entries.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot `(pos, delta, cum)` triples for dumps.
    pub fn entries(&self) -> Vec<(u32, i32, i64)> {
        self.entries.iter().map(|e| (e.pos, e.delta, e.cum)).collect()
    }

    // ================================================================
    // Per-direction bookkeeping shared with the boundary elements.
    // ================================================================

    pub fn set_last_ack_sent(&mut self, ack: u32) {
        self.last_ack_sent = ack;
    }

    pub fn last_ack_sent(&self) -> u32 {
        self.last_ack_sent
    }

    pub fn set_last_window_sent(&mut self, win: u16) {
        self.last_window_sent = win;
    }

    pub fn last_window_sent(&self) -> u16 {
        self.last_window_sent
    }

    /// Note the end of an emitted segment's span in original space.
    pub fn note_seq_seen(&mut self, seq_end: u32) {
        if self.initial_seq.is_some()
            && super::tcp::seq_gt(seq_end, self.highest_seq_seen)
        {
            self.highest_seq_seen = seq_end;
        }
    }

    pub fn highest_seq_seen(&self) -> u32 {
        self.highest_seq_seen
    }

    /// Start timing one segment: `seq_end` is the original-space end
    /// of an emitted segment. One probe flies at a time; a probe
    /// already in flight is kept.
    pub fn mark_sent(&mut self, seq_end: u32, now: Moment) {
        if self.rtt_probe.is_none() {
            self.rtt_probe = Some((seq_end, now));
        }
    }

    /// If an acknowledgement (original space) covers the in-flight
    /// probe, fold the round trip into the estimate and return it.
    pub fn take_rtt_sample(&mut self, orig_ack: u32, now: Moment) -> Option<u64> {
        let (seq_end, sent) = self.rtt_probe?;
        if !super::tcp::seq_geq(orig_ack, seq_end) {
            return None;
        }

        self.rtt_probe = None;
        let sample = now.delta_as_millis(sent);
        self.new_rtt_estimate(sample);
        Some(sample)
    }

    /// Fold a round-trip sample (milliseconds) into the smoothed
    /// estimate: srtt ← 7/8·srtt + 1/8·sample.
    pub fn new_rtt_estimate(&mut self, sample_ms: u64) {
        self.srtt_ms = Some(match self.srtt_ms {
            Some(srtt) => (srtt * 7 + sample_ms) / 8,
            None => sample_ms,
        });
    }

    /// The retransmit alignment window: twice the smoothed RTT.
    pub fn retrans_window_ms(&self) -> u64 {
        self.srtt_ms.map_or(RTT_DEF_WINDOW_MS, |srtt| srtt * 2)
    }

    /// Retain an emitted, already-edited segment so a retransmission
    /// of the same span can be re-emitted byte-identical.
    pub fn cache_segment(&mut self, seq: u32, payload: Vec<u8>, now: Moment) {
        if let Some(seg) = self.retrans.iter_mut().find(|s| s.seq == seq) {
            seg.payload = payload;
            seg.emitted = now;
            return;
        }
        if self.retrans.len() == RETRANS_CACHE_MAX {
            self.retrans.remove(0);
        }
        self.retrans.push(CachedSegment { seq, payload, emitted: now });
    }

    /// Look up the edited bytes for a retransmitted segment, if the
    /// original emission is still within the alignment window.
    pub fn cached_segment(&self, seq: u32, now: Moment) -> Option<&[u8]> {
        let window = self.retrans_window_ms();
        self.retrans
            .iter()
            .find(|s| s.seq == seq)
            .filter(|s| now.delta_as_millis(s.emitted) <= window)
            .map(|s| s.payload.as_slice())
    }

    /// Age out cache entries older than the alignment window.
    pub fn expire_cache(&mut self, now: Moment) {
        let window = self.retrans_window_ms();
        self.retrans.retain(|s| now.delta_as_millis(s.emitted) <= window);
    }
}
