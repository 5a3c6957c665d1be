// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The ingress boundary of one flow direction.
//!
//! `TcpIn` stands at the head of the user chain: it resolves the
//! packet's control block, advances the connection state machine,
//! captures initial sequence numbers, and decides the packet's path.
//! Pure acknowledgements are translated here and bypass the chain;
//! data segments get a fresh edit log and travel on to whatever
//! elements want to mutate them, with [`TcpIn::insert_bytes`] and
//! [`TcpIn::remove_bytes`] as their mutation vocabulary.

use super::checksum::csum_update;
use super::classify::Classifier;
use super::classify::SessionContext;
use super::classify::SESSION_CTX_TUPLE;
use super::edits::EditList;
use super::element::config_err;
use super::element::Args;
use super::element::Element;
use super::element::PacketBatch;
use super::element::WorkerCtx;
use super::fcb::FcbTable;
use super::packet::Packet;
use super::packet::Parsed;
use super::tcp::TcpFlags;
use super::tcp_state::UnexpectedSegment;
use crate::ddi::sync::KMutex;
use sme_api::Direction;
use sme_api::SmeError;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default)]
pub struct TcpInCounters {
    pub pure_acks: u64,
    pub data_segments: u64,
    pub state_violations: u64,
    pub resource_exhausted: u64,
}

pub struct TcpIn {
    direction: Direction,
    classifier: Classifier,
    pub counters: TcpInCounters,
}

impl TcpIn {
    pub fn new(table: Arc<KMutex<FcbTable>>) -> Self {
        // The stock 5-tuple fingerprint always parses.
        let ctx = SessionContext::parse(SESSION_CTX_TUPLE).unwrap();
        Self {
            direction: Direction::Fwd,
            classifier: Classifier::new(ctx, table),
            counters: TcpInCounters::default(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Insert `data` into the packet's payload at offset `off`,
    /// recording the edit for commit at egress. Returns `false` (and
    /// leaves the packet untouched) when the packet carries no edit
    /// log, the log was already committed, or the pool is dry.
    #[must_use]
    pub fn insert_bytes(
        &self,
        pkt: &mut Packet<Parsed>,
        ctx: &mut WorkerCtx,
        off: u32,
        data: &[u8],
    ) -> bool {
        let Some(edits) = pkt.edits_mut() else { return false };
        if !edits.add(&mut ctx.edit_pool, off, data.len() as i32) {
            return false;
        }

        pkt.insert_payload_bytes(off as usize, data);
        true
    }

    /// Remove up to `n` payload bytes at offset `off`, recording the
    /// edit for commit at egress.
    #[must_use]
    pub fn remove_bytes(
        &self,
        pkt: &mut Packet<Parsed>,
        ctx: &mut WorkerCtx,
        off: u32,
        n: u32,
    ) -> bool {
        let avail = pkt.payload_len().saturating_sub(off as usize);
        let n = (n as usize).min(avail);
        if n == 0 {
            return true;
        }

        let Some(edits) = pkt.edits_mut() else { return false };
        if !edits.add(&mut ctx.edit_pool, off, -(n as i32)) {
            return false;
        }

        let removed = pkt.remove_payload_bytes(off as usize, n);
        debug_assert_eq!(removed, n);
        true
    }

    fn process_packet(
        &mut self,
        mut pkt: Packet<Parsed>,
        ctx: &mut WorkerCtx,
    ) -> Option<Packet<Parsed>> {
        let now = ctx.now();
        let dir = self.direction;

        let (seq, ack, flags, window) = {
            let tcp = pkt.tcp_hdr();
            (tcp.seq(), tcp.ack(), tcp.flags, tcp.window())
        };
        let has_ack = (flags & TcpFlags::ACK) != 0;
        let payload_len = pkt.payload_len();
        let flow = *pkt.flow();

        let entry = match self.classifier.classify(&pkt, now) {
            Ok((entry, _)) => entry,
            Err(SmeError::MaxCapacity(_)) => {
                self.counters.resource_exhausted += 1;
                return None;
            }
            Err(_) => return None,
        };

        let mut new_ack = None;

        {
            let mut fcb = entry.lock();

            let ack_opt = has_ack.then_some(ack);
            match fcb.tcp.process(dir, &flow, seq, ack_opt, flags) {
                Ok(_) => {}
                Err(UnexpectedSegment { .. }) => {
                    // The state machine already reset the flow; the
                    // reaper collects the block.
                    self.counters.state_violations += 1;
                    return None;
                }
            }

            // The first segment seen in a direction anchors its map,
            // whether that is the SYN or a mid-flow pickup.
            let m = fcb.maintainer_mut(dir);
            m.init(seq);
            if has_ack {
                m.init_ack(ack);
            }
            m.set_last_window_sent(window);

            if fcb.tcp.is_closing() && !fcb.tcp.is_closed() {
                fcb.schedule_reap(now);
            }

            let pure_ack = payload_len == 0
                && has_ack
                && (flags & (TcpFlags::SYN | TcpFlags::FIN | TcpFlags::RST))
                    == 0;

            if pure_ack {
                // The ACK acknowledges the opposite direction's
                // modified stream; carry it back to the original
                // space and retire acknowledged map state.
                let rev = fcb.maintainer_mut(dir.flip());
                let orig_ack = rev.map_ack(ack);
                let _ = rev.take_rtt_sample(orig_ack, now);
                rev.prune(orig_ack);
                rev.expire_cache(now);

                fcb.maintainer_mut(dir).set_last_ack_sent(orig_ack);
                new_ack = Some(orig_ack);
            }
        }

        match new_ack {
            Some(orig_ack) => {
                self.counters.pure_acks += 1;
                if orig_ack != ack {
                    rewrite_ack(&mut pkt, orig_ack);
                }
            }
            None => {
                self.counters.data_segments += 1;
                pkt.attach_edits(EditList::new());
            }
        }

        Some(pkt)
    }
}

/// Rewrite the ACK field in place, patching the checksum
/// incrementally rather than re-summing the segment.
fn rewrite_ack(pkt: &mut Packet<Parsed>, new_ack: u32) {
    let mut tcp = pkt.tcp_hdr_mut();
    let old = tcp.ack;
    tcp.set_ack(new_ack);
    let new = tcp.ack;
    let mut csum = tcp.csum;
    csum_update(&mut csum, &old, &new);
    tcp.csum = csum;
}

impl Element for TcpIn {
    fn class_name(&self) -> &'static str {
        "TcpIn"
    }

    fn configure(&mut self, conf: &[String]) -> Result<(), SmeError> {
        let class = self.class_name();
        let mut args = Args::parse(conf).map_err(|e| config_err(class, e))?;
        self.direction = args
            .required("FLOWDIRECTION")
            .map_err(|e| config_err(class, e))?;
        args.finish().map_err(|e| config_err(class, e))
    }

    fn push_batch(
        &mut self,
        _port: u16,
        batch: PacketBatch,
        ctx: &mut WorkerCtx,
    ) -> PacketBatch {
        batch
            .into_iter()
            .filter_map(|pkt| self.process_packet(pkt, ctx))
            .collect()
    }
}
