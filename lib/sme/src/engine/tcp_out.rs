// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The egress boundary of one flow direction.
//!
//! `TcpOut` is where a packet's accumulated edits become flow state:
//! the edit log is committed into the direction's sequence map, the
//! outgoing sequence number crosses into the modified space, any
//! piggybacked acknowledgement (and SACK blocks) cross back out of
//! it, lengths are fixed up, and checksums recomputed. After this
//! element the packet is wire-legal again.
//!
//! A retransmitted segment is not edited twice: if the span was
//! already emitted in edited form and is still within the alignment
//! window, the cached bytes are emitted verbatim.

use super::element::config_err;
use super::element::Args;
use super::element::Element;
use super::element::PacketBatch;
use super::element::WorkerCtx;
use super::fcb::FcbTable;
use super::ip4::IpHelpers;
use super::packet::Packet;
use super::packet::Parsed;
use super::tcp::rewrite_sack_blocks;
use super::tcp::seq_lt;
use super::tcp::TcpFlags;
use super::tcp::TcpHelpers;
use crate::ddi::sync::KMutex;
use sme_api::Direction;
use sme_api::SmeError;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default)]
pub struct TcpOutCounters {
    pub emitted: u64,
    pub translated: u64,
    pub retransmits_aligned: u64,
    pub retransmits_passed: u64,
    pub no_flow: u64,
}

pub struct TcpOut {
    direction: Direction,
    table: Arc<KMutex<FcbTable>>,
    pub counters: TcpOutCounters,
}

impl IpHelpers for TcpOut {}
impl TcpHelpers for TcpOut {}

impl TcpOut {
    pub fn new(table: Arc<KMutex<FcbTable>>) -> Self {
        Self {
            direction: Direction::Fwd,
            table,
            counters: TcpOutCounters::default(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn process_packet(
        &mut self,
        mut pkt: Packet<Parsed>,
        ctx: &mut WorkerCtx,
    ) -> Packet<Parsed> {
        let now = ctx.now();
        let dir = self.direction;

        let entry = match self.table.lock().lookup(pkt.flow()) {
            Some((entry, _)) => entry,
            None => {
                // Never classified: nothing to translate, emit as-is.
                self.counters.no_flow += 1;
                self.counters.emitted += 1;
                return pkt;
            }
        };

        let (seq, ack, flags) = {
            let tcp = pkt.tcp_hdr();
            (tcp.seq(), tcp.ack(), tcp.flags)
        };
        let has_ack = (flags & TcpFlags::ACK) != 0;
        let span = self.seq_span(&pkt);

        // A pure acknowledgement was already translated at ingress;
        // touching its ACK again would double-map it.
        let had_log = pkt.edits_mut().is_some();

        let mut fcb = entry.lock();

        // A direction picked up mid-flow anchors its map at the first
        // sequence number this boundary sees.
        fcb.maintainer_mut(dir).init(seq);

        // Data segments before the emission high-water mark are
        // retransmissions and must not be edited twice.
        let already_emitted = pkt.payload_len() > 0
            && seq_lt(seq, fcb.maintainer(dir).highest_seq_seen());

        let mut aligned_payload: Option<Vec<u8>> = None;

        if already_emitted {
            // Discard whatever the chain did to this copy.
            if let Some(mut edits) = pkt.take_edits() {
                edits.clear(&mut ctx.edit_pool);
            }

            match fcb.maintainer(dir).cached_segment(seq, now) {
                Some(bytes) => {
                    aligned_payload = Some(bytes.to_vec());
                    self.counters.retransmits_aligned += 1;
                }
                None => {
                    // Beyond the alignment window; the endpoints
                    // reconcile this copy themselves.
                    self.counters.retransmits_passed += 1;
                }
            }
        } else {
            let (net, had_edits) = match pkt.take_edits() {
                Some(mut edits) => {
                    let had = !edits.is_empty();
                    let m = fcb.maintainer_mut(dir);
                    (edits.commit(&mut ctx.edit_pool, m, seq), had)
                }
                None => (0, false),
            };

            // The span this segment occupies in the *original* space:
            // the buffer already reflects the edits, so back them out.
            let orig_span = (i64::from(span) - i64::from(net)) as u32;
            let seq_end = seq.wrapping_add(orig_span);

            let m = fcb.maintainer_mut(dir);
            m.note_seq_seen(seq_end);
            if orig_span > 0 {
                m.mark_sent(seq_end, now);
            }
            if had_edits {
                m.cache_segment(seq, pkt.payload().to_vec(), now);
            }
        }

        if let Some(bytes) = aligned_payload {
            pkt.replace_payload(&bytes);
        }

        // Cross the sequence number into the modified space, and any
        // acknowledgement back out of the opposite direction's.
        let new_seq = fcb.maintainer(dir).map_seq(seq);

        let mut new_ack = ack;
        if has_ack && had_log {
            let rev = fcb.maintainer_mut(dir.flip());
            new_ack = rev.map_ack(ack);
            let _ = rev.take_rtt_sample(new_ack, now);
            rev.prune(new_ack);
            fcb.maintainer_mut(dir).set_last_ack_sent(new_ack);
        }

        let dirty = {
            let rev = fcb.maintainer(dir.flip());
            self.finalize(&mut pkt, new_seq, new_ack, rev)
        };
        drop(fcb);

        if dirty {
            self.compute_tcp_checksum(&mut pkt);
            self.compute_ip_checksum(&mut pkt);
            self.counters.translated += 1;
        }

        self.counters.emitted += 1;
        pkt
    }

    /// Apply the translated header fields; returns whether anything
    /// in the packet actually changed.
    fn finalize(
        &self,
        pkt: &mut Packet<Parsed>,
        new_seq: u32,
        new_ack: u32,
        rev: &super::seq_map::SeqMap,
    ) -> bool {
        let mut dirty = false;

        // The buffer was already resized by the edits (or by
        // alignment); the declared length follows it.
        let declared = usize::from(self.ip_total_len(pkt));
        let actual =
            pkt.offsets().payload - pkt.offsets().ip + pkt.payload_len();
        if declared != actual {
            self.set_ip_total_len(pkt, actual as u16);
            dirty = true;
        }

        {
            let mut tcp = pkt.tcp_hdr_mut();
            if tcp.seq() != new_seq {
                tcp.set_seq(new_seq);
                dirty = true;
            }
            if tcp.has_flag(TcpFlags::ACK) && tcp.ack() != new_ack {
                tcp.set_ack(new_ack);
                dirty = true;
            }
        }

        if rev.num_entries() > 0 {
            let hdr = pkt.ulp_hdr_bytes_mut();
            let before: Vec<u8> = hdr.to_vec();
            rewrite_sack_blocks(hdr, |edge| rev.map_ack(edge));
            if hdr[..] != before[..] {
                dirty = true;
            }
        }

        dirty
    }
}

impl Element for TcpOut {
    fn class_name(&self) -> &'static str {
        "TcpOut"
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
            .map(|pkt| self.process_packet(pkt, ctx))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::element::WorkerCtx;
    use crate::engine::fcb::FcbTable;
    use crate::engine::packet::test::tcp_pkt;
    use crate::engine::packet::test::test_flow;
    use crate::engine::tcp_in::TcpIn;
    use core::num::NonZeroU32;

    fn harness() -> (TcpIn, TcpOut, WorkerCtx) {
        let table = Arc::new(KMutex::new(FcbTable::new(
            "tcp-out-test",
            NonZeroU32::new(64).unwrap(),
            None,
        )));
        let mut tcp_in = TcpIn::new(Arc::clone(&table));
        tcp_in.configure(&["FLOWDIRECTION 0".to_string()]).unwrap();
        let mut tcp_out = TcpOut::new(table);
        tcp_out.configure(&["FLOWDIRECTION 0".to_string()]).unwrap();
        (tcp_in, tcp_out, WorkerCtx::new())
    }

    #[test]
    fn unmodified_segment_passes_untouched() {
        let (mut tcp_in, mut tcp_out, mut ctx) = harness();
        let flow = test_flow();

        let pkt = tcp_pkt(&flow, 1001, 5001, TcpFlags::ACK, b"payload");
        let orig_bytes = pkt.bytes().to_vec();

        let batch = tcp_in.push_batch(0, vec![pkt], &mut ctx);
        let out = tcp_out.push_batch(0, batch, &mut ctx);
        assert_eq!(out[0].bytes(), &orig_bytes[..]);
        assert_eq!(tcp_out.counters.translated, 0);
    }

    #[test]
    fn insertion_is_committed_and_lengths_fixed() {
        let (mut tcp_in, mut tcp_out, mut ctx) = harness();
        let flow = test_flow();

        let pkt =
            tcp_pkt(&flow, 1001, 5001, TcpFlags::ACK, &[0x61u8; 20]);
        let old_total = pkt.ip_hdr().total_len();

        let mut batch = tcp_in.push_batch(0, vec![pkt], &mut ctx);
        assert!(tcp_in.insert_bytes(&mut batch[0], &mut ctx, 10, b"EDIT"));

        let out = tcp_out.push_batch(0, batch, &mut ctx);
        let pkt = &out[0];

        assert_eq!(pkt.tcp_hdr().seq(), 1001);
        assert_eq!(pkt.payload_len(), 24);
        assert_eq!(pkt.ip_hdr().total_len(), old_total + 4);

        // The next in-order segment is shifted by the net delta.
        let next = tcp_pkt(&flow, 1021, 5001, TcpFlags::ACK, &[0x62u8; 10]);
        let batch = tcp_in.push_batch(0, vec![next], &mut ctx);
        let out = tcp_out.push_batch(0, batch, &mut ctx);
        assert_eq!(out[0].tcp_hdr().seq(), 1025);
    }

    #[test]
    fn checksums_valid_after_edit() {
        use crate::engine::checksum::Checksum;

        let (mut tcp_in, mut tcp_out, mut ctx) = harness();
        let flow = test_flow();

        let pkt = tcp_pkt(&flow, 1001, 1, TcpFlags::ACK, &[0x61u8; 20]);
        let mut batch = tcp_in.push_batch(0, vec![pkt], &mut ctx);
        assert!(tcp_in.remove_bytes(&mut batch[0], &mut ctx, 4, 8));
        let out = tcp_out.push_batch(0, batch, &mut ctx);
        let pkt = &out[0];

        // IP header sums to 0xFFFF with its checksum in place.
        let ip_off = pkt.offsets().ip;
        let ip_len = pkt.ip_hdr().hdr_len();
        let mut sum =
            Checksum::compute(&pkt.bytes()[ip_off..ip_off + ip_len]);
        assert_eq!(sum.finalize(), 0xFFFF);

        // TCP pseudo-header + segment sums to 0xFFFF likewise.
        let ulp_off = pkt.offsets().ulp;
        let tcp_len = pkt.len() - ulp_off;
        let bytes = pkt.bytes();
        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&bytes[ip_off + 12..ip_off + 16]);
        pseudo[4..8].copy_from_slice(&bytes[ip_off + 16..ip_off + 20]);
        pseudo[9] = bytes[ip_off + 9];
        pseudo[10..12].copy_from_slice(&(tcp_len as u16).to_be_bytes());
        let mut sum = Checksum::compute(&pseudo);
        sum.add_bytes(&bytes[ulp_off..]);
        assert_eq!(sum.finalize(), 0xFFFF);
    }

    #[test]
    fn retransmit_emits_cached_bytes() {
        let (mut tcp_in, mut tcp_out, mut ctx) = harness();
        let flow = test_flow();

        let pkt = tcp_pkt(&flow, 1001, 1, TcpFlags::ACK, b"ORIGINALDATA");
        let mut batch = tcp_in.push_batch(0, vec![pkt], &mut ctx);
        assert!(tcp_in.insert_bytes(&mut batch[0], &mut ctx, 8, b"++"));
        let out = tcp_out.push_batch(0, batch, &mut ctx);
        let edited = out[0].payload().to_vec();
        assert_eq!(&edited, b"ORIGINAL++DATA");

        // A later segment moves the high-water mark.
        let next = tcp_pkt(&flow, 1013, 1, TcpFlags::ACK, b"MORE");
        let batch = tcp_in.push_batch(0, vec![next], &mut ctx);
        let _ = tcp_out.push_batch(0, batch, &mut ctx);

        // The sender retransmits the first segment, unedited.
        let rexmit = tcp_pkt(&flow, 1001, 1, TcpFlags::ACK, b"ORIGINALDATA");
        let batch = tcp_in.push_batch(0, vec![rexmit], &mut ctx);
        let out = tcp_out.push_batch(0, batch, &mut ctx);

        assert_eq!(out[0].payload(), &edited[..]);
        assert_eq!(tcp_out.counters.retransmits_aligned, 1);
        assert_eq!(out[0].tcp_hdr().seq(), 1001);
    }
}
