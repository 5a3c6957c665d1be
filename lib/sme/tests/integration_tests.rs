// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! End-to-end scenarios through the full ingress/egress pipeline.

mod common;

use common::client_flow;
use common::ip_csum_ok;
use common::tcp_csum_ok;
use common::tcp_seg;
use common::PcapBuilder;
use sme::ddi::sync::KMutex;
use sme::engine::element::Element;
use sme::engine::element::WorkerCtx;
use sme::engine::fcb::FcbTable;
use sme::engine::packet::Packet;
use sme::engine::packet::Parsed;
use sme::engine::reorder::TcpReorder;
use sme::engine::tcp::TcpFlags;
use sme::engine::tcp_in::TcpIn;
use sme::engine::tcp_out::TcpOut;
use sme_api::Direction;
use std::num::NonZeroU32;
use std::sync::Arc;

const SYN: u8 = TcpFlags::SYN;
const ACK: u8 = TcpFlags::ACK;

/// One direction's slice of the pipeline: reorder → ingress →
/// (user mutators) → egress.
struct Path {
    reorder: TcpReorder,
    tcp_in: TcpIn,
    tcp_out: TcpOut,
}

impl Path {
    fn new(table: &Arc<KMutex<FcbTable>>, dir: Direction) -> Self {
        let dir_conf = format!("FLOWDIRECTION {}", dir.idx());

        let mut reorder = TcpReorder::with_table(Arc::clone(table));
        reorder.configure(&[dir_conf.clone()]).unwrap();
        reorder.initialize().unwrap();

        let mut tcp_in = TcpIn::new(Arc::clone(table));
        tcp_in.configure(&[dir_conf.clone()]).unwrap();

        let mut tcp_out = TcpOut::new(Arc::clone(table));
        tcp_out.configure(&[dir_conf]).unwrap();

        Self { reorder, tcp_in, tcp_out }
    }

    /// Run packets through the path with a mutator between the
    /// boundary elements.
    fn run_with<F>(
        &mut self,
        ctx: &mut WorkerCtx,
        pkts: Vec<Packet<Parsed>>,
        mutate: F,
    ) -> Vec<Packet<Parsed>>
    where
        F: Fn(&TcpIn, &mut Packet<Parsed>, &mut WorkerCtx),
    {
        ctx.tick();
        let batch = self.reorder.push_batch(0, pkts, ctx);
        let mut batch = self.tcp_in.push_batch(0, batch, ctx);
        for pkt in batch.iter_mut() {
            mutate(&self.tcp_in, pkt, ctx);
        }
        self.tcp_out.push_batch(0, batch, ctx)
    }

    fn run(
        &mut self,
        ctx: &mut WorkerCtx,
        pkts: Vec<Packet<Parsed>>,
    ) -> Vec<Packet<Parsed>> {
        self.run_with(ctx, pkts, |_, _, _| {})
    }
}

struct Harness {
    table: Arc<KMutex<FcbTable>>,
    fwd: Path,
    rev: Path,
    ctx: WorkerCtx,
}

impl Harness {
    fn new() -> Self {
        let table = Arc::new(KMutex::new(FcbTable::new(
            "integration",
            NonZeroU32::new(128).unwrap(),
            None,
        )));
        let fwd = Path::new(&table, Direction::Fwd);
        let rev = Path::new(&table, Direction::Rev);
        Self { table, fwd, rev, ctx: WorkerCtx::new() }
    }

    /// Drive the three-way handshake; returns the server's ISN+1 as
    /// the client will ack it.
    fn handshake(&mut self, client_isn: u32, server_isn: u32) {
        let flow = client_flow();

        let out = self.fwd.run(
            &mut self.ctx,
            vec![tcp_seg(&flow, client_isn, 0, SYN, b"")],
        );
        assert_eq!(out.len(), 1);

        let out = self.rev.run(
            &mut self.ctx,
            vec![tcp_seg(
                &flow.mirror(),
                server_isn,
                client_isn.wrapping_add(1),
                SYN | ACK,
                b"",
            )],
        );
        assert_eq!(out.len(), 1);

        let out = self.fwd.run(
            &mut self.ctx,
            vec![tcp_seg(
                &flow,
                client_isn.wrapping_add(1),
                server_isn.wrapping_add(1),
                ACK,
                b"",
            )],
        );
        assert_eq!(out.len(), 1);
    }
}

// SYN, SYN-ACK, ACK, then data with no edits: the stream passes
// byte-identical and the ACK survives translation untouched.
#[test]
fn passthrough_stream_is_identical() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);

    let flow = client_flow();
    let data = tcp_seg(&flow, 1001, 5001, ACK, b"0123456789");
    let orig = data.bytes().to_vec();

    let out = h.fwd.run(&mut h.ctx, vec![data]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].bytes(), &orig[..]);
    assert_eq!(out[0].tcp_hdr().seq(), 1001);
    assert_eq!(out[0].tcp_hdr().ack(), 5001);
    assert!(ip_csum_ok(&out[0]));
    assert!(tcp_csum_ok(&out[0]));
}

// Data arriving A, C, B leaves A, B, C, and the hold list never
// exceeds one segment.
#[test]
fn reordering_normalises_stream() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    let a = tcp_seg(&flow, 1001, 5001, ACK, &[0x61; 10]);
    let c = tcp_seg(&flow, 1021, 5001, ACK, &[0x63; 10]);
    let b = tcp_seg(&flow, 1011, 5001, ACK, &[0x62; 10]);

    let out = h.fwd.run(&mut h.ctx, vec![a]);
    assert_eq!(out[0].payload(), &[0x61; 10]);

    let out = h.fwd.run(&mut h.ctx, vec![c]);
    assert!(out.is_empty());

    {
        let table = h.table.lock();
        let (entry, _) = table.lookup(&flow).unwrap();
        let fcb = entry.lock();
        assert_eq!(fcb.reorder[Direction::Fwd.idx()].held(), 1);
    }

    let out = h.fwd.run(&mut h.ctx, vec![b]);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].payload(), &[0x62; 10]);
    assert_eq!(out[1].payload(), &[0x63; 10]);
}

// The same segment twice: the second copy is consumed by the
// reorderer and the output carries it exactly once.
#[test]
fn retransmission_emitted_once() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    let out = h.fwd.run(
        &mut h.ctx,
        vec![tcp_seg(&flow, 1001, 5001, ACK, &[0x61; 10])],
    );
    assert_eq!(out.len(), 1);

    let out = h.fwd.run(
        &mut h.ctx,
        vec![tcp_seg(&flow, 1001, 5001, ACK, &[0x61; 10])],
    );
    assert!(out.is_empty());
}

// An insertion mid-payload: lengths, checksums, and the next
// segment's sequence all reflect the +4.
#[test]
fn insertion_shifts_the_stream() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    let d = tcp_seg(&flow, 1001, 5001, ACK, &[0x64; 20]);
    let old_total = d.ip_hdr().total_len();

    let out = h.fwd.run_with(&mut h.ctx, vec![d], |tcp_in, pkt, ctx| {
        assert!(tcp_in.insert_bytes(pkt, ctx, 10, b"WXYZ"));
    });

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].tcp_hdr().seq(), 1001);
    assert_eq!(out[0].payload_len(), 24);
    assert_eq!(out[0].ip_hdr().total_len(), old_total + 4);
    assert!(ip_csum_ok(&out[0]));
    assert!(tcp_csum_ok(&out[0]));

    let mut pcap = PcapBuilder::new(
        &std::env::temp_dir().join("sme-insertion-shift.pcap"),
    );
    pcap.add_pkt(&out[0]);

    let e = tcp_seg(&flow, 1021, 5001, ACK, &[0x65; 10]);
    let out = h.fwd.run(&mut h.ctx, vec![e]);
    assert_eq!(out[0].tcp_hdr().seq(), 1025);
    assert!(tcp_csum_ok(&out[0]));
}

// After the +4 insertion, the peer acknowledges in the modified
// space; the ACK crossing back is rewritten into the original space.
#[test]
fn reverse_ack_is_translated() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    let d = tcp_seg(&flow, 1001, 5001, ACK, &[0x64; 20]);
    let _ = h.fwd.run_with(&mut h.ctx, vec![d], |tcp_in, pkt, ctx| {
        assert!(tcp_in.insert_bytes(pkt, ctx, 10, b"WXYZ"));
    });

    // The peer has received 1001..1025 in its space.
    let peer_ack = tcp_seg(&flow.mirror(), 5001, 1025, ACK, b"");
    let out = h.rev.run(&mut h.ctx, vec![peer_ack]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].tcp_hdr().ack(), 1021);
    assert!(tcp_csum_ok(&out[0]));
}

// Removal spanning a segment boundary: each affected segment sheds
// its bytes, and the cumulative -4 shows in later sequence numbers.
#[test]
fn removal_across_segment_boundary() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    // D covers 1001..1021; strip its last two payload bytes.
    let d = tcp_seg(&flow, 1001, 5001, ACK, &[0x64; 20]);
    let out = h.fwd.run_with(&mut h.ctx, vec![d], |tcp_in, pkt, ctx| {
        assert!(tcp_in.remove_bytes(pkt, ctx, 18, 2));
    });
    assert_eq!(out[0].payload_len(), 18);
    assert_eq!(out[0].tcp_hdr().seq(), 1001);
    assert!(tcp_csum_ok(&out[0]));

    // E covers 1021..1031; strip its first two bytes.
    let e = tcp_seg(&flow, 1021, 5001, ACK, &[0x65; 10]);
    let out = h.fwd.run_with(&mut h.ctx, vec![e], |tcp_in, pkt, ctx| {
        assert!(tcp_in.remove_bytes(pkt, ctx, 0, 2));
    });
    assert_eq!(out[0].payload_len(), 8);
    assert_eq!(out[0].tcp_hdr().seq(), 1019);
    assert!(ip_csum_ok(&out[0]));
    assert!(tcp_csum_ok(&out[0]));

    // F rides after both removals.
    let f = tcp_seg(&flow, 1031, 5001, ACK, &[0x66; 5]);
    let out = h.fwd.run(&mut h.ctx, vec![f]);
    assert_eq!(out[0].tcp_hdr().seq(), 1027);
}

// Both edits and reordering at once: the edited segment arrives
// after its successor.
#[test]
fn reorder_and_edit_compose() {
    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    let b = tcp_seg(&flow, 1011, 5001, ACK, &[0x62; 10]);
    let out = h.fwd.run(&mut h.ctx, vec![b]);
    assert!(out.is_empty());

    let a = tcp_seg(&flow, 1001, 5001, ACK, &[0x61; 10]);
    let out = h.fwd.run_with(&mut h.ctx, vec![a], |tcp_in, pkt, ctx| {
        // Only the first segment gets the insertion.
        if pkt.tcp_hdr().seq() == 1001 {
            assert!(tcp_in.insert_bytes(pkt, ctx, 5, b"##"));
        }
    });

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].tcp_hdr().seq(), 1001);
    assert_eq!(out[0].payload_len(), 12);
    assert_eq!(out[1].tcp_hdr().seq(), 1013);
    assert!(tcp_csum_ok(&out[0]));
    assert!(tcp_csum_ok(&out[1]));
}

// A flow reset and reaped leaves a reusable, empty slot behind.
#[test]
fn reset_flow_is_reaped() {
    use sme::ddi::time::Moment;

    let mut h = Harness::new();
    h.handshake(1000, 5000);
    let flow = client_flow();

    let rst = tcp_seg(&flow, 1001, 5001, TcpFlags::RST, b"");
    let _ = h.fwd.run(&mut h.ctx, vec![rst]);

    let dead = h.table.lock().reap(Moment::now());
    assert_eq!(dead.len(), 1);
    assert_eq!(h.table.lock().num_flows(), 0);

    // The next handshake builds a fresh block in the same slot.
    h.handshake(40000, 90000);
    assert_eq!(h.table.lock().num_flows(), 1);
}
