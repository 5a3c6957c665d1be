// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Micro-benchmarks for the hot-path pieces: sequence translation,
//! checksum folding, and reorder placement.

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;
use criterion::Criterion;
use sme::engine::checksum::Checksum;
use sme::engine::packet::Packet;
use sme::engine::packet::Parsed;
use sme::engine::pool::MemoryPool;
use sme::engine::reorder::ReorderState;
use sme::engine::reorder::TcpReorder;
use sme::engine::seq_map::SeqMap;

fn tcp_frame(seq: u32, payload_len: usize) -> Packet<Parsed> {
    let total_len = 40 + payload_len;
    let mut frame = vec![0u8; 14 + total_len];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[16..18].copy_from_slice(&(total_len as u16).to_be_bytes());
    frame[23] = 6;
    frame[38..42].copy_from_slice(&seq.to_be_bytes());
    frame[46] = 0x50;
    frame[47] = 0x10;
    Packet::copy(&frame).parse().unwrap()
}

fn bench_map_seq(c: &mut Criterion) {
    let mut map = SeqMap::new(0);
    for i in 0..32u32 {
        map.insert(i * 1000, if i % 2 == 0 { 8 } else { -8 });
    }

    c.bench_function("map_seq_32_entries", |b| {
        b.iter(|| std::hint::black_box(map.map_seq(17_777)))
    });

    c.bench_function("inv_seq_32_entries", |b| {
        b.iter(|| std::hint::black_box(map.inv_seq(17_777)))
    });
}

fn bench_checksum(c: &mut Criterion) {
    let payload = vec![0xA5u8; 1460];

    c.bench_function("checksum_1460", |b| {
        b.iter(|| {
            let mut sum = Checksum::compute(std::hint::black_box(&payload));
            std::hint::black_box(sum.finalize())
        })
    });
}

fn bench_reorder(c: &mut Criterion) {
    // Ten segments arriving fully reversed.
    let make_batch = || -> Vec<Packet<Parsed>> {
        (0..10u32)
            .rev()
            .map(|i| tcp_frame(1000 + i * 100, 100))
            .collect()
    };

    c.bench_function("reorder_insertion_reversed_10", |b| {
        b.iter_batched(
            make_batch,
            |batch| {
                let mut pool = MemoryPool::new();
                let mut st = ReorderState::default();
                let mut ro = TcpReorder::new(false);
                let mut out = Vec::with_capacity(10);
                // Anchor first so the rest is genuinely out of order.
                let anchor = tcp_frame(1000, 0);
                let _ = ro.process(&mut st, &mut pool, anchor, &mut out);
                ro.process_batch(&mut st, &mut pool, batch, &mut out);
                std::hint::black_box(out.len())
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("reorder_mergesort_reversed_10", |b| {
        b.iter_batched(
            make_batch,
            |batch| {
                let mut pool = MemoryPool::new();
                let mut st = ReorderState::default();
                let mut ro = TcpReorder::new(true);
                let mut out = Vec::with_capacity(10);
                let anchor = tcp_frame(1000, 0);
                let _ = ro.process(&mut st, &mut pool, anchor, &mut out);
                ro.process_batch(&mut st, &mut pool, batch, &mut out);
                std::hint::black_box(out.len())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_map_seq, bench_checksum, bench_reorder);
criterion_main!(benches);
