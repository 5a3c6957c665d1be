// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! TCP header access, sequence arithmetic, and rewriting.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use super::packet::Packet;
use super::packet::Parsed;
use crate::bit_on;
use core::fmt;
use core::fmt::Display;
use core::mem::size_of;
use heapless::Vec as FVec;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::LayoutVerified;
use zerocopy::Unaligned;

pub const TCP_HDR_SZ: usize = size_of::<TcpHdrRaw>();

/// The most SACK blocks a legal header can carry (40 bytes of options:
/// 4 blocks of 8 bytes + 2 bytes of option header).
pub const SACK_BLOCKS_MAX: usize = 4;

const TCP_OPT_END: u8 = 0;
const TCP_OPT_NOP: u8 = 1;
const TCP_OPT_SACK: u8 = 5;

/// The standard TCP flags. We don't bother with the experimental NS
/// flag.
pub mod TcpFlags {
    use super::bit_on;

    pub const FIN: u8 = bit_on(0);
    pub const SYN: u8 = bit_on(1);
    pub const RST: u8 = bit_on(2);
    pub const PSH: u8 = bit_on(3);
    pub const ACK: u8 = bit_on(4);
    pub const URG: u8 = bit_on(5);
}

/// The connection states the engine distinguishes.
///
/// This is deliberately coarser than the endpoint state machine: the
/// engine sits mid-path and only needs to know whether a connection is
/// being set up, carrying data, half closed, or done.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TcpState {
    Listen,
    SynSeen,
    Established,
    CloseWait,
    Closed,
}

impl Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TcpState::Listen => "LISTEN",
            TcpState::SynSeen => "SYN_SEEN",
            TcpState::Established => "ESTABLISHED",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

// Sequence-space (serial) comparison: `a` is before `b` when the
// wrapped difference is negative.
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub fn seq_leq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

pub fn seq_geq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub win: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl TcpHdrRaw {
    pub fn parse(src: &[u8]) -> Option<LayoutVerified<&[u8], Self>> {
        LayoutVerified::new(src.get(..size_of::<Self>())?)
    }

    pub fn parse_mut(
        dst: &mut [u8],
    ) -> Option<LayoutVerified<&mut [u8], Self>> {
        LayoutVerified::new(dst.get_mut(..size_of::<Self>())?)
    }

    /// The header length in bytes, as declared by the data offset.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.offset >> 4) * 4
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes(self.seq)
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.seq = seq.to_be_bytes();
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes(self.ack)
    }

    pub fn set_ack(&mut self, ack: u32) {
        self.ack = ack.to_be_bytes();
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes(self.win)
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        (self.flags & flag) != 0
    }
}

/// A SACK block in the option area: `[start, end)` byte offsets into
/// the TCP header, plus the block's edges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SackBlock {
    /// Byte offset of the block within the TCP header.
    pub off: usize,
    pub left: u32,
    pub right: u32,
}

/// Walk the option area of a TCP header and collect the SACK blocks.
///
/// `tcp` must be the full TCP header (base header + options). A
/// truncated or garbled option area yields the blocks found up to that
/// point; the engine never drops a packet for bad options it does not
/// itself need.
pub fn sack_blocks(tcp: &[u8]) -> FVec<SackBlock, SACK_BLOCKS_MAX> {
    let mut blocks = FVec::new();
    let mut off = TCP_HDR_SZ;

    while off < tcp.len() {
        match tcp[off] {
            TCP_OPT_END => break,
            TCP_OPT_NOP => {
                off += 1;
            }
            kind => {
                let Some(&len) = tcp.get(off + 1) else { break };
                let len = usize::from(len);
                if len < 2 || off + len > tcp.len() {
                    break;
                }

                if kind == TCP_OPT_SACK {
                    let mut b = off + 2;
                    while b + 8 <= off + len {
                        let left = u32::from_be_bytes([
                            tcp[b], tcp[b + 1], tcp[b + 2], tcp[b + 3],
                        ]);
                        let right = u32::from_be_bytes([
                            tcp[b + 4], tcp[b + 5], tcp[b + 6], tcp[b + 7],
                        ]);
                        if blocks.push(SackBlock { off: b, left, right }).is_err()
                        {
                            return blocks;
                        }
                        b += 8;
                    }
                }

                off += len;
            }
        }
    }

    blocks
}

/// Rewrite each SACK block edge in place with `f`.
pub fn rewrite_sack_blocks(tcp: &mut [u8], f: impl Fn(u32) -> u32) {
    for block in sack_blocks(tcp) {
        tcp[block.off..block.off + 4]
            .copy_from_slice(&f(block.left).to_be_bytes());
        tcp[block.off + 4..block.off + 8]
            .copy_from_slice(&f(block.right).to_be_bytes());
    }
}

/// TCP header operations over a parsed packet.
pub trait TcpHelpers {
    fn tcp_seq(&self, pkt: &Packet<Parsed>) -> u32 {
        pkt.tcp_hdr().seq()
    }

    fn tcp_ack(&self, pkt: &Packet<Parsed>) -> u32 {
        pkt.tcp_hdr().ack()
    }

    fn tcp_flags(&self, pkt: &Packet<Parsed>) -> u8 {
        pkt.tcp_hdr().flags
    }

    /// The number of sequence numbers this segment occupies: its
    /// payload, plus one for SYN and one for FIN.
    fn seq_span(&self, pkt: &Packet<Parsed>) -> u32 {
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

    /// Recompute the TCP checksum over pseudo-header, header, and
    /// payload.
    fn compute_tcp_checksum(&self, pkt: &mut Packet<Parsed>) {
        let ip_off = pkt.offsets().ip;
        let ulp_off = pkt.offsets().ulp;
        let tcp_len = pkt.len() - ulp_off;

        let mut pseudo = [0u8; 12];
        {
            let bytes = pkt.bytes();
            pseudo[0..4].copy_from_slice(&bytes[ip_off + 12..ip_off + 16]);
            pseudo[4..8].copy_from_slice(&bytes[ip_off + 16..ip_off + 20]);
            pseudo[9] = bytes[ip_off + 9];
            pseudo[10..12].copy_from_slice(&(tcp_len as u16).to_be_bytes());
        }

        let bytes = pkt.bytes_mut();
        bytes[ulp_off + 16] = 0;
        bytes[ulp_off + 17] = 0;

        let mut sum = Checksum::compute(&pseudo);
        sum.add_bytes(&bytes[ulp_off..]);
        let hc = HeaderChecksum::from(sum);
        bytes[ulp_off + 16..ulp_off + 18].copy_from_slice(&hc.bytes());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serial_compare() {
        assert!(seq_lt(1000, 1001));
        assert!(!seq_lt(1001, 1001));
        assert!(seq_leq(1001, 1001));
        // Comparison survives the wrap.
        assert!(seq_lt(0xFFFF_FFF0, 0x10));
        assert!(seq_gt(0x10, 0xFFFF_FFF0));
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let hdr = [
            0x01, 0xbb, 0x94, 0x02,             // ports
            0x00, 0x00, 0x03, 0xe8,             // seq = 1000
            0x00, 0x00, 0x13, 0x88,             // ack = 5000
            0x50, 0x12,                         // offset 5, SYN|ACK
            0xff, 0xff, 0x00, 0x00, 0x00, 0x00, // win, csum, urg
        ];
        let tcp = TcpHdrRaw::parse(&hdr).unwrap();
        assert_eq!(tcp.seq(), 1000);
        assert_eq!(tcp.ack(), 5000);
        assert_eq!(tcp.hdr_len(), 20);
        assert!(tcp.has_flag(TcpFlags::SYN));
        assert!(tcp.has_flag(TcpFlags::ACK));
        assert!(!tcp.has_flag(TcpFlags::FIN));
    }

    #[test]
    fn sack_walk_and_rewrite() {
        // 20-byte base header + NOP NOP + SACK(len 10) with one block
        // [2000, 3000).
        let mut tcp = vec![0u8; 32];
        tcp[12] = 0x80; // data offset 8 words
        tcp[20] = TCP_OPT_NOP;
        tcp[21] = TCP_OPT_NOP;
        tcp[22] = TCP_OPT_SACK;
        tcp[23] = 10;
        tcp[24..28].copy_from_slice(&2000u32.to_be_bytes());
        tcp[28..32].copy_from_slice(&3000u32.to_be_bytes());

        let blocks = sack_blocks(&tcp);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].left, 2000);
        assert_eq!(blocks[0].right, 3000);

        rewrite_sack_blocks(&mut tcp, |edge| edge + 4);
        let blocks = sack_blocks(&tcp);
        assert_eq!(blocks[0].left, 2004);
        assert_eq!(blocks[0].right, 3004);
    }

    #[test]
    fn sack_truncated_option() {
        let mut tcp = vec![0u8; 24];
        tcp[12] = 0x60;
        tcp[20] = TCP_OPT_SACK;
        tcp[21] = 10; // claims 10 bytes, only 4 remain
        assert!(sack_blocks(&tcp).is_empty());
    }
}
