// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! UDP header access and rewriting.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use super::packet::Packet;
use super::packet::Parsed;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::LayoutVerified;
use zerocopy::Unaligned;

pub const UDP_HDR_SZ: usize = size_of::<UdpHdrRaw>();

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub length: [u8; 2],
    pub csum: [u8; 2],
}

impl UdpHdrRaw {
    pub fn parse(src: &[u8]) -> Option<LayoutVerified<&[u8], Self>> {
        LayoutVerified::new(src.get(..size_of::<Self>())?)
    }

    pub fn parse_mut(
        dst: &mut [u8],
    ) -> Option<LayoutVerified<&mut [u8], Self>> {
        LayoutVerified::new(dst.get_mut(..size_of::<Self>())?)
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes(self.length)
    }

    pub fn set_length(&mut self, len: u16) {
        self.length = len.to_be_bytes();
    }
}

/// Recompute the UDP checksum over pseudo-header, header, and payload.
///
/// A zero UDP checksum means "not computed"; the engine always
/// computes one on segments it has modified, mapping a computed value
/// of zero to `0xFFFF` as the protocol requires.
pub fn compute_udp_checksum(pkt: &mut Packet<Parsed>) {
    let ip_off = pkt.offsets().ip;
    let ulp_off = pkt.offsets().ulp;
    let udp_len = pkt.len() - ulp_off;

    let mut pseudo = [0u8; 12];
    {
        let bytes = pkt.bytes();
        pseudo[0..4].copy_from_slice(&bytes[ip_off + 12..ip_off + 16]);
        pseudo[4..8].copy_from_slice(&bytes[ip_off + 16..ip_off + 20]);
        pseudo[9] = bytes[ip_off + 9];
        pseudo[10..12].copy_from_slice(&(udp_len as u16).to_be_bytes());
    }

    let bytes = pkt.bytes_mut();
    bytes[ulp_off + 6] = 0;
    bytes[ulp_off + 7] = 0;

    let mut sum = Checksum::compute(&pseudo);
    sum.add_bytes(&bytes[ulp_off..]);
    let mut out = HeaderChecksum::from(sum).bytes();
    if out == [0, 0] {
        out = [0xFF, 0xFF];
    }
    bytes[ulp_off + 6..ulp_off + 8].copy_from_slice(&out);
}
