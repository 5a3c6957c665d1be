// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IPv4 header access and rewriting.
//!
//! [`Ipv4HdrRaw`] is the raw byte view; [`IpHelpers`] is the
//! capability trait elements compose when they need to read or fix up
//! the L3 header of a parsed packet.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use super::packet::Packet;
use super::packet::Parsed;
use core::mem::size_of;
use sme_api::Ipv4Addr;
use sme_api::Protocol;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::LayoutVerified;
use zerocopy::Unaligned;

pub const IPV4_HDR_SZ: usize = size_of::<Ipv4HdrRaw>();
pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_VERSION: u8 = 4;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    pub fn parse(src: &[u8]) -> Option<LayoutVerified<&[u8], Self>> {
        LayoutVerified::new(src.get(..size_of::<Self>())?)
    }

    pub fn parse_mut(
        dst: &mut [u8],
    ) -> Option<LayoutVerified<&mut [u8], Self>> {
        LayoutVerified::new(dst.get_mut(..size_of::<Self>())?)
    }

    /// The header length in bytes, as declared by the IHL field.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4
    }

    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.total_len)
    }

    pub fn set_total_len(&mut self, len: u16) {
        self.total_len = len.to_be_bytes();
    }

    pub fn proto(&self) -> Protocol {
        Protocol::from(self.proto)
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }
}

/// IPv4 header operations over a parsed packet.
///
/// Elements which touch L3 compose this capability; the methods all
/// key off the packet's recorded header offsets, so they stay correct
/// regardless of where the frame's L2 ends.
pub trait IpHelpers {
    /// The declared total length (header + payload) of the packet.
    fn ip_total_len(&self, pkt: &Packet<Parsed>) -> u16 {
        pkt.ip_hdr().total_len()
    }

    /// Set the declared total length.
    fn set_ip_total_len(&self, pkt: &mut Packet<Parsed>, len: u16) {
        pkt.ip_hdr_mut().set_total_len(len);
    }

    fn ip_src(&self, pkt: &Packet<Parsed>) -> Ipv4Addr {
        pkt.ip_hdr().src()
    }

    fn ip_dst(&self, pkt: &Packet<Parsed>) -> Ipv4Addr {
        pkt.ip_hdr().dst()
    }

    /// Recompute the IP header checksum: the checksum field is zeroed
    /// and the one's complement sum folded over the header bytes.
    fn compute_ip_checksum(&self, pkt: &mut Packet<Parsed>) {
        let off = pkt.offsets().ip;
        let hdr_len = pkt.ip_hdr().hdr_len();
        let bytes = pkt.bytes_mut();
        bytes[off + 10] = 0;
        bytes[off + 11] = 0;
        let hc =
            HeaderChecksum::from(Checksum::compute(&bytes[off..off + hdr_len]));
        bytes[off + 10..off + 12].copy_from_slice(&hc.bytes());
    }
}
