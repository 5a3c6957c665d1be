// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types for creating, reading, and rewriting network packets.
//!
//! A packet starts life [`Initialized`] (an opaque buffer with a
//! writable prefix) and becomes [`Parsed`] once the header walk has
//! validated it and recorded offsets. Only a parsed packet can be
//! classified or mutated; the typestate keeps the unchecked form out
//! of the processing path.

use super::edits::EditList;
use super::ether::EtherHdrRaw;
use super::ether::ETHER_HDR_SZ;
use super::ether::ETHER_TYPE_IPV4;
use super::ip4::Ipv4HdrRaw;
use super::ip4::IPV4_HDR_SZ;
use super::ip4::IPV4_VERSION;
use super::tcp::TcpHdrRaw;
use super::tcp::TCP_HDR_SZ;
use super::udp::UdpHdrRaw;
use super::udp::UDP_HDR_SZ;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use sme_api::Ipv4Addr;
use sme_api::Protocol;
use zerocopy::LayoutVerified;

/// Writable prefix reserved in front of a copied-in frame.
pub const PACKET_HEADROOM: usize = 32;

/// The 5-tuple naming one direction of a connection.
///
/// The same connection seen from the opposite direction is the
/// [`FlowId::mirror`] of this value.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FlowId {
    pub proto: Protocol,
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl FlowId {
    /// The same flow named from the opposite direction.
    pub fn mirror(&self) -> Self {
        Self {
            proto: self.proto,
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.proto, self.src_ip, self.src_port, self.dst_ip, self.dst_port,
        )
    }
}

/// Byte offsets of each parsed header, relative to the frame start.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderOffsets {
    pub ether: usize,
    pub ip: usize,
    /// Offset of the L4 header; for a protocol the engine does not
    /// parse this equals `payload`.
    pub ulp: usize,
    pub payload: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    BadHeader(&'static str),
    BadVersion(u8),
    TruncatedBody { declared: usize, actual: usize },
    UnsupportedEtherType(u16),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub trait PacketState {}

#[derive(Debug)]
pub struct Initialized {}

#[derive(Debug)]
pub struct Parsed {
    offsets: HeaderOffsets,
    flow: FlowId,
    payload_len: usize,
    edits: Option<EditList>,
}

impl PacketState for Initialized {}
impl PacketState for Parsed {}

/// A network packet: one owned, contiguous buffer plus typestate.
#[derive(Debug)]
pub struct Packet<S: PacketState> {
    buf: Vec<u8>,
    head: usize,
    state: S,
}

impl<S: PacketState> Packet<S> {
    /// The initialized bytes of the frame.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    /// The writable prefix available in front of the frame.
    pub fn headroom(&self) -> usize {
        self.head
    }
}

impl Packet<Initialized> {
    /// Copy `bytes` into a freshly allocated packet, reserving
    /// headroom in front.
    pub fn copy(bytes: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(PACKET_HEADROOM + bytes.len());
        buf.resize(PACKET_HEADROOM, 0);
        buf.extend_from_slice(bytes);
        Self { buf, head: PACKET_HEADROOM, state: Initialized {} }
    }

    /// Walk the headers, validating lengths as declared against the
    /// bytes actually present, and record their offsets.
    pub fn parse(self) -> Result<Packet<Parsed>, ParseError> {
        let frame = &self.buf[self.head..];

        let ether = EtherHdrRaw::parse(frame)
            .ok_or(ParseError::BadHeader("ether"))?;
        if ether.ether_type() != ETHER_TYPE_IPV4 {
            return Err(ParseError::UnsupportedEtherType(ether.ether_type()));
        }

        let ip_off = ETHER_HDR_SZ;
        let ip = Ipv4HdrRaw::parse(&frame[ip_off..])
            .ok_or(ParseError::BadHeader("ipv4"))?;
        if ip.version() != IPV4_VERSION {
            return Err(ParseError::BadVersion(ip.version()));
        }

        let ip_hdr_len = ip.hdr_len();
        let total_len = usize::from(ip.total_len());
        if ip_hdr_len < IPV4_HDR_SZ || total_len < ip_hdr_len {
            return Err(ParseError::BadHeader("ipv4 lengths"));
        }
        if frame.len() - ip_off < total_len {
            return Err(ParseError::TruncatedBody {
                declared: total_len,
                actual: frame.len() - ip_off,
            });
        }

        let proto = ip.proto();
        let ulp_off = ip_off + ip_hdr_len;
        let l4_avail = total_len - ip_hdr_len;

        let (ulp_hdr_len, src_port, dst_port) = match proto {
            Protocol::Tcp => {
                let tcp = TcpHdrRaw::parse(&frame[ulp_off..])
                    .ok_or(ParseError::BadHeader("tcp"))?;
                let hdr_len = tcp.hdr_len();
                if hdr_len < TCP_HDR_SZ || hdr_len > l4_avail {
                    return Err(ParseError::BadHeader("tcp data offset"));
                }
                (
                    hdr_len,
                    u16::from_be_bytes(tcp.src_port),
                    u16::from_be_bytes(tcp.dst_port),
                )
            }
            Protocol::Udp => {
                let udp = UdpHdrRaw::parse(&frame[ulp_off..])
                    .ok_or(ParseError::BadHeader("udp"))?;
                if l4_avail < UDP_HDR_SZ
                    || usize::from(udp.length()) != l4_avail
                {
                    return Err(ParseError::BadHeader("udp length"));
                }
                (
                    UDP_HDR_SZ,
                    u16::from_be_bytes(udp.src_port),
                    u16::from_be_bytes(udp.dst_port),
                )
            }
            _ => (0, 0, 0),
        };

        let offsets = HeaderOffsets {
            ether: 0,
            ip: ip_off,
            ulp: ulp_off,
            payload: ulp_off + ulp_hdr_len,
        };

        let flow = FlowId {
            proto,
            src_ip: ip.src(),
            src_port,
            dst_ip: ip.dst(),
            dst_port,
        };

        let payload_len = l4_avail - ulp_hdr_len;

        Ok(Packet {
            buf: self.buf,
            head: self.head,
            state: Parsed { offsets, flow, payload_len, edits: None },
        })
    }
}

impl Packet<Parsed> {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.head..]
    }

    pub fn offsets(&self) -> &HeaderOffsets {
        &self.state.offsets
    }

    pub fn flow(&self) -> &FlowId {
        &self.state.flow
    }

    pub fn ip_hdr(&self) -> LayoutVerified<&[u8], Ipv4HdrRaw> {
        let off = self.state.offsets.ip;
        // Parse validated the header bytes are present.
        Ipv4HdrRaw::parse(&self.buf[self.head + off..]).unwrap()
    }

    pub fn ip_hdr_mut(&mut self) -> LayoutVerified<&mut [u8], Ipv4HdrRaw> {
        let off = self.head + self.state.offsets.ip;
        Ipv4HdrRaw::parse_mut(&mut self.buf[off..]).unwrap()
    }

    pub fn tcp_hdr(&self) -> LayoutVerified<&[u8], TcpHdrRaw> {
        let off = self.state.offsets.ulp;
        TcpHdrRaw::parse(&self.buf[self.head + off..]).unwrap()
    }

    pub fn tcp_hdr_mut(&mut self) -> LayoutVerified<&mut [u8], TcpHdrRaw> {
        let off = self.head + self.state.offsets.ulp;
        TcpHdrRaw::parse_mut(&mut self.buf[off..]).unwrap()
    }

    pub fn udp_hdr(&self) -> LayoutVerified<&[u8], UdpHdrRaw> {
        let off = self.state.offsets.ulp;
        UdpHdrRaw::parse(&self.buf[self.head + off..]).unwrap()
    }

    pub fn udp_hdr_mut(&mut self) -> LayoutVerified<&mut [u8], UdpHdrRaw> {
        let off = self.head + self.state.offsets.ulp;
        UdpHdrRaw::parse_mut(&mut self.buf[off..]).unwrap()
    }

    /// The full L4 header including options, for option rewriting.
    pub fn ulp_hdr_bytes_mut(&mut self) -> &mut [u8] {
        let start = self.head + self.state.offsets.ulp;
        let end = self.head + self.state.offsets.payload;
        &mut self.buf[start..end]
    }

    pub fn payload_len(&self) -> usize {
        self.state.payload_len
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.head + self.state.offsets.payload;
        &self.buf[start..start + self.state.payload_len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.head + self.state.offsets.payload;
        &mut self.buf[start..start + self.state.payload_len]
    }

    /// Open a hole of `data.len()` bytes at payload offset `off` and
    /// fill it. Only the buffer moves; the length fields in the L3/L4
    /// headers are the caller's to fix.
    pub fn insert_payload_bytes(&mut self, off: usize, data: &[u8]) {
        let off = off.min(self.state.payload_len);
        let at = self.head + self.state.offsets.payload + off;
        // Splice-in via tail copy.
        let tail: Vec<u8> = self.buf[at..].to_vec();
        self.buf.truncate(at);
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(&tail);
        self.state.payload_len += data.len();
    }

    /// Remove `n` bytes at payload offset `off`, clamped to the
    /// payload's end. Returns the number of bytes actually removed.
    pub fn remove_payload_bytes(&mut self, off: usize, n: usize) -> usize {
        let off = off.min(self.state.payload_len);
        let n = n.min(self.state.payload_len - off);
        let at = self.head + self.state.offsets.payload + off;
        self.buf.drain(at..at + n);
        self.state.payload_len -= n;
        n
    }

    /// Replace the payload wholesale (retransmit alignment).
    pub fn replace_payload(&mut self, data: &[u8]) {
        let start = self.head + self.state.offsets.payload;
        let end = start + self.state.payload_len;
        self.buf.splice(start..end, data.iter().copied());
        self.state.payload_len = data.len();
    }

    // ================================================================
    // The edit log riding along with this packet.
    // ================================================================

    pub fn attach_edits(&mut self, edits: EditList) {
        self.state.edits = Some(edits);
    }

    pub fn edits_mut(&mut self) -> Option<&mut EditList> {
        self.state.edits.as_mut()
    }

    pub fn take_edits(&mut self) -> Option<EditList> {
        self.state.edits.take()
    }
}
