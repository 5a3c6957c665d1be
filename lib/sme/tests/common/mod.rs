// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Test helpers: packet construction and capture.

use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::Linktype;
use pcap_parser::PcapHeader;
use pcap_parser::ToVec;
use sme::engine::checksum::Checksum;
use sme::engine::checksum::HeaderChecksum;
use sme::engine::packet::FlowId;
use sme::engine::packet::Packet;
use sme::engine::packet::Parsed;
use sme_api::Protocol;
use std::fs::File;
use std::io::Write;

pub const ETHER_HDR_SZ: usize = 14;
pub const IPV4_HDR_SZ: usize = 20;
pub const TCP_HDR_SZ: usize = 20;

pub fn client_flow() -> FlowId {
    FlowId {
        proto: Protocol::Tcp,
        src_ip: "192.168.10.5".parse().unwrap(),
        src_port: 49152,
        dst_ip: "93.184.216.34".parse().unwrap(),
        dst_port: 80,
    }
}

/// Build a wire-valid ether+IPv4+TCP frame and parse it.
pub fn tcp_seg(
    flow: &FlowId,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Packet<Parsed> {
    let total_len = IPV4_HDR_SZ + TCP_HDR_SZ + payload.len();
    let mut frame = vec![0u8; ETHER_HDR_SZ + total_len];
    frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());

    {
        let ip = &mut frame[ETHER_HDR_SZ..];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = Protocol::Tcp as u8;
        ip[12..16].copy_from_slice(&flow.src_ip.bytes());
        ip[16..20].copy_from_slice(&flow.dst_ip.bytes());
        let hc = HeaderChecksum::from(Checksum::compute(&ip[..IPV4_HDR_SZ]));
        ip[10..12].copy_from_slice(&hc.bytes());
    }

    {
        let (ip, tcp) = frame[ETHER_HDR_SZ..].split_at_mut(IPV4_HDR_SZ);
        tcp[0..2].copy_from_slice(&flow.src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&flow.dst_port.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[12] = 0x50;
        tcp[13] = flags;
        tcp[14..16].copy_from_slice(&16384u16.to_be_bytes());
        tcp[TCP_HDR_SZ..].copy_from_slice(payload);

        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&ip[12..16]);
        pseudo[4..8].copy_from_slice(&ip[16..20]);
        pseudo[9] = ip[9];
        pseudo[10..12].copy_from_slice(&(tcp.len() as u16).to_be_bytes());
        let mut sum = Checksum::compute(&pseudo);
        sum.add_bytes(tcp);
        let hc = HeaderChecksum::from(sum);
        tcp[16..18].copy_from_slice(&hc.bytes());
    }

    Packet::copy(&frame).parse().unwrap()
}

/// Verify the IP header checksum folds to all-ones.
pub fn ip_csum_ok(pkt: &Packet<Parsed>) -> bool {
    let off = pkt.offsets().ip;
    let hdr_len = pkt.ip_hdr().hdr_len();
    let mut sum = Checksum::compute(&pkt.bytes()[off..off + hdr_len]);
    sum.finalize() == 0xFFFF
}

/// Verify the TCP checksum over pseudo-header and segment folds to
/// all-ones.
pub fn tcp_csum_ok(pkt: &Packet<Parsed>) -> bool {
    let ip_off = pkt.offsets().ip;
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
    sum.finalize() == 0xFFFF
}

/// Write processed packets out as a classic pcap, for inspection when
/// a scenario goes sideways.
pub struct PcapBuilder {
    file: File,
}

impl PcapBuilder {
    pub fn new(path: &std::path::Path) -> Self {
        let mut file = File::create(path).unwrap();

        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 1500,
            network: Linktype::ETHERNET,
        };

        file.write_all(&hdr.to_vec().unwrap()).unwrap();

        Self { file }
    }

    pub fn add_pkt(&mut self, pkt: &Packet<Parsed>) {
        let pkt_bytes = pkt.bytes();
        let mut block = LegacyPcapBlock {
            ts_sec: 7777,
            ts_usec: 7777,
            caplen: pkt_bytes.len() as u32,
            origlen: pkt_bytes.len() as u32,
            data: pkt_bytes,
        };

        self.file.write_all(&block.to_vec().unwrap()).unwrap();
    }
}
