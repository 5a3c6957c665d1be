// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Byte mutation for UDP sessions.
//!
//! UDP has no sequence space, so the mutation vocabulary is the same
//! as TCP's but without any mapping state: bytes shift, the two
//! length fields follow, and both checksums are recomputed on the
//! spot. Each datagram stands alone.

use super::classify::SessionContext;
use super::classify::SESSION_CTX_TUPLE;
use super::element::config_err;
use super::element::Args;
use super::element::Element;
use super::element::PacketBatch;
use super::element::Processing;
use super::element::WorkerCtx;
use super::ip4::IpHelpers;
use super::packet::Packet;
use super::packet::Parsed;
use super::udp::compute_udp_checksum;
use sme_api::SmeError;

#[derive(Clone, Copy, Debug, Default)]
pub struct UdpInCounters {
    pub datagrams: u64,
    pub bytes_inserted: u64,
    pub bytes_removed: u64,
}

pub struct UdpIn {
    session_ctx: SessionContext,
    pub counters: UdpInCounters,
}

impl IpHelpers for UdpIn {}

impl Default for UdpIn {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpIn {
    pub fn new() -> Self {
        // The stock 5-tuple fingerprint always parses.
        let session_ctx = SessionContext::parse(SESSION_CTX_TUPLE).unwrap();
        Self { session_ctx, counters: UdpInCounters::default() }
    }

    pub fn session_ctx(&self) -> &SessionContext {
        &self.session_ctx
    }

    /// Insert `data` at payload offset `off`, fixing lengths and
    /// checksums immediately.
    pub fn insert_bytes(
        &mut self,
        pkt: &mut Packet<Parsed>,
        off: u32,
        data: &[u8],
    ) {
        pkt.insert_payload_bytes(off as usize, data);
        self.counters.bytes_inserted += data.len() as u64;
        self.fix_headers(pkt);
    }

    /// Remove up to `n` bytes at payload offset `off`, fixing lengths
    /// and checksums immediately. Returns the bytes actually removed.
    pub fn remove_bytes(
        &mut self,
        pkt: &mut Packet<Parsed>,
        off: u32,
        n: u32,
    ) -> usize {
        let removed = pkt.remove_payload_bytes(off as usize, n as usize);
        self.counters.bytes_removed += removed as u64;
        self.fix_headers(pkt);
        removed
    }

    fn fix_headers(&self, pkt: &mut Packet<Parsed>) {
        let ip_total =
            pkt.offsets().payload - pkt.offsets().ip + pkt.payload_len();
        let udp_len =
            pkt.offsets().payload - pkt.offsets().ulp + pkt.payload_len();

        self.set_ip_total_len(pkt, ip_total as u16);
        pkt.udp_hdr_mut().set_length(udp_len as u16);
        compute_udp_checksum(pkt);
        self.compute_ip_checksum(pkt);
    }
}

impl Element for UdpIn {
    fn class_name(&self) -> &'static str {
        "UdpIn"
    }

    fn processing(&self) -> Processing {
        Processing::Agnostic
    }

    fn configure(&mut self, conf: &[String]) -> Result<(), SmeError> {
        let class = self.class_name();
        let mut args = Args::parse(conf).map_err(|e| config_err(class, e))?;
        let ctx: String = args
            .optional("CONTEXT", SESSION_CTX_TUPLE.to_string())
            .map_err(|e| config_err(class, e))?;
        self.session_ctx =
            SessionContext::parse(&ctx).map_err(|e| config_err(class, e))?;
        args.finish().map_err(|e| config_err(class, e))
    }

    fn push_batch(
        &mut self,
        _port: u16,
        batch: PacketBatch,
        _ctx: &mut WorkerCtx,
    ) -> PacketBatch {
        self.counters.datagrams += batch.len() as u64;
        batch
    }
}
