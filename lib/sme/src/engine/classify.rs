// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Session classification: from packet bytes to a flow control block.
//!
//! Which bytes identify a session is configuration, not code: a
//! session context is a list of `offset/value/mask` triples naming
//! byte ranges of the L3 header. The stock context
//! [`SESSION_CTX_TUPLE`] selects the usual 5-tuple fields. The
//! triples are validated when the element is configured; a lookup can
//! never run against an empty or unparseable context.

use super::fcb::FcbEntry;
use super::fcb::FcbTable;
use super::packet::FlowId;
use super::packet::Packet;
use super::packet::Parsed;
use super::ParseErr;
use super::ParseResult;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Moment;
use sme_api::Direction;
use sme_api::Ipv4Addr;
use sme_api::SmeError;
use std::sync::Arc;

/// The 5-tuple fingerprint: source address, destination address,
/// source port, destination port.
pub const SESSION_CTX_TUPLE: &str =
    "12/0/ffffffff 16/0/ffffffff 20/0/ffff 22/0/ffff";

/// The role a fingerprint field plays in the flow key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FieldRole {
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct FieldSpec {
    offset: usize,
    mask: u64,
    width: usize,
    role: FieldRole,
}

/// A parsed session-context fingerprint.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionContext {
    fields: Vec<FieldSpec>,
}

impl SessionContext {
    /// Parse a fingerprint string of whitespace-separated
    /// `offset/value/mask` triples. The mask's hex width is the
    /// field's byte width. The value must be zero: these fields are
    /// collected into the key, not matched against constants.
    pub fn parse(s: &str) -> ParseResult<Self> {
        let mut fields = Vec::new();

        for triple in s.split_whitespace() {
            let mut parts = triple.split('/');
            let (Some(off_s), Some(val_s), Some(mask_s), None) = (
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
            ) else {
                return Err(ParseErr::BadToken(triple.to_string()));
            };

            let offset: usize = off_s.parse()?;
            let value = u64::from_str_radix(val_s, 16)
                .map_err(|_| ParseErr::BadToken(val_s.to_string()))?;
            if value != 0 {
                return Err(ParseErr::BadToken(triple.to_string()));
            }

            let mask = u64::from_str_radix(mask_s, 16)
                .map_err(|_| ParseErr::BadToken(mask_s.to_string()))?;
            let width = mask_s.len().div_ceil(2);

            let role = match (offset, width) {
                (12, 4) => FieldRole::SrcIp,
                (16, 4) => FieldRole::DstIp,
                (20, 2) => FieldRole::SrcPort,
                (22, 2) => FieldRole::DstPort,
                _ => return Err(ParseErr::BadToken(triple.to_string())),
            };

            fields.push(FieldSpec { offset, mask, width, role });
        }

        if fields.is_empty() {
            // An empty fingerprint would classify every packet into
            // one session; refuse it outright.
            return Err(ParseErr::Malformed);
        }

        Ok(Self { fields })
    }

    /// Assemble the flow key from a parsed packet's L3 bytes.
    pub fn flow_of(&self, pkt: &Packet<Parsed>) -> FlowId {
        let l3 = &pkt.bytes()[pkt.offsets().ip..];
        let mut flow =
            FlowId { proto: pkt.flow().proto, ..Default::default() };

        for f in &self.fields {
            let raw = read_be(l3, f.offset, f.width) & f.mask;
            match f.role {
                FieldRole::SrcIp => flow.src_ip = Ipv4Addr::from(raw as u32),
                FieldRole::DstIp => flow.dst_ip = Ipv4Addr::from(raw as u32),
                FieldRole::SrcPort => flow.src_port = raw as u16,
                FieldRole::DstPort => flow.dst_port = raw as u16,
            }
        }

        flow
    }
}

fn read_be(bytes: &[u8], offset: usize, width: usize) -> u64 {
    let mut val = 0u64;
    for i in 0..width {
        val = (val << 8) | u64::from(*bytes.get(offset + i).unwrap_or(&0));
    }
    val
}

/// Resolves packets to their flow control block.
#[derive(Clone, Debug)]
pub struct Classifier {
    ctx: SessionContext,
    table: Arc<KMutex<FcbTable>>,
}

impl Classifier {
    pub fn new(ctx: SessionContext, table: Arc<KMutex<FcbTable>>) -> Self {
        Self { ctx, table }
    }

    pub fn table(&self) -> &Arc<KMutex<FcbTable>> {
        &self.table
    }

    /// Find (or create) the control block for this packet. The table
    /// lock is held only for the lookup itself.
    pub fn classify(
        &self,
        pkt: &Packet<Parsed>,
        now: Moment,
    ) -> Result<(Arc<FcbEntry>, Direction), SmeError> {
        let flow = self.ctx.flow_of(pkt);
        self.table.lock().lookup_or_create(&flow, now)
    }
}
