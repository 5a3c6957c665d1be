// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The top-level owner of per-port state.
//!
//! A [`System`] maps each port to its flow table and counters. It is
//! built once at startup, handed to the embedding dataplane, and torn
//! down deterministically when dropped; nothing here lives in a
//! process-wide global.

use super::fcb::FcbTable;
use super::ioctl::DumpFlowsResp;
use super::ioctl::DumpStatsReq;
use super::ioctl::DumpStatsResp;
use super::ioctl::Handler;
use super::ioctl::HandlerRegistry;
use super::ioctl::PortStats;
use super::element::WorkerCtx;
use super::packet::Packet;
use super::packet::Parsed;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Moment;
use crate::ExecCtx;
use crate::LogLevel;
use core::num::NonZeroU32;
use sme_api::cmd::encode_resp;
use sme_api::SmeError;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type PortId = u16;

pub const PORT_FCB_LIMIT: u32 = 8192;

/// Everything one port owns.
pub struct PortState {
    pub fcb_table: Arc<KMutex<FcbTable>>,
    pub stats: PortStats,
}

pub struct System {
    ectx: ExecCtx,
    ports: BTreeMap<PortId, PortState>,
}

impl System {
    pub fn new(ectx: ExecCtx) -> Self {
        Self { ectx, ports: BTreeMap::new() }
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        self.ectx.log.log(level, msg);
    }

    /// Bring up a port, creating its flow table.
    pub fn add_port(&mut self, id: PortId) -> Result<(), SmeError> {
        if self.ports.contains_key(&id) {
            return Err(SmeError::PortExists(id));
        }

        let name = format!("port{}-fcb", id);
        let table = FcbTable::new(
            &name,
            NonZeroU32::new(PORT_FCB_LIMIT).unwrap(),
            None,
        );
        self.ports.insert(
            id,
            PortState {
                fcb_table: Arc::new(KMutex::new(table)),
                stats: PortStats::default(),
            },
        );
        Ok(())
    }

    pub fn remove_port(&mut self, id: PortId) -> Result<(), SmeError> {
        self.ports.remove(&id).ok_or(SmeError::PortNotFound(id))?;
        Ok(())
    }

    pub fn port(&self, id: PortId) -> Result<&PortState, SmeError> {
        self.ports.get(&id).ok_or(SmeError::PortNotFound(id))
    }

    pub fn port_mut(&mut self, id: PortId) -> Result<&mut PortState, SmeError> {
        self.ports.get_mut(&id).ok_or(SmeError::PortNotFound(id))
    }

    /// Parse a frame arriving on `id`. A malformed frame is absorbed
    /// here: counted, logged, dropped.
    pub fn parse_frame(
        &mut self,
        id: PortId,
        bytes: &[u8],
    ) -> Option<Packet<Parsed>> {
        match Packet::copy(bytes).parse() {
            Ok(pkt) => Some(pkt),
            Err(e) => {
                if let Ok(port) = self.port_mut(id) {
                    port.stats.malformed += 1;
                }
                self.log(
                    LogLevel::Note,
                    &format!("port {}: dropped malformed frame: {}", id, e),
                );
                None
            }
        }
    }

    /// Reap dead flows on a port, releasing the hold-list nodes their
    /// reorder state still references.
    ///
    /// Must run on the worker owning `ctx`: the pools holding a
    /// flow's nodes belong to the worker that processed it.
    pub fn expire_flows(
        &mut self,
        id: PortId,
        now: Moment,
        ctx: &mut WorkerCtx,
    ) -> Result<usize, SmeError> {
        let table = Arc::clone(
            &self.ports.get(&id).ok_or(SmeError::PortNotFound(id))?.fcb_table,
        );

        let dead = table.lock().reap(now);
        let mut flushed = 0;

        for (flow, entry) in &dead {
            let mut fcb = entry.lock();
            for st in fcb.reorder.iter_mut() {
                flushed += st.flush(&mut ctx.hold_pool);
            }
            self.log(
                LogLevel::Note,
                &format!("port {}: reaped flow {}", id, flow),
            );
        }

        let port = self.ports.get_mut(&id).ok_or(SmeError::PortNotFound(id))?;
        port.stats.flows_reaped += dead.len() as u64;
        port.stats.held_flushed += flushed as u64;
        Ok(dead.len())
    }

    pub fn dump_flows(&self, id: PortId) -> Result<DumpFlowsResp, SmeError> {
        let port = self.port(id)?;
        Ok(DumpFlowsResp { flows: port.fcb_table.lock().dump() })
    }

    pub fn dump_stats(&self, id: PortId) -> Result<DumpStatsResp, SmeError> {
        Ok(DumpStatsResp { stats: self.port(id)?.stats })
    }

    /// The stock handler set: flow and stat dumps per port, and flow
    /// clearing. The registry is owned by the embedding, next to the
    /// `System` itself.
    pub fn default_handlers() -> HandlerRegistry<System> {
        let mut reg = HandlerRegistry::new();

        // Registration of static names cannot collide.
        reg.register(
            "system",
            "flows",
            Handler::Write(Box::new(|sys: &mut System, arg: &str| {
                let req: DumpStatsReq = parse_port_arg(arg)?;
                let resp = sys.dump_flows(req.port)?;
                encode_resp(&resp)
            })),
        )
        .unwrap();

        reg.register(
            "system",
            "stats",
            Handler::Write(Box::new(|sys: &mut System, arg: &str| {
                let req: DumpStatsReq = parse_port_arg(arg)?;
                let resp = sys.dump_stats(req.port)?;
                encode_resp(&resp)
            })),
        )
        .unwrap();

        reg.register(
            "system",
            "delete_flows",
            Handler::Delete(Box::new(|sys: &mut System, arg: &str| {
                let req: DumpStatsReq = parse_port_arg(arg)?;
                let port = sys.port_mut(req.port)?;
                // The admin path cannot reach per-worker pools; the
                // next worker-side sweep releases any nodes the
                // cleared flows still held.
                port.fcb_table.lock().clear();
                encode_resp(&())
            })),
        )
        .unwrap();

        reg
    }
}

fn parse_port_arg(arg: &str) -> Result<DumpStatsReq, SmeError> {
    let port = arg
        .trim()
        .parse::<u16>()
        .map_err(|_| SmeError::DeserCmdReq(format!("bad port: {}", arg)))?;
    Ok(DumpStatsReq { port })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::packet::test::tcp_pkt;
    use crate::engine::packet::test::test_flow;
    use crate::engine::tcp::TcpFlags;

    fn test_system() -> System {
        System::new(ExecCtx::with_println())
    }

    #[test]
    fn port_lifecycle() {
        let mut sys = test_system();
        sys.add_port(0).unwrap();
        assert_eq!(sys.add_port(0), Err(SmeError::PortExists(0)));
        assert!(sys.port(0).is_ok());
        sys.remove_port(0).unwrap();
        assert_eq!(sys.remove_port(0), Err(SmeError::PortNotFound(0)));
    }

    #[test]
    fn malformed_frame_counted() {
        let mut sys = test_system();
        sys.add_port(0).unwrap();

        assert!(sys.parse_frame(0, &[0u8; 10]).is_none());
        assert_eq!(sys.port(0).unwrap().stats.malformed, 1);
    }

    #[test]
    fn good_frame_parses() {
        let mut sys = test_system();
        sys.add_port(0).unwrap();

        let pkt = tcp_pkt(&test_flow(), 1, 0, TcpFlags::SYN, b"");
        let frame = pkt.bytes().to_vec();
        assert!(sys.parse_frame(0, &frame).is_some());
        assert_eq!(sys.port(0).unwrap().stats.malformed, 0);
    }

    #[test]
    fn handler_round_trip() {
        use sme_api::cmd::decode_resp;

        let mut sys = test_system();
        sys.add_port(3).unwrap();

        let reg = System::default_handlers();
        let out = reg.write(&mut sys, "system", "stats", "3").unwrap();
        let resp: DumpStatsResp = decode_resp(&out).unwrap();
        assert_eq!(resp.stats.malformed, 0);

        assert!(reg.write(&mut sys, "system", "stats", "9").is_err());
        assert!(reg.read(&sys, "system", "bogus").is_err());
    }
}
