// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The mid-path TCP connection state machine.
//!
//! The engine is neither endpoint, so it tracks the connection only
//! as far as its own needs go: has the handshake been seen, is data
//! flowing, is either side closing. Both directions advance one
//! shared state.

use super::packet::FlowId;
use super::tcp::TcpFlags;
use super::tcp::TcpState;
use core::fmt;
use sme_api::Direction;

/// A segment the state machine cannot reconcile with the flow's
/// current state. The flow is reset and the segment dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct UnexpectedSegment {
    pub direction: Direction,
    pub flow_id: FlowId,
    pub state: TcpState,
    pub flags: u8,
}

impl fmt::Display for UnexpectedSegment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unexpected TCP segment, direction: {}, flow: {}, \
             state: {}, flags: 0x{:x}",
            self.direction, self.flow_id, self.state, self.flags,
        )
    }
}

/// Tracks which TCP state the flow is currently in, as well as the
/// latest seq/ack values seen in each direction.
///
/// The seq/ack numbers are wrapped in `Option` on purpose: 0 is a
/// valid sequence number, so a sentinel would be a bug waiting to
/// happen. `None` means the value has genuinely never been seen.
#[derive(Clone, Copy, Debug)]
pub struct TcpFlowState {
    tcp_state: TcpState,
    fin_seen: [bool; 2],
    last_seq: [Option<u32>; 2],
    last_ack: [Option<u32>; 2],
}

impl Default for TcpFlowState {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpFlowState {
    pub fn new() -> Self {
        Self {
            tcp_state: TcpState::Listen,
            fin_seen: [false; 2],
            last_seq: [None; 2],
            last_ack: [None; 2],
        }
    }

    pub fn tcp_state(&self) -> TcpState {
        self.tcp_state
    }

    pub fn last_seq(&self, dir: Direction) -> Option<u32> {
        self.last_seq[dir.idx()]
    }

    pub fn last_ack(&self, dir: Direction) -> Option<u32> {
        self.last_ack[dir.idx()]
    }

    /// Both directions have sent their FIN, or the flow was reset.
    pub fn is_closed(&self) -> bool {
        self.tcp_state == TcpState::Closed
    }

    /// At least one direction has sent its FIN.
    pub fn is_closing(&self) -> bool {
        self.tcp_state == TcpState::CloseWait || self.is_closed()
    }

    /// Advance the state machine for a segment with `flags` seen in
    /// `dir`. On an irreconcilable segment the flow moves to CLOSED
    /// and the error is returned; the caller drops the segment.
    pub fn process(
        &mut self,
        dir: Direction,
        flow_id: &FlowId,
        seq: u32,
        ack: Option<u32>,
        flags: u8,
    ) -> Result<TcpState, UnexpectedSegment> {
        let curr_state = self.tcp_state;

        self.last_seq[dir.idx()] = Some(seq);
        if ack.is_some() {
            self.last_ack[dir.idx()] = ack;
        }

        let res = self.transition(dir, flags);

        let new_state = match res {
            Some(new_state) => new_state,
            None => {
                // The segment contradicts everything we know about
                // this flow; reset it rather than translate garbage.
                self.tcp_state = TcpState::Closed;
                return Err(UnexpectedSegment {
                    direction: dir,
                    flow_id: *flow_id,
                    state: curr_state,
                    flags,
                });
            }
        };

        self.tcp_state = new_state;
        Ok(new_state)
    }

    fn transition(&mut self, dir: Direction, flags: u8) -> Option<TcpState> {
        use TcpState::*;

        let has = |flag| (flags & flag) != 0;

        if has(TcpFlags::RST) {
            return Some(Closed);
        }

        if has(TcpFlags::FIN) {
            self.fin_seen[dir.idx()] = true;
        }

        match self.tcp_state {
            Listen => {
                if has(TcpFlags::SYN) {
                    return Some(SynSeen);
                }

                // A data segment or bare ACK on a flow we have no
                // handshake for: a connection that predates us
                // (mid-flow pickup). Trust the endpoints.
                if has(TcpFlags::ACK) {
                    return Some(Established);
                }

                None
            }

            SynSeen => {
                // The reply SYN+ACK completes what we need of the
                // handshake.
                if has(TcpFlags::SYN) && has(TcpFlags::ACK) {
                    return Some(Established);
                }

                // The initiator retransmits its SYN.
                if has(TcpFlags::SYN) {
                    return Some(SynSeen);
                }

                // The handshake's final ACK can arrive before we saw
                // the SYN+ACK (the reply may ride another path).
                if has(TcpFlags::ACK) {
                    return Some(Established);
                }

                None
            }

            Established => {
                if has(TcpFlags::SYN) {
                    // A new SYN inside a live flow without an
                    // intervening RST.
                    return None;
                }

                if has(TcpFlags::FIN) {
                    return Some(CloseWait);
                }

                Some(Established)
            }

            CloseWait => {
                if has(TcpFlags::SYN) {
                    return None;
                }

                // The second FIN closes the flow for good.
                if self.fin_seen[0] && self.fin_seen[1] {
                    return Some(Closed);
                }

                Some(CloseWait)
            }

            // Late arrivals on a dead flow change nothing; the reaper
            // owns the entry now.
            Closed => Some(Closed),
        }
    }
}
