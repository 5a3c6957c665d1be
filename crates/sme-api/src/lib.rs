// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The API types shared between the stream modification engine and any
//! administrative surface sitting in front of it.
//!
//! The engine itself never serializes anything on the packet path; these
//! types exist so that handler (read/write) traffic crossing the
//! admin boundary has one stable vocabulary.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod ip;

pub use cmd::*;
pub use ip::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment. We attach no semantic
/// meaning to the number other than as a means to verify that both
/// sides of the admin boundary are compiled for the same API.
pub const API_VERSION: u64 = 3;

/// One direction of a connection's two unidirectional flows.
///
/// This is the value carried by the `FLOWDIRECTION` configuration
/// keyword: the two halves of one connection are configured with
/// opposite values, and index into per-flow state arrays.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    Fwd = 0,
    Rev = 1,
}

impl Direction {
    /// The opposite direction.
    pub fn flip(self) -> Self {
        match self {
            Direction::Fwd => Direction::Rev,
            Direction::Rev => Direction::Fwd,
        }
    }

    /// The array index for per-direction state.
    pub fn idx(self) -> usize {
        self as usize
    }
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s {
            "0" => Ok(Direction::Fwd),
            "1" => Ok(Direction::Rev),
            _ => Err(format!("invalid flow direction: {}", s)),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::Fwd => "FWD",
            Direction::Rev => "REV",
        };

        write!(f, "{}", dirstr)
    }
}

/// Errors surfaced by the engine.
///
/// Per-packet conditions (malformed input, duplicate segments, pool
/// exhaustion) are absorbed into counters on the hot path and never
/// cross a module boundary as an error; this enum covers everything
/// else: configuration, handler traffic, and the conditions a caller
/// can meaningfully react to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SmeError {
    BadApiVersion { user: u64, engine: u64 },
    ConfigInvalid { element: String, msg: String },
    DeserCmdReq(String),
    ElementNotFound(String),
    HandlerNotFound { element: String, handler: String },
    MaxCapacity(u64),
    MutationAfterCommit,
    PortExists(u16),
    PortNotFound(u16),
    SerCmdResp(String),
    StateViolation { state: String, msg: String },
}

impl Display for SmeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadApiVersion { user, engine } => {
                write!(f, "API version mismatch: user {} engine {}", user, engine)
            }
            Self::ConfigInvalid { element, msg } => {
                write!(f, "invalid config for {}: {}", element, msg)
            }
            Self::DeserCmdReq(msg) => {
                write!(f, "failed to deserialize request: {}", msg)
            }
            Self::ElementNotFound(name) => {
                write!(f, "no such element: {}", name)
            }
            Self::HandlerNotFound { element, handler } => {
                write!(f, "no handler {} on element {}", handler, element)
            }
            Self::MaxCapacity(limit) => {
                write!(f, "table at max capacity: {}", limit)
            }
            Self::MutationAfterCommit => {
                write!(f, "edit added after commit")
            }
            Self::PortExists(id) => {
                write!(f, "port already exists: {}", id)
            }
            Self::PortNotFound(id) => {
                write!(f, "no such port: {}", id)
            }
            Self::SerCmdResp(msg) => {
                write!(f, "failed to serialize response: {}", msg)
            }
            Self::StateViolation { state, msg } => {
                write!(f, "state violation in {}: {}", state, msg)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_flip() {
        assert_eq!(Direction::Fwd.flip(), Direction::Rev);
        assert_eq!(Direction::Rev.flip(), Direction::Fwd);
        assert_eq!(Direction::Fwd.idx(), 0);
        assert_eq!(Direction::Rev.idx(), 1);
    }

    #[test]
    fn direction_parse() {
        assert_eq!("0".parse::<Direction>(), Ok(Direction::Fwd));
        assert_eq!("1".parse::<Direction>(), Ok(Direction::Rev));
        assert!("2".parse::<Direction>().is_err());
    }
}
