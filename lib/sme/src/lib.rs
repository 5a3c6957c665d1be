// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A per-flow TCP reordering and byte-stream modification engine.
//!
//! This crate implements the stateful core of an in-path middlebox:
//! packets are classified into flows, each TCP half-connection is
//! reordered into in-order delivery, and elements sitting between the
//! [`engine::tcp_in::TcpIn`] / [`engine::tcp_out::TcpOut`] boundary may
//! insert or remove bytes inside the payload. The engine maintains the
//! mapping between the original and the modified sequence spaces so
//! that sequence numbers, acknowledgements, SACK blocks, lengths, and
//! checksums all remain consistent end to end.
//!
//! The surrounding dataplane (NIC I/O, element graph scheduling, the
//! admin HTTP surface) lives outside this crate; see
//! [`engine::system::System`] for the seam it plugs into.

#![allow(non_snake_case)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;

pub mod ddi;
pub mod engine;

/// Return value with `bit` set.
pub const fn bit_on(bit: u8) -> u8 {
    0x1 << bit
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
/// In a unit test this maps to `println!`; an embedding dataplane will
/// usually supply its own sink.
pub trait LogProvider {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{}", level_s)
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog {}

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{} {}", level, msg);
    }
}

/// The execution context handed to the [`engine::system::System`] at
/// construction time.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider + Send + Sync>,
}

impl ExecCtx {
    pub fn with_println() -> Self {
        Self { log: Box::new(PrintlnLog {}) }
    }
}
