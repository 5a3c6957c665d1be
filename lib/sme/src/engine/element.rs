// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The pipeline element contract.
//!
//! An element declares its identity and wiring, is configured once
//! from keyword text, initialized once, and then fed batches of
//! parsed packets. The graph runtime that schedules elements lives
//! outside this crate; here an element simply returns the batch it
//! wants forwarded downstream, and absorbed packets (drops) are
//! reflected in its counters.

use super::edits::Edit;
use super::packet::Packet;
use super::packet::Parsed;
use super::pool::MemoryPool;
use super::reorder::HoldNode;
use super::ParseErr;
use super::ParseResult;
use crate::ddi::time::Moment;
use core::str::FromStr;
use sme_api::SmeError;

pub const PORTS_1_1: &str = "1/1";
pub const PORTS_1_1X2: &str = "1/1-2";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Processing {
    Push,
    Pull,
    Agnostic,
}

/// A batch of parsed packets traveling the graph together.
pub type PacketBatch = Vec<Packet<Parsed>>;

/// The state one worker owns outright: its object pools and its view
/// of the clock. A context is confined to its worker; it is passed
/// explicitly down the processing path rather than hiding in
/// thread-local storage.
#[derive(Debug, Default)]
pub struct WorkerCtx {
    pub edit_pool: MemoryPool<Edit>,
    pub hold_pool: MemoryPool<HoldNode>,
    now: Option<Moment>,
}

impl WorkerCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// The moment this batch started processing. Refreshed by the
    /// driver loop via [`WorkerCtx::tick`]; reading the clock once
    /// per batch keeps the hot path off the timestamp instruction.
    pub fn now(&self) -> Moment {
        self.now.unwrap_or_else(Moment::now)
    }

    pub fn tick(&mut self) {
        self.now = Some(Moment::now());
    }
}

/// A pipeline element.
pub trait Element {
    fn class_name(&self) -> &'static str;

    fn port_count(&self) -> &'static str {
        PORTS_1_1
    }

    fn processing(&self) -> Processing {
        Processing::Push
    }

    /// Parse and apply the element's configuration. Called exactly
    /// once, before [`Element::initialize`]. Errors are fatal to the
    /// element and abort startup.
    fn configure(&mut self, conf: &[String]) -> Result<(), SmeError>;

    /// One-time setup after the whole graph is configured.
    fn initialize(&mut self) -> Result<(), SmeError> {
        Ok(())
    }

    /// Process one batch arriving on `port`, returning the batch to
    /// forward downstream.
    fn push_batch(
        &mut self,
        port: u16,
        batch: PacketBatch,
        ctx: &mut WorkerCtx,
    ) -> PacketBatch;
}

/// Keyword-style configuration arguments: each item is one
/// `KEYWORD value` pair. Every keyword must be consumed; leftovers
/// are a configuration error, not a warning.
pub struct Args {
    pairs: Vec<(String, String)>,
    consumed: Vec<bool>,
}

impl Args {
    pub fn parse(conf: &[String]) -> ParseResult<Self> {
        let mut pairs = Vec::with_capacity(conf.len());

        for item in conf {
            let mut split = item.splitn(2, char::is_whitespace);
            let key = split.next().filter(|k| !k.is_empty());
            match (key, split.next()) {
                (Some(key), Some(val)) => {
                    pairs.push((key.to_string(), val.trim().to_string()));
                }
                _ => return Err(ParseErr::BadToken(item.clone())),
            }
        }

        let consumed = vec![false; pairs.len()];
        Ok(Self { pairs, consumed })
    }

    /// Consume a required keyword.
    pub fn required<T: FromStr>(&mut self, key: &'static str) -> ParseResult<T> {
        match self.take(key) {
            Some(val) => {
                val.parse().map_err(|_| ParseErr::BadToken(val.clone()))
            }
            None => Err(ParseErr::MissingField(key)),
        }
    }

    /// Consume an optional keyword, falling back to `default`.
    pub fn optional<T: FromStr>(
        &mut self,
        key: &'static str,
        default: T,
    ) -> ParseResult<T> {
        match self.take(key) {
            Some(val) => {
                val.parse().map_err(|_| ParseErr::BadToken(val.clone()))
            }
            None => Ok(default),
        }
    }

    /// Consume an optional boolean keyword.
    pub fn optional_bool(
        &mut self,
        key: &'static str,
        default: bool,
    ) -> ParseResult<bool> {
        match self.take(key) {
            Some(val) => match val.as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ParseErr::BadToken(val.clone())),
            },
            None => Ok(default),
        }
    }

    /// Verify every keyword was consumed.
    pub fn finish(self) -> ParseResult<()> {
        for (i, (key, _)) in self.pairs.iter().enumerate() {
            if !self.consumed[i] {
                return Err(ParseErr::UnknownToken(key.clone()));
            }
        }
        Ok(())
    }

    fn take(&mut self, key: &str) -> Option<String> {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if !self.consumed[i] && k == key {
                self.consumed[i] = true;
                return Some(v.clone());
            }
        }
        None
    }
}

/// Wrap a configuration parse failure into the element-fatal error.
pub fn config_err(class: &'static str, err: ParseErr) -> SmeError {
    SmeError::ConfigInvalid { element: class.to_string(), msg: err.to_string() }
}

#[cfg(test)]
mod test {
    use super::*;

    fn conf(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keyword_parse() {
        let mut args =
            Args::parse(&conf(&["FLOWDIRECTION 1", "MERGESORT false"]))
                .unwrap();
        let dir: sme_api::Direction = args.required("FLOWDIRECTION").unwrap();
        assert_eq!(dir, sme_api::Direction::Rev);
        assert!(!args.optional_bool("MERGESORT", true).unwrap());
        args.finish().unwrap();
    }

    #[test]
    fn missing_required() {
        let mut args = Args::parse(&conf(&[])).unwrap();
        let res: ParseResult<sme_api::Direction> =
            args.required("FLOWDIRECTION");
        assert_eq!(res, Err(ParseErr::MissingField("FLOWDIRECTION")));
    }

    #[test]
    fn unknown_keyword_rejected() {
        let args = Args::parse(&conf(&["BOGUS 7"])).unwrap();
        assert_eq!(
            args.finish(),
            Err(ParseErr::UnknownToken("BOGUS".to_string())),
        );
    }

    #[test]
    fn malformed_item_rejected() {
        assert!(Args::parse(&conf(&["FLOWDIRECTION"])).is_err());
    }
}
