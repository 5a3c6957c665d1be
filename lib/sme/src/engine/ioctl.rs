// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The admin interface: dump types and the handler registry.
//!
//! The outer host exposes read/write/delete verbs over HTTP; this
//! module is the engine's side of that boundary. Handlers are
//! registered up front under `(element, handler)` names and looked up
//! by exact match: an unknown name is rejected at the registry, so no
//! stringly-typed dispatch ever reaches an element.

use super::fcb::FcbDump;
use super::packet::FlowId;
use serde::Deserialize;
use serde::Serialize;
use sme_api::CmdOk;
use sme_api::SmeError;
use std::collections::BTreeMap;

/// Dump the flow table of one port.
#[derive(Debug, Deserialize, Serialize)]
pub struct DumpFlowsReq {
    pub port: u16,
}

/// The response to a [`DumpFlowsReq`].
#[derive(Debug, Deserialize, Serialize)]
pub struct DumpFlowsResp {
    pub flows: Vec<(FlowId, FcbDump)>,
}

impl CmdOk for DumpFlowsResp {}

/// Dump the error/drop counters of one port.
#[derive(Debug, Deserialize, Serialize)]
pub struct DumpStatsReq {
    pub port: u16,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct PortStats {
    pub malformed: u64,
    pub flows_created: u64,
    pub flows_reaped: u64,
    pub held_flushed: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DumpStatsResp {
    pub stats: PortStats,
}

impl CmdOk for DumpStatsResp {}

/// A registered handler: the verb decides the shape.
pub enum Handler<T> {
    /// GET: read a value.
    Read(Box<dyn Fn(&T) -> Result<Vec<u8>, SmeError> + Send + Sync>),
    /// POST: invoke with an argument string.
    Write(Box<dyn Fn(&mut T, &str) -> Result<Vec<u8>, SmeError> + Send + Sync>),
    /// DELETE: invoke the removal handler.
    Delete(Box<dyn Fn(&mut T, &str) -> Result<Vec<u8>, SmeError> + Send + Sync>),
}

/// The static mapping from `(element, handler)` to code.
pub struct HandlerRegistry<T> {
    map: BTreeMap<(String, String), Handler<T>>,
}

impl<T> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    /// Register a handler. A name can be bound exactly once.
    pub fn register(
        &mut self,
        element: &str,
        handler: &str,
        h: Handler<T>,
    ) -> Result<(), SmeError> {
        let key = (element.to_string(), handler.to_string());
        if self.map.contains_key(&key) {
            return Err(SmeError::ConfigInvalid {
                element: element.to_string(),
                msg: format!("handler {} bound twice", handler),
            });
        }
        self.map.insert(key, h);
        Ok(())
    }

    pub fn names(&self) -> Vec<(String, String)> {
        self.map.keys().cloned().collect()
    }

    fn lookup(
        &self,
        element: &str,
        handler: &str,
    ) -> Result<&Handler<T>, SmeError> {
        self.map
            .get(&(element.to_string(), handler.to_string()))
            .ok_or_else(|| SmeError::HandlerNotFound {
                element: element.to_string(),
                handler: handler.to_string(),
            })
    }

    /// Dispatch a GET.
    pub fn read(
        &self,
        target: &T,
        element: &str,
        handler: &str,
    ) -> Result<Vec<u8>, SmeError> {
        match self.lookup(element, handler)? {
            Handler::Read(f) => f(target),
            _ => Err(SmeError::HandlerNotFound {
                element: element.to_string(),
                handler: handler.to_string(),
            }),
        }
    }

    /// Dispatch a POST.
    pub fn write(
        &self,
        target: &mut T,
        element: &str,
        handler: &str,
        arg: &str,
    ) -> Result<Vec<u8>, SmeError> {
        match self.lookup(element, handler)? {
            Handler::Write(f) => f(target, arg),
            _ => Err(SmeError::HandlerNotFound {
                element: element.to_string(),
                handler: handler.to_string(),
            }),
        }
    }

    /// Dispatch a DELETE: resolves `delete_<handler>`.
    pub fn delete(
        &self,
        target: &mut T,
        element: &str,
        handler: &str,
        arg: &str,
    ) -> Result<Vec<u8>, SmeError> {
        let name = format!("delete_{}", handler);
        match self.lookup(element, &name)? {
            Handler::Delete(f) => f(target, arg),
            _ => Err(SmeError::HandlerNotFound {
                element: element.to_string(),
                handler: name,
            }),
        }
    }
}
