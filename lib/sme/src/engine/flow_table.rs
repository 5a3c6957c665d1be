// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow table implementation.
//!
//! A bounded map from [`FlowId`] to arbitrary per-flow state with
//! time-based expiry. The flow control block table is built on this.

use super::packet::FlowId;
use crate::ddi::time::Moment;
use crate::ddi::time::MILLIS;
use core::fmt;
use core::num::NonZeroU32;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sme_api::SmeError;
use std::collections::BTreeMap;

pub const FLOW_DEF_EXPIRE_SECS: u64 = 60;
pub const FLOW_DEF_TTL: Ttl = Ttl::new_seconds(FLOW_DEF_EXPIRE_SECS);

pub const FLOW_TABLE_DEF_MAX_ENTRIES: u32 = 8192;

type Result<T> = core::result::Result<T, SmeError>;

/// The Time To Live in milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct Ttl(u64);

impl Ttl {
    pub fn as_seconds(&self) -> u64 {
        self.0 / MILLIS
    }

    pub fn as_milliseconds(&self) -> u64 {
        self.0
    }

    /// Is `last_hit` expired?
    pub fn is_expired(&self, last_hit: Moment, now: Moment) -> bool {
        now.delta_as_millis(last_hit) >= self.0
    }

    /// Create a new TTL based on seconds.
    pub const fn new_seconds(seconds: u64) -> Self {
        Ttl(seconds * MILLIS)
    }
}

/// A type that can be "dumped" for the purposes of presenting an
/// external view into the internal state of a [`FlowEntry`].
pub trait Dump {
    type DumpVal: DeserializeOwned + Serialize;

    fn dump(&self, hits: u64) -> Self::DumpVal;
}

pub type FlowTableDump<T> = Vec<(FlowId, T)>;

#[derive(Debug)]
pub struct FlowTable<S: Dump> {
    name: String,
    limit: NonZeroU32,
    ttl: Ttl,
    map: BTreeMap<FlowId, FlowEntry<S>>,
}

impl<S> FlowTable<S>
where
    S: fmt::Debug + Dump,
{
    pub fn new(name: &str, limit: NonZeroU32, ttl: Option<Ttl>) -> Self {
        Self {
            name: name.to_string(),
            limit,
            ttl: ttl.unwrap_or(FLOW_DEF_TTL),
            map: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a new entry to the flow table.
    ///
    /// # Errors
    ///
    /// If the table is at max capacity, an error is returned and no
    /// modification is made to the table.
    pub fn add(&mut self, flow_id: FlowId, state: S) -> Result<()> {
        if self.map.len() == self.limit.get() as usize {
            return Err(SmeError::MaxCapacity(self.limit.get() as u64));
        }

        self.map.insert(flow_id, FlowEntry::new(state));
        Ok(())
    }

    /// Add a new entry to a full table by sacrificing the coldest
    /// entry `evictable` agrees to. Fails only when the table is full
    /// of entries that must be kept.
    pub fn add_or_evict(
        &mut self,
        flow_id: FlowId,
        state: S,
        evictable: impl Fn(&S) -> bool,
    ) -> Result<()> {
        if self.map.len() == self.limit.get() as usize {
            let victim = self
                .map
                .iter()
                .filter(|(_, e)| evictable(&e.state))
                .min_by_key(|(_, e)| e.last_hit)
                .map(|(id, _)| *id);

            match victim {
                Some(id) => {
                    self.map.remove(&id);
                }
                None => {
                    return Err(SmeError::MaxCapacity(self.limit.get() as u64))
                }
            }
        }

        self.map.insert(flow_id, FlowEntry::new(state));
        Ok(())
    }

    /// Clear all entries from the flow table.
    pub fn clear(&mut self) {
        self.map.clear()
    }

    pub fn dump(&self) -> FlowTableDump<S::DumpVal> {
        let mut flows = Vec::with_capacity(self.map.len());
        for (flow_id, entry) in &self.map {
            flows.push((*flow_id, entry.dump()));
        }
        flows
    }

    /// Remove every entry whose TTL has lapsed, returning the
    /// evicted flow ids.
    pub fn expire_flows(&mut self, now: Moment) -> Vec<FlowId> {
        let ttl = self.ttl;
        let mut expired = vec![];

        self.map.retain(|flowid, entry| {
            if entry.is_expired(now, ttl) {
                expired.push(*flowid);
                return false;
            }

            true
        });

        expired
    }

    pub fn get(&self, flow_id: &FlowId) -> Option<&FlowEntry<S>> {
        self.map.get(flow_id)
    }

    pub fn get_mut(&mut self, flow_id: &FlowId) -> Option<&mut FlowEntry<S>> {
        self.map.get_mut(flow_id)
    }

    /// Get the maximum number of entries this flow table may hold.
    pub fn get_limit(&self) -> NonZeroU32 {
        self.limit
    }

    /// Get the number of flows in this table.
    pub fn num_flows(&self) -> u32 {
        self.map.len() as u32
    }

    pub fn remove(&mut self, flow: &FlowId) -> Option<FlowEntry<S>> {
        self.map.remove(flow)
    }

    /// Keep only the entries `f` approves of.
    pub fn retain(
        &mut self,
        mut f: impl FnMut(&FlowId, &FlowEntry<S>) -> bool,
    ) {
        self.map.retain(|id, entry| f(id, entry));
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }
}

/// The FlowEntry holds any arbitrary state type `S`.
#[derive(Clone, Debug)]
pub struct FlowEntry<S: Dump> {
    state: S,

    /// Number of times this flow has been matched.
    hits: u64,

    /// This tracks the last time the flow was matched.
    last_hit: Moment,
}

impl<S: Dump> FlowEntry<S> {
    fn new(state: S) -> Self {
        FlowEntry { state, hits: 0, last_hit: Moment::now() }
    }

    fn dump(&self) -> S::DumpVal {
        self.state.dump(self.hits)
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn hit(&mut self) {
        self.hits += 1;
        self.last_hit = Moment::now();
    }

    pub fn last_hit(&self) -> &Moment {
        &self.last_hit
    }

    fn is_expired(&self, now: Moment, ttl: Ttl) -> bool {
        ttl.is_expired(self.last_hit, now)
    }
}

impl Dump for () {
    type DumpVal = ();

    fn dump(&self, _hits: u64) {}
}
