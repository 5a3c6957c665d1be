// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Ethernet frame header.
//!
//! The engine only needs enough of L2 to find the IP header and to
//! confirm the frame carries IPv4; addresses pass through untouched.

use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::LayoutVerified;
use zerocopy::Unaligned;

pub const ETHER_HDR_SZ: usize = size_of::<EtherHdrRaw>();
pub const ETHER_TYPE_IPV4: u16 = 0x0800;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct EtherHdrRaw {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: [u8; 2],
}

impl EtherHdrRaw {
    pub fn parse(src: &[u8]) -> Option<LayoutVerified<&[u8], Self>> {
        LayoutVerified::new(src.get(..size_of::<Self>())?)
    }

    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}
