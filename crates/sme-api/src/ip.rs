// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IPv4 address and protocol types.

use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// An IPv4 address.
///
/// The bytes are kept in network order; a logical (host-order) `u32`
/// view is available for hashing and comparison.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY: Ipv4Addr = Ipv4Addr::new([0; 4]);
    pub const LOCAL_BCAST: Ipv4Addr = Ipv4Addr::new([255; 4]);

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }

    /// Return the bytes in network order.
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.inner)
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 4];
        let mut iter = val.split('.');

        for b in &mut bytes {
            let octet_s =
                iter.next().ok_or_else(|| format!("malformed IP: {}", val))?;
            *b = octet_s
                .parse()
                .map_err(|_| format!("malformed IP: {}", val))?;
        }

        if iter.next().is_some() {
            return Err(format!("malformed IP: {}", val));
        }

        Ok(Ipv4Addr { inner: bytes })
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3],
        )
    }
}

/// An IP protocol number, limited to the protocols the engine
/// classifies.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum Protocol {
    Icmp = 0x1,
    Tcp = 0x6,
    Udp = 0x11,
    Unknown = 0xFF,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Unknown
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        match proto {
            0x1 => Protocol::Icmp,
            0x6 => Protocol::Tcp,
            0x11 => Protocol::Udp,
            _ => Protocol::Unknown,
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Protocol::Icmp => "ICMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Unknown => "???",
        };
        write!(f, "{}", s)
    }
}
