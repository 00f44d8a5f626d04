// RibSim: Data Plane Fixed-Point Simulator written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! This module contains the definition of IPv4 prefixes, and the prefix trie used for longest
//! prefix matching.

use std::{
    fmt::{Debug, Display},
    net::Ipv4Addr,
    str::FromStr,
};

use ipnet::{AddrParseError, Ipv4Net, PrefixLenError};
use serde::{de::Error, Deserialize, Serialize};

use prefix_trie::Prefix as PPrefix;

/// IPv4 address.
pub type Ip = Ipv4Addr;

/// Prefix trie mapping [`Prefix`] to `T`, supporting longest prefix matching.
pub type PrefixMap<T> = prefix_trie::PrefixMap<Prefix, T>;

/// IPv4 network prefix (address and mask length). The host bits are always cleared. Prefixes are
/// totally ordered, first by the numeric value of the network address, and then by the length.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default)]
pub struct Prefix(Ipv4Net);

impl Prefix {
    /// Create a new prefix from an address and a mask length. Host bits of `ip` are cleared.
    pub fn new(ip: Ip, len: u8) -> Result<Self, PrefixLenError> {
        Ok(Self(Ipv4Net::new(ip, len)?.trunc()))
    }

    /// Create the host prefix (`/32`) of an address.
    pub fn host(ip: Ip) -> Self {
        Self(Ipv4Net::from(ip))
    }

    /// The default route `0.0.0.0/0`.
    pub fn zero() -> Self {
        Self(Ipv4Net::default())
    }

    /// Network address of the prefix.
    pub fn network(&self) -> Ip {
        self.0.network()
    }

    /// Mask length of the prefix.
    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Returns `true` if `ip` lies inside of `self`.
    pub fn contains_ip(&self, ip: Ip) -> bool {
        self.0.contains(&ip)
    }

    /// Returns `true` if `other` is equal to, or more specific than `self`.
    pub fn contains(&self, other: &Self) -> bool {
        self.0.contains(&other.0)
    }

    /// Returns `true` if `other` is strictly more specific than `self`.
    pub fn strictly_contains(&self, other: &Self) -> bool {
        self.contains(other) && self.prefix_len() < other.prefix_len()
    }
}

impl PPrefix for Prefix {
    type R = u32;

    fn repr(&self) -> u32 {
        self.0.addr().into()
    }

    fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    fn from_repr_len(repr: u32, len: u8) -> Self {
        Prefix(
            Ipv4Net::new(repr.into(), len)
                .map(|x| x.trunc())
                .unwrap_or_default(),
        )
    }

    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }

    fn mask(&self) -> u32 {
        self.0.network().into()
    }

    fn zero() -> Self {
        Self(Default::default())
    }

    fn contains(&self, other: &Self) -> bool {
        self.0.contains(&other.0)
    }
}

impl Serialize for Prefix {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ipv4Net::from_str(&s)
            .map_err(|s| D::Error::custom(format!("Expected IP Network, found {s}")))
            .map(Self::from)
    }
}

impl FromStr for Prefix {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ipv4Net::from_str(s).map(|x| x.into())
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<Ipv4Net> for Prefix {
    fn from(value: Ipv4Net) -> Self {
        Self(value.trunc())
    }
}

impl From<Ip> for Prefix {
    fn from(value: Ip) -> Self {
        Self::host(value)
    }
}

impl From<Prefix> for Ipv4Net {
    fn from(value: Prefix) -> Self {
        value.0
    }
}
