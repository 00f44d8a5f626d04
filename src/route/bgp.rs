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

//! BGP attribute bundle and its components.

use std::{
    cmp::Ordering,
    collections::{hash_map::DefaultHasher, BTreeSet},
    fmt::Display,
    hash::{Hash, Hasher},
    num::ParseIntError,
    str::FromStr,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::RoutingProtocol;
use crate::types::{AsId, Ip};

/// Local preference assigned to routes when nothing else is configured.
pub const DEFAULT_LOCAL_PREFERENCE: u32 = 100;
/// Weight of locally originated routes.
pub const DEFAULT_LOCAL_WEIGHT: u32 = 32768;

/// Origin attribute of a BGP route. Lower is better.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum OriginType {
    /// Learned from an interior protocol
    #[default]
    Igp,
    /// Learned from EGP
    Egp,
    /// Unknown (typically redistributed)
    Incomplete,
}

impl Display for OriginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Igp => "i",
            Self::Egp => "e",
            Self::Incomplete => "?",
        })
    }
}

/// How a BGP route came into existence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum OriginMechanism {
    /// Originated by a `network` statement
    Network,
    /// Redistributed from another protocol
    Redistribute,
    /// Generated (aggregate) route
    Generated,
    /// Learned from a BGP peer
    #[default]
    Learned,
}

/// Standard BGP community, stored as a 32-bit value and displayed as `high:low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Community(pub u32);

impl Community {
    /// Create a community from its high and low part.
    pub fn new(high: u16, low: u16) -> Self {
        Self(((high as u32) << 16) | low as u32)
    }
}

impl Display for Community {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0 >> 16, self.0 & 0xffff)
    }
}

impl FromStr for Community {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((high, low)) => Ok(Self::new(high.parse()?, low.parse()?)),
            None => Ok(Self(s.parse()?)),
        }
    }
}

impl From<u32> for Community {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

/// Tunnel encapsulation attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TunnelEncapsulation {
    /// Endpoint of the tunnel
    pub tunnel_endpoint: Ip,
}

/// AS path as a sequence of AS sets. A plain AS sequence consists of singleton sets. Every set
/// counts as a single hop for the path length.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct AsPath(Vec<BTreeSet<AsId>>);

impl AsPath {
    /// Create an AS path from an AS sequence.
    pub fn from_sequence<I, A>(path: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AsId>,
    {
        Self(
            path.into_iter()
                .map(|x| BTreeSet::from([x.into()]))
                .collect(),
        )
    }

    /// Number of hops of the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the path is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `as_id` appears anywhere on the path.
    pub fn contains(&self, as_id: AsId) -> bool {
        self.0.iter().any(|set| set.contains(&as_id))
    }

    /// Return a new path with `as_id` prepended.
    pub fn prepend(&self, as_id: AsId) -> Self {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.push(BTreeSet::from([as_id]));
        path.extend(self.0.iter().cloned());
        Self(path)
    }

    /// Iterate over all sets of the path.
    pub fn sets(&self) -> impl Iterator<Item = &BTreeSet<AsId>> {
        self.0.iter()
    }

    /// The first AS of the path (neighboring AS).
    pub fn first(&self) -> Option<AsId> {
        self.0.first().and_then(|s| s.iter().next().copied())
    }
}

impl Display for AsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self
            .0
            .iter()
            .map(|set| {
                if set.len() == 1 {
                    set.iter().map(|x| x.0).join("")
                } else {
                    format!("{{{}}}", set.iter().map(|x| x.0).join(","))
                }
            })
            .join(" ");
        f.write_str(&s)
    }
}

/// Bundle of BGP path attributes shared by many routes. Bundles are never modified once they are
/// created. The hash of all fields is computed once and cached, so that equality can reject
/// differing bundles by comparing a single number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "UnsealedBgpAttributes")]
pub struct BgpAttributes {
    pub(crate) as_path: AsPath,
    pub(crate) cluster_list: BTreeSet<u32>,
    pub(crate) communities: BTreeSet<Community>,
    pub(crate) local_preference: u32,
    pub(crate) originator_ip: Ip,
    pub(crate) origin_mechanism: OriginMechanism,
    pub(crate) origin_type: OriginType,
    pub(crate) received_from_route_reflector_client: bool,
    pub(crate) src_protocol: Option<RoutingProtocol>,
    pub(crate) tunnel_encapsulation: Option<TunnelEncapsulation>,
    pub(crate) weight: u32,
    #[serde(skip)]
    hash: u64,
}

/// Serialized form of [`BgpAttributes`], sealed when it is converted.
#[derive(Deserialize)]
struct UnsealedBgpAttributes {
    as_path: AsPath,
    cluster_list: BTreeSet<u32>,
    communities: BTreeSet<Community>,
    local_preference: u32,
    originator_ip: Ip,
    origin_mechanism: OriginMechanism,
    origin_type: OriginType,
    received_from_route_reflector_client: bool,
    src_protocol: Option<RoutingProtocol>,
    tunnel_encapsulation: Option<TunnelEncapsulation>,
    weight: u32,
}

impl From<UnsealedBgpAttributes> for BgpAttributes {
    fn from(a: UnsealedBgpAttributes) -> Self {
        Self {
            as_path: a.as_path,
            cluster_list: a.cluster_list,
            communities: a.communities,
            local_preference: a.local_preference,
            originator_ip: a.originator_ip,
            origin_mechanism: a.origin_mechanism,
            origin_type: a.origin_type,
            received_from_route_reflector_client: a.received_from_route_reflector_client,
            src_protocol: a.src_protocol,
            tunnel_encapsulation: a.tunnel_encapsulation,
            weight: a.weight,
            hash: 0,
        }
        .seal()
    }
}

impl Default for BgpAttributes {
    fn default() -> Self {
        Self {
            as_path: Default::default(),
            cluster_list: Default::default(),
            communities: Default::default(),
            local_preference: DEFAULT_LOCAL_PREFERENCE,
            originator_ip: Ip::UNSPECIFIED,
            origin_mechanism: Default::default(),
            origin_type: Default::default(),
            received_from_route_reflector_client: false,
            src_protocol: None,
            tunnel_encapsulation: None,
            weight: 0,
            hash: 0,
        }
        .seal()
    }
}

impl BgpAttributes {
    /// Recompute the cached hash. Must be called after the fields were modified.
    pub(crate) fn seal(mut self) -> Self {
        let mut hasher = DefaultHasher::new();
        self.as_path.hash(&mut hasher);
        self.cluster_list.hash(&mut hasher);
        self.communities.hash(&mut hasher);
        self.local_preference.hash(&mut hasher);
        self.originator_ip.hash(&mut hasher);
        self.origin_mechanism.hash(&mut hasher);
        self.origin_type.hash(&mut hasher);
        self.received_from_route_reflector_client.hash(&mut hasher);
        self.src_protocol.hash(&mut hasher);
        self.tunnel_encapsulation.hash(&mut hasher);
        self.weight.hash(&mut hasher);
        self.hash = hasher.finish();
        self
    }

    /// AS path
    pub fn as_path(&self) -> &AsPath {
        &self.as_path
    }

    /// Cluster list (read-only)
    pub fn cluster_list(&self) -> &BTreeSet<u32> {
        &self.cluster_list
    }

    /// Communities (read-only)
    pub fn communities(&self) -> &BTreeSet<Community> {
        &self.communities
    }

    /// Local preference
    pub fn local_preference(&self) -> u32 {
        self.local_preference
    }

    /// Originator IP (router ID of the originator, or the ORIGINATOR_ID of reflected routes)
    pub fn originator_ip(&self) -> Ip {
        self.originator_ip
    }

    /// Origin mechanism
    pub fn origin_mechanism(&self) -> OriginMechanism {
        self.origin_mechanism
    }

    /// Origin type
    pub fn origin_type(&self) -> OriginType {
        self.origin_type
    }

    /// Whether the route was received from a route-reflector client.
    pub fn received_from_route_reflector_client(&self) -> bool {
        self.received_from_route_reflector_client
    }

    /// Protocol from which the route was redistributed.
    pub fn src_protocol(&self) -> Option<RoutingProtocol> {
        self.src_protocol
    }

    /// Tunnel encapsulation attribute
    pub fn tunnel_encapsulation(&self) -> Option<TunnelEncapsulation> {
        self.tunnel_encapsulation
    }

    /// Weight (local to the router)
    pub fn weight(&self) -> u32 {
        self.weight
    }

    fn key(
        &self,
    ) -> (
        &AsPath,
        &BTreeSet<u32>,
        &BTreeSet<Community>,
        u32,
        Ip,
        OriginMechanism,
        OriginType,
        bool,
        Option<RoutingProtocol>,
        Option<TunnelEncapsulation>,
        u32,
    ) {
        (
            &self.as_path,
            &self.cluster_list,
            &self.communities,
            self.local_preference,
            self.originator_ip,
            self.origin_mechanism,
            self.origin_type,
            self.received_from_route_reflector_client,
            self.src_protocol,
            self.tunnel_encapsulation,
            self.weight,
        )
    }
}

impl PartialEq for BgpAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.key() == other.key()
    }
}

impl Eq for BgpAttributes {}

impl Hash for BgpAttributes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash)
    }
}

impl PartialOrd for BgpAttributes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BgpAttributes {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
