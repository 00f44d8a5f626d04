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

//! Module defining routes of all protocols. A [`Route`] carries the fields common to all protocols,
//! and a [`RouteKind`] holding the protocol-specific data. BGP attribute bundles are interned, such
//! that structurally equal bundles share the same allocation (see [`BgpAttributes`]). Routes are
//! immutable; they are modified by converting them into a [`RouteBuilder`] and building a new one.

use std::{fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    ospf::OspfArea,
    types::{Ip, Prefix},
};

mod bgp;
mod builder;
mod intern;

pub use bgp::{
    AsPath, BgpAttributes, Community, OriginMechanism, OriginType, TunnelEncapsulation,
    DEFAULT_LOCAL_PREFERENCE, DEFAULT_LOCAL_WEIGHT,
};
pub use builder::RouteBuilder;
pub use intern::{interned_bgp_attributes, InternCache};

/// Unspecified address, used as the received-from IP of locally originated routes.
pub const UNSET_IP: Ip = Ip::UNSPECIFIED;

/// The protocol by which a route was learned or created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RoutingProtocol {
    /// Directly connected network
    Connected,
    /// Static route
    Static,
    /// Generated or aggregate route
    Aggregate,
    /// OSPF intra-area route
    OspfIntra,
    /// OSPF inter-area route
    OspfInter,
    /// OSPF external route of type 1
    OspfE1,
    /// OSPF external route of type 2
    OspfE2,
    /// Route learned over an eBGP session (or originated locally)
    Bgp,
    /// Route learned over an iBGP session
    Ibgp,
}

impl RoutingProtocol {
    /// Default administrative distance of routes of this protocol.
    pub fn default_admin_cost(&self) -> u32 {
        match self {
            Self::Connected => 0,
            Self::Static => 1,
            Self::Bgp => 20,
            Self::OspfIntra | Self::OspfInter | Self::OspfE1 | Self::OspfE2 => 110,
            Self::Ibgp | Self::Aggregate => 200,
        }
    }

    /// Returns `true` if the protocol is BGP or iBGP.
    pub fn is_bgp(&self) -> bool {
        matches!(self, Self::Bgp | Self::Ibgp)
    }

    /// Returns `true` for any of the OSPF protocols.
    pub fn is_ospf(&self) -> bool {
        matches!(
            self,
            Self::OspfIntra | Self::OspfInter | Self::OspfE1 | Self::OspfE2
        )
    }

    /// Returns `true` for OSPF external protocols.
    pub fn is_ospf_external(&self) -> bool {
        matches!(self, Self::OspfE1 | Self::OspfE2)
    }
}

impl Display for RoutingProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Static => "static",
            Self::Aggregate => "aggregate",
            Self::OspfIntra => "ospf",
            Self::OspfInter => "ospfIA",
            Self::OspfE1 => "ospfE1",
            Self::OspfE2 => "ospfE2",
            Self::Bgp => "bgp",
            Self::Ibgp => "ibgp",
        })
    }
}

/// Next-hop specification of a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NextHop {
    /// Forward to this IP address (resolved recursively in the main RIB)
    Ip(Ip),
    /// Forward out of an interface, optionally towards a specific address on the attached subnet.
    Interface {
        /// Name of the outgoing interface
        interface: String,
        /// Optional next-hop address on the interface subnet
        ip: Option<Ip>,
    },
    /// Drop the packet (null route)
    Discard,
    /// Symbolic marker for the local address of a session. Only used during policy evaluation.
    SelfAddress,
    /// Symbolic marker for the peer address of a session. Only used during policy evaluation.
    PeerAddress,
}

impl NextHop {
    /// Return the next-hop IP address, if any.
    pub fn ip(&self) -> Option<Ip> {
        match self {
            Self::Ip(ip) => Some(*ip),
            Self::Interface { ip, .. } => *ip,
            _ => None,
        }
    }

    /// Return the outgoing interface, if any.
    pub fn interface(&self) -> Option<&str> {
        match self {
            Self::Interface { interface, .. } => Some(interface.as_str()),
            _ => None,
        }
    }

    /// Returns `true` if the next hop is a discard (null) route.
    pub fn is_discard(&self) -> bool {
        matches!(self, Self::Discard)
    }
}

impl Display for NextHop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Interface { interface, ip: None } => f.write_str(interface),
            Self::Interface {
                interface,
                ip: Some(ip),
            } => write!(f, "{ip} via {interface}"),
            Self::Discard => f.write_str("discard"),
            Self::SelfAddress => f.write_str("self"),
            Self::PeerAddress => f.write_str("peer-address"),
        }
    }
}

/// OSPF-specific data of a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OspfRouteData {
    /// Area in which the route was learned
    pub area: OspfArea,
    /// Cost to reach the router that advertised the route (used to break E2 ties)
    pub cost_to_advertiser: u32,
    /// Hostname of the router that originated the advertisement
    pub advertiser: String,
}

/// BGP-specific data of a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BgpRouteData {
    /// Interned attribute bundle
    #[serde(with = "intern::serde_interned")]
    pub attributes: Arc<BgpAttributes>,
    /// Optional additional-paths identifier
    pub path_id: Option<u32>,
    /// Address of the peer from which the route was received. [`UNSET_IP`] for local routes.
    pub received_from_ip: Ip,
}

/// Protocol-specific part of a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RouteKind {
    /// Connected, static and generated routes
    Plain,
    /// OSPF routes
    Ospf(OspfRouteData),
    /// BGP routes
    Bgp(BgpRouteData),
}

impl RouteKind {
    /// Name of the route kind, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Ospf(_) => "OSPF",
            Self::Bgp(_) => "BGP",
        }
    }

    /// Whether `protocol` is legal for this kind of route.
    pub fn allows(&self, protocol: RoutingProtocol) -> bool {
        match self {
            Self::Plain => matches!(
                protocol,
                RoutingProtocol::Connected | RoutingProtocol::Static | RoutingProtocol::Aggregate
            ),
            Self::Ospf(_) => protocol.is_ospf(),
            Self::Bgp(_) => protocol.is_bgp() || protocol == RoutingProtocol::Aggregate,
        }
    }
}

/// An immutable route. Equality and ordering compare the full value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    pub(crate) network: Prefix,
    pub(crate) protocol: RoutingProtocol,
    pub(crate) admin: u32,
    pub(crate) metric: u32,
    pub(crate) next_hop: NextHop,
    pub(crate) tag: Option<u32>,
    pub(crate) non_routing: bool,
    pub(crate) non_forwarding: bool,
    pub(crate) kind: RouteKind,
}

impl Route {
    /// Create a builder initialized with all values of `self`. Building it without modification
    /// yields a route equal to `self`, sharing its attribute bundle.
    pub fn to_builder(&self) -> RouteBuilder {
        RouteBuilder::from_route(self)
    }

    /// Destination network
    pub fn network(&self) -> Prefix {
        self.network
    }

    /// Protocol of the route
    pub fn protocol(&self) -> RoutingProtocol {
        self.protocol
    }

    /// Administrative distance
    pub fn admin(&self) -> u32 {
        self.admin
    }

    /// Metric (OSPF cost, or MED for BGP routes)
    pub fn metric(&self) -> u32 {
        self.metric
    }

    /// Next hop
    pub fn next_hop(&self) -> &NextHop {
        &self.next_hop
    }

    /// Next-hop IP address, if the next hop has one.
    pub fn next_hop_ip(&self) -> Option<Ip> {
        self.next_hop.ip()
    }

    /// Outgoing interface, if the next hop specifies one.
    pub fn next_hop_interface(&self) -> Option<&str> {
        self.next_hop.interface()
    }

    /// Route tag
    pub fn tag(&self) -> Option<u32> {
        self.tag
    }

    /// Non-routing routes stay in their protocol RIB. They are neither installed in the main RIB
    /// nor advertised to BGP peers.
    pub fn non_routing(&self) -> bool {
        self.non_routing
    }

    /// Non-forwarding routes are installed in the main RIB, but not in the FIB.
    pub fn non_forwarding(&self) -> bool {
        self.non_forwarding
    }

    /// Protocol-specific data
    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    /// BGP data, if this is a BGP route.
    pub fn bgp(&self) -> Option<&BgpRouteData> {
        match &self.kind {
            RouteKind::Bgp(b) => Some(b),
            _ => None,
        }
    }

    /// Interned BGP attribute bundle, if this is a BGP route.
    pub fn bgp_attributes(&self) -> Option<&Arc<BgpAttributes>> {
        self.bgp().map(|b| &b.attributes)
    }

    /// OSPF data, if this is an OSPF route.
    pub fn ospf(&self) -> Option<&OspfRouteData> {
        match &self.kind {
            RouteKind::Ospf(o) => Some(o),
            _ => None,
        }
    }

    /// Address from which a BGP route was received ([`UNSET_IP`] for local or non-BGP routes).
    pub fn received_from_ip(&self) -> Ip {
        self.bgp().map(|b| b.received_from_ip).unwrap_or(UNSET_IP)
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}/{}] via {} ({})",
            self.network, self.admin, self.metric, self.next_hop, self.protocol
        )?;
        if let Some(attrs) = self.bgp_attributes() {
            write!(f, " path [{}] lp {}", attrs.as_path(), attrs.local_preference())?;
        }
        Ok(())
    }
}
