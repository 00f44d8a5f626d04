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

//! The configuration model consumed by the data plane computation. Parsing vendor configurations
//! is out of scope; configurations are either constructed programmatically or deserialized from a
//! JSON snapshot.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{
    acl::IpAccessList,
    ospf::{OspfArea, OspfMetricType, DEFAULT_OSPF_EXPORT_METRIC, DEFAULT_REFERENCE_BANDWIDTH},
    policy::RoutingPolicy,
    route::{NextHop, OriginType, RoutingProtocol},
    route_map::RouteMap,
    types::{AsId, Ip, PolicyError, Prefix, DEFAULT_VRF},
};

fn default_true() -> bool {
    true
}

fn default_vrf() -> String {
    DEFAULT_VRF.to_string()
}

fn default_bandwidth() -> f64 {
    1e9
}

/// Configuration of a single device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Name of the device
    pub hostname: String,
    /// Interfaces by name
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
    /// VRFs by name. The default VRF is created implicitly if an interface refers to it.
    #[serde(default)]
    pub vrfs: BTreeMap<String, Vrf>,
    /// Access lists by name
    #[serde(default)]
    pub acls: BTreeMap<String, IpAccessList>,
    /// Route maps by name
    #[serde(default)]
    pub route_maps: BTreeMap<String, RouteMap>,
    /// Additional compiled policies by name. They take precedence over route maps with the same
    /// name.
    #[serde(skip)]
    pub policies: BTreeMap<String, Arc<dyn RoutingPolicy>>,
}

impl Configuration {
    /// Create an empty configuration.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    /// Add an interface (builder style).
    pub fn with_interface(mut self, name: impl Into<String>, interface: Interface) -> Self {
        self.vrfs.entry(interface.vrf.clone()).or_default();
        self.interfaces.insert(name.into(), interface);
        self
    }

    /// Get a mutable reference to a VRF, creating it if it does not exist.
    pub fn vrf_mut(&mut self, name: &str) -> &mut Vrf {
        self.vrfs.entry(name.to_string()).or_default()
    }

    /// Look up a routing policy (or route map) by name.
    pub fn policy(&self, name: &str) -> Result<&dyn RoutingPolicy, PolicyError> {
        if let Some(p) = self.policies.get(name) {
            return Ok(p.as_ref());
        }
        self.route_maps
            .get(name)
            .map(|r| r as &dyn RoutingPolicy)
            .ok_or_else(|| PolicyError::UndefinedPolicy(name.to_string()))
    }

    /// Iterate over all interfaces of a VRF.
    pub fn vrf_interfaces<'a>(
        &'a self,
        vrf: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Interface)> + 'a {
        self.interfaces.iter().filter(move |(_, i)| i.vrf == vrf)
    }

    /// Local address of a BGP session: the configured local address, or the address of the active
    /// interface in `vrf` whose subnet contains the peer.
    pub fn session_local_ip(&self, vrf: &str, neighbor: &BgpNeighbor) -> Option<Ip> {
        neighbor.local_ip.or_else(|| {
            self.vrf_interfaces(vrf)
                .filter(|(_, i)| i.active)
                .filter_map(|(_, i)| i.address)
                .find(|a| a.contains(&neighbor.peer_ip) && a.addr() != neighbor.peer_ip)
                .map(|a| a.addr())
        })
    }

    /// Names of all VRFs, including those only referenced by interfaces.
    pub fn vrf_names(&self) -> BTreeSet<String> {
        self.vrfs
            .keys()
            .cloned()
            .chain(self.interfaces.values().map(|i| i.vrf.clone()))
            .collect()
    }
}

/// OSPF settings of an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OspfInterface {
    /// Area of the interface
    #[serde(default)]
    pub area: OspfArea,
    /// Explicitly configured cost
    #[serde(default)]
    pub cost: Option<u32>,
    /// Passive interfaces announce their network, but do not form adjacencies.
    #[serde(default)]
    pub passive: bool,
}

/// A layer-3 interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    /// VRF of the interface
    #[serde(default = "default_vrf")]
    pub vrf: String,
    /// Address and prefix length (host bits are kept)
    #[serde(default)]
    pub address: Option<Ipv4Net>,
    /// Whether the interface is up
    #[serde(default = "default_true")]
    pub active: bool,
    /// Loopback interfaces never form edges and are no flow sinks
    #[serde(default)]
    pub loopback: bool,
    /// Bandwidth in bits per second
    #[serde(default = "default_bandwidth")]
    pub bandwidth: f64,
    /// Access list applied to packets entering the interface
    #[serde(default)]
    pub incoming_filter: Option<String>,
    /// Access list applied to packets leaving the interface
    #[serde(default)]
    pub outgoing_filter: Option<String>,
    /// OSPF settings, if OSPF is enabled on the interface
    #[serde(default)]
    pub ospf: Option<OspfInterface>,
}

impl Interface {
    /// Create an active interface in the default VRF with the given address.
    pub fn new(address: Ipv4Net) -> Self {
        Self {
            vrf: default_vrf(),
            address: Some(address),
            active: true,
            loopback: false,
            bandwidth: default_bandwidth(),
            incoming_filter: None,
            outgoing_filter: None,
            ospf: None,
        }
    }

    /// Create a loopback interface.
    pub fn loopback(address: Ipv4Net) -> Self {
        Self {
            loopback: true,
            ..Self::new(address)
        }
    }

    /// Enable OSPF on the interface.
    pub fn with_ospf(mut self, area: impl Into<OspfArea>, cost: Option<u32>) -> Self {
        self.ospf = Some(OspfInterface {
            area: area.into(),
            cost,
            passive: false,
        });
        self
    }

    /// Set the VRF of the interface.
    pub fn with_vrf(mut self, vrf: impl Into<String>) -> Self {
        self.vrf = vrf.into();
        self
    }

    /// Set the incoming filter.
    pub fn with_incoming_filter(mut self, acl: impl Into<String>) -> Self {
        self.incoming_filter = Some(acl.into());
        self
    }

    /// Set the outgoing filter.
    pub fn with_outgoing_filter(mut self, acl: impl Into<String>) -> Self {
        self.outgoing_filter = Some(acl.into());
        self
    }

    /// Shut the interface down.
    pub fn shutdown(mut self) -> Self {
        self.active = false;
        self
    }

    /// Address of the interface.
    pub fn ip(&self) -> Option<Ip> {
        self.address.map(|a| a.addr())
    }

    /// Network of the interface.
    pub fn network(&self) -> Option<Prefix> {
        self.address.map(Prefix::from)
    }

    /// Returns `true` if the interface is active and OSPF-enabled.
    pub fn ospf_enabled(&self) -> bool {
        self.active && self.address.is_some() && self.ospf.is_some()
    }
}

/// A VRF: an isolated routing context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vrf {
    /// Static routes
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
    /// Generated (aggregate) routes
    #[serde(default)]
    pub generated_routes: Vec<GeneratedRoute>,
    /// OSPF process
    #[serde(default)]
    pub ospf: Option<OspfProcess>,
    /// BGP process
    #[serde(default)]
    pub bgp: Option<BgpProcess>,
}

fn default_static_admin() -> u32 {
    RoutingProtocol::Static.default_admin_cost()
}

/// A static route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    /// Destination network
    pub network: Prefix,
    /// Next hop: an IP (recursive), an interface, or discard.
    pub next_hop: NextHop,
    /// Administrative distance
    #[serde(default = "default_static_admin")]
    pub admin: u32,
    /// Route tag
    #[serde(default)]
    pub tag: Option<u32>,
}

impl StaticRoute {
    /// Create a static route with the default administrative distance.
    pub fn new(network: impl Into<Prefix>, next_hop: NextHop) -> Self {
        Self {
            network: network.into(),
            next_hop,
            admin: default_static_admin(),
            tag: None,
        }
    }
}

fn default_generated_admin() -> u32 {
    RoutingProtocol::Aggregate.default_admin_cost()
}

/// A generated route, which is active whenever a more specific route exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedRoute {
    /// Aggregate network
    pub network: Prefix,
    /// Install as a discard route. Otherwise, the route is non-forwarding.
    #[serde(default = "default_true")]
    pub discard: bool,
    /// Policy selecting the contributing routes
    #[serde(default)]
    pub generation_policy: Option<String>,
    /// Administrative distance
    #[serde(default = "default_generated_admin")]
    pub admin: u32,
    /// Metric
    #[serde(default)]
    pub metric: u32,
}

impl GeneratedRoute {
    /// Create a discard generated route for `network`.
    pub fn new(network: impl Into<Prefix>) -> Self {
        Self {
            network: network.into(),
            discard: true,
            generation_policy: None,
            admin: default_generated_admin(),
            metric: 0,
        }
    }
}

fn default_reference_bandwidth() -> f64 {
    DEFAULT_REFERENCE_BANDWIDTH
}

fn default_export_metric() -> u32 {
    DEFAULT_OSPF_EXPORT_METRIC
}

/// OSPF process of a VRF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OspfProcess {
    /// Router ID
    pub router_id: Ip,
    /// Reference bandwidth for interface costs
    #[serde(default = "default_reference_bandwidth")]
    pub reference_bandwidth: f64,
    /// Policy selecting the main-RIB routes exported as external routes
    #[serde(default)]
    pub export_policy: Option<String>,
    /// Metric of exported routes
    #[serde(default = "default_export_metric")]
    pub export_metric: u32,
    /// Metric type of exported routes
    #[serde(default)]
    pub export_metric_type: OspfMetricType,
}

impl OspfProcess {
    /// Create an OSPF process without exports.
    pub fn new(router_id: Ip) -> Self {
        Self {
            router_id,
            reference_bandwidth: DEFAULT_REFERENCE_BANDWIDTH,
            export_policy: None,
            export_metric: DEFAULT_OSPF_EXPORT_METRIC,
            export_metric_type: OspfMetricType::default(),
        }
    }
}

/// A BGP neighbor (peer) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpNeighbor {
    /// Address of the peer
    pub peer_ip: Ip,
    /// Local address of the session. If unset, the address of the interface whose subnet contains
    /// the peer is used.
    #[serde(default)]
    pub local_ip: Option<Ip>,
    /// Local AS of the session, if it differs from the process
    #[serde(default)]
    pub local_as: Option<AsId>,
    /// AS of the peer
    pub remote_as: AsId,
    /// Policy applied to received routes
    #[serde(default)]
    pub import_policy: Option<String>,
    /// Policy applied to sent routes
    #[serde(default)]
    pub export_policy: Option<String>,
    /// Whether the peer is a route-reflector client
    #[serde(default)]
    pub route_reflector_client: bool,
    /// Whether communities are sent to the peer
    #[serde(default = "default_true")]
    pub send_community: bool,
    /// Whether the next hop of iBGP routes is rewritten to the local address
    #[serde(default)]
    pub next_hop_self: bool,
}

impl BgpNeighbor {
    /// Create a neighbor without policies.
    pub fn new(peer_ip: Ip, remote_as: impl Into<AsId>) -> Self {
        Self {
            peer_ip,
            local_ip: None,
            local_as: None,
            remote_as: remote_as.into(),
            import_policy: None,
            export_policy: None,
            route_reflector_client: false,
            send_community: true,
            next_hop_self: false,
        }
    }
}

/// BGP process of a VRF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpProcess {
    /// Router ID
    pub router_id: Ip,
    /// Local AS
    pub local_as: AsId,
    /// Cluster ID for route reflection. Defaults to the router ID.
    #[serde(default)]
    pub cluster_id: Option<u32>,
    /// Neighbors
    #[serde(default)]
    pub neighbors: Vec<BgpNeighbor>,
    /// Networks originated if an exact match exists in the main RIB
    #[serde(default)]
    pub networks: BTreeSet<Prefix>,
    /// Aggregates originated if a more specific BGP route exists
    #[serde(default)]
    pub aggregates: BTreeSet<Prefix>,
    /// Policy selecting the main-RIB routes redistributed into BGP
    #[serde(default)]
    pub redistribution_policy: Option<String>,
}

impl BgpProcess {
    /// Create a BGP process without neighbors.
    pub fn new(router_id: Ip, local_as: impl Into<AsId>) -> Self {
        Self {
            router_id,
            local_as: local_as.into(),
            cluster_id: None,
            neighbors: Vec::new(),
            networks: BTreeSet::new(),
            aggregates: BTreeSet::new(),
            redistribution_policy: None,
        }
    }

    /// The cluster ID used for route reflection.
    pub fn cluster_id(&self) -> u32 {
        self.cluster_id.unwrap_or_else(|| self.router_id.into())
    }

    /// Find the neighbor configuration for a peer address.
    pub fn neighbor(&self, peer_ip: Ip) -> Option<&BgpNeighbor> {
        self.neighbors.iter().find(|n| n.peer_ip == peer_ip)
    }

    /// Local AS of a session.
    pub fn session_local_as(&self, neighbor: &BgpNeighbor) -> AsId {
        neighbor.local_as.unwrap_or(self.local_as)
    }
}

/// A BGP advertisement injected from outside the modeled network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAnnouncement {
    /// Node receiving the advertisement
    pub node: String,
    /// VRF receiving the advertisement
    #[serde(default = "default_vrf")]
    pub vrf: String,
    /// Address of the (external) peer sending the advertisement. Must match a configured neighbor.
    pub peer_ip: Ip,
    /// Advertised network
    pub network: Prefix,
    /// AS path as a sequence
    #[serde(default)]
    pub as_path: Vec<AsId>,
    /// Communities
    #[serde(default)]
    pub communities: BTreeSet<u32>,
    /// MED
    #[serde(default)]
    pub med: u32,
    /// Local preference (only used on iBGP sessions)
    #[serde(default)]
    pub local_preference: Option<u32>,
    /// Origin type
    #[serde(default)]
    pub origin_type: OriginType,
    /// Next hop. Defaults to the peer address.
    #[serde(default)]
    pub next_hop: Option<Ip>,
}

impl ExternalAnnouncement {
    /// Create an announcement for `network` with the given AS path.
    pub fn new(
        node: impl Into<String>,
        peer_ip: Ip,
        network: impl Into<Prefix>,
        as_path: Vec<AsId>,
    ) -> Self {
        Self {
            node: node.into(),
            vrf: default_vrf(),
            peer_ip,
            network: network.into(),
            as_path,
            communities: BTreeSet::new(),
            med: 0,
            local_preference: None,
            origin_type: OriginType::Igp,
            next_hop: None,
        }
    }
}
