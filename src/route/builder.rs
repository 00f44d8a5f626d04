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

//! Builder for routes of any kind.

use std::{collections::BTreeSet, sync::Arc};

use super::{
    interned_bgp_attributes, AsPath, BgpAttributes, BgpRouteData, Community, NextHop,
    OriginMechanism, OriginType, OspfRouteData, Route, RouteKind, RoutingProtocol,
    TunnelEncapsulation, UNSET_IP,
};
use crate::{
    ospf::OspfArea,
    types::{AsId, Ip, Prefix, RouteError},
};

/// Attribute bundle of a builder. It stays shared with the route it was created from until the
/// first modification.
#[derive(Debug, Clone)]
enum BgpDraft {
    Shared(Arc<BgpAttributes>),
    Owned(BgpAttributes),
}

impl BgpDraft {
    fn get(&self) -> &BgpAttributes {
        match self {
            Self::Shared(a) => a.as_ref(),
            Self::Owned(a) => a,
        }
    }

    fn get_mut(&mut self) -> &mut BgpAttributes {
        if let Self::Shared(a) = self {
            *self = Self::Owned(a.as_ref().clone());
        }
        match self {
            Self::Owned(a) => a,
            Self::Shared(a) => Arc::make_mut(a),
        }
    }

    fn build(&self) -> Arc<BgpAttributes> {
        match self {
            Self::Shared(a) => a.clone(),
            Self::Owned(a) => interned_bgp_attributes(a.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum DraftKind {
    Plain,
    Ospf(OspfRouteData),
    Bgp {
        attributes: BgpDraft,
        path_id: Option<u32>,
        received_from_ip: Ip,
    },
}

/// Builder for [`Route`]. The kind of route is fixed when the builder is created. Setters of
/// another kind's attributes (e.g., setting the local preference on an OSPF route) are ignored.
///
/// ```
/// # use ribsim::route::{RouteBuilder, RoutingProtocol, NextHop};
/// # use ribsim_macros::{prefix, ip};
/// let route = RouteBuilder::bgp()
///     .network(prefix!("10.0.0.0/8"))
///     .protocol(RoutingProtocol::Bgp)
///     .next_hop(NextHop::Ip(ip!("1.0.0.1")))
///     .local_preference(200)
///     .build()
///     .unwrap();
/// assert_eq!(route.to_builder().build().unwrap(), route);
///
/// let err = RouteBuilder::bgp()
///     .network(prefix!("10.0.0.0/8"))
///     .protocol(RoutingProtocol::OspfIntra)
///     .next_hop(NextHop::Discard)
///     .build();
/// assert!(err.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RouteBuilder {
    network: Option<Prefix>,
    protocol: Option<RoutingProtocol>,
    admin: Option<u32>,
    metric: u32,
    next_hop: Option<NextHop>,
    tag: Option<u32>,
    non_routing: bool,
    non_forwarding: bool,
    kind: DraftKind,
}

impl Default for RouteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteBuilder {
    /// Create a builder for connected, static, or generated routes.
    pub fn new() -> Self {
        Self::with_kind(DraftKind::Plain)
    }

    /// Create a builder for BGP routes, initialized with the default attributes.
    pub fn bgp() -> Self {
        Self::with_kind(DraftKind::Bgp {
            attributes: BgpDraft::Owned(BgpAttributes::default()),
            path_id: None,
            received_from_ip: UNSET_IP,
        })
    }

    /// Create a builder for OSPF routes advertised by `advertiser` in `area`.
    pub fn ospf(area: impl Into<OspfArea>, advertiser: impl Into<String>) -> Self {
        Self::with_kind(DraftKind::Ospf(OspfRouteData {
            area: area.into(),
            cost_to_advertiser: 0,
            advertiser: advertiser.into(),
        }))
    }

    fn with_kind(kind: DraftKind) -> Self {
        Self {
            network: None,
            protocol: None,
            admin: None,
            metric: 0,
            next_hop: None,
            tag: None,
            non_routing: false,
            non_forwarding: false,
            kind,
        }
    }

    pub(super) fn from_route(route: &Route) -> Self {
        let kind = match &route.kind {
            RouteKind::Plain => DraftKind::Plain,
            RouteKind::Ospf(data) => DraftKind::Ospf(data.clone()),
            RouteKind::Bgp(data) => DraftKind::Bgp {
                attributes: BgpDraft::Shared(data.attributes.clone()),
                path_id: data.path_id,
                received_from_ip: data.received_from_ip,
            },
        };
        Self {
            network: Some(route.network),
            protocol: Some(route.protocol),
            admin: Some(route.admin),
            metric: route.metric,
            next_hop: Some(route.next_hop.clone()),
            tag: route.tag,
            non_routing: route.non_routing,
            non_forwarding: route.non_forwarding,
            kind,
        }
    }

    /// Build the route. Fails if a required field is missing, or if the protocol is not legal
    /// for the kind of route.
    pub fn build(&self) -> Result<Route, RouteError> {
        let network = self.network.ok_or(RouteError::MissingNetwork)?;
        let protocol = self.protocol.ok_or(RouteError::MissingProtocol)?;
        let next_hop = self.next_hop.clone().ok_or(RouteError::MissingNextHop)?;
        let kind = match &self.kind {
            DraftKind::Plain => RouteKind::Plain,
            DraftKind::Ospf(data) => RouteKind::Ospf(data.clone()),
            DraftKind::Bgp {
                attributes,
                path_id,
                received_from_ip,
            } => RouteKind::Bgp(BgpRouteData {
                attributes: attributes.build(),
                path_id: *path_id,
                received_from_ip: *received_from_ip,
            }),
        };
        if !kind.allows(protocol) {
            return Err(RouteError::InvalidRouteConstruction {
                kind: kind.name().to_string(),
                protocol,
            });
        }
        Ok(Route {
            network,
            protocol,
            admin: self.admin.unwrap_or_else(|| protocol.default_admin_cost()),
            metric: self.metric,
            next_hop,
            tag: self.tag,
            non_routing: self.non_routing,
            non_forwarding: self.non_forwarding,
            kind,
        })
    }

    /// Set the destination network.
    pub fn network(&mut self, network: impl Into<Prefix>) -> &mut Self {
        self.network = Some(network.into());
        self
    }

    /// Set the protocol.
    pub fn protocol(&mut self, protocol: RoutingProtocol) -> &mut Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the administrative distance. If unset, the protocol default is used.
    pub fn admin(&mut self, admin: u32) -> &mut Self {
        self.admin = Some(admin);
        self
    }

    /// Set the metric (OSPF cost or BGP MED).
    pub fn metric(&mut self, metric: u32) -> &mut Self {
        self.metric = metric;
        self
    }

    /// Set the next hop.
    pub fn next_hop(&mut self, next_hop: NextHop) -> &mut Self {
        self.next_hop = Some(next_hop);
        self
    }

    /// Set the route tag.
    pub fn tag(&mut self, tag: Option<u32>) -> &mut Self {
        self.tag = tag;
        self
    }

    /// Mark the route as non-routing.
    pub fn non_routing(&mut self, non_routing: bool) -> &mut Self {
        self.non_routing = non_routing;
        self
    }

    /// Mark the route as non-forwarding.
    pub fn non_forwarding(&mut self, non_forwarding: bool) -> &mut Self {
        self.non_forwarding = non_forwarding;
        self
    }

    /// Set the cost to the advertising router (OSPF only).
    pub fn cost_to_advertiser(&mut self, cost: u32) -> &mut Self {
        if let DraftKind::Ospf(data) = &mut self.kind {
            data.cost_to_advertiser = cost;
        }
        self
    }

    fn bgp_mut(&mut self) -> Option<&mut BgpAttributes> {
        match &mut self.kind {
            DraftKind::Bgp { attributes, .. } => Some(attributes.get_mut()),
            _ => None,
        }
    }

    /// Set the AS path (BGP only).
    pub fn as_path(&mut self, as_path: AsPath) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.as_path = as_path;
        }
        self
    }

    /// Prepend an AS to the AS path (BGP only).
    pub fn prepend_as(&mut self, as_id: impl Into<AsId>) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.as_path = a.as_path.prepend(as_id.into());
        }
        self
    }

    /// Replace all communities (BGP only).
    pub fn communities(&mut self, communities: BTreeSet<Community>) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.communities = communities;
        }
        self
    }

    /// Add a community (BGP only).
    pub fn add_community(&mut self, community: impl Into<Community>) -> &mut Self {
        let community = community.into();
        if let Some(a) = self.bgp_mut() {
            a.communities.insert(community);
        }
        self
    }

    /// Remove a community (BGP only).
    pub fn remove_community(&mut self, community: impl Into<Community>) -> &mut Self {
        let community = community.into();
        if let Some(a) = self.bgp_mut() {
            a.communities.remove(&community);
        }
        self
    }

    /// Set the local preference (BGP only).
    pub fn local_preference(&mut self, local_preference: u32) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.local_preference = local_preference;
        }
        self
    }

    /// Set the origin type (BGP only).
    pub fn origin_type(&mut self, origin_type: OriginType) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.origin_type = origin_type;
        }
        self
    }

    /// Set the origin mechanism (BGP only).
    pub fn origin_mechanism(&mut self, origin_mechanism: OriginMechanism) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.origin_mechanism = origin_mechanism;
        }
        self
    }

    /// Replace the cluster list (BGP only).
    pub fn cluster_list(&mut self, cluster_list: BTreeSet<u32>) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.cluster_list = cluster_list;
        }
        self
    }

    /// Add a cluster id to the cluster list (BGP only).
    pub fn add_cluster_id(&mut self, cluster_id: u32) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.cluster_list.insert(cluster_id);
        }
        self
    }

    /// Set the weight (BGP only).
    pub fn weight(&mut self, weight: u32) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.weight = weight;
        }
        self
    }

    /// Set the originator IP (BGP only).
    pub fn originator_ip(&mut self, originator_ip: Ip) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.originator_ip = originator_ip;
        }
        self
    }

    /// Set whether the route was received from a route-reflector client (BGP only).
    pub fn received_from_route_reflector_client(&mut self, value: bool) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.received_from_route_reflector_client = value;
        }
        self
    }

    /// Set the protocol from which the route was redistributed (BGP only).
    pub fn src_protocol(&mut self, src_protocol: Option<RoutingProtocol>) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.src_protocol = src_protocol;
        }
        self
    }

    /// Set the tunnel encapsulation attribute (BGP only).
    pub fn tunnel_encapsulation(&mut self, tunnel: Option<TunnelEncapsulation>) -> &mut Self {
        if let Some(a) = self.bgp_mut() {
            a.tunnel_encapsulation = tunnel;
        }
        self
    }

    /// Set the additional-paths identifier (BGP only).
    pub fn path_id(&mut self, id: Option<u32>) -> &mut Self {
        if let DraftKind::Bgp { path_id, .. } = &mut self.kind {
            *path_id = id;
        }
        self
    }

    /// Set the address of the peer from which the route was received (BGP only).
    pub fn received_from_ip(&mut self, ip: Ip) -> &mut Self {
        if let DraftKind::Bgp {
            received_from_ip, ..
        } = &mut self.kind
        {
            *received_from_ip = ip;
        }
        self
    }

    /// Currently configured next hop.
    pub fn get_next_hop(&self) -> Option<&NextHop> {
        self.next_hop.as_ref()
    }

    /// Currently configured BGP attributes, if this builds a BGP route.
    pub fn get_bgp_attributes(&self) -> Option<&BgpAttributes> {
        match &self.kind {
            DraftKind::Bgp { attributes, .. } => Some(attributes.get()),
            _ => None,
        }
    }

    /// Returns `true` if the builder builds BGP routes.
    pub fn is_bgp(&self) -> bool {
        matches!(self.kind, DraftKind::Bgp { .. })
    }
}
