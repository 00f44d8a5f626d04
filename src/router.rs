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

//! Module defining the virtual routers. A [`Node`] holds one [`VirtualRouter`] per VRF. Each
//! virtual router owns all of its RIBs, and exposes the phase operations of the fixed-point
//! computation. Operations named `propagate_*` only read the committed RIBs of other routers and
//! write candidates into the staging RIBs. The matching `unstage_*` operations commit them.

use std::{
    collections::BTreeMap,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, trace};

use crate::{
    bgp::{BgpPeerId, BgpSession, BgpTopology},
    config::{BgpNeighbor, BgpProcess, Configuration, ExternalAnnouncement, Interface},
    fib::Fib,
    ospf::{interface_cost, OspfArea},
    policy::{apply_named_policy, PolicyDirection, PolicyEnvironment},
    rib::{Rib, RibKind},
    route::{
        AsPath, Community, NextHop, OriginMechanism, OriginType, Route, RouteBuilder,
        RoutingProtocol, DEFAULT_LOCAL_PREFERENCE, DEFAULT_LOCAL_WEIGHT, UNSET_IP,
    },
    topology::{IpOwners, Topology},
    types::{Ip, NetworkError, NodeInterfacePair, Prefix},
};

/// Administrative distance of BGP routes originated by the router itself.
pub const LOCAL_BGP_ADMIN_COST: u32 = 200;

/// A device of the network, holding one virtual router per VRF.
#[derive(Debug)]
pub struct Node {
    pub(crate) config: Arc<Configuration>,
    pub(crate) virtual_routers: BTreeMap<String, VirtualRouter>,
}

impl Node {
    /// Create a node with an empty virtual router for every VRF of the configuration.
    pub fn new(config: Arc<Configuration>) -> Self {
        let virtual_routers = config
            .vrf_names()
            .into_iter()
            .map(|vrf| (vrf.clone(), VirtualRouter::new(config.clone(), vrf)))
            .collect();
        Self {
            config,
            virtual_routers,
        }
    }

    /// Configuration of the node.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Get a virtual router by VRF name.
    pub fn virtual_router(&self, vrf: &str) -> Option<&VirtualRouter> {
        self.virtual_routers.get(vrf)
    }

    /// Iterate over all virtual routers.
    pub fn virtual_routers(&self) -> impl Iterator<Item = (&String, &VirtualRouter)> {
        self.virtual_routers.iter()
    }
}

/// RIBs holding candidates of the current round, before they are committed.
#[derive(Debug)]
struct StagingRibs {
    ospf_intra: Rib,
    ospf_inter: Rib,
    ospf_e1: Rib,
    ospf_e2: Rib,
    ebgp: Rib,
    ibgp: Rib,
}

impl Default for StagingRibs {
    fn default() -> Self {
        Self {
            ospf_intra: Rib::new(RibKind::OspfIntra),
            ospf_inter: Rib::new(RibKind::OspfInter),
            ospf_e1: Rib::new(RibKind::OspfE1),
            ospf_e2: Rib::new(RibKind::OspfE2),
            ebgp: Rib::new(RibKind::Bgp),
            ibgp: Rib::new(RibKind::Bgp),
        }
    }
}

/// An OSPF adjacency from the point of view of the receiving router.
struct OspfAdjacency<'a> {
    interface: &'a str,
    area: OspfArea,
    cost: u32,
    neighbor: &'a VirtualRouter,
    neighbor_ip: Ip,
}

/// The routing state of one VRF of a node.
#[derive(Debug)]
pub struct VirtualRouter {
    pub(crate) hostname: String,
    pub(crate) vrf: String,
    pub(crate) config: Arc<Configuration>,

    pub(crate) connected_rib: Rib,
    pub(crate) static_interface_rib: Rib,
    pub(crate) static_rib: Rib,
    pub(crate) generated_rib: Rib,
    /// Routes that never change after the first phases: connected, interface static routes, and
    /// OSPF internal routes.
    pub(crate) independent_rib: Rib,
    pub(crate) main_rib: Rib,
    pub(crate) prev_main_rib: Rib,

    pub(crate) ospf_interface_costs: BTreeMap<String, u32>,
    pub(crate) ospf_intra_rib: Rib,
    pub(crate) ospf_inter_rib: Rib,
    pub(crate) ospf_export_rib: Rib,
    pub(crate) ospf_e1_rib: Rib,
    pub(crate) ospf_e2_rib: Rib,
    pub(crate) prev_ospf_e1_rib: Rib,
    pub(crate) prev_ospf_e2_rib: Rib,
    pub(crate) ospf_rib: Rib,

    pub(crate) base_ebgp_rib: Rib,
    pub(crate) base_ibgp_rib: Rib,
    pub(crate) ebgp_rib: Rib,
    pub(crate) ibgp_rib: Rib,
    pub(crate) bgp_rib: Rib,
    pub(crate) prev_bgp_rib: Rib,

    staging: Mutex<StagingRibs>,
    pub(crate) fib: Fib,
}

impl VirtualRouter {
    /// Create a virtual router with empty RIBs.
    pub fn new(config: Arc<Configuration>, vrf: impl Into<String>) -> Self {
        Self {
            hostname: config.hostname.clone(),
            vrf: vrf.into(),
            config,
            connected_rib: Rib::new(RibKind::Connected),
            static_interface_rib: Rib::new(RibKind::Static),
            static_rib: Rib::new(RibKind::Static),
            generated_rib: Rib::new(RibKind::Generated),
            independent_rib: Rib::new(RibKind::Main),
            main_rib: Rib::new(RibKind::Main),
            prev_main_rib: Rib::new(RibKind::Main),
            ospf_interface_costs: BTreeMap::new(),
            ospf_intra_rib: Rib::new(RibKind::OspfIntra),
            ospf_inter_rib: Rib::new(RibKind::OspfInter),
            ospf_export_rib: Rib::new(RibKind::Ospf),
            ospf_e1_rib: Rib::new(RibKind::OspfE1),
            ospf_e2_rib: Rib::new(RibKind::OspfE2),
            prev_ospf_e1_rib: Rib::new(RibKind::OspfE1),
            prev_ospf_e2_rib: Rib::new(RibKind::OspfE2),
            ospf_rib: Rib::new(RibKind::Ospf),
            base_ebgp_rib: Rib::new(RibKind::Bgp),
            base_ibgp_rib: Rib::new(RibKind::Bgp),
            ebgp_rib: Rib::new(RibKind::Bgp),
            ibgp_rib: Rib::new(RibKind::Bgp),
            bgp_rib: Rib::new(RibKind::Bgp),
            prev_bgp_rib: Rib::new(RibKind::Bgp),
            staging: Mutex::new(StagingRibs::default()),
            fib: Fib::default(),
        }
    }

    /// Hostname of the node.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Name of the VRF.
    pub fn vrf(&self) -> &str {
        &self.vrf
    }

    /// The main RIB.
    pub fn main_rib(&self) -> &Rib {
        &self.main_rib
    }

    /// The combined BGP RIB.
    pub fn bgp_rib(&self) -> &Rib {
        &self.bgp_rib
    }

    /// The combined OSPF RIB.
    pub fn ospf_rib(&self) -> &Rib {
        &self.ospf_rib
    }

    /// The forwarding table.
    pub fn fib(&self) -> &Fib {
        &self.fib
    }

    fn staging(&self) -> MutexGuard<'_, StagingRibs> {
        self.staging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn staging_mut(&mut self) -> &mut StagingRibs {
        self.staging.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn interfaces(&self) -> impl Iterator<Item = (&String, &Interface)> {
        self.config.vrf_interfaces(&self.vrf)
    }

    fn ospf_process(&self) -> Option<&crate::config::OspfProcess> {
        self.config.vrfs.get(&self.vrf).and_then(|v| v.ospf.as_ref())
    }

    fn bgp_process(&self) -> Option<&BgpProcess> {
        self.config.vrfs.get(&self.vrf).and_then(|v| v.bgp.as_ref())
    }

    fn env(&self) -> PolicyEnvironment<'_> {
        PolicyEnvironment::new(&self.config, &self.vrf)
    }

    /// Create the connected routes of all active interfaces, and add them to the independent and
    /// the main RIB.
    pub fn init_connected(&mut self) -> Result<(), NetworkError> {
        let mut routes = Vec::new();
        for (name, iface) in self.interfaces().filter(|(_, i)| i.active) {
            let Some(network) = iface.network() else {
                continue;
            };
            routes.push(
                RouteBuilder::new()
                    .network(network)
                    .protocol(RoutingProtocol::Connected)
                    .next_hop(NextHop::Interface {
                        interface: name.clone(),
                        ip: None,
                    })
                    .build()?,
            );
        }
        for route in routes {
            self.connected_rib.merge(route);
        }
        self.independent_rib.import(&self.connected_rib);
        self.main_rib.import(&self.connected_rib);
        Ok(())
    }

    /// Install static routes that do not depend on other routes: routes out of an active
    /// interface, and discard routes.
    pub fn init_static(&mut self) -> Result<(), NetworkError> {
        let Some(vrf) = self.config.vrfs.get(&self.vrf) else {
            return Ok(());
        };
        let mut routes = Vec::new();
        for sr in vrf.static_routes.iter() {
            match &sr.next_hop {
                NextHop::Interface { interface, .. } => {
                    let active = self
                        .config
                        .interfaces
                        .get(interface)
                        .map(|i| i.active && i.vrf == self.vrf)
                        .unwrap_or(false);
                    if !active {
                        trace!("{}: skip static route {}", self.hostname, sr.network);
                        continue;
                    }
                }
                NextHop::Discard => {}
                _ => continue,
            }
            routes.push(
                RouteBuilder::new()
                    .network(sr.network)
                    .protocol(RoutingProtocol::Static)
                    .admin(sr.admin)
                    .tag(sr.tag)
                    .next_hop(sr.next_hop.clone())
                    .build()?,
            );
        }
        for route in routes {
            self.static_interface_rib.merge(route);
        }
        self.independent_rib.import(&self.static_interface_rib);
        self.main_rib.import(&self.static_interface_rib);
        Ok(())
    }

    /// Activate static routes with a next-hop address, whose next hop is resolvable in the main
    /// RIB. Activating one route can make another one resolvable, so this repeats until no more
    /// routes are activated. Returns `true` if any route was activated.
    pub fn activate_static_routes(&mut self) -> Result<bool, NetworkError> {
        let Some(vrf) = self.config.vrfs.get(&self.vrf) else {
            return Ok(false);
        };
        let mut pending: Vec<_> = vrf
            .static_routes
            .iter()
            .filter(|sr| matches!(sr.next_hop, NextHop::Ip(_)))
            .collect();
        let mut changed = false;
        loop {
            let mut activated = Vec::new();
            pending.retain(|sr| {
                let resolvable = sr
                    .next_hop
                    .ip()
                    .and_then(|nh| self.main_rib.longest_match_excluding(nh, &sr.network))
                    .is_some();
                if resolvable {
                    activated.push(*sr);
                }
                !resolvable
            });
            if activated.is_empty() {
                break;
            }
            for sr in activated {
                let route = RouteBuilder::new()
                    .network(sr.network)
                    .protocol(RoutingProtocol::Static)
                    .admin(sr.admin)
                    .tag(sr.tag)
                    .next_hop(sr.next_hop.clone())
                    .build()?;
                self.static_rib.merge(route.clone());
                changed |= self.main_rib.merge(route);
            }
        }
        Ok(changed)
    }

    /// Activate generated routes for which a strictly more specific contributing route exists in
    /// the main RIB of this or of the previous iteration. Active generated routes can contribute
    /// to others, so this repeats until no more routes are activated. Returns `true` if any route
    /// was activated.
    pub fn activate_generated_routes(&mut self) -> Result<bool, NetworkError> {
        let Some(vrf) = self.config.vrfs.get(&self.vrf) else {
            return Ok(false);
        };
        let mut pending: Vec<_> = vrf.generated_routes.iter().collect();
        let mut changed = false;
        loop {
            let mut activated = Vec::new();
            let mut remaining = Vec::new();
            for gr in pending {
                let env = self.env();
                let mut active = false;
                for contributor in self
                    .main_rib
                    .more_specific_routes(&gr.network)
                    .chain(self.prev_main_rib.more_specific_routes(&gr.network))
                {
                    let mut scratch = contributor.to_builder();
                    if apply_named_policy(
                        gr.generation_policy.as_deref(),
                        contributor,
                        &mut scratch,
                        PolicyDirection::Out,
                        &env,
                    )? {
                        active = true;
                        break;
                    }
                }
                if active {
                    activated.push(gr);
                } else {
                    remaining.push(gr);
                }
            }
            pending = remaining;
            if activated.is_empty() {
                break;
            }
            for gr in activated {
                let route = RouteBuilder::new()
                    .network(gr.network)
                    .protocol(RoutingProtocol::Aggregate)
                    .admin(gr.admin)
                    .metric(gr.metric)
                    .next_hop(NextHop::Discard)
                    .non_forwarding(!gr.discard)
                    .build()?;
                self.generated_rib.merge(route.clone());
                changed |= self.main_rib.merge(route);
            }
        }
        Ok(changed)
    }

    /// Compute the OSPF cost of every OSPF-enabled interface.
    pub fn init_ospf_interface_costs(&mut self) {
        let Some(process) = self.ospf_process() else {
            return;
        };
        let reference = process.reference_bandwidth;
        let costs = self
            .interfaces()
            .filter(|(_, i)| i.ospf_enabled())
            .filter_map(|(name, i)| {
                let ospf = i.ospf.as_ref()?;
                Some((
                    name.clone(),
                    interface_cost(ospf.cost, reference, i.bandwidth),
                ))
            })
            .collect();
        self.ospf_interface_costs = costs;
    }

    /// Create the intra-area routes for the networks of all OSPF-enabled interfaces (including
    /// passive ones).
    pub fn init_base_ospf_routes(&mut self) -> Result<(), NetworkError> {
        if self.ospf_process().is_none() {
            return Ok(());
        }
        let mut routes = Vec::new();
        for (name, iface) in self.interfaces().filter(|(_, i)| i.ospf_enabled()) {
            let (Some(network), Some(ospf), Some(cost)) = (
                iface.network(),
                iface.ospf.as_ref(),
                self.ospf_interface_costs.get(name),
            ) else {
                continue;
            };
            routes.push(
                RouteBuilder::ospf(ospf.area, &self.hostname)
                    .network(network)
                    .protocol(RoutingProtocol::OspfIntra)
                    .metric(*cost)
                    .next_hop(NextHop::Interface {
                        interface: name.clone(),
                        ip: None,
                    })
                    .build()?,
            );
        }
        for route in routes {
            self.ospf_intra_rib.merge(route);
        }
        Ok(())
    }

    /// Returns `true` if the router has OSPF interfaces in the backbone and in another area.
    pub fn is_area_border_router(&self) -> bool {
        let mut backbone = false;
        let mut other = false;
        for (_, iface) in self.interfaces().filter(|(_, i)| i.ospf_enabled()) {
            if let Some(ospf) = iface.ospf.as_ref() {
                if ospf.area.is_backbone() {
                    backbone = true;
                } else {
                    other = true;
                }
            }
        }
        backbone && other
    }

    /// All OSPF adjacencies over which this router receives routes.
    fn ospf_adjacencies<'a>(
        &'a self,
        nodes: &'a BTreeMap<String, Node>,
        topology: &'a Topology,
    ) -> Vec<OspfAdjacency<'a>> {
        let mut result = Vec::new();
        if self.ospf_process().is_none() {
            return result;
        }
        for (name, iface) in self.interfaces().filter(|(_, i)| i.ospf_enabled()) {
            let Some(ospf) = iface.ospf.as_ref().filter(|o| !o.passive) else {
                continue;
            };
            let Some(cost) = self.ospf_interface_costs.get(name) else {
                continue;
            };
            let nip = NodeInterfacePair::new(&self.hostname, name);
            for edge in topology.edges_from(&nip) {
                let Some(remote) = nodes.get(&edge.to.node) else {
                    continue;
                };
                let Some(remote_iface) = remote.config.interfaces.get(&edge.to.interface) else {
                    continue;
                };
                let same_area = remote_iface
                    .ospf
                    .as_ref()
                    .map(|o| !o.passive && o.area == ospf.area)
                    .unwrap_or(false);
                if !remote_iface.ospf_enabled() || !same_area {
                    continue;
                }
                let (Some(neighbor), Some(neighbor_ip)) = (
                    remote.virtual_routers.get(&remote_iface.vrf),
                    remote_iface.ip(),
                ) else {
                    continue;
                };
                if neighbor.ospf_process().is_none() {
                    continue;
                }
                result.push(OspfAdjacency {
                    interface: name.as_str(),
                    area: ospf.area,
                    cost: *cost,
                    neighbor,
                    neighbor_ip,
                });
            }
        }
        result
    }

    /// Compute intra- and inter-area candidates from the committed OSPF RIBs of all neighbors, and
    /// merge them into the staging RIBs. Returns `true` if a staging RIB changed.
    pub fn propagate_ospf_internal(
        &self,
        nodes: &BTreeMap<String, Node>,
        topology: &Topology,
    ) -> Result<bool, NetworkError> {
        let mut staged = self.staging();
        let mut changed = false;
        for adj in self.ospf_adjacencies(nodes, topology) {
            let neighbor_abr = adj.neighbor.is_area_border_router();
            let next_hop = NextHop::Interface {
                interface: adj.interface.to_string(),
                ip: Some(adj.neighbor_ip),
            };

            for r in adj.neighbor.ospf_intra_rib.routes() {
                let Some(data) = r.ospf() else { continue };
                if data.advertiser == self.hostname {
                    continue;
                }
                if data.area == adj.area {
                    let route = RouteBuilder::ospf(adj.area, &data.advertiser)
                        .network(r.network())
                        .protocol(RoutingProtocol::OspfIntra)
                        .metric(r.metric().saturating_add(adj.cost))
                        .next_hop(next_hop.clone())
                        .build()?;
                    changed |= staged.ospf_intra.merge(route);
                } else if neighbor_abr {
                    // summarized by the area border router
                    let route = RouteBuilder::ospf(adj.area, &adj.neighbor.hostname)
                        .network(r.network())
                        .protocol(RoutingProtocol::OspfInter)
                        .metric(r.metric().saturating_add(adj.cost))
                        .next_hop(next_hop.clone())
                        .build()?;
                    changed |= staged.ospf_inter.merge(route);
                }
            }

            for r in adj.neighbor.ospf_inter_rib.routes() {
                let Some(data) = r.ospf() else { continue };
                if data.advertiser == self.hostname {
                    continue;
                }
                let advertiser = if data.area == adj.area {
                    &data.advertiser
                } else if neighbor_abr && data.area.is_backbone() {
                    &adj.neighbor.hostname
                } else {
                    continue;
                };
                let route = RouteBuilder::ospf(adj.area, advertiser)
                    .network(r.network())
                    .protocol(RoutingProtocol::OspfInter)
                    .metric(r.metric().saturating_add(adj.cost))
                    .next_hop(next_hop.clone())
                    .build()?;
                changed |= staged.ospf_inter.merge(route);
            }
        }
        Ok(changed)
    }

    /// Commit the staged intra- and inter-area routes. Returns `true` if a RIB changed.
    pub fn unstage_ospf_internal(&mut self) -> bool {
        let staged = mem::take(self.staging_mut());
        let mut changed = self.ospf_intra_rib.import(&staged.ospf_intra);
        changed |= self.ospf_inter_rib.import(&staged.ospf_inter);
        *self.staging_mut() = staged;
        changed
    }

    /// Add the converged OSPF internal routes to the independent RIB.
    pub fn import_ospf_internal(&mut self) {
        self.ospf_rib.import(&self.ospf_intra_rib);
        self.ospf_rib.import(&self.ospf_inter_rib);
        self.independent_rib.import(&self.ospf_rib);
    }

    /// Move the dependent RIBs into their `prev_*` counterparts and create fresh ones, seeded only
    /// with routes that cannot change. This lets routes disappear that are no longer supported.
    pub fn reset_dependent_ribs(&mut self) {
        self.prev_main_rib = mem::replace(&mut self.main_rib, Rib::new(RibKind::Main));
        self.prev_ospf_e1_rib = mem::replace(&mut self.ospf_e1_rib, Rib::new(RibKind::OspfE1));
        self.prev_ospf_e2_rib = mem::replace(&mut self.ospf_e2_rib, Rib::new(RibKind::OspfE2));
        self.prev_bgp_rib = mem::replace(&mut self.bgp_rib, Rib::new(RibKind::Bgp));

        self.ebgp_rib = self.base_ebgp_rib.clone();
        self.ibgp_rib = self.base_ibgp_rib.clone();
        self.static_rib = Rib::new(RibKind::Static);
        self.generated_rib = Rib::new(RibKind::Generated);
        self.ospf_export_rib = Rib::new(RibKind::Ospf);
        *self.staging_mut() = StagingRibs::default();

        self.main_rib.import(&self.independent_rib);
        self.ospf_rib = Rib::new(RibKind::Ospf);
        self.ospf_rib.import(&self.ospf_intra_rib);
        self.ospf_rib.import(&self.ospf_inter_rib);
    }

    /// Apply the OSPF export policy to the main RIB of this and of the previous iteration. Accepted
    /// routes are advertised as external routes by this router.
    pub fn init_ospf_exports(&mut self) -> Result<(), NetworkError> {
        let Some(process) = self.ospf_process() else {
            return Ok(());
        };
        let Some(policy) = process.export_policy.as_deref() else {
            return Ok(());
        };
        let env = self.env();
        let mut exports = Vec::new();
        for route in self
            .main_rib
            .routes()
            .chain(self.prev_main_rib.routes())
            .filter(|r| !r.protocol().is_ospf())
        {
            let mut out = RouteBuilder::ospf(OspfArea::BACKBONE, &self.hostname);
            out.network(route.network())
                .protocol(process.export_metric_type.protocol())
                .metric(process.export_metric)
                .tag(route.tag())
                .next_hop(NextHop::SelfAddress);
            if apply_named_policy(Some(policy), route, &mut out, PolicyDirection::Out, &env)? {
                exports.push(out.build()?);
            } else {
                trace!("{}: not exported into OSPF: {route}", self.hostname);
            }
        }
        for route in exports {
            self.ospf_export_rib.merge(route);
        }
        Ok(())
    }

    /// Compute external candidates from the exports and the committed external RIBs of all
    /// neighbors. Returns `true` if a staging RIB changed.
    pub fn propagate_ospf_external(
        &self,
        nodes: &BTreeMap<String, Node>,
        topology: &Topology,
    ) -> Result<bool, NetworkError> {
        let mut staged = self.staging();
        let mut changed = false;
        for adj in self.ospf_adjacencies(nodes, topology) {
            let next_hop = NextHop::Interface {
                interface: adj.interface.to_string(),
                ip: Some(adj.neighbor_ip),
            };
            let candidates = adj
                .neighbor
                .ospf_export_rib
                .routes()
                .chain(adj.neighbor.ospf_e1_rib.routes())
                .chain(adj.neighbor.ospf_e2_rib.routes());
            for r in candidates {
                let Some(data) = r.ospf() else { continue };
                if data.advertiser == self.hostname {
                    continue;
                }
                let mut out = RouteBuilder::ospf(adj.area, &data.advertiser);
                out.network(r.network())
                    .protocol(r.protocol())
                    .tag(r.tag())
                    .next_hop(next_hop.clone());
                match r.protocol() {
                    RoutingProtocol::OspfE1 => {
                        out.metric(r.metric().saturating_add(adj.cost));
                        changed |= staged.ospf_e1.merge(out.build()?);
                    }
                    RoutingProtocol::OspfE2 => {
                        out.metric(r.metric()).cost_to_advertiser(
                            data.cost_to_advertiser.saturating_add(adj.cost),
                        );
                        changed |= staged.ospf_e2.merge(out.build()?);
                    }
                    _ => {}
                }
            }
        }
        Ok(changed)
    }

    /// Commit the staged external routes. Returns `true` if a RIB changed.
    pub fn unstage_ospf_external(&mut self) -> bool {
        let staged = mem::take(self.staging_mut());
        let mut changed = self.ospf_e1_rib.import(&staged.ospf_e1);
        changed |= self.ospf_e2_rib.import(&staged.ospf_e2);
        *self.staging_mut() = staged;
        changed
    }

    /// Add the external routes to the OSPF RIB, and the OSPF RIB to the main RIB.
    pub fn import_ospf_external(&mut self) {
        self.ospf_rib.import(&self.ospf_e1_rib);
        self.ospf_rib.import(&self.ospf_e2_rib);
        self.main_rib.import(&self.ospf_rib);
    }

    /// Import the external announcements received by this router into the base eBGP and iBGP
    /// RIBs. Announcements from unknown neighbors are ignored.
    pub fn init_base_bgp_ribs(
        &mut self,
        announcements: &[ExternalAnnouncement],
    ) -> Result<(), NetworkError> {
        let Some(process) = self.bgp_process() else {
            return Ok(());
        };
        let mut ebgp = Vec::new();
        let mut ibgp = Vec::new();
        for ann in announcements
            .iter()
            .filter(|a| a.node == self.hostname && a.vrf == self.vrf)
        {
            let Some(neighbor) = process.neighbor(ann.peer_ip) else {
                debug!(
                    "{}: ignore announcement of {} from unknown peer {}",
                    self.hostname, ann.network, ann.peer_ip
                );
                continue;
            };
            let local_as = process.session_local_as(neighbor);
            let is_ebgp = neighbor.remote_as != local_as;
            if is_ebgp && ann.as_path.contains(&local_as) {
                trace!("{}: AS loop in announcement of {}", self.hostname, ann.network);
                continue;
            }
            let mut received = RouteBuilder::bgp();
            received
                .network(ann.network)
                .protocol(if is_ebgp {
                    RoutingProtocol::Bgp
                } else {
                    RoutingProtocol::Ibgp
                })
                .metric(ann.med)
                .next_hop(NextHop::Ip(ann.next_hop.unwrap_or(ann.peer_ip)))
                .as_path(AsPath::from_sequence(ann.as_path.iter().copied()))
                .communities(ann.communities.iter().map(|c| Community(*c)).collect())
                .origin_type(ann.origin_type)
                .originator_ip(ann.peer_ip)
                .received_from_ip(ann.peer_ip)
                .received_from_route_reflector_client(neighbor.route_reflector_client);
            if !is_ebgp {
                received.local_preference(ann.local_preference.unwrap_or(DEFAULT_LOCAL_PREFERENCE));
            }
            let received = received.build()?;
            let local_ip = self
                .config
                .session_local_ip(&self.vrf, neighbor)
                .unwrap_or(UNSET_IP);
            let env = PolicyEnvironment::session(&self.config, &self.vrf, local_ip, ann.peer_ip);
            let mut out = received.to_builder();
            if apply_named_policy(
                neighbor.import_policy.as_deref(),
                &received,
                &mut out,
                PolicyDirection::In,
                &env,
            )? {
                let route = out.build()?;
                if is_ebgp {
                    ebgp.push(route);
                } else {
                    ibgp.push(route);
                }
            }
        }
        ebgp.into_iter().for_each(|r| {
            self.base_ebgp_rib.merge(r);
        });
        ibgp.into_iter().for_each(|r| {
            self.base_ibgp_rib.merge(r);
        });
        Ok(())
    }

    /// Builder for a BGP route originated by this router.
    fn local_bgp_route(
        &self,
        process: &BgpProcess,
        network: Prefix,
        mechanism: OriginMechanism,
        origin_type: OriginType,
    ) -> RouteBuilder {
        let mut b = RouteBuilder::bgp();
        b.network(network)
            .protocol(RoutingProtocol::Bgp)
            .admin(LOCAL_BGP_ADMIN_COST)
            .weight(DEFAULT_LOCAL_WEIGHT)
            .origin_mechanism(mechanism)
            .origin_type(origin_type)
            .originator_ip(process.router_id)
            .received_from_ip(UNSET_IP);
        b
    }

    /// Originate the routes of this router into BGP: `network` statements with an exact match in
    /// the main RIB, main-RIB routes accepted by the redistribution policy, and aggregates for
    /// which a more specific BGP route exists.
    pub fn init_bgp_aggregate_routes(&mut self) -> Result<(), NetworkError> {
        let Some(process) = self.bgp_process() else {
            return Ok(());
        };
        let env = self.env();
        let mut originated = Vec::new();

        for network in process.networks.iter() {
            let Some(source) = self
                .main_rib
                .get(network)
                .and_then(|r| r.iter().find(|r| !r.protocol().is_bgp()))
            else {
                continue;
            };
            let mut b =
                self.local_bgp_route(process, *network, OriginMechanism::Network, OriginType::Igp);
            b.metric(source.metric()).next_hop(source.next_hop().clone());
            originated.push(b.build()?);
        }

        if let Some(policy) = process.redistribution_policy.as_deref() {
            for source in self
                .main_rib
                .routes()
                .filter(|r| !r.protocol().is_bgp() && r.protocol() != RoutingProtocol::Aggregate)
            {
                let mut b = self.local_bgp_route(
                    process,
                    source.network(),
                    OriginMechanism::Redistribute,
                    OriginType::Incomplete,
                );
                b.metric(source.metric())
                    .tag(source.tag())
                    .next_hop(source.next_hop().clone())
                    .src_protocol(Some(source.protocol()));
                if apply_named_policy(Some(policy), source, &mut b, PolicyDirection::Out, &env)? {
                    originated.push(b.build()?);
                }
            }
        }

        for aggregate in process.aggregates.iter() {
            let active = self
                .prev_bgp_rib
                .more_specific_routes(aggregate)
                .chain(self.ebgp_rib.more_specific_routes(aggregate))
                .chain(self.ibgp_rib.more_specific_routes(aggregate))
                .any(|r| r.protocol() != RoutingProtocol::Aggregate);
            if !active {
                continue;
            }
            let mut b = self.local_bgp_route(
                process,
                *aggregate,
                OriginMechanism::Generated,
                OriginType::Igp,
            );
            b.protocol(RoutingProtocol::Aggregate)
                .next_hop(NextHop::Discard);
            originated.push(b.build()?);
        }

        for route in originated {
            self.ebgp_rib.merge(route);
        }
        self.commit_bgp();
        Ok(())
    }

    /// Merge the eBGP and iBGP RIBs into the BGP RIB, and the BGP RIB into the main RIB. BGP routes
    /// of the main RIB that are no longer among the best BGP routes are withdrawn first. BGP routes
    /// whose next hop cannot be resolved are not installed into the main RIB.
    fn commit_bgp(&mut self) -> bool {
        let mut changed = self.bgp_rib.import(&self.ebgp_rib);
        changed |= self.bgp_rib.import(&self.ibgp_rib);

        let mut installed = Vec::new();
        for (prefix, best) in self.bgp_rib.iter() {
            let resolvable: Vec<Route> = best
                .iter()
                .filter(|r| match r.next_hop() {
                    NextHop::Ip(nh) => self
                        .main_rib
                        .longest_match_excluding(*nh, prefix)
                        .is_some(),
                    _ => true,
                })
                .cloned()
                .collect();
            installed.push((*prefix, best.clone(), resolvable));
        }
        for (prefix, best, resolvable) in installed {
            changed |= self
                .main_rib
                .retain_routes(&prefix, |r| r.bgp_attributes().is_none() || best.contains(r));
            for route in resolvable {
                changed |= self.main_rib.merge(route);
            }
        }
        changed
    }

    /// Prepare a route of this router to be sent over `session` (this router being the sender).
    /// Returns `None` if the route must not be sent.
    fn bgp_export(
        &self,
        route: &Route,
        session: &BgpSession,
        neighbor: &BgpNeighbor,
        process: &BgpProcess,
    ) -> Result<Option<RouteBuilder>, NetworkError> {
        if route.received_from_ip() == session.receiver_ip || route.non_routing() {
            return Ok(None);
        }
        let Some(attrs) = route.bgp_attributes() else {
            return Ok(None);
        };
        let reflected = route.protocol() == RoutingProtocol::Ibgp;
        if session.session_type.is_ibgp()
            && reflected
            && !attrs.received_from_route_reflector_client()
            && !neighbor.route_reflector_client
        {
            return Ok(None);
        }

        let mut out = route.to_builder();
        out.protocol(RoutingProtocol::Bgp).weight(0);
        if session.session_type.is_ebgp() {
            out.prepend_as(session.sender_as)
                .local_preference(DEFAULT_LOCAL_PREFERENCE)
                .cluster_list(Default::default())
                .originator_ip(process.router_id)
                .next_hop(NextHop::Ip(session.sender_ip));
            if route.received_from_ip() != UNSET_IP {
                // MED is not passed on to other ASes
                out.metric(0);
            }
        } else {
            if neighbor.next_hop_self
                || route.received_from_ip() == UNSET_IP
                || route.next_hop_ip().is_none()
            {
                out.next_hop(NextHop::Ip(session.sender_ip));
            }
            if reflected {
                out.add_cluster_id(process.cluster_id());
            } else {
                out.originator_ip(process.router_id);
            }
        }
        if !neighbor.send_community {
            out.communities(Default::default());
        }

        let env = PolicyEnvironment::session(
            &self.config,
            &self.vrf,
            session.sender_ip,
            session.receiver_ip,
        );
        if apply_named_policy(
            neighbor.export_policy.as_deref(),
            route,
            &mut out,
            PolicyDirection::Out,
            &env,
        )? {
            Ok(Some(out))
        } else {
            trace!("{}: export of {route} denied", self.hostname);
            Ok(None)
        }
    }

    /// Receive a route sent over `session` (this router being the receiver). Returns `None` if the
    /// route is rejected by loop prevention or by the import policy.
    fn bgp_import(
        &self,
        mut out: RouteBuilder,
        session: &BgpSession,
        neighbor: &BgpNeighbor,
        process: &BgpProcess,
    ) -> Result<Option<Route>, NetworkError> {
        let protocol = if session.session_type.is_ebgp() {
            RoutingProtocol::Bgp
        } else {
            RoutingProtocol::Ibgp
        };
        out.protocol(protocol)
            .admin(protocol.default_admin_cost())
            .received_from_ip(session.sender_ip)
            .received_from_route_reflector_client(neighbor.route_reflector_client)
            .origin_mechanism(OriginMechanism::Learned)
            .weight(0);
        let received = out.build()?;
        let Some(attrs) = received.bgp_attributes() else {
            return Ok(None);
        };
        let looped = if session.session_type.is_ebgp() {
            attrs.as_path().contains(session.receiver_as)
        } else {
            attrs.originator_ip() == process.router_id
                || attrs.cluster_list().contains(&process.cluster_id())
        };
        if looped {
            trace!("{}: loop detected for {received}", self.hostname);
            return Ok(None);
        }

        let env = PolicyEnvironment::session(
            &self.config,
            &self.vrf,
            session.receiver_ip,
            session.sender_ip,
        );
        let mut out = received.to_builder();
        if apply_named_policy(
            neighbor.import_policy.as_deref(),
            &received,
            &mut out,
            PolicyDirection::In,
            &env,
        )? {
            Ok(Some(out.build()?))
        } else {
            trace!("{}: import of {received} denied", self.hostname);
            Ok(None)
        }
    }

    /// Pull the BGP routes of all peers from their committed BGP RIBs, and merge the accepted
    /// routes into the staging RIBs. Returns `true` if a staging RIB changed.
    pub fn propagate_bgp(
        &self,
        nodes: &BTreeMap<String, Node>,
        bgp_topology: &BgpTopology,
    ) -> Result<bool, NetworkError> {
        let Some(process) = self.bgp_process() else {
            return Ok(false);
        };
        let mut staged = self.staging();
        let mut changed = false;
        for (sender_id, receiver_id, session) in bgp_topology.incoming(&self.hostname, &self.vrf)
        {
            let Some((sender, sender_process, sender_neighbor)) = lookup_peer(nodes, sender_id)
            else {
                continue;
            };
            let Some(neighbor) = process.neighbor(receiver_id.peer_ip) else {
                continue;
            };
            for route in sender.bgp_rib.routes() {
                let Some(out) = sender.bgp_export(route, session, sender_neighbor, sender_process)?
                else {
                    continue;
                };
                let Some(received) = self.bgp_import(out, session, neighbor, process)? else {
                    continue;
                };
                changed |= if session.session_type.is_ebgp() {
                    staged.ebgp.merge(received)
                } else {
                    staged.ibgp.merge(received)
                };
            }
        }
        Ok(changed)
    }

    /// Commit the staged BGP routes, and merge them into the BGP and main RIB. Returns `true` if a
    /// RIB changed.
    pub fn unstage_bgp(&mut self) -> bool {
        let staged = mem::take(self.staging_mut());
        let mut changed = self.ebgp_rib.import(&staged.ebgp);
        changed |= self.ibgp_rib.import(&staged.ibgp);
        *self.staging_mut() = staged;
        changed |= self.commit_bgp();
        changed
    }

    /// Returns `true` if the main RIB or an OSPF external RIB differs from the previous iteration.
    pub fn dependent_ribs_changed(&self) -> bool {
        self.main_rib != self.prev_main_rib
            || self.ospf_e1_rib != self.prev_ospf_e1_rib
            || self.ospf_e2_rib != self.prev_ospf_e2_rib
    }

    /// Compile the main RIB into the forwarding table.
    pub fn compute_fib(&mut self, ip_owners: &IpOwners) {
        self.fib = Fib::new(&self.main_rib, ip_owners);
    }
}

/// Find the virtual router, BGP process and neighbor configuration of one side of a session.
fn lookup_peer<'a>(
    nodes: &'a BTreeMap<String, Node>,
    id: &BgpPeerId,
) -> Option<(&'a VirtualRouter, &'a BgpProcess, &'a BgpNeighbor)> {
    let vr = nodes.get(&id.node)?.virtual_routers.get(&id.vrf)?;
    let process = vr.bgp_process()?;
    let neighbor = process.neighbor(id.peer_ip)?;
    Some((vr, process, neighbor))
}
