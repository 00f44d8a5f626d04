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

//! Module containing the [`DataPlane`], the result of the fixed-point computation. It answers
//! queries on the converged RIBs and FIBs, and simulates the forwarding of flows.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use log::trace;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    acl::LineAction,
    bgp::BgpTopology,
    config::Configuration,
    fib::{Fib, FibEntry},
    flow::{Flow, FlowDisposition, FlowTrace, FlowTraceHop},
    network::ConvergenceStats,
    rib::Rib,
    route::{NextHop, RoutingProtocol},
    router::{Node, VirtualRouter},
    topology::{IpOwners, Topology},
    types::{Edge, Ip, NetworkError, NodeInterfacePair, Prefix, NONE_NODE, NULL_INTERFACE},
};

/// One row of the route table of the converged network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteRow {
    /// Node holding the route
    pub node: String,
    /// VRF holding the route
    pub vrf: String,
    /// Destination
    pub network: Prefix,
    /// Node owning the next-hop address, or `(none)`
    pub next_hop_node: String,
    /// Next-hop address
    pub next_hop_ip: Option<Ip>,
    /// Next-hop interface
    pub next_hop_interface: Option<String>,
    /// Administrative distance
    pub admin: u32,
    /// Metric
    pub metric: u32,
    /// Protocol that produced the route
    pub protocol: RoutingProtocol,
    /// Route tag
    pub tag: Option<u32>,
}

impl Display for RouteRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let or_dash = |x: Option<String>| x.unwrap_or_else(|| String::from("-"));
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.node,
            self.vrf,
            self.network,
            self.next_hop_node,
            or_dash(self.next_hop_ip.map(|x| x.to_string())),
            or_dash(self.next_hop_interface.clone()),
            self.admin,
            self.metric,
            self.protocol,
            or_dash(self.tag.map(|x| x.to_string())),
        )
    }
}

/// The converged data plane of a network.
#[derive(Debug)]
pub struct DataPlane {
    nodes: BTreeMap<String, Node>,
    topology: Topology,
    ip_owners: IpOwners,
    bgp_topology: BgpTopology,
    flow_sinks: BTreeSet<NodeInterfacePair>,
    stats: ConvergenceStats,
}

impl DataPlane {
    pub(crate) fn new(
        nodes: BTreeMap<String, Node>,
        topology: Topology,
        ip_owners: IpOwners,
        bgp_topology: BgpTopology,
        flow_sinks: BTreeSet<NodeInterfacePair>,
        stats: ConvergenceStats,
    ) -> Self {
        Self {
            nodes,
            topology,
            ip_owners,
            bgp_topology,
            flow_sinks,
            stats,
        }
    }

    /// Get a node by its hostname.
    pub fn node(&self, hostname: &str) -> Result<&Node, NetworkError> {
        self.nodes
            .get(hostname)
            .ok_or_else(|| NetworkError::NodeNotFound(hostname.to_string()))
    }

    /// Iterate over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get the virtual router of `vrf` on node `hostname`.
    pub fn virtual_router(&self, hostname: &str, vrf: &str) -> Result<&VirtualRouter, NetworkError> {
        self.node(hostname)?
            .virtual_router(vrf)
            .ok_or_else(|| NetworkError::VrfNotFound(hostname.to_string(), vrf.to_string()))
    }

    /// Iterate over all virtual routers.
    pub fn virtual_routers(&self) -> impl Iterator<Item = &VirtualRouter> {
        self.nodes.values().flat_map(|n| n.virtual_routers.values())
    }

    /// The main RIB of a virtual router.
    pub fn main_rib(&self, hostname: &str, vrf: &str) -> Result<&Rib, NetworkError> {
        Ok(self.virtual_router(hostname, vrf)?.main_rib())
    }

    /// The BGP RIB of a virtual router.
    pub fn bgp_rib(&self, hostname: &str, vrf: &str) -> Result<&Rib, NetworkError> {
        Ok(self.virtual_router(hostname, vrf)?.bgp_rib())
    }

    /// The forwarding table of a virtual router.
    pub fn fib(&self, hostname: &str, vrf: &str) -> Result<&Fib, NetworkError> {
        Ok(self.virtual_router(hostname, vrf)?.fib())
    }

    /// The layer-3 topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Which nodes own which addresses.
    pub fn ip_owners(&self) -> &IpOwners {
        &self.ip_owners
    }

    /// The established BGP sessions.
    pub fn bgp_topology(&self) -> &BgpTopology {
        &self.bgp_topology
    }

    /// Interfaces through which flows leave the network.
    pub fn flow_sinks(&self) -> &BTreeSet<NodeInterfacePair> {
        &self.flow_sinks
    }

    /// Convergence diagnostics.
    pub fn stats(&self) -> &ConvergenceStats {
        &self.stats
    }

    /// The route table of all main RIBs. Routes with a next-hop address owned by several nodes
    /// produce one row per owner.
    pub fn routes(&self) -> Vec<RouteRow> {
        let mut rows = Vec::new();
        for vr in self.virtual_routers() {
            for route in vr.main_rib().routes() {
                let (next_hop_ip, next_hop_interface) = match route.next_hop() {
                    NextHop::Ip(ip) => (Some(*ip), None),
                    NextHop::Interface { interface, ip } => (*ip, Some(interface.clone())),
                    NextHop::Discard => (None, Some(NULL_INTERFACE.to_string())),
                    NextHop::SelfAddress | NextHop::PeerAddress => (None, None),
                };
                let mut owners: Vec<String> = next_hop_ip
                    .map(|ip| self.ip_owners.owners(ip).cloned().collect())
                    .unwrap_or_default();
                if owners.is_empty() {
                    owners.push(NONE_NODE.to_string());
                }
                for next_hop_node in owners {
                    rows.push(RouteRow {
                        node: vr.hostname().to_string(),
                        vrf: vr.vrf().to_string(),
                        network: route.network(),
                        next_hop_node,
                        next_hop_ip,
                        next_hop_interface: next_hop_interface.clone(),
                        admin: route.admin(),
                        metric: route.metric(),
                        protocol: route.protocol(),
                        tag: route.tag(),
                    });
                }
            }
        }
        rows
    }

    /// Trace a flow through the network. Returns one trace per forwarding path. Finding a
    /// forwarding loop, or an interface without any edge that is no flow sink, aborts the trace
    /// with an error.
    pub fn trace(&self, flow: &Flow) -> Result<BTreeSet<FlowTrace>, NetworkError> {
        let mut traces = BTreeSet::new();
        let mut path = Vec::new();
        self.trace_from(
            flow,
            &flow.ingress_node,
            &flow.ingress_vrf,
            &[],
            &mut path,
            &mut traces,
        )?;
        Ok(traces)
    }

    /// Trace all flows concurrently.
    pub fn process_flows(
        &self,
        flows: impl IntoIterator<Item = Flow>,
    ) -> Result<BTreeMap<Flow, BTreeSet<FlowTrace>>, NetworkError> {
        flows
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|flow| self.trace(&flow).map(|t| (flow, t)))
            .collect()
    }

    fn trace_from(
        &self,
        flow: &Flow,
        node: &str,
        vrf: &str,
        hops: &[FlowTraceHop],
        path: &mut Vec<String>,
        traces: &mut BTreeSet<FlowTrace>,
    ) -> Result<(), NetworkError> {
        let looped = path.iter().any(|n| n == node);
        path.push(node.to_string());
        if looped {
            return Err(NetworkError::ForwardingLoop(path.clone()));
        }
        let result = self.trace_hop(flow, node, vrf, hops, path, traces);
        path.pop();
        result
    }

    fn trace_hop(
        &self,
        flow: &Flow,
        node: &str,
        vrf: &str,
        hops: &[FlowTraceHop],
        path: &mut Vec<String>,
        traces: &mut BTreeSet<FlowTrace>,
    ) -> Result<(), NetworkError> {
        let vr = self.virtual_router(node, vrf)?;
        if self.ip_owners.is_owner_in_vrf(flow.dst_ip, node, vrf) {
            traces.insert(FlowTrace::new(FlowDisposition::Accepted, hops.to_vec(), ""));
            return Ok(());
        }
        let Some((_, entries)) = vr.fib().lookup(flow.dst_ip) else {
            traces.insert(FlowTrace::new(FlowDisposition::NoRoute, hops.to_vec(), ""));
            return Ok(());
        };

        for entry in entries {
            let routes = vec![entry.route.to_string()];
            let out = NodeInterfacePair::new(node, &entry.interface);
            if entry.is_discard() {
                let hops = extend(hops, Edge::new(out, NodeInterfacePair::null()), routes);
                traces.insert(FlowTrace::new(FlowDisposition::NullRouted, hops, ""));
                continue;
            }

            let config = vr.config.as_ref();
            let iface = config
                .interfaces
                .get(&entry.interface)
                .ok_or_else(|| NetworkError::InterfaceNotFound(out.clone()))?;
            if let Some(note) = denied_by(
                config,
                iface.outgoing_filter.as_deref(),
                flow,
                FlowDisposition::DeniedOut,
            ) {
                let hops = extend(hops, Edge::new(out, NodeInterfacePair::null()), routes);
                traces.insert(FlowTrace::new(FlowDisposition::DeniedOut, hops, note));
                continue;
            }

            if self.flow_sinks.contains(&out) {
                let hops = extend(hops, Edge::new(out, NodeInterfacePair::null()), routes);
                traces.insert(FlowTrace::new(FlowDisposition::Accepted, hops, ""));
                continue;
            }
            if !self.topology.has_edges(&out) {
                return Err(NetworkError::MissingEdges(out));
            }

            let edges = self.next_hop_edges(flow, &out, entry);
            if edges.is_empty() {
                if entry.next_hop_node.is_some() {
                    return Err(NetworkError::MissingEdges(out));
                }
                // destination lies on a connected subnet, but no modeled node owns it
                trace!("{flow}: delivered to an unmodeled host out of {out}");
                let hops = extend(hops, Edge::new(out, NodeInterfacePair::null()), routes);
                traces.insert(FlowTrace::new(FlowDisposition::Accepted, hops, ""));
                continue;
            }

            for edge in edges {
                let remote = self.node(&edge.to.node)?.config();
                let remote_iface = remote
                    .interfaces
                    .get(&edge.to.interface)
                    .ok_or_else(|| NetworkError::InterfaceNotFound(edge.to.clone()))?;
                let hops = extend(hops, edge.clone(), routes.clone());
                if let Some(note) = denied_by(
                    remote,
                    remote_iface.incoming_filter.as_deref(),
                    flow,
                    FlowDisposition::DeniedIn,
                ) {
                    traces.insert(FlowTrace::new(FlowDisposition::DeniedIn, hops, note));
                    continue;
                }
                self.trace_from(flow, &edge.to.node, &remote_iface.vrf, &hops, path, traces)?;
            }
        }
        Ok(())
    }

    /// Edges out of `out` that lead to the node chosen by the FIB entry. If the entry has no
    /// next-hop node, the flow is sent to the nodes owning the destination on the connected
    /// subnet.
    fn next_hop_edges(&self, flow: &Flow, out: &NodeInterfacePair, entry: &FibEntry) -> Vec<&Edge> {
        match &entry.next_hop_node {
            Some(next) => self
                .topology
                .edges_from(out)
                .filter(|e| &e.to.node == next)
                .collect(),
            None => {
                let target = entry.next_hop_ip.unwrap_or(flow.dst_ip);
                self.topology
                    .edges_from(out)
                    .filter(|e| self.ip_owners.is_owner(target, &e.to.node))
                    .collect()
            }
        }
    }
}

/// Copy `hops` and append a new hop.
fn extend(hops: &[FlowTraceHop], edge: Edge, routes: Vec<String>) -> Vec<FlowTraceHop> {
    let mut hops = hops.to_vec();
    hops.push(FlowTraceHop { edge, routes });
    hops
}

/// Apply the access list `acl` of `config` to the flow. Returns the trace note if the flow is
/// denied. References to undefined access lists permit everything.
fn denied_by(
    config: &Configuration,
    acl: Option<&str>,
    flow: &Flow,
    disposition: FlowDisposition,
) -> Option<String> {
    let acl = config.acls.get(acl?)?;
    let result = acl.filter(flow);
    match result.action {
        LineAction::Accept => None,
        LineAction::Reject => Some(format!(
            "{disposition}{{{}}}{{{}}}",
            acl.name,
            acl.describe_line(result.match_line)
        )),
    }
}
