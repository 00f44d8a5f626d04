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

//! Layer-3 topology inference. Two active interfaces of different nodes are adjacent if they are
//! configured in the same subnet. The topology is computed once and never changes during the
//! computation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction::Outgoing,
};

use crate::{
    config::Configuration,
    types::{Edge, Ip, NodeInterfacePair, Prefix},
};

/// Directed graph of interfaces. Every layer-3 adjacency yields an edge in both directions.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    graph: DiGraph<NodeInterfacePair, Edge>,
    index: HashMap<NodeInterfacePair, NodeIndex>,
}

impl Topology {
    /// Infer the topology from all configurations.
    pub fn from_configurations<'a>(configs: impl IntoIterator<Item = &'a Configuration>) -> Self {
        let mut subnets: BTreeMap<Prefix, Vec<NodeInterfacePair>> = BTreeMap::new();
        for config in configs {
            for (name, iface) in config.interfaces.iter() {
                if !iface.active || iface.loopback {
                    continue;
                }
                if let Some(net) = iface.network() {
                    // host prefixes cannot be shared
                    if net.prefix_len() == 32 {
                        continue;
                    }
                    subnets
                        .entry(net)
                        .or_default()
                        .push(NodeInterfacePair::new(&config.hostname, name));
                }
            }
        }

        let mut topo = Self::default();
        for members in subnets.values() {
            for a in members {
                for b in members.iter().filter(|b| b.node != a.node) {
                    topo.add_edge(a, b);
                }
            }
        }
        topo
    }

    fn add_interface(&mut self, iface: &NodeInterfacePair) -> NodeIndex {
        if let Some(idx) = self.index.get(iface) {
            return *idx;
        }
        let idx = self.graph.add_node(iface.clone());
        self.index.insert(iface.clone(), idx);
        idx
    }

    fn add_edge(&mut self, from: &NodeInterfacePair, to: &NodeInterfacePair) {
        let a = self.add_interface(from);
        let b = self.add_interface(to);
        self.graph
            .update_edge(a, b, Edge::new(from.clone(), to.clone()));
    }

    /// Iterate over all edges leaving the given interface.
    pub fn edges_from<'a>(
        &'a self,
        from: &NodeInterfacePair,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.index.get(from).into_iter().flat_map(move |idx| {
            self.graph
                .edges_directed(*idx, Outgoing)
                .map(|e| e.weight())
        })
    }

    /// Returns `true` if the interface has at least one outgoing edge.
    pub fn has_edges(&self, from: &NodeInterfacePair) -> bool {
        self.edges_from(from).next().is_some()
    }

    /// Number of directed edges.
    pub fn len(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns `true` if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }
}

/// Map from an address to all nodes that own it (on an active interface). An address can be owned
/// by multiple nodes (anycast or shared addresses).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpOwners {
    owners: BTreeMap<Ip, BTreeMap<String, BTreeSet<String>>>,
}

impl IpOwners {
    /// Compute the owners of all addresses.
    pub fn from_configurations<'a>(configs: impl IntoIterator<Item = &'a Configuration>) -> Self {
        let mut owners: BTreeMap<Ip, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
        for config in configs {
            for iface in config.interfaces.values().filter(|i| i.active) {
                if let Some(ip) = iface.ip() {
                    owners
                        .entry(ip)
                        .or_default()
                        .entry(config.hostname.clone())
                        .or_default()
                        .insert(iface.vrf.clone());
                }
            }
        }
        Self { owners }
    }

    /// Nodes owning `ip`.
    pub fn owners(&self, ip: Ip) -> impl Iterator<Item = &String> {
        self.owners.get(&ip).into_iter().flat_map(|o| o.keys())
    }

    /// Pairs of node and VRF owning `ip`.
    pub fn owner_vrfs(&self, ip: Ip) -> impl Iterator<Item = (&String, &String)> {
        self.owners
            .get(&ip)
            .into_iter()
            .flat_map(|o| o.iter().flat_map(|(n, vrfs)| vrfs.iter().map(move |v| (n, v))))
    }

    /// Returns `true` if `node` owns `ip`.
    pub fn is_owner(&self, ip: Ip, node: &str) -> bool {
        self.owners
            .get(&ip)
            .map(|o| o.contains_key(node))
            .unwrap_or(false)
    }

    /// Returns `true` if `node` owns `ip` in `vrf`.
    pub fn is_owner_in_vrf(&self, ip: Ip, node: &str, vrf: &str) -> bool {
        self.owners
            .get(&ip)
            .and_then(|o| o.get(node))
            .map(|vrfs| vrfs.contains(vrf))
            .unwrap_or(false)
    }
}

/// Compute the flow sinks: active, non-loopback interfaces with an address but without any edge.
/// Flows leaving through a flow sink exit the modeled network and are accepted.
pub fn compute_flow_sinks<'a>(
    configs: impl IntoIterator<Item = &'a Configuration>,
    topology: &Topology,
) -> BTreeSet<NodeInterfacePair> {
    let mut sinks = BTreeSet::new();
    for config in configs {
        for (name, iface) in config.interfaces.iter() {
            if !iface.active || iface.loopback || iface.address.is_none() {
                continue;
            }
            let nip = NodeInterfacePair::new(&config.hostname, name);
            if !topology.has_edges(&nip) {
                sinks.insert(nip);
            }
        }
    }
    sinks
}
