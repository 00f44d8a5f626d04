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

//! Discovery of BGP sessions. A session is established between two configured neighbors if each
//! one's peer address is owned by the other, and the AS numbers on both sides agree. Configured
//! neighbors that cannot be resolved are skipped.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use log::debug;
use petgraph::{prelude::*, visit::EdgeRef};
use serde::{Deserialize, Serialize};

use crate::{
    config::Configuration,
    topology::IpOwners,
    types::{AsId, Ip},
};

/// Kind of a directed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BgpSessionType {
    /// Both ends are in the same AS. `to_client` is set if the sender has the receiver configured
    /// as a route-reflector client.
    Internal {
        /// Receiver is a client of the sender
        to_client: bool,
    },
    /// The ends are in different ASes.
    External,
}

impl std::fmt::Display for BgpSessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Internal { to_client: false } => "ibgp",
            Self::Internal { to_client: true } => "ibgp-client",
            Self::External => "ebgp",
        })
    }
}

impl BgpSessionType {
    /// Whether the ends are in different ASes.
    pub fn is_ebgp(&self) -> bool {
        *self == Self::External
    }

    /// Whether both ends are in the same AS.
    pub fn is_ibgp(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Identifies the configuration of one side of a session: the neighbor `peer_ip`, configured on
/// `node` in `vrf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BgpPeerId {
    /// Hostname
    pub node: String,
    /// VRF
    pub vrf: String,
    /// Address of the configured peer
    pub peer_ip: Ip,
}

/// A directed BGP session, over which the source sends routes to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpSession {
    /// Type of the session, from the point of view of the sender
    pub session_type: BgpSessionType,
    /// Address of the sender
    pub sender_ip: Ip,
    /// Address of the receiver
    pub receiver_ip: Ip,
    /// AS of the sender
    pub sender_as: AsId,
    /// AS of the receiver
    pub receiver_as: AsId,
}

/// Graph of all established BGP sessions. Nodes are [`BgpPeerId`]s, and edges point from the
/// sender to the receiver of routes.
#[derive(Debug, Clone, Default)]
pub struct BgpTopology {
    graph: DiGraph<BgpPeerId, BgpSession>,
    index: HashMap<BgpPeerId, NodeIndex>,
    by_vrf: HashMap<(String, String), Vec<NodeIndex>>,
}

impl BgpTopology {
    /// Discover all sessions of the given configurations.
    pub fn new(configs: &BTreeMap<String, Arc<Configuration>>, ip_owners: &IpOwners) -> Self {
        let mut topo = Self::default();
        for config in configs.values() {
            for (vrf, vrf_config) in config.vrfs.iter() {
                let Some(process) = vrf_config.bgp.as_ref() else {
                    continue;
                };
                for neighbor in process.neighbors.iter() {
                    let Some(local_ip) = config.session_local_ip(vrf, neighbor) else {
                        debug!(
                            "{}: skip neighbor {}: no local address",
                            config.hostname, neighbor.peer_ip
                        );
                        continue;
                    };
                    let local_as = process.session_local_as(neighbor);
                    let mut established = false;
                    for (remote_host, remote_vrf) in ip_owners.owner_vrfs(neighbor.peer_ip) {
                        if remote_host == &config.hostname {
                            continue;
                        }
                        let Some(remote) = configs.get(remote_host) else {
                            continue;
                        };
                        let Some(remote_process) = remote
                            .vrfs
                            .get(remote_vrf)
                            .and_then(|v| v.bgp.as_ref())
                        else {
                            continue;
                        };
                        let Some(remote_neighbor) = remote_process.neighbor(local_ip) else {
                            continue;
                        };
                        let remote_as = remote_process.session_local_as(remote_neighbor);
                        if remote_neighbor.remote_as != local_as
                            || neighbor.remote_as != remote_as
                            || remote.session_local_ip(remote_vrf, remote_neighbor)
                                != Some(neighbor.peer_ip)
                        {
                            continue;
                        }
                        let session_type = if local_as == remote_as {
                            BgpSessionType::Internal {
                                to_client: remote_neighbor.route_reflector_client,
                            }
                        } else {
                            BgpSessionType::External
                        };
                        let sender = topo.add_peer(BgpPeerId {
                            node: remote_host.clone(),
                            vrf: remote_vrf.clone(),
                            peer_ip: local_ip,
                        });
                        let receiver = topo.add_peer(BgpPeerId {
                            node: config.hostname.clone(),
                            vrf: vrf.clone(),
                            peer_ip: neighbor.peer_ip,
                        });
                        topo.graph.update_edge(
                            sender,
                            receiver,
                            BgpSession {
                                session_type,
                                sender_ip: neighbor.peer_ip,
                                receiver_ip: local_ip,
                                sender_as: remote_as,
                                receiver_as: local_as,
                            },
                        );
                        established = true;
                    }
                    if !established {
                        debug!(
                            "{}: skip neighbor {}: cannot establish a session",
                            config.hostname, neighbor.peer_ip
                        );
                    }
                }
            }
        }
        topo
    }

    fn add_peer(&mut self, id: BgpPeerId) -> NodeIndex {
        if let Some(idx) = self.index.get(&id) {
            return *idx;
        }
        let key = (id.node.clone(), id.vrf.clone());
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id, idx);
        self.by_vrf.entry(key).or_default().push(idx);
        idx
    }

    /// Iterate over all sessions over which `node` in `vrf` receives routes. Yields the id of the
    /// sender, the id of the receiver, and the session.
    pub fn incoming<'a>(
        &'a self,
        node: &str,
        vrf: &str,
    ) -> impl Iterator<Item = (&'a BgpPeerId, &'a BgpPeerId, &'a BgpSession)> + 'a {
        self.by_vrf
            .get(&(node.to_string(), vrf.to_string()))
            .into_iter()
            .flatten()
            .flat_map(move |idx| {
                self.graph
                    .edges_directed(*idx, Incoming)
                    .map(move |e| (&self.graph[e.source()], &self.graph[*idx], e.weight()))
            })
    }

    /// Iterate over all sessions.
    pub fn sessions(&self) -> impl Iterator<Item = (&BgpPeerId, &BgpPeerId, &BgpSession)> {
        self.graph.edge_references().map(|e| {
            (
                &self.graph[e.source()],
                &self.graph[e.target()],
                e.weight(),
            )
        })
    }

    /// Number of directed sessions.
    pub fn num_sessions(&self) -> usize {
        self.graph.edge_count()
    }
}
