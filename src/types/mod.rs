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

//! Module containing all type definitions shared across the crate.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::route::RoutingProtocol;

mod prefix;
pub use prefix::{Ip, Prefix, PrefixMap};

/// Name of the interface that packets are sent to when they are dropped (discard routes, or
/// flows that are denied on the way out).
pub const NULL_INTERFACE: &str = "null_interface";
/// Placeholder used for nodes that cannot be determined (e.g., the next-hop node of a connected
/// route).
pub const NONE_NODE: &str = "(none)";
/// Name of the default VRF.
pub const DEFAULT_VRF: &str = "default";

/// Number of an autonomous system.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsId(pub u32);

impl Display for AsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl From<u32> for AsId {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

// unsuffixed literals default to `i32`
impl From<i32> for AsId {
    fn from(x: i32) -> Self {
        Self(x as u32)
    }
}

/// An interface of a specific node.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct NodeInterfacePair {
    /// Hostname of the node
    pub node: String,
    /// Name of the interface
    pub interface: String,
}

impl NodeInterfacePair {
    /// Create a new node-interface pair.
    pub fn new(node: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }

    /// The pair `((none), null_interface)`, the sink of all dropped packets.
    pub fn null() -> Self {
        Self::new(NONE_NODE, NULL_INTERFACE)
    }
}

impl Display for NodeInterfacePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// A directed layer-3 edge between two interfaces.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Sending interface
    pub from: NodeInterfacePair,
    /// Receiving interface
    pub to: NodeInterfacePair,
}

impl Edge {
    /// Create a new edge
    pub fn new(from: NodeInterfacePair, to: NodeInterfacePair) -> Self {
        Self { from, to }
    }

    /// The same edge in the opposite direction.
    pub fn reverse(&self) -> Self {
        Self::new(self.to.clone(), self.from.clone())
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Loops of the fixed-point computation that are bounded by an iteration cap.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ConvergencePhase {
    /// Activation of recursive static routes
    StaticRoutes,
    /// Activation of generated routes
    GeneratedRoutes,
    /// Propagation of OSPF intra- and inter-area routes
    OspfInternal,
    /// Propagation of OSPF external routes
    OspfExternal,
    /// Propagation of BGP routes
    Bgp,
    /// The outer loop over all dependent routes
    DependentRoutes,
}

impl Display for ConvergencePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StaticRoutes => "static routes",
            Self::GeneratedRoutes => "generated routes",
            Self::OspfInternal => "OSPF internal",
            Self::OspfExternal => "OSPF external",
            Self::Bgp => "BGP",
            Self::DependentRoutes => "dependent routes",
        })
    }
}

/// Errors raised while constructing a route. A route that fails to build is never observable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteError {
    /// The protocol is not legal for the kind of route being built.
    #[error("Cannot construct {kind} route with protocol {protocol}")]
    InvalidRouteConstruction {
        /// Kind of route that was built (`plain`, `OSPF`, or `BGP`)
        kind: String,
        /// The illegal protocol
        protocol: RoutingProtocol,
    },
    /// No destination network was set.
    #[error("Missing destination network")]
    MissingNetwork,
    /// No next hop was set.
    #[error("Missing next hop")]
    MissingNextHop,
    /// No protocol was set.
    #[error("Missing routing protocol")]
    MissingProtocol,
}

/// Errors raised while evaluating a routing policy.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyError {
    /// The policy refers to another policy that is not defined on the device.
    #[error("Undefined routing policy {0}")]
    UndefinedPolicy(String),
    /// The policy produced a route that cannot be built.
    #[error("Invalid transformation: {0}")]
    InvalidTransformation(#[from] RouteError),
    /// A route-map entry is incomplete.
    #[error("Invalid route-map: {0}")]
    InvalidRouteMap(String),
    /// Any other failure of a custom policy.
    #[error("Policy failed: {0}")]
    Other(String),
}

/// Network Errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A route could not be constructed.
    #[error("Route Error: {0}")]
    RouteError(#[from] RouteError),
    /// A routing policy could not be evaluated.
    #[error("Policy Error: {0}")]
    PolicyError(#[from] PolicyError),
    /// A flow trace visited the same node twice.
    #[error("Forwarding Loop occurred! path: {0:?}")]
    ForwardingLoop(Vec<String>),
    /// An interface that is not a flow sink has no outgoing edges.
    #[error("Missing edges for interface {0}, which is not a flow sink")]
    MissingEdges(NodeInterfacePair),
    /// An iteration cap was reached before the computation converged.
    #[error("Phase {phase} did not converge after {iterations} iterations")]
    NoConvergence {
        /// The loop that did not converge
        phase: ConvergencePhase,
        /// Number of iterations performed
        iterations: usize,
    },
    /// Node was not found in the network.
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    /// VRF was not found on the node.
    #[error("VRF {1} not found on node {0}")]
    VrfNotFound(String, String),
    /// Interface was not found on the node.
    #[error("Interface not found: {0}")]
    InterfaceNotFound(NodeInterfacePair),
    /// Error while serializing or deserializing a snapshot.
    #[error("{0}")]
    JsonError(Box<serde_json::Error>),
    /// Error while reading or writing a snapshot.
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for NetworkError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonError(Box::new(value))
    }
}

impl PartialEq for NetworkError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::RouteError(l0), Self::RouteError(r0)) => l0 == r0,
            (Self::PolicyError(l0), Self::PolicyError(r0)) => l0 == r0,
            (Self::ForwardingLoop(l0), Self::ForwardingLoop(r0)) => l0 == r0,
            (Self::MissingEdges(l0), Self::MissingEdges(r0)) => l0 == r0,
            (
                Self::NoConvergence {
                    phase: l0,
                    iterations: l1,
                },
                Self::NoConvergence {
                    phase: r0,
                    iterations: r1,
                },
            ) => l0 == r0 && l1 == r1,
            (Self::NodeNotFound(l0), Self::NodeNotFound(r0)) => l0 == r0,
            (Self::VrfNotFound(l0, l1), Self::VrfNotFound(r0, r1)) => l0 == r0 && l1 == r1,
            (Self::InterfaceNotFound(l0), Self::InterfaceNotFound(r0)) => l0 == r0,
            (Self::JsonError(l), Self::JsonError(r)) => l.to_string() == r.to_string(),
            (Self::IoError(l), Self::IoError(r)) => l.kind() == r.kind(),
            _ => false,
        }
    }
}
