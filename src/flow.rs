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

//! Flows and the traces produced by simulating their forwarding.

use std::{fmt::Display, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{Edge, Ip, DEFAULT_VRF};

/// IP protocol of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    /// ICMP (1)
    Icmp,
    /// TCP (6)
    Tcp,
    /// UDP (17)
    Udp,
    /// Any other protocol number
    Other(u8),
}

impl IpProtocol {
    /// The IANA protocol number.
    pub fn number(&self) -> u8 {
        match self {
            Self::Icmp => 1,
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(x) => *x,
        }
    }
}

impl From<u8> for IpProtocol {
    fn from(x: u8) -> Self {
        match x {
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            x => Self::Other(x),
        }
    }
}

impl FromStr for IpProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "icmp" => Ok(Self::Icmp),
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            x => x
                .parse::<u8>()
                .map(Self::from)
                .map_err(|_| format!("Unknown IP protocol: {s}")),
        }
    }
}

impl Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Icmp => f.write_str("ICMP"),
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::Other(x) => write!(f, "{x}"),
        }
    }
}

/// A packet header injected at a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Flow {
    /// Node at which the flow enters
    pub ingress_node: String,
    /// VRF at which the flow enters
    pub ingress_vrf: String,
    /// Source address
    pub src_ip: Ip,
    /// Destination address
    pub dst_ip: Ip,
    /// IP protocol
    pub ip_protocol: IpProtocol,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
}

impl Flow {
    /// Create a TCP flow from `ingress_node` (default VRF) towards `dst_ip`.
    pub fn new(ingress_node: impl Into<String>, src_ip: Ip, dst_ip: Ip) -> Self {
        Self {
            ingress_node: ingress_node.into(),
            ingress_vrf: DEFAULT_VRF.to_string(),
            src_ip,
            dst_ip,
            ip_protocol: IpProtocol::Tcp,
            src_port: 49152,
            dst_port: 80,
        }
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}: {}:{} -> {}:{} {}",
            self.ingress_node,
            self.ingress_vrf,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.ip_protocol
        )
    }
}

/// Final outcome of a flow trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowDisposition {
    /// The flow reached its destination, or left the network through a flow sink.
    Accepted,
    /// The flow was dropped by a discard route.
    NullRouted,
    /// No route matched the destination.
    NoRoute,
    /// The flow was denied by an incoming filter.
    DeniedIn,
    /// The flow was denied by an outgoing filter.
    DeniedOut,
}

impl FlowDisposition {
    /// Returns `true` if the flow was delivered.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl Display for FlowDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Accepted => "ACCEPTED",
            Self::NullRouted => "NULL_ROUTED",
            Self::NoRoute => "NO_ROUTE",
            Self::DeniedIn => "DENIED_IN",
            Self::DeniedOut => "DENIED_OUT",
        })
    }
}

/// A single hop of a flow trace: the edge over which the flow was forwarded, and the routes that
/// were used to choose it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowTraceHop {
    /// Edge taken by the flow
    pub edge: Edge,
    /// Textual representation of the routes responsible for this hop
    pub routes: Vec<String>,
}

/// A complete trace of one forwarding path of a flow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowTrace {
    /// Outcome of the trace
    pub disposition: FlowDisposition,
    /// Hops taken
    pub hops: Vec<FlowTraceHop>,
    /// Additional information (e.g., which filter denied the flow)
    pub notes: String,
}

impl FlowTrace {
    /// Create a new trace
    pub fn new(
        disposition: FlowDisposition,
        hops: Vec<FlowTraceHop>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            disposition,
            hops,
            notes: notes.into(),
        }
    }
}

impl Display for FlowTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.disposition)?;
        if !self.notes.is_empty() {
            write!(f, " ({})", self.notes)?;
        }
        for (i, hop) in self.hops.iter().enumerate() {
            write!(f, "\n  {}. {} [{}]", i + 1, hop.edge, hop.routes.iter().join(", "))?;
        }
        Ok(())
    }
}
