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

//! Routing policies. The data plane computation treats a policy as a pure function that decides
//! whether a route is accepted, and how it is transformed. Policies are referenced by name from
//! the [`crate::config::Configuration`] of a device.

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::{
    config::Configuration,
    route::{NextHop, Route, RouteBuilder},
    types::{Ip, PolicyError},
};

/// Direction in which a policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyDirection {
    /// Applied to routes received from a neighbor
    In,
    /// Applied to routes sent to a neighbor (or exported into another protocol)
    Out,
}

impl fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyDirection::In => write!(f, "in"),
            PolicyDirection::Out => write!(f, "out"),
        }
    }
}

/// Context in which a policy is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEnvironment<'a> {
    /// Configuration of the device evaluating the policy
    pub config: &'a Configuration,
    /// VRF in which the policy is evaluated
    pub vrf: &'a str,
    /// Local address of the session, if any
    pub local_ip: Option<Ip>,
    /// Address of the peer, if any
    pub peer_ip: Option<Ip>,
}

impl<'a> PolicyEnvironment<'a> {
    /// Create an environment without a session.
    pub fn new(config: &'a Configuration, vrf: &'a str) -> Self {
        Self {
            config,
            vrf,
            local_ip: None,
            peer_ip: None,
        }
    }

    /// Create an environment for a BGP session.
    pub fn session(config: &'a Configuration, vrf: &'a str, local_ip: Ip, peer_ip: Ip) -> Self {
        Self {
            config,
            vrf,
            local_ip: Some(local_ip),
            peer_ip: Some(peer_ip),
        }
    }

    /// Look up a policy of the device by name.
    pub fn policy(&self, name: &str) -> Result<&'a dyn RoutingPolicy, PolicyError> {
        self.config.policy(name)
    }

    /// Replace the symbolic `self` and `peer-address` next hops by the session addresses.
    pub fn resolve_next_hop(&self, next_hop: &NextHop) -> NextHop {
        match (next_hop, self.local_ip, self.peer_ip) {
            (NextHop::SelfAddress, Some(ip), _) => NextHop::Ip(ip),
            (NextHop::PeerAddress, _, Some(ip)) => NextHop::Ip(ip),
            (nh, _, _) => nh.clone(),
        }
    }
}

/// A compiled routing policy.
pub trait RoutingPolicy: Debug + Send + Sync {
    /// Evaluate the policy on `input`. Transformations are written to `output`, which initially
    /// holds the route that would be produced without the policy. Returns `true` if the route is
    /// accepted.
    fn apply(
        &self,
        input: &Route,
        output: &mut RouteBuilder,
        direction: PolicyDirection,
        env: &PolicyEnvironment<'_>,
    ) -> Result<bool, PolicyError>;
}

/// Apply the policy called `name` (or accept the route if `name` is `None`), and resolve the
/// symbolic next hops afterwards.
pub fn apply_named_policy(
    name: Option<&str>,
    input: &Route,
    output: &mut RouteBuilder,
    direction: PolicyDirection,
    env: &PolicyEnvironment<'_>,
) -> Result<bool, PolicyError> {
    let accepted = match name {
        Some(name) => env.policy(name)?.apply(input, output, direction, env)?,
        None => true,
    };
    if let Some(nh) = output.get_next_hop() {
        let resolved = env.resolve_next_hop(nh);
        output.next_hop(resolved);
    }
    Ok(accepted)
}
