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

//! Helpers shared by the tests: small network snapshots, and a compact representation of flow
//! traces.

use crate::{
    config::{BgpNeighbor, BgpProcess, Configuration, Interface},
    dataplane::DataPlane,
    flow::Flow,
    types::{Ip, NetworkError, DEFAULT_VRF, NONE_NODE},
};
use ribsim_macros::{ip, prefix};

mod test_bgp;
mod test_ospf;
mod test_route;
mod test_route_map;

/// Trace a flow from `from` towards `dst`, and write each trace as the disposition followed by
/// the visited nodes, e.g., `ACCEPTED r1 r2`.
pub(crate) fn trace_paths(
    dp: &DataPlane,
    from: &str,
    dst: Ip,
) -> Result<Vec<String>, NetworkError> {
    let flow = Flow::new(from, Ip::UNSPECIFIED, dst);
    Ok(dp
        .trace(&flow)?
        .into_iter()
        .map(|t| {
            let mut nodes = vec![from.to_string()];
            nodes.extend(
                t.hops
                    .iter()
                    .map(|h| h.edge.to.node.clone())
                    .filter(|n| n != NONE_NODE),
            );
            format!("{} {}", t.disposition, nodes.join(" "))
        })
        .collect())
}

/// Two routers in different ASes connected over `10.0.0.0/30`, each originating its loopback
/// (`1.1.1.1/32` and `2.2.2.2/32`) into BGP.
pub(crate) fn ebgp_pair() -> (Configuration, Configuration) {
    let mut r1 = Configuration::new("r1")
        .with_interface("lo", Interface::loopback(prefix!("1.1.1.1/32")))
        .with_interface("eth0", Interface::new(prefix!("10.0.0.1/30")));
    let mut bgp = BgpProcess::new(ip!("1.1.1.1"), 65001);
    bgp.neighbors.push(BgpNeighbor::new(ip!("10.0.0.2"), 65002));
    bgp.networks.insert(prefix!("1.1.1.1/32" as));
    r1.vrf_mut(DEFAULT_VRF).bgp = Some(bgp);

    let mut r2 = Configuration::new("r2")
        .with_interface("lo", Interface::loopback(prefix!("2.2.2.2/32")))
        .with_interface("eth0", Interface::new(prefix!("10.0.0.2/30")));
    let mut bgp = BgpProcess::new(ip!("2.2.2.2"), 65002);
    bgp.neighbors.push(BgpNeighbor::new(ip!("10.0.0.1"), 65001));
    bgp.networks.insert(prefix!("2.2.2.2/32" as));
    r2.vrf_mut(DEFAULT_VRF).bgp = Some(bgp);

    (r1, r2)
}
