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

//! Forwarding information base, projected from the main RIB after convergence.

use std::collections::BTreeSet;

use log::trace;

use crate::{
    rib::Rib,
    route::{NextHop, Route},
    topology::IpOwners,
    types::{Ip, Prefix, PrefixMap, NULL_INTERFACE},
};

/// A single forwarding decision for a prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FibEntry {
    /// Outgoing interface ([`NULL_INTERFACE`] for discard routes)
    pub interface: String,
    /// Resolved next-hop address. `None` if the destination is directly connected.
    pub next_hop_ip: Option<Ip>,
    /// Node owning the next-hop address, if it is owned by a node of the network.
    pub next_hop_node: Option<String>,
    /// Main-RIB route that produced the entry
    pub route: Route,
}

impl FibEntry {
    /// Returns `true` if packets using this entry are dropped.
    pub fn is_discard(&self) -> bool {
        self.interface == NULL_INTERFACE
    }
}

/// Forwarding table of one virtual router.
#[derive(Debug, Clone, Default)]
pub struct Fib {
    entries: PrefixMap<BTreeSet<FibEntry>>,
}

impl Fib {
    /// Compile the forwarding-capable routes of the main RIB. Next-hop addresses are resolved
    /// recursively to an outgoing interface, and the node owning the next hop is looked up once per
    /// route. Routes whose next hop cannot be resolved are left out.
    pub fn new(main: &Rib, ip_owners: &IpOwners) -> Self {
        let mut entries: PrefixMap<BTreeSet<FibEntry>> = PrefixMap::new();
        for route in main.routes().filter(|r| !r.non_forwarding()) {
            let mut visited = BTreeSet::new();
            let resolved = resolve(main, route, &mut visited);
            if resolved.is_empty() {
                trace!("Cannot resolve the next hop of {route}");
                continue;
            }
            let slot = entries.entry(route.network()).or_default();
            for (interface, next_hop_ip) in resolved {
                let owners: Vec<String> = next_hop_ip
                    .map(|ip| ip_owners.owners(ip).cloned().collect())
                    .unwrap_or_default();
                if owners.is_empty() {
                    slot.insert(FibEntry {
                        interface,
                        next_hop_ip,
                        next_hop_node: None,
                        route: route.clone(),
                    });
                } else {
                    for owner in owners {
                        slot.insert(FibEntry {
                            interface: interface.clone(),
                            next_hop_ip,
                            next_hop_node: Some(owner),
                            route: route.clone(),
                        });
                    }
                }
            }
        }
        Self { entries }
    }

    /// Longest prefix match of a destination address.
    pub fn lookup(&self, ip: Ip) -> Option<(&Prefix, &BTreeSet<FibEntry>)> {
        self.entries
            .get_lpm(&Prefix::host(ip))
            .filter(|(_, e)| !e.is_empty())
    }

    /// Entries of exactly `prefix`.
    pub fn get(&self, prefix: &Prefix) -> Option<&BTreeSet<FibEntry>> {
        self.entries.get(prefix)
    }

    /// Iterate over all prefixes and their entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Prefix, &BTreeSet<FibEntry>)> {
        self.entries.iter()
    }

    /// Number of prefixes in the FIB.
    pub fn len(&self) -> usize {
        self.entries.keys().count()
    }

    /// Returns `true` if the FIB has no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve the next hop of a route to pairs of outgoing interface and next-hop address. Prefixes
/// already visited on the current resolution path are skipped, which stops recursive loops.
fn resolve(
    main: &Rib,
    route: &Route,
    visited: &mut BTreeSet<Prefix>,
) -> BTreeSet<(String, Option<Ip>)> {
    match route.next_hop() {
        NextHop::Discard => BTreeSet::from([(NULL_INTERFACE.to_string(), None)]),
        NextHop::Interface { interface, ip } => BTreeSet::from([(interface.clone(), *ip)]),
        NextHop::SelfAddress | NextHop::PeerAddress => BTreeSet::new(),
        NextHop::Ip(nh) => {
            if !visited.insert(route.network()) {
                return BTreeSet::new();
            }
            let Some((_, candidates)) = main.longest_forwarding_match(*nh, &route.network()) else {
                return BTreeSet::new();
            };
            let mut result = BTreeSet::new();
            for next in candidates.iter().filter(|r| !r.non_forwarding()) {
                match next.next_hop() {
                    // the next hop lies on a connected subnet
                    NextHop::Interface { interface, ip: None } => {
                        result.insert((interface.clone(), Some(*nh)));
                    }
                    _ => result.extend(resolve(main, next, visited)),
                }
            }
            visited.remove(&route.network());
            result
        }
    }
}
