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

//! Routing information bases. A [`Rib`] maps each destination prefix to the set of co-equal best
//! routes, according to the comparator of its [`RibKind`].

use std::{cmp::Ordering, collections::BTreeSet};

use crate::{
    ospf::protocol_rank,
    route::{Route, RoutingProtocol, UNSET_IP},
    types::{Ip, Prefix, PrefixMap},
};

/// The kind of RIB, which determines how routes are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RibKind {
    /// Main RIB: administrative distance, then metric. Non-routing routes are never stored.
    Main,
    /// Connected routes
    Connected,
    /// Static routes
    Static,
    /// Generated routes
    Generated,
    /// OSPF intra-area routes: metric only.
    OspfIntra,
    /// OSPF inter-area routes: metric only.
    OspfInter,
    /// OSPF external type 1 routes: metric only.
    OspfE1,
    /// OSPF external type 2 routes: metric, then cost to the advertiser.
    OspfE2,
    /// Combined OSPF RIB: route type (intra, inter, E1, E2), then metric.
    Ospf,
    /// BGP RIBs, using the BGP decision process.
    Bgp,
}

impl RibKind {
    /// Compare two routes for the same prefix. `Ordering::Less` means that `a` is preferred over
    /// `b`, and `Ordering::Equal` means that both are equally good.
    pub fn compare(&self, a: &Route, b: &Route) -> Ordering {
        match self {
            Self::Main | Self::Connected | Self::Static | Self::Generated => a
                .admin()
                .cmp(&b.admin())
                .then(a.metric().cmp(&b.metric())),
            Self::OspfIntra | Self::OspfInter | Self::OspfE1 => a.metric().cmp(&b.metric()),
            Self::OspfE2 => a
                .metric()
                .cmp(&b.metric())
                .then_with(|| cost_to_advertiser(a).cmp(&cost_to_advertiser(b))),
            Self::Ospf => a
                .admin()
                .cmp(&b.admin())
                .then(protocol_rank(a.protocol()).cmp(&protocol_rank(b.protocol())))
                .then(a.metric().cmp(&b.metric())),
            Self::Bgp => compare_bgp(a, b),
        }
    }
}

fn cost_to_advertiser(route: &Route) -> u32 {
    route.ospf().map(|o| o.cost_to_advertiser).unwrap_or_default()
}

/// The BGP decision process. Ties remaining after the received-from IP are kept as multipath.
fn compare_bgp(a: &Route, b: &Route) -> Ordering {
    let (Some(aa), Some(ba)) = (a.bgp_attributes(), b.bgp_attributes()) else {
        return a
            .admin()
            .cmp(&b.admin())
            .then(a.metric().cmp(&b.metric()));
    };
    let ebgp_rank = |r: &Route| u8::from(r.protocol() == RoutingProtocol::Ibgp);
    let local_rank = |r: &Route| u8::from(r.received_from_ip() != UNSET_IP);
    a.admin()
        .cmp(&b.admin())
        // higher weight
        .then(ba.weight().cmp(&aa.weight()))
        // higher local preference
        .then(ba.local_preference().cmp(&aa.local_preference()))
        .then(local_rank(a).cmp(&local_rank(b)))
        .then(aa.as_path().len().cmp(&ba.as_path().len()))
        .then(aa.origin_type().cmp(&ba.origin_type()))
        .then(a.metric().cmp(&b.metric()))
        .then(ebgp_rank(a).cmp(&ebgp_rank(b)))
        .then(aa.originator_ip().cmp(&ba.originator_ip()))
        .then(a.received_from_ip().cmp(&b.received_from_ip()))
}

/// A routing information base, mapping each prefix to the set of best routes. All routes stored
/// for a prefix compare as equal under the RIB's ordering.
#[derive(Debug, Clone)]
pub struct Rib {
    kind: RibKind,
    routes: PrefixMap<BTreeSet<Route>>,
}

impl Rib {
    /// Create an empty RIB.
    pub fn new(kind: RibKind) -> Self {
        Self {
            kind,
            routes: PrefixMap::new(),
        }
    }

    /// The kind of this RIB.
    pub fn kind(&self) -> RibKind {
        self.kind
    }

    /// Merge a route into the RIB. If it beats the currently stored routes, they are evicted. If
    /// it is equally good, it is added as an additional best route. Returns `true` if the RIB was
    /// modified.
    pub fn merge(&mut self, route: Route) -> bool {
        let kind = self.kind;
        if kind == RibKind::Main && route.non_routing() {
            return false;
        }
        let best = self.routes.entry(route.network()).or_default();
        let ordering = match best.iter().next() {
            Some(current) => kind.compare(&route, current),
            None => Ordering::Less,
        };
        match ordering {
            Ordering::Less => {
                best.clear();
                best.insert(route);
                true
            }
            Ordering::Equal => best.insert(route),
            Ordering::Greater => false,
        }
    }

    /// Merge all routes of `other` into `self`. Returns `true` if `self` was modified.
    pub fn import(&mut self, other: &Rib) -> bool {
        let mut changed = false;
        for route in other.routes() {
            changed |= self.merge(route.clone());
        }
        changed
    }

    /// Keep only the routes for `prefix` for which `keep` returns `true`. Returns `true` if any route
    /// was removed.
    pub fn retain_routes<F>(&mut self, prefix: &Prefix, mut keep: F) -> bool
    where
        F: FnMut(&Route) -> bool,
    {
        let Some(best) = self.routes.get_mut(prefix) else {
            return false;
        };
        let before = best.len();
        best.retain(|r| keep(r));
        best.len() != before
    }

    /// Iterate over all routes, ordered by prefix.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flat_map(|r| r.iter())
    }

    /// Iterate over all prefixes with their best routes.
    pub fn iter(&self) -> impl Iterator<Item = (&Prefix, &BTreeSet<Route>)> {
        self.routes.iter().filter(|(_, r)| !r.is_empty())
    }

    /// Get the best routes for exactly `prefix`.
    pub fn get(&self, prefix: &Prefix) -> Option<&BTreeSet<Route>> {
        self.routes.get(prefix).filter(|r| !r.is_empty())
    }

    /// Returns `true` if `route` is one of the stored best routes.
    pub fn contains(&self, route: &Route) -> bool {
        self.get(&route.network())
            .map(|r| r.contains(route))
            .unwrap_or(false)
    }

    /// Longest prefix match of an address.
    pub fn longest_match(&self, ip: Ip) -> Option<(&Prefix, &BTreeSet<Route>)> {
        self.routes
            .get_lpm(&Prefix::host(ip))
            .filter(|(_, r)| !r.is_empty())
    }

    /// Longest prefix match of an address, ignoring the entry for `exclude`. Used to resolve the
    /// next hop of a route for `exclude` without depending on itself.
    pub fn longest_match_excluding(
        &self,
        ip: Ip,
        exclude: &Prefix,
    ) -> Option<(&Prefix, &BTreeSet<Route>)> {
        match self.longest_match(ip) {
            Some((p, _)) if p == exclude => {
                let len = exclude.prefix_len().checked_sub(1)?;
                let parent = Prefix::new(exclude.network(), len).ok()?;
                self.routes
                    .get_lpm(&parent)
                    .filter(|(_, r)| !r.is_empty())
            }
            x => x,
        }
    }

    /// Longest prefix match of an address among entries with at least one forwarding route,
    /// ignoring the entry for `exclude`. Falls back to less specific entries.
    pub fn longest_forwarding_match(
        &self,
        ip: Ip,
        exclude: &Prefix,
    ) -> Option<(&Prefix, &BTreeSet<Route>)> {
        let mut lookup = Prefix::host(ip);
        loop {
            let (p, routes) = self.routes.get_lpm(&lookup)?;
            if p != exclude && routes.iter().any(|r| !r.non_forwarding()) {
                return Some((p, routes));
            }
            let len = p.prefix_len().checked_sub(1)?;
            lookup = Prefix::new(p.network(), len).ok()?;
        }
    }

    /// Iterate over all routes for prefixes strictly more specific than `prefix`.
    pub fn more_specific_routes<'a>(
        &'a self,
        prefix: &'a Prefix,
    ) -> impl Iterator<Item = &'a Route> {
        self.routes
            .children(prefix)
            .filter(move |(p, _)| prefix.strictly_contains(*p))
            .flat_map(|(_, r)| r.iter())
    }

    /// Total number of routes.
    pub fn len(&self) -> usize {
        self.routes.values().map(|r| r.len()).sum()
    }

    /// Returns `true` if the RIB stores no route.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Rib {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Rib {}
