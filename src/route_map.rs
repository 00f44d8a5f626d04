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

//! # Route maps
//!
//! A route map is a named list of entries, evaluated in the order of their sequence number. An
//! entry matches a route if all of its conditions hold. A matching entry either rejects the route,
//! or rewrites it and decides where evaluation continues. A route that is never permitted is
//! rejected.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{
    acl::LineAction,
    policy::{PolicyDirection, PolicyEnvironment, RoutingPolicy},
    route::{
        AsPath, Community, NextHop, OriginType, Route, RouteBuilder, RoutingProtocol,
        DEFAULT_LOCAL_PREFERENCE,
    },
    types::{AsId, Ip, PolicyError, Prefix},
};

/// A named route map, the policy type stored in a [`crate::config::Configuration`].
///
/// ```
/// # use ribsim::route_map::*;
/// # use ribsim_macros::prefix;
/// let map = RouteMap::new(
///     "export",
///     vec![RouteMapBuilder::new()
///         .order(10)
///         .allow()
///         .match_prefix(prefix!("10.0.0.0/8" as))
///         .set_community(1)
///         .reset_local_pref()
///         .build()
///         .unwrap()],
/// );
/// assert_eq!(map.entries().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMap {
    /// Name under which the map is referenced
    pub name: String,
    entries: Vec<RouteMapEntry>,
}

impl RouteMap {
    /// Create a route map from its entries, in any order.
    pub fn new(name: impl Into<String>, mut entries: Vec<RouteMapEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        Self {
            name: name.into(),
            entries,
        }
    }

    /// Entries sorted by sequence number.
    pub fn entries(&self) -> &[RouteMapEntry] {
        &self.entries
    }

    fn position(&self, seq: u16) -> Option<usize> {
        self.entries.binary_search_by_key(&seq, |e| e.seq).ok()
    }
}

impl RoutingPolicy for RouteMap {
    fn apply(
        &self,
        input: &Route,
        output: &mut RouteBuilder,
        direction: PolicyDirection,
        env: &PolicyEnvironment<'_>,
    ) -> Result<bool, PolicyError> {
        let mut permitted = false;
        let mut idx = 0;
        while let Some(entry) = self.entries.get(idx) {
            idx += 1;
            if !entry.matches(input, direction, env)? {
                continue;
            }
            if entry.action == LineAction::Reject {
                return Ok(false);
            }
            entry.sets.iter().for_each(|s| s.apply(output));
            permitted = true;
            match entry.next {
                Continuation::Exit => break,
                Continuation::Next => {}
                // a missing target, or one that jumps backwards, ends the evaluation
                Continuation::Goto(seq) => match self.position(seq) {
                    Some(pos) if pos >= idx => idx = pos,
                    _ => break,
                },
            }
        }
        Ok(permitted)
    }
}

/// One entry of a route map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMapEntry {
    /// Sequence number
    pub seq: u16,
    /// What happens to a matching route
    pub action: LineAction,
    /// Conditions, all of which must hold
    pub conditions: Vec<MatchCondition>,
    /// Modifications of permitted routes, applied in order
    pub sets: Vec<SetAction>,
    /// Where to continue after a permitting match
    pub next: Continuation,
}

impl RouteMapEntry {
    /// Check all conditions against the input route (not the partially rewritten one).
    pub fn matches(
        &self,
        route: &Route,
        direction: PolicyDirection,
        env: &PolicyEnvironment<'_>,
    ) -> Result<bool, PolicyError> {
        for condition in self.conditions.iter() {
            if !condition.matches(route, direction, env)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Builder for a [`RouteMapEntry`]. Both [`Self::order`] and either [`Self::allow`] or
/// [`Self::deny`] are required. An entry without conditions matches every route.
#[derive(Debug, Default)]
pub struct RouteMapBuilder {
    seq: Option<u16>,
    action: Option<LineAction>,
    prefixes: Vec<PrefixRange>,
    conditions: Vec<MatchCondition>,
    sets: Vec<SetAction>,
    next: Continuation,
}

impl RouteMapBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the entry.
    pub fn order(&mut self, seq: u16) -> &mut Self {
        self.seq = Some(seq);
        self
    }

    /// Permit matching routes.
    pub fn allow(&mut self) -> &mut Self {
        self.action = Some(LineAction::Accept);
        self
    }

    /// Reject matching routes.
    pub fn deny(&mut self) -> &mut Self {
        self.action = Some(LineAction::Reject);
        self
    }

    /// Add an arbitrary condition.
    pub fn condition(&mut self, condition: MatchCondition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    /// Match the exact network. Repeated calls build a prefix list: any of the networks match.
    pub fn match_prefix(&mut self, prefix: Prefix) -> &mut Self {
        self.prefixes.push(PrefixRange::exact(prefix));
        self
    }

    /// Match networks inside `prefix` whose length is in `min_len..=max_len`. Shares the prefix
    /// list with [`Self::match_prefix`].
    pub fn match_prefix_range(&mut self, prefix: Prefix, min_len: u8, max_len: u8) -> &mut Self {
        self.prefixes.push(PrefixRange {
            prefix,
            lengths: min_len..=max_len,
        });
        self
    }

    /// Match BGP routes that traversed `as_id`.
    pub fn match_as_path_contains(&mut self, as_id: impl Into<AsId>) -> &mut Self {
        self.condition(MatchCondition::AsPathContains(as_id.into()))
    }

    /// Match BGP routes whose AS path length is in `lengths`.
    pub fn match_as_path_length(&mut self, lengths: RangeInclusive<usize>) -> &mut Self {
        self.condition(MatchCondition::AsPathLength(lengths))
    }

    /// Match the next-hop address.
    pub fn match_next_hop(&mut self, next_hop: Ip) -> &mut Self {
        self.condition(MatchCondition::NextHop(next_hop))
    }

    /// Match BGP routes carrying `community`.
    pub fn match_community(&mut self, community: impl Into<Community>) -> &mut Self {
        self.condition(MatchCondition::Community(community.into()))
    }

    /// Match routes that do not carry `community`.
    pub fn match_missing_community(&mut self, community: impl Into<Community>) -> &mut Self {
        self.condition(MatchCondition::MissingCommunity(community.into()))
    }

    /// Match the protocol that produced the route.
    pub fn match_protocol(&mut self, protocol: RoutingProtocol) -> &mut Self {
        self.condition(MatchCondition::Protocol(protocol))
    }

    /// Match the route tag.
    pub fn match_tag(&mut self, tag: u32) -> &mut Self {
        self.condition(MatchCondition::Tag(tag))
    }

    /// Match routes that another policy of the same device permits.
    pub fn match_policy(&mut self, name: impl Into<String>) -> &mut Self {
        self.condition(MatchCondition::Policy(name.into()))
    }

    /// Add an arbitrary modification.
    pub fn set(&mut self, set: SetAction) -> &mut Self {
        self.sets.push(set);
        self
    }

    /// Overwrite the next hop.
    pub fn set_next_hop(&mut self, next_hop: NextHop) -> &mut Self {
        self.set(SetAction::NextHop(next_hop))
    }

    /// Overwrite the BGP weight.
    pub fn set_weight(&mut self, weight: u32) -> &mut Self {
        self.set(SetAction::Weight(weight))
    }

    /// Overwrite the local preference.
    pub fn set_local_pref(&mut self, local_pref: u32) -> &mut Self {
        self.set(SetAction::LocalPreference(local_pref))
    }

    /// Set the local preference back to its default.
    pub fn reset_local_pref(&mut self) -> &mut Self {
        self.set(SetAction::LocalPreference(DEFAULT_LOCAL_PREFERENCE))
    }

    /// Overwrite the metric, which is the MED of BGP routes.
    pub fn set_med(&mut self, med: u32) -> &mut Self {
        self.set(SetAction::Metric(med))
    }

    /// Overwrite (or clear) the route tag.
    pub fn set_tag(&mut self, tag: Option<u32>) -> &mut Self {
        self.set(SetAction::Tag(tag))
    }

    /// Overwrite the BGP origin.
    pub fn set_origin(&mut self, origin: OriginType) -> &mut Self {
        self.set(SetAction::Origin(origin))
    }

    /// Attach a community.
    pub fn set_community(&mut self, community: impl Into<Community>) -> &mut Self {
        self.set(SetAction::AddCommunity(community.into()))
    }

    /// Strip a community.
    pub fn remove_community(&mut self, community: impl Into<Community>) -> &mut Self {
        self.set(SetAction::DeleteCommunity(community.into()))
    }

    /// Prepend `path` to the AS path. The first element ends up leftmost.
    pub fn prepend_as_path(&mut self, path: Vec<AsId>) -> &mut Self {
        self.set(SetAction::PrependAsPath(path))
    }

    /// Stop after a permitting match (the default).
    pub fn exit(&mut self) -> &mut Self {
        self.next = Continuation::Exit;
        self
    }

    /// Continue with the following entry after a permitting match.
    pub fn continue_next(&mut self) -> &mut Self {
        self.next = Continuation::Next;
        self
    }

    /// Jump to the entry with sequence number `seq` after a permitting match.
    pub fn continue_at(&mut self, seq: u16) -> &mut Self {
        self.next = Continuation::Goto(seq);
        self
    }

    /// Build the entry.
    pub fn build(&self) -> Result<RouteMapEntry, PolicyError> {
        let invalid = |msg: String| PolicyError::InvalidRouteMap(msg);
        let seq = self
            .seq
            .ok_or_else(|| invalid("missing sequence number".to_string()))?;
        let action = self
            .action
            .ok_or_else(|| invalid(format!("entry {seq} is neither permit nor deny")))?;
        if let Continuation::Goto(target) = self.next {
            if target <= seq {
                return Err(invalid(format!(
                    "entry {seq} can only continue at a later entry, not at {target}"
                )));
            }
        }
        let mut conditions = self.conditions.clone();
        if !self.prefixes.is_empty() {
            conditions.push(MatchCondition::PrefixList(self.prefixes.clone()));
        }
        Ok(RouteMapEntry {
            seq,
            action,
            conditions,
            sets: self.sets.clone(),
            next: self.next,
        })
    }
}

/// A prefix together with the range of network lengths it admits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRange {
    /// Covering prefix
    pub prefix: Prefix,
    /// Admitted lengths
    pub lengths: RangeInclusive<u8>,
}

impl PrefixRange {
    /// Admit only `prefix` itself.
    pub fn exact(prefix: Prefix) -> Self {
        let len = prefix.prefix_len();
        Self {
            prefix,
            lengths: len..=len,
        }
    }

    /// Whether `network` lies inside the prefix with an admitted length.
    pub fn matches(&self, network: &Prefix) -> bool {
        self.lengths.contains(&network.prefix_len()) && self.prefix.contains(network)
    }
}

/// Condition of a route-map entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchCondition {
    /// The network matches any range of the list
    PrefixList(Vec<PrefixRange>),
    /// The AS path contains the AS
    AsPathContains(AsId),
    /// The AS path length is in the range
    AsPathLength(RangeInclusive<usize>),
    /// The next-hop address equals the given one
    NextHop(Ip),
    /// The route carries the community
    Community(Community),
    /// The route does not carry the community. Non-BGP routes carry none.
    MissingCommunity(Community),
    /// The route was produced by the protocol
    Protocol(RoutingProtocol),
    /// The route carries the tag
    Tag(u32),
    /// The named policy permits the route
    Policy(String),
}

impl MatchCondition {
    /// Evaluate the condition. Only [`MatchCondition::Policy`] can fail, if the referenced policy
    /// is not defined.
    pub fn matches(
        &self,
        route: &Route,
        direction: PolicyDirection,
        env: &PolicyEnvironment<'_>,
    ) -> Result<bool, PolicyError> {
        let as_path = || route.bgp_attributes().map(|a| a.as_path());
        let has_community = |c: &Community| {
            route
                .bgp_attributes()
                .map_or(false, |a| a.communities().contains(c))
        };
        Ok(match self {
            Self::PrefixList(ranges) => ranges.iter().any(|r| r.matches(&route.network())),
            Self::AsPathContains(as_id) => as_path().map_or(false, |p: &AsPath| p.contains(*as_id)),
            Self::AsPathLength(lengths) => {
                as_path().map_or(false, |p: &AsPath| lengths.contains(&p.len()))
            }
            Self::NextHop(ip) => route.next_hop_ip() == Some(*ip),
            Self::Community(c) => has_community(c),
            Self::MissingCommunity(c) => !has_community(c),
            Self::Protocol(p) => route.protocol() == *p,
            Self::Tag(t) => route.tag() == Some(*t),
            Self::Policy(name) => {
                // the nested policy must not leak its modifications
                let mut scratch = route.to_builder();
                env.policy(name)?
                    .apply(route, &mut scratch, direction, env)?
            }
        })
    }
}

/// Modification applied by a permitting entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetAction {
    /// Overwrite the next hop
    NextHop(NextHop),
    /// Overwrite the BGP weight
    Weight(u32),
    /// Overwrite the local preference
    LocalPreference(u32),
    /// Overwrite the metric (the MED for BGP)
    Metric(u32),
    /// Overwrite the route tag
    Tag(Option<u32>),
    /// Overwrite the BGP origin
    Origin(OriginType),
    /// Attach a community
    AddCommunity(Community),
    /// Strip a community
    DeleteCommunity(Community),
    /// Prepend a sequence of ASes
    PrependAsPath(Vec<AsId>),
}

impl SetAction {
    /// Apply the modification to the output route.
    pub fn apply(&self, out: &mut RouteBuilder) {
        match self {
            Self::NextHop(nh) => {
                out.next_hop(nh.clone());
            }
            Self::Weight(w) => {
                out.weight(*w);
            }
            Self::LocalPreference(lp) => {
                out.local_preference(*lp);
            }
            Self::Metric(m) => {
                out.metric(*m);
            }
            Self::Tag(t) => {
                out.tag(*t);
            }
            Self::Origin(o) => {
                out.origin_type(*o);
            }
            Self::AddCommunity(c) => {
                out.add_community(*c);
            }
            Self::DeleteCommunity(c) => {
                out.remove_community(*c);
            }
            Self::PrependAsPath(path) => {
                path.iter().rev().for_each(|as_id| {
                    out.prepend_as(*as_id);
                });
            }
        }
    }
}

/// Where evaluation continues after an entry permitted a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Continuation {
    /// Stop and permit the route
    #[default]
    Exit,
    /// Evaluate the following entry
    Next,
    /// Evaluate the entry with the given sequence number, or stop if there is none
    Goto(u16),
}
