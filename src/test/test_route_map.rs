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

//! Test the evaluation of route maps.

use pretty_assertions::assert_eq;
use ribsim_macros::{ip, prefix};

use crate::{
    config::Configuration,
    policy::{apply_named_policy, PolicyDirection, PolicyEnvironment, RoutingPolicy},
    route::{AsPath, Community, NextHop, Route, RouteBuilder, RoutingProtocol},
    route_map::{RouteMap, RouteMapBuilder},
    types::{PolicyError, DEFAULT_VRF},
};

fn route() -> Route {
    RouteBuilder::bgp()
        .network(prefix!("10.0.0.0/24"))
        .protocol(RoutingProtocol::Bgp)
        .next_hop(NextHop::Ip(ip!("192.168.0.1")))
        .as_path(AsPath::from_sequence([65001, 65002]))
        .add_community(Community::new(65001, 1))
        .build()
        .unwrap()
}

fn eval(config: &Configuration, name: &str, input: &Route) -> Result<Option<Route>, PolicyError> {
    let env = PolicyEnvironment::session(config, DEFAULT_VRF, ip!("10.0.0.1"), ip!("10.0.0.2"));
    let mut out = input.to_builder();
    if apply_named_policy(Some(name), input, &mut out, PolicyDirection::In, &env)? {
        Ok(Some(out.build()?))
    } else {
        Ok(None)
    }
}

fn config_with(maps: Vec<RouteMap>) -> Configuration {
    let mut config = Configuration::new("r1");
    for map in maps {
        config.route_maps.insert(map.name.clone(), map);
    }
    config
}

#[test]
fn implicit_deny() {
    let config = config_with(vec![RouteMap::new(
        "only-20",
        vec![RouteMapBuilder::new()
            .order(10)
            .allow()
            .match_prefix(prefix!("20.0.0.0/8" as))
            .build()
            .unwrap()],
    )]);
    assert_eq!(eval(&config, "only-20", &route()), Ok(None));
}

#[test]
fn deny_entry() {
    let config = config_with(vec![RouteMap::new(
        "no-65002",
        vec![
            RouteMapBuilder::new()
                .order(10)
                .deny()
                .match_as_path_contains(65002)
                .build()
                .unwrap(),
            RouteMapBuilder::new().order(20).allow().build().unwrap(),
        ],
    )]);
    assert_eq!(eval(&config, "no-65002", &route()), Ok(None));

    let mut other = route().to_builder();
    other.as_path(AsPath::from_sequence([65003]));
    assert!(eval(&config, "no-65002", &other.build().unwrap())
        .unwrap()
        .is_some());
}

#[test]
fn set_and_continue() {
    let config = config_with(vec![RouteMap::new(
        "import",
        vec![
            RouteMapBuilder::new()
                .order(10)
                .allow()
                .match_community(Community::new(65001, 1))
                .set_local_pref(200)
                .continue_next()
                .build()
                .unwrap(),
            RouteMapBuilder::new()
                .order(20)
                .allow()
                .set_med(42)
                .set_next_hop(NextHop::PeerAddress)
                .build()
                .unwrap(),
            RouteMapBuilder::new()
                .order(30)
                .allow()
                .set_weight(100)
                .build()
                .unwrap(),
        ],
    )]);
    let out = eval(&config, "import", &route()).unwrap().unwrap();
    let attrs = out.bgp_attributes().unwrap();
    assert_eq!(attrs.local_preference(), 200);
    assert_eq!(out.metric(), 42);
    // entry 20 exits, so the weight is never changed
    assert_eq!(attrs.weight(), 0);
    // the symbolic next hop is resolved to the peer of the session
    assert_eq!(out.next_hop(), &NextHop::Ip(ip!("10.0.0.2")));
}

#[test]
fn nested_policy() {
    let config = config_with(vec![
        RouteMap::new(
            "is-customer",
            vec![RouteMapBuilder::new()
                .order(10)
                .allow()
                .match_community(Community::new(65001, 1))
                .build()
                .unwrap()],
        ),
        RouteMap::new(
            "outer",
            vec![RouteMapBuilder::new()
                .order(10)
                .allow()
                .match_policy("is-customer")
                .prepend_as_path(vec![65000.into(), 65000.into()])
                .build()
                .unwrap()],
        ),
    ]);
    let out = eval(&config, "outer", &route()).unwrap().unwrap();
    assert_eq!(out.bgp_attributes().unwrap().as_path().len(), 4);
}

#[test]
fn undefined_policy() {
    let config = config_with(vec![]);
    assert_eq!(
        eval(&config, "missing", &route()),
        Err(PolicyError::UndefinedPolicy("missing".to_string()))
    );
}

#[test]
fn invalid_continue() {
    let result = RouteMapBuilder::new()
        .order(10)
        .allow()
        .continue_at(5)
        .build();
    assert!(matches!(result, Err(PolicyError::InvalidRouteMap(_))));
}

#[test]
fn route_map_is_policy() {
    let map = RouteMap::new(
        "tag",
        vec![RouteMapBuilder::new()
            .order(10)
            .allow()
            .match_protocol(RoutingProtocol::Bgp)
            .build()
            .unwrap()],
    );
    let config = Configuration::new("r1");
    let env = PolicyEnvironment::new(&config, DEFAULT_VRF);
    let input = route();
    let mut out = input.to_builder();
    assert_eq!(
        map.apply(&input, &mut out, PolicyDirection::Out, &env),
        Ok(true)
    );
}

#[test]
fn prefix_range() {
    let config = config_with(vec![RouteMap::new(
        "slash-24s",
        vec![RouteMapBuilder::new()
            .order(10)
            .allow()
            .match_prefix_range(prefix!("10.0.0.0/8" as), 16, 24)
            .match_as_path_length(1..=2)
            .build()
            .unwrap()],
    )]);
    assert!(eval(&config, "slash-24s", &route()).unwrap().is_some());

    let mut longer = route().to_builder();
    longer.network(prefix!("10.0.0.0/25"));
    assert_eq!(eval(&config, "slash-24s", &longer.build().unwrap()), Ok(None));

    let mut long_path = route().to_builder();
    long_path.as_path(AsPath::from_sequence([65001, 65002, 65003]));
    assert_eq!(eval(&config, "slash-24s", &long_path.build().unwrap()), Ok(None));
}

#[test]
fn continue_at_skips_entries() {
    let config = config_with(vec![RouteMap::new(
        "goto",
        vec![
            RouteMapBuilder::new()
                .order(10)
                .allow()
                .set_local_pref(50)
                .continue_at(30)
                .build()
                .unwrap(),
            RouteMapBuilder::new().order(20).deny().build().unwrap(),
            RouteMapBuilder::new()
                .order(30)
                .allow()
                .set_med(7)
                .build()
                .unwrap(),
        ],
    )]);
    let out = eval(&config, "goto", &route()).unwrap().unwrap();
    assert_eq!(out.bgp_attributes().unwrap().local_preference(), 50);
    assert_eq!(out.metric(), 7);
}
