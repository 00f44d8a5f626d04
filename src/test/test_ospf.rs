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

//! Test the OSPF computation: intra-area, inter-area and external routes.

use pretty_assertions::assert_eq;
use ribsim_macros::{ip, prefix};
use test_log::test;

use crate::{
    config::{Configuration, Interface, OspfProcess, StaticRoute},
    network::Network,
    ospf::{OspfArea, OspfMetricType},
    route::{NextHop, RoutingProtocol},
    route_map::{RouteMap, RouteMapBuilder},
    test::trace_paths,
    types::{Ip, DEFAULT_VRF},
};

/// Three routers in a line `r1 - r2 - r3`, with links of cost 10 and loopbacks of cost 1. The
/// link (and loopback) of r1 is placed in area `a12`, the link (and loopback) of r3 in area
/// `a23`. The loopback of r2 is always in the backbone.
fn ospf_line(a12: u32, a23: u32) -> Vec<Configuration> {
    let with_ospf = |mut config: Configuration, router_id: Ip| {
        config.vrf_mut(DEFAULT_VRF).ospf = Some(OspfProcess::new(router_id));
        config
    };
    let r1 = Configuration::new("r1")
        .with_interface(
            "lo",
            Interface::loopback(prefix!("1.1.1.1/32")).with_ospf(a12, Some(1)),
        )
        .with_interface(
            "eth0",
            Interface::new(prefix!("10.0.12.1/30")).with_ospf(a12, Some(10)),
        );
    let r2 = Configuration::new("r2")
        .with_interface(
            "lo",
            Interface::loopback(prefix!("2.2.2.2/32")).with_ospf(0, Some(1)),
        )
        .with_interface(
            "eth0",
            Interface::new(prefix!("10.0.12.2/30")).with_ospf(a12, Some(10)),
        )
        .with_interface(
            "eth1",
            Interface::new(prefix!("10.0.23.1/30")).with_ospf(a23, Some(10)),
        );
    let r3 = Configuration::new("r3")
        .with_interface(
            "lo",
            Interface::loopback(prefix!("3.3.3.3/32")).with_ospf(a23, Some(1)),
        )
        .with_interface(
            "eth0",
            Interface::new(prefix!("10.0.23.2/30")).with_ospf(a23, Some(10)),
        );
    vec![
        with_ospf(r1, ip!("1.1.1.1")),
        with_ospf(r2, ip!("2.2.2.2")),
        with_ospf(r3, ip!("3.3.3.3")),
    ]
}

#[test]
fn single_area() {
    let dp = Network::new(ospf_line(0, 0)).compute_data_plane().unwrap();
    let rib = dp.main_rib("r1", DEFAULT_VRF).unwrap();

    let routes: Vec<_> = rib
        .get(&prefix!("3.3.3.3/32" as))
        .unwrap()
        .iter()
        .map(|r| (r.protocol(), r.metric(), r.next_hop_ip()))
        .collect();
    assert_eq!(
        routes,
        vec![(RoutingProtocol::OspfIntra, 21, Some(ip!("10.0.12.2")))]
    );

    // r2 keeps its own advertisement of the shared link, which r1 then learns with cost 20.
    let link: Vec<_> = rib
        .get(&prefix!("10.0.23.0/30" as))
        .unwrap()
        .iter()
        .map(|r| (r.protocol(), r.metric()))
        .collect();
    assert_eq!(link, vec![(RoutingProtocol::OspfIntra, 20)]);

    assert_eq!(
        trace_paths(&dp, "r1", ip!("3.3.3.3")).unwrap(),
        vec!["ACCEPTED r1 r2 r3"]
    );
    assert_eq!(
        trace_paths(&dp, "r3", ip!("1.1.1.1")).unwrap(),
        vec!["ACCEPTED r3 r2 r1"]
    );
    assert!(dp.stats().ospf_internal_iterations >= 2);
}

#[test]
fn passive_interface() {
    let mut configs = ospf_line(0, 0);
    let r2 = &mut configs[1];
    if let Some(ospf) = r2.interfaces.get_mut("eth1").and_then(|i| i.ospf.as_mut()) {
        ospf.passive = true;
    }
    let dp = Network::new(configs).compute_data_plane().unwrap();
    let rib = dp.main_rib("r1", DEFAULT_VRF).unwrap();

    // no adjacency to r3, but the passive network is still advertised by r2
    assert!(rib.get(&prefix!("3.3.3.3/32" as)).is_none());
    assert!(rib.get(&prefix!("10.0.23.0/30" as)).is_some());
    assert!(dp
        .main_rib("r3", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("1.1.1.1/32" as))
        .is_none());
}

#[test]
fn inter_area() {
    let dp = Network::new(ospf_line(1, 0)).compute_data_plane().unwrap();

    let rib = dp.main_rib("r1", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = rib
        .get(&prefix!("3.3.3.3/32" as))
        .unwrap()
        .iter()
        .map(|r| {
            (
                r.protocol(),
                r.metric(),
                r.ospf().map(|o| o.area),
            )
        })
        .collect();
    assert_eq!(
        routes,
        vec![(RoutingProtocol::OspfInter, 21, Some(OspfArea::from(1u32)))]
    );

    // the border router knows both areas as intra-area routes
    let r2 = dp.main_rib("r2", DEFAULT_VRF).unwrap();
    for network in [prefix!("1.1.1.1/32" as), prefix!("3.3.3.3/32" as)] {
        let protocols: Vec<_> = r2.get(&network).unwrap().iter().map(|r| r.protocol()).collect();
        assert_eq!(protocols, vec![RoutingProtocol::OspfIntra]);
    }

    let r3 = dp.main_rib("r3", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = r3
        .get(&prefix!("1.1.1.1/32" as))
        .unwrap()
        .iter()
        .map(|r| (r.protocol(), r.metric()))
        .collect();
    assert_eq!(routes, vec![(RoutingProtocol::OspfInter, 21)]);

    assert_eq!(
        trace_paths(&dp, "r1", ip!("3.3.3.3")).unwrap(),
        vec!["ACCEPTED r1 r2 r3"]
    );
}

fn redistribute_static(metric_type: OspfMetricType) -> Vec<Configuration> {
    let mut configs = ospf_line(0, 0);
    let r3 = &mut configs[2];
    r3.route_maps.insert(
        "redistribute-static".to_string(),
        RouteMap::new(
            "redistribute-static",
            vec![RouteMapBuilder::new()
                .order(10)
                .allow()
                .match_protocol(RoutingProtocol::Static)
                .build()
                .unwrap()],
        ),
    );
    let vrf = r3.vrf_mut(DEFAULT_VRF);
    vrf.static_routes.push(StaticRoute::new(
        prefix!("192.168.0.0/24"),
        NextHop::Discard,
    ));
    if let Some(ospf) = vrf.ospf.as_mut() {
        ospf.export_policy = Some("redistribute-static".to_string());
        ospf.export_metric_type = metric_type;
    }
    configs
}

#[test]
fn external_type_2() {
    let dp = Network::new(redistribute_static(OspfMetricType::E2))
        .compute_data_plane()
        .unwrap();
    let rib = dp.main_rib("r1", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = rib
        .get(&prefix!("192.168.0.0/24" as))
        .unwrap()
        .iter()
        .map(|r| {
            (
                r.protocol(),
                r.metric(),
                r.ospf().map(|o| (o.advertiser.clone(), o.cost_to_advertiser)),
            )
        })
        .collect();
    assert_eq!(
        routes,
        vec![(RoutingProtocol::OspfE2, 20, Some(("r3".to_string(), 20)))]
    );

    // connected routes of r3 are not redistributed
    assert!(rib
        .routes()
        .filter(|r| r.protocol().is_ospf_external())
        .all(|r| r.network() == prefix!("192.168.0.0/24" as)));

    assert_eq!(
        trace_paths(&dp, "r1", ip!("192.168.0.1")).unwrap(),
        vec!["NULL_ROUTED r1 r2 r3"]
    );
}

#[test]
fn external_type_1() {
    let dp = Network::new(redistribute_static(OspfMetricType::E1))
        .compute_data_plane()
        .unwrap();
    let routes: Vec<_> = dp
        .main_rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("192.168.0.0/24" as))
        .unwrap()
        .iter()
        .map(|r| (r.protocol(), r.metric()))
        .collect();
    assert_eq!(routes, vec![(RoutingProtocol::OspfE1, 40)]);
}
