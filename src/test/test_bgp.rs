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

//! Test BGP: route reflection, routing policies, external announcements and route origination.

use std::collections::BTreeMap;

use maplit::{btreemap, btreeset};
use pretty_assertions::assert_eq;
use ribsim_macros::{ip, prefix};
use test_log::test;

use crate::{
    bgp::BgpSessionType,
    config::{
        BgpNeighbor, BgpProcess, Configuration, ExternalAnnouncement, Interface, OspfProcess,
        StaticRoute,
    },
    network::Network,
    route::{NextHop, OriginType, RoutingProtocol},
    route_map::{RouteMap, RouteMapBuilder},
    test::{ebgp_pair, trace_paths},
    types::{Ip, NetworkError, PolicyError, DEFAULT_VRF},
};

fn add_route_map(config: &mut Configuration, map: RouteMap) {
    config.route_maps.insert(map.name.clone(), map);
}

fn neighbor_mut(config: &mut Configuration, peer: Ip) -> &mut BgpNeighbor {
    config
        .vrf_mut(DEFAULT_VRF)
        .bgp
        .as_mut()
        .and_then(|b| b.neighbors.iter_mut().find(|n| n.peer_ip == peer))
        .unwrap()
}

/// Route reflector `rr` with two clients `c1` and `c2` in AS 65000, using OSPF as IGP. `c1` is
/// connected to an external peer `172.16.0.2` in AS 65100, which announces `100.0.0.0/24`.
fn reflection(clients: bool) -> Network {
    let ospf_link = |addr: ipnet::Ipv4Net| Interface::new(addr).with_ospf(0, Some(10));
    let setup = |mut config: Configuration, router_id: Ip, neighbors: Vec<BgpNeighbor>| {
        let vrf = config.vrf_mut(DEFAULT_VRF);
        vrf.ospf = Some(OspfProcess::new(router_id));
        let mut bgp = BgpProcess::new(router_id, 65000);
        bgp.neighbors = neighbors;
        vrf.bgp = Some(bgp);
        config
    };

    let rr = setup(
        Configuration::new("rr")
            .with_interface("eth1", ospf_link(prefix!("10.0.1.2/30")))
            .with_interface("eth2", ospf_link(prefix!("10.0.2.1/30"))),
        ip!("10.255.0.1"),
        vec![
            BgpNeighbor {
                route_reflector_client: clients,
                ..BgpNeighbor::new(ip!("10.0.1.1"), 65000)
            },
            BgpNeighbor {
                route_reflector_client: clients,
                ..BgpNeighbor::new(ip!("10.0.2.2"), 65000)
            },
        ],
    );
    let c1 = setup(
        Configuration::new("c1")
            .with_interface("eth0", ospf_link(prefix!("10.0.1.1/30")))
            .with_interface("ext", Interface::new(prefix!("172.16.0.1/30"))),
        ip!("10.255.0.2"),
        vec![
            BgpNeighbor {
                next_hop_self: true,
                ..BgpNeighbor::new(ip!("10.0.1.2"), 65000)
            },
            BgpNeighbor::new(ip!("172.16.0.2"), 65100),
        ],
    );
    let c2 = setup(
        Configuration::new("c2").with_interface("eth0", ospf_link(prefix!("10.0.2.2/30"))),
        ip!("10.255.0.3"),
        vec![BgpNeighbor::new(ip!("10.0.2.1"), 65000)],
    );

    let mut net = Network::new([rr, c1, c2]);
    net.add_external_announcement(ExternalAnnouncement::new(
        "c1",
        ip!("172.16.0.2"),
        prefix!("100.0.0.0/24"),
        vec![65100.into()],
    ));
    net
}

#[test]
fn route_reflection() {
    let dp = reflection(true).compute_data_plane().unwrap();
    assert_eq!(dp.bgp_topology().num_sessions(), 4);
    let sessions: BTreeMap<(String, String), BgpSessionType> = dp
        .bgp_topology()
        .sessions()
        .map(|(from, to, s)| ((from.node.clone(), to.node.clone()), s.session_type))
        .collect();
    let to_client = BgpSessionType::Internal { to_client: true };
    let to_peer = BgpSessionType::Internal { to_client: false };
    assert_eq!(
        sessions,
        btreemap! {
            ("rr".to_string(), "c1".to_string()) => to_client,
            ("rr".to_string(), "c2".to_string()) => to_client,
            ("c1".to_string(), "rr".to_string()) => to_peer,
            ("c2".to_string(), "rr".to_string()) => to_peer,
        }
    );

    let rr = dp.main_rib("rr", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = rr
        .get(&prefix!("100.0.0.0/24" as))
        .unwrap()
        .iter()
        .map(|r| (r.protocol(), r.next_hop_ip()))
        .collect();
    assert_eq!(routes, vec![(RoutingProtocol::Ibgp, Some(ip!("10.0.1.1")))]);

    let c2 = dp.main_rib("c2", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = c2.get(&prefix!("100.0.0.0/24" as)).unwrap().iter().collect();
    assert_eq!(routes.len(), 1);
    let route = routes[0];
    assert_eq!(route.protocol(), RoutingProtocol::Ibgp);
    assert_eq!(route.next_hop_ip(), Some(ip!("10.0.1.1")));
    assert_eq!(route.received_from_ip(), ip!("10.0.2.1"));
    let attrs = route.bgp_attributes().unwrap();
    assert_eq!(attrs.originator_ip(), ip!("10.255.0.2"));
    assert_eq!(attrs.cluster_list(), &btreeset! {u32::from(ip!("10.255.0.1"))});
    assert_eq!(attrs.as_path().len(), 1);

    assert_eq!(
        trace_paths(&dp, "c2", ip!("100.0.0.1")).unwrap(),
        vec!["ACCEPTED c2 rr c1"]
    );
}

#[test]
fn no_reflection_without_clients() {
    let dp = reflection(false).compute_data_plane().unwrap();
    assert!(dp
        .main_rib("rr", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("100.0.0.0/24" as))
        .is_some());
    assert!(dp
        .main_rib("c2", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("100.0.0.0/24" as))
        .is_none());
    assert_eq!(
        trace_paths(&dp, "c2", ip!("100.0.0.1")).unwrap(),
        vec!["NO_ROUTE c2"]
    );
}

#[test]
fn import_and_export_policies() {
    // r1 rejects the loopback of r2
    let (mut r1, r2) = ebgp_pair();
    add_route_map(
        &mut r1,
        RouteMap::new(
            "deny-r2",
            vec![
                RouteMapBuilder::new()
                    .order(10)
                    .deny()
                    .match_prefix(prefix!("2.2.2.2/32" as))
                    .build()
                    .unwrap(),
                RouteMapBuilder::new().order(20).allow().build().unwrap(),
            ],
        ),
    );
    neighbor_mut(&mut r1, ip!("10.0.0.2")).import_policy = Some("deny-r2".to_string());
    let dp = Network::new([r1, r2]).compute_data_plane().unwrap();
    assert!(dp
        .main_rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("2.2.2.2/32" as))
        .is_none());
    assert!(dp
        .main_rib("r2", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("1.1.1.1/32" as))
        .is_some());

    // r1 sends nothing to r2
    let (mut r1, r2) = ebgp_pair();
    add_route_map(&mut r1, RouteMap::new("deny-all", vec![]));
    neighbor_mut(&mut r1, ip!("10.0.0.2")).export_policy = Some("deny-all".to_string());
    let dp = Network::new([r1, r2]).compute_data_plane().unwrap();
    assert!(dp
        .main_rib("r2", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("1.1.1.1/32" as))
        .is_none());
    assert!(dp
        .main_rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("2.2.2.2/32" as))
        .is_some());
}

#[test]
fn undefined_policy() {
    let (mut r1, r2) = ebgp_pair();
    neighbor_mut(&mut r1, ip!("10.0.0.2")).import_policy = Some("missing".to_string());
    let result = Network::new([r1, r2]).compute_data_plane();
    assert_eq!(
        result.err(),
        Some(NetworkError::PolicyError(PolicyError::UndefinedPolicy(
            "missing".to_string()
        )))
    );
}

/// A single router `r1` in AS 65001 with two external peers. Peer `172.16.1.2` announces
/// `100.0.0.0/24` with a shorter AS path than peer `172.16.2.2`.
fn dual_homed(prefer_longer: bool) -> Network {
    let mut r1 = Configuration::new("r1")
        .with_interface("ext1", Interface::new(prefix!("172.16.1.1/30")))
        .with_interface("ext2", Interface::new(prefix!("172.16.2.1/30")));
    let mut bgp = BgpProcess::new(ip!("1.1.1.1"), 65001);
    bgp.neighbors.push(BgpNeighbor::new(ip!("172.16.1.2"), 65101));
    let mut second = BgpNeighbor::new(ip!("172.16.2.2"), 65102);
    if prefer_longer {
        second.import_policy = Some("prefer".to_string());
    }
    bgp.neighbors.push(second);
    r1.vrf_mut(DEFAULT_VRF).bgp = Some(bgp);
    add_route_map(
        &mut r1,
        RouteMap::new(
            "prefer",
            vec![RouteMapBuilder::new()
                .order(10)
                .allow()
                .set_local_pref(200)
                .build()
                .unwrap()],
        ),
    );

    let mut net = Network::new([r1]);
    net.add_external_announcement(ExternalAnnouncement::new(
        "r1",
        ip!("172.16.1.2"),
        prefix!("100.0.0.0/24"),
        vec![65101.into()],
    ));
    net.add_external_announcement(ExternalAnnouncement::new(
        "r1",
        ip!("172.16.2.2"),
        prefix!("100.0.0.0/24"),
        vec![65102.into(), 65200.into()],
    ));
    net
}

#[test]
fn local_preference() {
    let selected = |prefer_longer: bool| {
        let dp = dual_homed(prefer_longer).compute_data_plane().unwrap();
        dp.main_rib("r1", DEFAULT_VRF)
            .unwrap()
            .get(&prefix!("100.0.0.0/24" as))
            .unwrap()
            .iter()
            .map(|r| {
                (
                    r.received_from_ip(),
                    r.bgp_attributes().unwrap().local_preference(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(selected(false), vec![(ip!("172.16.1.2"), 100)]);
    assert_eq!(selected(true), vec![(ip!("172.16.2.2"), 200)]);
}

#[test]
fn external_announcements() {
    let mut net = dual_homed(false);
    // contains the local AS
    net.add_external_announcement(ExternalAnnouncement::new(
        "r1",
        ip!("172.16.1.2"),
        prefix!("200.0.0.0/24"),
        vec![65101.into(), 65001.into()],
    ));
    // not a configured neighbor
    net.add_external_announcement(ExternalAnnouncement::new(
        "r1",
        ip!("172.16.3.2"),
        prefix!("201.0.0.0/24"),
        vec![65103.into()],
    ));
    let dp = net.compute_data_plane().unwrap();
    let rib = dp.bgp_rib("r1", DEFAULT_VRF).unwrap();
    let networks: Vec<_> = rib.routes().map(|r| r.network()).collect();
    assert_eq!(networks, vec![prefix!("100.0.0.0/24" as)]);

    // only the best of both announcements is kept
    assert_eq!(rib.get(&prefix!("100.0.0.0/24" as)).map(|r| r.len()), Some(1));
    let route = dp
        .main_rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("100.0.0.0/24" as))
        .and_then(|r| r.iter().next().cloned())
        .unwrap();
    assert_eq!(route.protocol(), RoutingProtocol::Bgp);
    assert_eq!(route.admin(), RoutingProtocol::Bgp.default_admin_cost());
    assert_eq!(route.next_hop(), &NextHop::Ip(ip!("172.16.1.2")));
    assert_eq!(
        trace_paths(&dp, "r1", ip!("100.0.0.1")).unwrap(),
        vec!["ACCEPTED r1"]
    );
}

#[test]
fn redistribution() {
    let (mut r1, r2) = ebgp_pair();
    r1.vrf_mut(DEFAULT_VRF)
        .static_routes
        .push(StaticRoute::new(prefix!("10.10.0.0/16"), NextHop::Discard));
    add_route_map(
        &mut r1,
        RouteMap::new(
            "static-to-bgp",
            vec![RouteMapBuilder::new()
                .order(10)
                .allow()
                .match_protocol(RoutingProtocol::Static)
                .build()
                .unwrap()],
        ),
    );
    if let Some(bgp) = r1.vrf_mut(DEFAULT_VRF).bgp.as_mut() {
        bgp.redistribution_policy = Some("static-to-bgp".to_string());
    }
    let dp = Network::new([r1, r2]).compute_data_plane().unwrap();

    let route = dp
        .main_rib("r2", DEFAULT_VRF)
        .unwrap()
        .get(&prefix!("10.10.0.0/16" as))
        .and_then(|r| r.iter().next().cloned())
        .unwrap();
    assert_eq!(route.protocol(), RoutingProtocol::Bgp);
    assert_eq!(
        route.bgp_attributes().unwrap().origin_type(),
        OriginType::Incomplete
    );
    assert_eq!(
        trace_paths(&dp, "r2", ip!("10.10.1.1")).unwrap(),
        vec!["NULL_ROUTED r2 r1"]
    );
    // connected routes are not matched by the policy
    assert!(dp
        .main_rib("r2", DEFAULT_VRF)
        .unwrap()
        .routes()
        .filter(|r| r.protocol().is_bgp())
        .all(|r| r.network() != prefix!("10.0.0.0/30" as)));
}

#[test]
fn aggregate() {
    let (mut r1, r2) = ebgp_pair();
    if let Some(bgp) = r1.vrf_mut(DEFAULT_VRF).bgp.as_mut() {
        bgp.aggregates.insert(prefix!("2.0.0.0/8" as));
        // not activated, no more-specific route exists
        bgp.aggregates.insert(prefix!("3.0.0.0/8" as));
    }
    let dp = Network::new([r1, r2]).compute_data_plane().unwrap();

    let r1_rib = dp.main_rib("r1", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = r1_rib
        .get(&prefix!("2.0.0.0/8" as))
        .unwrap()
        .iter()
        .map(|r| (r.protocol(), r.next_hop().clone()))
        .collect();
    assert_eq!(routes, vec![(RoutingProtocol::Aggregate, NextHop::Discard)]);
    assert!(r1_rib.get(&prefix!("3.0.0.0/8" as)).is_none());

    let r2_rib = dp.main_rib("r2", DEFAULT_VRF).unwrap();
    let routes: Vec<_> = r2_rib
        .get(&prefix!("2.0.0.0/8" as))
        .unwrap()
        .iter()
        .map(|r| r.protocol())
        .collect();
    assert_eq!(routes, vec![RoutingProtocol::Bgp]);

    // the more specific route still takes precedence
    assert_eq!(
        trace_paths(&dp, "r1", ip!("2.2.2.2")).unwrap(),
        vec!["ACCEPTED r1 r2"]
    );
    assert_eq!(
        trace_paths(&dp, "r2", ip!("2.3.0.1")).unwrap(),
        vec!["NULL_ROUTED r2 r1"]
    );
}

/// Triangle of three ASes. `r2` originates `2.2.2.2/32`. `r1` learns it directly from `r2`, and
/// one round later via `r3`, whose routes it prefers with a local preference of 200.
fn triangle() -> Network {
    let router = |name: &str, asn: u32, links: [(&str, ipnet::Ipv4Net, Ip, u32); 2]| {
        let mut config = Configuration::new(name);
        let mut bgp = BgpProcess::new(links[0].1.addr(), asn);
        for (iface, addr, peer, peer_as) in links {
            config = config.with_interface(iface, Interface::new(addr));
            bgp.neighbors.push(BgpNeighbor::new(peer, peer_as));
        }
        config.vrf_mut(DEFAULT_VRF).bgp = Some(bgp);
        config
    };
    let mut r1 = router(
        "r1",
        65001,
        [
            ("eth0", prefix!("10.0.12.1/30"), ip!("10.0.12.2"), 65002),
            ("eth1", prefix!("10.0.13.1/30"), ip!("10.0.13.2"), 65003),
        ],
    );
    add_route_map(
        &mut r1,
        RouteMap::new(
            "prefer",
            vec![RouteMapBuilder::new()
                .order(10)
                .allow()
                .set_local_pref(200)
                .build()
                .unwrap()],
        ),
    );
    neighbor_mut(&mut r1, ip!("10.0.13.2")).import_policy = Some("prefer".to_string());
    let mut r2 = router(
        "r2",
        65002,
        [
            ("eth0", prefix!("10.0.12.2/30"), ip!("10.0.12.1"), 65001),
            ("eth1", prefix!("10.0.23.1/30"), ip!("10.0.23.2"), 65003),
        ],
    )
    .with_interface("lo", Interface::loopback(prefix!("2.2.2.2/32")));
    if let Some(bgp) = r2.vrf_mut(DEFAULT_VRF).bgp.as_mut() {
        bgp.networks.insert(prefix!("2.2.2.2/32" as));
    }
    let r3 = router(
        "r3",
        65003,
        [
            ("eth0", prefix!("10.0.13.2/30"), ip!("10.0.13.1"), 65001),
            ("eth1", prefix!("10.0.23.2/30"), ip!("10.0.23.1"), 65002),
        ],
    );
    Network::new([r1, r2, r3])
}

#[test]
fn better_route_replaces_installed_route() {
    let dp = triangle().compute_data_plane().unwrap();
    let next_hops = |rib: &crate::rib::Rib| {
        rib.get(&prefix!("2.2.2.2/32" as))
            .unwrap()
            .iter()
            .map(|r| r.next_hop().clone())
            .collect::<Vec<_>>()
    };
    let bgp = next_hops(dp.bgp_rib("r1", DEFAULT_VRF).unwrap());
    let main = next_hops(dp.main_rib("r1", DEFAULT_VRF).unwrap());
    assert_eq!(bgp, vec![NextHop::Ip(ip!("10.0.13.2"))]);
    assert_eq!(main, bgp);
    assert_eq!(
        trace_paths(&dp, "r1", ip!("2.2.2.2")).unwrap(),
        vec!["ACCEPTED r1 r3 r2"]
    );
}
