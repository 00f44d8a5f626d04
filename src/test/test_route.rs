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

//! Test the construction of routes.

use std::{collections::HashSet, sync::Arc};

use maplit::btreeset;
use pretty_assertions::assert_eq;
use ribsim_macros::{ip, prefix};

use crate::{
    ospf::OspfArea,
    route::{
        interned_bgp_attributes, AsPath, BgpAttributes, Community, InternCache, NextHop,
        OriginType, RouteBuilder, RoutingProtocol, DEFAULT_LOCAL_PREFERENCE,
    },
    types::{AsId, RouteError},
};

fn bgp_builder() -> RouteBuilder {
    let mut b = RouteBuilder::bgp();
    b.network(prefix!("10.0.0.0/8"))
        .protocol(RoutingProtocol::Bgp)
        .next_hop(NextHop::Ip(ip!("192.168.0.1")))
        .as_path(AsPath::from_sequence([65001, 65002]))
        .communities(btreeset! {Community::new(65001, 10)})
        .origin_type(OriginType::Egp)
        .originator_ip(ip!("2.2.2.2"))
        .received_from_ip(ip!("192.168.0.1"));
    b
}

#[test]
fn builder_round_trip() {
    let plain = RouteBuilder::new()
        .network(prefix!("10.0.0.0/24"))
        .protocol(RoutingProtocol::Static)
        .tag(Some(7))
        .next_hop(NextHop::Discard)
        .build()
        .unwrap();
    assert_eq!(plain.to_builder().build().unwrap(), plain);
    assert_eq!(plain.admin(), 1);

    let ospf = RouteBuilder::ospf(1, "r3")
        .network(prefix!("10.0.1.0/24"))
        .protocol(RoutingProtocol::OspfE2)
        .metric(20)
        .cost_to_advertiser(30)
        .next_hop(NextHop::Interface {
            interface: "eth0".to_string(),
            ip: Some(ip!("10.0.0.2")),
        })
        .build()
        .unwrap();
    assert_eq!(ospf.to_builder().build().unwrap(), ospf);
    let data = ospf.ospf().unwrap();
    assert_eq!(data.area, OspfArea::from(1));
    assert_eq!(data.cost_to_advertiser, 30);
    assert_eq!(data.advertiser, "r3");

    let bgp = bgp_builder().build().unwrap();
    assert_eq!(bgp.to_builder().build().unwrap(), bgp);
    assert_eq!(bgp.admin(), 20);
    assert_eq!(
        bgp.bgp_attributes().unwrap().local_preference(),
        DEFAULT_LOCAL_PREFERENCE
    );
}

#[test]
fn builder_modifies_copy() {
    let bgp = bgp_builder().build().unwrap();
    let mut b = bgp.to_builder();
    b.prepend_as(65000).add_community(Community::new(1, 1));
    let changed = b.build().unwrap();

    let attrs = bgp.bgp_attributes().unwrap();
    let changed_attrs = changed.bgp_attributes().unwrap();
    assert_eq!(attrs.as_path().len(), 2);
    assert_eq!(changed_attrs.as_path().len(), 3);
    assert_eq!(changed_attrs.as_path().first(), Some(AsId(65000)));
    assert_eq!(changed_attrs.communities().len(), 2);
    assert!(!Arc::ptr_eq(attrs, changed_attrs));
}

#[test]
fn interned_attributes() {
    let a = bgp_builder().build().unwrap();
    let b = bgp_builder().build().unwrap();
    assert!(Arc::ptr_eq(
        a.bgp_attributes().unwrap(),
        b.bgp_attributes().unwrap()
    ));

    // a modification that is undone yields the same bundle again
    let mut builder = a.to_builder();
    builder.local_preference(200).local_preference(DEFAULT_LOCAL_PREFERENCE);
    let c = builder.build().unwrap();
    assert!(Arc::ptr_eq(
        a.bgp_attributes().unwrap(),
        c.bgp_attributes().unwrap()
    ));
}

#[test]
fn invalid_protocol() {
    let result = RouteBuilder::new()
        .network(prefix!("10.0.0.0/8"))
        .protocol(RoutingProtocol::Bgp)
        .next_hop(NextHop::Discard)
        .build();
    assert!(matches!(
        result,
        Err(RouteError::InvalidRouteConstruction {
            protocol: RoutingProtocol::Bgp,
            ..
        })
    ));

    let result = RouteBuilder::ospf(0, "r1")
        .network(prefix!("10.0.0.0/8"))
        .protocol(RoutingProtocol::Static)
        .next_hop(NextHop::Discard)
        .build();
    assert!(matches!(
        result,
        Err(RouteError::InvalidRouteConstruction {
            protocol: RoutingProtocol::Static,
            ..
        })
    ));

    // BGP aggregates are valid BGP routes
    let mut b = bgp_builder();
    b.protocol(RoutingProtocol::Aggregate);
    assert!(b.build().is_ok());
}

#[test]
fn missing_fields() {
    assert_eq!(
        RouteBuilder::new()
            .protocol(RoutingProtocol::Static)
            .next_hop(NextHop::Discard)
            .build(),
        Err(RouteError::MissingNetwork)
    );
    assert_eq!(
        RouteBuilder::new()
            .network(prefix!("10.0.0.0/8"))
            .protocol(RoutingProtocol::Static)
            .build(),
        Err(RouteError::MissingNextHop)
    );
    assert_eq!(
        RouteBuilder::new()
            .network(prefix!("10.0.0.0/8"))
            .next_hop(NextHop::Discard)
            .build(),
        Err(RouteError::MissingProtocol)
    );
}

#[test]
fn bgp_setters_ignored_on_plain_routes() {
    let route = RouteBuilder::new()
        .network(prefix!("10.0.0.0/8"))
        .protocol(RoutingProtocol::Static)
        .next_hop(NextHop::Discard)
        .local_preference(300)
        .build()
        .unwrap();
    assert!(route.bgp_attributes().is_none());
}

#[test]
fn deserialized_attributes_hash_like_the_original() {
    let route = bgp_builder().build().unwrap();
    let attrs = route.bgp_attributes().unwrap();
    let json = serde_json::to_string(attrs.as_ref()).unwrap();
    let restored: BgpAttributes = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, attrs.as_ref());

    let set: HashSet<BgpAttributes> = HashSet::from([attrs.as_ref().clone()]);
    assert!(set.contains(&restored));
    assert!(Arc::ptr_eq(&interned_bgp_attributes(restored), attrs));
}

#[test]
fn intern_cache_eviction() {
    let cache = InternCache::new(4);
    let live: Vec<Arc<u32>> = (0..2).map(|i| cache.intern(i)).collect();
    cache.intern(2);
    cache.intern(3);
    assert_eq!(cache.len(), 4);

    // the cache is full: the unreferenced entries 2 and 3 are evicted
    let ten = cache.intern(10);
    assert_eq!(cache.len(), 3);
    assert!(Arc::ptr_eq(&live[0], &cache.intern(0)));
    assert!(Arc::ptr_eq(&ten, &cache.intern(10)));

    // an evicted value is interned again
    let two = cache.intern(2);
    assert!(Arc::ptr_eq(&two, &cache.intern(2)));
    assert_eq!(cache.len(), 4);

    // all entries are alive: new values are not cached, and the bound holds
    let twenty = cache.intern(20);
    assert!(!Arc::ptr_eq(&twenty, &cache.intern(20)));
    for i in 30..40 {
        cache.intern(i);
        assert!(cache.len() <= 4);
    }
    assert!(Arc::ptr_eq(&two, &cache.intern(2)));
}
