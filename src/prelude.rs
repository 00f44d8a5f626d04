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

//! Re-exports of the types needed to build a network and query its data plane.

pub use crate::{
    acl::{HeaderSpace, IpAccessList, IpAccessListLine, LineAction},
    config::{
        BgpNeighbor, BgpProcess, Configuration, ExternalAnnouncement, GeneratedRoute, Interface,
        OspfProcess, StaticRoute,
    },
    dataplane::{DataPlane, RouteRow},
    flow::{Flow, FlowDisposition, FlowTrace, IpProtocol},
    network::{ConvergenceStats, DataPlaneSettings, Network},
    policy::{PolicyDirection, RoutingPolicy},
    rib::{Rib, RibKind},
    route::{NextHop, Route, RouteBuilder, RoutingProtocol},
    route_map::{RouteMap, RouteMapBuilder},
    types::{AsId, NetworkError, Prefix, DEFAULT_VRF},
};
