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

//! This module contains the OSPF definitions: areas, external metric types, and the rules for
//! interface costs. The propagation of OSPF routes is part of the [`crate::router`].

use serde::{Deserialize, Serialize};

use crate::route::RoutingProtocol;

/// Reference bandwidth (in bits per second) used to derive interface costs.
pub const DEFAULT_REFERENCE_BANDWIDTH: f64 = 100e6;
/// Metric of routes exported into OSPF, if not changed by the export policy.
pub const DEFAULT_OSPF_EXPORT_METRIC: u32 = 20;

/// Identifier of an OSPF area. Area `0.0.0.0` is the backbone, to which every area border router
/// is attached. Areas are written in dotted-quad notation, but (de)serialized as plain numbers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OspfArea(pub(crate) u32);

impl OspfArea {
    /// The backbone area
    pub const BACKBONE: OspfArea = OspfArea(0);

    /// Returns `true` for the backbone area.
    pub const fn is_backbone(&self) -> bool {
        self.0 == Self::BACKBONE.0
    }

    /// Area identifier as a number
    pub const fn num(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for OspfArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&std::net::Ipv4Addr::from(self.0), f)
    }
}

impl std::fmt::Debug for OspfArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "area {self}")
    }
}

impl From<u32> for OspfArea {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// integer literals without a suffix default to `i32`
impl From<i32> for OspfArea {
    fn from(id: i32) -> Self {
        Self(id as u32)
    }
}

/// Metric type of OSPF external routes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum OspfMetricType {
    /// Type 1: the metric is added up along the path.
    E1,
    /// Type 2: the metric stays constant, ties are broken by the cost to the advertiser.
    #[default]
    E2,
}

impl OspfMetricType {
    /// The routing protocol of routes with this metric type.
    pub fn protocol(&self) -> RoutingProtocol {
        match self {
            Self::E1 => RoutingProtocol::OspfE1,
            Self::E2 => RoutingProtocol::OspfE2,
        }
    }
}

/// Compute the cost of an interface. An explicitly configured cost takes precedence. Otherwise,
/// the cost is the reference bandwidth divided by the interface bandwidth, but at least 1.
pub fn interface_cost(configured: Option<u32>, reference_bandwidth: f64, bandwidth: f64) -> u32 {
    if let Some(cost) = configured {
        return cost.max(1);
    }
    if bandwidth <= 0.0 {
        return u16::MAX as u32;
    }
    let cost = (reference_bandwidth / bandwidth).floor();
    if cost < 1.0 {
        1
    } else if cost > u16::MAX as f64 {
        u16::MAX as u32
    } else {
        cost as u32
    }
}

/// Rank of the OSPF protocols used in the combined OSPF RIB: intra-area routes beat inter-area
/// routes, which beat external type 1, which beat external type 2.
pub(crate) fn protocol_rank(protocol: RoutingProtocol) -> u8 {
    match protocol {
        RoutingProtocol::OspfIntra => 0,
        RoutingProtocol::OspfInter => 1,
        RoutingProtocol::OspfE1 => 2,
        RoutingProtocol::OspfE2 => 3,
        _ => u8::MAX,
    }
}
