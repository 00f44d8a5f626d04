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

//! # RibSim
//!
//! A multi-protocol RIB fixed-point simulator. Given the configuration of every device of a
//! network, RibSim computes the converged routing state (RIBs) and forwarding state (FIBs) of
//! every virtual router, and traces flows through the resulting data plane.
//!
//! ## Structure
//! - [`config`] contains the configuration model consumed by the computation, and [`route_map`]
//!   a routing policy that can be written in that configuration.
//! - [`route`] defines routes, their attributes and the [`route::RouteBuilder`]. BGP attribute
//!   bundles are interned, such that equal bundles share one allocation.
//! - [`rib`] implements the best-route selection of every protocol.
//! - [`router`] defines the virtual routers and all their phase operations, and [`network`] the
//!   fixed-point scheduler driving them.
//! - [`topology`] and [`bgp`] infer the layer-3 edges, the owners of addresses, and the BGP
//!   sessions.
//! - [`fib`], [`flow`] and [`dataplane`] project the converged RIBs into forwarding tables, and
//!   simulate flows.
//!
//! ## Example
//!
//! ```
//! use ribsim::prelude::*;
//! use ribsim_macros::{ip, prefix};
//!
//! let r1 = Configuration::new("r1")
//!     .with_interface("lo", Interface::loopback(prefix!("1.1.1.1/32")))
//!     .with_interface("eth0", Interface::new(prefix!("10.0.0.1/30")));
//! let mut r2 = Configuration::new("r2")
//!     .with_interface("eth0", Interface::new(prefix!("10.0.0.2/30")));
//! r2.vrf_mut(DEFAULT_VRF)
//!     .static_routes
//!     .push(StaticRoute::new(prefix!("1.1.1.1/32"), NextHop::Ip(ip!("10.0.0.1"))));
//!
//! let dp = Network::new([r1, r2]).compute_data_plane()?;
//! let traces = dp.trace(&Flow::new("r2", ip!("10.0.0.2"), ip!("1.1.1.1")))?;
//! assert!(traces.iter().all(|t| t.disposition == FlowDisposition::Accepted));
//! # Ok::<(), NetworkError>(())
//! ```

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::result_large_err)]

pub mod acl;
pub mod bgp;
pub mod config;
pub mod dataplane;
pub mod fib;
pub mod flow;
pub mod network;
pub mod ospf;
pub mod policy;
pub mod prelude;
pub mod rib;
pub mod route;
pub mod route_map;
pub mod router;
#[cfg(test)]
mod test;
pub mod topology;
pub mod types;
