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

//! Module containing the [`Network`], the input of the data-plane computation, and the fixed-point
//! scheduler that computes the converged [`DataPlane`].
//!
//! The scheduler runs the phases of every virtual router in lock step. Within a step, all virtual
//! routers run concurrently (using `rayon`), but a `propagate` step only reads state committed by
//! the previous `unstage` step. Every loop is capped; exceeding a cap aborts the computation with
//! [`NetworkError::NoConvergence`].

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::{As, Same};

use crate::{
    bgp::BgpTopology,
    config::{Configuration, ExternalAnnouncement},
    dataplane::DataPlane,
    router::{Node, VirtualRouter},
    topology::{compute_flow_sinks, IpOwners, Topology},
    types::{ConvergencePhase, NetworkError},
};

/// Parameters of the data-plane computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPlaneSettings {
    /// Maximum number of iterations of the outer (dependent routes) loop.
    pub max_outer_iterations: usize,
    /// Maximum number of iterations of every inner loop.
    pub max_inner_iterations: usize,
    /// Run the virtual routers of a step concurrently.
    pub parallel: bool,
    /// Size of the thread pool. `None` uses the global `rayon` pool.
    pub threads: Option<usize>,
}

impl Default for DataPlaneSettings {
    fn default() -> Self {
        Self {
            max_outer_iterations: 100,
            max_inner_iterations: 10_000,
            parallel: true,
            threads: None,
        }
    }
}

impl DataPlaneSettings {
    /// Set the maximum number of outer iterations.
    pub fn max_outer_iterations(mut self, n: usize) -> Self {
        self.max_outer_iterations = n;
        self
    }

    /// Set the maximum number of iterations of the inner loops.
    pub fn max_inner_iterations(mut self, n: usize) -> Self {
        self.max_inner_iterations = n;
        self
    }

    /// Enable or disable concurrent execution.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Use a dedicated thread pool of the given size.
    pub fn threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }
}

/// Diagnostics collected while computing the data plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceStats {
    /// Iterations of the OSPF internal loop
    pub ospf_internal_iterations: usize,
    /// Iterations of the outer loop
    pub dependent_routes_iterations: usize,
    /// Iterations of the BGP loop, for each outer iteration
    #[serde(with = "As::<Vec<(Same, Same)>>")]
    pub bgp_iterations: BTreeMap<usize, usize>,
    /// Number of routes in all main RIBs after convergence
    pub total_routes: usize,
}

/// Serialized form of a network snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    configurations: Vec<Configuration>,
    #[serde(default)]
    external_announcements: Vec<ExternalAnnouncement>,
}

/// The input of the data-plane computation: the configuration of every device, and the BGP
/// announcements injected by external peers.
#[derive(Debug, Clone, Default)]
pub struct Network {
    configurations: BTreeMap<String, Arc<Configuration>>,
    external_announcements: Vec<ExternalAnnouncement>,
    settings: DataPlaneSettings,
}

impl Network {
    /// Create a network from a set of device configurations.
    pub fn new(configurations: impl IntoIterator<Item = Configuration>) -> Self {
        Self {
            configurations: configurations
                .into_iter()
                .map(|c| (c.hostname.clone(), Arc::new(c)))
                .collect(),
            ..Default::default()
        }
    }

    /// Add (or replace) the configuration of a device.
    pub fn add_configuration(&mut self, config: Configuration) {
        self.configurations
            .insert(config.hostname.clone(), Arc::new(config));
    }

    /// Inject a BGP announcement from an external peer.
    pub fn add_external_announcement(&mut self, announcement: ExternalAnnouncement) {
        self.external_announcements.push(announcement);
    }

    /// Replace the settings of the computation.
    pub fn with_settings(mut self, settings: DataPlaneSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Settings of the computation.
    pub fn settings(&self) -> &DataPlaneSettings {
        &self.settings
    }

    /// All device configurations, by hostname.
    pub fn configurations(&self) -> &BTreeMap<String, Arc<Configuration>> {
        &self.configurations
    }

    /// Get the configuration of a device.
    pub fn configuration(&self, hostname: &str) -> Result<&Configuration, NetworkError> {
        self.configurations
            .get(hostname)
            .map(|c| c.as_ref())
            .ok_or_else(|| NetworkError::NodeNotFound(hostname.to_string()))
    }

    /// All external announcements.
    pub fn external_announcements(&self) -> &[ExternalAnnouncement] {
        &self.external_announcements
    }

    /// Parse a snapshot from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, NetworkError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Read a JSON snapshot from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Serialize the network into a JSON snapshot.
    pub fn to_json(&self) -> Result<String, NetworkError> {
        let snapshot = Snapshot {
            configurations: self
                .configurations
                .values()
                .map(|c| c.as_ref().clone())
                .collect(),
            external_announcements: self.external_announcements.clone(),
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut net = Self::new(snapshot.configurations);
        net.external_announcements = snapshot.external_announcements;
        net
    }

    /// Compute the converged data plane. If a thread count is configured, the computation runs on
    /// a dedicated thread pool of that size.
    pub fn compute_data_plane(&self) -> Result<DataPlane, NetworkError> {
        match self.settings.threads {
            Some(threads) if self.parallel() => {
                match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                    Ok(pool) => pool.install(|| self.run()),
                    Err(e) => {
                        warn!("Cannot create a thread pool ({e}). Using the global pool.");
                        self.run()
                    }
                }
            }
            _ => self.run(),
        }
    }

    fn parallel(&self) -> bool {
        self.settings.parallel && !cfg!(feature = "sequential")
    }

    fn run(&self) -> Result<DataPlane, NetworkError> {
        let configs = || self.configurations.values().map(|c| c.as_ref());
        let topology = Topology::from_configurations(configs());
        let ip_owners = IpOwners::from_configurations(configs());
        let bgp_topology = BgpTopology::new(&self.configurations, &ip_owners);
        let flow_sinks = compute_flow_sinks(configs(), &topology);
        info!(
            "Computing the data plane of {} nodes ({} edges, {} BGP sessions)",
            self.configurations.len(),
            topology.len(),
            bgp_topology.num_sessions()
        );

        let mut nodes: BTreeMap<String, Node> = self
            .configurations
            .iter()
            .map(|(name, c)| (name.clone(), Node::new(c.clone())))
            .collect();
        let parallel = self.parallel();
        let max_inner = self.settings.max_inner_iterations;
        let announcements = self.external_announcements.as_slice();
        let mut stats = ConvergenceStats::default();

        for_each_router_mut(&mut nodes, parallel, |vr| {
            vr.init_connected()?;
            vr.init_static()?;
            vr.init_ospf_interface_costs();
            vr.init_base_ospf_routes()?;
            vr.init_base_bgp_ribs(announcements)?;
            Ok(false)
        })?;

        stats.ospf_internal_iterations =
            fixed_point(ConvergencePhase::OspfInternal, max_inner, || {
                let propagated = for_each_router(&nodes, parallel, |vr| {
                    vr.propagate_ospf_internal(&nodes, &topology)
                })?;
                let committed =
                    for_each_router_mut(&mut nodes, parallel, |vr| Ok(vr.unstage_ospf_internal()))?;
                Ok(propagated || committed)
            })?;
        for_each_router_mut(&mut nodes, parallel, |vr| {
            vr.import_ospf_internal();
            Ok(false)
        })?;
        info!(
            "OSPF internal routes converged after {} iterations",
            stats.ospf_internal_iterations
        );

        let mut outer = 0;
        loop {
            outer += 1;
            if outer > self.settings.max_outer_iterations {
                return Err(NetworkError::NoConvergence {
                    phase: ConvergencePhase::DependentRoutes,
                    iterations: outer - 1,
                });
            }

            for_each_router_mut(&mut nodes, parallel, |vr| {
                vr.reset_dependent_ribs();
                Ok(false)
            })?;
            fixed_point(ConvergencePhase::StaticRoutes, max_inner, || {
                for_each_router_mut(&mut nodes, parallel, |vr| vr.activate_static_routes())
            })?;
            fixed_point(ConvergencePhase::GeneratedRoutes, max_inner, || {
                for_each_router_mut(&mut nodes, parallel, |vr| vr.activate_generated_routes())
            })?;

            for_each_router_mut(&mut nodes, parallel, |vr| {
                vr.init_ospf_exports()?;
                Ok(false)
            })?;
            let ospf_iterations = fixed_point(ConvergencePhase::OspfExternal, max_inner, || {
                let propagated = for_each_router(&nodes, parallel, |vr| {
                    vr.propagate_ospf_external(&nodes, &topology)
                })?;
                let committed =
                    for_each_router_mut(&mut nodes, parallel, |vr| Ok(vr.unstage_ospf_external()))?;
                Ok(propagated || committed)
            })?;
            for_each_router_mut(&mut nodes, parallel, |vr| {
                vr.import_ospf_external();
                vr.init_bgp_aggregate_routes()?;
                Ok(false)
            })?;

            let bgp_iterations = fixed_point(ConvergencePhase::Bgp, max_inner, || {
                let propagated = for_each_router(&nodes, parallel, |vr| {
                    vr.propagate_bgp(&nodes, &bgp_topology)
                })?;
                let committed =
                    for_each_router_mut(&mut nodes, parallel, |vr| Ok(vr.unstage_bgp()))?;
                Ok(propagated || committed)
            })?;
            stats.bgp_iterations.insert(outer, bgp_iterations);

            let changed = for_each_router(&nodes, parallel, |vr| Ok(vr.dependent_ribs_changed()))?;
            debug!(
                "Outer iteration {outer}: {ospf_iterations} OSPF external iterations, \
                 {bgp_iterations} BGP iterations, changed: {changed}"
            );
            if !changed {
                break;
            }
        }
        stats.dependent_routes_iterations = outer;

        for_each_router_mut(&mut nodes, parallel, |vr| {
            vr.compute_fib(&ip_owners);
            Ok(false)
        })?;
        stats.total_routes = nodes
            .values()
            .flat_map(|n| n.virtual_routers.values())
            .map(|vr| vr.main_rib.len())
            .sum();
        info!(
            "Data plane converged after {} outer iterations with {} routes",
            stats.dependent_routes_iterations, stats.total_routes
        );

        Ok(DataPlane::new(
            nodes,
            topology,
            ip_owners,
            bgp_topology,
            flow_sinks,
            stats,
        ))
    }
}

/// Repeat `step` until it reports no change. Returns the number of iterations, including the last
/// one that did not change anything.
fn fixed_point<F>(phase: ConvergencePhase, max: usize, mut step: F) -> Result<usize, NetworkError>
where
    F: FnMut() -> Result<bool, NetworkError>,
{
    let mut iterations = 0;
    loop {
        if iterations >= max {
            return Err(NetworkError::NoConvergence {
                phase,
                iterations,
            });
        }
        iterations += 1;
        if !step()? {
            return Ok(iterations);
        }
    }
}

/// Run `f` on every virtual router, and return `true` if any of them returned `true`. The first
/// error aborts the step.
fn for_each_router<F>(
    nodes: &BTreeMap<String, Node>,
    parallel: bool,
    f: F,
) -> Result<bool, NetworkError>
where
    F: Fn(&VirtualRouter) -> Result<bool, NetworkError> + Sync + Send,
{
    let routers: Vec<&VirtualRouter> = nodes
        .values()
        .flat_map(|n| n.virtual_routers.values())
        .collect();
    let changed = AtomicBool::new(false);
    let step = |vr: &VirtualRouter| -> Result<(), NetworkError> {
        if f(vr)? {
            changed.fetch_or(true, Ordering::Relaxed);
        }
        Ok(())
    };
    if parallel {
        routers.into_par_iter().try_for_each(step)?;
    } else {
        routers.into_iter().try_for_each(step)?;
    }
    Ok(changed.into_inner())
}

/// Run `f` on every virtual router with exclusive access, and return `true` if any of them
/// returned `true`. The first error aborts the step.
fn for_each_router_mut<F>(
    nodes: &mut BTreeMap<String, Node>,
    parallel: bool,
    f: F,
) -> Result<bool, NetworkError>
where
    F: Fn(&mut VirtualRouter) -> Result<bool, NetworkError> + Sync + Send,
{
    let routers: Vec<&mut VirtualRouter> = nodes
        .values_mut()
        .flat_map(|n| n.virtual_routers.values_mut())
        .collect();
    let changed = AtomicBool::new(false);
    let step = |vr: &mut VirtualRouter| -> Result<(), NetworkError> {
        if f(vr)? {
            changed.fetch_or(true, Ordering::Relaxed);
        }
        Ok(())
    };
    if parallel {
        routers.into_par_iter().try_for_each(step)?;
    } else {
        routers.into_iter().try_for_each(step)?;
    }
    Ok(changed.into_inner())
}
