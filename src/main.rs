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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use ribsim::{
    flow::{Flow, IpProtocol},
    network::{DataPlaneSettings, Network},
    types::{Ip, DEFAULT_VRF},
};

/// Compute the converged data plane of a network snapshot.
#[derive(Debug, Parser)]
#[command(name = "ribsim", version)]
struct Cli {
    /// JSON snapshot with the configurations and external announcements.
    snapshot: PathBuf,
    /// Increase the log level (can be repeated).
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Maximum number of outer iterations before giving up.
    #[clap(long = "max-iterations", default_value_t = 100)]
    max_iterations: usize,
    /// Number of worker threads.
    #[clap(long, default_value_t = num_cpus::get())]
    threads: usize,
    /// What to print.
    #[command(subcommand)]
    command: Command,
}

/// Queries on the converged data plane.
#[derive(Debug, Subcommand)]
enum Command {
    /// Print the route table of all main RIBs.
    Routes,
    /// Print the forwarding tables.
    Fib,
    /// Trace a flow through the network.
    Trace {
        /// Ingress node
        #[clap(long)]
        node: String,
        /// Ingress VRF
        #[clap(long, default_value = DEFAULT_VRF)]
        vrf: String,
        /// Destination address
        #[clap(long)]
        dst: Ip,
        /// Source address
        #[clap(long, default_value = "0.0.0.0")]
        src: Ip,
        /// IP protocol (name or number)
        #[clap(long, default_value = "tcp")]
        protocol: IpProtocol,
        /// Destination port
        #[clap(long = "dst-port", default_value_t = 80)]
        dst_port: u16,
    },
    /// Print the convergence statistics.
    Stats,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    pretty_env_logger::formatted_timed_builder()
        .filter_level(level)
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
        .init();

    let settings = DataPlaneSettings::default()
        .max_outer_iterations(args.max_iterations)
        .threads(Some(args.threads));
    let net = Network::from_file(&args.snapshot)?.with_settings(settings);
    let dp = net.compute_data_plane()?;

    match args.command {
        Command::Routes => {
            println!(
                "node\tvrf\tnetwork\tnext_hop_node\tnext_hop_ip\tnext_hop_interface\tadmin\tmetric\tprotocol\ttag"
            );
            for row in dp.routes() {
                println!("{row}");
            }
        }
        Command::Fib => {
            for vr in dp.virtual_routers() {
                println!("{} [{}]", vr.hostname(), vr.vrf());
                for (prefix, entries) in vr.fib().iter() {
                    for entry in entries {
                        let next_hop = entry
                            .next_hop_ip
                            .map(|ip| ip.to_string())
                            .unwrap_or_else(|| String::from("-"));
                        let node = entry.next_hop_node.as_deref().unwrap_or("-");
                        println!("  {prefix} -> {} via {next_hop} ({node})", entry.interface);
                    }
                }
            }
        }
        Command::Trace {
            node,
            vrf,
            dst,
            src,
            protocol,
            dst_port,
        } => {
            let mut flow = Flow::new(node, src, dst);
            flow.ingress_vrf = vrf;
            flow.ip_protocol = protocol;
            flow.dst_port = dst_port;
            println!("{flow}");
            for trace in dp.trace(&flow)? {
                println!("{trace}");
            }
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(dp.stats())?);
        }
    }

    Ok(())
}
