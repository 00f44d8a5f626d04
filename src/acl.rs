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

//! IP access lists applied to flows entering or leaving an interface.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{
    flow::{Flow, IpProtocol},
    types::Prefix,
};

/// Action of an access-list line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineAction {
    /// Permit the flow
    Accept,
    /// Drop the flow
    Reject,
}

/// Set of packet headers matched by a line. Unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderSpace {
    /// Source prefixes (any of them)
    #[serde(default)]
    pub src_ips: Vec<Prefix>,
    /// Destination prefixes (any of them)
    #[serde(default)]
    pub dst_ips: Vec<Prefix>,
    /// IP protocols (any of them)
    #[serde(default)]
    pub ip_protocols: Vec<IpProtocol>,
    /// Destination port ranges (any of them)
    #[serde(default)]
    pub dst_ports: Vec<RangeInclusive<u16>>,
    /// Source port ranges (any of them)
    #[serde(default)]
    pub src_ports: Vec<RangeInclusive<u16>>,
}

impl HeaderSpace {
    /// Check if the flow lies inside of the header space.
    pub fn matches(&self, flow: &Flow) -> bool {
        fn any<T>(xs: &[T], f: impl Fn(&T) -> bool) -> bool {
            xs.is_empty() || xs.iter().any(f)
        }
        any(&self.src_ips, |p| p.contains_ip(flow.src_ip))
            && any(&self.dst_ips, |p| p.contains_ip(flow.dst_ip))
            && any(&self.ip_protocols, |p| *p == flow.ip_protocol)
            && any(&self.dst_ports, |r| r.contains(&flow.dst_port))
            && any(&self.src_ports, |r| r.contains(&flow.src_port))
    }
}

/// A single line of an access list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAccessListLine {
    /// Optional name of the line, used in trace notes.
    #[serde(default)]
    pub name: Option<String>,
    /// Action if the line matches
    pub action: LineAction,
    /// Headers matched by the line
    #[serde(default)]
    pub headers: HeaderSpace,
}

impl IpAccessListLine {
    /// Line accepting all flows in `headers`.
    pub fn accept(headers: HeaderSpace) -> Self {
        Self {
            name: None,
            action: LineAction::Accept,
            headers,
        }
    }

    /// Line rejecting all flows in `headers`.
    pub fn reject(headers: HeaderSpace) -> Self {
        Self {
            name: None,
            action: LineAction::Reject,
            headers,
        }
    }
}

/// Result of filtering a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterResult {
    /// Resulting action
    pub action: LineAction,
    /// Index of the line that matched. `None` if no line matched (implicit deny).
    pub match_line: Option<usize>,
}

/// An ordered list of lines. The first matching line decides; flows matching no line are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAccessList {
    /// Name of the access list
    pub name: String,
    /// Lines in order
    pub lines: Vec<IpAccessListLine>,
}

impl IpAccessList {
    /// Create a new access list.
    pub fn new(name: impl Into<String>, lines: Vec<IpAccessListLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    /// Filter the flow.
    pub fn filter(&self, flow: &Flow) -> FilterResult {
        self.lines
            .iter()
            .position(|l| l.headers.matches(flow))
            .map(|i| FilterResult {
                action: self.lines[i].action,
                match_line: Some(i),
            })
            .unwrap_or(FilterResult {
                action: LineAction::Reject,
                match_line: None,
            })
    }

    /// Describe a matched line for trace notes: its name, `line:N`, or `no-match`.
    pub fn describe_line(&self, match_line: Option<usize>) -> String {
        match match_line {
            Some(i) => self
                .lines
                .get(i)
                .and_then(|l| l.name.clone())
                .unwrap_or_else(|| format!("line:{i}")),
            None => String::from("no-match"),
        }
    }
}
