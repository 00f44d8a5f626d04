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

//! Procedural macros for writing IPv4 literals that are checked at compile time.

use proc_macro::TokenStream;

mod ip;
use ip::{AddrInput, PrefixInput};
use syn::parse_macro_input;

/// Build an [`ipnet::Ipv4Net`] from a string literal, checked while compiling. A trailing `as`
/// converts the result: `as T` calls `T::from`, and a bare `as` calls `.into()`.
///
/// ```
/// # use ribsim_macros::*;
/// use ribsim::types::Prefix;
///
/// let net = prefix!("192.168.0.0/24");
/// assert_eq!(net.prefix_len(), 24);
/// let a = prefix!("192.168.0.0/24" as Prefix);
/// let b: Prefix = prefix!("192.168.0.0/24" as);
/// assert_eq!(a, b);
/// ```
#[proc_macro]
pub fn prefix(input: TokenStream) -> TokenStream {
    parse_macro_input!(input as PrefixInput).quote()
}

/// Create an [`std::net::Ipv4Addr`] from a string literal. The address is parsed while compiling,
/// so a malformed address is a compile error instead of a runtime panic.
///
/// ```
/// # use ribsim_macros::*;
/// let ip = ip!("10.0.0.1");
/// assert_eq!(ip, std::net::Ipv4Addr::new(10, 0, 0, 1));
/// ```
#[proc_macro]
pub fn ip(input: TokenStream) -> TokenStream {
    parse_macro_input!(input as AddrInput).quote()
}
