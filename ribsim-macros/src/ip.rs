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

use std::net::Ipv4Addr;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    Error, LitStr, Result, Token, Type,
};

/// Conversion requested with a trailing `as` (optionally followed by the target type).
pub(crate) enum Conversion {
    None,
    Into,
    From(Type),
}

impl Parse for Conversion {
    fn parse(input: ParseStream) -> Result<Self> {
        if input.parse::<Token![as]>().is_err() {
            return Ok(Self::None);
        }
        if input.is_empty() {
            Ok(Self::Into)
        } else {
            Ok(Self::From(input.parse()?))
        }
    }
}

impl Conversion {
    fn apply(&self, value: TokenStream2) -> TokenStream {
        match self {
            Self::None => value,
            Self::Into => quote! { #value.into() },
            Self::From(ty) => quote! { #ty::from(#value) },
        }
        .into()
    }
}

fn parse_addr(lit: &LitStr, addr: &str) -> Result<Ipv4Addr> {
    addr.trim()
        .parse()
        .map_err(|_| Error::new(lit.span(), format!("`{addr}` is not a valid IPv4 address")))
}

fn quote_addr(addr: Ipv4Addr) -> TokenStream2 {
    let [a, b, c, d] = addr.octets();
    quote! { ::std::net::Ipv4Addr::new(#a, #b, #c, #d) }
}

/// Input of `prefix!`: `"a.b.c.d/len" [as [Type]]`
pub(crate) struct PrefixInput {
    addr: Ipv4Addr,
    len: u8,
    conversion: Conversion,
}

impl Parse for PrefixInput {
    fn parse(input: ParseStream) -> Result<Self> {
        let lit: LitStr = input.parse()?;
        let value = lit.value();
        let Some((addr, len)) = value.split_once('/') else {
            return Err(Error::new(
                lit.span(),
                "a prefix needs a length, e.g., `10.0.0.0/8`",
            ));
        };
        let addr = parse_addr(&lit, addr)?;
        let len = match len.trim().parse::<u8>() {
            Ok(len) if len <= 32 => len,
            _ => {
                return Err(Error::new(
                    lit.span(),
                    format!("`{len}` is not a prefix length between 0 and 32"),
                ))
            }
        };
        Ok(Self {
            addr,
            len,
            conversion: input.parse()?,
        })
    }
}

impl PrefixInput {
    pub fn quote(&self) -> TokenStream {
        let addr = quote_addr(self.addr);
        let len = self.len;
        // the length is checked above, so the constructor cannot fail
        self.conversion
            .apply(quote! { ::ipnet::Ipv4Net::new(#addr, #len).unwrap() })
    }
}

/// Input of `ip!`: `"a.b.c.d" [as [Type]]`
pub(crate) struct AddrInput {
    addr: Ipv4Addr,
    conversion: Conversion,
}

impl Parse for AddrInput {
    fn parse(input: ParseStream) -> Result<Self> {
        let lit: LitStr = input.parse()?;
        let value = lit.value();
        if value.contains('/') {
            return Err(Error::new(
                lit.span(),
                "an address has no length, use `prefix!` instead",
            ));
        }
        Ok(Self {
            addr: parse_addr(&lit, &value)?,
            conversion: input.parse()?,
        })
    }
}

impl AddrInput {
    pub fn quote(&self) -> TokenStream {
        self.conversion.apply(quote_addr(self.addr))
    }
}
