// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! The IPv4 network an address pool hands out addresses from.

use std::{fmt, net::Ipv4Addr, ops::RangeInclusive, str::FromStr};

use ipnet::Ipv4Net;
use thiserror::Error;

/// Longest accepted prefix. A /31 has no room for a host besides the gateway and
/// on a /32 the network address is the broadcast address.
const MAX_PREFIX_LEN: u8 = 30;

/// Network definition errors.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetworkError {
    /// Not of the form `a.b.c.d/len`.
    #[error("invalid CIDR notation {0:?}")]
    InvalidCidr(String),
    /// Network address is not a dotted-quad IPv4 address.
    #[error("invalid network address {0:?}")]
    InvalidAddress(String),
    /// Neither a prefix length in 0..=32 nor a contiguous dotted netmask.
    #[error("invalid network mask {0:?}")]
    InvalidMask(String),
    /// The prefix leaves no address to lease.
    #[error("prefix length /{0} leaves no allocatable host addresses")]
    NoHostRange(u8),
}

/// An IPv4 network, fixed for the lifetime of a pool.
///
/// Only the base address and the prefix length are stored. Broadcast, gateway
/// and the host range are derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Network {
    net: Ipv4Net,
}

impl Network {
    /// Creates a network from an address and a prefix length. Host bits of
    /// `address` are cleared.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        let net = Ipv4Net::new(address, prefix_len)
            .map_err(|_| NetworkError::InvalidMask(prefix_len.to_string()))?;
        Self::from_ipv4_net(net)
    }

    /// Creates a network from an [Ipv4Net]. Host bits are cleared.
    pub fn from_ipv4_net(net: Ipv4Net) -> Result<Self, NetworkError> {
        if net.prefix_len() > MAX_PREFIX_LEN {
            return Err(NetworkError::NoHostRange(net.prefix_len()));
        }
        Ok(Self { net: net.trunc() })
    }

    /// Creates a network from a separate address and mask.
    ///
    /// ### Parameters
    /// - `address`: dotted-quad network address, e.g. `"192.168.0.0"`.
    /// - `mask`: either a prefix length (`"16"` or `"/16"`) or a dotted netmask
    ///   (`"255.255.0.0"`). Dotted netmasks must have contiguous one-bits.
    pub fn from_address_and_mask(address: &str, mask: &str) -> Result<Self, NetworkError> {
        let addr: Ipv4Addr = address
            .trim()
            .parse()
            .map_err(|_| NetworkError::InvalidAddress(address.to_string()))?;
        Self::new(addr, parse_mask(mask)?)
    }

    /// The base (network) address.
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// The dotted netmask.
    pub fn netmask(&self) -> Ipv4Addr {
        self.net.netmask()
    }

    /// The prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// The broadcast address: base address OR-ed with the inverted mask.
    pub fn broadcast(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    /// The gateway, the address right after the base address.
    pub fn gateway(&self) -> Ipv4Addr {
        // Cannot overflow, the prefix is at most MAX_PREFIX_LEN.
        Ipv4Addr::from_bits(self.network().to_bits() + 1)
    }

    /// Total number of addresses, base and broadcast included.
    pub fn address_count(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len()))
    }

    /// All addresses strictly between the base and the broadcast address.
    pub fn host_range(&self) -> RangeInclusive<Ipv4Addr> {
        let last = Ipv4Addr::from_bits(self.broadcast().to_bits() - 1);
        self.gateway()..=last
    }

    /// Returns true if `address` lies anywhere in the network, base and broadcast
    /// included.
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.net.contains(&address)
    }

    /// Returns true if `address` lies strictly between base and broadcast.
    pub fn is_host(&self, address: Ipv4Addr) -> bool {
        address > self.network() && address < self.broadcast()
    }

    /// Returns true for the base and the broadcast address.
    pub fn is_structural(&self, address: Ipv4Addr) -> bool {
        address == self.network() || address == self.broadcast()
    }

    /// The network as an [Ipv4Net].
    pub fn as_ipv4_net(&self) -> Ipv4Net {
        self.net
    }
}

impl FromStr for Network {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|_| NetworkError::InvalidCidr(s.to_string()))?;
        Self::from_ipv4_net(net)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

// Accepts "16", "/16" or "255.255.0.0".
fn parse_mask(mask: &str) -> Result<u8, NetworkError> {
    let invalid = || NetworkError::InvalidMask(mask.to_string());
    let trimmed = mask.trim();

    if trimmed.contains('.') {
        let bits = trimmed.parse::<Ipv4Addr>().map_err(|_| invalid())?.to_bits();
        let len = bits.leading_ones();
        // Anything left after the leading ones makes the mask non-contiguous.
        if bits.checked_shl(len).unwrap_or(0) != 0 {
            return Err(invalid());
        }
        return Ok(len as u8);
    }

    let len = trimmed.strip_prefix('/').unwrap_or(trimmed);
    len.parse::<u8>()
        .ok()
        .filter(|len| *len <= 32)
        .ok_or_else(invalid)
}
