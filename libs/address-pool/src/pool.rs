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
//! An IPv4 address pool.

use std::{
    net::Ipv4Addr,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use thiserror::Error;

use crate::{
    locker::{AddressLock, AddressLockGuard, PoolLock},
    network::{Network, NetworkError},
    pool::state::{PoolState, StateError},
};

pub mod dto;
mod state;

/// A pool of the host addresses of one IPv4 network.
///
/// Addresses are handed out in ascending order. The gateway (base address + 1)
/// is claimed silently by the first lease and never handed out. Released
/// addresses are reused before the pool grows its high-water mark.
///
/// All methods take `&self`, share the pool between threads with an
/// [std::sync::Arc].
// Impl Note:
// Used and free set are always updated together under one write guard.
// The strategy lock in `lock` is taken first and released last.
#[derive(Debug)]
pub struct AddressPool {
    network: Network,
    state: RwLock<PoolState>,
    lock: Box<dyn AddressLock>,
}

/// Address pool errors.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    /// The network definition is not valid.
    #[error("invalid network: {0}")]
    InvalidNetwork(#[from] NetworkError),
    /// Not a dotted-quad IPv4 address.
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),
    /// Every host address up to the broadcast address is used.
    #[error("no free address")]
    NoFreeAddress,
    /// Address is outside of the pool's network.
    #[error("address {0} is not in the network")]
    AddressNotInNetwork(Ipv4Addr),
    /// Address is the network or the broadcast address.
    #[error("address {0} is a network or broadcast address")]
    NetworkAddressReserved(Ipv4Addr),
    /// Address is already leased or reserved.
    #[error("address {0} is already used")]
    AddressAlreadyUsed(Ipv4Addr),
    /// No address is leased or reserved.
    #[error("pool is empty")]
    PoolEmpty,
    /// Address is not leased or reserved.
    #[error("address {0} not found")]
    AddressNotFound(Ipv4Addr),
}

impl From<StateError> for PoolError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::AddressAlreadyUsed(addr) => PoolError::AddressAlreadyUsed(addr),
            StateError::AddressNotUsed(addr) => PoolError::AddressNotFound(addr),
        }
    }
}

impl AddressPool {
    /// Creates an empty pool for a network in CIDR notation, e.g. `"172.16.0.0/16"`.
    pub fn new(cidr: &str) -> Result<Self, PoolError> {
        Ok(Self::from_network(cidr.parse()?))
    }

    /// Creates an empty pool for the given network, serialized by a [PoolLock].
    pub fn from_network(network: Network) -> Self {
        Self::from_parts(network, PoolState::default())
    }

    pub(crate) fn from_parts(network: Network, state: PoolState) -> Self {
        Self {
            network,
            state: RwLock::new(state),
            lock: Box::new(PoolLock::new()),
        }
    }

    /// Replaces the locking strategy, e.g. with a [crate::locker::KeyedLocker].
    pub fn with_lock(mut self, lock: impl AddressLock + 'static) -> Self {
        self.lock = Box::new(lock);
        self
    }

    /// The network this pool allocates from.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Leases an address.
    ///
    /// The smallest released address is reused first. Otherwise the address after
    /// the largest used one is leased.
    pub fn lease(&self) -> Result<Ipv4Addr, PoolError> {
        let gateway = self.network.gateway();
        // Leases serialize with each other on the network address.
        let _guard = AddressLockGuard::new(&*self.lock, self.network.network());
        let mut state = self.write_state();

        if state.used_is_empty() {
            state.mark_used(gateway)?;
            tracing::debug!(network = %self.network, %gateway, "Claimed gateway address");
        }

        if let Some(address) = state.recycle_min_free(gateway) {
            tracing::debug!(network = %self.network, %address, "Leased released address");
            return Ok(address);
        }

        // The used set holds at least the gateway here.
        let high = state.max_used().unwrap_or(gateway);
        let candidate = next_address(high).ok_or(PoolError::NoFreeAddress)?;
        if candidate == self.network.broadcast() {
            return Err(PoolError::NoFreeAddress);
        }
        if !self.network.is_host(candidate) {
            return Err(PoolError::AddressNotInNetwork(candidate));
        }

        state.mark_used(candidate)?;
        tracing::debug!(network = %self.network, address = %candidate, "Leased new address");
        Ok(candidate)
    }

    /// Reserves a specific address.
    ///
    /// Returns an error if the address is the network or broadcast address, lies
    /// outside the network or is already used.
    pub fn reserve(&self, address: Ipv4Addr) -> Result<(), PoolError> {
        if self.network.is_structural(address) {
            return Err(PoolError::NetworkAddressReserved(address));
        }
        if !self.network.contains(address) {
            return Err(PoolError::AddressNotInNetwork(address));
        }

        let _guard = AddressLockGuard::new(&*self.lock, address);
        // Rejections only need the shared side.
        if self.read_state().is_used(address) {
            return Err(PoolError::AddressAlreadyUsed(address));
        }
        self.write_state().mark_used(address)?;

        tracing::debug!(network = %self.network, %address, "Reserved address");
        Ok(())
    }

    /// Releases a leased or reserved address for reuse.
    pub fn release(&self, address: Ipv4Addr) -> Result<(), PoolError> {
        let _guard = AddressLockGuard::new(&*self.lock, address);
        let mut state = self.write_state();

        if state.used_is_empty() {
            return Err(PoolError::PoolEmpty);
        }
        state.release(address)?;

        tracing::debug!(network = %self.network, %address, "Released address");
        Ok(())
    }

    /// Like [Self::lease], returning the address in dotted-quad notation.
    pub fn get_free_ip(&self) -> Result<String, PoolError> {
        self.lease().map(|addr| addr.to_string())
    }

    /// Like [Self::reserve], taking the address in dotted-quad notation.
    pub fn set_used_ip(&self, ip: &str) -> Result<(), PoolError> {
        self.reserve(parse_address(ip)?)
    }

    /// Like [Self::release], taking the address in dotted-quad notation.
    pub fn release_ip(&self, ip: &str) -> Result<(), PoolError> {
        self.release(parse_address(ip)?)
    }

    /// Returns true if the address is leased or reserved.
    pub fn is_used(&self, address: Ipv4Addr) -> bool {
        self.read_state().is_used(address)
    }

    /// Returns true if the address was released and awaits reuse.
    pub fn is_free(&self, address: Ipv4Addr) -> bool {
        self.read_state().is_free(address)
    }

    /// Number of leased or reserved addresses, the implicit gateway included.
    pub fn used_count(&self) -> usize {
        self.read_state().used.len()
    }

    /// Number of released addresses awaiting reuse.
    pub fn free_count(&self) -> usize {
        self.read_state().free.len()
    }

    // A panic can only happen outside of a set update, the state stays consistent.
    fn read_state(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_address(address: Ipv4Addr) -> Option<Ipv4Addr> {
    address.to_bits().checked_add(1).map(Ipv4Addr::from_bits)
}

fn parse_address(ip: &str) -> Result<Ipv4Addr, PoolError> {
    ip.trim()
        .parse()
        .map_err(|_| PoolError::InvalidAddress(ip.to_string()))
}
