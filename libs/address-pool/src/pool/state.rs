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

use core::fmt;
use std::{collections::BTreeSet, fmt::Display, net::Ipv4Addr};

use thiserror::Error;

/// Used and free addresses of a pool.
///
/// Both sets are ordered by the full 32-bit value of the address, so the
/// smallest free and the largest used address are plain lookups.
// Invariant: used and free are disjoint.
#[derive(Debug, Default, Eq, PartialEq, Clone)]
pub(crate) struct PoolState {
    /// Addresses currently leased or reserved.
    pub(crate) used: BTreeSet<Ipv4Addr>,
    /// Addresses that were used and have been released since.
    pub(crate) free: BTreeSet<Ipv4Addr>,
}

impl Display for PoolState {
    // Format as used=[a, b, ...] free=[c, ...]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, set: &BTreeSet<Ipv4Addr>) -> fmt::Result {
            write!(f, "[")?;
            for (i, addr) in set.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{addr}")?;
            }
            write!(f, "]")
        }

        write!(f, "used=")?;
        list(f, &self.used)?;
        write!(f, " free=")?;
        list(f, &self.free)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum StateError {
    #[error("address {0} is already used")]
    AddressAlreadyUsed(Ipv4Addr),
    #[error("address {0} is not used")]
    AddressNotUsed(Ipv4Addr),
}

impl PoolState {
    pub(crate) fn used_is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub(crate) fn is_used(&self, address: Ipv4Addr) -> bool {
        self.used.contains(&address)
    }

    pub(crate) fn is_free(&self, address: Ipv4Addr) -> bool {
        self.free.contains(&address)
    }

    /// Largest used address.
    pub(crate) fn max_used(&self) -> Option<Ipv4Addr> {
        self.used.last().copied()
    }

    /// Marks an address as used. A released address leaves the free set.
    pub(crate) fn mark_used(&mut self, address: Ipv4Addr) -> Result<(), StateError> {
        if !self.used.insert(address) {
            return Err(StateError::AddressAlreadyUsed(address));
        }
        self.free.remove(&address);
        Ok(())
    }

    /// Moves the smallest free address, other than `skip`, to the used set.
    pub(crate) fn recycle_min_free(&mut self, skip: Ipv4Addr) -> Option<Ipv4Addr> {
        let address = self.free.iter().copied().find(|addr| *addr != skip)?;
        self.free.remove(&address);
        self.used.insert(address);
        Some(address)
    }

    /// Moves a used address to the free set.
    pub(crate) fn release(&mut self, address: Ipv4Addr) -> Result<(), StateError> {
        if !self.used.remove(&address) {
            return Err(StateError::AddressNotUsed(address));
        }
        self.free.insert(address);
        Ok(())
    }
}
