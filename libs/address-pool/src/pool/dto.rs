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
//! Data transfer objects (DTOs) for the address pool.
//!
//! The pool keeps its state in memory only. Embedders that need the state to
//! survive a restart take a [AddressPoolDto] snapshot and store it themselves.

use std::{collections::BTreeSet, net::Ipv4Addr};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    network::Network,
    pool::{AddressPool, state::PoolState},
};

/// Snapshot of an address pool.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct AddressPoolDto {
    /// The network in CIDR notation.
    pub network: String,
    /// Leased or reserved addresses, ascending.
    pub used: Vec<String>,
    /// Released addresses awaiting reuse, ascending.
    pub free: Vec<String>,
}

impl AddressPool {
    /// Takes a consistent snapshot of the pool.
    pub fn snapshot(&self) -> AddressPoolDto {
        let state = self.read_state();
        AddressPoolDto {
            network: self.network.to_string(),
            used: state.used.iter().map(ToString::to_string).collect(),
            free: state.free.iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<&AddressPool> for AddressPoolDto {
    fn from(pool: &AddressPool) -> Self {
        pool.snapshot()
    }
}

/// Restores a pool. The restored pool is serialized by a
/// [crate::locker::PoolLock], use [AddressPool::with_lock] to change that.
impl TryFrom<AddressPoolDto> for AddressPool {
    type Error = anyhow::Error;

    fn try_from(value: AddressPoolDto) -> Result<Self, Self::Error> {
        let network: Network = value.network.parse().context("invalid network")?;

        let used = parse_hosts(&network, &value.used).context("invalid used address")?;
        let free = parse_hosts(&network, &value.free).context("invalid free address")?;
        if let Some(both) = used.intersection(&free).next() {
            anyhow::bail!("address {both} is both used and free");
        }

        Ok(AddressPool::from_parts(network, PoolState { used, free }))
    }
}

fn parse_hosts(network: &Network, addresses: &[String]) -> anyhow::Result<BTreeSet<Ipv4Addr>> {
    let mut hosts = BTreeSet::new();
    for address in addresses {
        let host: Ipv4Addr = address
            .parse()
            .with_context(|| format!("{address:?} is not an IPv4 address"))?;
        anyhow::ensure!(
            network.is_host(host),
            "{host} is not a host address of {network}"
        );
        anyhow::ensure!(hosts.insert(host), "{host} is listed twice");
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(used: &[&str], free: &[&str]) -> AddressPoolDto {
        AddressPoolDto {
            network: "10.0.0.0/24".to_string(),
            used: used.iter().map(|s| s.to_string()).collect(),
            free: free.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_snapshot_lists_sets_in_order() {
        let pool = AddressPool::new("10.0.0.0/24").unwrap();
        for _ in 0..4 {
            pool.lease().unwrap();
        }
        pool.release("10.0.0.4".parse().unwrap()).unwrap();
        pool.release("10.0.0.2".parse().unwrap()).unwrap();

        assert_eq!(
            pool.snapshot(),
            dto(&["10.0.0.1", "10.0.0.3", "10.0.0.5"], &["10.0.0.2", "10.0.0.4"])
        );
    }

    #[test]
    fn test_restore_continues_where_snapshot_left_off() {
        let pool = AddressPool::new("10.0.0.0/24").unwrap();
        for _ in 0..3 {
            pool.lease().unwrap();
        }
        pool.release("10.0.0.3".parse().unwrap()).unwrap();

        let json = serde_json::to_string(&AddressPoolDto::from(&pool)).unwrap();
        let restored =
            AddressPool::try_from(serde_json::from_str::<AddressPoolDto>(&json).unwrap()).unwrap();

        assert_eq!(restored.snapshot(), pool.snapshot());
        assert_eq!(restored.lease(), Ok("10.0.0.3".parse().unwrap()));
        assert_eq!(restored.lease(), Ok("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshots() {
        let cases = [
            dto(&["10.0.0.2"], &["10.0.0.2"]),
            dto(&["10.0.0.0"], &[]),
            dto(&[], &["10.0.0.255"]),
            dto(&["10.0.1.2"], &[]),
            dto(&["10.0.0.2", "10.0.0.2"], &[]),
            dto(&["not an address"], &[]),
            AddressPoolDto {
                network: "10.0.0.0".to_string(),
                used: vec![],
                free: vec![],
            },
        ];

        for case in cases {
            assert!(
                AddressPool::try_from(case.clone()).is_err(),
                "accepted {case:?}"
            );
        }
    }
}
