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
//! Address pool configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    locker::{KeyedLocker, PoolLock},
    network::Network,
    pool::AddressPool,
};

/// How concurrent pool operations are serialized.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LockingStrategy {
    /// One lock for the whole pool.
    #[default]
    Pool,
    /// One lock per address, operations on different addresses do not contend.
    PerAddress,
}

/// Configuration of an address pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PoolConfig {
    /// The network in CIDR notation, e.g. `172.16.0.0/16`.
    pub network: String,
    /// The locking strategy.
    #[serde(default)]
    pub locking: LockingStrategy,
    /// Addresses reserved when the pool is created, e.g. statically configured
    /// hosts.
    #[serde(default)]
    pub reserved: Vec<String>,
}

impl PoolConfig {
    /// A configuration for `network` with default settings.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            locking: LockingStrategy::default(),
            reserved: Vec::new(),
        }
    }
}

impl TryFrom<PoolConfig> for AddressPool {
    type Error = anyhow::Error;

    fn try_from(config: PoolConfig) -> Result<Self, Self::Error> {
        let network: Network = config
            .network
            .parse()
            .with_context(|| format!("invalid pool network {:?}", config.network))?;

        let pool = AddressPool::from_network(network);
        let pool = match config.locking {
            LockingStrategy::Pool => pool.with_lock(PoolLock::new()),
            LockingStrategy::PerAddress => pool.with_lock(KeyedLocker::new()),
        };

        for address in &config.reserved {
            pool.set_used_ip(address)
                .with_context(|| format!("cannot reserve configured address {address:?}"))?;
        }

        tracing::debug!(
            network = %network,
            locking = ?config.locking,
            reserved = config.reserved.len(),
            "Created address pool from configuration"
        );
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use test_log::test;

    use super::*;
    use crate::pool::PoolError;

    fn parse(json: &str) -> PoolConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn should_apply_defaults() {
        let config = parse(r#"{ "network": "172.16.0.0/16" }"#);
        assert_eq!(config, PoolConfig::new("172.16.0.0/16"));
    }

    #[test]
    fn should_parse_full_config() {
        let config = parse(
            r#"{
                "network": "10.0.0.0/24",
                "locking": "per_address",
                "reserved": ["10.0.0.10", "10.0.0.2"]
            }"#,
        );
        assert_eq!(config.locking, LockingStrategy::PerAddress);

        let pool = AddressPool::try_from(config).unwrap();
        assert!(pool.is_used(Ipv4Addr::new(10, 0, 0, 10)));
        assert!(pool.is_used(Ipv4Addr::new(10, 0, 0, 2)));
        // Leasing continues above the highest reservation.
        assert_eq!(pool.lease(), Ok(Ipv4Addr::new(10, 0, 0, 11)));
    }

    #[test]
    fn should_reject_unknown_locking_strategy() {
        let result = serde_json::from_str::<PoolConfig>(
            r#"{ "network": "10.0.0.0/24", "locking": "global" }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn should_fail_on_invalid_network() {
        let err = AddressPool::try_from(PoolConfig::new("10.0.0.0/33")).unwrap_err();
        assert!(err.to_string().contains("10.0.0.0/33"), "got {err:#}");
    }

    #[test]
    fn should_fail_on_invalid_reservation() {
        let mut config = PoolConfig::new("10.0.0.0/24");
        config.reserved = vec!["10.0.0.5".to_string(), "10.0.0.255".to_string()];

        let err = AddressPool::try_from(config).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PoolError>(),
            Some(&PoolError::NetworkAddressReserved(Ipv4Addr::new(
                10, 0, 0, 255
            )))
        );
    }
}
