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
//! # Address Pool
//!
//! Hand out the host addresses of a single IPv4 network.
//!
//! The [pool::AddressPool] leases addresses in ascending order, lets callers
//! reserve specific addresses and takes released addresses back for reuse. The
//! address right after the network address is treated as the gateway and is
//! never leased.
//!
//! ```
//! use address_pool::pool::{AddressPool, PoolError};
//!
//! let pool = AddressPool::new("172.16.0.0/16")?;
//! assert_eq!(pool.get_free_ip()?, "172.16.0.2");
//! pool.set_used_ip("172.16.0.3")?;
//! assert_eq!(
//!     pool.set_used_ip("172.16.255.255"),
//!     Err(PoolError::NetworkAddressReserved("172.16.255.255".parse().unwrap()))
//! );
//! pool.release_ip("172.16.0.2")?;
//! assert_eq!(pool.get_free_ip()?, "172.16.0.2");
//! # Ok::<(), PoolError>(())
//! ```
//!
//! Concurrent callers are serialized by a locking strategy from [locker]. The
//! network definition lives in [network], a serde configuration in [config].

pub mod config;
pub mod locker;
pub mod network;
pub mod pool;
