//! In-memory authoritative store for a server ping monitoring service
//!
//! The [`Store`] tracks which users monitor which servers, the ping history
//! collected per server and location, and tells an external poller pool
//! which servers to start and stop probing. Durability is delegated to a
//! pluggable [`StorageEngine`](storage::StorageEngine).

pub mod config;
pub mod model;
pub mod padding;
pub mod storage;
pub mod store;

pub use model::{PingRet, User};
pub use store::{ServerEvents, Store, StoreError, StoreResult};
