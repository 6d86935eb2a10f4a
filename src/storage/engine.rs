//! Storage engine trait definition
//!
//! The store keeps its whole state in memory and writes through to a
//! `StorageEngine` on every mutation. The engine supplies the initial state
//! once, at bind time.

use async_trait::async_trait;

use super::error::StorageResult;
use crate::model::{PingRet, Snapshot, User};

/// Trait for durable storage engines
///
/// ## Lifecycle
///
/// 1. `load_config` receives the engine-specific configuration string
/// 2. `init` returns the full snapshot used to seed the store
/// 3. `write_user` / `batch_write_ping_rets` are called while the store holds
///    its write lock, so calls never overlap for the same store
/// 4. `close` is called once, after the last write has completed
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as the store is shared across tasks.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Apply engine-specific configuration
    ///
    /// The meaning of `config` is up to the engine (a database path, a DSN,
    /// or nothing at all).
    async fn load_config(&mut self, config: &str) -> StorageResult<()>;

    /// Load the initial servers, users and monitor reference counts
    async fn init(&mut self) -> StorageResult<Snapshot>;

    /// Persist a full user record
    ///
    /// Called after every mutation of that user.
    async fn write_user(&self, username: &str, user: &User) -> StorageResult<()>;

    /// Persist newly appended samples for one server/location in one call
    ///
    /// `samples` are in append order and must be stored after any samples
    /// previously written for the same location.
    async fn batch_write_ping_rets(
        &self,
        server: &str,
        location: &str,
        samples: &[PingRet],
    ) -> StorageResult<()>;

    /// Release engine resources
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
