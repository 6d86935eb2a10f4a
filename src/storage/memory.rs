//! In-memory storage engine (no persistence)
//!
//! This engine keeps every written record in process memory.
//! It's useful for:
//! - Testing without database dependencies
//! - Running the hub without a database (`"backend": "none"`)
//!
//! Clones share the same state, so a test can keep one handle and give the
//! other to the store to observe what was written through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::engine::StorageEngine;
use super::error::StorageResult;
use crate::model::{PingRet, Servers, Snapshot, User, Users};

#[derive(Debug, Default)]
struct MemoryState {
    servers: Servers,
    users: Users,
    user_writes: usize,
    ping_writes: usize,
}

/// In-memory storage engine
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEngine {
    /// Create an empty in-memory engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine that starts out holding the given records
    pub fn with_records(servers: Servers, users: Users) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                servers,
                users,
                ..Default::default()
            })),
        }
    }

    /// The last persisted version of a user
    pub async fn persisted_user(&self, username: &str) -> Option<User> {
        self.state.lock().await.users.get(username).cloned()
    }

    /// All persisted samples for a server/location, in write order
    pub async fn persisted_ping_rets(&self, server: &str, location: &str) -> Vec<PingRet> {
        self.state
            .lock()
            .await
            .servers
            .get(server)
            .and_then(|locations| locations.get(location))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `write_user` calls received
    pub async fn user_writes(&self) -> usize {
        self.state.lock().await.user_writes
    }

    /// Number of `batch_write_ping_rets` calls received
    pub async fn ping_writes(&self) -> usize {
        self.state.lock().await.ping_writes
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn load_config(&mut self, config: &str) -> StorageResult<()> {
        if !config.is_empty() {
            debug!("in-memory engine ignores config: {config}");
        }
        Ok(())
    }

    async fn init(&mut self) -> StorageResult<Snapshot> {
        let state = self.state.lock().await;
        debug!(
            "in-memory engine loaded {} users and {} servers",
            state.users.len(),
            state.servers.len()
        );
        Ok(Snapshot::from_parts(
            state.servers.clone(),
            state.users.clone(),
        ))
    }

    async fn write_user(&self, username: &str, user: &User) -> StorageResult<()> {
        trace!("in-memory engine: write_user {username}");
        let mut state = self.state.lock().await;
        state.users.insert(username.to_string(), user.clone());
        state.user_writes += 1;
        Ok(())
    }

    async fn batch_write_ping_rets(
        &self,
        server: &str,
        location: &str,
        samples: &[PingRet],
    ) -> StorageResult<()> {
        trace!(
            "in-memory engine: {} samples for {server}/{location}",
            samples.len()
        );
        let mut state = self.state.lock().await;
        state
            .servers
            .entry(server.to_string())
            .or_insert_with(HashMap::new)
            .entry(location.to_string())
            .or_default()
            .extend_from_slice(samples);
        state.ping_writes += 1;
        Ok(())
    }
}
