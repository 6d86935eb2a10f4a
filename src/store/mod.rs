//! The concurrent in-memory store
//!
//! `Store` holds every user, every per-server/per-location ping history and
//! the number of users monitoring each server. All of it sits behind one
//! reader/writer lock; every mutation is written through to the storage
//! engine while that lock is still held.
//!
//! ## Poller notifications
//!
//! ```text
//!   add_monitor_server ──(count absent → 1)──▶ add_servers  ──▶ poller pool
//!   delete_monitor_server ─(count → 0)───────▶ kick_servers ──▶ poller pool
//! ```
//!
//! Both channels are bounded and sized at bind time so that seeding every
//! already-monitored server never blocks.
//!
//! ## Shutdown
//!
//! Mutating operations register with a shutdown guard. [`Store::close`] lets
//! in-flight and newly submitted mutations run until the pending count
//! drains, then closes the fence. After it returns, no mutation is in flight
//! and every further mutation is a no-op.
//! Read-only queries keep working on whatever state remains.

mod error;
mod guard;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, instrument, trace, warn};

pub use error::{StoreError, StoreResult};
use guard::{PendingOp, ShutdownGuard};

use crate::model::{LocationHistory, PingRet, ServerRefCounts, Servers, User, Users};
use crate::padding::pad_samples;
use crate::storage::StorageEngine;

/// Minimum capacity of the poller notification channels
pub const MIN_SERVER_CHANNEL_CAPACITY: usize = 1 << 10;

/// Receiving halves of the poller notification channels
#[derive(Debug)]
pub struct ServerEvents {
    /// Servers that gained their first monitor and should be polled
    pub add_servers: mpsc::Receiver<String>,

    /// Servers that lost their last monitor and should no longer be polled
    pub kick_servers: mpsc::Receiver<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    servers: Servers,
    users: Users,
    all_servers: ServerRefCounts,
}

fn is_monitored(all_servers: &ServerRefCounts, server: &str) -> bool {
    all_servers.get(server).is_some_and(|&count| count > 0)
}

pub struct Store {
    state: RwLock<StoreState>,
    engine: Box<dyn StorageEngine>,
    add_server_tx: mpsc::Sender<String>,
    kick_server_tx: mpsc::Sender<String>,
    guard: ShutdownGuard,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("closed", &self.guard.is_closed())
            .field("pending", &self.guard.pending())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Load the initial state from `engine` and start serving
    ///
    /// `config` is passed to [`StorageEngine::load_config`] unchanged. Every
    /// server that is already monitored in the loaded state is queued on
    /// `add_servers` so pollers resume without waiting for new subscriptions.
    #[instrument(skip_all)]
    pub async fn bind(
        mut engine: Box<dyn StorageEngine>,
        config: &str,
    ) -> StoreResult<(Self, ServerEvents)> {
        engine.load_config(config).await?;
        let mut snapshot = engine.init().await?;

        snapshot.all_servers.retain(|_, count| *count > 0);

        let capacity = snapshot.all_servers.len().max(MIN_SERVER_CHANNEL_CAPACITY);
        let (add_server_tx, add_servers) = mpsc::channel(capacity);
        let (kick_server_tx, kick_servers) = mpsc::channel(capacity);

        for server in snapshot.all_servers.keys() {
            // capacity covers every loaded server, this never waits
            if let Some(permit) = reserve(&add_server_tx, server).await {
                permit.send(server.clone());
            }
        }

        info!(
            "store bound: {} users, {} monitored servers, channel capacity {}",
            snapshot.users.len(),
            snapshot.all_servers.len(),
            capacity
        );

        let store = Self {
            state: RwLock::new(StoreState {
                servers: snapshot.servers,
                users: snapshot.users,
                all_servers: snapshot.all_servers,
            }),
            engine,
            add_server_tx,
            kick_server_tx,
            guard: ShutdownGuard::default(),
        };

        Ok((
            store,
            ServerEvents {
                add_servers,
                kick_servers,
            },
        ))
    }

    /// Wait for pending mutations to finish, then refuse new ones
    ///
    /// Mutations submitted while `close` is waiting still run. The engine is
    /// closed once the fence is up. Calling `close` again returns right away
    /// without closing the engine a second time; if the first call is still
    /// running, the engine may still be closing when the second returns.
    pub async fn close(&self) -> StoreResult<()> {
        if !self.guard.close().await {
            return Ok(());
        }
        info!("store closed, no operations in flight");
        self.engine.close().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }

    fn begin(&self) -> Option<PendingOp<'_>> {
        let op = self.guard.acquire();
        if op.is_none() {
            trace!("store is closed, ignoring operation");
        }
        op
    }

    // ========================================================================
    // User operations
    // ========================================================================

    pub async fn get_user(&self, username: &str) -> Option<User> {
        self.state.read().await.users.get(username).cloned()
    }

    /// Usernames of all users, sorted
    pub async fn list_users(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut usernames: Vec<String> = state.users.keys().cloned().collect();
        usernames.sort();
        usernames
    }

    #[instrument(skip(self, password))]
    pub async fn add_user(&self, username: &str, password: &str) -> StoreResult<()> {
        let Some(_op) = self.begin() else {
            return Ok(());
        };
        let mut state = self.state.write().await;

        if state.users.contains_key(username) {
            return Err(StoreError::UserAlreadyExists(username.to_string()));
        }

        let user = state
            .users
            .entry(username.to_string())
            .or_insert_with(|| User::new(username, password));
        debug!("user created");
        self.engine.write_user(username, user).await?;
        Ok(())
    }

    #[instrument(skip(self, old_password, new_password))]
    pub async fn update_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> StoreResult<()> {
        let Some(_op) = self.begin() else {
            return Ok(());
        };
        let mut state = self.state.write().await;

        let user = state
            .users
            .get_mut(username)
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;

        if user.password != old_password {
            return Err(StoreError::IncorrectPassword);
        }

        user.password = new_password.to_string();
        self.engine.write_user(username, user).await?;
        Ok(())
    }

    // ========================================================================
    // Monitor operations
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn add_monitor_server(&self, username: &str, server: &str) -> StoreResult<()> {
        let Some(_op) = self.begin() else {
            return Ok(());
        };
        let mut state = self.state.write().await;
        let StoreState {
            users, all_servers, ..
        } = &mut *state;

        let user = users
            .get_mut(username)
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;

        if user.is_monitoring(server) {
            return Err(StoreError::AlreadyMonitoring(server.to_string()));
        }

        // take the channel slot before touching state, so a caller dropped
        // while the channel is full leaves nothing half-applied
        let first_monitor = !is_monitored(all_servers, server);
        let permit = if first_monitor {
            reserve(&self.add_server_tx, server).await
        } else {
            None
        };

        user.monitor_servers.insert(server.to_string());
        if first_monitor {
            debug!("first monitor for {server}, requesting polling");
            if let Some(permit) = permit {
                permit.send(server.to_string());
            }
        }
        let count = all_servers.entry(server.to_string()).or_insert(0);
        *count = (*count).max(0) + 1;

        self.engine.write_user(username, user).await?;
        Ok(())
    }

    /// Stop `username` from monitoring `server`
    ///
    /// A user that was not monitoring `server` is left untouched and nothing
    /// is written.
    #[instrument(skip(self))]
    pub async fn delete_monitor_server(&self, username: &str, server: &str) -> StoreResult<()> {
        let Some(_op) = self.begin() else {
            return Ok(());
        };
        let mut state = self.state.write().await;
        let StoreState {
            users, all_servers, ..
        } = &mut *state;

        let user = users
            .get_mut(username)
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;

        if !user.is_monitoring(server) {
            trace!("{username} was not monitoring {server}");
            return Ok(());
        }

        let last_monitor = all_servers.get(server).is_none_or(|&count| count <= 1);
        let permit = if last_monitor {
            reserve(&self.kick_server_tx, server).await
        } else {
            None
        };

        user.monitor_servers.remove(server);
        let count = all_servers.entry(server.to_string()).or_insert(0);
        *count -= 1;
        if *count <= 0 {
            all_servers.remove(server);
            debug!("last monitor for {server} gone, kicking");
            if let Some(permit) = permit {
                permit.send(server.to_string());
            }
        }

        self.engine.write_user(username, user).await?;
        Ok(())
    }

    /// Ping history of `server` by location, as seen by one of its monitors
    pub async fn get_monitor_result(
        &self,
        username: &str,
        server: &str,
    ) -> StoreResult<LocationHistory> {
        let state = self.state.read().await;

        let user = state
            .users
            .get(username)
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;

        if !user.is_monitoring(server) {
            return Err(StoreError::NotMonitoring(server.to_string()));
        }

        Ok(state.servers.get(server).cloned().unwrap_or_default())
    }

    /// Monitored servers with their monitor counts, sorted by server name
    pub async fn monitored_servers(&self) -> Vec<(String, i64)> {
        let state = self.state.read().await;
        let mut servers: Vec<(String, i64)> = state
            .all_servers
            .iter()
            .map(|(server, count)| (server.clone(), *count))
            .collect();
        servers.sort();
        servers
    }

    // ========================================================================
    // Ping ingestion
    // ========================================================================

    /// Record a ping sample for `server` as measured from `location`
    ///
    /// The location is first padded up to the longest location of the same
    /// server (see [`pad_samples`]); padding and sample are persisted as one
    /// batch.
    #[instrument(skip(self, pr), fields(time = %pr.time))]
    pub async fn append_ping_ret(
        &self,
        server: &str,
        location: &str,
        pr: PingRet,
    ) -> StoreResult<()> {
        let Some(_op) = self.begin() else {
            return Ok(());
        };
        let mut state = self.state.write().await;

        if !is_monitored(&state.all_servers, server) {
            return Err(StoreError::ServerNotFound(server.to_string()));
        }

        let history = state.servers.entry(server.to_string()).or_default();
        history.entry(location.to_string()).or_default();

        let batch = pad_samples(history, location, pr);
        if batch.len() > 1 {
            trace!("padding {location} with {} samples", batch.len() - 1);
        }

        history
            .entry(location.to_string())
            .or_default()
            .extend_from_slice(&batch);

        self.engine
            .batch_write_ping_rets(server, location, &batch)
            .await?;
        Ok(())
    }
}

/// Wait for room on a notification channel
///
/// `None` when the receiver is gone; the notification is dropped then.
async fn reserve<'a>(
    tx: &'a mpsc::Sender<String>,
    server: &str,
) -> Option<mpsc::Permit<'a, String>> {
    match tx.reserve().await {
        Ok(permit) => Some(permit),
        Err(_) => {
            warn!("no receiver left for notification about {server}");
            None
        }
    }
}
