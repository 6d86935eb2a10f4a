//! Data model shared by the store and the storage engines

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Ping value used for padded samples that carry no measurement
pub const DEFAULT_PING: &str = "0.000";

/// A single ping measurement
///
/// Both fields are opaque strings. Samples are ordered by insertion within a
/// location's history; `time` is compared for equality but never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRet {
    pub time: String,
    pub ping: String,
}

impl PingRet {
    pub fn new(time: impl Into<String>, ping: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            ping: ping.into(),
        }
    }

    /// Placeholder sample for a tick where a location reported nothing
    pub fn padding(time: impl Into<String>) -> Self {
        Self::new(time, DEFAULT_PING)
    }

    pub fn is_padding(&self) -> bool {
        self.ping == DEFAULT_PING
    }
}

/// A monitoring account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,

    /// Servers this user receives ping data for
    #[serde(default)]
    pub monitor_servers: HashSet<String>,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            monitor_servers: HashSet::new(),
        }
    }

    pub fn is_monitoring(&self, server: &str) -> bool {
        self.monitor_servers.contains(server)
    }
}

/// Ping history of one server, keyed by location
pub type LocationHistory = HashMap<String, Vec<PingRet>>;

/// Ping histories of all servers, keyed by server name
pub type Servers = HashMap<String, LocationHistory>;

/// All users, keyed by username
pub type Users = HashMap<String, User>;

/// Number of users monitoring each server
pub type ServerRefCounts = HashMap<String, i64>;

/// Initial state handed to the store by a storage engine
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub servers: Servers,
    pub users: Users,
    pub all_servers: ServerRefCounts,
}

impl Snapshot {
    /// Build a snapshot whose reference counts are derived from the users'
    /// monitor sets.
    pub fn from_parts(servers: Servers, users: Users) -> Self {
        let all_servers = count_monitors(&users);
        Self {
            servers,
            users,
            all_servers,
        }
    }
}

/// Count how many users monitor each server
pub fn count_monitors(users: &Users) -> ServerRefCounts {
    let mut counts = ServerRefCounts::new();
    for server in users.values().flat_map(|u| u.monitor_servers.iter()) {
        *counts.entry(server.clone()).or_insert(0) += 1;
    }
    counts
}
