//! Determines which node owns a key and fetches values from other nodes.
//!
//! A cluster consists of several nodes which all know each other by their base URL (e.g.
//! `http://10.0.0.1:8001`). Each node places all members on a [consistent hash ring](HashRing)
//! and thereby agrees with all other nodes on which node owns a key. A
//! [Group](crate::group::Group) which misses a key asks its [PeerPicker](PeerPicker) for the
//! owner and, unless the owner is the node itself, fetches the value via the
//! [PeerGetter](PeerGetter) of the owner.
//!
//! The [HttpPool](http::HttpPool) implements this using HTTP. Its membership is read from the
//! config and updated whenever the config changes:
//!
//! ```yaml
//! peers:
//!     # The base URL of this node as seen by the other members
//!     self: "http://10.0.0.1:8001"
//!     # All members of the cluster (including this node)
//!     members: ["http://10.0.0.1:8001", "http://10.0.0.2:8001"]
//!     # The number of virtual nodes per member
//!     replicas: 50
//!     # The path prefix of the peer protocol
//!     base_path: "/_peercache/"
//!     # The max time to wait for another node
//!     timeout: 5s
//! ```
//!
//! Requests of other nodes are answered via [handle_peer_request](handle_peer_request) which
//! is invoked by the [Server](crate::server::Server).
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use yaml_rust::Yaml;

use crate::byteview::ByteView;
use crate::config::{Config, Handle};
use crate::fmt::duration_setting;
use crate::group::{CacheError, Registry};
use crate::platform::Platform;
use crate::ring::{HashRing, DEFAULT_REPLICAS};
use crate::server::{CLIENT_PATH, STATS_PATH};
use crate::spawn;

pub mod http;

use http::HttpPool;

/// Contains the path prefix of the peer protocol if nothing else is configured.
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

/// Contains the max time to wait for another node if nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Specifies how often the config listener checks if the platform is still running.
const CONFIG_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Determines the node which owns a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the client of the node which owns the given key.
    ///
    /// Returns **None** if no node is known or if the local node owns the key itself.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches values from another node.
#[async_trait::async_trait]
pub trait PeerGetter: Send + Sync {
    /// Fetches the value of the given key within the given group from the remote node.
    ///
    /// Any transport error, timeout or error reported by the remote node results in an **Err**.
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Bytes>;

    /// Returns the address of the remote node (used for logging).
    fn address(&self) -> &str;
}

/// Answers a request of another node.
///
/// The value is taken from the local cache or loaded via the getter of the group. This never
/// performs another remote hop, as the calling node already determined that we own the key.
///
/// # Errors
/// Fails with **UnknownGroup** if no group with the given name exists. All errors reported by
/// [Group::get_for_peer](crate::group::Group::get_for_peer) are passed along.
pub async fn handle_peer_request(
    registry: &Registry,
    group: &str,
    key: &str,
) -> Result<ByteView, CacheError> {
    let group = registry
        .find(group)
        .ok_or_else(|| CacheError::UnknownGroup(group.to_owned()))?;

    group.get_for_peer(key).await
}

/// Describes the settings of a [HttpPool](http::HttpPool).
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSettings {
    /// Contains the base URL of the local node as known by the other members.
    pub self_address: String,

    /// Contains the path prefix of the peer protocol. This always starts and ends with a `/`.
    pub base_path: String,

    /// Contains the number of virtual nodes per member.
    pub replicas: usize,

    /// Contains the max time to wait for a response of another node.
    pub timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            self_address: "http://localhost:8001".to_owned(),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Strips whitespace and trailing slashes so that addresses of the same node compare equal.
pub(crate) fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_owned()
}

/// Reads the pool settings and the list of members from the given config.
///
/// # Errors
/// Fails if any setting is present but invalid. In this case, the caller should keep the
/// previous settings.
pub fn read_settings(handle: &Handle) -> anyhow::Result<(PoolSettings, Vec<String>)> {
    let defaults = PoolSettings::default();

    let self_address = match handle.query("peers.self") {
        Yaml::String(address) => normalize_address(address),
        Yaml::BadValue | Yaml::Null => {
            let port = handle.query("server.port").as_i64().unwrap_or(8001);
            format!("http://localhost:{}", port)
        }
        other => return Err(anyhow::anyhow!("Invalid peers.self: {:?}", other)),
    };

    let base_path = match handle.query("peers.base_path") {
        Yaml::String(path) if path.starts_with('/') && path.ends_with('/') => path.clone(),
        Yaml::BadValue | Yaml::Null => defaults.base_path,
        other => {
            return Err(anyhow::anyhow!(
                "Invalid peers.base_path: {:?}. A path has to start and end with '/'.",
                other
            ))
        }
    };

    // The server dispatches by prefix, therefore the peer protocol must not overlap the
    // endpoints of clients...
    if let Some(reserved) = [CLIENT_PATH, STATS_PATH]
        .into_iter()
        .find(|reserved| reserved.starts_with(&base_path) || base_path.starts_with(reserved))
    {
        return Err(anyhow::anyhow!(
            "Invalid peers.base_path: {}. It overlaps the reserved path {}.",
            base_path,
            reserved
        ));
    }

    let replicas = match handle.query("peers.replicas") {
        Yaml::Integer(replicas) if *replicas > 0 => *replicas as usize,
        Yaml::BadValue | Yaml::Null => defaults.replicas,
        other => {
            return Err(anyhow::anyhow!(
                "Invalid peers.replicas: {:?}. Expected a positive number.",
                other
            ))
        }
    };

    let timeout = duration_setting(handle.query("peers.timeout"), defaults.timeout)?;

    let members = match handle.query("peers.members") {
        Yaml::Array(members) => members
            .iter()
            .map(|member| {
                member
                    .as_str()
                    .map(normalize_address)
                    .ok_or_else(|| anyhow::anyhow!("Invalid member in peers.members: {:?}", member))
            })
            .collect::<anyhow::Result<Vec<String>>>()?,
        Yaml::BadValue | Yaml::Null => Vec::new(),
        other => return Err(anyhow::anyhow!("Invalid peers.members: {:?}", other)),
    };

    Ok((
        PoolSettings {
            self_address,
            base_path,
            replicas,
            timeout,
        },
        members,
    ))
}

fn apply_config(pool: &HttpPool, config: &Config) {
    match read_settings(&config.current()) {
        Ok((settings, members)) => pool.apply(settings, &members),
        Err(error) => log::error!(
            "Failed to apply the peer settings: {:#}. Keeping the current membership.",
            error
        ),
    }
}

/// Creates and installs a **HttpPool** for the given platform.
///
/// If a [Config](Config) is present, the pool is initialized with its settings and a listener is
/// installed which updates the pool whenever the config changes.
///
/// Note that this is called by the [Builder](crate::builder::Builder) unless it is disabled. The
/// pool still has to be attached to each [Group](crate::group::Group) via
/// [Group::register_peers](crate::group::Group::register_peers).
pub fn install(platform: &Arc<Platform>) -> Arc<HttpPool> {
    let pool = Arc::new(HttpPool::new(PoolSettings::default()));
    platform.register::<HttpPool>(pool.clone());

    if let Some(config) = platform.find::<Config>() {
        apply_config(&pool, &config);

        let mut notifier = config.notifier();
        let platform = platform.clone();
        let pool = pool.clone();
        spawn!(async move {
            while platform.is_running() {
                match tokio::time::timeout(CONFIG_WAIT_TIMEOUT, notifier.recv()).await {
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => apply_config(&pool, &config),
                    Ok(Err(RecvError::Closed)) => return,
                    Err(_) => (),
                }
            }
        });
    }

    pool
}

/// Creates a ring which contains the given members.
pub(crate) fn build_ring(replicas: usize, members: &[String]) -> HashRing {
    let ring = HashRing::new(replicas);
    ring.add(members);

    ring
}
