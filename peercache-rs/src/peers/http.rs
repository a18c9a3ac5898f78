//! Provides the HTTP based peer pool and peer client.
//!
//! A value is fetched from another node via `GET {peer}{base_path}{group}/{key}` where both,
//! the group and the key are percent-encoded. A status of **200 OK** carries the raw value as
//! body. Any other status is treated as error and its body is reported as reason.
//!
//! # Example
//!
//! ```
//! # use peercache::peers::http::HttpPool;
//! # use peercache::peers::{PeerPicker, PoolSettings};
//! let pool = HttpPool::new(PoolSettings {
//!     self_address: "http://node1:8001".to_owned(),
//!     ..Default::default()
//! });
//!
//! // A node which knows only itself never has to ask another node...
//! pool.set(&["http://node1:8001"]);
//! assert_eq!(pool.pick_peer("Tom").is_none(), true);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, StatusCode, Uri};
use hyper_tls::HttpsConnector;

use crate::peers::{build_ring, normalize_address, PeerGetter, PeerPicker, PoolSettings};
use crate::ring::HashRing;

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Fetches values from a single remote node via HTTP.
pub struct HttpGetter {
    address: String,
    base_url: String,
    timeout: Duration,
    client: HttpClient,
}

impl HttpGetter {
    fn url(&self, group: &str, key: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        )
    }

    async fn fetch(&self, uri: Uri) -> anyhow::Result<Bytes> {
        let response = self.client.get(uri).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await?;

        if status != StatusCode::OK {
            return Err(anyhow::anyhow!(
                "server returned: {} ({})",
                status,
                String::from_utf8_lossy(&body).trim()
            ));
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Bytes> {
        let url = self.url(group, key);
        let uri = url
            .parse::<Uri>()
            .with_context(|| format!("Invalid peer URL: {}", url))?;

        match tokio::time::timeout(self.timeout, self.fetch(uri)).await {
            Ok(result) => result.with_context(|| format!("Failed to fetch {}", url)),
            Err(_) => Err(anyhow::anyhow!(
                "Fetching {} timed out after {} ms",
                url,
                self.timeout.as_millis()
            )),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}

struct Membership {
    settings: PoolSettings,
    members: Vec<String>,
    ring: HashRing,
    clients: HashMap<String, Arc<HttpGetter>>,
}

/// Keeps the members of the cluster along with their clients.
///
/// The complete membership (ring and clients) is replaced at once, so that
/// [pick_peer](PeerPicker::pick_peer) always observes a ring and a set of clients which belong
/// together. All clients share a single connection pool.
pub struct HttpPool {
    client: HttpClient,
    membership: ArcSwap<Membership>,
    write_lock: Mutex<()>,
}

impl HttpPool {
    /// Creates a pool without any members.
    pub fn new(settings: PoolSettings) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());
        let membership = Membership {
            ring: HashRing::new(settings.replicas),
            settings,
            members: Vec::new(),
            clients: HashMap::new(),
        };

        HttpPool {
            client,
            membership: ArcSwap::new(Arc::new(membership)),
            write_lock: Mutex::new(()),
        }
    }

    /// Replaces the members of the cluster.
    ///
    /// The list should contain the local node itself, as otherwise it will never be considered
    /// as owner of any key.
    pub fn set<S: AsRef<str>>(&self, peers: &[S]) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let settings = self.membership.load().settings.clone();
        self.publish(settings, peers);
    }

    /// Replaces the settings and the members of the cluster.
    pub fn apply<S: AsRef<str>>(&self, settings: PoolSettings, peers: &[S]) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(settings, peers);
    }

    fn publish<S: AsRef<str>>(&self, mut settings: PoolSettings, peers: &[S]) {
        settings.self_address = normalize_address(&settings.self_address);
        let mut members: Vec<String> = peers
            .iter()
            .map(|peer| normalize_address(peer.as_ref()))
            .collect();
        members.sort();
        members.dedup();

        let current = self.membership.load();
        if current.settings == settings && current.members == members {
            return;
        }

        let clients = members
            .iter()
            .filter(|member| **member != settings.self_address)
            .map(|member| {
                (
                    member.clone(),
                    Arc::new(HttpGetter {
                        address: member.clone(),
                        base_url: format!("{}{}", member, settings.base_path),
                        timeout: settings.timeout,
                        client: self.client.clone(),
                    }),
                )
            })
            .collect();

        log::info!(
            "Cluster membership of {} changed: {}",
            settings.self_address,
            members.join(", ")
        );

        self.membership.store(Arc::new(Membership {
            ring: build_ring(settings.replicas, &members),
            settings,
            members,
            clients,
        }));
    }

    /// Returns the current settings.
    pub fn settings(&self) -> PoolSettings {
        self.membership.load().settings.clone()
    }

    /// Returns all members of the cluster in alphabetical order.
    pub fn members(&self) -> Vec<String> {
        self.membership.load().members.clone()
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let membership = self.membership.load();
        let owner = membership.ring.get(key)?;

        if owner == membership.settings.self_address {
            return None;
        }

        log::debug!("Picked peer {} for {}", owner, key);
        membership
            .clients
            .get(&owner)
            .map(|client| client.clone() as Arc<dyn PeerGetter>)
    }
}
