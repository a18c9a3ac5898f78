//! Contains the HTTP server of a cache node.
//!
//! Opens a server socket on the specified port (**server.port** in the config or 8001 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). The server answers:
//!
//! * `GET {base_path}{group}/{key}`: requests of other nodes (the peer protocol). These are
//!   answered from the local cache or via the getter of the group, but never by asking yet
//!   another node. The **base_path** defaults to `/_peercache/` (see [peers](crate::peers)).
//! * `GET /api/{group}/{key}`: requests of clients. These run through
//!   [Group::get](crate::group::Group::get) and may therefore be forwarded to the owning node.
//! * `GET /_stats`: reports the metrics of all groups and the current membership as JSON.
//!
//! Errors are reported using the status code: **400** for a malformed path or an empty key,
//! **404** with `no such group: <name>` for an unknown group and **500** with the error message
//! if the getter failed.
//!
//! Note that the server periodically tries to bind the socket to the selected address, so that
//! a "new" instance can be started while the "old" one bleeds out. Also, the server listens to
//! config changes and relocates to another port or host if required.
//!
//! # Example
//!
//! ```no_run
//! use peercache::builder::Builder;
//! use peercache::config::Config;
//! use peercache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 1503
//!     ", None).unwrap();
//!
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::sync::broadcast::error::RecvError;

use crate::byteview::ByteView;
use crate::config::Config;
use crate::fmt::format_size;
use crate::group::{CacheError, Registry};
use crate::peers::http::HttpPool;
use crate::peers::{handle_peer_request, DEFAULT_BASE_PATH};
use crate::platform::Platform;
use crate::spawn;

/// Specifies how often the server checks if it should shut down or relocate.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the interval in which binding the server socket is retried.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Contains the path prefix of client requests.
pub const CLIENT_PATH: &str = "/api/";

/// Contains the path of the metrics endpoint.
pub const STATS_PATH: &str = "/_stats";

/// Represents the HTTP server of a node.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        });

        platform.register::<Server>(server.clone());

        server
    }

    /// Determines if the server socket should keep listening.
    ///
    /// In contrast to **Platform::is_running** this is toggled to false once the configured
    /// address changed, so that the **event_loop** binds a new socket.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current_address(&self, address: Option<String>) {
        *self
            .current_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = address;
    }

    /// Determines the server address based on the current configuration.
    ///
    /// If no, an invalid or a partial config is present, fallback values are used.
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.query("server.host").as_str().unwrap_or("0.0.0.0"),
                    handle
                        .query("server.port")
                        .as_i64()
                        .filter(|port| *port > 0 && *port <= u16::MAX as i64)
                        .unwrap_or(8001)
                )
            })
            .unwrap_or_else(|| "0.0.0.0:8001".to_owned())
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Binds the server socket and serves incoming requests until the platform is terminated.
    ///
    /// If the socket cannot be bound, this is retried every 500ms. Once the configured address
    /// changes, the current socket is closed gracefully and a new one is opened.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported: Option<Instant> = None;

        while self.platform.is_running() {
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match bind(&address).await {
                Ok(builder) => {
                    log::info!("Opened server socket on {}...", &address);
                    self.set_current_address(Some(address.clone()));

                    let platform = self.platform.clone();
                    let service = make_service_fn(move |_| {
                        let platform = platform.clone();
                        async move {
                            Ok::<_, Infallible>(service_fn(move |request| {
                                handle_request(platform.clone(), request)
                            }))
                        }
                    });

                    if let Err(error) = builder
                        .serve(service)
                        .with_graceful_shutdown(self.await_shutdown())
                        .await
                    {
                        log::error!("The server on {} failed: {}", &address, error);
                    }

                    self.set_current_address(None);
                    log::info!("Closed server socket on {}.", &address);
                }
                Err(error) => {
                    // Retrying every 500ms would jam the log, therefore we only report every 5s...
                    if last_bind_error_reported
                        .map(|reported| reported.elapsed().as_secs() >= 5)
                        .unwrap_or(true)
                    {
                        log::error!(
                            "Cannot open server address {}: {:#}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Some(Instant::now());
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Completes once the platform is terminated or the configured address changed.
    async fn await_shutdown(&self) {
        let mut config_changed_flag = self.platform.find::<Config>().map(|config| config.notifier());

        while self.platform.is_running() && self.is_running() {
            let closed = match config_changed_flag.as_mut() {
                Some(flag) => {
                    match tokio::time::timeout(SHUTDOWN_CHECK_INTERVAL, flag.recv()).await {
                        Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {
                            self.check_address();
                            false
                        }
                        Ok(Err(RecvError::Closed)) => true,
                        Err(_) => false,
                    }
                }
                None => {
                    tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL).await;
                    false
                }
            };

            if closed {
                config_changed_flag = None;
            }
        }
    }

    fn check_address(&self) {
        let new_address = self.address();
        if self.current_address().as_ref() != Some(&new_address) {
            log::info!(
                "Server address has changed to {}. Restarting server socket...",
                new_address
            );
            self.running.store(false, Ordering::Release);
        }
    }
}

async fn bind(address: &str) -> anyhow::Result<hyper::server::Builder<hyper::server::conn::AddrIncoming>> {
    let socket_address: SocketAddr = tokio::net::lookup_host(address)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Cannot resolve {}", address))?;

    Ok(hyper::Server::try_bind(&socket_address)?)
}

async fn handle_request(
    platform: Arc<Platform>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let watch = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let response = dispatch(&platform, &method, &path).await;

    log::debug!(
        "{} {} -> {} ({} us)",
        method,
        path,
        response.status(),
        watch.elapsed().as_micros()
    );

    Ok(response)
}

async fn dispatch(platform: &Arc<Platform>, method: &Method, path: &str) -> Response<Body> {
    if method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
    }

    let registry = match platform.find::<Registry>() {
        Some(registry) => registry,
        None => return text_response(StatusCode::SERVICE_UNAVAILABLE, "node is shutting down"),
    };

    let base_path = platform
        .find::<HttpPool>()
        .map(|pool| pool.settings().base_path)
        .unwrap_or_else(|| DEFAULT_BASE_PATH.to_owned());

    if let Some(path) = path.strip_prefix(base_path.as_str()) {
        return match parse_group_and_key(path) {
            Some((group, key)) => {
                value_response(handle_peer_request(&registry, &group, &key).await)
            }
            None => text_response(StatusCode::BAD_REQUEST, "bad request"),
        };
    }

    if let Some(path) = path.strip_prefix(CLIENT_PATH) {
        return match parse_group_and_key(path) {
            Some((group, key)) => match registry.find(&group) {
                Some(group) => value_response(group.get(&key).await),
                None => value_response(Err(CacheError::UnknownGroup(group))),
            },
            None => text_response(StatusCode::BAD_REQUEST, "bad request"),
        };
    }

    if path == STATS_PATH {
        return stats_response(platform, &registry);
    }

    text_response(StatusCode::NOT_FOUND, "not found")
}

/// Splits the remaining path into the decoded group name and key.
fn parse_group_and_key(path: &str) -> Option<(String, String)> {
    let (group, key) = path.split_once('/')?;
    let group = urlencoding::decode(group).ok()?.into_owned();
    let key = urlencoding::decode(key).ok()?.into_owned();

    if group.is_empty() {
        None
    } else {
        Some((group, key))
    }
}

fn text_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    let _ = response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    response
}

fn value_response(result: Result<ByteView, CacheError>) -> Response<Body> {
    match result {
        Ok(value) => {
            let mut response = Response::new(Body::from(value.bytes()));
            let _ = response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            response
        }
        Err(error @ CacheError::InvalidKey) => {
            text_response(StatusCode::BAD_REQUEST, error.to_string())
        }
        Err(error @ CacheError::UnknownGroup(_)) => {
            text_response(StatusCode::NOT_FOUND, error.to_string())
        }
        Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

fn stats_response(platform: &Arc<Platform>, registry: &Registry) -> Response<Body> {
    let groups: Vec<serde_json::Value> = registry
        .groups()
        .iter()
        .map(|group| {
            let stats = group.cache_stats();
            serde_json::json!({
                "name": group.name(),
                "entries": stats.entries,
                "allocated_memory": stats.allocated_memory,
                "allocated_memory_formatted": format_size(stats.allocated_memory),
                "max_memory": stats.max_memory,
                "reads": stats.reads,
                "writes": stats.writes,
                "evictions": stats.evictions,
                "hit_rate": stats.hit_rate,
                "local_loads": group.local_loads(),
                "peer_loads": group.peer_loads(),
                "peer_errors": group.peer_errors(),
                "peer_latency": group.peer_latency().to_string(),
            })
        })
        .collect();

    let (node, members) = platform
        .find::<HttpPool>()
        .map(|pool| (pool.settings().self_address, pool.members()))
        .unwrap_or_default();

    let mut response = Response::new(Body::from(
        serde_json::json!({
            "node": node,
            "members": members,
            "groups": groups,
        })
        .to_string(),
    ));
    let _ = response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    response
}
