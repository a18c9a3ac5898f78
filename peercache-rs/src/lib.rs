//! PeerCache is a peer aware, read-through in-memory cache for expensive data sources.
//!
//! # Introduction
//! **PeerCache** sits in front of a slow data source (a database, a remote service, a heavy
//! computation) and keeps the results in memory. Values are organized in named
//! [groups](group::Group). Each group owns a size constrained [LRU cache](lru::LRUCache) and a
//! [Getter](group::Getter) which is invoked to load a value once it isn't present in the cache.
//!
//! Once several nodes are started, they form a cluster. Each key is owned by exactly one node
//! which is determined using a [consistent hash ring](ring::HashRing). A node which receives a
//! request for a key it doesn't own asks the owner via HTTP (see [peers]). Only the owner
//! caches the value, therefore the memory of all nodes adds up instead of every node holding
//! the same hot keys.
//!
//! Concurrent requests for the same key are coalesced using a [single flight](singleflight)
//! primitive. Therefore a burst of requests for a missing key only hits the data source (or the
//! owning peer) once.
//!
//! # Features
//! * **Bounded memory**: each group has a byte budget. Least recently used entries are evicted
//!   once the budget is exceeded.
//! * **Consistent hashing with virtual nodes**: adding or removing a node only moves a fraction
//!   of the keys. The ring is published atomically so that lookups never block.
//! * **Thundering herd protection**: at most one load per key is in flight at any time.
//! * **100% Async/Await**: the whole system builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config facility** which permits to change the cluster membership or the
//!   server address during operation.
//!
//! # Modules
//! * [byteview]: the immutable value type stored in caches.
//! * [lru]: the size constrained LRU cache.
//! * [ring]: the consistent hash ring.
//! * [singleflight]: the request coalescer.
//! * [group]: groups, getters and the group registry.
//! * [peers]: peer selection, the HTTP peer client and the inbound request handler.
//! * [server]: the HTTP server which answers peers and clients.
//!
//! # Examples
//! A short example on how to initialize the library can be found here [Builder](builder::Builder).
//! A complete node is provided by **peercache-io**.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod average;
pub mod builder;
pub mod byteview;
pub mod config;
pub mod fmt;
pub mod group;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod ring;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the PeerCache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the PeerCache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Integration tests build several platforms within one process, therefore we must only
    // install the logger once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use hyper::{Client, StatusCode, Uri};
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test operates on shared
        /// resources. These are our test ports (1503 and 1504) on which we start local servers
        /// for integration tests. Using this lock, we can still execute all other tests in
        /// parallel and only block if required.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }

    /// Performs a plain HTTP GET and returns the status along with the body as string.
    pub async fn http_get(url: &str) -> Option<(StatusCode, String)> {
        let client = Client::new();
        let response = client.get(url.parse::<Uri>().ok()?).await.ok()?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.ok()?;

        Some((status, String::from_utf8_lossy(&body).to_string()))
    }
}
