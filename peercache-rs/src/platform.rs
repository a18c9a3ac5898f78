//! Provides a tiny DI like container which keeps the central components of a cache node.
//!
//! The platform is more or less a map which keeps components like the
//! [Registry](crate::group::Registry), the [HttpPool](crate::peers::http::HttpPool), the
//! [Config](crate::config::Config) or the [Server](crate::server::Server) as **Arc<T>** around.
//! It also keeps the central **is_running** flag which is toggled to *false* once
//! [Platform::terminate](Platform::terminate) is invoked.
//!
//! [Platform::require](Platform::require) is the common way of fetching a component which is known
//! to be there (e.g. during startup). Once the shutdown has been initiated, the internal map is
//! cleared (so that all Drop handlers run). Code which might run after
//! [Platform::terminate](Platform::terminate) was called, should therefore use
//! [Platform::find](Platform::find) and handle the **None** case gracefully.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use peercache::platform::Platform;
//! # use peercache::group::Registry;
//! let platform = Platform::new();
//!
//! // Registers a component...
//! platform.register::<Registry>(Arc::new(Registry::new()));
//!
//! // Obtains a reference to a previously registered component...
//! let registry = platform.require::<Registry>();
//! assert_eq!(registry.names().is_empty(), true);
//!
//! // By default the platform is running...
//! assert_eq!(platform.is_running(), true);
//!
//! // Once terminated...
//! platform.terminate();
//! // all components are released and the platform is no longer considered active...
//! assert_eq!(platform.find::<Registry>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Provides a container to keep all central components in a single place.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new platform instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a component.
    ///
    /// A component which has been registered for the same type before is replaced.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered component.
    ///
    /// # Examples
    /// ```
    /// # use peercache::platform::Platform;
    /// # use std::sync::Arc;
    /// struct Service {
    ///     value: i32
    /// }
    ///
    /// struct UnknownService;
    ///
    /// let platform = Platform::new();
    /// platform.register::<Service>(Arc::new(Service { value: 42 }));
    ///
    /// assert_eq!(platform.find::<Service>().unwrap().value, 42);
    /// assert_eq!(platform.find::<UnknownService>().is_none(), true);
    /// ```
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered component.
    ///
    /// # Panics
    /// Panics if the requested component isn't available or if the platform is already shutting
    /// down.
    ///
    /// ```should_panic
    /// # use peercache::platform::Platform;
    /// struct UnknownService;
    ///
    /// let platform = Platform::new();
    /// let _ = platform.require::<UnknownService>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the node is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not available in the platform!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate](Platform::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This releases all components and toggles the [is_running()](Platform::is_running) flag to
    /// **false**. Background tasks (like the config watcher or the server) observe this flag and
    /// wind down.
    pub fn terminate(&self) {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        self.is_running.store(false, Ordering::Release);
    }
}
