//! Provides a tiny DI like container which keeps the central components of a node together.
//!
//! The platform is essentially a type-indexed map of `Arc<T>` services (the config, the group
//! registry, the HTTP pool, the server) plus the central **is_running** flag which is flipped
//! to *false* once [Platform::terminate](Platform::terminate) is invoked.
//!
//! During startup, [Platform::require](Platform::require) is the right way to fetch a service
//! which is known to be installed. Once a shutdown has been initiated however, the internal map
//! is cleared (so that all Drop handlers run), therefore code which may execute during shutdown
//! should use [Platform::find](Platform::find) and handle the **None** case gracefully.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use hivecache::platform::Platform;
//! struct Clock {
//!     frequency: u32,
//! }
//!
//! struct NeverInstalled;
//!
//! let platform = Platform::new();
//!
//! platform.register::<Clock>(Arc::new(Clock { frequency: 50 }));
//! assert_eq!(platform.require::<Clock>().frequency, 50);
//! assert_eq!(platform.find::<NeverInstalled>().is_none(), true);
//!
//! // Terminating releases all services and lowers the running flag...
//! assert_eq!(platform.is_running(), true);
//! platform.terminate();
//! assert_eq!(platform.find::<Clock>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Keeps all central services of a node in a single place.
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

    /// Registers a service, replacing any previously registered service of the same type.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let services = self.services.lock().unwrap();
        services
            .get(&TypeId::of::<T>())
            .and_then(|service| service.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered service.
    ///
    /// # Panics
    /// Panics if the requested service isn't available - either because it was never installed
    /// or because the platform is already shutting down. Use [find](Platform::find) for code
    /// which may run during shutdown.
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if self.is_running() {
            match self.find::<T>() {
                Some(service) => service,
                None => panic!(
                    "A required component ({}) was not available in the platform registry!",
                    std::any::type_name::<T>()
                ),
            }
        } else {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            )
        }
    }

    /// Determines if the platform is still running or if [terminate](Platform::terminate) has
    /// already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// All services are released immediately (so that their Drop handlers run eventually) and
    /// the running flag is lowered, which makes all server and actor loops exit.
    pub fn terminate(&self) {
        self.services.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}
