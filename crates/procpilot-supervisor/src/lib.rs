//! # procpilot-supervisor
//!
//! Service lifecycle for procpilot. Each service runs in a named, detached
//! session on a [`ProcessHost`] (tmux in production) and appends its output
//! to a log file. Lifecycle events are written into that same log as marker
//! lines, from which [`LogSessionTracker`] rebuilds the service's run
//! history.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use procpilot_supervisor::{ServiceManager, ServiceSettings, TmuxHost};
//!
//! let mut manager = ServiceManager::new(
//!     ServiceSettings::new("/tmp/procpilot/logs"),
//!     Arc::new(TmuxHost::default()),
//! );
//! manager.load_registry("/tmp/procpilot/services.json".as_ref()).unwrap();
//! let started = manager.tick();
//! ```

pub mod marker;
pub mod tracker;
pub mod host;
pub mod registry;
pub mod service;
pub mod manager;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use marker::Marker;
pub use tracker::{LogSessionTracker, SessionInfo};
pub use host::{HostError, ProcessHost, TmuxHost};
pub use registry::{RegistryError, ServiceConfig};
pub use service::{LivenessCache, Service, ServiceSettings};
pub use manager::ServiceManager;
