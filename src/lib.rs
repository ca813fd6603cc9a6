//! Offline-first HTTP client engine.
//!
//! Reads are cached with a TTL and served from the cache while offline. Writes
//! made while offline are queued durably and replayed in order once the server
//! is reachable again.

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod gateway;
pub mod logging;
pub mod monitor;
pub mod store;
pub mod sync;

pub use config::Config;
pub use connectivity::{ConnectivityProbe, ConnectivitySignal};
pub use engine::Engine;
pub use gateway::{ApiResponse, GatewayError, ResponseSource};
pub use monitor::{ConnectivityMonitor, HealthProbe, MonitorStatus};
pub use store::{ActionType, PendingAction, SqliteStore, Store, StoreError};
pub use sync::{SyncCoordinator, SyncReport};
