//! Request gateway: every API call the engine makes goes through here.
//!
//! - Successful reads are written to the cache
//! - Reads while offline are served from the cache when possible
//! - Writes while offline are queued and acknowledged with a 202
//! - Server errors while online are returned as-is

mod hooks;
mod layer;
#[cfg(test)]
pub(crate) mod testing;
mod transport;
mod types;

pub use hooks::{AuthHook, RequestHook, StaticHeaders};
pub use layer::{derive_cache_key, Gateway, GatewayError};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
pub use types::{ApiRequest, ApiResponse, Auth, ResponseSource, QUEUED_STATUS};
