//! scrollbulk-transport
//!
//! `Transport` implementations: `HttpTransport` for real clusters and
//! `MemoryTransport` for tests and offline runs.

pub mod http;
pub mod memory;

use std::sync::Arc;

use scrollbulk_core::config::TransportSettings;
use scrollbulk_core::{Result, Transport};

pub use http::HttpTransport;
pub use memory::MemoryTransport;

/// Builds the transport for this process. `APP_USE_MEMORY_TRANSPORT=1` (or
/// `true`) selects the in-memory engine instead of HTTP.
pub fn transport_from_settings(settings: &TransportSettings) -> Result<Arc<dyn Transport>> {
    let use_memory = std::env::var("APP_USE_MEMORY_TRANSPORT")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_memory {
        tracing::info!("using in-memory transport");
        return Ok(Arc::new(MemoryTransport::new()));
    }
    tracing::info!(addresses = ?settings.addresses, "using HTTP transport");
    Ok(Arc::new(HttpTransport::new(settings)?))
}
