//! IO modules - external interfaces
//!
//! This module contains the transport layer:
//! - `http` - HTTP API server (bookings, calendar, sweep, health)
//! - `prometheus` - Prometheus text exposition served at /metrics

pub mod http;
pub mod prometheus;

// Re-export commonly used types
pub use http::{start_http_server, AppState};
