//! Server plumbing.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request_id`] | UUIDv7 request ids and the per-request tracing span |
//! | [`sig_down`] | Graceful shutdown signal handling |
//! | [`telemetry`] | Log subscriber and optional OpenTelemetry export |

pub mod request_id;
pub mod sig_down;
pub mod telemetry;

pub use request_id::*;
pub use sig_down::*;
pub use telemetry::*;
