//! Common utilities and types shared across osd

pub mod config;
pub mod error;
pub mod tracing_middleware;

pub use config::{parse_driver_arg, ApiConfig, ClusterConfig, Config, DriverOptions, OsdConfig};
pub use error::{Error, Result};
pub use tracing_middleware::{generate_request_id, request_tracing_middleware, REQUEST_ID_HEADER};
