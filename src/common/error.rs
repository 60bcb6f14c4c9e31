//! Error types for osd

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===
    #[error("Unable to decode JSON payload: {0}")]
    Decode(String),

    #[error("Unable to encode JSON response: {0}")]
    Encode(String),

    // === Driver Errors ===
    #[error("Driver {0} not found")]
    DriverNotFound(String),

    #[error("Unable to start volume driver {name}: {reason}")]
    DriverInit { name: String, reason: String },

    #[error("Volume {0} not found")]
    VolumeNotFound(String),

    // === KV Errors ===
    #[error("Failed to initialize KVDB: {0}")]
    BackendUnavailable(String),

    #[error("KVDB already initialized")]
    AlreadyInitialized,

    #[error("KVDB error: {0}")]
    Kv(String),

    // === Cluster Errors ===
    #[error("Failed to initialize cluster: {0}")]
    ClusterInit(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that abort daemon startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DriverInit { .. }
                | Error::BackendUnavailable(_)
                | Error::AlreadyInitialized
                | Error::ClusterInit(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Convert to HTTP status code.
    ///
    /// Only transport-level failures map to a non-2xx status; driver and
    /// volume failures travel in-band in the `Err` field of a 200 response.
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Decode(_) => StatusCode::BAD_REQUEST,
            Error::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Error::Kv(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Kv(format!("invalid record: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_only_transport_errors_change_status() {
        assert_eq!(
            Error::Decode("eof".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Encode("bad".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::DriverNotFound("ghost".into()).to_http_status(),
            StatusCode::OK
        );
        assert_eq!(
            Error::VolumeNotFound("vol1".into()).to_http_status(),
            StatusCode::OK
        );
    }

    #[test]
    fn test_startup_errors_are_fatal() {
        assert!(Error::AlreadyInitialized.is_fatal());
        assert!(Error::ClusterInit("down".into()).is_fatal());
        assert!(!Error::DriverNotFound("ghost".into()).is_fatal());
    }
}
