//! HTTP surfaces of the daemon
//!
//! | Module | Purpose |
//! |---|---|
//! | [`plugin`] | Docker volume-plugin protocol, one adapter per resolution strategy |
//! | [`rest`] | Native per-driver REST API |
//! | [`client`] | Client for the driver REST API |
//! | [`types`] | Request/response bodies |
//!
//! Both servers share one failure convention: decode and encode failures use
//! HTTP status codes, everything else is a 200 with an in-band `Err`.

pub mod client;
pub mod plugin;
pub mod rest;
pub mod types;

pub use client::DriverClient;
pub use plugin::{DriverResolver, PluginAdapter};
pub use rest::RestServer;

use crate::common::Error;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ErrResponse;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const ENCODE_ERROR_BODY: &str = r#"{"Err":"encode error"}"#;

/// Serialize `body` as the response. An encode failure becomes a 500.
pub(crate) fn reply<T: Serialize>(
    status: StatusCode,
    body: &T,
    content_type: &'static str,
) -> Response {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            tracing::error!("{}", Error::Encode(e.to_string()));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ENCODE_ERROR_BODY.as_bytes().to_vec(),
            )
        }
    };
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Respond with `err` in the `Err` field, using the error's transport status.
pub(crate) fn failure<T: ErrResponse>(err: &Error, content_type: &'static str) -> Response {
    reply(err.to_http_status(), &T::with_err(err.to_string()), content_type)
}

/// A buffered request body, or why it could not be read (too large,
/// connection dropped). Handlers take this instead of `Bytes` so the
/// rejection is reported in protocol form.
pub(crate) type RequestBody = Result<Bytes, BytesRejection>;

/// Cap on request bodies, applied to every router
pub(crate) fn body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(MAX_BODY_BYTES)
}

/// Decode a JSON request body
pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}

fn read_body(body: &RequestBody) -> Result<&[u8], Error> {
    body.as_ref()
        .map(|bytes| bytes.as_ref())
        .map_err(|rejection| Error::Decode(rejection.body_text()))
}

/// Decode a JSON request body that must be present
pub(crate) fn decode_body<T: DeserializeOwned>(body: &RequestBody) -> Result<T, Error> {
    decode(read_body(body)?)
}

/// Decode a JSON request body the caller may leave out. Empty and `null`
/// both give `None`.
pub(crate) fn decode_optional_body<T: DeserializeOwned>(
    body: &RequestBody,
) -> Result<Option<T>, Error> {
    let bytes = read_body(body)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    decode(bytes)
}

/// In-band message for a driver that cannot be resolved
pub(crate) fn locate_error(err: &Error) -> Error {
    Error::Other(format!("Failed to locate volume: {}", err))
}

#[cfg(test)]
mod tests {
    use super::types::PluginRequest;
    use super::*;

    #[test]
    fn test_decode_empty_body_fails() {
        assert!(matches!(
            decode::<PluginRequest>(b"").unwrap_err(),
            Error::Decode(_)
        ));
        let req: PluginRequest = decode(b"{}").unwrap();
        assert_eq!(req, PluginRequest::default());
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode::<PluginRequest>(b"{not json").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().starts_with("Unable to decode JSON payload"));
    }

    #[test]
    fn test_decode_optional_body() {
        let empty: RequestBody = Ok(Bytes::new());
        assert_eq!(decode_optional_body::<PluginRequest>(&empty).unwrap(), None);

        let null: RequestBody = Ok(Bytes::from_static(b"null"));
        assert_eq!(decode_optional_body::<PluginRequest>(&null).unwrap(), None);

        let object: RequestBody = Ok(Bytes::from_static(b"{}"));
        assert_eq!(
            decode_optional_body::<PluginRequest>(&object).unwrap(),
            Some(PluginRequest::default())
        );

        let malformed: RequestBody = Ok(Bytes::from_static(b"{not json"));
        assert!(matches!(
            decode_optional_body::<PluginRequest>(&malformed).unwrap_err(),
            Error::Decode(_)
        ));
    }

    #[test]
    fn test_locate_error_message() {
        let err = locate_error(&Error::DriverNotFound("ghost".into()));
        assert_eq!(err.to_string(), "Failed to locate volume: Driver ghost not found");
        assert_eq!(err.to_http_status(), StatusCode::OK);
    }
}
