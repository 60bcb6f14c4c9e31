//! Docker volume-plugin protocol adapter
//!
//! One [`PluginAdapter`] serves the fixed `POST` routes of the protocol for
//! one driver. How the driver is found is the only thing that varies:
//! - [`DriverResolver::Bound`] holds the instance returned at registration
//!   (plugin management listener)
//! - [`DriverResolver::ByName`] looks the driver up in the registry on every
//!   request (plugin listener)
//!
//! Application failures, including an unknown driver, are reported in the
//! `Err` field of a 200 response. Only undecodable requests (400) and
//! unencodable responses (500) change the HTTP status; the host depends on
//! that split.

use super::types::{
    Capabilities, HandshakeResponse, PluginRequest, PluginResponse, PluginVolume,
    PLUGIN_CONTENT_TYPE,
};
use super::{
    body_limit, decode_body, decode_optional_body, failure, locate_error, reply, RequestBody,
};
use crate::common::{request_tracing_middleware, Result};
use crate::volume::{CreateOptions, DriverRegistry, VolumeDriver, VolumeLocator, VolumeSpec};
use axum::{extract::State, http::StatusCode, response::Response, routing::post, Router};
use std::sync::Arc;
use tracing::{debug, warn};

pub const HANDSHAKE_PATH: &str = "/Plugin.Activate";

/// Scope announced by `/VolumeDriver.Capabilities`
pub const SCOPE_LOCAL: &str = "local";

/// `/VolumeDriver.<method>`
pub fn volume_driver_path(method: &str) -> String {
    format!("/VolumeDriver.{}", method)
}

/// How an adapter finds its driver
#[derive(Clone)]
pub enum DriverResolver {
    Bound(Arc<dyn VolumeDriver>),
    ByName {
        registry: Arc<DriverRegistry>,
        name: String,
    },
}

impl DriverResolver {
    pub fn by_name(registry: Arc<DriverRegistry>, name: impl Into<String>) -> Self {
        DriverResolver::ByName {
            registry,
            name: name.into(),
        }
    }

    pub fn resolve(&self) -> Result<Arc<dyn VolumeDriver>> {
        match self {
            DriverResolver::Bound(driver) => Ok(driver.clone()),
            DriverResolver::ByName { registry, name } => registry.lookup(name),
        }
    }

    pub fn driver_name(&self) -> &str {
        match self {
            DriverResolver::Bound(driver) => driver.name(),
            DriverResolver::ByName { name, .. } => name,
        }
    }
}

#[derive(Clone)]
pub struct PluginAdapter {
    resolver: DriverResolver,
}

impl PluginAdapter {
    pub fn new(resolver: DriverResolver) -> Self {
        Self { resolver }
    }

    pub fn driver_name(&self) -> &str {
        self.resolver.driver_name()
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(HANDSHAKE_PATH, post(handshake))
            .route(&volume_driver_path("Create"), post(create))
            .route(&volume_driver_path("Remove"), post(remove))
            .route(&volume_driver_path("Get"), post(get))
            .route(&volume_driver_path("Name"), post(name))
            .route(&volume_driver_path("List"), post(list))
            .route(&volume_driver_path("Mount"), post(mount))
            .route(&volume_driver_path("Unmount"), post(unmount))
            .route(&volume_driver_path("Path"), post(path))
            .route(&volume_driver_path("Capabilities"), post(capabilities))
            .layer(axum::middleware::from_fn(request_tracing_middleware))
            .layer(body_limit())
            .with_state(self)
    }

    /// Decode the request and resolve the driver, or produce the response
    /// that reports why not.
    fn prepare(
        &self,
        method: &str,
        body: &RequestBody,
    ) -> std::result::Result<(PluginRequest, Arc<dyn VolumeDriver>), Response> {
        let request: PluginRequest = decode_body(body).map_err(|e| {
            warn!(method, driver = self.driver_name(), "{}", e);
            failure::<PluginResponse>(&e, PLUGIN_CONTENT_TYPE)
        })?;
        debug!(method, volume = %request.name, driver = self.driver_name(), "Plugin request");

        let driver = self.resolver.resolve().map_err(|e| {
            let e = locate_error(&e);
            warn!(method, volume = %request.name, driver = self.driver_name(), "{}", e);
            failure::<PluginResponse>(&e, PLUGIN_CONTENT_TYPE)
        })?;
        Ok((request, driver))
    }

    /// Check the optional body of a route that takes no arguments.
    fn accept_empty(
        &self,
        method: &str,
        body: &RequestBody,
    ) -> std::result::Result<(), Response> {
        decode_optional_body::<PluginRequest>(body)
            .map(|_| ())
            .map_err(|e| {
                warn!(method, driver = self.driver_name(), "{}", e);
                failure::<PluginResponse>(&e, PLUGIN_CONTENT_TYPE)
            })
    }

    fn respond(&self, method: &str, volume: &str, result: Result<PluginResponse>) -> Response {
        match result {
            Ok(response) => ok(&response),
            Err(e) => {
                warn!(method, volume, driver = self.driver_name(), "{}", e);
                failure::<PluginResponse>(&e, PLUGIN_CONTENT_TYPE)
            }
        }
    }
}

fn ok<T: serde::Serialize>(body: &T) -> Response {
    reply(StatusCode::OK, body, PLUGIN_CONTENT_TYPE)
}

macro_rules! prepare_or_return {
    ($adapter:expr, $method:expr, $body:expr) => {
        match $adapter.prepare($method, &$body) {
            Ok(prepared) => prepared,
            Err(response) => return response,
        }
    };
}

async fn handshake(State(adapter): State<PluginAdapter>) -> Response {
    debug!(driver = adapter.driver_name(), "Handshake completed");
    ok(&HandshakeResponse::default())
}

async fn create(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "create";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let locator = VolumeLocator {
        name: request.name.clone(),
        labels: request.opts.clone().unwrap_or_default(),
    };
    let result = driver
        .create(locator, CreateOptions::default(), VolumeSpec::default())
        .await
        .map(|id| {
            debug!(method = METHOD, volume = %request.name, id = %id, "Volume ready");
            PluginResponse::default()
        });
    adapter.respond(METHOD, &request.name, result)
}

async fn remove(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "remove";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let result = driver
        .remove(&request.name)
        .await
        .map(|()| PluginResponse::default());
    adapter.respond(METHOD, &request.name, result)
}

async fn get(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "get";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let result = driver.inspect(&request.name).await.map(|volume| PluginResponse {
        volume: Some(PluginVolume::from(&volume)),
        ..Default::default()
    });
    adapter.respond(METHOD, &request.name, result)
}

async fn name(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "name";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let response = PluginResponse {
        driver: Some(driver.descriptor().clone()),
        ..Default::default()
    };
    adapter.respond(METHOD, &request.name, Ok(response))
}

async fn list(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "list";
    if let Err(response) = adapter.accept_empty(METHOD, &body) {
        return response;
    }
    let result = match adapter.resolver.resolve() {
        Ok(driver) => driver.enumerate().await.map(|volumes| PluginResponse {
            volumes: Some(volumes.iter().map(PluginVolume::from).collect()),
            ..Default::default()
        }),
        Err(e) => Err(locate_error(&e)),
    };
    adapter.respond(METHOD, "", result)
}

async fn mount(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "mount";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let result = driver
        .mount(&request.name, &request.id)
        .await
        .map(PluginResponse::mountpoint);
    adapter.respond(METHOD, &request.name, result)
}

async fn unmount(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "unmount";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let result = driver
        .unmount(&request.name, &request.id)
        .await
        .map(|()| PluginResponse::default());
    adapter.respond(METHOD, &request.name, result)
}

async fn path(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    const METHOD: &str = "path";
    let (request, driver) = prepare_or_return!(adapter, METHOD, body);

    let result = driver
        .inspect(&request.name)
        .await
        .map(|volume| PluginResponse::mountpoint(volume.mountpoint.unwrap_or_default()));
    adapter.respond(METHOD, &request.name, result)
}

async fn capabilities(State(adapter): State<PluginAdapter>, body: RequestBody) -> Response {
    if let Err(response) = adapter.accept_empty("capabilities", &body) {
        return response;
    }
    debug!(driver = adapter.driver_name(), "Capabilities");
    ok(&PluginResponse {
        capabilities: Some(Capabilities {
            scope: SCOPE_LOCAL.to_string(),
        }),
        ..Default::default()
    })
}

impl std::fmt::Debug for PluginAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategy = match self.resolver {
            DriverResolver::Bound(_) => "bound",
            DriverResolver::ByName { .. } => "by-name",
        };
        f.debug_struct("PluginAdapter")
            .field("driver", &self.driver_name())
            .field("resolver", &strategy)
            .finish()
    }
}
