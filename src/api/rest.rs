//! Native driver REST API
//!
//! `POST /<driver>/Create`, `/<driver>/Remove`, `/<driver>/Name`, plus
//! `GET /health`. The driver is looked up in the registry on each request.

use super::types::{CreateResponse, DriverRequest, ErrResponse, NameResponse, RemoveResponse};
use super::{body_limit, decode_body, failure, locate_error, reply, RequestBody};
use crate::common::{request_tracing_middleware, Error};
use crate::volume::{CreateOptions, DriverRegistry, VolumeDriver, VolumeLocator, VolumeSpec};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;

const JSON: &str = "application/json";

/// `/<driver>/<verb>`
pub fn driver_path(driver: &str, verb: &str) -> String {
    format!("/{}/{}", driver, verb)
}

#[derive(Clone)]
pub struct RestServer {
    registry: Arc<DriverRegistry>,
    driver: String,
}

impl RestServer {
    pub fn new(registry: Arc<DriverRegistry>, driver: impl Into<String>) -> Self {
        Self {
            registry,
            driver: driver.into(),
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(&driver_path(&self.driver, "Create"), post(create))
            .route(&driver_path(&self.driver, "Remove"), post(remove))
            .route(&driver_path(&self.driver, "Name"), post(name))
            .route("/health", get(health))
            .layer(axum::middleware::from_fn(request_tracing_middleware))
            .layer(body_limit())
            .with_state(self)
    }

    fn prepare<T: ErrResponse>(
        &self,
        method: &str,
        body: &RequestBody,
    ) -> Result<(DriverRequest, Arc<dyn VolumeDriver>), Response> {
        let request: DriverRequest = decode_body(body).map_err(|e| {
            tracing::warn!(method, driver = %self.driver, "{}", e);
            failure::<T>(&e, JSON)
        })?;
        tracing::debug!(method, volume = %request.name, driver = %self.driver, "Driver request");

        let driver = self.registry.lookup(&self.driver).map_err(|e| {
            let e = locate_error(&e);
            tracing::warn!(method, volume = %request.name, driver = %self.driver, "{}", e);
            failure::<T>(&e, JSON)
        })?;
        Ok((request, driver))
    }

    fn fail<T: ErrResponse>(&self, method: &str, volume: &str, err: Error) -> Response {
        tracing::warn!(method, volume, driver = %self.driver, "{}", err);
        failure::<T>(&err, JSON)
    }
}

async fn create(State(server): State<RestServer>, body: RequestBody) -> Response {
    const METHOD: &str = "create";
    let (request, driver) = match server.prepare::<CreateResponse>(METHOD, &body) {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };

    let locator = VolumeLocator {
        name: request.name.clone(),
        labels: request.opts.unwrap_or_default(),
    };
    match driver
        .create(locator, CreateOptions::default(), VolumeSpec::default())
        .await
    {
        Ok(id) => reply(
            StatusCode::OK,
            &CreateResponse {
                id: Some(id),
                err: None,
            },
            JSON,
        ),
        Err(e) => server.fail::<CreateResponse>(METHOD, &request.name, e),
    }
}

async fn remove(State(server): State<RestServer>, body: RequestBody) -> Response {
    const METHOD: &str = "remove";
    let (request, driver) = match server.prepare::<RemoveResponse>(METHOD, &body) {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };

    match driver.remove(&request.name).await {
        Ok(()) => reply(StatusCode::OK, &RemoveResponse::default(), JSON),
        Err(e) => server.fail::<RemoveResponse>(METHOD, &request.name, e),
    }
}

async fn name(State(server): State<RestServer>, body: RequestBody) -> Response {
    const METHOD: &str = "name";
    let (_request, driver) = match server.prepare::<NameResponse>(METHOD, &body) {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };

    let response = NameResponse {
        name: Some(driver.name().to_string()),
        kind: Some(driver.kind()),
        err: None,
    };
    reply(StatusCode::OK, &response, JSON)
}

/// Health check with version and registered drivers
async fn health(State(server): State<RestServer>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "driver": server.driver,
        "drivers": server.registry.names(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
