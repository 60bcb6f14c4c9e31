//! Volume-plugin protocol against the in-process router

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use osd::api::{DriverResolver, PluginAdapter, MAX_BODY_BYTES};
use osd::common::DriverOptions;
use osd::kvdb::{KvHandle, MemKv, KV_DOMAIN};
use osd::volume::DriverRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn registry() -> Arc<DriverRegistry> {
    let kv: KvHandle = Arc::new(MemKv::new(KV_DOMAIN));
    let mut registry = DriverRegistry::new();
    registry
        .register("mem", &DriverOptions::new(), kv)
        .await
        .unwrap();
    Arc::new(registry)
}

async fn call(app: &Router, path: &str, body: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_unknown_driver_fails_every_volume_call() {
    let app = PluginAdapter::new(DriverResolver::by_name(registry().await, "ghost")).router();

    for method in ["Create", "Remove", "Name", "Get", "Mount", "Unmount", "Path"] {
        let (status, body) = call(
            &app,
            &format!("/VolumeDriver.{}", method),
            r#"{"Name":"vol1","ID":"c1"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", method);
        assert_eq!(
            body,
            json!({ "Err": "Failed to locate volume: Driver ghost not found" }),
            "{}",
            method
        );
    }

    // The handshake does not touch the driver.
    let (status, body) = call(&app, "/Plugin.Activate", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Implements"], json!(["VolumeDriver"]));
}

const VOLUME_DRIVER_ROUTES: [&str; 9] = [
    "Create",
    "Remove",
    "Get",
    "Name",
    "List",
    "Mount",
    "Unmount",
    "Path",
    "Capabilities",
];

#[tokio::test]
async fn test_malformed_json_rejected_on_every_route() {
    let registry = registry().await;
    let adapters = [
        PluginAdapter::new(DriverResolver::by_name(registry.clone(), "mem")).router(),
        PluginAdapter::new(DriverResolver::Bound(registry.lookup("mem").unwrap())).router(),
    ];

    for app in &adapters {
        for method in VOLUME_DRIVER_ROUTES {
            for malformed in ["{not json", "{\"Name\":", "[1,2"] {
                let (status, body) =
                    call(app, &format!("/VolumeDriver.{}", method), malformed).await;
                assert_eq!(status, StatusCode::BAD_REQUEST, "{} {:?}", method, malformed);
                let err = body["Err"].as_str().unwrap_or_default();
                assert!(
                    err.starts_with("Unable to decode JSON payload"),
                    "{} {:?}: {}",
                    method,
                    malformed,
                    body
                );
            }
        }
    }
}

#[tokio::test]
async fn test_oversized_body_rejected_in_band() {
    let app = PluginAdapter::new(DriverResolver::by_name(registry().await, "mem")).router();
    let oversized = format!(r#"{{"Name":"{}"}}"#, "v".repeat(2 * MAX_BODY_BYTES));

    for method in ["Create", "List"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/VolumeDriver.{}", method))
                    .body(Body::from(oversized.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", method);
        assert_eq!(
            response.headers()["content-type"],
            "application/vnd.docker.plugins.v1.2+json"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["Err"]
            .as_str()
            .unwrap()
            .starts_with("Unable to decode JSON payload"));
    }

    // The listener still serves ordinary requests afterwards.
    let (status, body) = call(&app, "/VolumeDriver.Create", r#"{"Name":"small"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_null_opts_accepted() {
    let app = PluginAdapter::new(DriverResolver::by_name(registry().await, "mem")).router();
    let (status, body) = call(&app, "/VolumeDriver.Create", r#"{"Name":"vol1","Opts":null}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_volume_lifecycle() {
    let registry = registry().await;
    let app = PluginAdapter::new(DriverResolver::Bound(registry.lookup("mem").unwrap())).router();

    call(&app, "/VolumeDriver.Create", r#"{"Name":"data","Opts":{"size":"1G"}}"#).await;

    let (_, body) = call(&app, "/VolumeDriver.Mount", r#"{"Name":"data","ID":"c1"}"#).await;
    let mountpoint = body["Mountpoint"].as_str().unwrap().to_string();
    assert!(mountpoint.ends_with("/data"));

    // Mounted volumes cannot be removed.
    let (status, body) = call(&app, "/VolumeDriver.Remove", r#"{"Name":"data"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["Err"].is_string());

    call(&app, "/VolumeDriver.Unmount", r#"{"Name":"data","ID":"c1"}"#).await;
    let (_, body) = call(&app, "/VolumeDriver.Remove", r#"{"Name":"data"}"#).await;
    assert_eq!(body, json!({}));

    let (_, body) = call(&app, "/VolumeDriver.List", "{}").await;
    assert_eq!(body["Volumes"], json!([]));
}
