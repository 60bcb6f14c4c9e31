//! Wire types for the plugin protocol and the driver REST API
//!
//! Field names are PascalCase on the wire. Optional response fields are
//! omitted when absent, so a bare success encodes as `{}`.

use crate::common::DriverOptions;
use crate::volume::{DriverKind, Volume, VolumeDriverDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability announced in the plugin handshake
pub const VOLUME_DRIVER: &str = "VolumeDriver";

/// Content type of plugin protocol responses
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeResponse {
    pub implements: Vec<String>,
}

impl Default for HandshakeResponse {
    fn default() -> Self {
        Self {
            implements: vec![VOLUME_DRIVER.to_string()],
        }
    }
}

/// Request body of every `/VolumeDriver.*` route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginRequest {
    #[serde(default)]
    pub name: String,
    /// The host may send `null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<DriverOptions>,
    /// Caller id for Mount/Unmount
    #[serde(default, rename = "ID", skip_serializing_if = "String::is_empty")]
    pub id: String,
}

impl PluginRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginVolume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    #[serde(default)]
    pub status: BTreeMap<String, serde_json::Value>,
}

impl From<&Volume> for PluginVolume {
    fn from(volume: &Volume) -> Self {
        let mut status = BTreeMap::new();
        status.insert("Id".to_string(), serde_json::Value::from(volume.id.clone()));
        status.insert(
            "MountCount".to_string(),
            serde_json::Value::from(volume.mount_ids.len()),
        );
        Self {
            name: volume.locator.name.clone(),
            mountpoint: volume.mountpoint.clone(),
            created_at: volume.ctime.to_rfc3339(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

/// Response body of every `/VolumeDriver.*` route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<PluginVolume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<PluginVolume>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<VolumeDriverDescriptor>,
}

impl PluginResponse {
    pub fn error(err: impl Into<String>) -> Self {
        Self {
            err: Some(err.into()),
            ..Default::default()
        }
    }

    pub fn mountpoint(mountpoint: impl Into<String>) -> Self {
        Self {
            mountpoint: Some(mountpoint.into()),
            ..Default::default()
        }
    }
}

/// Request body of the driver REST API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DriverRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<DriverOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RemoveResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NameResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<DriverKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Responses that can carry an in-band error
pub trait ErrResponse: Serialize + Default {
    fn with_err(err: String) -> Self;
}

impl ErrResponse for PluginResponse {
    fn with_err(err: String) -> Self {
        Self::error(err)
    }
}

impl ErrResponse for CreateResponse {
    fn with_err(err: String) -> Self {
        Self {
            err: Some(err),
            ..Default::default()
        }
    }
}

impl ErrResponse for RemoveResponse {
    fn with_err(err: String) -> Self {
        Self { err: Some(err) }
    }
}

impl ErrResponse for NameResponse {
    fn with_err(err: String) -> Self {
        Self {
            err: Some(err),
            ..Default::default()
        }
    }
}
