//! Volume drivers
//!
//! A driver is a named backend implementing the volume lifecycle
//! (create, remove, inspect, mount). Drivers are built from the catalog in
//! [`new_driver`] and kept in the [`DriverRegistry`] for the lifetime of the
//! daemon.

pub mod mem;
pub mod registry;

pub use mem::MemDriver;
pub use registry::DriverRegistry;

use crate::common::{DriverOptions, Error, Result};
use crate::kvdb::KvHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Storage class a driver exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Block,
    File,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Block => write!(f, "block"),
            DriverKind::File => write!(f, "file"),
        }
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(DriverKind::Block),
            "file" => Ok(DriverKind::File),
            other => Err(Error::InvalidConfig(format!(
                "unknown driver kind {:?} (expected block or file)",
                other
            ))),
        }
    }
}

/// Identity of a registered driver. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeDriverDescriptor {
    pub name: String,
    pub kind: DriverKind,
    pub options: DriverOptions,
}

/// User-facing identity of a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocator {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl VolumeLocator {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }
}

/// Per-call create options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Fail instead of returning the existing volume when the name is taken
    #[serde(default)]
    pub fail_if_exists: bool,
}

/// Requested volume properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Size in bytes, 0 = driver default
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub format: Option<String>,
}

/// A volume as recorded by its driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub locator: VolumeLocator,
    pub spec: VolumeSpec,
    pub driver: String,
    pub ctime: DateTime<Utc>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// Callers holding the volume mounted
    #[serde(default)]
    pub mount_ids: Vec<String>,
}

/// Volume lifecycle operations every driver implements
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    fn descriptor(&self) -> &VolumeDriverDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn kind(&self) -> DriverKind {
        self.descriptor().kind
    }

    /// Create a volume and return its id. Creating a name that already
    /// exists returns the existing id unless `options.fail_if_exists`.
    async fn create(
        &self,
        locator: VolumeLocator,
        options: CreateOptions,
        spec: VolumeSpec,
    ) -> Result<String>;

    async fn remove(&self, name: &str) -> Result<()>;

    async fn inspect(&self, name: &str) -> Result<Volume>;

    async fn enumerate(&self) -> Result<Vec<Volume>>;

    /// Mount on behalf of `mount_id`, returning the mountpoint
    async fn mount(&self, name: &str, mount_id: &str) -> Result<String>;

    async fn unmount(&self, name: &str, mount_id: &str) -> Result<()>;
}

/// Built-in driver names
pub fn available_drivers() -> Vec<(&'static str, DriverKind)> {
    vec![(mem::NAME, DriverKind::File)]
}

/// Construct the driver registered under `name` in the catalog.
pub async fn new_driver(
    name: &str,
    options: &DriverOptions,
    kv: KvHandle,
) -> Result<Arc<dyn VolumeDriver>> {
    match name {
        mem::NAME => Ok(Arc::new(MemDriver::new(name, options.clone(), kv)?)),
        other => Err(Error::InvalidConfig(format!(
            "unknown volume driver {:?}, available: {:?}",
            other,
            available_drivers()
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_kind_parse() {
        assert_eq!("block".parse::<DriverKind>().unwrap(), DriverKind::Block);
        assert_eq!("FILE".parse::<DriverKind>().unwrap(), DriverKind::File);
        assert!("tape".parse::<DriverKind>().is_err());
    }

    #[test]
    fn test_descriptor_wire_format() {
        let descriptor = VolumeDriverDescriptor {
            name: "mem".into(),
            kind: DriverKind::Block,
            options: DriverOptions::new(),
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["Name"], "mem");
        assert_eq!(json["Kind"], "block");
    }
}
