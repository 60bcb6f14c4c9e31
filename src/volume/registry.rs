//! Driver registry: driver name → driver instance
//!
//! Populated through `&mut self` during daemon startup, then frozen in an
//! `Arc` and shared read-only by every request handler.

use super::{new_driver, VolumeDriver};
use crate::common::{DriverOptions, Error, Result};
use crate::kvdb::KvHandle;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn VolumeDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct the driver `name` from the catalog and register it.
    pub async fn register(
        &mut self,
        name: &str,
        options: &DriverOptions,
        kv: KvHandle,
    ) -> Result<Arc<dyn VolumeDriver>> {
        if self.drivers.contains_key(name) {
            return Err(Error::DriverInit {
                name: name.to_string(),
                reason: "driver already registered".to_string(),
            });
        }
        let driver = new_driver(name, options, kv)
            .await
            .map_err(|e| Error::DriverInit {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        self.insert(driver.clone())?;
        Ok(driver)
    }

    /// Register an already constructed driver under its own name.
    pub fn insert(&mut self, driver: Arc<dyn VolumeDriver>) -> Result<()> {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            return Err(Error::DriverInit {
                name,
                reason: "driver already registered".to_string(),
            });
        }
        self.drivers.insert(name, driver);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn VolumeDriver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvdb::{MemKv, KV_DOMAIN};

    fn kv() -> KvHandle {
        Arc::new(MemKv::new(KV_DOMAIN))
    }

    #[tokio::test]
    async fn test_lookup_returns_registered_instance() {
        let mut registry = DriverRegistry::new();
        let driver = registry
            .register("mem", &DriverOptions::new(), kv())
            .await
            .unwrap();

        let found = registry.lookup("mem").unwrap();
        assert!(Arc::ptr_eq(&driver, &found));
        assert_eq!(registry.names(), vec!["mem".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_first() {
        let mut registry = DriverRegistry::new();
        let first = registry
            .register("mem", &DriverOptions::new(), kv())
            .await
            .unwrap();

        let mut options = DriverOptions::new();
        options.insert("kind".into(), "block".into());
        let err = registry.register("mem", &options, kv()).await.err().unwrap();
        assert!(matches!(err, Error::DriverInit { .. }));

        let found = registry.lookup("mem").unwrap();
        assert!(Arc::ptr_eq(&first, &found));
        assert_eq!(found.kind(), crate::volume::DriverKind::File);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let mut registry = DriverRegistry::new();
        let err = registry
            .register("ghost", &DriverOptions::new(), kv())
            .await
            .err()
            .unwrap();
        match err {
            Error::DriverInit { name, .. } => assert_eq!(name, "ghost"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(registry.is_empty());
        assert!(matches!(
            registry.lookup("ghost").err().unwrap(),
            Error::DriverNotFound(_)
        ));
    }
}
