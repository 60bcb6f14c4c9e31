//! In-memory reference driver
//!
//! Keeps volume records in the KV store under `volumes/<driver>/<name>` and
//! hands out synthetic mountpoints below `mount_root`. No data path.

use super::{
    CreateOptions, DriverKind, Volume, VolumeDriver, VolumeDriverDescriptor, VolumeLocator,
    VolumeSpec,
};
use crate::common::{DriverOptions, Error, Result};
use crate::kvdb::KvHandle;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Catalog name
pub const NAME: &str = "mem";

pub const OPT_KIND: &str = "kind";
pub const OPT_MOUNT_ROOT: &str = "mount_root";

const DEFAULT_MOUNT_ROOT: &str = "/var/lib/osd/mounts";

pub struct MemDriver {
    descriptor: VolumeDriverDescriptor,
    mount_root: String,
    kv: KvHandle,
    /// Serializes read-modify-write cycles on volume records
    write_lock: Mutex<()>,
}

impl MemDriver {
    pub fn new(name: &str, options: DriverOptions, kv: KvHandle) -> Result<Self> {
        let kind = match options.get(OPT_KIND) {
            Some(kind) => kind.parse()?,
            None => DriverKind::File,
        };
        let mount_root = options
            .get(OPT_MOUNT_ROOT)
            .cloned()
            .unwrap_or_else(|| format!("{}/{}", DEFAULT_MOUNT_ROOT, name));

        Ok(Self {
            descriptor: VolumeDriverDescriptor {
                name: name.to_string(),
                kind,
                options,
            },
            mount_root,
            kv,
            write_lock: Mutex::new(()),
        })
    }

    fn prefix(&self) -> String {
        format!("volumes/{}/", self.descriptor.name)
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    async fn load(&self, name: &str) -> Result<Option<Volume>> {
        match self.kv.get(&self.key(name)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn load_existing(&self, name: &str) -> Result<Volume> {
        self.load(name)
            .await?
            .ok_or_else(|| Error::VolumeNotFound(name.to_string()))
    }

    async fn store(&self, volume: &Volume) -> Result<()> {
        let raw = serde_json::to_vec(volume)?;
        self.kv.put(&self.key(&volume.locator.name), raw).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::Other(format!("invalid volume name {:?}", name)));
    }
    Ok(())
}

#[async_trait]
impl VolumeDriver for MemDriver {
    fn descriptor(&self) -> &VolumeDriverDescriptor {
        &self.descriptor
    }

    async fn create(
        &self,
        locator: VolumeLocator,
        options: CreateOptions,
        spec: VolumeSpec,
    ) -> Result<String> {
        validate_name(&locator.name)?;
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.load(&locator.name).await? {
            if options.fail_if_exists {
                return Err(Error::Other(format!(
                    "volume {} already exists",
                    locator.name
                )));
            }
            return Ok(existing.id);
        }

        let volume = Volume {
            id: Uuid::new_v4().to_string(),
            locator,
            spec,
            driver: self.descriptor.name.clone(),
            ctime: chrono::Utc::now(),
            mountpoint: None,
            mount_ids: Vec::new(),
        };
        self.store(&volume).await?;
        tracing::info!(driver = %self.descriptor.name, volume = %volume.locator.name, id = %volume.id, "Volume created");
        Ok(volume.id)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let volume = self.load_existing(name).await?;
        if !volume.mount_ids.is_empty() {
            return Err(Error::Other(format!(
                "volume {} is mounted by {} caller(s)",
                name,
                volume.mount_ids.len()
            )));
        }
        self.kv.delete(&self.key(name)).await?;
        tracing::info!(driver = %self.descriptor.name, volume = %name, "Volume removed");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Volume> {
        self.load_existing(name).await
    }

    async fn enumerate(&self) -> Result<Vec<Volume>> {
        self.kv
            .enumerate(&self.prefix())
            .await?
            .into_iter()
            .map(|pair| serde_json::from_slice(&pair.value).map_err(Error::from))
            .collect()
    }

    async fn mount(&self, name: &str, mount_id: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let mut volume = self.load_existing(name).await?;
        let mountpoint = volume
            .mountpoint
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.mount_root, name));

        if !volume.mount_ids.iter().any(|id| id == mount_id) {
            volume.mount_ids.push(mount_id.to_string());
        }
        volume.mountpoint = Some(mountpoint.clone());
        self.store(&volume).await?;
        Ok(mountpoint)
    }

    async fn unmount(&self, name: &str, mount_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut volume = self.load_existing(name).await?;
        volume.mount_ids.retain(|id| id != mount_id);
        if volume.mount_ids.is_empty() {
            volume.mountpoint = None;
        }
        self.store(&volume).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvdb::{MemKv, KV_DOMAIN};
    use std::sync::Arc;

    fn driver() -> MemDriver {
        let kv: KvHandle = Arc::new(MemKv::new(KV_DOMAIN));
        let mut options = DriverOptions::new();
        options.insert(OPT_MOUNT_ROOT.into(), "/mnt/osd".into());
        MemDriver::new(NAME, options, kv).unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let driver = driver();
        let id1 = driver
            .create(VolumeLocator::named("vol1"), CreateOptions::default(), VolumeSpec::default())
            .await
            .unwrap();
        let id2 = driver
            .create(VolumeLocator::named("vol1"), CreateOptions::default(), VolumeSpec::default())
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let strict = CreateOptions {
            fail_if_exists: true,
        };
        assert!(driver
            .create(VolumeLocator::named("vol1"), strict, VolumeSpec::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mount_lifecycle() {
        let driver = driver();
        driver
            .create(VolumeLocator::named("vol1"), CreateOptions::default(), VolumeSpec::default())
            .await
            .unwrap();

        let mountpoint = driver.mount("vol1", "c1").await.unwrap();
        assert_eq!(mountpoint, "/mnt/osd/vol1");
        assert_eq!(driver.mount("vol1", "c2").await.unwrap(), mountpoint);

        // still mounted by c2
        driver.unmount("vol1", "c1").await.unwrap();
        assert!(driver.remove("vol1").await.is_err());

        driver.unmount("vol1", "c2").await.unwrap();
        assert_eq!(driver.inspect("vol1").await.unwrap().mountpoint, None);
        driver.remove("vol1").await.unwrap();

        let err = driver.inspect("vol1").await.unwrap_err();
        assert!(matches!(err, Error::VolumeNotFound(_)));
    }

    #[tokio::test]
    async fn test_enumerate() {
        let driver = driver();
        for name in ["a", "b", "c"] {
            driver
                .create(VolumeLocator::named(name), CreateOptions::default(), VolumeSpec::default())
                .await
                .unwrap();
        }
        let names: Vec<_> = driver
            .enumerate()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.locator.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_kind_option() {
        let kv: KvHandle = Arc::new(MemKv::new(KV_DOMAIN));
        let mut options = DriverOptions::new();
        options.insert(OPT_KIND.into(), "block".into());
        let driver = MemDriver::new(NAME, options.clone(), kv.clone()).unwrap();
        assert_eq!(driver.kind(), DriverKind::Block);

        options.insert(OPT_KIND.into(), "tape".into());
        assert!(MemDriver::new(NAME, options, kv).is_err());
    }

    #[tokio::test]
    async fn test_invalid_name() {
        let driver = driver();
        assert!(driver
            .create(VolumeLocator::named(""), CreateOptions::default(), VolumeSpec::default())
            .await
            .is_err());
    }
}
