//! Key-value coordination store
//!
//! The daemon talks to its coordination backend through [`KvStore`]. The
//! backend is chosen by URI scheme with [`new`]:
//! - `kv-mem://localhost`: in-process store ([`MemKv`])
//! - `etcd://host:port`: etcd v3 cluster ([`EtcdKv`])
//!
//! The selected handle is installed once per daemon into a [`KvSlot`] and
//! then passed explicitly to the cluster coordinator and to every driver.

pub mod etcd;
pub mod mem;

pub use etcd::EtcdKv;
pub use mem::MemKv;

use crate::common::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Key namespace for everything osd stores
pub const KV_DOMAIN: &str = "openstorage";

/// Capacity of a watch channel
pub const WATCH_BUFFER: usize = 64;

/// Shared handle to the coordination store
pub type KvHandle = Arc<dyn KvStore>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvAction {
    Set,
    Delete,
}

/// Change notification delivered by [`KvStore::watch`].
///
/// `key` is relative to the store's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
    pub action: KvAction,
    pub key: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

/// Trait for key-value coordination backends
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name (the URI scheme that selects it)
    fn name(&self) -> &'static str;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// All pairs whose key starts with `prefix`, in key order
    async fn enumerate(&self, prefix: &str) -> Result<Vec<KvPair>>;

    /// Stream of changes under `prefix`. The stream ends when the receiver
    /// is dropped or the backend goes away.
    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<KvEvent>>;
}

/// Supported datastores, by URI scheme
pub fn supported_datastores() -> Vec<&'static str> {
    vec![mem::NAME, etcd::NAME]
}

/// Split `scheme://address` into its parts.
fn parse_uri(uri: &str) -> Result<(&str, &str)> {
    match uri.split_once("://") {
        Some((scheme, address)) if !scheme.is_empty() && !address.is_empty() => {
            Ok((scheme, address.trim_end_matches('/')))
        }
        _ => Err(Error::BackendUnavailable(format!(
            "malformed kvdb uri {:?}, supported datastores: {:?}",
            uri,
            supported_datastores()
        ))),
    }
}

/// Select and connect the backend named by the URI scheme.
pub async fn new(uri: &str, domain: &str) -> Result<KvHandle> {
    let (scheme, address) = parse_uri(uri)?;
    tracing::info!(scheme, address, domain, "Initializing KVDB");

    match scheme {
        mem::NAME => Ok(Arc::new(MemKv::new(domain))),
        etcd::NAME => {
            let endpoint = format!("http://{}", address);
            let store = EtcdKv::connect(&[endpoint], domain).await?;
            Ok(Arc::new(store))
        }
        other => Err(Error::BackendUnavailable(format!(
            "unknown datastore {:?}, supported datastores: {:?}",
            other,
            supported_datastores()
        ))),
    }
}

/// Holds the daemon's KV handle. Installation succeeds exactly once.
#[derive(Default)]
pub struct KvSlot {
    handle: OnceCell<KvHandle>,
}

impl KvSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, handle: KvHandle) -> Result<()> {
        self.handle
            .set(handle)
            .map_err(|_| Error::AlreadyInitialized)
    }

    pub fn get(&self) -> Option<KvHandle> {
        self.handle.get().cloned()
    }
}

/// `domain/key`
pub(crate) fn domain_key(domain: &str, key: &str) -> String {
    format!("{}/{}", domain, key.trim_start_matches('/'))
}

/// Inverse of [`domain_key`]
pub(crate) fn strip_domain<'a>(domain: &str, key: &'a str) -> &'a str {
    key.strip_prefix(domain)
        .and_then(|k| k.strip_prefix('/'))
        .unwrap_or(key)
}
