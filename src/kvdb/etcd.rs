//! etcd v3 backed KV store

use super::{domain_key, strip_domain, KvAction, KvEvent, KvPair, KvStore, WATCH_BUFFER};
use crate::common::{Error, Result};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, WatchOptions};
use std::time::Duration;
use tokio::sync::mpsc;

/// URI scheme
pub const NAME: &str = "etcd";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct EtcdKv {
    domain: String,
    client: Client,
}

impl EtcdKv {
    /// Connect and verify the cluster answers before returning.
    pub async fn connect(endpoints: &[String], domain: &str) -> Result<Self> {
        let options = ConnectOptions::new()
            .with_connect_timeout(CONNECT_TIMEOUT)
            .with_timeout(CONNECT_TIMEOUT);
        let mut client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| Error::BackendUnavailable(format!("{:?}: {}", endpoints, e)))?;
        client
            .status()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("{:?}: {}", endpoints, e)))?;

        Ok(Self {
            domain: domain.to_string(),
            client,
        })
    }
}

#[async_trait]
impl KvStore for EtcdKv {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        client.put(domain_key(&self.domain, key), value, None).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let resp = client.get(domain_key(&self.domain, key), None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(domain_key(&self.domain, key), None).await?;
        Ok(())
    }

    async fn enumerate(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let mut client = self.client.clone();
        let resp = client
            .get(
                domain_key(&self.domain, prefix),
                Some(GetOptions::new().with_prefix()),
            )
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KvPair {
                key: strip_domain(&self.domain, &String::from_utf8_lossy(kv.key())).to_string(),
                value: kv.value().to_vec(),
            })
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<KvEvent>> {
        let mut client = self.client.clone();
        let full_prefix = domain_key(&self.domain, prefix);
        let (watcher, mut stream) = client
            .watch(full_prefix.clone(), Some(WatchOptions::new().with_prefix()))
            .await?;
        let domain = self.domain.clone();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        tokio::spawn(async move {
            // Dropping the watcher cancels the watch.
            let _watcher = watcher;
            loop {
                let resp = match stream.message().await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(prefix = %full_prefix, "etcd watch failed: {}", e);
                        break;
                    }
                };
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = String::from_utf8_lossy(kv.key());
                    let (action, value) = match event.event_type() {
                        EventType::Put => (KvAction::Set, Some(kv.value().to_vec())),
                        EventType::Delete => (KvAction::Delete, None),
                    };
                    let event = KvEvent {
                        action,
                        key: strip_domain(&domain, &key).to_string(),
                        value,
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
