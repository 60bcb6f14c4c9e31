//! In-memory KV store (default)

use super::{domain_key, strip_domain, KvAction, KvEvent, KvPair, KvStore, WATCH_BUFFER};
use crate::common::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc, RwLock};

/// URI scheme
pub const NAME: &str = "kv-mem";

pub struct MemKv {
    domain: String,
    map: RwLock<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<KvEvent>,
}

impl MemKv {
    pub fn new(domain: &str) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            domain: domain.to_string(),
            map: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn notify(&self, action: KvAction, key: &str, value: Option<Vec<u8>>) {
        // No subscribers is fine.
        let _ = self.events.send(KvEvent {
            action,
            key: key.to_string(),
            value,
        });
    }
}

#[async_trait]
impl KvStore for MemKv {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let full_key = domain_key(&self.domain, key);
        // Notify under the write lock so watchers see writes in map order.
        let mut map = self.map.write().await;
        map.insert(full_key.clone(), value.clone());
        self.notify(KvAction::Set, strip_domain(&self.domain, &full_key), Some(value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = domain_key(&self.domain, key);
        Ok(self.map.read().await.get(&full_key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = domain_key(&self.domain, key);
        let mut map = self.map.write().await;
        if map.remove(&full_key).is_some() {
            self.notify(KvAction::Delete, strip_domain(&self.domain, &full_key), None);
        }
        Ok(())
    }

    async fn enumerate(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let full_prefix = domain_key(&self.domain, prefix);
        let map = self.map.read().await;
        Ok(map
            .range(full_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&full_prefix))
            .map(|(k, v)| KvPair {
                key: strip_domain(&self.domain, k).to_string(),
                value: v.clone(),
            })
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<KvEvent>> {
        let prefix = strip_domain(&self.domain, &domain_key(&self.domain, prefix)).to_string();
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !event.key.starts_with(&prefix) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(prefix = %prefix, skipped, "KV watch lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
