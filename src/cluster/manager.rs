//! KV-backed cluster membership coordinator

use crate::common::{ClusterConfig, Error, Result};
use crate::kvdb::{KvAction, KvEvent, KvHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Base heartbeat period; each tick adds up to 20% jitter
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A node not seen for this long is reported as down
pub const NODE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Up,
    Down,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Up => write!(f, "up"),
            NodeStatus::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub cluster_id: String,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,
}

impl NodeInfo {
    /// Status as observed at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> NodeStatus {
        let age = now.signed_duration_since(self.last_seen);
        match age.to_std() {
            Ok(age) if age > NODE_TIMEOUT => NodeStatus::Down,
            _ => self.status,
        }
    }
}

type Membership = Arc<RwLock<BTreeMap<String, NodeInfo>>>;

pub struct ClusterManager {
    config: ClusterConfig,
    kv: KvHandle,
    nodes: Membership,
    tasks: Vec<JoinHandle<()>>,
}

fn info_key(cluster_id: &str) -> String {
    format!("cluster/{}/info", cluster_id)
}

fn nodes_prefix(cluster_id: &str) -> String {
    format!("cluster/{}/nodes/", cluster_id)
}

fn node_key(cluster_id: &str, node_id: &str) -> String {
    format!("{}{}", nodes_prefix(cluster_id), node_id)
}

fn validate_id(what: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') {
        return Err(Error::ClusterInit(format!("invalid {} {:?}", what, id)));
    }
    Ok(())
}

impl ClusterManager {
    /// Join the cluster: record cluster info, register this node, load the
    /// current membership and start the heartbeat and watch tasks.
    pub async fn start(config: ClusterConfig, kv: KvHandle) -> Result<Self> {
        validate_id("node id", &config.node_id)?;
        validate_id("cluster id", &config.cluster_id)?;
        tracing::info!(node = %config.node_id, cluster = %config.cluster_id, "Joining cluster");

        let info = match kv.get(&info_key(&config.cluster_id)).await? {
            Some(raw) => {
                let info: ClusterInfo = serde_json::from_slice(&raw)?;
                if info.cluster_id != config.cluster_id {
                    return Err(Error::ClusterInit(format!(
                        "cluster info mismatch: found {}, expected {}",
                        info.cluster_id, config.cluster_id
                    )));
                }
                info
            }
            None => {
                let info = ClusterInfo {
                    cluster_id: config.cluster_id.clone(),
                    created: Utc::now(),
                };
                kv.put(&info_key(&config.cluster_id), serde_json::to_vec(&info)?)
                    .await?;
                tracing::info!(cluster = %config.cluster_id, "Created cluster");
                info
            }
        };

        // Subscribe before registering so our own join is observed.
        let events = kv.watch(&nodes_prefix(&config.cluster_id)).await?;

        let nodes: Membership = Arc::new(RwLock::new(BTreeMap::new()));
        for pair in kv.enumerate(&nodes_prefix(&config.cluster_id)).await? {
            match serde_json::from_slice::<NodeInfo>(&pair.value) {
                Ok(node) => {
                    nodes.write().await.insert(node.node_id.clone(), node);
                }
                Err(e) => tracing::warn!(key = %pair.key, "Skipping unreadable node record: {}", e),
            }
        }

        let me = heartbeat_record(&config);
        kv.put(
            &node_key(&config.cluster_id, &config.node_id),
            serde_json::to_vec(&me)?,
        )
        .await?;
        nodes.write().await.insert(me.node_id.clone(), me);

        let tasks = vec![
            spawn_membership_watch(config.cluster_id.clone(), events, nodes.clone()),
            spawn_heartbeat(config.clone(), kv.clone()),
        ];

        tracing::info!(
            node = %config.node_id,
            cluster = %info.cluster_id,
            members = nodes.read().await.len(),
            "Cluster joined"
        );

        Ok(Self {
            config,
            kv,
            nodes,
            tasks,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn cluster_id(&self) -> &str {
        &self.config.cluster_id
    }

    pub fn kv(&self) -> &KvHandle {
        &self.kv
    }

    /// Current membership view, with staleness applied
    pub async fn nodes(&self) -> Vec<NodeInfo> {
        let now = Utc::now();
        self.nodes
            .read()
            .await
            .values()
            .map(|node| NodeInfo {
                status: node.status_at(now),
                ..node.clone()
            })
            .collect()
    }
}

impl Drop for ClusterManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn heartbeat_record(config: &ClusterConfig) -> NodeInfo {
    NodeInfo {
        node_id: config.node_id.clone(),
        cluster_id: config.cluster_id.clone(),
        status: NodeStatus::Up,
        last_seen: Utc::now(),
    }
}

fn spawn_heartbeat(config: ClusterConfig, kv: KvHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let key = node_key(&config.cluster_id, &config.node_id);
        loop {
            let jitter = rand::random::<u64>() % (HEARTBEAT_INTERVAL.as_millis() as u64 / 5);
            tokio::time::sleep(HEARTBEAT_INTERVAL + Duration::from_millis(jitter)).await;

            let record = match serde_json::to_vec(&heartbeat_record(&config)) {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!("Failed to encode heartbeat: {}", e);
                    continue;
                }
            };
            if let Err(e) = kv.put(&key, record).await {
                tracing::warn!(node = %config.node_id, "Heartbeat failed: {}", e);
            }
        }
    })
}

fn spawn_membership_watch(
    cluster_id: String,
    mut events: mpsc::Receiver<KvEvent>,
    nodes: Membership,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let prefix = nodes_prefix(&cluster_id);
        while let Some(event) = events.recv().await {
            let node_id = event
                .key
                .strip_prefix(&prefix)
                .unwrap_or(&event.key)
                .to_string();
            apply_event(&nodes, node_id, event).await;
        }
        tracing::warn!(cluster = %cluster_id, "Membership watch ended");
    })
}

async fn apply_event(nodes: &Membership, node_id: String, event: KvEvent) {
    match event.action {
        KvAction::Set => {
            let Some(raw) = event.value else { return };
            match serde_json::from_slice::<NodeInfo>(&raw) {
                Ok(node) => {
                    if nodes.write().await.insert(node_id.clone(), node).is_none() {
                        tracing::info!(node = %node_id, "Node joined");
                    }
                }
                Err(e) => tracing::warn!(node = %node_id, "Unreadable node record: {}", e),
            }
        }
        KvAction::Delete => {
            if nodes.write().await.remove(&node_id).is_some() {
                tracing::info!(node = %node_id, "Node left");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvdb::{MemKv, KV_DOMAIN};

    #[tokio::test]
    async fn test_two_nodes_see_each_other() {
        let kv: KvHandle = Arc::new(MemKv::new(KV_DOMAIN));
        let n1 = ClusterManager::start(ClusterConfig::new("n1", "c1"), kv.clone())
            .await
            .unwrap();
        let n2 = ClusterManager::start(ClusterConfig::new("n2", "c1"), kv.clone())
            .await
            .unwrap();

        // n2 loaded n1 at start; n1 learns about n2 through the watch.
        let ids: Vec<_> = n2.nodes().await.into_iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec!["n1", "n2"]);

        assert_eq!(wait_for_members(&n1, 2).await, 2);
    }

    async fn wait_for_members(manager: &ClusterManager, expected: usize) -> usize {
        let mut seen = 0;
        for _ in 0..50 {
            seen = manager.nodes().await.len();
            if seen == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        seen
    }

    #[tokio::test]
    async fn test_node_removal_is_observed() {
        let kv: KvHandle = Arc::new(MemKv::new(KV_DOMAIN));
        let n1 = ClusterManager::start(ClusterConfig::new("n1", "c1"), kv.clone())
            .await
            .unwrap();
        kv.put(
            &node_key("c1", "n9"),
            serde_json::to_vec(&heartbeat_record(&ClusterConfig::new("n9", "c1"))).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(wait_for_members(&n1, 2).await, 2);

        kv.delete(&node_key("c1", "n9")).await.unwrap();
        assert_eq!(wait_for_members(&n1, 1).await, 1);
        assert_eq!(n1.nodes().await[0].node_id, "n1");
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let kv: KvHandle = Arc::new(MemKv::new(KV_DOMAIN));
        let err = ClusterManager::start(ClusterConfig::new("a/b", "c1"), kv)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ClusterInit(_)));
    }

    #[test]
    fn test_stale_node_reported_down() {
        let node = NodeInfo {
            node_id: "n1".into(),
            cluster_id: "c1".into(),
            status: NodeStatus::Up,
            last_seen: Utc::now() - chrono::Duration::seconds(60),
        };
        assert_eq!(node.status_at(Utc::now()), NodeStatus::Down);
        assert_eq!(node.status_at(node.last_seen), NodeStatus::Up);
    }
}
