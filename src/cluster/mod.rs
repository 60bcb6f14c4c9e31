//! Cluster membership
//!
//! When both `node_id` and `cluster_id` are configured the daemon joins a
//! cluster whose state lives in the KV store:
//!
//! ```text
//! cluster/<cluster_id>/info              ClusterInfo, written once
//! cluster/<cluster_id>/nodes/<node_id>   NodeInfo, refreshed by heartbeat
//! ```
//!
//! Every member watches the nodes prefix and keeps a local membership view.

pub mod manager;

pub use manager::{ClusterInfo, ClusterManager, NodeInfo, NodeStatus};

use crate::common::{ClusterConfig, Error, Result};
use crate::kvdb::KvHandle;
use std::sync::Arc;

/// Start the cluster coordinator if the configuration asks for one.
///
/// Returns `Ok(None)` without touching the KV store when either id is
/// empty. Any failure to join is reported as [`Error::ClusterInit`].
pub async fn bootstrap(
    config: &ClusterConfig,
    kv: KvHandle,
) -> Result<Option<Arc<ClusterManager>>> {
    if !config.is_enabled() {
        tracing::info!("Cluster disabled (node_id and cluster_id not both set)");
        return Ok(None);
    }

    let manager = ClusterManager::start(config.clone(), kv)
        .await
        .map_err(|e| match e {
            Error::ClusterInit(_) => e,
            other => Error::ClusterInit(other.to_string()),
        })?;
    Ok(Some(Arc::new(manager)))
}
