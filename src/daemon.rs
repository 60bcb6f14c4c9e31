//! Daemon orchestrator
//!
//! Startup is strictly sequential and every step is fatal:
//!
//! 1. select the KV store and install it
//! 2. join the cluster, if configured
//! 3. for each driver: register it and bind its three listeners
//!    (driver REST, volume plugin, plugin management)
//! 4. freeze the registry and start serving
//!
//! No listener accepts traffic until the registry is complete.

use crate::api::{DriverResolver, PluginAdapter, RestServer};
use crate::cluster::{self, ClusterManager};
use crate::common::{OsdConfig, Result};
use crate::kvdb::{self, KvHandle, KvSlot, KV_DOMAIN};
use crate::volume::{DriverRegistry, VolumeDriver};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

/// Addresses one driver is served on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEndpoints {
    pub driver: String,
    /// Driver REST API
    pub rest: SocketAddr,
    /// Volume-plugin protocol, driver resolved by name
    pub plugin: SocketAddr,
    /// Plugin management, bound to the registered instance
    pub mgmt: SocketAddr,
}

struct BoundDriver {
    name: String,
    driver: Arc<dyn VolumeDriver>,
    rest: TcpListener,
    plugin: TcpListener,
    mgmt: TcpListener,
}

pub struct Daemon {
    config: OsdConfig,
    kv: KvSlot,
}

impl Daemon {
    pub fn new(config: OsdConfig) -> Self {
        Self {
            config,
            kv: KvSlot::new(),
        }
    }

    pub fn config(&self) -> &OsdConfig {
        &self.config
    }

    /// The KV store installed by [`Daemon::start`], if it has run
    pub fn kv(&self) -> Option<KvHandle> {
        self.kv.get()
    }

    /// Run the startup sequence. Fails with `AlreadyInitialized` if this
    /// daemon was already started.
    pub async fn start(&self) -> Result<RunningDaemon> {
        tracing::info!("Starting osd {}", crate::VERSION);
        tracing::info!("  KVDB: {}", self.config.kvdb);
        tracing::info!("  Drivers: {:?}", self.config.drivers.keys().collect::<Vec<_>>());

        let kv = kvdb::new(&self.config.kvdb, KV_DOMAIN).await?;
        self.kv.install(kv.clone())?;

        let cluster = cluster::bootstrap(&self.config.cluster, kv.clone()).await?;

        let (registry, bound) = self.start_drivers(kv).await?;
        let registry = Arc::new(registry);

        let mut servers = JoinSet::new();
        let mut endpoints = Vec::with_capacity(bound.len());
        for driver in bound {
            endpoints.push(DriverEndpoints {
                driver: driver.name.clone(),
                rest: driver.rest.local_addr()?,
                plugin: driver.plugin.local_addr()?,
                mgmt: driver.mgmt.local_addr()?,
            });

            let rest = RestServer::new(registry.clone(), driver.name.clone()).router();
            let plugin =
                PluginAdapter::new(DriverResolver::by_name(registry.clone(), driver.name.clone()))
                    .router();
            let mgmt = PluginAdapter::new(DriverResolver::Bound(driver.driver)).router();

            spawn_server(&mut servers, "driver", &driver.name, driver.rest, rest);
            spawn_server(&mut servers, "plugin", &driver.name, driver.plugin, plugin);
            spawn_server(&mut servers, "plugin-mgmt", &driver.name, driver.mgmt, mgmt);
        }

        for ep in &endpoints {
            tracing::info!(
                driver = %ep.driver,
                rest = %ep.rest,
                plugin = %ep.plugin,
                mgmt = %ep.mgmt,
                "✓ Volume driver ready"
            );
        }

        Ok(RunningDaemon {
            endpoints,
            registry,
            cluster,
            servers,
        })
    }

    /// Start and block forever.
    pub async fn serve(&self) -> Result<()> {
        self.start().await?.wait().await
    }

    async fn start_drivers(&self, kv: KvHandle) -> Result<(DriverRegistry, Vec<BoundDriver>)> {
        let api = &self.config.api;
        let mut registry = DriverRegistry::new();
        let mut bound = Vec::with_capacity(self.config.drivers.len());

        for (index, (name, options)) in self.config.drivers.iter().enumerate() {
            tracing::info!(driver = %name, "Starting volume driver");
            let driver = registry.register(name, options, kv.clone()).await?;

            let rest = bind("driver", name, api.driver_addr(index)?).await?;
            let plugin = bind("plugin", name, api.plugin_addr(index)?).await?;
            let mgmt = bind("plugin-mgmt", name, api.mgmt_addr(index)?).await?;

            bound.push(BoundDriver {
                name: name.clone(),
                driver,
                rest,
                plugin,
                mgmt,
            });
        }

        Ok((registry, bound))
    }
}

async fn bind(kind: &str, driver: &str, addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("unable to start {} server for {} on {}: {}", kind, driver, addr, e),
        )
        .into()
    })
}

fn spawn_server(
    servers: &mut JoinSet<()>,
    kind: &'static str,
    driver: &str,
    listener: TcpListener,
    router: Router,
) {
    let driver = driver.to_string();
    servers.spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(driver = %driver, server = kind, "Server error: {}", e);
        }
    });
}

/// A started daemon
pub struct RunningDaemon {
    endpoints: Vec<DriverEndpoints>,
    registry: Arc<DriverRegistry>,
    cluster: Option<Arc<ClusterManager>>,
    servers: JoinSet<()>,
}

impl RunningDaemon {
    pub fn endpoints(&self) -> &[DriverEndpoints] {
        &self.endpoints
    }

    pub fn endpoint(&self, driver: &str) -> Option<&DriverEndpoints> {
        self.endpoints.iter().find(|ep| ep.driver == driver)
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn cluster(&self) -> Option<&Arc<ClusterManager>> {
        self.cluster.as_ref()
    }

    /// Block forever. A listener that stops is logged; the process keeps
    /// running until it is terminated from outside.
    pub async fn wait(mut self) -> Result<()> {
        while let Some(res) = self.servers.join_next().await {
            if let Err(e) = res {
                tracing::error!("Server task failed: {}", e);
            }
        }
        tracing::warn!("All listeners stopped");
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ApiConfig, ClusterConfig, DriverOptions, Error};

    fn config(drivers: &[&str]) -> OsdConfig {
        OsdConfig {
            drivers: drivers
                .iter()
                .map(|d| (d.to_string(), DriverOptions::new()))
                .collect(),
            api: ApiConfig::ephemeral(),
            ..OsdConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_binds_three_listeners_per_driver() {
        let daemon = Daemon::new(config(&["mem"]));
        let running = daemon.start().await.unwrap();

        let ep = running.endpoint("mem").unwrap();
        assert_ne!(ep.rest.port(), 0);
        assert_ne!(ep.rest, ep.plugin);
        assert_ne!(ep.plugin, ep.mgmt);
        assert_eq!(running.registry().names(), vec!["mem".to_string()]);
        assert!(running.cluster().is_none());
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let daemon = Daemon::new(config(&["mem"]));
        let _running = daemon.start().await.unwrap();
        let installed = daemon.kv().unwrap();
        let err = daemon.start().await.err().unwrap();
        assert!(matches!(err, Error::AlreadyInitialized));
        assert!(err.is_fatal());
        assert!(Arc::ptr_eq(&daemon.kv().unwrap(), &installed));
    }

    #[tokio::test]
    async fn test_unknown_driver_aborts_startup() {
        let daemon = Daemon::new(config(&["mem", "nosuch"]));
        let err = daemon.start().await.err().unwrap();
        assert!(matches!(err, Error::DriverInit { .. }));
    }

    #[tokio::test]
    async fn test_bad_kvdb_aborts_startup() {
        let daemon = Daemon::new(OsdConfig {
            kvdb: "consul://localhost:8500".into(),
            ..config(&["mem"])
        });
        let err = daemon.start().await.err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cluster_joined_when_configured() {
        let daemon = Daemon::new(OsdConfig {
            cluster: ClusterConfig::new("node-1", "cluster-a"),
            ..config(&["mem"])
        });
        let running = daemon.start().await.unwrap();
        let cluster = running.cluster().unwrap();
        assert_eq!(cluster.node_id(), "node-1");
        assert_eq!(cluster.cluster_id(), "cluster-a");
    }
}
