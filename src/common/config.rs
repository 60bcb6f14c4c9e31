//! Configuration for the osd daemon

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Default KV store URI
pub const DEFAULT_KVDB: &str = "kv-mem://localhost";

/// Environment prefix for overrides (`OSD__OSD__KVDB=...`)
pub const ENV_PREFIX: &str = "OSD";

/// Per-driver options, keyed by option name
pub type DriverOptions = BTreeMap<String, String>;

/// Root of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub osd: OsdConfig,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsdConfig {
    /// KV store URI (`kv-mem://localhost`, `etcd://host:port`)
    #[serde(default = "default_kvdb")]
    pub kvdb: String,

    /// Optional cluster membership
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Volume drivers to start, keyed by driver name
    #[serde(default)]
    pub drivers: BTreeMap<String, DriverOptions>,

    /// Listener addresses
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_kvdb() -> String {
    DEFAULT_KVDB.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            kvdb: default_kvdb(),
            cluster: ClusterConfig::default(),
            drivers: BTreeMap::new(),
            api: ApiConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Cluster identity. The cluster subsystem runs only when both ids are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default, alias = "NodeId", alias = "nodeid")]
    pub node_id: String,

    #[serde(default, alias = "ClusterId", alias = "clusterid")]
    pub cluster_id: String,
}

impl ClusterConfig {
    pub fn new(node_id: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            cluster_id: cluster_id.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.node_id.is_empty() && !self.cluster_id.is_empty()
    }
}

/// Listener configuration.
///
/// Driver `i` (in name order) binds `<port> + i` for each server kind.
/// A port of 0 asks the OS for an ephemeral port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Driver REST server
    #[serde(default = "default_driver_port")]
    pub driver_port: u16,

    /// Volume-plugin protocol adapter
    #[serde(default = "default_plugin_port")]
    pub plugin_port: u16,

    /// Plugin management adapter
    #[serde(default = "default_mgmt_port")]
    pub mgmt_port: u16,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_driver_port() -> u16 {
    9100
}
fn default_plugin_port() -> u16 {
    9200
}
fn default_mgmt_port() -> u16 {
    9300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            driver_port: default_driver_port(),
            plugin_port: default_plugin_port(),
            mgmt_port: default_mgmt_port(),
        }
    }
}

impl ApiConfig {
    /// All listeners on ephemeral ports
    pub fn ephemeral() -> Self {
        Self {
            host: default_host(),
            driver_port: 0,
            plugin_port: 0,
            mgmt_port: 0,
        }
    }

    pub fn driver_addr(&self, index: usize) -> Result<SocketAddr> {
        self.addr(self.driver_port, index)
    }

    pub fn plugin_addr(&self, index: usize) -> Result<SocketAddr> {
        self.addr(self.plugin_port, index)
    }

    pub fn mgmt_addr(&self, index: usize) -> Result<SocketAddr> {
        self.addr(self.mgmt_port, index)
    }

    fn addr(&self, base: u16, index: usize) -> Result<SocketAddr> {
        if base == 0 {
            return Ok(SocketAddr::new(self.host, 0));
        }
        let port = u16::try_from(index)
            .ok()
            .and_then(|offset| base.checked_add(offset))
            .ok_or_else(|| {
                Error::InvalidConfig(format!("port {} + {} out of range", base, index))
            })?;
        Ok(SocketAddr::new(self.host, port))
    }
}

impl Config {
    /// Load configuration from a TOML or YAML file (by extension), then apply
    /// `OSD__...` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InvalidConfig(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.osd.drivers.keys() {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(Error::InvalidConfig(format!(
                    "invalid driver name {:?}",
                    name
                )));
            }
        }
        if self.osd.kvdb.is_empty() {
            return Err(Error::InvalidConfig("empty kvdb uri".into()));
        }
        Ok(())
    }
}

/// Parse a `--driver` argument: `name=btrfs,root_vol=/var/openstorage/btrfs`.
pub fn parse_driver_arg(arg: &str) -> Result<(String, DriverOptions)> {
    let mut name = None;
    let mut options = DriverOptions::new();
    for part in arg.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| Error::InvalidConfig(format!("expected key=value, got {:?}", part)))?;
        if key == "name" {
            name = Some(value.to_string());
        } else {
            options.insert(key.to_string(), value.to_string());
        }
    }
    match name {
        Some(name) if !name.is_empty() => Ok((name, options)),
        _ => Err(Error::InvalidConfig(format!(
            "driver argument {:?} is missing name=",
            arg
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("osd.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[osd]
kvdb = "kv-mem://localhost"

[osd.cluster]
node_id = "node-1"
cluster_id = "cluster-a"

[osd.api]
driver_port = 0

[osd.drivers.mem]
kind = "block"
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.osd.kvdb, DEFAULT_KVDB);
        assert!(config.osd.cluster.is_enabled());
        assert_eq!(config.osd.api.driver_port, 0);
        assert_eq!(config.osd.api.plugin_port, 9200);
        assert_eq!(config.osd.drivers["mem"]["kind"], "block");
    }

    #[test]
    fn test_load_yaml_with_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("osd.yaml");
        std::fs::write(
            &path,
            "osd:\n  cluster:\n    nodeid: n1\n  drivers:\n    mem:\n      kind: file\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.osd.cluster.node_id, "n1");
        assert!(!config.osd.cluster.is_enabled());
        assert!(config.osd.drivers.contains_key("mem"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/osd.toml")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_driver_arg() {
        let (name, opts) = parse_driver_arg("name=btrfs,root_vol=/var/openstorage/btrfs").unwrap();
        assert_eq!(name, "btrfs");
        assert_eq!(opts["root_vol"], "/var/openstorage/btrfs");

        assert!(parse_driver_arg("root_vol=/x").is_err());
        assert!(parse_driver_arg("name").is_err());
    }

    #[test]
    fn test_port_layout() {
        let api = ApiConfig::default();
        assert_eq!(api.driver_addr(2).unwrap().port(), 9102);
        assert_eq!(api.mgmt_addr(0).unwrap().port(), 9300);
        assert_eq!(ApiConfig::ephemeral().plugin_addr(5).unwrap().port(), 0);

        let api = ApiConfig {
            driver_port: u16::MAX,
            ..ApiConfig::default()
        };
        assert!(api.driver_addr(1).is_err());
    }

    #[test]
    fn test_driver_names_validated() {
        let mut config = Config::default();
        config.osd.drivers.insert("nfs-v4.1_a".into(), DriverOptions::new());
        assert!(config.validate().is_ok());

        for bad in ["", "a/b", "with space"] {
            let mut config = Config::default();
            config.osd.drivers.insert(bad.into(), DriverOptions::new());
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }
}
