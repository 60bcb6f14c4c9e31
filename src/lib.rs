//! # osd
//!
//! Storage orchestration daemon. Hosts one or more volume drivers and
//! exposes each of them over:
//! - a native driver REST API (`/<driver>/Create`, `/Remove`, `/Name`)
//! - the container-runtime volume-plugin protocol (`/VolumeDriver.*`)
//! - a plugin management endpoint bound to the registered driver instance
//!
//! Driver state lives in a pluggable key-value store (`kv-mem`, `etcd`),
//! which optionally also carries cluster membership.
//!
//! ## Architecture
//!
//! ```text
//!                ┌─────────────────────────────┐
//!   config ────▶ │           Daemon            │
//!                │  KV store ─▶ cluster join   │
//!                │  DriverRegistry (frozen)    │
//!                └──┬──────────┬──────────┬────┘
//!                   │          │          │
//!             driver REST   plugin    plugin mgmt
//!             (by name)     (by name) (bound instance)
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run the daemon with an in-memory driver
//! osd --daemon --driver name=mem
//!
//! # Run from a config file against etcd
//! osd -d -f /etc/osd/config.yaml --kvdb etcd://127.0.0.1:2379
//!
//! # Talk to a running driver
//! osd volume --driver mem create vol1 --opt size=1G
//! ```

pub mod api;
pub mod cluster;
pub mod common;
pub mod daemon;
pub mod kvdb;
pub mod volume;

pub use common::{Config, Error, Result};
pub use daemon::{Daemon, RunningDaemon};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
