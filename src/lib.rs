//! LINSTOR Docker Volume Plugin
//!
//! A Docker volume plugin that provisions replicated block volumes on a
//! LINSTOR cluster and mounts them on the local host.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │              Docker Plugin API (Unix socket / TCP)                     │
//! │     /Plugin.Activate   /VolumeDriver.{Create,Mount,Unmount,...}        │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │                         Volume Driver                                  │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌─────────────────────────┐  │
//! │  │  Placement   │  │    Resource      │  │   Local Attachments     │  │
//! │  │  Resolver    │  │  Transactions    │  │   + Mount Sequencer     │  │
//! │  └──────────────┘  └────────┬─────────┘  └────────────┬────────────┘  │
//! ├─────────────────────────────┼─────────────────────────┼───────────────┤
//! │                   ┌─────────┴─────────┐     ┌─────────┴─────────┐     │
//! │                   │ ControllerClient  │     │     Mounter       │     │
//! │                   │  (LINSTOR REST)   │     │ (mount, blockdev) │     │
//! │                   └───────────────────┘     └───────────────────┘     │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Volume driver, lifecycle managers, plugin API
//! - [`host`]: Local mount namespace adapter
//! - [`config`]: Configuration file loading
//! - [`metrics`]: Prometheus metrics
//! - [`domain`]: Core domain types and port traits
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod host;
pub mod metrics;

// Re-export commonly used types
pub use config::{ConnectionOverrides, PluginConfig, DEFAULT_CONFIG_PATH};

pub use controlplane::{
    BackendFactory, ConnectionConfig, DriverConfig, LinstorClient, Listen, PluginRouter,
    PluginServer, PluginServerConfig, VolumeDriver, VolumeInfo,
};

pub use domain::ports::{ControllerClient, ControllerClientRef, Mounter, MounterRef};

pub use error::{Error, ErrorKind, Result};

pub use host::SystemMounter;

pub use metrics::PluginMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
