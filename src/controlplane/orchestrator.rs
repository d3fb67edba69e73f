//! Volume Driver - The orchestrator
//!
//! Implements the eight volume plugin operations on top of:
//! - the Placement Resolver (option layering)
//! - the Resource Transaction Manager (cluster-wide lifecycle)
//! - the Local Attachment Manager (per-host lifecycle)
//! - the Mount/Resize Sequencer (local mount namespace)
//!
//! Every call re-derives its view from the controller and the mount table;
//! nothing is cached between calls.

use crate::controlplane::attachment::{HostAttachment, LocalAttachments};
use crate::controlplane::mount::MountSequencer;
use crate::controlplane::placement::VolumeParams;
use crate::controlplane::transaction::ResourceTransactions;
use crate::domain::ports::{ControllerClientRef, MounterRef};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Scope reported by the capabilities call
pub const SCOPE_GLOBAL: &str = "global";

// =============================================================================
// Driver Configuration
// =============================================================================

/// Configuration for the volume driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Name of this node in the LINSTOR cluster
    pub node: String,
    /// Directory holding the per-volume mount targets
    pub root: PathBuf,
    /// Option defaults from the configuration file
    pub defaults: BTreeMap<String, String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node: "localhost".to_string(),
            root: PathBuf::from("/var/lib/docker-volumes/linstor"),
            defaults: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Volume as seen by the plugin caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Reported mountpoint, empty unless currently mounted
    pub mountpoint: String,
}

/// Driver capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub scope: String,
}

// =============================================================================
// Volume Driver
// =============================================================================

/// Orchestrates volume lifecycle operations for one host
pub struct VolumeDriver {
    config: DriverConfig,
    transactions: ResourceTransactions,
    attachments: LocalAttachments,
    sequencer: MountSequencer,
}

impl VolumeDriver {
    /// Create a new driver
    pub fn new(config: DriverConfig, client: ControllerClientRef, mounter: MounterRef) -> Arc<Self> {
        let transactions = ResourceTransactions::new(client.clone(), config.node.clone());
        let attachments = LocalAttachments::new(client, mounter.clone(), config.node.clone());
        let sequencer = MountSequencer::new(mounter, config.root.clone());

        Arc::new(Self {
            config,
            transactions,
            attachments,
            sequencer,
        })
    }

    fn params(&self, options: Option<&BTreeMap<String, String>>) -> Result<VolumeParams> {
        VolumeParams::resolve(&self.config.defaults, options)
    }

    /// Create a volume cluster-wide
    pub async fn create(&self, name: &str, options: &BTreeMap<String, String>) -> Result<()> {
        let params = self.params(Some(options))?;
        self.transactions.create(name, &params).await
    }

    /// Look up a volume owned by this plugin
    pub async fn get(&self, name: &str) -> Result<VolumeInfo> {
        let definition = self.transactions.get_managed(name).await?;
        Ok(VolumeInfo {
            mountpoint: self.sequencer.mount_point(&definition.name).await,
            name: definition.name,
        })
    }

    /// List volumes owned by this plugin
    pub async fn list(&self) -> Result<Vec<VolumeInfo>> {
        let definitions = self.transactions.list_managed().await?;
        let mut volumes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            volumes.push(VolumeInfo {
                mountpoint: self.sequencer.mount_point(&definition.name).await,
                name: definition.name,
            });
        }
        Ok(volumes)
    }

    /// Remove a volume cluster-wide
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.transactions.remove_global(name).await
    }

    /// Reported mountpoint, without contacting the controller
    pub async fn path(&self, name: &str) -> String {
        self.sequencer.mount_point(name).await
    }

    /// Attach the volume to this host and mount it
    pub async fn mount(&self, name: &str) -> Result<PathBuf> {
        let params = self.params(None)?;
        let attachment = self.attachments.attach(name, &params).await?;
        debug!(
            volume = name,
            device = %attachment.device_path,
            previous = ?attachment.previous,
            "Volume attached"
        );
        self.sequencer
            .mount(name, &attachment, &params.mount_opts)
            .await
    }

    /// Unmount the volume and drop this host's diskless attachment
    pub async fn unmount(&self, name: &str) -> Result<()> {
        if !self.sequencer.unmount(name).await? {
            return Ok(());
        }

        match self.attachments.disk_state(name).await {
            Ok(HostAttachment::Diskless) => {
                info!(volume = name, node = %self.config.node, "Removing diskless attachment");
                self.transactions.remove_local(name).await
            }
            Ok(_) => Ok(()),
            Err(e) => {
                // keeping a stale diskless resource beats deleting a diskful one
                warn!(volume = name, error = %e, "Could not determine disk state, keeping resource");
                Ok(())
            }
        }
    }

    /// Capabilities of this driver
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: SCOPE_GLOBAL.to_string(),
        }
    }
}
