//! Resource Transaction Manager
//!
//! Drives the multi-step creation of a volume on the controller:
//!
//! 1. volume definition (size)
//! 2. resource definition (ownership marker, filesystem, DRBD tuning)
//! 3. replica placement (explicit node list or autoplace)
//!
//! A failed step triggers best-effort deletion of what the earlier steps
//! created. Rollback is not atomic: a crash in the middle of it can leave
//! orphaned definitions behind, and nothing reconciles them later.

use crate::controlplane::placement::{VolumeParams, PLUGIN_FLAG_KEY, PLUGIN_FLAG_VALUE};
use crate::domain::ports::{ControllerClientRef, ResourceDefinition, VolumeDefinition};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

/// Volume number of the single volume each definition carries
pub const VOLUME_NUMBER: i32 = 0;

// =============================================================================
// Cluster State
// =============================================================================

/// Cluster-wide state of a volume name, re-read from the controller on
/// every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    /// No resource definition with this name
    NotExist,
    /// A resource definition exists but was not created by this plugin
    Unmanaged(ResourceDefinition),
    /// A resource definition owned by this plugin
    Managed(ResourceDefinition),
}

/// Whether a resource definition carries the ownership marker
pub fn is_managed(definition: &ResourceDefinition) -> bool {
    definition.props.get(PLUGIN_FLAG_KEY).map(String::as_str) == Some(PLUGIN_FLAG_VALUE)
}

/// Step of the create sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailedStep {
    ResourceDefinition,
    Placement,
}

// =============================================================================
// Resource Transactions
// =============================================================================

/// Cluster-side half of the volume lifecycle
pub struct ResourceTransactions {
    client: ControllerClientRef,
    node: String,
}

impl ResourceTransactions {
    /// Create a transaction manager acting on behalf of `node`
    pub fn new(client: ControllerClientRef, node: impl Into<String>) -> Self {
        Self {
            client,
            node: node.into(),
        }
    }

    /// Create volume definition, resource definition and placements
    pub async fn create(&self, name: &str, params: &VolumeParams) -> Result<()> {
        info!(
            volume = name,
            size_kib = params.size_kib,
            fs = %params.fs,
            "Creating volume"
        );

        self.client
            .create_volume_definition(
                name,
                VolumeDefinition {
                    volume_number: None,
                    size_kib: params.size_kib,
                },
            )
            .await?;

        let definition = ResourceDefinition {
            name: name.to_string(),
            props: params.definition_props(),
        };
        if let Err(e) = self.client.create_resource_definition(definition).await {
            self.rollback(name, FailedStep::ResourceDefinition).await;
            return Err(e);
        }

        if let Err(e) = self.place(name, params).await {
            self.rollback(name, FailedStep::Placement).await;
            return Err(e);
        }

        info!(volume = name, "Volume created");
        Ok(())
    }

    /// Place replicas on the listed nodes, or let the controller choose
    async fn place(&self, name: &str, params: &VolumeParams) -> Result<()> {
        if params.nodes.is_empty() {
            debug!(volume = name, replicas = params.replicas, "Autoplacing volume");
            return self
                .client
                .autoplace(name, params.autoplace_request())
                .await;
        }

        for node in &params.nodes {
            debug!(volume = name, node = %node, "Placing diskfull replica");
            self.client
                .create_resource(params.diskfull_resource(name, node))
                .await?;
        }
        Ok(())
    }

    /// Undo earlier create steps. Failures are logged, never returned.
    async fn rollback(&self, name: &str, failed: FailedStep) {
        warn!(volume = name, step = ?failed, "Create failed, rolling back");

        if failed == FailedStep::Placement {
            if let Err(e) = self.client.delete_resource_definition(name).await {
                warn!(volume = name, error = %e, "Rollback: failed to delete resource definition");
            }
        }

        match self.client.delete_volume_definition(name, VOLUME_NUMBER).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(volume = name, "Rollback: volume definition already gone");
            }
            Err(e) => {
                warn!(volume = name, error = %e, "Rollback: failed to delete volume definition");
            }
        }
    }

    /// Current cluster-wide state of `name`
    pub async fn cluster_state(&self, name: &str) -> Result<ClusterState> {
        match self.client.get_resource_definition(name).await {
            Ok(definition) if is_managed(&definition) => Ok(ClusterState::Managed(definition)),
            Ok(definition) => Ok(ClusterState::Unmanaged(definition)),
            Err(e) if e.is_not_found() => Ok(ClusterState::NotExist),
            Err(e) => Err(e),
        }
    }

    /// Resource definition of a volume owned by this plugin
    pub async fn get_managed(&self, name: &str) -> Result<ResourceDefinition> {
        match self.cluster_state(name).await? {
            ClusterState::Managed(definition) => Ok(definition),
            ClusterState::Unmanaged(_) | ClusterState::NotExist => Err(Error::NotManaged {
                name: name.to_string(),
            }),
        }
    }

    /// All resource definitions owned by this plugin
    pub async fn list_managed(&self) -> Result<Vec<ResourceDefinition>> {
        let definitions = self.client.list_resource_definitions().await?;
        Ok(definitions.into_iter().filter(is_managed).collect())
    }

    /// Delete a volume owned by this plugin cluster-wide: snapshots first,
    /// then the definition
    pub async fn remove_global(&self, name: &str) -> Result<()> {
        self.get_managed(name).await?;
        info!(volume = name, "Removing volume");

        let snapshots = self.client.list_snapshots(name).await?;
        for snapshot in &snapshots {
            debug!(volume = name, snapshot = %snapshot.name, "Deleting snapshot");
            self.client.delete_snapshot(name, &snapshot.name).await?;
        }

        self.client.delete_resource_definition(name).await
    }

    /// Delete only this node's resource of a volume
    pub async fn remove_local(&self, name: &str) -> Result<()> {
        info!(volume = name, node = %self.node, "Removing local resource");
        self.client.delete_resource(name, &self.node).await
    }
}
