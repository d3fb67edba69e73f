//! Domain Ports - Core trait definitions for the volume plugin
//!
//! These traits define the boundaries between the lifecycle logic and the
//! two external systems it drives: the LINSTOR controller and the local
//! mount namespace. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Well-known Keys
// =============================================================================

/// Property selecting the storage pool of a single resource
pub const KEY_STOR_POOL_NAME: &str = "StorPoolName";

/// Resource flag requesting a diskless placement
pub const FLAG_DISKLESS: &str = "DISKLESS";

/// Provider kind reported for volumes without a local data copy
pub const PROVIDER_DISKLESS: &str = "DISKLESS";

// =============================================================================
// Controller Objects
// =============================================================================

/// Cluster-wide resource definition, one per volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

/// Volume definition carrying the provisioned size
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_number: Option<i32>,
    pub size_kib: u64,
}

/// Placement of a resource on one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub node_name: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl Resource {
    /// Whether the resource was requested without a local data copy
    pub fn is_diskless(&self) -> bool {
        self.flags.iter().any(|f| f == FLAG_DISKLESS)
    }
}

/// Volume instance of a resource on one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub volume_number: i32,
    #[serde(default)]
    pub provider_kind: String,
    #[serde(default)]
    pub device_path: String,
}

impl Volume {
    /// Whether this instance has no physical backing on its node
    pub fn is_diskless(&self) -> bool {
        self.provider_kind == PROVIDER_DISKLESS
    }
}

/// Resource including its volumes, as returned by the resource view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceWithVolumes {
    pub name: String,
    pub node_name: String,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

/// Snapshot of a resource definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    #[serde(default)]
    pub resource_name: String,
}

/// Constraints for automatic replica placement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSelectFilter {
    pub place_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_pool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_place_with_rsc_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replicas_on_same: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replicas_on_different: Vec<String>,
}

/// Automatic placement request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPlaceRequest {
    pub diskless_on_remaining: bool,
    pub select_filter: AutoSelectFilter,
}

// =============================================================================
// Controller Client Port
// =============================================================================

/// Port for the LINSTOR controller API.
///
/// Implementations must report a missing object as
/// [`Error::NotFound`](crate::error::Error::NotFound) so callers can tell
/// "does not exist" apart from a failed request.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn create_volume_definition(
        &self,
        resource: &str,
        definition: VolumeDefinition,
    ) -> Result<()>;

    async fn delete_volume_definition(&self, resource: &str, volume_number: i32) -> Result<()>;

    async fn create_resource_definition(&self, definition: ResourceDefinition) -> Result<()>;

    async fn get_resource_definition(&self, name: &str) -> Result<ResourceDefinition>;

    async fn list_resource_definitions(&self) -> Result<Vec<ResourceDefinition>>;

    async fn delete_resource_definition(&self, name: &str) -> Result<()>;

    async fn create_resource(&self, resource: Resource) -> Result<()>;

    async fn get_resource(&self, name: &str, node: &str) -> Result<Resource>;

    async fn delete_resource(&self, name: &str, node: &str) -> Result<()>;

    /// Fetch one volume instance of a resource on a node
    async fn get_volume(&self, name: &str, node: &str, volume_number: i32) -> Result<Volume>;

    /// Resource view filtered to one resource on one node, volumes included
    async fn resource_view(&self, name: &str, node: &str) -> Result<Vec<ResourceWithVolumes>>;

    async fn list_snapshots(&self, name: &str) -> Result<Vec<Snapshot>>;

    async fn delete_snapshot(&self, name: &str, snapshot: &str) -> Result<()>;

    async fn autoplace(&self, name: &str, request: AutoPlaceRequest) -> Result<()>;
}

// =============================================================================
// Mounter Port
// =============================================================================

/// Port for operations on the local mount namespace and block devices
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Whether `path` is currently a mount point. A missing path is not.
    async fn is_mount_point(&self, path: &Path) -> Result<bool>;

    /// Create `path` and its parents; succeeds if it already exists
    async fn make_dir(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory
    async fn remove_dir(&self, path: &Path) -> Result<()>;

    async fn mount(&self, source: &str, target: &Path, fstype: &str, options: &[String])
        -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;

    /// Whether another holder has the device open
    async fn device_opened(&self, device: &str) -> Result<bool>;

    /// Whether the device is larger than the filesystem mounted at `target`
    async fn need_resize(&self, device: &str, target: &Path) -> Result<bool>;

    /// Grow the filesystem mounted at `target` to the device size
    async fn resize(&self, device: &str, target: &Path) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ControllerClientRef = Arc<dyn ControllerClient>;
pub type MounterRef = Arc<dyn Mounter>;
