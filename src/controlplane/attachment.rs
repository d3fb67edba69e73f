//! Local Attachment Manager
//!
//! Makes a volume usable on this host: ensures a resource exists for the
//! local node (creating a diskless one on demand), reads the filesystem type
//! stored on the resource definition, and refuses devices that another
//! holder already has open.

use crate::controlplane::placement::{VolumeParams, FS_TYPE_KEY};
use crate::controlplane::transaction::VOLUME_NUMBER;
use crate::domain::ports::{ControllerClientRef, MounterRef};
use crate::error::{Error, Result};
use tracing::{debug, info};

// =============================================================================
// Host Attachment State
// =============================================================================

/// Per-host state of a volume, re-read from the controller on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAttachment {
    /// No resource for this node
    Detached,
    /// Resource without a local data copy
    Diskless,
    /// Resource holding a local data copy
    Diskful,
}

/// A local attachment ready to be mounted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Block device to mount
    pub device_path: String,
    /// Filesystem type recorded on the resource definition
    pub fs_type: String,
    /// Host state before this attach call
    pub previous: HostAttachment,
}

// =============================================================================
// Local Attachments
// =============================================================================

/// Host-side half of the volume lifecycle
pub struct LocalAttachments {
    client: ControllerClientRef,
    mounter: MounterRef,
    node: String,
}

impl LocalAttachments {
    pub fn new(client: ControllerClientRef, mounter: MounterRef, node: impl Into<String>) -> Self {
        Self {
            client,
            mounter,
            node: node.into(),
        }
    }

    /// Ensure the volume is attached here and its device is free to mount
    pub async fn attach(&self, name: &str, params: &VolumeParams) -> Result<Attachment> {
        let previous = self.attachment_state(name).await?;
        if previous == HostAttachment::Detached {
            info!(volume = name, node = %self.node, "Creating diskless resource");
            self.client
                .create_resource(params.diskless_resource(name, &self.node))
                .await?;
        }

        // properties are not merged into the resource, the definition is
        // the only place the filesystem type lives
        let fs_type = self.filesystem_type(name).await?;

        let volume = self
            .client
            .get_volume(name, &self.node, VOLUME_NUMBER)
            .await?;
        let device_path = volume.device_path;

        if self.mounter.device_opened(&device_path).await? {
            return Err(Error::DeviceInUse {
                device: device_path,
            });
        }

        debug!(volume = name, device = %device_path, fs = %fs_type, "Volume attached");

        Ok(Attachment {
            device_path,
            fs_type,
            previous,
        })
    }

    /// Whether a resource exists for this node, and of which kind
    pub async fn attachment_state(&self, name: &str) -> Result<HostAttachment> {
        match self.client.get_resource(name, &self.node).await {
            Ok(resource) if resource.is_diskless() => Ok(HostAttachment::Diskless),
            Ok(_) => Ok(HostAttachment::Diskful),
            Err(e) if e.is_not_found() => Ok(HostAttachment::Detached),
            Err(e) => Err(e),
        }
    }

    /// Filesystem type recorded on the resource definition at creation
    pub async fn filesystem_type(&self, name: &str) -> Result<String> {
        let definition = self.client.get_resource_definition(name).await?;
        definition
            .props
            .get(FS_TYPE_KEY)
            .cloned()
            .ok_or_else(|| Error::MissingFilesystem {
                name: name.to_string(),
            })
    }

    /// Disk state of this node's volume as reported by its storage provider
    pub async fn disk_state(&self, name: &str) -> Result<HostAttachment> {
        let resources = self.client.resource_view(name, &self.node).await?;
        let [resource] = resources.as_slice() else {
            return Err(Error::Inconsistent(format!(
                "resource filter for '{}' on '{}' has to contain exactly one resource, got {}",
                name,
                self.node,
                resources.len()
            )));
        };
        let [volume] = resource.volumes.as_slice() else {
            return Err(Error::Inconsistent(format!(
                "there has to be exactly one volume in resource '{}', got {}",
                name,
                resource.volumes.len()
            )));
        };

        if volume.is_diskless() {
            Ok(HostAttachment::Diskless)
        } else {
            Ok(HostAttachment::Diskful)
        }
    }
}
