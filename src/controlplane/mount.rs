//! Mount/Resize Sequencer
//!
//! Layout on the host:
//!
//! ```text
//! <root>/<name>          real mount target
//! <root>/<name>/data     mountpoint reported to Docker
//! ```
//!
//! Reporting a directory one level below the mount target keeps filesystem
//! metadata such as `lost+found` out of the container's view.

use crate::controlplane::attachment::Attachment;
use crate::domain::ports::MounterRef;
use crate::error::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Directory below the real mount target that is handed to Docker
pub const DATA_DIR: &str = "data";

/// Mounts, resizes and unmounts volumes below a fixed root directory
pub struct MountSequencer {
    mounter: MounterRef,
    root: PathBuf,
}

impl MountSequencer {
    pub fn new(mounter: MounterRef, root: impl Into<PathBuf>) -> Self {
        Self {
            mounter,
            root: root.into(),
        }
    }

    /// Directory the filesystem is mounted on
    pub fn real_mount_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Directory reported to the caller
    pub fn reported_mount_path(&self, name: &str) -> PathBuf {
        self.real_mount_path(name).join(DATA_DIR)
    }

    /// Reported mountpoint if the volume is mounted right now, else ""
    pub async fn mount_point(&self, name: &str) -> String {
        let target = self.real_mount_path(name);
        match self.mounter.is_mount_point(&target).await {
            Ok(true) => self.reported_mount_path(name).display().to_string(),
            Ok(false) => String::new(),
            Err(e) => {
                debug!(volume = name, error = %e, "Mount point check failed");
                String::new()
            }
        }
    }

    /// Mount an attached volume and grow its filesystem if the device grew
    pub async fn mount(
        &self,
        name: &str,
        attachment: &Attachment,
        options: &[String],
    ) -> Result<PathBuf> {
        let source = attachment.device_path.as_str();
        let target = self.real_mount_path(name);

        self.mounter.make_dir(&target).await?;
        self.mounter
            .mount(source, &target, &attachment.fs_type, options)
            .await?;

        // first mount of a fresh filesystem has no data directory yet
        let reported = self.reported_mount_path(name);
        self.mounter.make_dir(&reported).await?;

        if self.mounter.need_resize(source, &target).await? {
            info!(volume = name, device = source, "Growing filesystem");
            self.mounter.resize(source, &target).await?;
        }

        info!(volume = name, mountpoint = %reported.display(), "Volume mounted");
        Ok(reported)
    }

    /// Unmount a volume. Returns false if it was not mounted.
    pub async fn unmount(&self, name: &str) -> Result<bool> {
        let target = self.real_mount_path(name);
        if !self.mounter.is_mount_point(&target).await? {
            debug!(volume = name, "Not mounted, nothing to do");
            return Ok(false);
        }

        self.mounter.unmount(&target).await?;

        if let Err(e) = self.mounter.remove_dir(&target).await {
            warn!(volume = name, error = %e, "Could not remove mount directory");
        }

        info!(volume = name, "Volume unmounted");
        Ok(true)
    }
}
