//! System Mounter
//!
//! Implements the [`Mounter`] port with the host's mount utilities:
//! mount points come from `/proc/self/mountinfo`, mounting and growing
//! filesystems shells out to util-linux, e2fsprogs and xfsprogs.

use crate::domain::ports::Mounter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Mount table of the plugin's own mount namespace
pub const DEFAULT_MOUNTINFO: &str = "/proc/self/mountinfo";

// =============================================================================
// Mount Table
// =============================================================================

/// Decode the octal escapes (`\040` and friends) used in mountinfo fields
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1..i + 4).is_some_and(is_octal) {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|b| (b'0'..=b'7').contains(b))
}

/// Mount points listed in a mountinfo table
pub fn parse_mountinfo(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

// =============================================================================
// Filesystem Geometry
// =============================================================================

/// Filesystem size in bytes and its block size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsGeometry {
    pub block_size: u64,
    pub size: u64,
}

fn field_value<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(key)?;
        k.trim().is_empty().then(|| v.trim())
    })
}

/// Geometry from `dumpe2fs -h` output
pub fn parse_dumpe2fs(output: &str) -> Option<FsGeometry> {
    let block_count: u64 = field_value(output, "Block count:")?.parse().ok()?;
    let block_size: u64 = field_value(output, "Block size:")?.parse().ok()?;
    Some(FsGeometry {
        block_size,
        size: block_count * block_size,
    })
}

/// Geometry from `xfs_io -c statfs` output
pub fn parse_xfs_statfs(output: &str) -> Option<FsGeometry> {
    let block_size: u64 = field_value(output, "geom.bsize =")?.parse().ok()?;
    let data_blocks: u64 = field_value(output, "geom.datablocks =")?.parse().ok()?;
    Some(FsGeometry {
        block_size,
        size: data_blocks * block_size,
    })
}

/// Filesystem families this mounter knows how to grow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsFamily {
    Ext,
    Xfs,
}

impl FsFamily {
    fn from_type(fs_type: &str) -> Option<Self> {
        match fs_type {
            "ext2" | "ext3" | "ext4" => Some(FsFamily::Ext),
            "xfs" => Some(FsFamily::Xfs),
            _ => None,
        }
    }
}

// =============================================================================
// System Mounter
// =============================================================================

/// Mounter backed by the host's mount namespace
pub struct SystemMounter {
    mountinfo: PathBuf,
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMounter {
    pub fn new() -> Self {
        Self::with_mountinfo(DEFAULT_MOUNTINFO)
    }

    /// Read mount points from another table, e.g. a test fixture
    pub fn with_mountinfo(path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: path.into(),
        }
    }

    /// Run a host utility and return its stdout
    async fn run<I, S>(program: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::MountFailed {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::MountFailed {
                command: program.to_string(),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn device_size(device: &str) -> Result<u64> {
        let output = Self::run("blockdev", ["--getsize64", device]).await?;
        output.trim().parse().map_err(|_| Error::MountFailed {
            command: "blockdev".into(),
            reason: format!("unexpected size '{}'", output.trim()),
        })
    }

    async fn device_fs_type(device: &str) -> Result<String> {
        let output = Self::run("blkid", ["-p", "-s", "TYPE", "-o", "value", device]).await?;
        Ok(output.trim().to_string())
    }

    async fn geometry(family: FsFamily, device: &str, target: &Path) -> Result<FsGeometry> {
        let (command, parsed) = match family {
            FsFamily::Ext => {
                let output = Self::run("dumpe2fs", ["-h", device]).await?;
                ("dumpe2fs", parse_dumpe2fs(&output))
            }
            FsFamily::Xfs => {
                let args = [OsStr::new("-c"), OsStr::new("statfs"), target.as_os_str()];
                let output = Self::run("xfs_io", args).await?;
                ("xfs_io", parse_xfs_statfs(&output))
            }
        };
        parsed.ok_or_else(|| Error::MountFailed {
            command: command.into(),
            reason: "could not read filesystem geometry".into(),
        })
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let path = match tokio::fs::canonicalize(path).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let table = tokio::fs::read_to_string(&self.mountinfo).await?;
        Ok(parse_mountinfo(&table).iter().any(|m| *m == path))
    }

    async fn make_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir(path).await?;
        Ok(())
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        options: &[String],
    ) -> Result<()> {
        let joined = options.join(",");
        let mut args = vec![OsStr::new("-t"), OsStr::new(fstype)];
        if !joined.is_empty() {
            args.push(OsStr::new("-o"));
            args.push(OsStr::new(&joined));
        }
        args.push(OsStr::new(source));
        args.push(target.as_os_str());

        debug!(source, target = %target.display(), fstype, options = %joined, "Mounting");
        Self::run("mount", args).await?;
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        debug!(target = %target.display(), "Unmounting");
        Self::run("umount", [target.as_os_str()]).await?;
        Ok(())
    }

    async fn device_opened(&self, device: &str) -> Result<bool> {
        // O_EXCL on a block device fails with EBUSY while anyone holds it
        let probe = tokio::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_EXCL)
            .open(device)
            .await;

        match probe {
            Ok(_) => Ok(false),
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn need_resize(&self, device: &str, target: &Path) -> Result<bool> {
        let fs_type = Self::device_fs_type(device).await?;
        let Some(family) = FsFamily::from_type(&fs_type) else {
            debug!(device, fs = %fs_type, "Resize not supported for filesystem");
            return Ok(false);
        };

        let device_size = Self::device_size(device).await?;
        let geometry = Self::geometry(family, device, target).await?;

        // the last partial block can never be used by the filesystem
        Ok(device_size > geometry.size + geometry.block_size)
    }

    async fn resize(&self, device: &str, target: &Path) -> Result<()> {
        let fs_type = Self::device_fs_type(device).await?;
        match FsFamily::from_type(&fs_type) {
            Some(FsFamily::Ext) => {
                Self::run("resize2fs", [device]).await?;
            }
            Some(FsFamily::Xfs) => {
                Self::run("xfs_growfs", [target.as_os_str()]).await?;
            }
            None => {
                warn!(device, fs = %fs_type, "Cannot grow filesystem");
            }
        }
        Ok(())
    }
}
