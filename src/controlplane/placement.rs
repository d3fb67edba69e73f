//! Placement Resolver
//!
//! Turns a volume name plus free-form, string-keyed options into a fully
//! populated [`VolumeParams`]. Values are layered in increasing priority:
//! built-in defaults, the `[global]` section of the configuration file, and
//! the options passed with the request.
//!
//! Option decoding is loose: list fields take space separated
//! strings, numbers and booleans take their textual forms, and keys are
//! matched case-insensitively. Unknown keys are ignored so one configuration
//! file can carry connection settings alongside placement defaults.

use crate::domain::ports::{
    AutoPlaceRequest, AutoSelectFilter, Resource, FLAG_DISKLESS, KEY_STOR_POOL_NAME,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Property marking a resource definition as owned by this plugin
pub const PLUGIN_FLAG_KEY: &str = "Aux/is-linstor-docker-volume";

/// Sentinel value of [`PLUGIN_FLAG_KEY`]
pub const PLUGIN_FLAG_VALUE: &str = "true";

/// Property holding the filesystem type chosen at creation
pub const FS_TYPE_KEY: &str = "FileSystem/Type";

/// Property holding extra mkfs arguments
pub const FS_MKFS_PARAMS_KEY: &str = "FileSystem/MkfsParams";

/// Prefix of DRBD tuning properties on the resource definition
pub const DRBD_OPTIONS_PREFIX: &str = "drbdOptions/";

const DEFAULT_SIZE: &str = "100MB";
const DEFAULT_FS: &str = "ext4";
const DEFAULT_REPLICAS: i32 = 2;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Smallest volume the plugin will request
pub const MIN_SIZE_BYTES: u64 = 4 * MIB;

// =============================================================================
// DRBD Options
// =============================================================================

/// Optional DRBD tuning passed through to the resource definition.
///
/// Unset fields are left out of the property map entirely so the
/// controller's own defaults stay in effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrbdOptions {
    pub protocol: Option<String>,
    pub connect_interval: Option<String>,
    pub ping_interval: Option<String>,
    pub ping_timeout: Option<String>,
    pub resync_rate: Option<String>,
    pub al_extents: Option<String>,
    pub max_buffers: Option<String>,
    pub max_epoch_size: Option<String>,
    pub handler_split_brain: Option<String>,
    pub handler_pri_on_incon_degr: Option<String>,
    pub primary_set_on: Option<String>,
}

impl DrbdOptions {
    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        let slot = match key {
            "protocol" => &mut self.protocol,
            "connect-int" => &mut self.connect_interval,
            "ping-int" => &mut self.ping_interval,
            "ping-timeout" => &mut self.ping_timeout,
            "resync-rate" => &mut self.resync_rate,
            "al-extents" => &mut self.al_extents,
            "max-buffers" => &mut self.max_buffers,
            "max-epoch-size" => &mut self.max_epoch_size,
            "handler-split-brain" => &mut self.handler_split_brain,
            "handler-pri-on-incon-degr" => &mut self.handler_pri_on_incon_degr,
            "primary-set-on" => &mut self.primary_set_on,
            _ => return None,
        };
        Some(slot)
    }

    /// Key/value pairs of the options that are set, keyed by option name
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("protocol", &self.protocol),
            ("connect-int", &self.connect_interval),
            ("ping-int", &self.ping_interval),
            ("ping-timeout", &self.ping_timeout),
            ("resync-rate", &self.resync_rate),
            ("al-extents", &self.al_extents),
            ("max-buffers", &self.max_buffers),
            ("max-epoch-size", &self.max_epoch_size),
            ("handler-split-brain", &self.handler_split_brain),
            ("handler-pri-on-incon-degr", &self.handler_pri_on_incon_degr),
            ("primary-set-on", &self.primary_set_on),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}

// =============================================================================
// Volume Parameters
// =============================================================================

/// Resolved placement and filesystem parameters for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeParams {
    pub nodes: Vec<String>,
    pub replicas_on_different: Vec<String>,
    pub replicas_on_same: Vec<String>,
    pub diskless_storage_pool: String,
    pub do_not_place_with_regex: String,
    pub fs: String,
    pub fs_opts: String,
    pub mount_opts: Vec<String>,
    pub storage_pool: String,
    /// Size as given, before conversion
    pub size: String,
    /// Size in KiB, never below [`MIN_SIZE_BYTES`]
    pub size_kib: u64,
    pub replicas: i32,
    pub diskless_on_remaining: bool,
    pub drbd: DrbdOptions,
}

impl VolumeParams {
    /// Resolve parameters from configuration defaults and request options
    pub fn resolve(
        defaults: &BTreeMap<String, String>,
        options: Option<&BTreeMap<String, String>>,
    ) -> Result<Self> {
        let mut params = Self::default();
        params.apply(defaults)?;
        if let Some(options) = options {
            params.apply(options)?;
        }
        params.finish()?;
        Ok(params)
    }

    /// Overlay string-keyed options onto these parameters
    pub fn apply(&mut self, options: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in options {
            self.set(&key.to_lowercase(), value)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "nodes" => self.nodes = split_list(value),
            "replicas-on-different" => self.replicas_on_different = split_list(value),
            "replicas-on-same" => self.replicas_on_same = split_list(value),
            "diskless-storage-pool" => self.diskless_storage_pool = value.to_string(),
            "do-not-place-with-regex" => self.do_not_place_with_regex = value.to_string(),
            "fs" => self.fs = value.to_string(),
            "fsopts" => self.fs_opts = value.to_string(),
            "mount-opts" => self.mount_opts = split_list(value),
            "storage-pool" => self.storage_pool = value.to_string(),
            "size" => self.size = value.to_string(),
            "replicas" => self.replicas = parse_int(key, value)?,
            "diskless-on-remaining" => self.diskless_on_remaining = parse_bool(key, value)?,
            other => {
                if let Some(slot) = self.drbd.slot(other) {
                    *slot = Some(value.to_string()).filter(|v| !v.is_empty());
                }
            }
        }
        Ok(())
    }

    /// Fill in built-in defaults and convert the size
    fn finish(&mut self) -> Result<()> {
        if self.size.is_empty() {
            self.size = DEFAULT_SIZE.to_string();
        }
        let bytes = parse_size(&self.size)?.max(MIN_SIZE_BYTES);
        self.size_kib = bytes / KIB;

        if self.fs.is_empty() {
            self.fs = DEFAULT_FS.to_string();
        }
        if self.replicas == 0 {
            self.replicas = DEFAULT_REPLICAS;
        }
        Ok(())
    }

    // =========================================================================
    // Wire Conversion
    // =========================================================================

    /// Property map for the resource definition
    pub fn definition_props(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert(PLUGIN_FLAG_KEY.to_string(), PLUGIN_FLAG_VALUE.to_string());
        props.insert(FS_TYPE_KEY.to_string(), self.fs.clone());
        if !self.fs_opts.is_empty() {
            props.insert(FS_MKFS_PARAMS_KEY.to_string(), self.fs_opts.clone());
        }
        for (key, value) in self.drbd.entries() {
            props.insert(format!("{}{}", DRBD_OPTIONS_PREFIX, key), value.to_string());
        }
        props
    }

    /// Diskfull resource holding a data copy on `node`
    pub fn diskfull_resource(&self, name: &str, node: &str) -> Resource {
        let mut props = BTreeMap::new();
        if !self.storage_pool.is_empty() {
            props.insert(KEY_STOR_POOL_NAME.to_string(), self.storage_pool.clone());
        }
        Resource {
            name: name.to_string(),
            node_name: node.to_string(),
            props,
            flags: Vec::new(),
        }
    }

    /// Diskless resource attaching `node` to replicas elsewhere
    pub fn diskless_resource(&self, name: &str, node: &str) -> Resource {
        let mut props = BTreeMap::new();
        if !self.diskless_storage_pool.is_empty() {
            props.insert(
                KEY_STOR_POOL_NAME.to_string(),
                self.diskless_storage_pool.clone(),
            );
        }
        Resource {
            name: name.to_string(),
            node_name: node.to_string(),
            props,
            flags: vec![FLAG_DISKLESS.to_string()],
        }
    }

    /// Automatic placement request honouring the replica constraints
    pub fn autoplace_request(&self) -> AutoPlaceRequest {
        AutoPlaceRequest {
            diskless_on_remaining: self.diskless_on_remaining,
            select_filter: AutoSelectFilter {
                place_count: self.replicas,
                storage_pool: non_empty(&self.storage_pool),
                not_place_with_rsc_regex: non_empty(&self.do_not_place_with_regex),
                replicas_on_same: self.replicas_on_same.clone(),
                replicas_on_different: self.replicas_on_different.clone(),
            },
        }
    }
}

// =============================================================================
// Decoding Helpers
// =============================================================================

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_int(key: &str, value: &str) -> Result<i32> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|e: std::num::ParseIntError| Error::OptionDecode {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        other => Err(Error::OptionDecode {
            key: key.to_string(),
            value: other.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

/// Parse a size string (e.g. "100MB", "1.5G", "4096") to bytes.
///
/// Units are binary: `K` is 1024 bytes, `M` is 1024 `K`, and so on.
pub fn parse_size(s: &str) -> Result<u64> {
    let fail = |reason: String| Error::SizeParse {
        size: s.to_string(),
        reason,
    };

    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(fail("empty size string".into()));
    }

    let num_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());

    let num_str = &trimmed[..num_end];
    let unit_str = trimmed[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| fail(format!("invalid number: '{}'", num_str)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => KIB,
        "M" | "MB" | "MI" | "MIB" => MIB,
        "G" | "GB" | "GI" | "GIB" => 1024 * MIB,
        "T" | "TB" | "TI" | "TIB" => 1024 * 1024 * MIB,
        "P" | "PB" | "PI" | "PIB" => 1024 * 1024 * 1024 * MIB,
        other => return Err(fail(format!("unknown unit: '{}'", other))),
    };

    let bytes = num * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(fail(format!("'{}' is too large", trimmed)));
    }
    Ok(bytes as u64)
}
