//! In-memory port implementations for unit tests
//!
//! Both fakes record every call as a single line (`"<op> <args>"`) and can be
//! told to fail any call whose op name or full line matches a pattern.

use super::ports::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn injected(op: &str) -> Error {
    Error::Controller {
        status: 500,
        message: format!("injected failure: {}", op),
    }
}

// =============================================================================
// Fake Controller
// =============================================================================

#[derive(Default)]
struct ControllerState {
    definitions: BTreeMap<String, ResourceDefinition>,
    volume_definitions: BTreeMap<String, VolumeDefinition>,
    resources: BTreeMap<(String, String), Resource>,
    snapshots: BTreeMap<String, Vec<String>>,
    view_override: Option<Vec<ResourceWithVolumes>>,
    failures: HashSet<String>,
    calls: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeController {
    state: Mutex<ControllerState>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call whose op name or full call line equals `pattern`
    pub fn fail(&self, pattern: &str) {
        self.state.lock().unwrap().failures.insert(pattern.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn insert_definition(&self, definition: ResourceDefinition) {
        self.state
            .lock()
            .unwrap()
            .definitions
            .insert(definition.name.clone(), definition);
    }

    pub fn insert_resource(&self, resource: Resource) {
        self.state
            .lock()
            .unwrap()
            .resources
            .insert((resource.name.clone(), resource.node_name.clone()), resource);
    }

    pub fn add_snapshot(&self, resource: &str, snapshot: &str) {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .entry(resource.to_string())
            .or_default()
            .push(snapshot.to_string());
    }

    pub fn set_view(&self, view: Vec<ResourceWithVolumes>) {
        self.state.lock().unwrap().view_override = Some(view);
    }

    pub fn definition(&self, name: &str) -> Option<ResourceDefinition> {
        self.state.lock().unwrap().definitions.get(name).cloned()
    }

    pub fn volume_definition(&self, name: &str) -> Option<VolumeDefinition> {
        self.state.lock().unwrap().volume_definitions.get(name).cloned()
    }

    pub fn resource(&self, name: &str, node: &str) -> Option<Resource> {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(&(name.to_string(), node.to_string()))
            .cloned()
    }

    pub fn snapshots(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, op: &str, args: &[&str]) -> Result<std::sync::MutexGuard<'_, ControllerState>> {
        let mut state = self.state.lock().unwrap();
        let line = if args.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, args.join(" "))
        };
        state.calls.push(line.clone());
        if state.failures.contains(op) || state.failures.contains(&line) {
            return Err(injected(&line));
        }
        Ok(state)
    }
}

#[async_trait]
impl ControllerClient for FakeController {
    async fn create_volume_definition(
        &self,
        resource: &str,
        definition: VolumeDefinition,
    ) -> Result<()> {
        let mut state = self.record("create_volume_definition", &[resource])?;
        state.volume_definitions.insert(resource.to_string(), definition);
        Ok(())
    }

    async fn delete_volume_definition(&self, resource: &str, volume_number: i32) -> Result<()> {
        let nr = volume_number.to_string();
        let mut state = self.record("delete_volume_definition", &[resource, nr.as_str()])?;
        state.volume_definitions.remove(resource);
        Ok(())
    }

    async fn create_resource_definition(&self, definition: ResourceDefinition) -> Result<()> {
        let mut state = self.record("create_resource_definition", &[definition.name.as_str()])?;
        state.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn get_resource_definition(&self, name: &str) -> Result<ResourceDefinition> {
        let state = self.record("get_resource_definition", &[name])?;
        state
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("resource definition {}", name)))
    }

    async fn list_resource_definitions(&self) -> Result<Vec<ResourceDefinition>> {
        let state = self.record("list_resource_definitions", &[])?;
        Ok(state.definitions.values().cloned().collect())
    }

    async fn delete_resource_definition(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_resource_definition", &[name])?;
        state.definitions.remove(name);
        state.volume_definitions.remove(name);
        state.resources.retain(|(rd, _), _| rd != name);
        Ok(())
    }

    async fn create_resource(&self, resource: Resource) -> Result<()> {
        let mut state = self.record("create_resource", &[resource.name.as_str(), resource.node_name.as_str()])?;
        state
            .resources
            .insert((resource.name.clone(), resource.node_name.clone()), resource);
        Ok(())
    }

    async fn get_resource(&self, name: &str, node: &str) -> Result<Resource> {
        let state = self.record("get_resource", &[name, node])?;
        state
            .resources
            .get(&(name.to_string(), node.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("resource {} on {}", name, node)))
    }

    async fn delete_resource(&self, name: &str, node: &str) -> Result<()> {
        let mut state = self.record("delete_resource", &[name, node])?;
        state.resources.remove(&(name.to_string(), node.to_string()));
        Ok(())
    }

    async fn get_volume(&self, name: &str, node: &str, volume_number: i32) -> Result<Volume> {
        let nr = volume_number.to_string();
        let state = self.record("get_volume", &[name, node, nr.as_str()])?;
        let resource = state
            .resources
            .get(&(name.to_string(), node.to_string()))
            .ok_or_else(|| Error::NotFound(format!("volume {}/{} on {}", name, nr, node)))?;
        Ok(fake_volume(resource, volume_number))
    }

    async fn resource_view(&self, name: &str, node: &str) -> Result<Vec<ResourceWithVolumes>> {
        let state = self.record("resource_view", &[name, node])?;
        if let Some(view) = &state.view_override {
            return Ok(view.clone());
        }
        Ok(state
            .resources
            .values()
            .filter(|r| r.name == name && r.node_name == node)
            .map(|r| ResourceWithVolumes {
                name: r.name.clone(),
                node_name: r.node_name.clone(),
                volumes: vec![fake_volume(r, 0)],
            })
            .collect())
    }

    async fn list_snapshots(&self, name: &str) -> Result<Vec<Snapshot>> {
        let state = self.record("list_snapshots", &[name])?;
        Ok(state
            .snapshots
            .get(name)
            .map(|snaps| {
                snaps
                    .iter()
                    .map(|s| Snapshot {
                        name: s.clone(),
                        resource_name: name.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_snapshot(&self, name: &str, snapshot: &str) -> Result<()> {
        let mut state = self.record("delete_snapshot", &[name, snapshot])?;
        if let Some(snaps) = state.snapshots.get_mut(name) {
            snaps.retain(|s| s != snapshot);
        }
        Ok(())
    }

    async fn autoplace(&self, name: &str, request: AutoPlaceRequest) -> Result<()> {
        let mut state = self.record("autoplace", &[name])?;
        for i in 0..request.select_filter.place_count {
            let node = format!("auto-{}", i);
            state.resources.insert(
                (name.to_string(), node.clone()),
                Resource {
                    name: name.to_string(),
                    node_name: node,
                    ..Default::default()
                },
            );
        }
        Ok(())
    }
}

fn fake_volume(resource: &Resource, volume_number: i32) -> Volume {
    Volume {
        volume_number,
        provider_kind: if resource.is_diskless() {
            PROVIDER_DISKLESS.to_string()
        } else {
            "LVM_THIN".to_string()
        },
        device_path: "/dev/drbd1000".to_string(),
    }
}

// =============================================================================
// Fake Mounter
// =============================================================================

#[derive(Default)]
struct MounterState {
    mounted: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
    opened: HashSet<String>,
    grown: bool,
    failures: HashSet<String>,
    calls: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeMounter {
    state: Mutex<MounterState>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, pattern: &str) {
        self.state.lock().unwrap().failures.insert(pattern.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_mounted(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.dirs.insert(path.to_path_buf());
        state.mounted.insert(path.to_path_buf());
    }

    pub fn set_opened(&self, device: &str) {
        self.state.lock().unwrap().opened.insert(device.to_string());
    }

    /// Pretend the device grew beyond the filesystem
    pub fn set_grown(&self) {
        self.state.lock().unwrap().grown = true;
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().unwrap().mounted.contains(path)
    }

    pub fn has_dir(&self, path: &Path) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    fn record(&self, op: &str, args: &[&str]) -> Result<std::sync::MutexGuard<'_, MounterState>> {
        let mut state = self.state.lock().unwrap();
        let line = format!("{} {}", op, args.join(" "));
        state.calls.push(line.clone());
        if state.failures.contains(op) || state.failures.contains(&line) {
            return Err(Error::MountFailed {
                command: op.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let p = path.display().to_string();
        let state = self.record("is_mount_point", &[p.as_str()])?;
        Ok(state.mounted.contains(path))
    }

    async fn make_dir(&self, path: &Path) -> Result<()> {
        let p = path.display().to_string();
        let mut state = self.record("make_dir", &[p.as_str()])?;
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        let p = path.display().to_string();
        let mut state = self.record("remove_dir", &[p.as_str()])?;
        state.dirs.remove(path);
        Ok(())
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        options: &[String],
    ) -> Result<()> {
        let t = target.display().to_string();
        let opts = options.join(",");
        let mut state = self.record("mount", &[source, t.as_str(), fstype, opts.as_str()])?;
        state.mounted.insert(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let t = target.display().to_string();
        let mut state = self.record("unmount", &[t.as_str()])?;
        state.mounted.remove(target);
        Ok(())
    }

    async fn device_opened(&self, device: &str) -> Result<bool> {
        let state = self.record("device_opened", &[device])?;
        Ok(state.opened.contains(device))
    }

    async fn need_resize(&self, device: &str, target: &Path) -> Result<bool> {
        let t = target.display().to_string();
        let state = self.record("need_resize", &[device, t.as_str()])?;
        Ok(state.grown)
    }

    async fn resize(&self, device: &str, target: &Path) -> Result<()> {
        let t = target.display().to_string();
        let mut state = self.record("resize", &[device, t.as_str()])?;
        state.grown = false;
        Ok(())
    }
}
