// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The CDI Reconciler (C3, spec §4.3): makes the on-disk CDI registry match
//! the current live [`DeviceSet`].

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use base::atomic_file;
use base::Settings;
use devices::Device;
use devices::DeviceSet;
use log::warn;
use remain::sorted;
use thiserror::Error;

use crate::spec::CdiDevice;
use crate::spec::CdiSpec;
use crate::spec::ContainerEdits;
use crate::spec::DeviceNode;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("{0:?}: {1}")]
    MalformedSpec(PathBuf, serde_json::Error),
    #[error("{0:?}: {1}")]
    Write(PathBuf, atomic_file::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Registry<'a> {
    settings: &'a Settings,
}

impl<'a> Registry<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn owned_kind(&self) -> String {
        format!("{}/{}", self.settings.vendor, self.settings.kind)
    }

    fn spec_file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.settings.vendor.replace('.', "-"),
            self.settings.kind
        )
    }

    /// Loads every on-disk spec document owned by this driver's vendor/kind
    /// pair, alongside the path it was loaded from.
    fn load_specs(&self) -> Result<Vec<(PathBuf, CdiSpec)>> {
        let root = self.settings.cdi_spec_dir();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(root.to_path_buf(), e)),
        };

        let owned_kind = self.owned_kind();
        let mut specs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Io(root.to_path_buf(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("{path:?}: skipping unreadable CDI spec: {e}");
                    continue;
                }
            };
            let spec: CdiSpec = match serde_json::from_str(&contents) {
                Ok(s) => s,
                Err(e) => {
                    warn!("{path:?}: skipping malformed CDI spec: {e}");
                    continue;
                }
            };
            if spec.kind == owned_kind {
                specs.push((path, spec));
            }
        }
        specs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(specs)
    }

    fn write_spec(&self, path: &Path, spec: &CdiSpec) -> Result<()> {
        let contents = serde_json::to_vec_pretty(spec)
            .map_err(|e| Error::MalformedSpec(path.to_path_buf(), e))?;
        atomic_file::write_atomic(path, &contents, 0o644)
            .map_err(|e| Error::Write(path.to_path_buf(), e))
    }

    fn expected_device_nodes(&self, device: &Device) -> Vec<DeviceNode> {
        let mut nodes = Vec::new();
        if let Some(card) = device.card_index {
            nodes.push(DeviceNode::character(format!(
                "{}/card{}",
                self.settings.devfs_root.display(),
                card
            )));
        }
        if let Some(render) = device.render_index {
            nodes.push(DeviceNode::character(format!(
                "{}/renderD{}",
                self.settings.devfs_root.display(),
                render
            )));
        }
        if let Some(group) = device.vfio_group {
            nodes.push(DeviceNode::character(format!("/dev/vfio/{group}")));
        }
        nodes
    }

    /// Reconciles every owned spec against `live`: rewrites drifted device
    /// node paths, drops entries absent from `live` when `cleanup` is set,
    /// and appends any unmatched live device to the first spec (creating
    /// one if none existed). Spec §4.3.
    pub fn sync(&self, live: &DeviceSet, cleanup: bool) -> Result<()> {
        let specs = self.load_specs()?;
        let mut specs: Vec<(PathBuf, CdiSpec, bool)> =
            specs.into_iter().map(|(path, spec)| (path, spec, false)).collect();
        let mut matched: HashSet<String> = HashSet::new();

        for (_path, spec, dirty) in specs.iter_mut() {
            let mut kept = Vec::with_capacity(spec.devices.len());
            for entry in std::mem::take(&mut spec.devices) {
                match live.get(&entry.name) {
                    Some(device) => {
                        matched.insert(entry.name.clone());
                        let expected = self.expected_device_nodes(device);
                        if entry.container_edits.device_nodes != expected {
                            *dirty = true;
                            kept.push(CdiDevice {
                                name: entry.name,
                                container_edits: ContainerEdits {
                                    device_nodes: expected,
                                },
                            });
                        } else {
                            kept.push(entry);
                        }
                    }
                    None => {
                        if cleanup {
                            *dirty = true;
                        } else {
                            kept.push(entry);
                        }
                    }
                }
            }
            spec.devices = kept;
        }

        let unmatched: Vec<&Device> = live
            .iter()
            .filter(|d| !matched.contains(&d.uid))
            .collect();

        if !unmatched.is_empty() {
            if specs.is_empty() {
                let path = self.settings.cdi_spec_dir().join(self.spec_file_name());
                specs.push((path, CdiSpec::new(&self.owned_kind()), true));
            }
            let (_, first_spec, dirty) = specs.first_mut().expect("just ensured non-empty");
            for device in unmatched {
                first_spec.devices.push(CdiDevice {
                    name: device.uid.clone(),
                    container_edits: ContainerEdits {
                        device_nodes: self.expected_device_nodes(device),
                    },
                });
            }
            *dirty = true;
        }

        // Only dirty specs are rewritten (spec §4.3 "Dirty specs are
        // atomically rewritten"); an unchanged spec is left untouched so a
        // Sync with nothing to reconcile does no I/O at all. A partial
        // failure here still leaves already-written specs idempotent on the
        // next Sync (spec §4.3 "Failure semantics").
        for (path, spec, dirty) in &specs {
            if *dirty {
                self.write_spec(path, spec)?;
            }
        }
        Ok(())
    }

    /// Removes a single device entry (by uid) from whichever spec holds it.
    pub fn delete(&self, uid: &str) -> Result<()> {
        let specs = self.load_specs()?;
        for (path, mut spec) in specs {
            let before = spec.devices.len();
            spec.devices.retain(|d| d.name != uid);
            if spec.devices.len() != before {
                self.write_spec(&path, &spec)?;
            }
        }
        Ok(())
    }

    /// The CDI qualified names (`<vendor>/<kind>=<uid>`) for a set of uids,
    /// independent of whether they are currently present in the registry;
    /// callers ask for names right after a successful `Sync`.
    pub fn names<'b>(&self, uids: impl IntoIterator<Item = &'b str>) -> Vec<String> {
        uids.into_iter()
            .map(|uid| self.settings.qualified_name(uid))
            .collect()
    }
}
