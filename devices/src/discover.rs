// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Device Discoverer (spec §4.1): walks the sysfs device tree rooted at
//! `Settings::sysfs_root` and builds a [`DeviceSet`] snapshot.

use std::path::Path;
use std::path::PathBuf;

use base::sysfs;
use base::Settings;
use log::warn;
use remain::sorted;
use thiserror::Error;

use crate::model::Device;
use crate::model::DeviceSet;
use crate::model::DeviceType;
use crate::model::QatService;

/// A single malformed device entry never aborts discovery of its siblings
/// (spec §4.1 "Failures"); this is the per-entry error `discover()` logs and
/// skips past.
#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("reading device id: {0}")]
    DeviceId(#[source] sysfs::Error),
    #[error("listing drm nodes: {0}")]
    DrmNodes(#[source] sysfs::Error),
    #[error("reading memory: {0}")]
    Memory(#[source] sysfs::Error),
    #[error("physfn: {0}")]
    Physfn(#[source] sysfs::Error),
    #[error("sriov_totalvfs: {0}")]
    TotalVfs(#[source] sysfs::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which sysfs attributes to read beyond the common PF/VF ones (spec §4.1
/// "QAT variant").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Gpu,
    Qat,
}

/// Rated (un-ECC'd) total memory for models this driver knows about, used
/// only to detect whether ECC reservation is in effect (spec §4.1 step 5).
/// Unrecognised models are simply never flagged as ECC-reserved.
const RATED_MEMORY_MIB: &[(&str, u32)] = &[("0x56c0", 14248), ("0x56c1", 14248)];

fn rated_memory_mib(model: &str) -> Option<u32> {
    RATED_MEMORY_MIB
        .iter()
        .find(|(m, _)| *m == model)
        .map(|(_, mib)| *mib)
}

pub struct Discoverer<'a> {
    settings: &'a Settings,
    kind: Kind,
}

impl<'a> Discoverer<'a> {
    pub fn new(settings: &'a Settings, kind: Kind) -> Self {
        Self { settings, kind }
    }

    /// Enumerates the device tree and returns a snapshot. A missing
    /// top-level driver directory yields an empty set with no error (spec
    /// §4.1 "Failures"); a malformed individual entry is logged and
    /// skipped, never aborting discovery of its siblings.
    pub fn discover(&self) -> DeviceSet {
        let mut set = DeviceSet::new();
        let driver_dir = self.settings.driver_dir();

        let entries = match std::fs::read_dir(&driver_dir) {
            Ok(entries) => entries,
            Err(_) => return set,
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("{driver_dir:?}: failed to read directory entry: {e}");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_pci_address(&name) {
                continue;
            }
            match self.discover_one(&driver_dir, &name) {
                Ok(Some(device)) => set.insert(device),
                Ok(None) => {}
                Err(e) => warn!("{}: skipping malformed device entry: {e}", name),
            }
        }

        self.link_vf_indices(&mut set);
        set
    }

    fn discover_one(&self, driver_dir: &Path, address: &str) -> Result<Option<Device>> {
        let device_path = driver_dir.join(address);
        let model = read_model(&device_path)?;
        let uid = format!("{}-{}", sysfs::sanitize_pci_address(address), model);

        let physfn_path = device_path.join("physfn");
        let is_vf = physfn_path.exists();
        let totalvfs_path = device_path.join("sriov_totalvfs");
        let is_pf = !is_vf && totalvfs_path.exists();

        if is_vf && !autoprobe_enabled(&physfn_path) {
            // The parent PF has driver autoprobing disabled, so the kernel
            // never bound a driver to this VF; it is not automatically
            // discoverable (spec §4.1 step 4).
            return Ok(None);
        }

        let drm_dir = device_path.join("drm");
        let cards = sysfs::list_numbered_children(&drm_dir, "card").map_err(Error::DrmNodes)?;
        let Some((card_name, card_index)) = cards.into_iter().next() else {
            // A device without a card node is not yet ready; skip it (spec
            // §4.1 step 2).
            return Ok(None);
        };
        let card_dir = drm_dir.join(&card_name);
        let renders = sysfs::list_numbered_children(&drm_dir, "renderD").map_err(Error::DrmNodes)?;
        let render_index = renders.into_iter().next().map(|(_, idx)| idx);

        let (memory_mib, tile_count) = read_memory_mib(&card_dir)?;

        if is_pf {
            return Ok(Some(self.build_pf(
                address, &device_path, &uid, &model, card_index, render_index, memory_mib,
                tile_count,
            )?));
        }

        if is_vf {
            return Ok(Some(self.build_vf(
                address,
                &device_path,
                &physfn_path,
                &uid,
                &model,
                card_index,
                render_index,
                memory_mib,
            )?));
        }

        // Neither PF nor VF: a standalone, non-SR-IOV-capable accelerator
        // function, addressed directly by workloads.
        Ok(Some(Device {
            uid,
            pci_address: address.to_string(),
            model,
            device_type: DeviceType::Control,
            parent_uid: None,
            card_index: Some(card_index),
            render_index,
            memory_mib,
            timeslice_millicores: 1000,
            max_vfs: 0,
            vf_index: None,
            vf_profile: None,
            ecc_on: false,
            services: self.read_qat_services(&device_path),
            tile_count,
            vfio_group: self.read_vfio_group(&device_path),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_pf(
        &self,
        address: &str,
        device_path: &Path,
        uid: &str,
        model: &str,
        card_index: u32,
        render_index: Option<u32>,
        memory_mib: u32,
        tile_count: u32,
    ) -> Result<Device> {
        let max_vfs =
            sysfs::read_u32(&device_path.join("sriov_totalvfs")).map_err(Error::TotalVfs)?;

        let ecc_on = rated_memory_mib(model)
            .map(|rated| rated > memory_mib)
            .unwrap_or(false);

        Ok(Device {
            uid: uid.to_string(),
            pci_address: address.to_string(),
            model: model.to_string(),
            device_type: DeviceType::Pf,
            parent_uid: None,
            card_index: Some(card_index),
            render_index,
            memory_mib,
            timeslice_millicores: 1000,
            max_vfs,
            vf_index: None,
            vf_profile: None,
            ecc_on,
            services: self.read_qat_services(device_path),
            tile_count,
            vfio_group: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_vf(
        &self,
        address: &str,
        device_path: &Path,
        physfn_path: &Path,
        uid: &str,
        model: &str,
        card_index: u32,
        render_index: Option<u32>,
        memory_mib: u32,
    ) -> Result<Device> {
        let parent_address =
            sysfs::read_link_last_segment(physfn_path).map_err(Error::Physfn)?;
        let parent_model = read_model(&device_path.parent().unwrap().join(&parent_address))
            .unwrap_or_else(|_| model.to_string());
        let parent_uid = format!(
            "{}-{}",
            sysfs::sanitize_pci_address(&parent_address),
            parent_model
        );

        Ok(Device {
            uid: uid.to_string(),
            pci_address: address.to_string(),
            model: model.to_string(),
            device_type: DeviceType::Vf,
            parent_uid: Some(parent_uid),
            card_index: Some(card_index),
            render_index,
            memory_mib,
            timeslice_millicores: 0,
            max_vfs: 0,
            // Filled in by `link_vf_indices` once every sibling is known.
            vf_index: None,
            vf_profile: None,
            ecc_on: false,
            services: self.read_qat_services(device_path),
            tile_count: 0,
            vfio_group: self.read_vfio_group(device_path),
        })
    }

    fn read_qat_services(&self, device_path: &Path) -> std::collections::BTreeSet<QatService> {
        if self.kind != Kind::Qat {
            return std::collections::BTreeSet::new();
        }
        sysfs::read_trimmed(&device_path.join("qat/cfg_services"))
            .map(|raw| QatService::parse_cfg_services(&raw))
            .unwrap_or_default()
    }

    fn read_vfio_group(&self, device_path: &Path) -> Option<u32> {
        if self.kind != Kind::Qat {
            return None;
        }
        sysfs::read_link_last_segment(&device_path.join("iommu_group"))
            .ok()
            .and_then(|s| s.parse().ok())
    }

    /// Derives each VF's `vfIndex` by scanning its parent PF's `virtfn<N>`
    /// symlinks and matching link targets against discovered VF addresses
    /// (spec §4.1 step 4), then rekeys the VF to the deterministic
    /// `<parentUid>-vf<index>` uid the rest of the system predicts a VF by
    /// before it is ever provisioned (spec §8 Scenario B).
    fn link_vf_indices(&self, set: &mut DeviceSet) {
        let driver_dir = self.settings.driver_dir();
        let parent_addresses: Vec<(String, String)> = set
            .pfs()
            .map(|pf| (pf.uid.clone(), pf.pci_address.clone()))
            .collect();

        for (parent_uid, parent_address) in parent_addresses {
            let pf_path = driver_dir.join(&parent_address);
            let virtfns = match sysfs::list_numbered_children(&pf_path, "virtfn") {
                Ok(v) => v,
                Err(_) => continue,
            };
            for (name, index) in virtfns {
                let Ok(vf_address) = sysfs::read_link_last_segment(&pf_path.join(&name)) else {
                    continue;
                };
                let old_uid = set
                    .iter()
                    .find(|d| d.is_vf() && d.pci_address == vf_address)
                    .map(|d| d.uid.clone());
                if let Some(old_uid) = old_uid {
                    if let Some(mut device) = set.remove(&old_uid) {
                        device.vf_index = Some(index);
                        device.parent_uid = Some(parent_uid.clone());
                        device.uid = format!("{parent_uid}-vf{index}");
                        set.insert(device);
                    }
                }
            }
        }
    }
}

/// Reads the parent PF's `sriov_drivers_autoprobe` flag through the VF's
/// `physfn` symlink. Absent or unreadable is treated as enabled, since most
/// kernels default the flag to 1 and older sysfs trees don't expose it at
/// all.
fn autoprobe_enabled(physfn_path: &Path) -> bool {
    sysfs::read_u32(&physfn_path.join("sriov_drivers_autoprobe")).unwrap_or(1) != 0
}

fn read_model(device_path: &Path) -> Result<String> {
    sysfs::read_trimmed(&device_path.join("device"))
        .map(|s| s.to_ascii_lowercase())
        .map_err(Error::DeviceId)
}

/// Sums `lmem_total_bytes` across every `gt*` tile subdirectory (at least
/// one tile assumed); falls back to a single reading directly under the
/// card node when no tile subdirectories exist at all (spec §4.1 step 3,
/// §4.4 "Tile discovery").
fn read_memory_mib(card_dir: &Path) -> Result<(u32, u32)> {
    let tile_dir = card_dir.join("gt");
    let tiles = sysfs::list_numbered_children(&tile_dir, "gt").map_err(Error::Memory)?;

    if tiles.is_empty() {
        let bytes = sysfs::read_u64(&card_dir.join("lmem_total_bytes")).unwrap_or(0);
        return Ok(((bytes >> 20) as u32, 0));
    }

    let mut total_bytes: u64 = 0;
    for (name, _) in &tiles {
        total_bytes += sysfs::read_u64(&tile_dir.join(name).join("lmem_total_bytes")).unwrap_or(0);
    }
    Ok(((total_bytes >> 20) as u32, tiles.len() as u32))
}

/// Matches `^[0-9a-f]{4}:[0-9a-f]{2}:[0-9a-f]{2}\.[0-7]$` (spec §4.1).
fn is_pci_address(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() != 12 {
        return false;
    }
    let is_hex = |b: u8| b.is_ascii_digit() || (b'a'..=b'f').contains(&b);
    bytes[0..4].iter().all(|&b| is_hex(b))
        && bytes[4] == b':'
        && bytes[5..7].iter().all(|&b| is_hex(b))
        && bytes[7] == b':'
        && bytes[8..10].iter().all(|&b| is_hex(b))
        && bytes[10] == b'.'
        && (b'0'..=b'7').contains(&bytes[11])
}

pub fn pci_device_dir(settings: &Settings, address: &str) -> PathBuf {
    settings.driver_dir().join(address)
}
