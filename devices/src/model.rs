// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The `Device` and `DeviceSet` data model (spec §3).

use std::collections::BTreeSet;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// A QAT crypto/compression service a PF or VF exposes. Unused by GPU
/// devices, whose `services` set is always empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QatService {
    AsymCrypto,
    DataCompression,
    SymCrypto,
}

impl QatService {
    /// Parses the `;`-separated tokens `qat/cfg_services` uses, e.g.
    /// `"sym;asym"` or `"sym;asym;dc"`. Unknown tokens are ignored rather
    /// than rejected, since the kernel adds new service tokens over time.
    pub fn parse_cfg_services(raw: &str) -> BTreeSet<QatService> {
        raw.split(';')
            .filter_map(|token| match token.trim() {
                "sym" => Some(QatService::SymCrypto),
                "asym" => Some(QatService::AsymCrypto),
                "dc" => Some(QatService::DataCompression),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Pf,
    Vf,
    Control,
}

/// One physical or virtual accelerator function (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub uid: String,
    pub pci_address: String,
    pub model: String,
    pub device_type: DeviceType,
    /// Empty for PFs; the parent PF's uid for VFs.
    pub parent_uid: Option<String>,
    pub card_index: Option<u32>,
    pub render_index: Option<u32>,
    pub memory_mib: u32,
    /// 1000 == the whole PF.
    pub timeslice_millicores: u32,
    /// 0 for PFs without SR-IOV support and for VFs.
    pub max_vfs: u32,
    /// 0-based index within the parent PF; VFs only.
    pub vf_index: Option<u32>,
    /// Named profile assigned to this VF, filled in by the Profile Engine.
    pub vf_profile: Option<String>,
    pub ecc_on: bool,
    pub services: BTreeSet<QatService>,
    /// Number of compute tiles discovered under this PF's `gt/gt*`
    /// subdirectories (spec §4.4 "Tile discovery"). Zero for VFs.
    pub tile_count: u32,
    /// QAT only: the IOMMU group number backing this VF's VFIO device node.
    pub vfio_group: Option<u32>,
}

impl Device {
    pub fn is_pf(&self) -> bool {
        self.device_type == DeviceType::Pf
    }

    pub fn is_vf(&self) -> bool {
        self.device_type == DeviceType::Vf
    }
}

/// An immutable snapshot of every device currently visible on the node,
/// keyed by uid (spec §3 "Ownership").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSet {
    devices: HashMap<String, Device>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: Device) {
        self.devices.insert(device.uid.clone(), device);
    }

    pub fn get(&self, uid: &str) -> Option<&Device> {
        self.devices.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.devices.contains_key(uid)
    }

    pub fn remove(&mut self, uid: &str) -> Option<Device> {
        self.devices.remove(uid)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn pfs(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.is_pf())
    }

    /// All live VFs whose `parent_uid` is `parent`, ordered by `vf_index`.
    pub fn vfs_of(&self, parent: &str) -> Vec<&Device> {
        let mut vfs: Vec<&Device> = self
            .devices
            .values()
            .filter(|d| d.is_vf() && d.parent_uid.as_deref() == Some(parent))
            .collect();
        vfs.sort_by_key(|d| d.vf_index.unwrap_or(u32::MAX));
        vfs
    }

    /// Removes every VF whose `parent_uid` is `parent`; used when a PF's
    /// VFs are torn down, since they must disappear atomically (spec §3
    /// invariant).
    pub fn remove_vfs_of(&mut self, parent: &str) -> Vec<Device> {
        let removed_uids: Vec<String> = self
            .devices
            .values()
            .filter(|d| d.is_vf() && d.parent_uid.as_deref() == Some(parent))
            .map(|d| d.uid.clone())
            .collect();
        removed_uids
            .into_iter()
            .filter_map(|uid| self.devices.remove(&uid))
            .collect()
    }

    /// Merges another snapshot into this one, overwriting any uid present in
    /// both. Used after a targeted re-discovery restricted to newly
    /// provisioned VFs (spec §4.5 step 6).
    pub fn merge(&mut self, other: DeviceSet) {
        for device in other.devices.into_values() {
            self.insert(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cfg_services_handles_multiple_tokens() {
        let services = QatService::parse_cfg_services("sym;asym");
        assert_eq!(services.len(), 2);
        assert!(services.contains(&QatService::SymCrypto));
        assert!(services.contains(&QatService::AsymCrypto));
    }

    #[test]
    fn parse_cfg_services_ignores_unknown_tokens() {
        let services = QatService::parse_cfg_services("sym;bogus");
        assert_eq!(services.len(), 1);
    }

    fn vf(parent: &str, index: u32) -> Device {
        Device {
            uid: format!("{parent}-vf{index}"),
            pci_address: String::new(),
            model: "0x56c0".to_string(),
            device_type: DeviceType::Vf,
            parent_uid: Some(parent.to_string()),
            card_index: None,
            render_index: None,
            memory_mib: 4032,
            timeslice_millicores: 0,
            max_vfs: 0,
            vf_index: Some(index),
            vf_profile: None,
            ecc_on: false,
            services: BTreeSet::new(),
            tile_count: 0,
            vfio_group: None,
        }
    }

    #[test]
    fn vfs_of_sorts_by_index() {
        let mut set = DeviceSet::new();
        set.insert(vf("pf0", 1));
        set.insert(vf("pf0", 0));
        let vfs = set.vfs_of("pf0");
        assert_eq!(vfs[0].vf_index, Some(0));
        assert_eq!(vfs[1].vf_index, Some(1));
    }

    #[test]
    fn remove_vfs_of_removes_only_matching_parent() {
        let mut set = DeviceSet::new();
        set.insert(vf("pf0", 0));
        set.insert(vf("pf1", 0));
        let removed = set.remove_vfs_of("pf0");
        assert_eq!(removed.len(), 1);
        assert_eq!(set.len(), 1);
        assert!(set.vfs_of("pf1").len() == 1);
    }
}
