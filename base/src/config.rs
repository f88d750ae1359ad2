// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Node-wide settings (spec §6). Built once, passed by reference to every
//! component; nothing below the binary crate's `main` reads an environment
//! variable directly.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Default driver-facing polling window (spec §4.4): 10 attempts at 1s.
const DEFAULT_POLL_ATTEMPTS: u32 = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the device tree, default `/sys` (spec §6).
    pub sysfs_root: PathBuf,
    /// Root prefix for emitted device-node paths, default `/dev/dri`.
    pub devfs_root: PathBuf,
    /// Root of the CDI spec registry, default `/etc/cdi`.
    pub cdi_root: PathBuf,
    /// Path to the prepared-claims store file.
    pub store_path: PathBuf,
    /// Optional path to the per-model default-memory JSON document.
    pub defaults_path: Option<PathBuf>,
    /// Identifier published alongside allocatable resources.
    pub node_name: String,
    /// Kernel driver name this instance discovers under, e.g. `i915` or `qat`.
    pub driver_name: String,
    /// CDI vendor component, e.g. `intel.com`.
    pub vendor: String,
    /// CDI kind component, e.g. `gpu` or `qat`.
    pub kind: String,
    /// Polling attempts/interval for AWAITING_DRM and AWAITING_EMPTY.
    pub drm_poll_attempts: u32,
    pub drm_poll_interval: Duration,
    pub empty_poll_attempts: u32,
    pub empty_poll_interval: Duration,
}

impl Settings {
    /// Layers the spec §6 environment variables over built-in defaults for
    /// a given driver/vendor/kind triple. `SYSFS_ROOT` is honoured only if
    /// the path actually exists, matching spec §6.
    pub fn from_env(driver_name: &str, vendor: &str, kind: &str) -> Self {
        let mut settings = Self::defaults(driver_name, vendor, kind);

        if let Ok(sysfs_root) = std::env::var("SYSFS_ROOT") {
            let path = PathBuf::from(sysfs_root);
            if path.exists() {
                settings.sysfs_root = path;
            }
        }
        if let Ok(devfs_root) = std::env::var("DEVFS_ROOT") {
            settings.devfs_root = PathBuf::from(devfs_root);
        } else if let Ok(dev_dri_path) = std::env::var("DEV_DRI_PATH") {
            settings.devfs_root = PathBuf::from(dev_dri_path);
        }
        if let Ok(node_name) = std::env::var("NODE_NAME") {
            settings.node_name = node_name;
        }
        settings
    }

    pub fn defaults(driver_name: &str, vendor: &str, kind: &str) -> Self {
        Settings {
            sysfs_root: PathBuf::from("/sys"),
            devfs_root: PathBuf::from("/dev/dri"),
            cdi_root: PathBuf::from("/etc/cdi"),
            store_path: PathBuf::from(format!(
                "/var/lib/kubelet/plugins/{vendor}-{kind}/prepared-claims.json"
            )),
            defaults_path: None,
            node_name: "127.0.0.1".to_string(),
            driver_name: driver_name.to_string(),
            vendor: vendor.to_string(),
            kind: kind.to_string(),
            drm_poll_attempts: DEFAULT_POLL_ATTEMPTS,
            drm_poll_interval: DEFAULT_POLL_INTERVAL,
            empty_poll_attempts: DEFAULT_POLL_ATTEMPTS,
            empty_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// The sysfs directory this driver enumerates devices under:
    /// `<sysfs_root>/bus/pci/drivers/<driver_name>`.
    pub fn driver_dir(&self) -> PathBuf {
        self.sysfs_root
            .join("bus/pci/drivers")
            .join(&self.driver_name)
    }

    pub fn drm_class_dir(&self) -> PathBuf {
        self.sysfs_root.join("class/drm")
    }

    pub fn qualified_name(&self, uid: &str) -> String {
        format!("{}/{}={}", self.vendor, self.kind, uid)
    }

    pub fn cdi_spec_dir(&self) -> &Path {
        &self.cdi_root
    }
}
