// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The VF Provisioner (C4, spec §4.4): drives one PF through its SR-IOV
//! enable/teardown state machine.

pub mod state;

use std::path::Path;
use std::thread;

use base::sysfs;
use base::CancelToken;
use base::Settings;
use devices::discover::pci_device_dir;
use devices::Device;
use devices::DeviceSet;
use devices::Discoverer;
use devices::Kind;
use remain::sorted;
use thiserror::Error;

pub use state::PfState;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("operation cancelled before the PF reached a settled state")]
    Cancelled,
    #[error("DRM nodes did not appear within the polling window")]
    DrmTimeout,
    #[error("residual virtfn links remained within the polling window")]
    EmptyTimeout,
    #[error("requested VF indices are not a contiguous [0, N) range")]
    InvalidVfRange,
    #[error("PF is not BARE: another provisioning attempt is in flight or VFs already exist")]
    PfBusy,
    #[error("provisioning failed and the rollback teardown also failed: {0}")]
    RollbackFailed(Box<Error>),
    #[error(transparent)]
    Sysfs(#[from] sysfs::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single VF slot to bring up on a PF, already resolved by the Profile
/// Engine (spec §4.5 step 2).
#[derive(Debug, Clone)]
pub struct VfSpec {
    pub index: u32,
    pub profile_name: String,
    pub memory_mib: u32,
}

pub struct Provisioner<'a> {
    settings: &'a Settings,
    kind: Kind,
    observed: std::cell::RefCell<Vec<PfState>>,
}

impl<'a> Provisioner<'a> {
    pub fn new(settings: &'a Settings, kind: Kind) -> Self {
        Self {
            settings,
            kind,
            observed: std::cell::RefCell::new(Vec::new()),
        }
    }

    /// The state-machine transitions (spec §4.4's "observable transitions"
    /// column) recorded across every `provision`/`teardown` call made on
    /// this `Provisioner` so far, oldest first.
    pub fn observed_states(&self) -> Vec<PfState> {
        self.observed.borrow().clone()
    }

    fn record(&self, state: PfState) {
        self.observed.borrow_mut().push(state);
    }

    /// Brings up `vf_specs.len()` VFs on `pf`, returning a snapshot
    /// restricted to the freshly created VFs. On an `AWAITING_DRM` timeout,
    /// rolls back synchronously and returns [`Error::DrmTimeout`], unless
    /// the rollback itself fails, in which case the PF is left for manual
    /// operator recovery and a [`Error::Sysfs`]/[`Error::EmptyTimeout`]
    /// wrapped in the rollback attempt is returned instead (the caller
    /// distinguishes "provisioning failed" from "provisioning failed and
    /// cleanup also failed" by matching on which variant comes back after a
    /// failed `teardown` call, per spec §4.4 "Rollback policy").
    pub fn provision(
        &self,
        pf: &Device,
        vf_specs: &[VfSpec],
        cancel: &CancelToken,
    ) -> Result<DeviceSet> {
        if !pf.is_pf() {
            return Err(Error::PfBusy);
        }
        validate_contiguous(vf_specs)?;
        if vf_specs.len() as u32 > pf.max_vfs {
            return Err(Error::InvalidVfRange);
        }

        let pf_dir = pci_device_dir(self.settings, &pf.pci_address);
        let named: Vec<&VfSpec> = vf_specs
            .iter()
            .filter(|v| v.profile_name != profiles::FAIR_SHARE)
            .collect();

        if !named.is_empty() {
            self.record(PfState::Preconfiguring);
            if let Err(e) = self.preconfigure(&pf_dir, &named) {
                self.rollback_preconfigure(&pf_dir, &named);
                self.record(PfState::Bare);
                return Err(e);
            }
        }

        if cancel.is_cancelled() {
            if !named.is_empty() {
                self.rollback_preconfigure(&pf_dir, &named);
                self.record(PfState::Bare);
            }
            return Err(Error::Cancelled);
        }

        self.record(PfState::Enabling);
        sysfs::write_u32(&pf_dir.join("sriov_numvfs"), vf_specs.len() as u32)?;

        self.record(PfState::AwaitingDrm);
        match self.await_drm(&pf_dir, vf_specs.len() as u32, cancel) {
            Ok(()) => {
                self.record(PfState::Live);
                Ok(self.discover_vfs_of(&pf.uid))
            }
            Err(e) => match self.teardown(pf, cancel) {
                Ok(()) => Err(e),
                Err(teardown_err) => Err(Error::RollbackFailed(Box::new(teardown_err))),
            },
        }
    }

    /// Drives a PF from LIVE back to BARE: writes `numVfs = 0` and waits for
    /// every `virtfn*` link to disappear.
    pub fn teardown(&self, pf: &Device, cancel: &CancelToken) -> Result<()> {
        let pf_dir = pci_device_dir(self.settings, &pf.pci_address);
        self.record(PfState::TearingDown);
        sysfs::write_u32(&pf_dir.join("sriov_numvfs"), 0)?;

        self.record(PfState::AwaitingEmpty);
        self.await_empty(&pf_dir, cancel)?;

        // Best-effort: harmless no-op for a PF that was never preconfigured.
        let _ = sysfs::write(&pf_dir.join("prelim_iov/pf/auto_provisioning"), "1");
        self.record(PfState::Bare);
        Ok(())
    }

    fn preconfigure(&self, pf_dir: &Path, named: &[&VfSpec]) -> Result<()> {
        sysfs::write(&pf_dir.join("prelim_iov/pf/auto_provisioning"), "0")?;
        for spec in named {
            let attr = pf_dir
                .join(format!("prelim_iov/vf{}/gt0", spec.index))
                .join("lmem_quota");
            let bytes = (spec.memory_mib as u64) << 20;
            sysfs::write(&attr, &bytes.to_string())?;
        }
        Ok(())
    }

    fn rollback_preconfigure(&self, pf_dir: &Path, named: &[&VfSpec]) {
        for spec in named {
            let attr = pf_dir
                .join(format!("prelim_iov/vf{}/gt0", spec.index))
                .join("lmem_quota");
            let _ = sysfs::write(&attr, "0");
        }
        let _ = sysfs::write(&pf_dir.join("prelim_iov/pf/auto_provisioning"), "1");
    }

    fn await_drm(&self, pf_dir: &Path, expected_vfs: u32, cancel: &CancelToken) -> Result<()> {
        poll(
            self.settings.drm_poll_attempts,
            self.settings.drm_poll_interval,
            cancel,
            Error::DrmTimeout,
            || {
                let virtfns = sysfs::list_numbered_children(pf_dir, "virtfn").unwrap_or_default();
                virtfns.len() as u32 == expected_vfs
                    && virtfns.iter().all(|(name, _)| {
                        sysfs::read_link_last_segment(&pf_dir.join(name))
                            .map(|addr| {
                                let vf_dir = pf_dir
                                    .parent()
                                    .map(|d| d.join(&addr))
                                    .unwrap_or_default();
                                sysfs::list_numbered_children(&vf_dir.join("drm"), "card")
                                    .map(|cards| !cards.is_empty())
                                    .unwrap_or(false)
                            })
                            .unwrap_or(false)
                    })
            },
        )
    }

    fn await_empty(&self, pf_dir: &Path, cancel: &CancelToken) -> Result<()> {
        poll(
            self.settings.empty_poll_attempts,
            self.settings.empty_poll_interval,
            cancel,
            Error::EmptyTimeout,
            || {
                sysfs::list_numbered_children(pf_dir, "virtfn")
                    .map(|v| v.is_empty())
                    .unwrap_or(false)
            },
        )
    }

    fn discover_vfs_of(&self, parent_uid: &str) -> DeviceSet {
        let discoverer = Discoverer::new(self.settings, self.kind);
        let all = discoverer.discover();
        let mut fresh = DeviceSet::new();
        for vf in all.vfs_of(parent_uid) {
            fresh.insert(vf.clone());
        }
        fresh
    }
}

fn validate_contiguous(vf_specs: &[VfSpec]) -> Result<()> {
    let mut indices: Vec<u32> = vf_specs.iter().map(|v| v.index).collect();
    indices.sort_unstable();
    for (expected, index) in indices.iter().enumerate() {
        if *index != expected as u32 {
            return Err(Error::InvalidVfRange);
        }
    }
    Ok(())
}

fn poll(
    attempts: u32,
    interval: std::time::Duration,
    cancel: &CancelToken,
    timeout_err: Error,
    mut ready: impl FnMut() -> bool,
) -> Result<()> {
    for attempt in 0..attempts.max(1) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if ready() {
            return Ok(());
        }
        if attempt + 1 < attempts {
            thread::sleep(interval);
        }
    }
    Err(timeout_err)
}
