// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Node State Manager (C5, spec §4.5): the DRA server's `Prepare` /
//! `Unprepare` surface, translated into plain Rust method calls. A single
//! mutex serialises every mutating path, matching spec §5's preference for
//! locking simplicity over fine-grained concurrency.

use std::collections::HashMap;
use std::sync::Mutex;

use base::CancelToken;
use base::Settings;
use cdi::Registry;
use devices::Device;
use devices::DeviceSet;
use devices::Discoverer;
use devices::Kind;
use log::warn;
use profiles::Defaults;
use profiles::Engine;
use provisioner::Provisioner;
use provisioner::VfSpec;

use crate::claims::ClaimAllocation;
use crate::claims::ClaimKind;
use crate::store::PreparedEntry;
use crate::store::PreparedStore;
use crate::Error;
use crate::Result;

/// Parses the deterministic `<parentUid>-vf<index>` naming scheme a VF
/// carries before it is ever provisioned (spec §8 Scenario B), returning
/// `None` for uids that are not VF-shaped (PFs, CONTROL devices).
pub fn parse_pending_vf_uid(uid: &str) -> Option<(String, u32)> {
    let pos = uid.rfind("-vf")?;
    let (parent, suffix) = uid.split_at(pos);
    let index: u32 = suffix[3..].parse().ok()?;
    Some((parent.to_string(), index))
}

struct VfRequest {
    index: u32,
    requested_memory_mib: u32,
    profile_name: String,
}

struct PfBatch {
    pf_uid: String,
    model: String,
    max_vfs: u32,
    memory_mib: u32,
    requests: Vec<VfRequest>,
}

struct Inner {
    devices: DeviceSet,
    store: PreparedStore,
}

pub struct NodeStateManager<'a> {
    settings: &'a Settings,
    engine: Engine,
    registry: Registry<'a>,
    provisioner: Provisioner<'a>,
    inner: Mutex<Inner>,
}

impl<'a> NodeStateManager<'a> {
    /// Breaks the discovery/CDI/state cyclic-initialisation dependency with
    /// the strict order spec §9 names: discover, publish CDI, then load the
    /// prepared store.
    pub fn new(settings: &'a Settings, kind: Kind) -> Self {
        let devices = Discoverer::new(settings, kind).discover();
        let registry = Registry::new(settings);
        if let Err(e) = registry.sync(&devices, true) {
            warn!("initial CDI publish failed: {e}");
        }
        let store = PreparedStore::load(&settings.store_path);
        let engine = Engine::new(Defaults::load(settings.defaults_path.as_deref()));

        Self {
            settings,
            engine,
            registry,
            provisioner: Provisioner::new(settings, kind),
            inner: Mutex::new(Inner { devices, store }),
        }
    }

    pub fn prepare(
        &self,
        claims: &[ClaimAllocation],
        cancel: &CancelToken,
    ) -> Vec<(String, Result<Vec<String>>)> {
        let mut inner = self.inner.lock().expect("state mutex poisoned");
        let mut outcomes = Vec::with_capacity(claims.len());
        let mut remaining: Vec<&ClaimAllocation> = Vec::new();

        for claim in claims {
            if claim.kind == ClaimKind::Monitor {
                let names = self.registry.names(inner.devices.uids());
                outcomes.push((claim.claim_uid.clone(), Ok(names)));
                continue;
            }
            if let Some(entry) = inner.store.get(&claim.claim_uid) {
                let uids: Vec<String> = entry.devices.iter().map(|d| d.uid.clone()).collect();
                let names = self.registry.names(uids.iter().map(String::as_str));
                outcomes.push((claim.claim_uid.clone(), Ok(names)));
                continue;
            }
            remaining.push(claim);
        }

        if remaining.is_empty() {
            return outcomes;
        }

        let mut claim_errors: HashMap<String, Error> = HashMap::new();
        let mut batches: HashMap<String, PfBatch> = HashMap::new();
        for claim in &remaining {
            if let Err(e) = self.stage_claim(&inner.devices, &inner.store, claim, &mut batches) {
                claim_errors.insert(claim.claim_uid.clone(), e);
            }
        }

        for batch in batches.values_mut() {
            self.add_leftover_vfs(batch);
        }

        // `cleanup_failed` is true for a PF whose rollback itself failed
        // (ErrProvisionWithCleanupFailure); false for an ordinary rollback
        // (ErrProvisionFailed).
        let mut pf_errors: HashMap<String, bool> = HashMap::new();
        for (pf_uid, batch) in &batches {
            if let Err(cleanup_failed) = self.provision_pf(&mut inner, pf_uid, batch, cancel) {
                pf_errors.insert(pf_uid.clone(), cleanup_failed);
            }
        }

        let sync_result = self.registry.sync(&inner.devices, false);
        if let Err(ref e) = sync_result {
            warn!("CDI sync failed after provisioning: {e}");
        }

        for claim in &remaining {
            if let Some(e) = claim_errors.remove(&claim.claim_uid) {
                outcomes.push((claim.claim_uid.clone(), Err(e)));
                continue;
            }
            if let Some(pf_uid) = claim.devices.iter().find_map(|d| {
                parse_pending_vf_uid(&d.uid).map(|(parent, _)| parent)
            }) {
                if let Some(cleanup_failed) = pf_errors.get(&pf_uid) {
                    let err = if *cleanup_failed {
                        Error::ProvisionWithCleanupFailure(pf_uid.clone())
                    } else {
                        Error::ProvisionFailed(pf_uid.clone())
                    };
                    outcomes.push((claim.claim_uid.clone(), Err(err)));
                    continue;
                }
            }
            if let Err(ref e) = sync_result {
                outcomes.push((claim.claim_uid.clone(), Err(Error::CdiWrite(e.to_string()))));
                continue;
            }
            match self.finish_claim(&mut inner, claim) {
                Ok(names) => outcomes.push((claim.claim_uid.clone(), Ok(names))),
                Err(e) => outcomes.push((claim.claim_uid.clone(), Err(e))),
            }
        }

        outcomes
    }

    pub fn unprepare(
        &self,
        claim_uids: &[String],
        cancel: &CancelToken,
    ) -> Vec<(String, Result<()>)> {
        let mut inner = self.inner.lock().expect("state mutex poisoned");
        claim_uids
            .iter()
            .map(|claim_uid| {
                let result = self.unprepare_one(&mut inner, claim_uid, cancel);
                (claim_uid.clone(), result)
            })
            .collect()
    }

    /// Stages one claim's not-yet-live devices into their target PF's
    /// batch (spec §4.5 Prepare steps 2-3); already-live devices need no
    /// staging at all.
    fn stage_claim(
        &self,
        devices: &DeviceSet,
        store: &PreparedStore,
        claim: &ClaimAllocation,
        batches: &mut HashMap<String, PfBatch>,
    ) -> Result<()> {
        for device in &claim.devices {
            if devices.contains(&device.uid) {
                // Already live, but if another claim already holds it the
                // scheduler double-booked a device: reject rather than hand
                // the same uid to two claims (spec §8 Scenario F).
                if store.other_claim_holds_device(&device.uid, &claim.claim_uid) {
                    return Err(Error::NoSuchDevice(device.uid.clone()));
                }
                continue;
            }

            let Some((parent_uid, index)) = parse_pending_vf_uid(&device.uid) else {
                return Err(Error::NoSuchDevice(device.uid.clone()));
            };
            let Some(parent) = devices.get(&parent_uid) else {
                return Err(Error::InvalidAllocation(format!(
                    "{}: parent PF {parent_uid} no longer exists",
                    device.uid
                )));
            };
            if !parent.is_pf() || !devices.vfs_of(&parent_uid).is_empty() {
                return Err(Error::PfBusy(parent_uid));
            }

            let profile_name = match &device.profile_name {
                Some(name) if !name.is_empty() => name.clone(),
                _ => {
                    let (_, name) = self
                        .engine
                        .pick(&parent.model, device.requested_memory_mib, device.ecc_on)?;
                    name.to_string()
                }
            };

            let batch = batches.entry(parent_uid.clone()).or_insert_with(|| PfBatch {
                pf_uid: parent_uid.clone(),
                model: parent.model.clone(),
                max_vfs: parent.max_vfs,
                memory_mib: parent.memory_mib,
                requests: Vec::new(),
            });
            if !batch.requests.iter().any(|r| r.index == index) {
                batch.requests.push(VfRequest {
                    index,
                    requested_memory_mib: device.requested_memory_mib,
                    profile_name,
                });
            }
        }
        Ok(())
    }

    /// Synthesises additional, unallocated VFs out of a PF's leftover
    /// memory once at least one requested VF uses a named profile (spec
    /// §4.5 Prepare step 4). Fair-share claims already span the whole PF
    /// and need no leftover synthesis.
    fn add_leftover_vfs(&self, batch: &mut PfBatch) {
        if batch
            .requests
            .iter()
            .any(|r| r.profile_name == profiles::FAIR_SHARE)
        {
            return;
        }
        // A model with no memory dimension (e.g. QAT's service-based VFs)
        // has nothing to synthesise leftover VFs out of.
        if batch.memory_mib == 0 {
            return;
        }
        let profiles = self.engine.profiles_for(&batch.model);
        if profiles.is_empty() {
            return;
        }

        let used_memory: u32 = batch
            .requests
            .iter()
            .filter_map(|r| self.engine.profile_named(&batch.model, &r.profile_name))
            .map(|p| p.max_memory_mib)
            .sum();
        let mut leftover = batch.memory_mib.saturating_sub(used_memory);
        let mut next_index = batch.requests.iter().map(|r| r.index + 1).max().unwrap_or(0);

        for profile in profiles {
            while next_index < batch.max_vfs && leftover >= profile.max_memory_mib {
                batch.requests.push(VfRequest {
                    index: next_index,
                    requested_memory_mib: profile.max_memory_mib,
                    profile_name: profile.name.to_string(),
                });
                leftover -= profile.max_memory_mib;
                next_index += 1;
            }
        }
    }

    /// Provisions one PF's full batch. Returns `Err(cleanup_failed)` on
    /// failure: `true` if the rollback teardown also failed.
    fn provision_pf(
        &self,
        inner: &mut Inner,
        pf_uid: &str,
        batch: &PfBatch,
        cancel: &CancelToken,
    ) -> std::result::Result<(), bool> {
        let profile_names: Vec<&str> = batch
            .requests
            .iter()
            .map(|r| r.profile_name.as_str())
            .collect();
        if self.engine.validate_homogeneity(profile_names).is_err() {
            return Err(false);
        }

        let Some(pf) = inner.devices.get(pf_uid).cloned() else {
            return Err(false);
        };

        let mut vf_specs: Vec<VfSpec> = batch
            .requests
            .iter()
            .map(|r| VfSpec {
                index: r.index,
                profile_name: r.profile_name.clone(),
                memory_mib: r.requested_memory_mib,
            })
            .collect();
        vf_specs.sort_by_key(|v| v.index);

        match self.provisioner.provision(&pf, &vf_specs, cancel) {
            Ok(fresh) => {
                inner.devices.merge(fresh);
                Ok(())
            }
            Err(provisioner::Error::RollbackFailed(_)) => Err(true),
            Err(e) => {
                warn!("{pf_uid}: VF provisioning failed: {e}");
                Err(false)
            }
        }
    }

    fn finish_claim(&self, inner: &mut Inner, claim: &ClaimAllocation) -> Result<Vec<String>> {
        for device in &claim.devices {
            if !inner.devices.contains(&device.uid) {
                return Err(Error::NoSuchDevice(device.uid.clone()));
            }
        }

        let names = self.registry.names(claim.uids());
        inner.store.insert(
            claim.claim_uid.clone(),
            PreparedEntry {
                devices: claim.devices.clone(),
                err: None,
            },
        );
        inner.store.persist(&self.settings.store_path)?;
        Ok(names)
    }

    fn unprepare_one(
        &self,
        inner: &mut Inner,
        claim_uid: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let Some(entry) = inner.store.get(claim_uid).cloned() else {
            return Ok(());
        };

        let mut parent_pfs: Vec<String> = Vec::new();
        for device in &entry.devices {
            if let Some((parent_uid, _)) = parse_pending_vf_uid(&device.uid) {
                if !parent_pfs.contains(&parent_uid) {
                    parent_pfs.push(parent_uid);
                }
            }
        }

        for pf_uid in &parent_pfs {
            let vfs: Vec<Device> = inner
                .devices
                .vfs_of(pf_uid)
                .into_iter()
                .cloned()
                .collect();
            let still_held = vfs
                .iter()
                .any(|vf| inner.store.other_claim_holds_device(&vf.uid, claim_uid));
            if still_held {
                continue;
            }

            // Withdraw CDI entries before the sysfs teardown write (spec §9
            // "PF draining policy"): a vanishing VF must never still be
            // injectable by the container runtime.
            for vf in &vfs {
                if let Err(e) = self.registry.delete(&vf.uid) {
                    warn!("{}: failed to withdraw CDI entry: {e}", vf.uid);
                }
            }

            let Some(pf) = inner.devices.get(pf_uid).cloned() else {
                continue;
            };
            inner.devices.remove_vfs_of(pf_uid);
            if let Err(e) = self.provisioner.teardown(&pf, cancel) {
                warn!("{pf_uid}: teardown failed: {e}");
                return Err(Error::ProvisionFailed(pf_uid.clone()));
            }
        }

        inner.store.remove(claim_uid);
        inner.store.persist(&self.settings.store_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::time::Duration;

    use crate::claims::AllocatedDevice;

    /// Builds a synthetic `/sys`+CDI+store tree under a fresh `TempDir` and
    /// fast polling parameters, so AWAITING_DRM/AWAITING_EMPTY settle in
    /// milliseconds instead of the real 10s default (spec §4.4 timings).
    fn fast_settings(driver: &str) -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::defaults(driver, "intel.com", "gpu");
        settings.sysfs_root = dir.path().join("sys");
        settings.cdi_root = dir.path().join("cdi");
        settings.store_path = dir.path().join("store.json");
        settings.drm_poll_attempts = 2;
        settings.drm_poll_interval = Duration::from_millis(1);
        settings.empty_poll_attempts = 2;
        settings.empty_poll_interval = Duration::from_millis(1);
        fs::create_dir_all(settings.driver_dir()).unwrap();
        (dir, settings)
    }

    /// A PF with a fully pre-populated `prelim_iov` tree (as a real i915/QAT
    /// PF's sysfs exposes for every potential VF slot up to `sriov_totalvfs`
    /// before any VF is enabled), so named-profile provisioning's attribute
    /// writes land on real files instead of failing with "not found".
    fn write_pf(settings: &Settings, address: &str, model: &str, max_vfs: u32, lmem_bytes: u64) {
        let path = settings.driver_dir().join(address);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("device"), format!("{model}\n")).unwrap();
        fs::write(path.join("sriov_totalvfs"), max_vfs.to_string()).unwrap();
        fs::write(path.join("sriov_numvfs"), "0").unwrap();
        fs::write(path.join("sriov_drivers_autoprobe"), "1").unwrap();
        let card = path.join("drm/card0");
        fs::create_dir_all(card.join("gt/gt0")).unwrap();
        fs::write(card.join("gt/gt0/lmem_total_bytes"), lmem_bytes.to_string()).unwrap();
        fs::create_dir_all(path.join("prelim_iov/pf")).unwrap();
        fs::write(path.join("prelim_iov/pf/auto_provisioning"), "1").unwrap();
        for i in 0..max_vfs {
            fs::create_dir_all(path.join(format!("prelim_iov/vf{i}/gt0"))).unwrap();
            fs::write(path.join(format!("prelim_iov/vf{i}/gt0/lmem_quota")), "0").unwrap();
        }
    }

    /// Stands in for the kernel having already materialised a VF's PCI
    /// function and DRM node by the time the driver's first AWAITING_DRM
    /// poll attempt runs, exactly as `provisioner`'s own tests do.
    fn simulate_kernel_vf(settings: &Settings, pf_address: &str, vf_address: &str, model: &str, index: u32) {
        let pf_path = settings.driver_dir().join(pf_address);
        let vf_path = settings.driver_dir().join(vf_address);
        fs::create_dir_all(&vf_path).unwrap();
        fs::write(vf_path.join("device"), format!("{model}\n")).unwrap();
        symlink(&pf_path, vf_path.join("physfn")).unwrap();
        symlink(&vf_path, pf_path.join(format!("virtfn{index}"))).unwrap();
        let card = vf_path.join(format!("drm/card{}", index + 1));
        fs::create_dir_all(&card).unwrap();
        fs::write(card.join("lmem_total_bytes"), "0").unwrap();
    }

    fn claim(claim_uid: &str, uid: &str, requested_memory_mib: u32, profile_name: Option<&str>) -> ClaimAllocation {
        ClaimAllocation {
            claim_uid: claim_uid.to_string(),
            kind: ClaimKind::Normal,
            devices: vec![AllocatedDevice {
                uid: uid.to_string(),
                requested_memory_mib,
                ecc_on: false,
                profile_name: profile_name.map(str::to_string),
            }],
        }
    }

    fn numvfs(settings: &Settings, address: &str) -> u32 {
        base::sysfs::read_u32(&settings.driver_dir().join(address).join("sriov_numvfs")).unwrap()
    }

    #[test]
    fn scenario_a_single_gpu_claim_needs_no_provisioning() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:02.0", "0x56c0", 0, 14248 * (1 << 20));

        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();
        let results = manager.prepare(
            &[claim("claim-a", "0000-00-02-0-0x56c0", 4096, None)],
            &cancel,
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "claim-a");
        let names = results[0].1.as_ref().unwrap();
        assert_eq!(names, &vec!["intel.com/gpu=0000-00-02-0-0x56c0".to_string()]);
        // No provisioning: sriov_numvfs is untouched.
        assert_eq!(numvfs(&settings, "0000:00:02.0"), 0);
    }

    #[test]
    fn scenario_b_vf_from_bare_pf_batches_leftover_utilisation() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:03.0", "0x56c0", 16, 14248 * (1 << 20));
        simulate_kernel_vf(&settings, "0000:00:03.0", "0000:00:03.1", "0x56c1", 0);
        simulate_kernel_vf(&settings, "0000:00:03.0", "0000:00:03.2", "0x56c1", 1);

        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();
        let results = manager.prepare(
            &[claim("claim-b", "0000-00-03-0-0x56c0-vf0", 8064, None)],
            &cancel,
        );

        assert_eq!(results.len(), 1);
        let names = results[0].1.as_ref().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            names,
            &vec!["intel.com/gpu=0000-00-03-0-0x56c0-vf0".to_string()]
        );
        assert_eq!(numvfs(&settings, "0000:00:03.0"), 2);
    }

    #[test]
    fn scenario_c_cross_claim_pickup_batches_one_write() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:03.0", "0x56c0", 16, 14248 * (1 << 20));
        simulate_kernel_vf(&settings, "0000:00:03.0", "0000:00:03.1", "0x56c1", 0);
        simulate_kernel_vf(&settings, "0000:00:03.0", "0000:00:03.2", "0x56c1", 1);

        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();
        let claim1 = claim(
            "claim-c1",
            "0000-00-03-0-0x56c0-vf0",
            8064,
            Some("flex170_m2"),
        );
        let claim2 = claim(
            "claim-c2",
            "0000-00-03-0-0x56c0-vf1",
            8064,
            Some("flex170_m2"),
        );
        let results = manager.prepare(&[claim1, claim2], &cancel);

        assert_eq!(results.len(), 2);
        for (claim_uid, result) in &results {
            result
                .as_ref()
                .unwrap_or_else(|e| panic!("{claim_uid}: {e}"));
        }
        assert_eq!(numvfs(&settings, "0000:00:03.0"), 2);

        // A later Prepare for claim-c2 alone must not provision again: it
        // is already in the prepared store from the batched call above.
        let before = numvfs(&settings, "0000:00:03.0");
        let again = manager.prepare(
            &[claim(
                "claim-c2",
                "0000-00-03-0-0x56c0-vf1",
                8064,
                Some("flex170_m2"),
            )],
            &cancel,
        );
        again[0].1.as_ref().unwrap();
        assert_eq!(numvfs(&settings, "0000:00:03.0"), before);
    }

    #[test]
    fn scenario_d_rollback_on_drm_timeout() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:03.0", "0x56c0", 16, 14248 * (1 << 20));
        // No VFs are ever materialised: the kernel never responds.

        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();
        let results = manager.prepare(
            &[claim("claim-d", "0000-00-03-0-0x56c0-vf0", 8064, None)],
            &cancel,
        );

        assert_eq!(results.len(), 1);
        let err = results[0].1.as_ref().unwrap_err();
        assert!(matches!(err, Error::ProvisionFailed(_)), "{err}");
        assert_eq!(numvfs(&settings, "0000:00:03.0"), 0);
    }

    #[test]
    fn scenario_e_unprepare_releases_pf_and_withdraws_cdi() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:03.0", "0x56c0", 16, 14248 * (1 << 20));
        simulate_kernel_vf(&settings, "0000:00:03.0", "0000:00:03.1", "0x56c1", 0);
        simulate_kernel_vf(&settings, "0000:00:03.0", "0000:00:03.2", "0x56c1", 1);

        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();
        manager
            .prepare(
                &[claim("claim-e", "0000-00-03-0-0x56c0-vf0", 8064, None)],
                &cancel,
            )[0]
            .1
            .as_ref()
            .unwrap();

        // Simulate the kernel clearing the VF PCI functions and virtfn
        // links once numVfs=0 is written, exactly as `provisioner`'s own
        // teardown test does for the link side.
        let pf_dir = settings.driver_dir().join("0000:00:03.0");
        fs::remove_dir_all(settings.driver_dir().join("0000:00:03.1")).unwrap();
        fs::remove_dir_all(settings.driver_dir().join("0000:00:03.2")).unwrap();
        fs::remove_file(pf_dir.join("virtfn0")).unwrap();
        fs::remove_file(pf_dir.join("virtfn1")).unwrap();

        let results = manager.unprepare(&["claim-e".to_string()], &cancel);
        assert_eq!(results.len(), 1);
        results[0].1.as_ref().unwrap();
        assert_eq!(numvfs(&settings, "0000:00:03.0"), 0);

        let set = Discoverer::new(&settings, Kind::Gpu).discover();
        assert!(set.vfs_of("0000-00-03-0-0x56c0").is_empty());

        let spec_path = settings.cdi_root.join("intel-com-gpu.json");
        let spec_contents = fs::read_to_string(&spec_path).unwrap();
        assert!(!spec_contents.contains("0000-00-03-0-0x56c0-vf0"));
        assert!(!spec_contents.contains("0000-00-03-0-0x56c0-vf1"));
    }

    #[test]
    fn unprepare_of_unknown_claim_is_idempotent_success() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:02.0", "0x56c0", 0, 14248 * (1 << 20));
        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();

        let first = manager.unprepare(&["never-prepared".to_string()], &cancel);
        let second = manager.unprepare(&["never-prepared".to_string()], &cancel);
        first[0].1.as_ref().unwrap();
        second[0].1.as_ref().unwrap();
    }

    #[test]
    fn scenario_f_qat_second_claim_on_same_vf_is_rejected() {
        let (_dir, mut settings) = fast_settings("qat");
        settings.kind = "qat".to_string();
        let path = settings.driver_dir().join("0000:3d:00.0");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("device"), "0x4940\n").unwrap();
        fs::write(path.join("sriov_totalvfs"), "16").unwrap();
        fs::write(path.join("sriov_numvfs"), "0").unwrap();
        fs::create_dir_all(path.join("qat")).unwrap();
        fs::write(path.join("qat/cfg_services"), "sym;asym").unwrap();
        fs::create_dir_all(path.join("drm/card0/gt/gt0")).unwrap();
        fs::write(path.join("drm/card0/gt/gt0/lmem_total_bytes"), "0").unwrap();
        fs::create_dir_all(path.join("prelim_iov/pf")).unwrap();
        fs::write(path.join("prelim_iov/pf/auto_provisioning"), "1").unwrap();
        for i in 0..16u32 {
            fs::create_dir_all(path.join(format!("prelim_iov/vf{i}/gt0"))).unwrap();
            fs::write(path.join(format!("prelim_iov/vf{i}/gt0/lmem_quota")), "0").unwrap();
        }
        simulate_kernel_vf(&settings, "0000:3d:00.0", "0000:3d:00.1", "0x4941", 0);

        let manager = NodeStateManager::new(&settings, Kind::Qat);
        let cancel = CancelToken::new();

        let first = manager.prepare(
            &[claim("claim-f1", "0000-3d-00-0-0x4940-vf0", 0, None)],
            &cancel,
        );
        first[0].1.as_ref().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(numvfs(&settings, "0000:3d:00.0"), 1);

        let second = manager.prepare(
            &[claim("claim-f2", "0000-3d-00-0-0x4940-vf0", 0, None)],
            &cancel,
        );
        assert!(matches!(
            second[0].1.as_ref().unwrap_err(),
            Error::NoSuchDevice(_)
        ));
    }

    #[test]
    fn prepare_idempotence_returns_cached_names_without_reprovisioning() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:02.0", "0x56c0", 0, 14248 * (1 << 20));
        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();
        let c = claim("claim-idem", "0000-00-02-0-0x56c0", 4096, None);

        let first = manager.prepare(&[c.clone()], &cancel);
        let second = manager.prepare(&[c], &cancel);
        assert_eq!(first[0].1.as_ref().unwrap(), second[0].1.as_ref().unwrap());
    }

    #[test]
    fn monitoring_claim_returns_all_devices_without_mutating_state() {
        let (_dir, settings) = fast_settings("i915");
        write_pf(&settings, "0000:00:02.0", "0x56c0", 0, 14248 * (1 << 20));
        write_pf(&settings, "0000:00:03.0", "0x56c0", 0, 14248 * (1 << 20));
        let manager = NodeStateManager::new(&settings, Kind::Gpu);
        let cancel = CancelToken::new();

        let monitor_claim = ClaimAllocation {
            claim_uid: "monitor".to_string(),
            kind: ClaimKind::Monitor,
            devices: Vec::new(),
        };
        let results = manager.prepare(&[monitor_claim], &cancel);
        let names = results[0].1.as_ref().unwrap();
        assert_eq!(names.len(), 2);
    }
}
