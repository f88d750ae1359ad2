// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Profile Engine (C2, spec §4.2): picks an SR-IOV VF profile for a
//! requested (memory, ECC) pair and enforces per-PF profile homogeneity.

pub mod defaults;
pub mod table;

use remain::sorted;
use thiserror::Error;

pub use defaults::Defaults;
pub use table::Profile;
pub use table::FAIR_SHARE;

#[sorted]
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("mixed fair-share and named VF profiles requested on one PF")]
    MixedProfiles,
    #[error("no profile for model {0:?} fits a request of {1} MiB")]
    NoFittingProfile(String, u32),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Engine {
    defaults: Defaults,
}

impl Engine {
    pub fn new(defaults: Defaults) -> Self {
        Self { defaults }
    }

    /// Selects a profile for `model` that fits `requested_memory_mib`,
    /// scanning the model's table from largest VF to smallest and returning
    /// the first entry whose advertised memory is at least the request
    /// (spec §4.2). `requested_memory_mib == 0` resolves to the model's
    /// configured or built-in default before the scan.
    ///
    /// ECC does not change the scan itself; the caller (the Node State
    /// Manager) is responsible for checking that the sum of memory it hands
    /// out for a PF does not exceed the PF's *observed* memory, which is
    /// already reduced for ECC (spec §4.2 "Edge cases").
    pub fn pick(&self, model: &str, requested_memory_mib: u32, _ecc_on: bool) -> Result<(u32, &'static str)> {
        let profiles = table::profiles_for(model)
            .ok_or_else(|| Error::NoFittingProfile(model.to_string(), requested_memory_mib))?;

        let requested = if requested_memory_mib == 0 {
            self.default_memory_mib(model, profiles)
        } else {
            requested_memory_mib
        };

        profiles
            .iter()
            .find(|p| p.max_memory_mib >= requested)
            .map(|p| (p.max_memory_mib, p.name))
            .ok_or(Error::NoFittingProfile(model.to_string(), requested))
    }

    /// The profile whose name matches, if any; used by the Node State
    /// Manager when synthesising smaller leftover VFs (spec §4.5 step 4).
    pub fn profile_named(&self, model: &str, name: &str) -> Option<&'static Profile> {
        table::profiles_for(model)?.iter().find(|p| p.name == name)
    }

    /// All profiles for `model`, largest to smallest, or an empty slice for
    /// an unknown model.
    pub fn profiles_for(&self, model: &str) -> &'static [Profile] {
        table::profiles_for(model).unwrap_or(&[])
    }

    fn default_memory_mib(&self, model: &str, profiles: &'static [table::Profile]) -> u32 {
        self.defaults.get(model).unwrap_or_else(|| {
            profiles
                .first()
                .map(|p| p.max_memory_mib)
                .unwrap_or_default()
        })
    }

    /// Rejects a PF slated to receive a mixture of fair-share and named
    /// profiles: the driver cannot co-provision these (spec §4.2).
    pub fn validate_homogeneity<'a>(&self, profile_names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut saw_fair_share = false;
        let mut saw_named = false;
        for name in profile_names {
            if name == FAIR_SHARE {
                saw_fair_share = true;
            } else {
                saw_named = true;
            }
        }
        if saw_fair_share && saw_named {
            return Err(Error::MixedProfiles);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_smallest_fitting_profile() {
        let engine = Engine::new(Defaults::empty());
        let (memory, name) = engine.pick("0x56c0", 8064, false).unwrap();
        assert_eq!(name, "flex170_m2");
        assert_eq!(memory, 8064);
    }

    #[test]
    fn picks_smaller_profile_for_smaller_request() {
        let engine = Engine::new(Defaults::empty());
        let (_, name) = engine.pick("0x56c0", 2000, false).unwrap();
        assert_eq!(name, "flex170_m4");
    }

    #[test]
    fn no_fitting_profile_when_request_exceeds_largest() {
        let engine = Engine::new(Defaults::empty());
        let err = engine.pick("0x56c0", 20000, false).unwrap_err();
        assert_eq!(err, Error::NoFittingProfile("0x56c0".to_string(), 20000));
    }

    #[test]
    fn zero_request_falls_back_to_first_table_entry_without_defaults_file() {
        let engine = Engine::new(Defaults::empty());
        let (memory, name) = engine.pick("0x56c0", 0, false).unwrap();
        assert_eq!(name, "flex170_m2");
        assert_eq!(memory, 8064);
    }

    #[test]
    fn zero_request_honours_defaults_file() {
        let mut defaults = std::collections::HashMap::new();
        defaults.insert("0x56c0".to_string(), 3968u32);
        let defaults = serde_json::from_value::<Defaults>(serde_json::to_value(defaults).unwrap()).unwrap();
        let engine = Engine::new(defaults);
        let (_, name) = engine.pick("0x56c0", 0, false).unwrap();
        assert_eq!(name, "flex170_m4");
    }

    #[test]
    fn homogeneity_rejects_mixed_profiles() {
        let engine = Engine::new(Defaults::empty());
        let err = engine
            .validate_homogeneity(["flex170_m2", FAIR_SHARE])
            .unwrap_err();
        assert_eq!(err, Error::MixedProfiles);
    }

    #[test]
    fn homogeneity_accepts_all_named() {
        let engine = Engine::new(Defaults::empty());
        engine
            .validate_homogeneity(["flex170_m2", "flex170_m2"])
            .unwrap();
    }

    #[test]
    fn homogeneity_accepts_all_fair_share() {
        let engine = Engine::new(Defaults::empty());
        engine.validate_homogeneity([FAIR_SHARE, FAIR_SHARE]).unwrap();
    }
}
