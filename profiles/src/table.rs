// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The static, model-keyed profile catalog (spec §4.2).

/// Sentinel name meaning "let the driver split the PF evenly"; never
/// returned by [`crate::Engine::pick`], only ever supplied by the scheduler
/// itself and checked by [`crate::Engine::validate_homogeneity`].
pub const FAIR_SHARE: &str = "fairShare";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub name: &'static str,
    pub max_memory_mib: u32,
    pub timeslice_millicores: u32,
    pub max_vfs: u32,
}

/// One model's profile list, ordered from largest VF (fewest instances) to
/// smallest, per spec §4.2.
pub fn profiles_for(model: &str) -> Option<&'static [Profile]> {
    match model {
        "0x56c0" | "0x56c1" => Some(&FLEX170),
        "0x4940" | "0x4941" => Some(&QAT_GEN4),
        _ => None,
    }
}

static FLEX170: [Profile; 2] = [
    Profile {
        name: "flex170_m2",
        max_memory_mib: 8064,
        timeslice_millicores: 500,
        max_vfs: 2,
    },
    Profile {
        name: "flex170_m4",
        max_memory_mib: 3968,
        timeslice_millicores: 250,
        max_vfs: 4,
    },
];

static QAT_GEN4: [Profile; 1] = [Profile {
    name: "qat_gen4_vf",
    max_memory_mib: 0,
    timeslice_millicores: 0,
    max_vfs: 16,
}];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_ordered_largest_first() {
        let profiles = profiles_for("0x56c0").unwrap();
        assert!(profiles[0].max_memory_mib >= profiles[1].max_memory_mib);
        assert!(profiles[0].max_vfs <= profiles[1].max_vfs);
    }

    #[test]
    fn unknown_model_has_no_table() {
        assert!(profiles_for("0xdead").is_none());
    }
}
