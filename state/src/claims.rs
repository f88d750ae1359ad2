// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The claim-shaped request/record types the Node State Manager works with
//! (spec §4.5, §6 "Prepared-claims store").

use serde::Deserialize;
use serde::Serialize;

/// A monitoring claim bypasses allocation entirely and is handed the full
/// device set (spec §4.5 step 1); a normal claim allocates specific uids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimKind {
    Normal,
    Monitor,
}

/// One device a claim has been allocated, as handed down by the scheduler.
/// For a VF that does not exist yet, `uid` is still the deterministic
/// `<parentUid>-vf<index>` name the VF will carry once provisioned, see
/// [`crate::manager::parse_pending_vf_uid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedDevice {
    pub uid: String,
    pub requested_memory_mib: u32,
    pub ecc_on: bool,
    /// Empty until the Profile Engine fills it in (spec §4.5 step 2).
    pub profile_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimAllocation {
    pub claim_uid: String,
    pub kind: ClaimKind,
    pub devices: Vec<AllocatedDevice>,
}

impl ClaimAllocation {
    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.uid.as_str())
    }
}
