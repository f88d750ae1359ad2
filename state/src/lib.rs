// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Node State Manager (C5): the `Prepare`/`Unprepare` surface the
//! node-agent calls into (spec §4.5), and the caller-facing error kinds of
//! spec §7 that the lower components' errors are assembled into.

pub mod claims;
pub mod manager;
pub mod store;

use remain::sorted;
use thiserror::Error;

pub use claims::AllocatedDevice;
pub use claims::ClaimAllocation;
pub use claims::ClaimKind;
pub use manager::NodeStateManager;
pub use store::PreparedEntry;
pub use store::PreparedStore;

/// The caller-facing error kinds named in spec §7. Each lower crate's error
/// type is folded in here, so `state` is the only crate that exposes the
/// vocabulary the node-agent actually sees.
#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("CDI spec could not be persisted: {0}")]
    CdiWrite(String),
    #[error("claim cannot be satisfied: {0}")]
    InvalidAllocation(String),
    #[error(transparent)]
    NoFittingProfile(#[from] profiles::Error),
    #[error("claim references a device not present in the device set: {0:?}")]
    NoSuchDevice(String),
    #[error("PF {0:?} is busy: another provisioning attempt is in flight, or VFs already exist")]
    PfBusy(String),
    #[error("VF provisioning failed on PF {0:?}; rollback succeeded")]
    ProvisionFailed(String),
    #[error("VF provisioning failed on PF {0:?} and rollback also failed; manual operator recovery required")]
    ProvisionWithCleanupFailure(String),
    #[error("prepared-claims store could not be persisted: {0}")]
    StorePersist(#[from] store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
