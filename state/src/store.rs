// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The prepared-claims store (spec §6): the crash-recovery source of truth
//! for which claim owns which devices.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use base::atomic_file;
use log::warn;
use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::claims::AllocatedDevice;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}: {1}")]
    Serialize(PathBuf, serde_json::Error),
    #[error("{0:?}: {1}")]
    Write(PathBuf, atomic_file::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedEntry {
    pub devices: Vec<AllocatedDevice>,
    pub err: Option<String>,
}

/// `claimUid -> { devices, err }`, persisted verbatim as the store's JSON
/// body (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedStore(HashMap<String, PreparedEntry>);

impl PreparedStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the store from `path`. A missing or malformed file is treated
    /// as an empty store rather than an error; there is nothing to replay
    /// on first boot, and a corrupt file must not block startup.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("{path:?}: ignoring malformed prepared-claims store: {e}");
                Self::empty()
            }),
            Err(_) => Self::empty(),
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_vec_pretty(&self.0)
            .map_err(|e| Error::Serialize(path.to_path_buf(), e))?;
        atomic_file::write_atomic(path, &contents, 0o600)
            .map_err(|e| Error::Write(path.to_path_buf(), e))
    }

    pub fn contains(&self, claim_uid: &str) -> bool {
        self.0.contains_key(claim_uid)
    }

    pub fn get(&self, claim_uid: &str) -> Option<&PreparedEntry> {
        self.0.get(claim_uid)
    }

    pub fn insert(&mut self, claim_uid: String, entry: PreparedEntry) {
        self.0.insert(claim_uid, entry);
    }

    pub fn remove(&mut self, claim_uid: &str) -> Option<PreparedEntry> {
        self.0.remove(claim_uid)
    }

    /// True if some claim other than `exclude_claim_uid` still holds a
    /// device whose uid is `device_uid` (spec §4.5 Unprepare step 3).
    pub fn other_claim_holds_device(&self, device_uid: &str, exclude_claim_uid: &str) -> bool {
        self.0.iter().any(|(claim_uid, entry)| {
            claim_uid != exclude_claim_uid
                && entry.devices.iter().any(|d| d.uid == device_uid)
        })
    }
}
