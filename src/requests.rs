// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The stdio stand-in wire format for `Prepare`/`Unprepare` (see
//! `main.rs`'s module doc). Shapes follow spec §4.5's per-claim contract
//! directly: a batch request in, one result per claim out.

use serde::Deserialize;
use serde::Serialize;

use state::ClaimAllocation;

#[derive(Debug, Deserialize)]
#[serde(tag = "op")]
pub enum Request {
    Prepare { claims: Vec<ClaimAllocation> },
    Unprepare { claim_uids: Vec<String> },
}

#[derive(Debug, Serialize)]
pub struct ClaimResult {
    pub claim_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdi_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClaimResult {
    pub fn from_prepare((claim_uid, result): (String, state::Result<Vec<String>>)) -> Self {
        match result {
            Ok(cdi_names) => ClaimResult {
                claim_uid,
                cdi_names: Some(cdi_names),
                error: None,
            },
            Err(e) => ClaimResult {
                claim_uid,
                cdi_names: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn from_unprepare((claim_uid, result): (String, state::Result<()>)) -> Self {
        match result {
            Ok(()) => ClaimResult {
                claim_uid,
                cdi_names: None,
                error: None,
            },
            Err(e) => ClaimResult {
                claim_uid,
                cdi_names: None,
                error: Some(e.to_string()),
            },
        }
    }
}
