// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The optional per-model default-memory document (spec §6). Absence is
//! non-fatal; built-in fall-backs apply.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Defaults(HashMap<String, u32>);

impl Defaults {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Loads the defaults document from `path`, if given and present. Any
    /// read or parse error is treated the same as absence: the built-in
    /// fall-back applies instead (spec §6 "Absence is non-fatal").
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::empty();
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("{path:?}: ignoring malformed defaults file: {e}");
                Self::empty()
            }),
            Err(_) => Self::empty(),
        }
    }

    pub fn get(&self, model: &str) -> Option<u32> {
        self.0.get(model).copied()
    }
}
