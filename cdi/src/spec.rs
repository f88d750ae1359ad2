// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The on-disk CDI spec document format (spec §4.3, §6).

use serde::Deserialize;
use serde::Serialize;

/// Minimum CDI spec version this driver's documents require.
pub const CDI_VERSION: &str = "0.6.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdiSpec {
    #[serde(rename = "cdiVersion")]
    pub cdi_version: String,
    pub kind: String,
    pub devices: Vec<CdiDevice>,
}

impl CdiSpec {
    pub fn new(kind: &str) -> Self {
        CdiSpec {
            cdi_version: CDI_VERSION.to_string(),
            kind: kind.to_string(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdiDevice {
    pub name: String,
    #[serde(rename = "containerEdits")]
    pub container_edits: ContainerEdits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEdits {
    #[serde(rename = "deviceNodes")]
    pub device_nodes: Vec<DeviceNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    pub path: String,
    #[serde(rename = "hostPath")]
    pub host_path: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

impl DeviceNode {
    pub fn character(path: String) -> Self {
        DeviceNode {
            host_path: path.clone(),
            path,
            node_type: "c".to_string(),
        }
    }
}
