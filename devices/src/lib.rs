// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device Discoverer (C1) and the shared `Device`/`DeviceSet` data model
//! (spec §3, §4.1).

pub mod discover;
pub mod model;

pub use discover::Discoverer;
pub use discover::Error;
pub use discover::Kind;
pub use model::Device;
pub use model::DeviceSet;
pub use model::DeviceType;
pub use model::QatService;
