// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared utilities used by every component of the node-local DRA core:
//! sysfs access, atomic file replacement, cooperative cancellation, logging
//! setup and the node-wide `Settings` record.

pub mod atomic_file;
pub mod cancel;
pub mod config;
pub mod logging;
pub mod sysfs;

pub use cancel::CancelToken;
pub use config::Settings;
