// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Logging setup, following the `env_logger` + `log` convention used
//! throughout the example pack's userspace tooling. Call [`init`] once, from
//! the binary's `main`.

use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global logger. Safe to call more than once; only the first
/// call takes effect, so tests that exercise `main`-adjacent code can call
/// it freely.
pub fn init() {
    INIT.get_or_init(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .init();
    });
}
