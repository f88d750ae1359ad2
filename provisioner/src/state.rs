// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-PF provisioning state machine named in spec §4.4. `Provisioner`
//! does not keep these as long-lived fields; each call to `provision`/
//! `teardown` walks the machine start to finish synchronously, but the
//! enum documents the transitions and backs the `observed_states` test hook.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfState {
    Bare,
    Preconfiguring,
    Enabling,
    AwaitingDrm,
    Live,
    TearingDown,
    AwaitingEmpty,
}
