// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The CDI Reconciler (C3): keeps the on-disk Container Device Interface
//! spec registry consistent with the node's live device set.

pub mod registry;
pub mod spec;

pub use registry::Error;
pub use registry::Registry;
pub use spec::CdiDevice;
pub use spec::CdiSpec;
pub use spec::ContainerEdits;
pub use spec::DeviceNode;
