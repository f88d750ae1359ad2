// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process entry point for the node-local core (spec §1, §6).
//!
//! Everything this binary wires together: discovery, CDI reconciliation,
//! VF provisioning, the prepared-claims store; lives in the `devices`,
//! `cdi`, `provisioner` and `state` crates. What's deliberately absent here
//! is the node-agent's own gRPC scaffolding: the registration socket and
//! the `Prepare`/`Unprepare`/`PublishResources` service dispatch are named
//! in spec §1 as an external collaborator. In its place, `main` serves the
//! same two operations over a line-delimited JSON protocol on stdio, so the
//! core above is reachable and exercisable without pulling in a gRPC/proto
//! stack this design doesn't own.

mod requests;

use std::io::BufRead;
use std::io::Write;

use argh::FromArgs;
use base::CancelToken;
use base::Settings;
use devices::Kind;
use state::NodeStateManager;

use requests::ClaimResult;
use requests::Request;

/// node-local core of the Intel accelerator DRA driver
#[derive(FromArgs)]
struct Args {
    /// kernel driver name to enumerate devices under, e.g. `i915` or `qat`
    #[argh(option, default = "String::from(\"i915\")")]
    driver_name: String,

    /// CDI vendor component, e.g. `intel.com`
    #[argh(option, default = "String::from(\"intel.com\")")]
    vendor: String,

    /// CDI kind component, e.g. `gpu` or `qat`
    #[argh(option, default = "String::from(\"gpu\")")]
    kind: String,

    /// discover QAT accelerators (sym/asym/compression services, VFIO
    /// groups) instead of display/compute GPUs
    #[argh(switch)]
    qat: bool,

    /// override the prepared-claims store path
    #[argh(option)]
    store_path: Option<String>,

    /// override the CDI spec registry root
    #[argh(option)]
    cdi_root: Option<String>,

    /// path to the optional per-model default-memory JSON document
    #[argh(option)]
    defaults_path: Option<String>,
}

fn main() {
    base::logging::init();
    let args: Args = argh::from_env();

    let mut settings = Settings::from_env(&args.driver_name, &args.vendor, &args.kind);
    if let Some(path) = args.store_path {
        settings.store_path = path.into();
    }
    if let Some(path) = args.cdi_root {
        settings.cdi_root = path.into();
    }
    if let Some(path) = args.defaults_path {
        settings.defaults_path = Some(path.into());
    }

    let kind = if args.qat { Kind::Qat } else { Kind::Gpu };
    let manager = NodeStateManager::new(&settings, kind);
    log::info!(
        "intel-accel-dra-node ready: driver={:?} vendor={:?} kind={:?}",
        settings.driver_name,
        settings.vendor,
        settings.kind
    );

    serve(&manager);
}

/// Reads one JSON [`Request`] per line from stdin, dispatches it to the
/// Node State Manager, and writes one JSON array of [`ClaimResult`]s per
/// request to stdout. A malformed line is logged and skipped; it never
/// aborts the process, matching the per-claim failure isolation spec §7
/// requires of the real RPC surface.
fn serve(manager: &NodeStateManager) {
    let cancel = CancelToken::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("ignoring malformed request: {e}");
                continue;
            }
        };

        let results: Vec<ClaimResult> = match request {
            Request::Prepare { claims } => manager
                .prepare(&claims, &cancel)
                .into_iter()
                .map(ClaimResult::from_prepare)
                .collect(),
            Request::Unprepare { claim_uids } => manager
                .unprepare(&claim_uids, &cancel)
                .into_iter()
                .map(ClaimResult::from_unprepare)
                .collect(),
        };

        match serde_json::to_string(&results) {
            Ok(serialized) => {
                if writeln!(stdout, "{serialized}").is_ok() {
                    let _ = stdout.flush();
                }
            }
            Err(e) => log::error!("failed to serialize response: {e}"),
        }
    }
}
