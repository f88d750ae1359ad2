// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Small helpers for reading and writing the kernel's sysfs attribute files.
//!
//! Every accessor takes a `&Path` rooted at whatever the caller's
//! `Settings::sysfs_root` resolved to, so the whole device tree can be
//! pointed at a synthetic directory in tests without touching the real
//! `/sys`.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}: not a valid integer: {1}")]
    InvalidInteger(PathBuf, std::num::ParseIntError),
    #[error("{0:?}: not a valid symlink")]
    InvalidLink(PathBuf),
    #[error("{0:?}: {1}")]
    Io(PathBuf, std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reads a sysfs attribute file and trims the trailing newline the kernel
/// always appends.
pub fn read_trimmed(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
    Ok(contents.trim().to_string())
}

pub fn read_u32(path: &Path) -> Result<u32> {
    let s = read_trimmed(path)?;
    s.parse()
        .map_err(|e| Error::InvalidInteger(path.to_path_buf(), e))
}

pub fn read_u64(path: &Path) -> Result<u64> {
    let s = read_trimmed(path)?;
    s.parse()
        .map_err(|e| Error::InvalidInteger(path.to_path_buf(), e))
}

pub fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| Error::Io(path.to_path_buf(), e))
}

pub fn write_u32(path: &Path, value: u32) -> Result<()> {
    write(path, &value.to_string())
}

/// Resolves a symlink (e.g. `physfn`, `iommu_group`) and returns its final
/// path segment, which is all callers in this codebase need: a PCI address
/// or an IOMMU group number.
pub fn read_link_last_segment(path: &Path) -> Result<String> {
    let target = fs::read_link(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
    target
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidLink(path.to_path_buf()))
}

/// Lists immediate children of `dir` whose file name matches `prefix`
/// followed by a decimal integer (e.g. `card0`, `virtfn3`, `gt1`), returning
/// `(file_name, parsed_index)` pairs. Non-matching entries are silently
/// skipped. Returns an empty vec, not an error, if `dir` does not exist.
pub fn list_numbered_children(dir: &Path, prefix: &str) -> Result<Vec<(String, u32)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(dir.to_path_buf(), e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::Io(dir.to_path_buf(), e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(suffix) = name.strip_prefix(prefix) {
            if let Ok(index) = suffix.parse::<u32>() {
                found.push((name, index));
            }
        }
    }
    found.sort_by_key(|(_, index)| *index);
    Ok(found)
}

/// Canonicalises a PCI address into a filesystem- and label-safe form by
/// replacing `:` and `.` with `-`, e.g. `0000:00:02.0` -> `0000-00-02-0`.
pub fn sanitize_pci_address(address: &str) -> String {
    address.replace([':', '.'], "-")
}
