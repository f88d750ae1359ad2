// Copyright 2024 Intel Accelerator DRA Node Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Write-to-temp-then-rename helper used by both the CDI registry and the
//! prepared-claims store, so a crash mid-write never leaves a half-written
//! spec or store file behind.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Atomically replaces `path` with `contents`, creating the temp file in the
/// same directory (so the final rename stays on one filesystem) and setting
/// its permission bits before the rename becomes visible.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::Io(dir.to_path_buf(), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::Io(dir.to_path_buf(), e))?;
    tmp.write_all(contents)
        .map_err(|e| Error::Io(path.to_path_buf(), e))?;
    tmp.flush().map_err(|e| Error::Io(path.to_path_buf(), e))?;

    let mut perms = tmp
        .as_file()
        .metadata()
        .map_err(|e| Error::Io(path.to_path_buf(), e))?
        .permissions();
    perms.set_mode(mode);
    tmp.as_file()
        .set_permissions(perms)
        .map_err(|e| Error::Io(path.to_path_buf(), e))?;

    tmp.persist(path)
        .map_err(|e| Error::Io(path.to_path_buf(), e.error))?;
    Ok(())
}
