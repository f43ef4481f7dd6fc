// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-process metrics directory.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::config::MetricsConfig;

/// Errors associated with the metrics root directory.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum RootError {
    /// Failed to create metrics directory {0:?}: {1}
    CreateDir(PathBuf, io::Error),
    /// Failed to remove metrics directory {0:?}: {1}
    RemoveDir(PathBuf, io::Error),
}

/// Returns the root directory used by the process identified by `pid`.
pub(crate) fn root_path(base_dir: &Path, pid: u32) -> PathBuf {
    base_dir.join(format!("td3-{pid}"))
}

/// Directory holding the statistics files of every device attached to this process.
///
/// A default-constructed root is not established: it owns no directory, cannot host devices and
/// stopping it does nothing.
#[derive(Debug, Default)]
pub struct MetricsRoot {
    path: Option<PathBuf>,
}

impl MetricsRoot {
    /// Creates the metrics root of process `pid` under `config.base_dir`.
    ///
    /// A directory left behind by an earlier process with the same pid is emptied and reused.
    pub fn start(config: &MetricsConfig, pid: u32) -> Result<Self, RootError> {
        Self::start_at(root_path(&config.base_dir, pid))
    }

    /// Same as [`MetricsRoot::start`], keyed by the pid of the calling process.
    pub fn start_for_current_process(config: &MetricsConfig) -> Result<Self, RootError> {
        Self::start(config, std::process::id())
    }

    fn start_at(path: PathBuf) -> Result<Self, RootError> {
        match DirBuilder::new().mode(0o700).create(&path) {
            Ok(()) => info!("Created metrics directory {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                match fs::symlink_metadata(&path) {
                    Ok(metadata) if metadata.is_dir() => (),
                    Ok(_) => {
                        error!("Metrics path {} is not a directory", path.display());
                        return Err(RootError::CreateDir(
                            path,
                            io::Error::from_raw_os_error(libc::ENOTDIR),
                        ));
                    }
                    Err(err) => {
                        error!("Failed to stat metrics path {}: {err}", path.display());
                        return Err(RootError::CreateDir(path, err));
                    }
                }
                info!("Reusing stale metrics directory {}", path.display());
                purge_dir(&path);
            }
            Err(err) => {
                error!("Failed to create metrics directory {}: {err}", path.display());
                return Err(RootError::CreateDir(path, err));
            }
        }

        Ok(MetricsRoot { path: Some(path) })
    }

    /// Location of the root directory, if established.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the directory exists and may host device statistics.
    pub fn is_established(&self) -> bool {
        self.path.is_some()
    }

    /// Empties and removes the root directory.
    ///
    /// Calling this on a root which is not established is a no-op. If the directory cannot be
    /// removed the root stays established so that a later call can retry.
    pub fn stop(&mut self) -> Result<(), RootError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        purge_dir(path);
        if let Err(err) = fs::remove_dir(path) {
            error!("Failed to delete metrics directory {}: {err}", path.display());
            return Err(RootError::RemoveDir(path.to_path_buf(), err));
        }

        info!("Removed metrics directory {}", path.display());
        self.path = None;
        Ok(())
    }
}

impl Drop for MetricsRoot {
    fn drop(&mut self) {
        // Errors were already logged.
        let _ = self.stop();
    }
}

/// Recursively removes everything below `path`, keeping `path` itself.
///
/// Entries that cannot be inspected or removed are logged and skipped.
fn purge_dir(path: &Path) {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Failed to open directory {}: {err}", path.display());
            return;
        }
    };

    for entry in entries {
        let entry_path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                warn!("Failed to read entry of {}: {err}", path.display());
                continue;
            }
        };

        let is_dir = match fs::symlink_metadata(&entry_path) {
            Ok(metadata) => metadata.is_dir(),
            Err(err) => {
                warn!("Failed to stat {}: {err}", entry_path.display());
                continue;
            }
        };

        let removed = if is_dir {
            purge_dir(&entry_path);
            fs::remove_dir(&entry_path)
        } else {
            fs::remove_file(&entry_path)
        };
        if let Err(err) = removed {
            warn!("Failed to remove {}: {err}", entry_path.display());
        }
    }
}
