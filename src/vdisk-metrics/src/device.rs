// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use log::{debug, error};

use crate::root::MetricsRoot;
use crate::shm::{SharedRegion, ShmError};
use crate::stats::{DiskStats, STATS_RECORD_SIZE, StatsSnapshot};

/// What a statistics record is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceIdentity {
    /// A virtual disk image, known by its minor number.
    Vdi {
        /// Device minor number.
        minor: u32,
    },
    /// A virtual block device, i.e. a disk attached to a given domain.
    Vbd {
        /// Owning domain id.
        domain: u32,
        /// Device id within the domain.
        id: u32,
    },
}

impl DeviceIdentity {
    /// File name of the statistics region inside the metrics root.
    pub fn region_name(&self) -> String {
        match self {
            DeviceIdentity::Vdi { minor } => format!("vdi-{minor}"),
            DeviceIdentity::Vbd { domain, id } => format!("vbd-{domain}-{id}"),
        }
    }

    /// Full path of the statistics region below `root`.
    pub fn region_path(&self, root: &Path) -> PathBuf {
        root.join(self.region_name())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.region_name())
    }
}

/// Statistics handle of one attached device.
///
/// A handle is active from a successful [`DeviceStats::start`] until [`DeviceStats::stop`]
/// consumes it. Dropping an active handle also removes its region.
#[derive(Debug)]
pub struct DeviceStats {
    identity: DeviceIdentity,
    region: SharedRegion,
    stats: NonNull<DiskStats>,
}

impl DeviceStats {
    /// Allocates the shared region of `identity` below `root`, with every counter at zero.
    ///
    /// # Panics
    ///
    /// If `root` is not established.
    pub fn start(identity: DeviceIdentity, root: &MetricsRoot) -> Result<Self, ShmError> {
        let Some(root_path) = root.path() else {
            panic!("metrics root must be established before attaching {identity}");
        };

        let size = utils::page_size();
        if size < STATS_RECORD_SIZE {
            return Err(ShmError::TooSmall(size));
        }

        let mut region = SharedRegion::new(identity.region_path(root_path), size);
        if let Err(err) = region.create() {
            error!("Failed to create stats region for {identity}: {err}");
            return Err(err);
        }
        let stats = region
            .as_ptr()
            .and_then(|ptr| NonNull::new(ptr.cast::<DiskStats>()))
            .ok_or(ShmError::NotCreated)?;

        debug!("Created stats region {}", region.path().display());
        Ok(DeviceStats {
            identity,
            region,
            stats,
        })
    }

    /// Removes the shared region. The handle is released whatever the outcome; the error is only
    /// reported for diagnostics.
    pub fn stop(mut self) -> Result<(), ShmError> {
        let result = self.region.destroy();
        if let Err(ref err) = result {
            error!("Failed to destroy stats region for {}: {err}", self.identity);
        } else {
            debug!("Removed stats region {}", self.region.path().display());
        }
        result
    }

    /// Identity this handle was started for.
    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Location of the statistics file.
    pub fn path(&self) -> &Path {
        self.region.path()
    }

    /// The counters, as stored in shared memory.
    pub fn stats(&self) -> &DiskStats {
        // SAFETY: `stats` points to the start of the page aligned mapping owned by `region`, which
        // is at least `STATS_RECORD_SIZE` bytes long, was zeroed on creation and stays mapped
        // for as long as `self` lives.
        unsafe { self.stats.as_ref() }
    }

    /// Copies the current value of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats().snapshot()
    }
}

impl Drop for DeviceStats {
    fn drop(&mut self) {
        if self.region.is_created() {
            if let Err(err) = self.region.destroy() {
                error!("Failed to destroy stats region for {}: {err}", self.identity);
            }
        }
    }
}
