// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! Per virtual disk I/O statistics, exported to external monitors through memory-mapped files.
//!
//! # Layout
//! Every disk-emulation process owns one root directory, `<base_dir>/td3-<pid>`. Inside it,
//! each attached device owns one page-sized file:
//! * `vdi-<minor>` for a virtual disk image,
//! * `vbd-<domain>-<id>` for a virtual block device.
//!
//! The file holds a [`DiskStats`] record: ten native-endian `u64` counters in declaration
//! order, followed by zeroes up to the end of the page.
//!
//! # Design
//! * The host owns a [`MetricsRoot`] and passes it explicitly when attaching devices.
//! * Attached devices live in a [`DeviceRegistry`]; in-flight operations refer to them through
//!   a [`DeviceId`], never through a pointer, so a late completion cannot touch a detached
//!   device.
//! * Counters only ever grow. There is exactly one writer per record and no lock: readers map
//!   the file read-only and may observe a counter that is one update behind its siblings.

mod config;
mod device;
mod hooks;
mod registry;
mod root;
mod shm;
mod stats;

pub use crate::config::{DEFAULT_BASE_DIR, DEFAULT_SECTOR_SIZE, MetricsConfig};
pub use crate::device::{DeviceIdentity, DeviceStats};
pub use crate::hooks::{OpCode, TimedOperation};
pub use crate::registry::{DeviceId, DeviceRegistry};
pub use crate::root::{MetricsRoot, RootError};
pub use crate::shm::{SharedRegion, ShmError};
pub use crate::stats::{
    DiskStats, IncMetric, MappedCounter, STATS_COUNTERS, STATS_RECORD_SIZE, StatsReader,
    StatsSnapshot,
};

/// Errors reported by the device registry.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum MetricsError {
    /// Shared memory region: {0}
    Region(#[from] ShmError),
    /// No device attached under {0}
    UnknownDevice(DeviceId),
    /// Statistics for {0} are already attached
    AlreadyAttached(DeviceIdentity),
    /// Failed to serialize statistics: {0}
    Serialize(#[from] serde_json::Error),
    /// Failed to write statistics: {0}
    Write(std::io::Error),
}
