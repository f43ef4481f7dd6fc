// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The statistics record stored in each device's shared region.
//!
//! # Record format
//! ```text
//! offset  counter
//!   0     read_reqs_submitted
//!   8     write_reqs_submitted
//!  16     read_reqs_merged
//!  24     write_reqs_merged
//!  32     read_reqs_completed
//!  40     write_reqs_completed
//!  48     read_sectors
//!  56     write_sectors
//!  64     read_total_ticks
//!  72     write_total_ticks
//! ```
//! Every counter is a native-endian `u64`. Ticks are microseconds.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use vm_memory::mmap::MmapRegion;

use crate::shm::{ShmError, map_read_only};

/// Number of counters in a statistics record.
pub const STATS_COUNTERS: usize = 10;
/// Size in bytes of a statistics record.
pub const STATS_RECORD_SIZE: usize = std::mem::size_of::<DiskStats>();

const _: () = assert!(STATS_RECORD_SIZE == STATS_COUNTERS * std::mem::size_of::<u64>());

/// A statistics counter that only moves forward.
pub trait IncMetric {
    /// Adds `value` to the current counter.
    fn add(&self, value: u64);
    /// Increments by 1 unit the current counter.
    fn inc(&self) {
        self.add(1);
    }
    /// Returns current value of the counter.
    fn count(&self) -> u64;
}

/// A counter living in memory shared with other processes.
///
/// Only one thread of one process ever writes a given counter, so an update is a plain load
/// followed by a plain store. Aligned 64-bit stores do not tear; a reader sees either the old or
/// the new value.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct MappedCounter(AtomicU64);

impl IncMetric for MappedCounter {
    fn add(&self, value: u64) {
        let current = self.0.load(Ordering::Relaxed);
        self.0.store(current.wrapping_add(value), Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per device I/O statistics, laid out exactly as external readers expect them.
#[derive(Debug, Default)]
#[repr(C)]
pub struct DiskStats {
    /// Read requests handed to the I/O engine.
    pub read_reqs_submitted: MappedCounter,
    /// Write requests handed to the I/O engine.
    pub write_reqs_submitted: MappedCounter,
    /// Read requests coalesced into another in-flight request.
    pub read_reqs_merged: MappedCounter,
    /// Write requests coalesced into another in-flight request.
    pub write_reqs_merged: MappedCounter,
    /// Read requests completed by the I/O engine.
    pub read_reqs_completed: MappedCounter,
    /// Write requests completed by the I/O engine.
    pub write_reqs_completed: MappedCounter,
    /// Sectors read.
    pub read_sectors: MappedCounter,
    /// Sectors written.
    pub write_sectors: MappedCounter,
    /// Cumulative read latency in microseconds.
    pub read_total_ticks: MappedCounter,
    /// Cumulative write latency in microseconds.
    pub write_total_ticks: MappedCounter,
}

impl DiskStats {
    /// Copies the current value of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_reqs_submitted: self.read_reqs_submitted.count(),
            write_reqs_submitted: self.write_reqs_submitted.count(),
            read_reqs_merged: self.read_reqs_merged.count(),
            write_reqs_merged: self.write_reqs_merged.count(),
            read_reqs_completed: self.read_reqs_completed.count(),
            write_reqs_completed: self.write_reqs_completed.count(),
            read_sectors: self.read_sectors.count(),
            write_sectors: self.write_sectors.count(),
            read_total_ticks: self.read_total_ticks.count(),
            write_total_ticks: self.write_total_ticks.count(),
        }
    }
}

/// Point in time copy of a [`DiskStats`] record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Read requests handed to the I/O engine.
    pub read_reqs_submitted: u64,
    /// Write requests handed to the I/O engine.
    pub write_reqs_submitted: u64,
    /// Read requests coalesced into another in-flight request.
    pub read_reqs_merged: u64,
    /// Write requests coalesced into another in-flight request.
    pub write_reqs_merged: u64,
    /// Read requests completed by the I/O engine.
    pub read_reqs_completed: u64,
    /// Write requests completed by the I/O engine.
    pub write_reqs_completed: u64,
    /// Sectors read.
    pub read_sectors: u64,
    /// Sectors written.
    pub write_sectors: u64,
    /// Cumulative read latency in microseconds.
    pub read_total_ticks: u64,
    /// Cumulative write latency in microseconds.
    pub write_total_ticks: u64,
}

impl StatsSnapshot {
    fn from_words(words: [u64; STATS_COUNTERS]) -> Self {
        let [
            read_reqs_submitted,
            write_reqs_submitted,
            read_reqs_merged,
            write_reqs_merged,
            read_reqs_completed,
            write_reqs_completed,
            read_sectors,
            write_sectors,
            read_total_ticks,
            write_total_ticks,
        ] = words;
        StatsSnapshot {
            read_reqs_submitted,
            write_reqs_submitted,
            read_reqs_merged,
            write_reqs_merged,
            read_reqs_completed,
            write_reqs_completed,
            read_sectors,
            write_sectors,
            read_total_ticks,
            write_total_ticks,
        }
    }
}

/// Read-only view of a statistics file, as used by external monitors.
#[derive(Debug)]
pub struct StatsReader {
    mapping: MmapRegion,
}

impl StatsReader {
    /// Maps the statistics file at `path`.
    pub fn open(path: &Path) -> Result<Self, ShmError> {
        let mapping = map_read_only(path)?;
        if mapping.size() < STATS_RECORD_SIZE {
            return Err(ShmError::TooSmall(mapping.size()));
        }
        Ok(StatsReader { mapping })
    }

    /// Size in bytes of the mapped file.
    pub fn size(&self) -> usize {
        self.mapping.size()
    }

    /// Reads every counter. Values may be mid-update relative to each other.
    pub fn snapshot(&self) -> StatsSnapshot {
        let base = self.mapping.as_ptr().cast::<u64>().cast_const();
        let mut words = [0u64; STATS_COUNTERS];
        for (i, word) in words.iter_mut().enumerate() {
            // SAFETY: the mapping is page aligned and at least `STATS_RECORD_SIZE` bytes long.
            *word = unsafe { base.add(i).read_volatile() };
        }
        StatsSnapshot::from_words(words)
    }
}
