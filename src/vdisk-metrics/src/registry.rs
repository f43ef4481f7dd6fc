// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::num::NonZeroU64;

use log::info;
use slab::Slab;

use crate::MetricsError;
use crate::config::MetricsConfig;
use crate::device::{DeviceIdentity, DeviceStats};
use crate::root::MetricsRoot;
use crate::stats::StatsSnapshot;

/// Handle to a device attached to a [`DeviceRegistry`].
///
/// Ids are never reused: once a device is detached, its id stops resolving even if a new device
/// takes over the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    key: usize,
    generation: u64,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}.{}", self.key, self.generation)
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    device: DeviceStats,
}

/// All statistics handles of one disk-emulation process.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Slab<Entry>,
    next_generation: u64,
    pub(crate) sector_size: NonZeroU64,
}

impl DeviceRegistry {
    /// Creates an empty registry converting bytes to sectors of `sector_size` bytes.
    pub fn new(sector_size: NonZeroU64) -> Self {
        DeviceRegistry {
            devices: Slab::new(),
            next_generation: 0,
            sector_size,
        }
    }

    /// Creates an empty registry using the sector size from `config`.
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(config.sector_size)
    }

    /// Starts statistics for `identity` below `root`.
    ///
    /// Each identity owns at most one live region; attaching it again fails until it is
    /// detached.
    ///
    /// # Panics
    ///
    /// If `root` is not established.
    pub fn attach(
        &mut self,
        root: &MetricsRoot,
        identity: DeviceIdentity,
    ) -> Result<DeviceId, MetricsError> {
        if self
            .devices
            .iter()
            .any(|(_, entry)| entry.device.identity() == identity)
        {
            return Err(MetricsError::AlreadyAttached(identity));
        }
        let device = DeviceStats::start(identity, root)?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let key = self.devices.insert(Entry { generation, device });
        info!("Attached stats for {identity}");
        Ok(DeviceId { key, generation })
    }

    /// Stops statistics for `id`. The device is gone from the registry even if its region could
    /// not be removed.
    pub fn detach(&mut self, id: DeviceId) -> Result<(), MetricsError> {
        if self.get(id).is_none() {
            return Err(MetricsError::UnknownDevice(id));
        }
        let entry = self.devices.remove(id.key);
        let identity = entry.device.identity();
        entry.device.stop()?;
        info!("Detached stats for {identity}");
        Ok(())
    }

    /// Detaches every device. Failures are logged and do not stop the teardown.
    pub fn detach_all(&mut self) {
        for entry in self.devices.drain() {
            // Errors were already logged.
            let _ = entry.device.stop();
        }
    }

    /// Looks up a live device.
    pub fn get(&self, id: DeviceId) -> Option<&DeviceStats> {
        self.devices
            .get(id.key)
            .filter(|entry| entry.generation == id.generation)
            .map(|entry| &entry.device)
    }

    /// Number of attached devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is attached.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Writes the counters of every attached device as one JSON line, keyed by region name.
    pub fn write_snapshots<W: Write>(&self, mut writer: W) -> Result<(), MetricsError> {
        let snapshots: BTreeMap<String, StatsSnapshot> = self
            .devices
            .iter()
            .map(|(_, entry)| (entry.device.identity().region_name(), entry.device.snapshot()))
            .collect();
        serde_json::to_writer(&mut writer, &snapshots)?;
        writer
            .write_all(b"\n")
            .map_err(MetricsError::Write)
    }
}
