// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Auxiliary module for configuring the metrics subsystem.
use std::num::NonZeroU64;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Directory under which per-process metrics roots are created.
pub const DEFAULT_BASE_DIR: &str = "/dev/shm";
/// Sector size used when converting completed bytes into sectors.
pub const DEFAULT_SECTOR_SIZE: NonZeroU64 = NonZeroU64::new(512).unwrap();

/// Strongly typed structure used to describe the metrics subsystem.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Parent directory of the per-process metrics root.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Size in bytes of one sector.
    #[serde(default = "default_sector_size")]
    pub sector_size: NonZeroU64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}

fn default_sector_size() -> NonZeroU64 {
    DEFAULT_SECTOR_SIZE
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            base_dir: default_base_dir(),
            sector_size: default_sector_size(),
        }
    }
}
