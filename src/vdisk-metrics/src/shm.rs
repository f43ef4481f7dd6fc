// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! File backed memory shared with out-of-process readers.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::warn;
use vm_memory::FileOffset;
use vm_memory::mmap::{MmapRegion, MmapRegionBuilder, MmapRegionError};

/// Errors associated with shared memory regions.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum ShmError {
    /// Failed to open backing file {0:?}: {1}
    Open(PathBuf, io::Error),
    /// Failed to size backing file {0:?}: {1}
    SetLen(PathBuf, io::Error),
    /// Failed to map backing file {0:?}: {1}
    Mmap(PathBuf, MmapRegionError),
    /// Region of {0} bytes cannot hold a statistics record
    TooSmall(usize),
    /// Failed to remove backing file {0:?}: {1}
    Unlink(PathBuf, io::Error),
    /// Region was never created
    NotCreated,
}

/// A named, fixed-size region of memory backed by a file.
///
/// The region is writable by this process only; readers map the backing file on their own.
#[derive(Debug)]
pub struct SharedRegion {
    path: PathBuf,
    size: usize,
    mapping: Option<MmapRegion>,
}

impl SharedRegion {
    /// Describes a region of `size` bytes at `path`. Nothing is allocated yet.
    pub fn new(path: PathBuf, size: usize) -> Self {
        SharedRegion {
            path,
            size,
            mapping: None,
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the backing file exists and is mapped.
    pub fn is_created(&self) -> bool {
        self.mapping.is_some()
    }

    /// Base address of the mapping, if created.
    pub fn as_ptr(&self) -> Option<*mut u8> {
        self.mapping.as_ref().map(MmapRegion::as_ptr)
    }

    /// Creates the backing file, maps it read/write and zeroes it.
    ///
    /// A file already present at the path is truncated and reused.
    pub fn create(&mut self) -> Result<(), ShmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .map_err(|err| ShmError::Open(self.path.clone(), err))?;

        let mapping = self.map_file(file).inspect_err(|_| self.remove_backing_file())?;

        // SAFETY: the mapping is writable and spans `mapping.size()` bytes.
        unsafe { std::ptr::write_bytes(mapping.as_ptr(), 0, mapping.size()) };
        self.mapping = Some(mapping);
        Ok(())
    }

    fn map_file(&self, file: File) -> Result<MmapRegion, ShmError> {
        file.set_len(self.size as u64)
            .map_err(|err| ShmError::SetLen(self.path.clone(), err))?;
        MmapRegion::from_file(FileOffset::new(file, 0), self.size)
            .map_err(|err| ShmError::Mmap(self.path.clone(), err))
    }

    fn remove_backing_file(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Failed to remove {}: {err}", self.path.display());
        }
    }

    /// Unmaps the region and removes its backing file.
    ///
    /// The mapping is released even if the file cannot be removed.
    pub fn destroy(&mut self) -> Result<(), ShmError> {
        let mapping = self.mapping.take().ok_or(ShmError::NotCreated)?;
        drop(mapping);
        fs::remove_file(&self.path).map_err(|err| ShmError::Unlink(self.path.clone(), err))
    }
}

/// Maps an existing region read-only, the way an external monitor does.
pub(crate) fn map_read_only(path: &Path) -> Result<MmapRegion, ShmError> {
    let file = File::open(path).map_err(|err| ShmError::Open(path.to_path_buf(), err))?;
    let len = file
        .metadata()
        .map_err(|err| ShmError::Open(path.to_path_buf(), err))?
        .len();
    // Anything that does not fit in the address space fails to map below.
    let size = usize::try_from(len).unwrap_or(usize::MAX);

    MmapRegionBuilder::<()>::new(size)
        .with_mmap_prot(libc::PROT_READ)
        .with_mmap_flags(libc::MAP_SHARED)
        .with_file_offset(FileOffset::new(file, 0))
        .build()
        .map_err(|err| ShmError::Mmap(path.to_path_buf(), err))
}
