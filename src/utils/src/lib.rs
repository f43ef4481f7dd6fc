// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub use vmm_sys_util::{tempdir, tempfile};

pub mod time;

/// Fallback used if the host refuses to report its page size.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Returns the size in bytes of a host memory page.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory safety preconditions.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(ret)
        .ok()
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}
