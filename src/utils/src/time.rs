// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Constant to convert seconds to microseconds.
pub const MICROS_PER_SECOND: u64 = 1_000_000;
/// Constant to convert nanoseconds to microseconds.
const NANOS_PER_MICRO: u64 = 1_000;

/// Wrapper over `libc::clockid_t` to specify Linux Kernel clock source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockType {
    /// Equivalent to `libc::CLOCK_MONOTONIC`.
    Monotonic,
    /// Equivalent to `libc::CLOCK_REALTIME`.
    Real,
}

impl From<ClockType> for libc::clockid_t {
    fn from(clock_type: ClockType) -> Self {
        match clock_type {
            ClockType::Monotonic => libc::CLOCK_MONOTONIC,
            ClockType::Real => libc::CLOCK_REALTIME,
        }
    }
}

/// Returns a timestamp in microseconds based on the provided clock type.
///
/// # Arguments
///
/// * `clock_type` - Identifier of the Linux Kernel clock on which to act.
pub fn get_time_us(clock_type: ClockType) -> u64 {
    let mut time_struct = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: the timespec is a valid, writable out parameter.
    let ret = unsafe { libc::clock_gettime(clock_type.into(), &mut time_struct) };
    debug_assert_eq!(ret, 0);
    let secs = u64::try_from(time_struct.tv_sec).unwrap_or(0);
    let nsecs = u64::try_from(time_struct.tv_nsec).unwrap_or(0);
    secs.wrapping_mul(MICROS_PER_SECOND)
        .wrapping_add(nsecs / NANOS_PER_MICRO)
}

/// Microseconds elapsed between `start_us` and `end_us`, or zero if the clock went backwards.
pub fn elapsed_us(start_us: u64, end_us: u64) -> u64 {
    end_us.saturating_sub(start_us)
}
