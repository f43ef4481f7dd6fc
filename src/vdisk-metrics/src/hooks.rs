// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Counter updates driven by the I/O engine's submit, merge and completion paths.
//!
//! These run on the I/O engine's event loop for every request, so they never block, never
//! allocate, never log and never fail. Operations whose device has been detached, and opcodes
//! other than read and write, are skipped silently.

use utils::time::{ClockType, elapsed_us, get_time_us};

use crate::registry::{DeviceId, DeviceRegistry};
use crate::stats::IncMetric;

/// Kind of an I/O operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    /// Read from the backing file.
    Read,
    /// Write to the backing file.
    Write,
    /// Flush the backing file.
    Fsync,
}

/// An in-flight I/O operation, as seen by the statistics hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedOperation {
    /// Kind of operation.
    pub opcode: OpCode,
    /// Bytes transferred.
    pub nbytes: u64,
    /// Device the operation is accounted to.
    pub device: DeviceId,
    submitted_us: Option<u64>,
}

impl TimedOperation {
    /// Describes an operation that has not been submitted yet.
    pub fn new(opcode: OpCode, nbytes: u64, device: DeviceId) -> Self {
        TimedOperation {
            opcode,
            nbytes,
            device,
            submitted_us: None,
        }
    }

    /// Monotonic submission time in microseconds, once submitted.
    pub fn submitted_us(&self) -> Option<u64> {
        self.submitted_us
    }
}

impl DeviceRegistry {
    /// Accounts a batch of operations handed to the I/O engine.
    ///
    /// The whole batch is stamped with a single clock read.
    pub fn on_submit(&self, ops: &mut [TimedOperation]) {
        self.on_submit_at(ops, get_time_us(ClockType::Monotonic));
    }

    /// Same as [`DeviceRegistry::on_submit`], with an explicit timestamp in microseconds.
    pub fn on_submit_at(&self, ops: &mut [TimedOperation], now_us: u64) {
        for op in ops.iter_mut() {
            op.submitted_us = Some(now_us);
            let Some(device) = self.get(op.device) else {
                continue;
            };
            let stats = device.stats();
            match op.opcode {
                OpCode::Read => stats.read_reqs_submitted.inc(),
                OpCode::Write => stats.write_reqs_submitted.inc(),
                OpCode::Fsync => (),
            }
        }
    }

    /// Accounts an operation the I/O engine coalesced into another in-flight one.
    pub fn on_merge(&self, op: &TimedOperation) {
        let Some(device) = self.get(op.device) else {
            return;
        };
        let stats = device.stats();
        match op.opcode {
            OpCode::Read => stats.read_reqs_merged.inc(),
            OpCode::Write => stats.write_reqs_merged.inc(),
            OpCode::Fsync => (),
        }
    }

    /// Accounts a batch of completed operations.
    pub fn on_complete<'a, I>(&self, ops: I)
    where
        I: IntoIterator<Item = &'a TimedOperation>,
    {
        self.on_complete_at(ops, get_time_us(ClockType::Monotonic));
    }

    /// Same as [`DeviceRegistry::on_complete`], with an explicit timestamp in microseconds.
    ///
    /// Latency is the full delta since submission, clamped at zero. An operation that was never
    /// submitted counts with zero latency.
    pub fn on_complete_at<'a, I>(&self, ops: I, now_us: u64)
    where
        I: IntoIterator<Item = &'a TimedOperation>,
    {
        for op in ops {
            let Some(device) = self.get(op.device) else {
                continue;
            };
            let stats = device.stats();
            let sectors = op.nbytes / self.sector_size;
            let ticks = op
                .submitted_us
                .map_or(0, |submitted_us| elapsed_us(submitted_us, now_us));

            match op.opcode {
                OpCode::Read => {
                    stats.read_reqs_completed.inc();
                    stats.read_sectors.add(sectors);
                    stats.read_total_ticks.add(ticks);
                }
                OpCode::Write => {
                    stats.write_reqs_completed.inc();
                    stats.write_sectors.add(sectors);
                    stats.write_total_ticks.add(ticks);
                }
                OpCode::Fsync => (),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use proptest::prelude::*;
    use utils::tempdir::TempDir;

    use super::*;
    use crate::config::MetricsConfig;
    use crate::device::DeviceIdentity;
    use crate::root::MetricsRoot;
    use crate::stats::StatsSnapshot;

    struct TestEnv {
        registry: DeviceRegistry,
        _root: MetricsRoot,
        _tmp: TempDir,
    }

    impl TestEnv {
        fn new(sector_size: u64) -> (Self, DeviceId) {
            let tmp = TempDir::new().unwrap();
            let config = MetricsConfig {
                base_dir: tmp.as_path().to_path_buf(),
                sector_size: NonZeroU64::new(sector_size).unwrap(),
            };
            let root = MetricsRoot::start(&config, 500).unwrap();
            let mut registry = DeviceRegistry::from_config(&config);
            let id = registry
                .attach(&root, DeviceIdentity::Vdi { minor: 1 })
                .unwrap();
            let env = TestEnv {
                registry,
                _root: root,
                _tmp: tmp,
            };
            (env, id)
        }

        fn snapshot(&self, id: DeviceId) -> StatsSnapshot {
            self.registry.get(id).unwrap().snapshot()
        }
    }

    #[test]
    fn test_submit_stamps_whole_batch() {
        let (env, id) = TestEnv::new(512);
        let mut ops = vec![
            TimedOperation::new(OpCode::Read, 512, id),
            TimedOperation::new(OpCode::Write, 512, id),
            TimedOperation::new(OpCode::Read, 512, id),
        ];
        assert!(ops.iter().all(|op| op.submitted_us().is_none()));

        env.registry.on_submit(&mut ops);
        let stamp = ops[0].submitted_us().unwrap();
        assert!(ops.iter().all(|op| op.submitted_us() == Some(stamp)));

        let snapshot = env.snapshot(id);
        assert_eq!(snapshot.read_reqs_submitted, 2);
        assert_eq!(snapshot.write_reqs_submitted, 1);
    }

    #[test]
    fn test_merge() {
        let (env, id) = TestEnv::new(512);
        env.registry
            .on_merge(&TimedOperation::new(OpCode::Read, 4096, id));
        env.registry
            .on_merge(&TimedOperation::new(OpCode::Write, 4096, id));
        env.registry
            .on_merge(&TimedOperation::new(OpCode::Write, 4096, id));
        env.registry
            .on_merge(&TimedOperation::new(OpCode::Fsync, 0, id));

        let snapshot = env.snapshot(id);
        assert_eq!(snapshot.read_reqs_merged, 1);
        assert_eq!(snapshot.write_reqs_merged, 2);
        assert_eq!(snapshot.read_reqs_submitted, 0);
    }

    #[test]
    fn test_complete_latency() {
        let (env, id) = TestEnv::new(512);
        let mut reads = vec![TimedOperation::new(OpCode::Read, 4096, id)];
        let mut writes = vec![TimedOperation::new(OpCode::Write, 1024, id)];
        env.registry.on_submit_at(&mut reads, 1_000);
        env.registry.on_submit_at(&mut writes, 1_500);

        env.registry.on_complete_at(&reads, 1_250);
        env.registry.on_complete_at(&writes, 2_999_500);

        let snapshot = env.snapshot(id);
        assert_eq!(snapshot.read_reqs_completed, 1);
        assert_eq!(snapshot.read_sectors, 8);
        assert_eq!(snapshot.read_total_ticks, 250);
        assert_eq!(snapshot.write_reqs_completed, 1);
        assert_eq!(snapshot.write_sectors, 2);
        // Spans several seconds; the full delta is accounted.
        assert_eq!(snapshot.write_total_ticks, 2_998_000);
    }

    #[test]
    fn test_complete_clock_skew_and_unsubmitted() {
        let (env, id) = TestEnv::new(512);
        let mut ops = vec![TimedOperation::new(OpCode::Read, 512, id)];
        env.registry.on_submit_at(&mut ops, 5_000);
        env.registry.on_complete_at(&ops, 4_000);

        let never_submitted = TimedOperation::new(OpCode::Write, 512, id);
        env.registry.on_complete_at([&never_submitted], 9_000);

        let snapshot = env.snapshot(id);
        assert_eq!(snapshot.read_total_ticks, 0);
        assert_eq!(snapshot.read_reqs_completed, 1);
        assert_eq!(snapshot.write_total_ticks, 0);
        assert_eq!(snapshot.write_reqs_completed, 1);
    }

    #[test]
    fn test_complete_ignores_other_opcodes() {
        let (env, id) = TestEnv::new(512);
        let mut ops = vec![TimedOperation::new(OpCode::Fsync, 4096, id)];
        env.registry.on_submit_at(&mut ops, 10);
        env.registry.on_complete_at(&ops, 20);
        assert_eq!(env.snapshot(id), StatsSnapshot::default());
    }

    #[test]
    fn test_detached_device_is_skipped() {
        let (mut env, id) = TestEnv::new(512);
        let mut ops = vec![TimedOperation::new(OpCode::Read, 4096, id)];
        env.registry.on_submit_at(&mut ops, 10);
        env.registry.detach(id).unwrap();

        env.registry.on_merge(&ops[0]);
        env.registry.on_complete_at(&ops, 20);
        env.registry.on_submit_at(&mut ops, 30);
        assert!(env.registry.get(id).is_none());
    }

    #[test]
    fn test_complete_wall_clock() {
        let (env, id) = TestEnv::new(512);
        let mut ops = vec![TimedOperation::new(OpCode::Write, 8192, id)];
        env.registry.on_submit(&mut ops);
        env.registry.on_complete(&ops);

        let snapshot = env.snapshot(id);
        assert_eq!(snapshot.write_reqs_completed, 1);
        assert_eq!(snapshot.write_sectors, 16);
    }

    fn opcode() -> impl Strategy<Value = OpCode> {
        prop_oneof![Just(OpCode::Read), Just(OpCode::Write), Just(OpCode::Fsync)]
    }

    #[derive(Clone, Debug)]
    enum Call {
        Submit(OpCode),
        Merge(OpCode),
        Complete(OpCode, u64),
    }

    fn call() -> impl Strategy<Value = Call> {
        prop_oneof![
            opcode().prop_map(Call::Submit),
            opcode().prop_map(Call::Merge),
            (opcode(), 0u64..1 << 20).prop_map(|(op, nbytes)| Call::Complete(op, nbytes)),
        ]
    }

    #[test]
    fn test_counters_match_calls() {
        let cfg = ProptestConfig::with_cases(64);
        proptest!(cfg, |(calls in prop::collection::vec(call(), 0..64))| {
            let (env, id) = TestEnv::new(512);
            let mut expected = StatsSnapshot::default();
            let mut previous = StatsSnapshot::default();

            for call in calls {
                match call {
                    Call::Submit(opcode) => {
                        let mut ops = [TimedOperation::new(opcode, 512, id)];
                        env.registry.on_submit_at(&mut ops, 0);
                        match opcode {
                            OpCode::Read => expected.read_reqs_submitted += 1,
                            OpCode::Write => expected.write_reqs_submitted += 1,
                            OpCode::Fsync => (),
                        }
                    }
                    Call::Merge(opcode) => {
                        env.registry.on_merge(&TimedOperation::new(opcode, 512, id));
                        match opcode {
                            OpCode::Read => expected.read_reqs_merged += 1,
                            OpCode::Write => expected.write_reqs_merged += 1,
                            OpCode::Fsync => (),
                        }
                    }
                    Call::Complete(opcode, nbytes) => {
                        let op = TimedOperation::new(opcode, nbytes, id);
                        env.registry.on_complete_at([&op], 0);
                        match opcode {
                            OpCode::Read => {
                                expected.read_reqs_completed += 1;
                                expected.read_sectors += nbytes / 512;
                            }
                            OpCode::Write => {
                                expected.write_reqs_completed += 1;
                                expected.write_sectors += nbytes / 512;
                            }
                            OpCode::Fsync => (),
                        }
                    }
                }

                let current = env.snapshot(id);
                prop_assert!(current.read_reqs_submitted >= previous.read_reqs_submitted);
                prop_assert!(current.write_reqs_completed >= previous.write_reqs_completed);
                prop_assert!(current.read_sectors >= previous.read_sectors);
                previous = current;
            }

            prop_assert_eq!(env.snapshot(id), expected);
        });
    }

    #[test]
    fn test_sector_truncation() {
        let cfg = ProptestConfig::with_cases(256);
        proptest!(cfg, |(
            sector_shift in 9u32..13,
            sectors in 0u64..4096,
            remainder_seed in any::<u64>()
        )| {
            let sector_size = 1u64 << sector_shift;
            let remainder = remainder_seed % sector_size;
            let (env, id) = TestEnv::new(sector_size);

            let op = TimedOperation::new(OpCode::Read, sectors * sector_size + remainder, id);
            env.registry.on_complete_at([&op], 0);
            prop_assert_eq!(env.snapshot(id).read_sectors, sectors);
        });
    }
}
