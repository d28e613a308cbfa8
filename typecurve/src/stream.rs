// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Deterministic pseudorandom stream partitioning.
//!
//! A fixed universe of [`STREAM_COUNT`] independent generator states
//! is derived offline from a single seed and persisted to a file that
//! every worker process reloads. Worker processes and iterations map
//! onto stream indices through [`split`], so the whole computation is
//! reproducible and distributable without any coordination: no stream
//! is ever touched by two permutation indices.

use std::io::Read;
use std::io::Write;

use rand::RngCore;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::error::Error;
use crate::error::Result;

/// Size of the stream universe.
pub const STREAM_COUNT: u32 = 2000;

/// Anchor spacing for the two-level jump-ahead generation.
const JUMP_FACTOR: usize = 100;

/// Split the range `0..total` evenly into `n` parts by rounded
/// proportional division. Part `i` is
/// `split(total, n, i)..split(total, n, i + 1)`.
pub fn split(total: u32, n: u32, i: u32) -> u32 {
    assert!(i <= n, "part index {i} out of {n}");
    if i == 0 {
        0
    } else if i == n {
        total
    } else {
        (i as f64 / n as f64 * total as f64 + 0.5) as u32
    }
}

/// Stream indices assigned to worker process `id` (1-based) out of
/// `processes`.
pub fn generator_range(processes: u32, id: u32) -> std::ops::Range<u32> {
    assert!(id >= 1 && id <= processes, "process id {id} out of 1..={processes}");
    split(STREAM_COUNT, processes, id - 1)..split(STREAM_COUNT, processes, id)
}

/// Iteration indices that stream `part` is responsible for, out of the
/// global iteration count.
pub fn iteration_range(iterations: u32, part: u32) -> std::ops::Range<u32> {
    split(iterations, STREAM_COUNT, part)..split(iterations, STREAM_COUNT, part + 1)
}

#[derive(Serialize, Deserialize)]
struct StreamSetFile {
    streams: u32,
    seed: u64,
    states: Vec<Xoshiro256PlusPlus>,
}

/// The universe of independent pseudorandom streams.
///
/// Immutable after creation; workers clone individual stream states.
pub struct StreamSet {
    seed: u64,
    states: Vec<Xoshiro256PlusPlus>,
}

impl StreamSet {
    /// Derive all [`STREAM_COUNT`] stream states from one seed.
    ///
    /// A sequential coarse pass seeds every [`JUMP_FACTOR`]-th anchor
    /// with `long_jump`, then independent fine passes fill the gaps
    /// between anchors with single `jump`s. The fine passes run in
    /// parallel; no anchor depends on another anchor's fine output.
    pub fn generate(seed: u64) -> Self {
        let total = STREAM_COUNT as usize;
        let blocks = total.div_ceil(JUMP_FACTOR);

        let mut anchor = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut anchors = Vec::with_capacity(blocks);
        for block in 0..blocks {
            if block > 0 {
                anchor.long_jump();
            }
            anchors.push(anchor.clone());
        }

        let mut states = Vec::with_capacity(total);
        std::thread::scope(|scope| {
            let handles: Vec<_> = anchors
                .iter()
                .enumerate()
                .map(|(block, anchor)| {
                    scope.spawn(move || {
                        let len = JUMP_FACTOR.min(total - block * JUMP_FACTOR);
                        let mut fine = anchor.clone();
                        let mut filled = Vec::with_capacity(len);
                        filled.push(fine.clone());
                        for _ in 1..len {
                            fine.jump();
                            filled.push(fine.clone());
                        }
                        filled
                    })
                })
                .collect();
            for handle in handles {
                states.extend(handle.join().expect("stream generation thread panicked"));
            }
        });

        assert_eq!(states.len(), total);
        info!(seed, streams = total, "generated stream universe");
        Self { seed, states }
    }

    /// The seed the universe was derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// A private copy of stream `part`'s state.
    pub fn stream(&self, part: u32) -> Xoshiro256PlusPlus {
        self.states[part as usize].clone()
    }

    /// Persist the stream universe.
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        let file = StreamSetFile {
            streams: STREAM_COUNT,
            seed: self.seed,
            states: self.states.clone(),
        };
        serde_json::to_writer(writer, &file)
            .map_err(|e| Error::invalid_data(format!("cannot write stream state: {e}")))
    }

    /// Reload a persisted stream universe, validating the stream
    /// count.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let file: StreamSetFile = serde_json::from_reader(reader)
            .map_err(|e| Error::invalid_data(format!("malformed stream state file: {e}")))?;
        if file.streams != STREAM_COUNT || file.states.len() != STREAM_COUNT as usize {
            return Err(Error::invalid_data(format!(
                "stream state file holds {} streams, expected {}",
                file.states.len(),
                STREAM_COUNT
            )));
        }
        Ok(Self {
            seed: file.seed,
            states: file.states,
        })
    }
}

/// A uniform random integer in `0..n`.
///
/// Rejection sampling on the top bits: shift away the leading zeros of
/// `n - 1` so that at least half of all draws are accepted.
#[inline]
pub fn rand_below(rng: &mut impl RngCore, n: u32) -> u32 {
    assert!(n > 0);
    let limit = n - 1;
    if limit == 0 {
        return 0;
    }
    let shift = limit.leading_zeros();
    loop {
        let val = rng.next_u32() >> shift;
        if val <= limit {
            return val;
        }
    }
}

/// Fill `table` with a uniform random permutation of `0..len` by
/// Fisher-Yates.
pub fn random_permutation_into(rng: &mut impl RngCore, table: &mut [u32]) {
    let n = table.len();
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u32;
    }
    for i in 0..n {
        let j = rand_below(rng, (n - i) as u32) as usize + i;
        table.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_endpoints_and_monotonicity() {
        for total in (1..1000).step_by(13) {
            for n in 1..50 {
                assert_eq!(split(total, n, 0), 0);
                assert_eq!(split(total, n, n), total);
                for i in 0..n {
                    assert!(split(total, n, i) <= split(total, n, i + 1));
                }
            }
        }
    }

    #[test]
    fn test_generator_ranges_partition_the_universe() {
        for processes in [1, 2, 3, 7, 16] {
            let mut next = 0;
            for id in 1..=processes {
                let range = generator_range(processes, id);
                assert_eq!(range.start, next);
                next = range.end;
            }
            assert_eq!(next, STREAM_COUNT);
        }
    }

    #[test]
    fn test_iteration_ranges_partition_the_iterations() {
        let iterations = 12345;
        let mut next = 0;
        for part in 0..STREAM_COUNT {
            let range = iteration_range(iterations, part);
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, iterations);
    }

    #[test]
    fn test_rand_below_stays_in_range() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for n in [1, 2, 3, 5, 17, 1000, u32::MAX] {
            for _ in 0..200 {
                assert!(rand_below(&mut rng, n) < n);
            }
        }
    }

    #[test]
    fn test_rand_below_hits_every_value() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let mut seen = [0u32; 7];
        for _ in 0..7000 {
            seen[rand_below(&mut rng, 7) as usize] += 1;
        }
        for (v, &count) in seen.iter().enumerate() {
            assert!(count > 0, "value {v} never drawn");
        }
    }

    #[test]
    fn test_random_permutation_is_a_permutation() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut table = vec![0u32; 100];
        random_permutation_into(&mut rng, &mut table);
        let mut sorted = table.clone();
        sorted.sort_unstable();
        let identity: Vec<u32> = (0..100).collect();
        assert_eq!(sorted, identity);
        assert_ne!(table, identity, "a 100-element shuffle landing on the identity is astronomically unlikely");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = StreamSet::generate(42);
        let b = StreamSet::generate(42);
        for part in [0, 1, 99, 100, 101, 1999] {
            let mut x = a.stream(part);
            let mut y = b.stream(part);
            for _ in 0..8 {
                assert_eq!(x.next_u64(), y.next_u64(), "stream {part} diverged");
            }
        }
    }

    #[test]
    fn test_streams_are_distinct() {
        let set = StreamSet::generate(1);
        // Spot-check pairs across and within anchor blocks.
        for (i, j) in [(0, 1), (0, 100), (99, 100), (100, 101), (0, 1999)] {
            let (a, b) = (set.stream(i).next_u64(), set.stream(j).next_u64());
            assert_ne!(a, b, "streams {i} and {j} start identically");
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let set = StreamSet::generate(9);
        let mut buf = Vec::new();
        set.save(&mut buf).unwrap();
        let loaded = StreamSet::load(buf.as_slice()).unwrap();
        assert_eq!(loaded.seed(), 9);
        for part in [0, 7, 1234] {
            assert_eq!(set.stream(part).next_u64(), loaded.stream(part).next_u64());
        }
    }

    #[test]
    fn test_load_rejects_wrong_count() {
        let file = StreamSetFile {
            streams: 3,
            seed: 0,
            states: vec![Xoshiro256PlusPlus::seed_from_u64(0); 3],
        };
        let bytes = serde_json::to_vec(&file).unwrap();
        assert!(StreamSet::load(bytes.as_slice()).is_err());
    }
}
