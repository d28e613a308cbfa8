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

//! Incremental bounds calculators.
//!
//! One accumulation step absorbs a whole sample row, which may span
//! several elementary increments, so the exact statistic value at an
//! intermediate checkpoint inside the step is not observable. Each
//! step therefore reports a conservative `(lower, upper)` bracket that
//! holds at every checkpoint within the step.
//!
//! Hapax transitions are classified per bit position:
//!
//! - *removed*: was a hapax before the step, is not afterwards;
//! - *created*: becomes a hapax and remains one after the step;
//! - *temporary*: an unseen item arriving with two or more occurrences
//!   at once; it may or may not have passed through an observable
//!   hapax state inside the step, so it widens the upper bound only.
//!
//! The three classes are disjoint by construction, and the sparse
//! walks produce exactly the same brackets as the dense walks.

use crate::bits::bit_mask;
use crate::bits::word_index;
use crate::bits::Word;
use crate::bits::Zom;
use crate::matrix::SparseIndex;
use crate::stat::Bound;

/// Running type count over a permutation, backed by a presence
/// bit vector.
#[derive(Clone, Debug)]
pub struct TypeAccum {
    seen: Vec<Word>,
    types: u32,
}

impl TypeAccum {
    /// A fresh accumulator for rows of `stride` words.
    pub fn new(stride: usize) -> Self {
        Self {
            seen: vec![0; stride],
            types: 0,
        }
    }

    /// Logically restart the permutation.
    pub fn reset(&mut self) {
        self.seen.fill(0);
        self.types = 0;
    }

    /// Current type count.
    pub fn types(&self) -> u32 {
        self.types
    }

    /// Absorb one dense row; returns the type-count bracket for the
    /// step.
    #[inline]
    pub fn step_dense(&mut self, row: &[Word]) -> Bound {
        let mut total = 0;
        for (acc, &word) in self.seen.iter_mut().zip(row) {
            *acc |= word;
            total += acc.count_ones();
        }
        assert!(self.types <= total, "type count decreased");
        let bound = Bound::new(self.types, total);
        self.types = total;
        bound
    }

    /// Absorb one sparse row; produces the same bracket as the dense
    /// walk over the same data.
    #[inline]
    pub fn step_sparse(&mut self, entries: &[u32]) -> Bound {
        let before = self.types;
        for &entry in entries {
            let col = SparseIndex::entry_column(entry);
            let word = &mut self.seen[word_index(col)];
            let mask = bit_mask(col);
            let created = *word & mask == 0;
            *word |= mask;
            self.types += u32::from(created);
        }
        Bound::new(before, self.types)
    }
}

/// Running type and hapax counts over a permutation, backed by a zom
/// vector.
#[derive(Clone, Debug)]
pub struct ZomAccum {
    seen: Vec<Zom>,
    types: u32,
    hapaxes: u32,
    ncol: u32,
}

impl ZomAccum {
    /// A fresh accumulator for rows of `stride` words covering `ncol`
    /// items.
    pub fn new(stride: usize, ncol: usize) -> Self {
        Self {
            seen: vec![Zom::ZERO; stride],
            types: 0,
            hapaxes: 0,
            ncol: ncol as u32,
        }
    }

    /// Logically restart the permutation.
    pub fn reset(&mut self) {
        self.seen.fill(Zom::ZERO);
        self.types = 0;
        self.hapaxes = 0;
    }

    /// Current type count.
    pub fn types(&self) -> u32 {
        self.types
    }

    /// Current hapax count.
    pub fn hapaxes(&self) -> u32 {
        self.hapaxes
    }

    /// Absorb one dense zom row; returns the type and hapax brackets
    /// for the step.
    #[inline]
    pub fn step_dense(&mut self, row: &[Zom]) -> (Bound, Bound) {
        let mut type_total = 0;
        let mut removed = 0;
        let mut created = 0;
        let mut temporary = 0;
        for (acc, &current) in self.seen.iter_mut().zip(row) {
            let old = *acc;
            let new = old.add(current);
            *acc = new;

            type_total += new.at_least_1.count_ones();

            let hapax_old = old.exactly_1();
            let hapax_new = new.exactly_1();
            let hapax_temporary = !old.at_least_1 & current.at_least_2;
            assert_eq!(hapax_old & hapax_temporary, 0, "temporary bits overlap old hapaxes");
            assert_eq!(hapax_new & hapax_temporary, 0, "temporary bits overlap new hapaxes");
            removed += (hapax_old & !hapax_new).count_ones();
            created += (!hapax_old & hapax_new).count_ones();
            temporary += hapax_temporary.count_ones();
        }

        assert!(self.types <= type_total, "type count decreased");
        let type_bound = Bound::new(self.types, type_total);
        self.types = type_total;

        assert!(self.hapaxes >= removed, "more hapaxes removed than existed");
        assert!(
            self.hapaxes + created + temporary <= self.ncol,
            "hapax upper bound exceeds the item count"
        );
        let hapax_bound = Bound::new(
            self.hapaxes - removed,
            self.hapaxes + created + temporary,
        );
        self.hapaxes = self.hapaxes + created - removed;

        (type_bound, hapax_bound)
    }

    /// Absorb one sparse row, applying the same transition logic entry
    /// by entry; produces the same brackets as the dense walk.
    #[inline]
    pub fn step_sparse(&mut self, entries: &[u32]) -> (Bound, Bound) {
        let type_lower = self.types;
        let hapax_before = self.hapaxes;
        let mut hapax_lower = self.hapaxes;
        let mut hapax_upper = self.hapaxes;

        for &entry in entries {
            let col = SparseIndex::entry_column(entry);
            let at_least_2_this = SparseIndex::entry_at_least_2(entry);
            let word = &mut self.seen[word_index(col)];
            let mask = bit_mask(col);

            let at_least_1_old = word.at_least_1 & mask != 0;
            let at_least_2_old = word.at_least_2 & mask != 0;
            let hapax_old = at_least_1_old && !at_least_2_old;

            let at_least_2_new = at_least_1_old || at_least_2_this;
            let hapax_new = !at_least_2_new;

            word.at_least_1 |= mask;
            if at_least_2_new {
                word.at_least_2 |= mask;
            }

            let type_created = !at_least_1_old;
            let hapax_temporary = !at_least_1_old && at_least_2_new;
            let hapax_removed = hapax_old && !hapax_new;
            let hapax_created = !hapax_old && hapax_new;
            debug_assert!(!(hapax_old && hapax_temporary));
            debug_assert!(!(hapax_created && hapax_removed));

            self.types += u32::from(type_created);
            self.hapaxes += u32::from(hapax_created);
            self.hapaxes -= u32::from(hapax_removed);
            hapax_lower -= u32::from(hapax_removed);
            hapax_upper += u32::from(hapax_created) + u32::from(hapax_temporary);
        }

        assert!(self.types <= self.ncol, "type count exceeds the item count");
        assert!(hapax_upper <= self.ncol, "hapax upper bound exceeds the item count");
        debug_assert!(hapax_lower <= hapax_before);

        (
            Bound::new(type_lower, self.types),
            Bound::new(hapax_lower, hapax_upper),
        )
    }
}

/// Running token total over a permutation. Tokens are counted exactly,
/// so the bracket is just the totals before and after the step.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenAccum {
    total: u32,
}

impl TokenAccum {
    /// A fresh accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logically restart the permutation.
    pub fn reset(&mut self) {
        self.total = 0;
    }

    /// Current token total.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Absorb one row's token count.
    #[inline]
    pub fn step(&mut self, count: u32) -> Bound {
        let before = self.total;
        self.total += count;
        Bound::new(before, self.total)
    }
}
