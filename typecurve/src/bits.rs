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

//! Word-packed bit vectors and bit-parallel arithmetic on the numbers
//! zero, one, many.
//!
//! These primitives run once per word per row per permutation and
//! dominate the total runtime, so every operation here is branch-free
//! and word-parallel.

/// The word type used to store bit vectors.
pub type Word = u64;

/// Number of bits in a [`Word`].
pub const WORD_BITS: usize = 64;

const WORD_SHIFT: usize = 6;
const BIT_MASK: usize = WORD_BITS - 1;

/// Number of words needed to store `nbits` bits.
#[inline]
pub const fn words_for(nbits: usize) -> usize {
    nbits.div_ceil(WORD_BITS)
}

/// Index of the word holding bit `i`.
#[inline]
pub const fn word_index(i: usize) -> usize {
    i >> WORD_SHIFT
}

/// Position of bit `i` within its word.
#[inline]
pub const fn bit_index(i: usize) -> usize {
    i & BIT_MASK
}

/// A word with only bit `i mod WORD_BITS` set.
#[inline]
pub const fn bit_mask(i: usize) -> Word {
    1 << bit_index(i)
}

/// True if bit `i` is set in the word holding it.
#[inline]
pub const fn bit_of(word: Word, i: usize) -> bool {
    (word >> bit_index(i)) & 1 != 0
}

/// A pair of bit vectors encoding, per bit position, whether a count
/// is zero, one, or at least two.
///
/// A count of 0 is `(0, 0)`, a count of 1 is `(1, 0)`, and a count of
/// 2 or more is `(1, 1)`. `(0, 1)` never occurs in accumulated state,
/// but a fresh row may carry it implicitly: a row whose cell holds two
/// or more occurrences sets both planes at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Zom {
    /// Bit set if the count is at least one.
    pub at_least_1: Word,
    /// Bit set if the count is at least two.
    pub at_least_2: Word,
}

impl Zom {
    /// The all-zero pair.
    pub const ZERO: Zom = Zom {
        at_least_1: 0,
        at_least_2: 0,
    };

    /// Saturating addition of two zom words, bit position by bit
    /// position: the result is at least two when either side already
    /// was, or when both sides contributed at least one.
    #[inline]
    pub const fn add(self, other: Zom) -> Zom {
        Zom {
            at_least_1: self.at_least_1 | other.at_least_1,
            at_least_2: self.at_least_2 | other.at_least_2 | (self.at_least_1 & other.at_least_1),
        }
    }

    /// Bit vector of the positions whose count is exactly one.
    #[inline]
    pub const fn exactly_1(self) -> Word {
        self.at_least_1 & !self.at_least_2
    }
}
