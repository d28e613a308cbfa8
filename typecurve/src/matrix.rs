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

//! Sample-by-item incidence matrices.
//!
//! A matrix is built once while loading a corpus and is immutable
//! afterwards. Depending on the requested statistics it carries a
//! dense presence bitmap, a zero/one/many bitmap, or both, and it can
//! additionally be indexed into a sparse per-row incidence list when
//! the data is sparse enough to make that worthwhile.

use crate::bits::bit_mask;
use crate::bits::bit_of;
use crate::bits::word_index;
use crate::bits::words_for;
use crate::bits::Word;
use crate::bits::Zom;
use crate::error::Error;
use crate::error::Result;

/// Default density ratio above which the sparse representation is
/// chosen automatically. The value is an engineering default carried
/// over from long use, not derived from a cost model; callers may
/// override it.
pub const SPARSITY_HEURISTIC: f64 = 50.0;

/// How the bounds calculators should walk the matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Representation {
    /// Decide by the density heuristic.
    #[default]
    Auto,
    /// Force the dense word-per-word walk.
    Dense,
    /// Force the sparse incidence-list walk.
    Sparse,
}

impl Representation {
    /// Resolve `Auto` against a matrix and a heuristic threshold.
    pub fn resolve(self, matrix: &SampleMatrix, heuristic: f64) -> Representation {
        match self {
            Representation::Auto => {
                if matrix.density_cost_ratio() > heuristic {
                    Representation::Sparse
                } else {
                    Representation::Dense
                }
            }
            other => other,
        }
    }
}

/// A dense 2-D bit array with one row of words per sample.
///
/// Encapsulates the `row * stride + word` layout so that callers only
/// ever see whole rows.
#[derive(Clone, Debug)]
struct WordGrid {
    words: Vec<Word>,
    stride: usize,
}

impl WordGrid {
    fn new(nrow: usize, stride: usize) -> Self {
        Self {
            words: vec![0; nrow * stride],
            stride,
        }
    }

    #[inline]
    fn row(&self, i: usize) -> &[Word] {
        &self.words[i * self.stride..(i + 1) * self.stride]
    }

    #[inline]
    fn cell_mut(&mut self, i: usize, col: usize) -> &mut Word {
        &mut self.words[i * self.stride + word_index(col)]
    }
}

/// A dense 2-D zom array with one row of zom words per sample.
#[derive(Clone, Debug)]
struct ZomGrid {
    words: Vec<Zom>,
    stride: usize,
}

impl ZomGrid {
    fn new(nrow: usize, stride: usize) -> Self {
        Self {
            words: vec![Zom::ZERO; nrow * stride],
            stride,
        }
    }

    #[inline]
    fn row(&self, i: usize) -> &[Zom] {
        &self.words[i * self.stride..(i + 1) * self.stride]
    }

    #[inline]
    fn cell_mut(&mut self, i: usize, col: usize) -> &mut Zom {
        &mut self.words[i * self.stride + word_index(col)]
    }
}

/// Sparse incidence index: for each row, the sorted nonzero columns.
///
/// Each entry packs `(column << 1) | at_least_2`. `starts` has one
/// offset per row plus a final sentinel, so `starts[i]..starts[i+1]`
/// always names row `i`'s slice.
#[derive(Clone, Debug)]
pub struct SparseIndex {
    incidence: Vec<u32>,
    starts: Vec<u32>,
}

impl SparseIndex {
    /// Packed nonzero entries of row `i`, in increasing column order.
    #[inline]
    pub fn row(&self, i: usize) -> &[u32] {
        &self.incidence[self.starts[i] as usize..self.starts[i + 1] as usize]
    }

    /// Column number of a packed entry.
    #[inline]
    pub const fn entry_column(entry: u32) -> usize {
        (entry >> 1) as usize
    }

    /// Whether a packed entry holds a count of at least two.
    #[inline]
    pub const fn entry_at_least_2(entry: u32) -> bool {
        entry & 1 != 0
    }
}

/// A sample-by-item incidence matrix.
#[derive(Clone, Debug)]
pub struct SampleMatrix {
    nrow: usize,
    ncol: usize,
    stride: usize,
    nnonzero: u32,
    sum: u32,
    rowsums: Option<Vec<u32>>,
    bits: Option<WordGrid>,
    zom: Option<ZomGrid>,
    sparse: Option<SparseIndex>,
}

impl SampleMatrix {
    /// Allocate an empty matrix. At least one of `want_bits` and
    /// `want_zom` should be set if the matrix is going to feed a
    /// bounds calculator.
    pub fn new(nrow: usize, ncol: usize, want_bits: bool, want_zom: bool, want_rowsums: bool) -> Self {
        let stride = words_for(ncol);
        Self {
            nrow,
            ncol,
            stride,
            nnonzero: 0,
            sum: 0,
            rowsums: want_rowsums.then(|| vec![0; nrow]),
            bits: want_bits.then(|| WordGrid::new(nrow, stride)),
            zom: want_zom.then(|| ZomGrid::new(nrow, stride)),
            sparse: None,
        }
    }

    /// Number of rows (samples).
    pub fn nrow(&self) -> usize {
        self.nrow
    }

    /// Number of columns (items).
    pub fn ncol(&self) -> usize {
        self.ncol
    }

    /// Number of words per dense row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of nonzero cells.
    pub fn nnonzero(&self) -> u32 {
        self.nnonzero
    }

    /// Sum of all cell values.
    pub fn sum(&self) -> u32 {
        self.sum
    }

    /// Row sums, if they were requested at allocation time.
    pub fn rowsums(&self) -> Option<&[u32]> {
        self.rowsums.as_deref()
    }

    /// True if the dense presence bitmap is present.
    pub fn has_bits(&self) -> bool {
        self.bits.is_some()
    }

    /// True if the zom bitmap is present.
    pub fn has_zom(&self) -> bool {
        self.zom.is_some()
    }

    /// Presence words of row `i`.
    #[inline]
    pub fn row_bits(&self, i: usize) -> &[Word] {
        self.bits.as_ref().expect("dense bitmap was not allocated").row(i)
    }

    /// Zom words of row `i`.
    #[inline]
    pub fn row_zom(&self, i: usize) -> &[Zom] {
        self.zom.as_ref().expect("zom bitmap was not allocated").row(i)
    }

    /// The sparse index, after [`SampleMatrix::build_sparse_index`].
    pub fn sparse(&self) -> Option<&SparseIndex> {
        self.sparse.as_ref()
    }

    /// True if the dense cell `(i, j)` is set.
    pub fn cell(&self, i: usize, j: usize) -> bool {
        assert!(i < self.nrow && j < self.ncol);
        if let Some(bits) = &self.bits {
            bit_of(bits.row(i)[word_index(j)], j)
        } else {
            bit_of(self.row_zom(i)[word_index(j)].at_least_1, j)
        }
    }

    /// Set cell `(i, j)` to `v > 0`.
    ///
    /// Each cell may be written at most once; writing it twice is a
    /// caller bug and trips an assertion. Overflow of the running
    /// total is an error: a corpus whose token count does not fit in
    /// the accumulator cannot be processed at all.
    pub fn set(&mut self, i: usize, j: usize, v: u32) -> Result<()> {
        assert!(i < self.nrow, "row {i} out of bounds ({} rows)", self.nrow);
        assert!(j < self.ncol, "column {j} out of bounds ({} columns)", self.ncol);
        assert!(v > 0, "only nonzero cells may be set");

        self.sum = self
            .sum
            .checked_add(v)
            .ok_or_else(|| Error::overflow(format!("the sum of elements exceeds {}", u32::MAX)))?;
        self.nnonzero = self
            .nnonzero
            .checked_add(1)
            .ok_or_else(|| Error::overflow(format!("more than {} nonzero cells", u32::MAX)))?;
        if let Some(rowsums) = &mut self.rowsums {
            rowsums[i] += v;
        }

        let mask = bit_mask(j);
        if let Some(bits) = &mut self.bits {
            let word = bits.cell_mut(i, j);
            assert_eq!(*word & mask, 0, "cell ({i}, {j}) written twice");
            *word |= mask;
        }
        if let Some(zom) = &mut self.zom {
            let word = zom.cell_mut(i, j);
            assert_eq!(word.at_least_1 & mask, 0, "cell ({i}, {j}) written twice");
            word.at_least_1 |= mask;
            if v > 1 {
                word.at_least_2 |= mask;
            }
        }
        Ok(())
    }

    /// Dense cell count divided by the sparse storage cost
    /// (`rows + nonzeros`). Large values mean the matrix is sparse.
    pub fn density_cost_ratio(&self) -> f64 {
        let dense = self.nrow as f64 * self.ncol as f64;
        let sparse = self.nrow as f64 + self.nnonzero as f64;
        dense / sparse
    }

    /// Build the sparse incidence index from the dense bitmaps.
    ///
    /// Entries come out sorted by row and then by column because the
    /// dense planes are scanned in that order.
    pub fn build_sparse_index(&mut self) {
        assert!(
            self.bits.is_some() || self.zom.is_some(),
            "no dense representation to index"
        );
        let mut incidence = Vec::with_capacity(self.nnonzero as usize);
        let mut starts = Vec::with_capacity(self.nrow + 1);
        for i in 0..self.nrow {
            starts.push(incidence.len() as u32);
            for j in 0..self.ncol {
                let (at_least_1, at_least_2) = if let Some(zom) = &self.zom {
                    let word = zom.row(i)[word_index(j)];
                    (bit_of(word.at_least_1, j), bit_of(word.at_least_2, j))
                } else {
                    let word = self.bits.as_ref().expect("checked above").row(i)[word_index(j)];
                    (bit_of(word, j), false)
                };
                if at_least_1 {
                    incidence.push(((j as u32) << 1) | u32::from(at_least_2));
                }
            }
        }
        starts.push(incidence.len() as u32);
        assert_eq!(
            incidence.len(),
            self.nnonzero as usize,
            "sparse index found {} nonzeros, expected {}",
            incidence.len(),
            self.nnonzero
        );
        self.sparse = Some(SparseIndex { incidence, starts });
    }
}
