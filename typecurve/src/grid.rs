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

//! Bucket grids: mapping raw counts to a bounded number of slots.
//!
//! Each axis gets a `(scale, slot count)` pair computed from the
//! observed maximum and a requested resolution. The forward mapping
//! `slot` and its ceiling counterpart `slot_up` are inverses of
//! `threshold` in the bracketing sense checked by
//! [`SlotScale::self_check`].

use crate::error::Error;
use crate::error::Result;

/// The statistics that can be accumulated on the y axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum YAxis {
    /// Distinct items seen at least once.
    Types = 0,
    /// Items seen exactly once.
    Hapaxes = 1,
    /// Cumulative occurrence count.
    Tokens = 2,
}

/// Number of y axes.
pub const NY: usize = 3;

/// The accumulation measures usable as the x axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum XAxis {
    /// Accumulated word count of the samples consumed so far.
    Words = 0,
    /// Accumulated token count of the samples consumed so far.
    Tokens = 1,
}

/// Number of x axes.
pub const NX: usize = 2;

/// The supported (y, x) statistic pairings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatKind {
    /// Type count against accumulated word count.
    TypeWord = 0,
    /// Type count against accumulated token count.
    TypeToken = 1,
    /// Hapax count against accumulated word count.
    HapaxWord = 2,
    /// Hapax count against accumulated token count.
    HapaxToken = 3,
    /// Token count against accumulated word count.
    TokenWord = 4,
}

/// Number of statistic pairings.
pub const NSTAT: usize = 5;

impl StatKind {
    /// All pairings, in serialization order.
    pub const ALL: [StatKind; NSTAT] = [
        StatKind::TypeWord,
        StatKind::TypeToken,
        StatKind::HapaxWord,
        StatKind::HapaxToken,
        StatKind::TokenWord,
    ];

    /// The y axis of this pairing.
    pub const fn y(self) -> YAxis {
        match self {
            StatKind::TypeWord | StatKind::TypeToken => YAxis::Types,
            StatKind::HapaxWord | StatKind::HapaxToken => YAxis::Hapaxes,
            StatKind::TokenWord => YAxis::Tokens,
        }
    }

    /// The x axis of this pairing.
    pub const fn x(self) -> XAxis {
        match self {
            StatKind::TypeWord | StatKind::HapaxWord | StatKind::TokenWord => XAxis::Words,
            StatKind::TypeToken | StatKind::HapaxToken => XAxis::Tokens,
        }
    }

    /// Stable identifier used in result files.
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// The pairing with the given identifier.
    pub fn from_id(id: u32) -> Result<StatKind> {
        StatKind::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| Error::invalid_data(format!("unknown statistic id: {id}")))
    }

    /// Human-readable label, also used as a stable statistic code.
    pub const fn label(self) -> &'static str {
        match self {
            StatKind::TypeWord => "type-word",
            StatKind::TypeToken => "type-token",
            StatKind::HapaxWord => "hapax-word",
            StatKind::HapaxToken => "hapax-token",
            StatKind::TokenWord => "token-word",
        }
    }
}

/// Index of a 2-D grid cell. Row-major with x innermost, which keeps
/// the hot x loop within one cache line run.
#[inline]
pub fn cell_index(ny: usize, nx: usize, yslot: usize, xslot: usize) -> usize {
    debug_assert!(yslot < ny);
    debug_assert!(xslot < nx);
    yslot * nx + xslot
}

/// Discretization of one axis: a scale factor and a slot count.
#[derive(Clone, Copy, Debug)]
pub struct SlotScale {
    scale: f64,
    slots: u32,
}

impl SlotScale {
    /// Compute the discretization for an axis with the given observed
    /// maximum, bounded by `resolution` slots.
    ///
    /// If every integer up to `max` fits within the resolution, each
    /// value gets its own slot. Otherwise slot thresholds are spread
    /// evenly so that slot 0 maps to 0 and the last slot to `max`.
    pub fn new(max: u32, resolution: u32) -> Self {
        assert!(max >= 1, "axis maximum must be positive");
        assert!(resolution >= 2, "axis resolution must be at least 2");
        let this = if max as u64 + 1 <= resolution as u64 {
            SlotScale {
                scale: 1.0,
                slots: max + 1,
            }
        } else {
            SlotScale {
                scale: max as f64 / (resolution - 1) as f64,
                slots: resolution,
            }
        };
        this.self_check(max);
        this
    }

    /// Number of slots on this axis.
    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// The slot whose threshold is nearest to `v` from below:
    /// the floor inverse of [`SlotScale::threshold`].
    #[inline]
    pub fn slot(&self, v: u32) -> u32 {
        ((v as f64 + 0.5) / self.scale) as u32
    }

    /// The slot whose threshold is nearest to `v` from above:
    /// the ceiling inverse of [`SlotScale::threshold`].
    #[inline]
    pub fn slot_up(&self, v: u32) -> u32 {
        ((v as f64 - 0.5) / self.scale + 1.0) as u32
    }

    /// The raw value at the lower edge of slot `i`.
    #[inline]
    pub fn threshold(&self, i: u32) -> u32 {
        (i as f64 * self.scale + 0.5) as u32
    }

    /// Thresholds of every slot, in order.
    pub fn thresholds(&self) -> Vec<u32> {
        (0..self.slots).map(|i| self.threshold(i)).collect()
    }

    // The three mappings must bracket each other exactly at every
    // threshold boundary; a scale that fails here would silently
    // misplace counts.
    fn self_check(&self, max: u32) {
        let t0 = self.threshold(0);
        let t1 = self.threshold(1);
        let tm2 = self.threshold(self.slots - 2);
        let tm1 = self.threshold(self.slots - 1);

        assert_eq!(t0, 0);
        assert!(t1 > 0);
        assert!(tm2 < max);
        assert_eq!(tm1, max);

        assert_eq!(self.slot(t0), 0);
        assert_eq!(self.slot(t1 - 1), 0);
        assert_eq!(self.slot(t1), 1);
        assert_eq!(self.slot(tm2), self.slots - 2);
        assert_eq!(self.slot(tm1 - 1), self.slots - 2);
        assert_eq!(self.slot(tm1), self.slots - 1);

        assert_eq!(self.slot_up(t0), 0);
        assert_eq!(self.slot_up(t0 + 1), 1);
        assert_eq!(self.slot_up(t1), 1);
        assert_eq!(self.slot_up(tm2), self.slots - 2);
        assert_eq!(self.slot_up(tm2 + 1), self.slots - 1);
        assert_eq!(self.slot_up(tm1), self.slots - 1);
    }
}

/// Multiply two cell counts, refusing results that do not fit the
/// histogram index range.
fn cell_multiply(a: u32, b: u32) -> Result<usize> {
    let product = a as u64 * b as u64;
    if product > i32::MAX as u64 {
        return Err(Error::overflow(format!(
            "overflow: {a} * {b} > {}",
            i32::MAX
        )));
    }
    Ok(product as usize)
}

/// Per-axis discretizations for curve estimation.
#[derive(Clone, Debug)]
pub struct Grid {
    xscale: [SlotScale; NX],
    yscale: [SlotScale; NY],
}

impl Grid {
    /// Build a grid from observed axis maxima and the requested x/y
    /// resolutions.
    pub fn new(xmax: [u32; NX], ymax: [u32; NY], x_resolution: u32, y_resolution: u32) -> Result<Self> {
        if x_resolution < 2 {
            return Err(Error::invalid_argument(
                "an x resolution of at least 2 is required for curves",
            ));
        }
        if y_resolution < 2 {
            return Err(Error::invalid_argument(
                "a y resolution of at least 2 is required for curves",
            ));
        }
        let grid = Grid {
            xscale: [
                SlotScale::new(xmax[XAxis::Words as usize], x_resolution),
                SlotScale::new(xmax[XAxis::Tokens as usize], x_resolution),
            ],
            yscale: [
                SlotScale::new(ymax[YAxis::Types as usize], y_resolution),
                SlotScale::new(ymax[YAxis::Hapaxes as usize], y_resolution),
                SlotScale::new(ymax[YAxis::Tokens as usize], y_resolution),
            ],
        };
        // Force the cell-count overflow check at setup time.
        for kind in StatKind::ALL {
            grid.cells(kind)?;
        }
        Ok(grid)
    }

    /// Discretization of an x axis.
    pub fn x(&self, axis: XAxis) -> &SlotScale {
        &self.xscale[axis as usize]
    }

    /// Discretization of a y axis.
    pub fn y(&self, axis: YAxis) -> &SlotScale {
        &self.yscale[axis as usize]
    }

    /// Number of histogram cells for one statistic pairing.
    pub fn cells(&self, kind: StatKind) -> Result<usize> {
        cell_multiply(self.y(kind.y()).slots(), self.x(kind.x()).slots())
    }

    /// Cell index for a (y slot, x slot) pair of one pairing.
    #[inline]
    pub fn cell(&self, kind: StatKind, yslot: u32, xslot: u32) -> usize {
        cell_index(
            self.y(kind.y()).slots() as usize,
            self.x(kind.x()).slots() as usize,
            yslot as usize,
            xslot as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_slot_per_value() {
        let s = SlotScale::new(10, 100);
        assert_eq!(s.slots(), 11);
        for v in 0..=10 {
            assert_eq!(s.slot(v), v);
            assert_eq!(s.slot_up(v), v);
            assert_eq!(s.threshold(v), v);
        }
    }

    #[test]
    fn test_bounded_resolution() {
        let s = SlotScale::new(1000, 11);
        assert_eq!(s.slots(), 11);
        assert_eq!(s.threshold(0), 0);
        assert_eq!(s.threshold(10), 1000);
        // Interior thresholds bracket correctly in both directions.
        for k in 1..10 {
            let t = s.threshold(k);
            assert_eq!(s.slot(t - 1), k - 1);
            assert_eq!(s.slot(t), k);
            assert_eq!(s.slot_up(t), k);
            assert_eq!(s.slot_up(t + 1), k + 1);
        }
    }

    #[test]
    fn test_self_check_survives_awkward_scales() {
        // Scales that do not divide the maximum evenly.
        for max in [7, 97, 1000, 65535, 1 << 20] {
            for res in [2, 4, 5, 13, 64, 100] {
                let s = SlotScale::new(max, res);
                assert!(s.slots() <= max + 1);
            }
        }
    }

    #[test]
    fn test_cell_index_is_row_major() {
        assert_eq!(cell_index(4, 5, 0, 0), 0);
        assert_eq!(cell_index(4, 5, 0, 4), 4);
        assert_eq!(cell_index(4, 5, 1, 0), 5);
        assert_eq!(cell_index(4, 5, 3, 4), 19);
    }

    #[test]
    fn test_stat_kind_roundtrip() {
        for kind in StatKind::ALL {
            assert_eq!(StatKind::from_id(kind.id()).unwrap(), kind);
        }
        assert!(StatKind::from_id(99).is_err());
    }

    #[test]
    fn test_grid_requires_resolutions() {
        let err = Grid::new([10, 10], [10, 10, 10], 0, 16).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        let err = Grid::new([10, 10], [10, 10, 10], 16, 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_grid_cells() {
        let grid = Grid::new([100, 200], [30, 30, 200], 11, 7).unwrap();
        assert_eq!(grid.x(XAxis::Words).slots(), 11);
        assert_eq!(grid.y(YAxis::Types).slots(), 7);
        assert_eq!(grid.cells(StatKind::TypeWord).unwrap(), 77);
    }
}
