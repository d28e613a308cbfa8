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

//! Bound pairs and per-statistic histograms.

use crate::grid::StatKind;
use crate::grid::NSTAT;

/// A conservative `(lower, upper)` bracket.
///
/// Depending on context a bound brackets either a statistic value that
/// cannot be observed exactly at a checkpoint, or, inside a histogram,
/// the number of permutations counted below and above a reference
/// point. In both cases bounds are summed element-wise when merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bound {
    /// The lower component.
    pub lower: u32,
    /// The upper component.
    pub upper: u32,
}

impl Bound {
    /// The zero pair.
    pub const ZERO: Bound = Bound { lower: 0, upper: 0 };

    /// Construct a bound; `lower <= upper` is the caller's contract
    /// for value brackets (histogram cells are independent counters
    /// and need not satisfy it).
    #[inline]
    pub const fn new(lower: u32, upper: u32) -> Bound {
        Bound { lower, upper }
    }
}

/// A set of selected statistic pairings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatSelection {
    flags: [bool; NSTAT],
}

impl StatSelection {
    /// The empty selection.
    pub const fn none() -> Self {
        Self {
            flags: [false; NSTAT],
        }
    }

    /// A selection with the given pairings.
    pub fn of(kinds: &[StatKind]) -> Self {
        let mut sel = Self::none();
        for &kind in kinds {
            sel.flags[kind as usize] = true;
        }
        sel
    }

    /// True if the pairing is selected.
    pub const fn contains(&self, kind: StatKind) -> bool {
        self.flags[kind as usize]
    }

    /// True if no pairing is selected.
    pub fn is_empty(&self) -> bool {
        !self.flags.iter().any(|&f| f)
    }

    /// The selected pairings in serialization order.
    pub fn iter(&self) -> impl Iterator<Item = StatKind> + '_ {
        StatKind::ALL.into_iter().filter(|&k| self.contains(k))
    }
}

/// One histogram of bounds per selected statistic pairing.
///
/// Each worker owns one `StatSet` exclusively while it runs its slice
/// of the generator range; the sets are then folded together.
#[derive(Clone, Debug)]
pub struct StatSet {
    cells: [Option<Vec<Bound>>; NSTAT],
}

impl StatSet {
    /// Allocate zeroed histograms, `len(kind)` cells for each
    /// selected pairing.
    pub fn new(selection: StatSelection, len: impl Fn(StatKind) -> usize) -> Self {
        let mut cells: [Option<Vec<Bound>>; NSTAT] = Default::default();
        for kind in selection.iter() {
            cells[kind as usize] = Some(vec![Bound::ZERO; len(kind)]);
        }
        Self { cells }
    }

    /// Allocate zeroed histograms with the same cell count everywhere.
    pub fn new_uniform(selection: StatSelection, len: usize) -> Self {
        Self::new(selection, |_| len)
    }

    /// Histogram for a pairing, if it was selected.
    pub fn get(&self, kind: StatKind) -> Option<&[Bound]> {
        self.cells[kind as usize].as_deref()
    }

    /// Mutable histogram for a pairing.
    pub fn get_mut(&mut self, kind: StatKind) -> Option<&mut [Bound]> {
        self.cells[kind as usize].as_deref_mut()
    }

    /// Element-wise sum of another set into this one. Both sets must
    /// carry the same pairings with the same shapes; anything else is
    /// a programming error, not recoverable data corruption.
    pub fn merge_from(&mut self, other: &StatSet) {
        for kind in StatKind::ALL {
            match (&mut self.cells[kind as usize], &other.cells[kind as usize]) {
                (Some(target), Some(source)) => {
                    assert_eq!(
                        target.len(),
                        source.len(),
                        "histogram shape mismatch for {}",
                        kind.label()
                    );
                    for (t, s) in target.iter_mut().zip(source) {
                        t.lower += s.lower;
                        t.upper += s.upper;
                    }
                }
                (None, None) => {}
                _ => panic!("histogram selection mismatch for {}", kind.label()),
            }
        }
    }
}

/// Fold many per-worker sets into one by balanced pairwise merging.
///
/// Each level of the tree merges disjoint pairs, so the folds of one
/// level can run in parallel; the whole reduction takes O(log n)
/// parallel steps.
pub fn merge_all(mut sets: Vec<StatSet>) -> StatSet {
    assert!(!sets.is_empty(), "nothing to merge");
    while sets.len() > 1 {
        let n = sets.len();
        let half = n / 2;
        let keep = n - half;
        let tail = sets.split_off(keep);
        let start = keep - half;
        std::thread::scope(|scope| {
            for (target, source) in sets[start..].iter_mut().zip(&tail) {
                scope.spawn(move || target.merge_from(source));
            }
        });
    }
    sets.pop().expect("checked above")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn singleton(kind: StatKind, bounds: &[(u32, u32)]) -> StatSet {
        let mut set = StatSet::new_uniform(StatSelection::of(&[kind]), bounds.len());
        for (cell, &(lo, hi)) in set.get_mut(kind).unwrap().iter_mut().zip(bounds) {
            *cell = Bound::new(lo, hi);
        }
        set
    }

    #[test]
    fn test_selection() {
        let sel = StatSelection::of(&[StatKind::TypeWord, StatKind::HapaxToken]);
        assert!(sel.contains(StatKind::TypeWord));
        assert!(!sel.contains(StatKind::TokenWord));
        assert_eq!(
            sel.iter().collect::<Vec<_>>(),
            vec![StatKind::TypeWord, StatKind::HapaxToken]
        );
        assert!(StatSelection::none().is_empty());
    }

    #[test]
    fn test_merge_from_sums_elementwise() {
        let mut a = singleton(StatKind::TypeToken, &[(1, 2), (0, 0), (5, 5)]);
        let b = singleton(StatKind::TypeToken, &[(10, 0), (3, 4), (1, 1)]);
        a.merge_from(&b);
        assert_eq!(
            a.get(StatKind::TypeToken).unwrap(),
            &[Bound::new(11, 2), Bound::new(3, 4), Bound::new(6, 6)]
        );
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn test_merge_shape_mismatch_panics() {
        let mut a = singleton(StatKind::TypeToken, &[(0, 0)]);
        let b = singleton(StatKind::TypeToken, &[(0, 0), (0, 0)]);
        a.merge_from(&b);
    }

    #[test]
    fn test_merge_all_associativity() {
        // Any balanced pairing order must give the same element-wise
        // sums; compare the tree fold against a sequential fold.
        let leaves: Vec<StatSet> = (0..7)
            .map(|i| singleton(StatKind::HapaxWord, &[(i, 7 - i), (2 * i, i * i)]))
            .collect();
        let mut sequential = leaves[0].clone();
        for leaf in &leaves[1..] {
            sequential.merge_from(leaf);
        }
        let tree = merge_all(leaves);
        assert_eq!(
            tree.get(StatKind::HapaxWord).unwrap(),
            sequential.get(StatKind::HapaxWord).unwrap()
        );
    }

    #[test]
    fn test_merge_all_single() {
        let only = singleton(StatKind::TokenWord, &[(3, 4)]);
        let merged = merge_all(vec![only]);
        assert_eq!(merged.get(StatKind::TokenWord).unwrap(), &[Bound::new(3, 4)]);
    }
}
