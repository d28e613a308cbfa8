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

use proptest::prelude::*;
use typecurve::bounds::{TypeAccum, ZomAccum};
use typecurve::codec::{decode_bounds, encode_bounds};
use typecurve::grid::StatKind;
use typecurve::matrix::SampleMatrix;
use typecurve::stat::{merge_all, Bound, StatSelection, StatSet};
use typecurve::stream::split;

// Bias the components toward the encoder's width-class boundaries.
fn bound_component() -> impl Strategy<Value = u32> {
    prop_oneof![
        4 => 0u32..4,
        2 => 0u32..16,
        2 => 0u32..256,
        1 => 0u32..65_536,
        1 => any::<u32>(),
    ]
}

fn bounds_vec() -> impl Strategy<Value = Vec<Bound>> {
    prop::collection::vec(
        (bound_component(), bound_component()).prop_map(|(l, u)| Bound::new(l, u)),
        0..400,
    )
}

// A small count matrix together with a row visiting order.
fn matrix_and_order() -> impl Strategy<Value = (Vec<Vec<u32>>, Vec<usize>)> {
    (1usize..7, 1usize..90).prop_flat_map(|(nrow, ncol)| {
        let rows = prop::collection::vec(
            prop::collection::vec(
                prop_oneof![5 => Just(0u32), 3 => 1u32..3, 1 => 3u32..6],
                ncol,
            ),
            nrow,
        );
        let order = Just((0..nrow).collect::<Vec<_>>()).prop_shuffle();
        (rows, order)
    })
}

fn build_matrix(rows: &[Vec<u32>]) -> SampleMatrix {
    let mut matrix = SampleMatrix::new(rows.len(), rows[0].len(), true, true, true);
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if v > 0 {
                matrix.set(i, j, v).unwrap();
            }
        }
    }
    matrix.build_sparse_index();
    matrix
}

proptest! {
    #[test]
    fn prop_split_is_an_exact_monotone_partition(total in 0u32..2_000_000, n in 1u32..800) {
        prop_assert_eq!(split(total, n, 0), 0);
        prop_assert_eq!(split(total, n, n), total);
        for i in 0..n {
            prop_assert!(split(total, n, i) <= split(total, n, i + 1));
        }
    }

    #[test]
    fn prop_split_parts_differ_by_at_most_one_when_even(n in 1u32..800, k in 1u32..50) {
        // When the total is a multiple of the part count every part
        // has exactly the same size.
        let total = n * k;
        for i in 0..n {
            prop_assert_eq!(split(total, n, i + 1) - split(total, n, i), k);
        }
    }

    #[test]
    fn prop_codec_round_trips(bounds in bounds_vec()) {
        let mut encoded = Vec::new();
        encode_bounds(&mut encoded, &bounds).unwrap();
        let decoded = decode_bounds(encoded.as_slice(), bounds.len()).unwrap();
        prop_assert_eq!(decoded, bounds);
    }

    #[test]
    fn prop_sparse_and_dense_type_walks_agree((rows, order) in matrix_and_order()) {
        let matrix = build_matrix(&rows);
        let sparse = matrix.sparse().unwrap();
        let mut dense_accum = TypeAccum::new(matrix.stride());
        let mut sparse_accum = TypeAccum::new(matrix.stride());
        for &i in &order {
            let d = dense_accum.step_dense(matrix.row_bits(i));
            let s = sparse_accum.step_sparse(sparse.row(i));
            prop_assert_eq!(d, s);
        }

        let ncol = rows[0].len();
        let types = (0..ncol)
            .filter(|&j| rows.iter().any(|row| row[j] > 0))
            .count() as u32;
        prop_assert_eq!(dense_accum.types(), types);
        prop_assert_eq!(sparse_accum.types(), types);
    }

    #[test]
    fn prop_sparse_and_dense_zom_walks_agree((rows, order) in matrix_and_order()) {
        let matrix = build_matrix(&rows);
        let sparse = matrix.sparse().unwrap();
        let mut dense_accum = ZomAccum::new(matrix.stride(), matrix.ncol());
        let mut sparse_accum = ZomAccum::new(matrix.stride(), matrix.ncol());
        for &i in &order {
            let d = dense_accum.step_dense(matrix.row_zom(i));
            let s = sparse_accum.step_sparse(sparse.row(i));
            prop_assert_eq!(d, s);
        }

        // Final counts match a direct column scan.
        let ncol = rows[0].len();
        let totals: Vec<u32> = (0..ncol)
            .map(|j| order.iter().map(|&i| rows[i][j]).sum())
            .collect();
        let types = totals.iter().filter(|&&t| t > 0).count() as u32;
        let hapaxes = totals.iter().filter(|&&t| t == 1).count() as u32;
        prop_assert_eq!(dense_accum.types(), types);
        prop_assert_eq!(dense_accum.hapaxes(), hapaxes);
        prop_assert_eq!(sparse_accum.hapaxes(), hapaxes);
    }

    #[test]
    fn prop_pairwise_reduction_matches_sequential_folding(
        histograms in prop::collection::vec(
            prop::collection::vec((0u32..1000, 0u32..1000), 12),
            1..9,
        )
    ) {
        let selection = StatSelection::of(&[StatKind::TypeWord, StatKind::HapaxToken]);
        let sets: Vec<StatSet> = histograms
            .iter()
            .map(|cells| {
                let mut set = StatSet::new_uniform(selection, cells.len());
                for kind in selection.iter() {
                    for (target, &(lower, upper)) in
                        set.get_mut(kind).unwrap().iter_mut().zip(cells)
                    {
                        *target = Bound::new(lower, upper);
                    }
                }
                set
            })
            .collect();

        let mut sequential = sets[0].clone();
        for set in &sets[1..] {
            sequential.merge_from(set);
        }
        let reduced = merge_all(sets);
        for kind in selection.iter() {
            prop_assert_eq!(reduced.get(kind), sequential.get(kind));
        }
    }
}
