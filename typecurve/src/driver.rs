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

//! The permutation/curve driver.
//!
//! One call to [`run`] performs a worker process's whole share of the
//! computation: it draws the permutations of every stream in the
//! process's generator range, walks the bounds calculators over each
//! permutation, accumulates per-worker histograms, folds them together
//! and writes the result file. Worker threads share nothing but the
//! read-only corpus and stream states; each owns its histogram until
//! the final reduction.

use std::io::Write;
use std::sync::Mutex;
use std::thread;

use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;
use tracing::info;

use crate::bounds::TokenAccum;
use crate::bounds::TypeAccum;
use crate::bounds::ZomAccum;
use crate::corpus::Corpus;
use crate::error::Error;
use crate::error::Result;
use crate::grid::Grid;
use crate::grid::StatKind;
use crate::grid::XAxis;
use crate::grid::YAxis;
use crate::grid::NX;
use crate::grid::NY;
use crate::matrix::Representation;
use crate::output::CollectionSummary;
use crate::output::ResultWriter;
use crate::stat::merge_all;
use crate::stat::Bound;
use crate::stat::StatSelection;
use crate::stat::StatSet;
use crate::stream::generator_range;
use crate::stream::iteration_range;
use crate::stream::random_permutation_into;
use crate::stream::split;
use crate::stream::StreamSet;

/// Settings for one worker process's run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Total number of worker processes.
    pub processes: u32,
    /// This process's 1-based id.
    pub id: u32,
    /// Global permutation count, across all processes.
    pub iterations: u32,
    /// Worker threads; 0 means one per available hardware thread.
    pub workers: usize,
    /// Statistics to run the permutation test for.
    pub permtest: StatSelection,
    /// Statistics to estimate curves for.
    pub curves: StatSelection,
    /// Grid resolution along x, required when curves are selected.
    pub x_resolution: u32,
    /// Grid resolution along y, required when curves are selected.
    pub y_resolution: u32,
}

impl RunConfig {
    /// A single-process configuration with nothing selected yet.
    pub fn new(iterations: u32) -> Self {
        Self {
            processes: 1,
            id: 1,
            iterations,
            workers: 0,
            permtest: StatSelection::none(),
            curves: StatSelection::none(),
            x_resolution: 0,
            y_resolution: 0,
        }
    }

    fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            thread::available_parallelism().map_or(1, |n| n.get())
        }
    }
}

/// Whole-collection totals along every axis.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectionTotals {
    x: [u32; NX],
    y: [u32; NY],
}

impl CollectionTotals {
    /// The `(x, y)` summary for one statistic pairing.
    pub fn summary(&self, kind: StatKind) -> CollectionSummary {
        CollectionSummary {
            x: self.x[kind.x() as usize],
            y: self.y[kind.y() as usize],
        }
    }
}

/// Exact statistics of every collection, taken over its samples as a
/// set. These are the observed values the permutation test compares
/// the null distribution against.
pub fn summarise_collections(corpus: &Corpus) -> Vec<CollectionTotals> {
    let types = corpus.types();
    let mut totals = vec![CollectionTotals::default(); corpus.n_collections()];

    for (c, total) in totals.iter_mut().enumerate() {
        let mut zom = types
            .has_zom()
            .then(|| ZomAccum::new(types.stride(), types.ncol()));
        let mut bits =
            (!types.has_zom() && types.has_bits()).then(|| TypeAccum::new(types.stride()));

        for i in 0..corpus.n_samples() {
            if !corpus.collections().cell(i, c) {
                continue;
            }
            total.x[XAxis::Words as usize] += corpus.word_counts()[i];
            total.x[XAxis::Tokens as usize] += corpus.token_counts()[i];
            if let Some(zom) = &mut zom {
                zom.step_dense(types.row_zom(i));
            } else if let Some(bits) = &mut bits {
                bits.step_dense(types.row_bits(i));
            }
        }

        if let Some(zom) = &zom {
            total.y[YAxis::Types as usize] = zom.types();
            total.y[YAxis::Hapaxes as usize] = zom.hapaxes();
        } else if let Some(bits) = &bits {
            total.y[YAxis::Types as usize] = bits.types();
        }
        total.y[YAxis::Tokens as usize] = total.x[XAxis::Tokens as usize];
    }
    totals
}

// Which accumulator a pass needs, decided once up front so that
// workers cannot fail halfway through.
#[derive(Clone, Copy, Debug)]
enum AccumKind {
    Bits,
    Zom,
    TokensOnly,
}

fn accum_kind(corpus: &Corpus, selection: StatSelection) -> Result<AccumKind> {
    let needs_hapax = selection.iter().any(|k| k.y() == YAxis::Hapaxes);
    let needs_types = selection.iter().any(|k| k.y() == YAxis::Types);
    let types = corpus.types();
    if needs_hapax {
        if !types.has_zom() {
            return Err(Error::invalid_argument(
                "hapax statistics need the zero/one/many bitmap, which was not loaded",
            ));
        }
        return Ok(AccumKind::Zom);
    }
    if needs_types {
        if types.has_bits() {
            return Ok(AccumKind::Bits);
        }
        if types.has_zom() {
            return Ok(AccumKind::Zom);
        }
        return Err(Error::invalid_argument(
            "type statistics need a presence bitmap, which was not loaded",
        ));
    }
    Ok(AccumKind::TokensOnly)
}

/// One permuted accumulation step: the x totals after the step and the
/// per-axis bounds that hold throughout it.
#[derive(Clone, Copy, Debug)]
struct Step {
    x_end: [u32; NX],
    y: [Bound; NY],
}

enum Accum {
    Bits(TypeAccum),
    Zom(ZomAccum),
    TokensOnly,
}

// Per-worker walk state, reused across permutations to keep the inner
// loop allocation-free.
struct Walk {
    order: Vec<u32>,
    accum: Accum,
    tokens: TokenAccum,
    sparse: bool,
    steps: Vec<Step>,
}

impl Walk {
    fn new(corpus: &Corpus, kind: AccumKind) -> Walk {
        let types = corpus.types();
        let accum = match kind {
            AccumKind::Bits => Accum::Bits(TypeAccum::new(types.stride())),
            AccumKind::Zom => Accum::Zom(ZomAccum::new(types.stride(), types.ncol())),
            AccumKind::TokensOnly => Accum::TokensOnly,
        };
        Walk {
            order: vec![0; corpus.n_samples()],
            accum,
            tokens: TokenAccum::new(),
            sparse: corpus.representation() == Representation::Sparse,
            steps: Vec::with_capacity(corpus.n_samples()),
        }
    }

    // Draw one permutation and walk the bounds calculators across it.
    fn run(&mut self, corpus: &Corpus, rng: &mut Xoshiro256PlusPlus) {
        random_permutation_into(rng, &mut self.order);
        match &mut self.accum {
            Accum::Bits(a) => a.reset(),
            Accum::Zom(a) => a.reset(),
            Accum::TokensOnly => {}
        }
        self.tokens.reset();
        self.steps.clear();

        let types = corpus.types();
        let mut x_end = [0u32; NX];
        for &row in &self.order {
            let i = row as usize;
            x_end[XAxis::Words as usize] += corpus.word_counts()[i];
            x_end[XAxis::Tokens as usize] += corpus.token_counts()[i];

            let (type_bound, hapax_bound) = match &mut self.accum {
                Accum::Bits(a) => {
                    let b = if self.sparse {
                        a.step_sparse(types.sparse().expect("sparse index present").row(i))
                    } else {
                        a.step_dense(types.row_bits(i))
                    };
                    (b, Bound::ZERO)
                }
                Accum::Zom(a) => {
                    if self.sparse {
                        a.step_sparse(types.sparse().expect("sparse index present").row(i))
                    } else {
                        a.step_dense(types.row_zom(i))
                    }
                }
                Accum::TokensOnly => (Bound::ZERO, Bound::ZERO),
            };
            let token_bound = self.tokens.step(corpus.token_counts()[i]);

            self.steps.push(Step {
                x_end,
                y: [type_bound, hapax_bound, token_bound],
            });
        }
    }
}

// Run the process's generator range in parallel, one recorder call per
// permutation, and fold the per-worker histograms.
fn run_parallel<F, G, R>(
    corpus: &Corpus,
    streams: &StreamSet,
    config: &RunConfig,
    accum: AccumKind,
    new_set: F,
    new_recorder: G,
) -> Result<StatSet>
where
    F: Fn() -> StatSet + Sync,
    G: Fn() -> R + Sync,
    R: FnMut(&[Step], &mut StatSet),
{
    let range = generator_range(config.processes, config.id);
    let (start, parts) = (range.start, range.end - range.start);
    let workers = config.worker_count().min(parts.max(1) as usize).max(1);
    let results = Mutex::new(Vec::with_capacity(workers));

    thread::scope(|scope| {
        for w in 0..workers as u32 {
            let results = &results;
            let new_set = &new_set;
            let new_recorder = &new_recorder;
            scope.spawn(move || {
                let from = start + split(parts, workers as u32, w);
                let to = start + split(parts, workers as u32, w + 1);
                let mut set = new_set();
                let mut record = new_recorder();
                let mut walk = Walk::new(corpus, accum);
                for part in from..to {
                    let mut rng = streams.stream(part);
                    for _ in iteration_range(config.iterations, part) {
                        walk.run(corpus, &mut rng);
                        record(&walk.steps, &mut set);
                    }
                }
                results.lock().expect("worker panicked holding results").push(set);
            });
        }
    });

    let sets = results.into_inner().expect("worker panicked holding results");
    Ok(merge_all(sets))
}

// The step whose x range brackets `x`: the first step ending at or
// after it.
fn bracketing_step(steps: &[Step], axis: usize, x: u32) -> &Step {
    let k = steps.partition_point(|s| s.x_end[axis] < x);
    &steps[k.min(steps.len() - 1)]
}

fn record_permtest(
    steps: &[Step],
    totals: &[CollectionTotals],
    selection: StatSelection,
    set: &mut StatSet,
) {
    for kind in selection.iter() {
        let xi = kind.x() as usize;
        let yi = kind.y() as usize;
        let histogram = set.get_mut(kind).expect("histogram allocated for selection");
        for (cell, total) in histogram.iter_mut().zip(totals) {
            let step = bracketing_step(steps, xi, total.x[xi]);
            let y = total.y[yi];
            cell.lower += u32::from(step.y[yi].lower <= y);
            cell.upper += u32::from(step.y[yi].upper >= y);
        }
    }
}

// Per-permutation curve recording: for every x slot find the smallest
// lower and largest upper bound among the steps whose x range touches
// the slot's threshold range, then bump the histogram cell at the
// discretized y position, once per side per slot.
struct CurveRecorder {
    // (min lower, max upper) per x slot, reused across permutations.
    floor: Vec<u32>,
    ceil: Vec<u32>,
}

impl CurveRecorder {
    fn new() -> Self {
        Self {
            floor: Vec::new(),
            ceil: Vec::new(),
        }
    }

    fn record(&mut self, steps: &[Step], grid: &Grid, selection: StatSelection, set: &mut StatSet) {
        for kind in selection.iter() {
            let xs = grid.x(kind.x());
            let ys = grid.y(kind.y());
            let nx = xs.slots() as usize;
            let xi = kind.x() as usize;
            let yi = kind.y() as usize;

            self.floor.clear();
            self.floor.resize(nx, u32::MAX);
            self.ceil.clear();
            self.ceil.resize(nx, 0);

            let mut x_start = 0u32;
            for step in steps {
                let x_end = step.x_end[xi];
                let bound = step.y[yi];
                let ia = (xs.slot_up(x_start) as usize).saturating_sub(1);
                let ib = xs.slot(x_end) as usize;
                for i in ia..=ib {
                    self.floor[i] = self.floor[i].min(bound.lower);
                    self.ceil[i] = self.ceil[i].max(bound.upper);
                }
                x_start = x_end;
            }

            let histogram = set.get_mut(kind).expect("histogram allocated for selection");
            for (i, (&floor, &ceil)) in self.floor.iter().zip(&self.ceil).enumerate() {
                debug_assert_ne!(floor, u32::MAX, "x slot {i} not covered by any step");
                histogram[grid.cell(kind, ys.slot(floor), i as u32)].lower += 1;
                histogram[grid.cell(kind, ys.slot_up(ceil), i as u32)].upper += 1;
            }
        }
    }
}

fn build_grid(corpus: &Corpus, config: &RunConfig) -> Result<Grid> {
    let mut xmax = [corpus.x_max(XAxis::Words), corpus.x_max(XAxis::Tokens)];
    for axis in [XAxis::Words, XAxis::Tokens] {
        if xmax[axis as usize] == 0 {
            if config.curves.iter().any(|k| k.x() == axis) {
                return Err(Error::invalid_argument(format!(
                    "cannot estimate curves over an empty {axis:?} axis"
                )));
            }
            xmax[axis as usize] = 1; // unused axis, keep the grid constructible
        }
    }
    let ymax = [
        corpus.y_max(YAxis::Types),
        corpus.y_max(YAxis::Hapaxes),
        corpus.y_max(YAxis::Tokens),
    ];
    Grid::new(xmax, ymax, config.x_resolution, config.y_resolution)
}

/// Run this worker process's share of the selected analyses and write
/// its result file.
pub fn run<W: Write>(
    corpus: &Corpus,
    streams: &StreamSet,
    config: &RunConfig,
    writer: W,
) -> Result<W> {
    if config.iterations == 0 {
        return Err(Error::invalid_argument("at least one iteration is required"));
    }
    let mut writer = ResultWriter::new(writer, config.processes, config.id)?;
    let range = generator_range(config.processes, config.id);
    info!(
        process = config.id,
        processes = config.processes,
        streams = range.end - range.start,
        iterations = config.iterations,
        "starting analysis run"
    );

    if !config.permtest.is_empty() {
        let accum = accum_kind(corpus, config.permtest)?;
        let totals = summarise_collections(corpus);
        let selection = config.permtest;
        let histograms = run_parallel(
            corpus,
            streams,
            config,
            accum,
            || StatSet::new_uniform(selection, totals.len()),
            || |steps: &[Step], set: &mut StatSet| record_permtest(steps, &totals, selection, set),
        )?;
        for kind in selection.iter() {
            let summaries: Vec<CollectionSummary> =
                totals.iter().map(|t| t.summary(kind)).collect();
            writer.write_permtest(
                kind,
                config.iterations,
                &summaries,
                histograms.get(kind).expect("histogram allocated for selection"),
            )?;
            debug!(stat = kind.label(), "permutation test record written");
        }
    }

    if !config.curves.is_empty() {
        let accum = accum_kind(corpus, config.curves)?;
        let grid = build_grid(corpus, config)?;
        let selection = config.curves;
        let grid_ref = &grid;
        let histograms = run_parallel(
            corpus,
            streams,
            config,
            accum,
            || {
                StatSet::new(selection, |kind| {
                    grid_ref.cells(kind).expect("cell count checked at grid setup")
                })
            },
            || {
                let mut recorder = CurveRecorder::new();
                move |steps: &[Step], set: &mut StatSet| {
                    recorder.record(steps, grid_ref, selection, set)
                }
            },
        )?;
        for kind in selection.iter() {
            writer.write_curves(
                kind,
                config.iterations,
                &grid,
                histograms.get(kind).expect("histogram allocated for selection"),
            )?;
            debug!(stat = kind.label(), "curve record written");
        }
    }

    writer.finish()
}
