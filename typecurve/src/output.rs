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

//! Result files and the cross-process merge.
//!
//! Every worker process writes one result file: a header naming the
//! total process count and the process's own 1-based id, then a
//! sequence of permutation-test and curve records, then an end marker.
//! The merge step re-reads one file per process in lockstep, verifies
//! that all headers and record metadata agree, and sums the encoded
//! bound sequences element-wise.

use std::io::Read;
use std::io::Write;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use tracing::debug;

use crate::codec::encode_bounds;
use crate::codec::Decoder;
use crate::corpus::CORPUS_MAGIC;
use crate::error::Error;
use crate::error::Result;
use crate::grid::Grid;
use crate::grid::StatKind;
use crate::stat::Bound;

/// File type marker of result files.
pub const RESULT_MAGIC: u32 = 0x591E_8AC1;

const CLASS_END: u32 = 0;
const CLASS_PERMTEST: u32 = 1;
const CLASS_CURVES: u32 = 2;

/// Probability levels at which curve crossings are derived.
pub const LEVELS: [f64; 4] = [0.0001, 0.001, 0.01, 0.10];

/// Number of crossing levels.
pub const NLEVEL: usize = LEVELS.len();

/// Observed whole-collection statistic: the collection's own position
/// on the x axis and its statistic value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub x: u32,
    pub y: u32,
}

/// Writes one worker process's result file.
pub struct ResultWriter<W> {
    writer: W,
}

impl<W: Write> ResultWriter<W> {
    /// Write the file header.
    pub fn new(mut writer: W, processes: u32, id: u32) -> Result<Self> {
        if id < 1 || id > processes {
            return Err(Error::invalid_argument(format!(
                "process id {id} out of 1..={processes}"
            )));
        }
        writer.write_u32::<LittleEndian>(RESULT_MAGIC)?;
        writer.write_u32::<LittleEndian>(processes)?;
        writer.write_u32::<LittleEndian>(id)?;
        Ok(Self { writer })
    }

    /// Append one permutation-test record.
    pub fn write_permtest(
        &mut self,
        kind: StatKind,
        iterations: u32,
        summaries: &[CollectionSummary],
        histogram: &[Bound],
    ) -> Result<()> {
        assert_eq!(summaries.len(), histogram.len(), "one cell per collection");
        self.writer.write_u32::<LittleEndian>(CLASS_PERMTEST)?;
        self.writer.write_u32::<LittleEndian>(kind.id())?;
        self.writer.write_u32::<LittleEndian>(iterations)?;
        self.writer.write_u32::<LittleEndian>(summaries.len() as u32)?;
        for summary in summaries {
            self.writer.write_u32::<LittleEndian>(summary.x)?;
            self.writer.write_u32::<LittleEndian>(summary.y)?;
        }
        encode_bounds(&mut self.writer, histogram)
    }

    /// Append one curve record. `histogram` is row-major with the y
    /// slot outermost.
    pub fn write_curves(
        &mut self,
        kind: StatKind,
        iterations: u32,
        grid: &Grid,
        histogram: &[Bound],
    ) -> Result<()> {
        let nx = grid.x(kind.x()).slots();
        let ny = grid.y(kind.y()).slots();
        assert_eq!(histogram.len(), grid.cells(kind)?, "one cell per grid slot");
        self.writer.write_u32::<LittleEndian>(CLASS_CURVES)?;
        self.writer.write_u32::<LittleEndian>(kind.id())?;
        self.writer.write_u32::<LittleEndian>(iterations)?;
        self.writer.write_u32::<LittleEndian>(nx)?;
        self.writer.write_u32::<LittleEndian>(ny)?;
        for t in grid.x(kind.x()).thresholds() {
            self.writer.write_u32::<LittleEndian>(t)?;
        }
        for t in grid.y(kind.y()).thresholds() {
            self.writer.write_u32::<LittleEndian>(t)?;
        }
        encode_bounds(&mut self.writer, histogram)
    }

    /// Write the end marker and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.write_u32::<LittleEndian>(CLASS_END)?;
        Ok(self.writer)
    }
}

/// A merged permutation-test record. Each cell's `lower` holds the
/// number of permutations at or below the observed collection value,
/// `upper` the number at or above it.
#[derive(Debug)]
pub struct MergedPermtest {
    pub kind: StatKind,
    pub iterations: u32,
    pub summaries: Vec<CollectionSummary>,
    pub counts: Vec<Bound>,
}

/// A merged curve record, still in raw histogram form.
#[derive(Debug)]
pub struct MergedCurves {
    pub kind: StatKind,
    pub iterations: u32,
    pub x_thresholds: Vec<u32>,
    pub y_thresholds: Vec<u32>,
    pub counts: Vec<Bound>,
}

impl MergedCurves {
    fn nx(&self) -> usize {
        self.x_thresholds.len()
    }

    fn ny(&self) -> usize {
        self.y_thresholds.len()
    }
}

/// One merged record.
#[derive(Debug)]
pub enum MergedRecord {
    Permtest(MergedPermtest),
    Curves(MergedCurves),
}

fn read_common<R: Read>(readers: &mut [R], what: &'static str) -> Result<u32> {
    let first = readers[0].read_u32::<LittleEndian>()?;
    for reader in &mut readers[1..] {
        let other = reader.read_u32::<LittleEndian>()?;
        if other != first {
            return Err(Error::mismatch(what, first, other));
        }
    }
    Ok(first)
}

fn read_header<R: Read>(readers: &mut [R]) -> Result<()> {
    for reader in readers.iter_mut() {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != RESULT_MAGIC {
            if magic == CORPUS_MAGIC {
                return Err(Error::invalid_data(
                    "wrong file format: this is a corpus file, not a result file",
                ));
            }
            return Err(Error::bad_magic(RESULT_MAGIC, magic));
        }
    }

    let processes = read_common(readers, "process count")?;
    if processes as usize != readers.len() {
        return Err(Error::invalid_data(format!(
            "{} files, but each file indicates that there were {} processes",
            readers.len(),
            processes
        )));
    }

    let mut seen = vec![0u32; processes as usize];
    for reader in readers.iter_mut() {
        let id = reader.read_u32::<LittleEndian>()?;
        if id < 1 || id > processes {
            return Err(Error::invalid_data(format!(
                "process id {id} out of 1..={processes}"
            )));
        }
        seen[(id - 1) as usize] += 1;
    }
    for (i, &count) in seen.iter().enumerate() {
        if count != 1 {
            return Err(Error::invalid_data(format!(
                "there were {} files with process id {}",
                count,
                i + 1
            )));
        }
    }
    Ok(())
}

// Decode one record of `n` bounds from every file in lockstep,
// summing element-wise.
fn read_record_sum<R: Read>(readers: &mut [R], n: usize) -> Result<Vec<Bound>> {
    let mut decoders: Vec<Decoder<&mut R>> = readers.iter_mut().map(Decoder::new).collect();
    let mut counts = vec![Bound::ZERO; n];
    for cell in counts.iter_mut() {
        for decoder in decoders.iter_mut() {
            let bound = decoder.next_bound()?;
            cell.lower = cell
                .lower
                .checked_add(bound.lower)
                .ok_or_else(|| Error::overflow("summed lower count overflows"))?;
            cell.upper = cell
                .upper
                .checked_add(bound.upper)
                .ok_or_else(|| Error::overflow("summed upper count overflows"))?;
        }
    }
    for decoder in decoders {
        decoder.finish()?;
    }
    Ok(counts)
}

// Every record carries the global iteration count; a file claiming
// zero iterations cannot have produced any counts and would divide
// the crossing fractions by zero downstream.
fn read_iterations<R: Read>(readers: &mut [R]) -> Result<u32> {
    let iterations = read_common(readers, "iteration count")?;
    if iterations < 1 {
        return Err(Error::invalid_data(
            "the iteration count must be at least 1",
        ));
    }
    Ok(iterations)
}

fn read_permtest<R: Read>(readers: &mut [R]) -> Result<MergedPermtest> {
    let kind = StatKind::from_id(read_common(readers, "statistic id")?)?;
    let iterations = read_iterations(readers)?;
    let n_collections = read_common(readers, "collection count")? as usize;

    let mut summaries = Vec::with_capacity(n_collections);
    for _ in 0..n_collections {
        let x = read_common(readers, "collection x summary")?;
        let y = read_common(readers, "collection y summary")?;
        summaries.push(CollectionSummary { x, y });
    }

    let counts = read_record_sum(readers, n_collections)?;
    for count in &counts {
        let (below, above) = (count.lower, count.upper);
        if below > iterations || above > iterations {
            return Err(Error::invalid_data("overflow in permutation test data"));
        }
        if below as u64 + (above as u64) < iterations as u64 {
            return Err(Error::invalid_data("underflow in permutation test data"));
        }
    }

    debug!(
        stat = kind.label(),
        iterations, collections = n_collections, "merged permutation test record"
    );
    Ok(MergedPermtest {
        kind,
        iterations,
        summaries,
        counts,
    })
}

fn read_curves<R: Read>(readers: &mut [R]) -> Result<MergedCurves> {
    let kind = StatKind::from_id(read_common(readers, "statistic id")?)?;
    let iterations = read_iterations(readers)?;
    let nx = read_common(readers, "x slot count")? as usize;
    let ny = read_common(readers, "y slot count")? as usize;

    let mut x_thresholds = Vec::with_capacity(nx);
    for _ in 0..nx {
        x_thresholds.push(read_common(readers, "x threshold")?);
    }
    let mut y_thresholds = Vec::with_capacity(ny);
    for _ in 0..ny {
        y_thresholds.push(read_common(readers, "y threshold")?);
    }

    let counts = read_record_sum(readers, nx * ny)?;
    debug!(
        stat = kind.label(),
        iterations, nx, ny, "merged curve record"
    );
    Ok(MergedCurves {
        kind,
        iterations,
        x_thresholds,
        y_thresholds,
        counts,
    })
}

/// Merge the result files of all worker processes.
///
/// All files must agree on every piece of metadata; any disagreement
/// or per-record count that cannot have come from `iterations`
/// permutations is a data-integrity error.
pub fn merge_results<R: Read>(mut readers: Vec<R>) -> Result<Vec<MergedRecord>> {
    if readers.is_empty() {
        return Err(Error::invalid_argument("no result files to merge"));
    }
    read_header(&mut readers)?;

    let mut records = Vec::new();
    loop {
        match read_common(&mut readers, "record class")? {
            CLASS_PERMTEST => records.push(MergedRecord::Permtest(read_permtest(&mut readers)?)),
            CLASS_CURVES => records.push(MergedRecord::Curves(read_curves(&mut readers)?)),
            CLASS_END => break,
            other => {
                return Err(Error::invalid_data(format!(
                    "unknown record class code: {other}"
                )))
            }
        }
    }
    for reader in readers.iter_mut() {
        let mut extra = [0u8; 1];
        if reader.read(&mut extra)? != 0 {
            return Err(Error::invalid_data(
                "expected end of input, but there is still some data in the file",
            ));
        }
    }
    Ok(records)
}

/// Crossing thresholds of one merged curve record: for each x slot and
/// probability level, the y value at which the cumulative permutation
/// fraction first exceeds the level.
#[derive(Debug)]
pub struct CurveCrossings {
    pub kind: StatKind,
    pub x_thresholds: Vec<u32>,
    /// `lower[x * NLEVEL + level]`, cumulated bottom-up.
    pub lower: Vec<u32>,
    /// `upper[x * NLEVEL + level]`, cumulated top-down.
    pub upper: Vec<u32>,
}

impl CurveCrossings {
    /// Lower crossing for an x slot and level index.
    pub fn lower(&self, xslot: usize, level: usize) -> u32 {
        self.lower[xslot * NLEVEL + level]
    }

    /// Upper crossing for an x slot and level index.
    pub fn upper(&self, xslot: usize, level: usize) -> u32 {
        self.upper[xslot * NLEVEL + level]
    }
}

// Walk one histogram column, recording the y threshold at which the
// cumulative fraction first exceeds each level. `cells` yields the
// (y threshold, count) pairs in cumulation order.
fn cross_column(
    cells: impl Iterator<Item = (u32, u32)>,
    iterations: u32,
    out: &mut [u32],
) -> Result<()> {
    let mut cum: u32 = 0;
    let mut next_level = 0;
    for (threshold, count) in cells {
        cum = cum
            .checked_add(count)
            .ok_or_else(|| Error::invalid_data("overflow in curve data"))?;
        if cum > iterations {
            return Err(Error::invalid_data("overflow in curve data"));
        }
        let fraction = cum as f64 / iterations as f64;
        while next_level < NLEVEL && LEVELS[next_level] < fraction {
            out[next_level] = threshold;
            next_level += 1;
        }
    }
    if cum < iterations {
        return Err(Error::invalid_data("underflow in curve data"));
    }
    // cum == iterations, so the fraction reached 1.0 and every level
    // was passed.
    assert_eq!(next_level, NLEVEL);
    Ok(())
}

/// Derive crossing thresholds from a merged curve record.
///
/// Every x slot of the histogram must sum to exactly `iterations` in
/// both components; anything else means the input files were
/// inconsistent.
pub fn find_crossings(curves: &MergedCurves) -> Result<CurveCrossings> {
    let (nx, ny) = (curves.nx(), curves.ny());
    let mut lower = vec![0u32; nx * NLEVEL];
    let mut upper = vec![0u32; nx * NLEVEL];

    for i in 0..nx {
        cross_column(
            (0..ny).map(|j| (curves.y_thresholds[j], curves.counts[j * nx + i].lower)),
            curves.iterations,
            &mut lower[i * NLEVEL..(i + 1) * NLEVEL],
        )?;
        cross_column(
            (0..ny).rev().map(|j| (curves.y_thresholds[j], curves.counts[j * nx + i].upper)),
            curves.iterations,
            &mut upper[i * NLEVEL..(i + 1) * NLEVEL],
        )?;
    }

    Ok(CurveCrossings {
        kind: curves.kind,
        x_thresholds: curves.x_thresholds.clone(),
        lower,
        upper,
    })
}

/// Decode one result file on its own, without cross-file summing.
pub fn read_results<R: Read>(reader: R) -> Result<Vec<MergedRecord>> {
    merge_results(vec![reader])
}
