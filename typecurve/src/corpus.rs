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

//! Binary corpus files.
//!
//! A corpus file carries everything one analysis run needs: per-sample
//! word counts, the sample-collection incidence matrix, and the
//! sample-item count matrix. All integers are little-endian `u32`, all
//! sample/collection/item ids in the pair lists are 1-based, and the
//! file ends with a single zero byte followed by end of file.

use std::io::Read;
use std::io::Write;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::grid::XAxis;
use crate::grid::YAxis;
use crate::matrix::Representation;
use crate::matrix::SampleMatrix;
use crate::matrix::SPARSITY_HEURISTIC;
use crate::output::RESULT_MAGIC;

/// File type marker of corpus files.
pub const CORPUS_MAGIC: u32 = 0xEEE1_18E9;

/// What to materialize while loading a corpus.
#[derive(Clone, Copy, Debug)]
pub struct ReadOptions {
    /// Allocate the dense presence bitmap (type-only statistics).
    pub bits: bool,
    /// Allocate the zero/one/many bitmap (hapax statistics).
    pub zom: bool,
    /// Force a matrix walk, or let the density heuristic decide.
    pub representation: Representation,
    /// Density threshold used when `representation` is `Auto`.
    pub sparsity_heuristic: f64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            bits: true,
            zom: true,
            representation: Representation::Auto,
            sparsity_heuristic: SPARSITY_HEURISTIC,
        }
    }
}

/// An immutable loaded corpus.
#[derive(Debug)]
pub struct Corpus {
    word_counts: Vec<u32>,
    word_total: u32,
    collections: SampleMatrix,
    types: SampleMatrix,
    representation: Representation,
}

impl Corpus {
    pub fn n_samples(&self) -> usize {
        self.types.nrow()
    }

    pub fn n_collections(&self) -> usize {
        self.collections.ncol()
    }

    pub fn n_types(&self) -> usize {
        self.types.ncol()
    }

    /// Words per sample, indexed by sample row.
    pub fn word_counts(&self) -> &[u32] {
        &self.word_counts
    }

    /// Tokens per sample, indexed by sample row.
    pub fn token_counts(&self) -> &[u32] {
        self.types.rowsums().expect("type matrix always carries row sums")
    }

    /// The sample-collection incidence matrix.
    pub fn collections(&self) -> &SampleMatrix {
        &self.collections
    }

    /// The sample-item count matrix.
    pub fn types(&self) -> &SampleMatrix {
        &self.types
    }

    /// The matrix walk resolved at load time.
    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Largest reachable value on an x axis: the grand total of the
    /// respective per-sample counts.
    pub fn x_max(&self, axis: XAxis) -> u32 {
        match axis {
            XAxis::Words => self.word_total,
            XAxis::Tokens => self.types.sum(),
        }
    }

    /// Largest reachable value on a y axis.
    pub fn y_max(&self, axis: YAxis) -> u32 {
        match axis {
            YAxis::Types | YAxis::Hapaxes => self.types.ncol() as u32,
            YAxis::Tokens => self.types.sum(),
        }
    }

    /// Per-sample counts along an x axis.
    pub fn x_counts(&self, axis: XAxis) -> &[u32] {
        match axis {
            XAxis::Words => self.word_counts(),
            XAxis::Tokens => self.token_counts(),
        }
    }
}

fn read_count<R: Read>(reader: &mut R, what: &'static str) -> Result<u32> {
    let v = reader.read_u32::<LittleEndian>()?;
    if v == 0 {
        return Err(Error::invalid_data(format!("corpus file holds no {what}")));
    }
    Ok(v)
}

fn check_id(id: u32, limit: u32, what: &'static str) -> Result<usize> {
    if id < 1 || id > limit {
        return Err(Error::invalid_data(format!(
            "{what} id {id} out of bounds (1..={limit})"
        )));
    }
    Ok((id - 1) as usize)
}

/// Read a corpus file, resolving the matrix representation.
pub fn read_corpus<R: Read>(mut reader: R, options: &ReadOptions) -> Result<Corpus> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != CORPUS_MAGIC {
        if magic == RESULT_MAGIC {
            return Err(Error::invalid_data(
                "wrong file format: this is a result file, not a corpus file",
            ));
        }
        return Err(Error::bad_magic(CORPUS_MAGIC, magic));
    }

    let n_samples = read_count(&mut reader, "samples")?;
    let n_collections = read_count(&mut reader, "collections")?;
    let n_types = read_count(&mut reader, "items")?;
    let n_sample_coll = read_count(&mut reader, "sample-collection pairs")?;
    let n_sample_type = read_count(&mut reader, "sample-item pairs")?;

    let mut word_counts = Vec::with_capacity(n_samples as usize);
    let mut word_total: u32 = 0;
    for _ in 0..n_samples {
        let v = reader.read_u32::<LittleEndian>()?;
        word_total = word_total
            .checked_add(v)
            .ok_or_else(|| Error::overflow("total word count exceeds the accumulator range"))?;
        word_counts.push(v);
    }

    let mut collections =
        SampleMatrix::new(n_samples as usize, n_collections as usize, true, false, false);
    for _ in 0..n_sample_coll {
        let sample = check_id(reader.read_u32::<LittleEndian>()?, n_samples, "sample")?;
        let coll = check_id(reader.read_u32::<LittleEndian>()?, n_collections, "collection")?;
        if collections.cell(sample, coll) {
            return Err(Error::invalid_data(format!(
                "duplicate membership pair for sample {}, collection {}",
                sample + 1,
                coll + 1
            )));
        }
        collections.set(sample, coll, 1)?;
    }

    let mut types = SampleMatrix::new(
        n_samples as usize,
        n_types as usize,
        options.bits,
        options.zom,
        true,
    );
    for _ in 0..n_sample_type {
        let sample = check_id(reader.read_u32::<LittleEndian>()?, n_samples, "sample")?;
        let item = check_id(reader.read_u32::<LittleEndian>()?, n_types, "item")?;
        let count = reader.read_u32::<LittleEndian>()?;
        if count == 0 {
            return Err(Error::invalid_data(format!(
                "zero count for sample {}, item {}",
                sample + 1,
                item + 1
            )));
        }
        if (types.has_bits() || types.has_zom()) && types.cell(sample, item) {
            return Err(Error::invalid_data(format!(
                "duplicate count entry for sample {}, item {}",
                sample + 1,
                item + 1
            )));
        }
        types.set(sample, item, count)?;
    }

    read_trailer(&mut reader)?;

    let representation = options
        .representation
        .resolve(&types, options.sparsity_heuristic);
    if representation == Representation::Sparse {
        types.build_sparse_index();
    }
    debug!(
        samples = n_samples,
        collections = n_collections,
        items = n_types,
        tokens = types.sum(),
        ?representation,
        "corpus loaded"
    );

    Ok(Corpus {
        word_counts,
        word_total,
        collections,
        types,
        representation,
    })
}

fn read_trailer<R: Read>(reader: &mut R) -> Result<()> {
    let trailer = reader.read_u8()?;
    if trailer != 0 {
        return Err(Error::invalid_data(format!(
            "expected the zero trailer byte, got 0x{trailer:02X}"
        )));
    }
    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        return Err(Error::invalid_data(
            "expected end of input, but there is still some data in the file",
        ));
    }
    Ok(())
}

/// One sample of a corpus under construction.
pub struct SampleSpec {
    /// Word count of the sample.
    pub words: u32,
    /// 1-based ids of the collections the sample belongs to.
    pub collections: Vec<u32>,
    /// `(1-based item id, count > 0)` pairs.
    pub items: Vec<(u32, u32)>,
}

/// Write a corpus file from per-sample specifications.
pub fn write_corpus<W: Write>(
    mut writer: W,
    n_collections: u32,
    n_types: u32,
    samples: &[SampleSpec],
) -> Result<()> {
    let n_sample_coll: usize = samples.iter().map(|s| s.collections.len()).sum();
    let n_sample_type: usize = samples.iter().map(|s| s.items.len()).sum();

    writer.write_u32::<LittleEndian>(CORPUS_MAGIC)?;
    writer.write_u32::<LittleEndian>(samples.len() as u32)?;
    writer.write_u32::<LittleEndian>(n_collections)?;
    writer.write_u32::<LittleEndian>(n_types)?;
    writer.write_u32::<LittleEndian>(n_sample_coll as u32)?;
    writer.write_u32::<LittleEndian>(n_sample_type as u32)?;

    for sample in samples {
        writer.write_u32::<LittleEndian>(sample.words)?;
    }
    for (i, sample) in samples.iter().enumerate() {
        for &coll in &sample.collections {
            writer.write_u32::<LittleEndian>(i as u32 + 1)?;
            writer.write_u32::<LittleEndian>(coll)?;
        }
    }
    for (i, sample) in samples.iter().enumerate() {
        for &(item, count) in &sample.items {
            writer.write_u32::<LittleEndian>(i as u32 + 1)?;
            writer.write_u32::<LittleEndian>(item)?;
            writer.write_u32::<LittleEndian>(count)?;
        }
    }
    writer.write_u8(0)?;
    Ok(())
}
