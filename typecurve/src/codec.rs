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

//! Run-length-compressed variable-width encoding for bound
//! sequences.
//!
//! Each encoded record is a stream of tagged items followed by a
//! single [`STAT_END`] byte:
//!
//! * `0x00`: end of record.
//! * `0x01..=0xEB`: a run of that many `(0, 0)` bounds.
//! * `0xEC`: one payload byte `aaaabbbb` holding `(a, b)`.
//! * `0xED`: two payload bytes, lower then upper.
//! * `0xEE`: two little-endian `u16`s, lower then upper.
//! * `0xEF`: two little-endian `u32`s, lower then upper.
//! * `0xF0..=0xFF`: `1111aabb` holding `(a, b)` inline.
//!
//! The width class is chosen by the larger of the two values, so
//! decoding is unambiguous and the round trip is exact.

use std::io::Read;
use std::io::Write;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::Error;
use crate::error::Result;
use crate::stat::Bound;

/// End-of-record sentinel.
pub const STAT_END: u8 = 0x00;

/// Longest zero-pair run a single run byte can express.
pub const ZERO_RUN_MAX: u8 = 0xEB;

const STAT_4: u8 = 0xEC;
const STAT_8: u8 = 0xED;
const STAT_16: u8 = 0xEE;
const STAT_32: u8 = 0xEF;
const STAT_2_MASK: u8 = 0xF0;

/// Encode a bound sequence, including the trailing [`STAT_END`].
pub fn encode_bounds<W: Write>(writer: &mut W, bounds: &[Bound]) -> Result<()> {
    let mut zero_run: u8 = 0;
    for &bound in bounds {
        let max = bound.lower.max(bound.upper);
        if max == 0 {
            zero_run += 1;
            if zero_run == ZERO_RUN_MAX {
                writer.write_u8(zero_run)?;
                zero_run = 0;
            }
            continue;
        }
        if zero_run > 0 {
            writer.write_u8(zero_run)?;
            zero_run = 0;
        }
        if max < 1 << 2 {
            writer.write_u8(((bound.lower << 2) | bound.upper) as u8 | STAT_2_MASK)?;
        } else if max < 1 << 4 {
            writer.write_u8(STAT_4)?;
            writer.write_u8(((bound.lower << 4) | bound.upper) as u8)?;
        } else if max < 1 << 8 {
            writer.write_u8(STAT_8)?;
            writer.write_u8(bound.lower as u8)?;
            writer.write_u8(bound.upper as u8)?;
        } else if max < 1 << 16 {
            writer.write_u8(STAT_16)?;
            writer.write_u16::<LittleEndian>(bound.lower as u16)?;
            writer.write_u16::<LittleEndian>(bound.upper as u16)?;
        } else {
            writer.write_u8(STAT_32)?;
            writer.write_u32::<LittleEndian>(bound.lower)?;
            writer.write_u32::<LittleEndian>(bound.upper)?;
        }
    }
    if zero_run > 0 {
        writer.write_u8(zero_run)?;
    }
    writer.write_u8(STAT_END)?;
    Ok(())
}

/// Incremental decoder for one encoded record.
///
/// Pulls one bound at a time so that several records from different
/// files can be decoded in lockstep and summed without materializing
/// each of them. Call [`Decoder::finish`] after the expected number of
/// bounds to consume the sentinel and reject overlong records.
pub struct Decoder<R> {
    reader: R,
    zero_run: u8,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, zero_run: 0 }
    }

    /// Decode the next bound of the record.
    pub fn next_bound(&mut self) -> Result<Bound> {
        if self.zero_run > 0 {
            self.zero_run -= 1;
            return Ok(Bound::ZERO);
        }
        let tag = self.reader.read_u8()?;
        match tag {
            STAT_END => Err(Error::invalid_data(
                "unexpected end-of-record indicator",
            )),
            1..=ZERO_RUN_MAX => {
                self.zero_run = tag - 1;
                Ok(Bound::ZERO)
            }
            STAT_4 => {
                let packed = self.reader.read_u8()?;
                Ok(Bound::new((packed >> 4) as u32, (packed & 0x0F) as u32))
            }
            STAT_8 => {
                let lower = self.reader.read_u8()? as u32;
                let upper = self.reader.read_u8()? as u32;
                Ok(Bound::new(lower, upper))
            }
            STAT_16 => {
                let lower = self.reader.read_u16::<LittleEndian>()? as u32;
                let upper = self.reader.read_u16::<LittleEndian>()? as u32;
                Ok(Bound::new(lower, upper))
            }
            STAT_32 => {
                let lower = self.reader.read_u32::<LittleEndian>()?;
                let upper = self.reader.read_u32::<LittleEndian>()?;
                Ok(Bound::new(lower, upper))
            }
            tag if tag >= STAT_2_MASK => {
                Ok(Bound::new(((tag >> 2) & 0x03) as u32, (tag & 0x03) as u32))
            }
            _ => Err(Error::invalid_data(format!(
                "invalid record byte 0x{tag:02X}"
            ))),
        }
    }

    /// Consume the [`STAT_END`] sentinel, rejecting records that hold
    /// more data than expected.
    pub fn finish(mut self) -> Result<R> {
        if self.zero_run > 0 {
            return Err(Error::invalid_data("too much data in the record"));
        }
        let tag = self.reader.read_u8()?;
        if tag != STAT_END {
            return Err(Error::invalid_data("too much data in the record"));
        }
        Ok(self.reader)
    }
}

/// Decode a full record of `count` bounds, sentinel included.
pub fn decode_bounds<R: Read>(reader: R, count: usize) -> Result<Vec<Bound>> {
    let mut decoder = Decoder::new(reader);
    let mut bounds = Vec::with_capacity(count);
    for _ in 0..count {
        bounds.push(decoder.next_bound()?);
    }
    decoder.finish()?;
    Ok(bounds)
}
