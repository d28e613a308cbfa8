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

//! # Typecurve
//!
//! Typecurve computes confidence envelopes for vocabulary-growth
//! statistics: how the number of distinct items ("types"), once-only
//! items ("hapaxes") and accumulated tokens grows as samples of a
//! corpus are consumed in random order. It provides a permutation
//! test that positions observed collection statistics within the
//! null distribution of random sample orderings, and curve estimation
//! that brackets the growth of each statistic on a resolution-bounded
//! grid.
//!
//! The computation is deterministic and distributable without
//! coordination: a fixed universe of jump-ahead pseudorandom streams
//! is derived from one seed, split over processes and worker threads,
//! and the per-process result files are merged afterwards.
//!
//! The library is divided into modules that constitute distinct
//! groups of functionality; [`driver`] ties them together.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bits;
pub mod bounds;
pub mod codec;
pub mod corpus;
pub mod driver;
pub mod error;
pub mod grid;
pub mod matrix;
pub mod output;
pub mod stat;
pub mod stream;
