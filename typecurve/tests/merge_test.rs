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

use std::fs;
use std::fs::File;
use std::path::Path;

use typecurve::corpus::{read_corpus, write_corpus, Corpus, ReadOptions, SampleSpec};
use typecurve::driver::{run, RunConfig};
use typecurve::grid::StatKind;
use typecurve::output::{merge_results, read_results, MergedRecord};
use typecurve::stat::StatSelection;
use typecurve::stream::StreamSet;

fn corpus() -> Corpus {
    let samples = [
        SampleSpec {
            words: 6,
            collections: vec![1],
            items: vec![(1, 1), (2, 2), (3, 1)],
        },
        SampleSpec {
            words: 4,
            collections: vec![1, 2],
            items: vec![(2, 1), (4, 1)],
        },
        SampleSpec {
            words: 5,
            collections: vec![2],
            items: vec![(1, 2), (5, 1), (6, 1)],
        },
        SampleSpec {
            words: 3,
            collections: vec![2],
            items: vec![(6, 1), (7, 1)],
        },
    ];
    let mut bytes = Vec::new();
    write_corpus(&mut bytes, 2, 8, &samples).unwrap();
    read_corpus(bytes.as_slice(), &ReadOptions::default()).unwrap()
}

fn config(processes: u32, id: u32) -> RunConfig {
    let mut config = RunConfig::new(20);
    config.processes = processes;
    config.id = id;
    config.workers = 2;
    config.permtest = StatSelection::of(&[StatKind::TypeToken, StatKind::TokenWord]);
    config.curves = StatSelection::of(&[StatKind::TypeToken]);
    config.x_resolution = 100;
    config.y_resolution = 100;
    config
}

fn write_part(dir: &Path, corpus: &Corpus, streams: &StreamSet, processes: u32, id: u32) -> File {
    let out = run(corpus, streams, &config(processes, id), Vec::new()).unwrap();
    let path = dir.join(format!("part-{id}.out"));
    fs::write(&path, out).unwrap();
    File::open(&path).unwrap()
}

fn assert_records_equal(a: &[MergedRecord], b: &[MergedRecord]) {
    assert_eq!(a.len(), b.len());
    for (a, b) in a.iter().zip(b) {
        match (a, b) {
            (MergedRecord::Permtest(a), MergedRecord::Permtest(b)) => {
                assert_eq!(a.kind, b.kind);
                assert_eq!(a.iterations, b.iterations);
                assert_eq!(a.summaries, b.summaries);
                assert_eq!(a.counts, b.counts);
            }
            (MergedRecord::Curves(a), MergedRecord::Curves(b)) => {
                assert_eq!(a.kind, b.kind);
                assert_eq!(a.iterations, b.iterations);
                assert_eq!(a.x_thresholds, b.x_thresholds);
                assert_eq!(a.y_thresholds, b.y_thresholds);
                assert_eq!(a.counts, b.counts);
            }
            _ => panic!("record kinds diverge"),
        }
    }
}

// Splitting the same run over two processes assigns each pseudorandom
// stream, and with it each iteration, to exactly one process, so the
// merged histograms must equal the single-process ones.
#[test]
fn test_two_process_merge_equals_the_single_process_run() {
    let corpus = corpus();
    let streams = StreamSet::generate(21);
    let dir = tempfile::tempdir().unwrap();

    let single = run(&corpus, &streams, &config(1, 1), Vec::new()).unwrap();
    let single = read_results(single.as_slice()).unwrap();

    let first = write_part(dir.path(), &corpus, &streams, 2, 1);
    let second = write_part(dir.path(), &corpus, &streams, 2, 2);
    let merged = merge_results(vec![first, second]).unwrap();

    assert_records_equal(&merged, &single);
}

#[test]
fn test_merge_order_does_not_matter() {
    let corpus = corpus();
    let streams = StreamSet::generate(8);
    let dir = tempfile::tempdir().unwrap();

    let first = write_part(dir.path(), &corpus, &streams, 2, 1);
    let second = write_part(dir.path(), &corpus, &streams, 2, 2);
    let forward = merge_results(vec![first, second]).unwrap();

    let first = write_part(dir.path(), &corpus, &streams, 2, 1);
    let second = write_part(dir.path(), &corpus, &streams, 2, 2);
    let backward = merge_results(vec![second, first]).unwrap();

    assert_records_equal(&forward, &backward);
}

#[test]
fn test_merge_rejects_mismatched_process_counts() {
    let corpus = corpus();
    let streams = StreamSet::generate(3);
    let a = run(&corpus, &streams, &config(2, 1), Vec::new()).unwrap();
    let b = run(&corpus, &streams, &config(3, 2), Vec::new()).unwrap();
    assert!(merge_results(vec![a.as_slice(), b.as_slice()]).is_err());
}

#[test]
fn test_merge_rejects_a_missing_result_file() {
    let corpus = corpus();
    let streams = StreamSet::generate(3);
    let a = run(&corpus, &streams, &config(2, 1), Vec::new()).unwrap();
    let err = merge_results(vec![a.as_slice()]).unwrap_err();
    assert!(err.to_string().contains("1 file"), "{err}");
}

#[test]
fn test_merge_rejects_duplicate_process_ids() {
    let corpus = corpus();
    let streams = StreamSet::generate(3);
    let a = run(&corpus, &streams, &config(2, 1), Vec::new()).unwrap();
    let b = run(&corpus, &streams, &config(2, 1), Vec::new()).unwrap();
    let err = merge_results(vec![a.as_slice(), b.as_slice()]).unwrap_err();
    assert!(err.to_string().contains("process id"), "{err}");
}
