//! Combining per-dump results into a single dataset.
//!
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use ndarray::{ArrayD, Axis, IxDyn};
use serde::Serialize;

use super::ResultMap;
use crate::errors::{Error, Result};

/// How results for one key are combined across dumps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// One scalar per dump, `[n_files]`
    TimeSeries,

    /// One array per dump, `[n_files, ...]`
    Stacked,

    /// Sum over dumps, shaped like the per-dump value
    Accumulated,
}

impl EntryKind {
    /// Infer the kind of a key from its name.
    ///
    /// `coord/t` and anything in the `t` namespace is a time series. Anything else in a namespace
    /// ending in `t` (`rt`, `tht`, ...) is stacked. Everything else is accumulated.
    ///
    pub fn infer(key: &str) -> Self {
        let tag = key.split('/').next().unwrap_or(key);
        if tag == "t" || key == "coord/t" {
            EntryKind::TimeSeries
        } else if tag.ends_with('t') {
            EntryKind::Stacked
        } else {
            EntryKind::Accumulated
        }
    }

    /// Storage for a key of this kind, given the first value seen for it
    fn allocate(&self, value: &ArrayD<f64>, total_files: usize) -> ArrayD<f64> {
        match self {
            EntryKind::TimeSeries => ArrayD::zeros(IxDyn(&[total_files])),
            EntryKind::Stacked => {
                let mut shape = vec![total_files];
                shape.extend_from_slice(value.shape());
                ArrayD::zeros(shape)
            }
            EntryKind::Accumulated => ArrayD::zeros(value.raw_dim()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    kind: EntryKind,
    data: ArrayD<f64>,
}

impl Entry {
    /// Fold one dump's value into this entry.
    fn merge(&mut self, key: &str, value: &ArrayD<f64>, file_index: usize) -> Result<()> {
        match self.kind {
            EntryKind::TimeSeries | EntryKind::Stacked => {
                let len = self.data.len_of(Axis(0));
                if file_index >= len {
                    return Err(Error::IndexOutOfRange {
                        key: key.to_string(),
                        index: file_index,
                        len,
                    });
                }
                let mut slot = self.data.index_axis_mut(Axis(0), file_index);
                if self.kind == EntryKind::TimeSeries {
                    if value.len() != 1 {
                        return Err(Error::shape_mismatch(key, &[], value.shape()));
                    }
                    slot.fill(value.sum());
                } else {
                    if slot.shape() != value.shape() {
                        return Err(Error::shape_mismatch(key, slot.shape(), value.shape()));
                    }
                    slot.assign(value);
                }
            }
            EntryKind::Accumulated => {
                if self.data.shape() != value.shape() {
                    return Err(Error::shape_mismatch(key, self.data.shape(), value.shape()));
                }
                self.data += value;
            }
        }

        Ok(())
    }
}

/// A key that couldn't be merged for one dump
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeFailure {
    pub key: String,
    pub file_index: usize,
    pub message: String,
}

/// Results combined over a batch of dumps.
///
/// How each key is combined is decided the first time it's seen, from its name or an explicit
/// override. Time series and stacked keys record each dump's value in the dump's slot. Everything
/// else is summed: dividing by the number of dumps, or anything else, is up to the caller (see
/// `normalize`).
///
/// Merging must be done from a single thread.
///
#[derive(Clone, Debug, Default)]
pub struct Aggregate {
    entries: BTreeMap<String, Entry>,
    overrides: HashMap<String, EntryKind>,
    skipped: Vec<usize>,
    failures: Vec<MergeFailure>,
    merged: usize,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine `key` as `kind` regardless of its name. Only takes effect for keys not yet seen.
    pub fn with_override(mut self, key: &str, kind: EntryKind) -> Self {
        self.overrides.insert(key.to_string(), kind);
        self
    }

    /// The kind a key has, or would have if it were seen now
    pub fn kind_for(&self, key: &str) -> EntryKind {
        match self.entries.get(key) {
            Some(entry) => entry.kind,
            None => self
                .overrides
                .get(key)
                .copied()
                .unwrap_or_else(|| EntryKind::infer(key)),
        }
    }

    /// Fold the results for dump number `file_index` of `total_files` into the aggregate.
    ///
    /// `None` marks a dump that couldn't be analysed. It's recorded and otherwise ignored. A key
    /// that can't be merged is recorded as a failure and the rest of the dump's keys are merged
    /// anyway.
    ///
    pub fn merge(&mut self, per_file: Option<ResultMap>, file_index: usize, total_files: usize) {
        let per_file = match per_file {
            Some(per_file) => per_file,
            None => {
                tracing::warn!(file_index, "failed to read dump, skipping");
                self.skipped.push(file_index);
                return;
            }
        };

        for (key, value) in per_file {
            let kind = self.kind_for(&key);
            let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
                kind,
                data: kind.allocate(&value, total_files),
            });
            if let Err(err) = entry.merge(&key, &value, file_index) {
                tracing::warn!(key = %key, file_index, error = %err, "error updating result");
                self.failures.push(MergeFailure {
                    key,
                    file_index,
                    message: err.to_string(),
                });
            }
        }
        self.merged += 1;
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f64>> {
        self.entries.get(key).map(|entry| &entry.data)
    }

    pub fn kind(&self, key: &str) -> Option<EntryKind> {
        self.entries.get(key).map(|entry| entry.kind)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Indices of dumps that couldn't be analysed
    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }

    pub fn failures(&self) -> &[MergeFailure] {
        &self.failures
    }

    /// Number of dumps merged, not counting skipped ones
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Divide every accumulated entry by `count`.
    pub fn normalize(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::bad_param("count", "can't normalize by zero"));
        }
        let count = count as f64;
        for entry in self.entries.values_mut() {
            if entry.kind == EntryKind::Accumulated {
                entry.data /= count;
            }
        }

        Ok(())
    }

    /// Save the aggregate as JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut file, &self.to_record())?;
        file.flush()?;
        tracing::debug!(path = %path.display(), keys = self.entries.len(), "wrote aggregate");

        Ok(())
    }

    fn to_record(&self) -> AggregateRecord<'_> {
        let entries = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let record = EntryRecord {
                    kind: entry.kind,
                    shape: entry.data.shape(),
                    data: entry.data.iter().copied().collect(),
                };
                (key.as_str(), record)
            })
            .collect();

        AggregateRecord {
            entries,
            skipped: &self.skipped,
            failures: &self.failures,
        }
    }
}

#[derive(Serialize)]
struct EntryRecord<'a> {
    kind: EntryKind,
    shape: &'a [usize],
    data: Vec<f64>,
}

#[derive(Serialize)]
struct AggregateRecord<'a> {
    entries: BTreeMap<&'a str, EntryRecord<'a>>,
    skipped: &'a [usize],
    failures: &'a [MergeFailure],
}
