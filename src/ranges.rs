//! Coalescing of scattered byte-range reads
//!
//! A batch of `(path, start, end)` requests is partitioned by path (stable,
//! first-seen order), each path gets exactly one multi-range backend call,
//! the calls run concurrently, and the returned buffers are scattered back
//! into the caller's order. Ranges are never merged: overlapping, adjoining
//! and duplicate ranges are each fetched and returned on their own.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;

use bytes::Bytes;
use objfs_store::StoreError;

use crate::error::{FsError, Result};

/// Start or end offsets: one value for every request, or one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offsets {
    All(u64),
    Each(Vec<u64>),
}

impl Offsets {
    fn broadcast(self, len: usize) -> Vec<u64> {
        match self {
            Offsets::All(value) => vec![value; len],
            Offsets::Each(values) => values,
        }
    }
}

impl From<u64> for Offsets {
    fn from(value: u64) -> Self {
        Offsets::All(value)
    }
}

impl From<Vec<u64>> for Offsets {
    fn from(values: Vec<u64>) -> Self {
        Offsets::Each(values)
    }
}

/// All requests that target one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeGroup {
    pub path: String,
    /// Ranges in the order they will be sent to the backend.
    pub ranges: Vec<Range<u64>>,
    /// Position in the caller's request list of each entry in `ranges`.
    pub indices: Vec<usize>,
}

/// Requests partitioned by path, ready to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePlan {
    groups: Vec<RangeGroup>,
    len: usize,
}

impl RangePlan {
    /// Validate and partition a batch.
    ///
    /// Fails with `InvalidArgument` when the lengths of `paths`, `starts` and
    /// `ends` disagree after broadcasting scalars.
    pub fn new<P: AsRef<str>>(
        paths: &[P],
        starts: impl Into<Offsets>,
        ends: impl Into<Offsets>,
    ) -> Result<Self> {
        let len = paths.len();
        let starts = starts.into().broadcast(len);
        let ends = ends.into().broadcast(len);
        if starts.len() != len || ends.len() != len {
            return Err(FsError::InvalidArgument(format!(
                "paths, starts and ends must have equal length (got {}, {}, {})",
                len,
                starts.len(),
                ends.len()
            )));
        }

        let mut groups: Vec<RangeGroup> = Vec::new();
        let mut by_path: HashMap<&str, usize> = HashMap::new();
        for (index, ((path, start), end)) in paths.iter().zip(starts).zip(ends).enumerate() {
            let path = path.as_ref();
            let slot = *by_path.entry(path).or_insert_with(|| {
                groups.push(RangeGroup {
                    path: path.to_string(),
                    ranges: Vec::new(),
                    indices: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].ranges.push(start..end);
            groups[slot].indices.push(index);
        }

        Ok(Self { groups, len })
    }

    pub fn groups(&self) -> &[RangeGroup] {
        &self.groups
    }

    /// Number of individual requests.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Run one `fetch` per group concurrently and reassemble the results.
    ///
    /// `fetch` receives a group and must return one buffer per range, in the
    /// group's range order. The first failure cancels the outstanding calls
    /// and no partial output is produced.
    pub async fn execute<F, Fut>(self, fetch: F) -> Result<Vec<Bytes>>
    where
        F: FnMut(RangeGroup) -> Fut,
        Fut: Future<Output = Result<Vec<Bytes>>>,
    {
        if self.groups.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            "Coalesced {} ranges into {} backend calls",
            self.len,
            self.groups.len()
        );

        let indices: Vec<Vec<usize>> = self.groups.iter().map(|g| g.indices.clone()).collect();
        let results = futures::future::try_join_all(self.groups.into_iter().map(fetch)).await?;

        let mut output = vec![Bytes::new(); self.len];
        for (indices, buffers) in indices.into_iter().zip(results) {
            if buffers.len() != indices.len() {
                return Err(StoreError::generic(
                    "RangeCoalescer",
                    std::io::Error::other(format!(
                        "backend returned {} buffers for {} ranges",
                        buffers.len(),
                        indices.len()
                    )),
                )
                .into());
            }
            for (index, buffer) in indices.into_iter().zip(buffers) {
                output[index] = buffer;
            }
        }
        Ok(output)
    }
}
