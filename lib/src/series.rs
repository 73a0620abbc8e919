// Copyright 2023 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! One changelog plus one segment pod bound to a schema.
//!
//! Reading resolves the overlapping revisions into a minimal set of
//! non-overlapping segment slices: revisions are consumed newest first, and
//! each match recursively leaves its left and right gaps to older
//! revisions. An empty `start`/`stop` bound means unbounded on that side.

use std::cmp::Ordering;
use std::sync::Arc;

use itertools::Itertools as _;
use thiserror::Error;
use tracing::instrument;

use crate::changelog::Changelog;
use crate::changelog::ChangelogError;
use crate::changelog::CommitRef;
use crate::changelog::Revision;
use crate::frame::Closed;
use crate::frame::Frame;
use crate::hex_util;
use crate::object_id::BlobId;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::object_id::hashed_path;
use crate::pod::Pod;
use crate::pod::PodError;
use crate::query::Query;
use crate::query::QueryError;
use crate::schema::Schema;
use crate::schema::SchemaError;
use crate::segment;
use crate::segment::Segment;
use crate::segment::SegmentError;
use crate::value::Array;
use crate::value::Value;
use crate::value::cmp_key;
use crate::value::cmp_key_prefix;

/// Row count per rewritten revision when squashing history.
pub const SQUASH_CHUNK_ROWS: usize = 500_000;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error(transparent)]
    Pod(#[from] PodError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
    #[error("cannot write an empty frame without explicit bounds")]
    EmptyFrame,
}

/// The reduced range where a revision overlaps `[start, stop]`, or `None`.
///
/// Bounds are compared on the shorter tuple's length, so a partial user key
/// acts as an open prefix against full-length revision bounds.
pub(crate) fn intersect(
    revision: &Revision,
    start: &[Value],
    stop: &[Value],
) -> Option<(Vec<Value>, Vec<Value>)> {
    let ok_start = stop.is_empty() || cmp_key_prefix(&revision.start, stop) != Ordering::Greater;
    let ok_stop = start.is_empty() || cmp_key_prefix(&revision.stop, start) != Ordering::Less;
    if !(ok_start && ok_stop) {
        return None;
    }
    let mstart = if cmp_key(&revision.start, start) == Ordering::Less {
        start.to_vec()
    } else {
        revision.start.clone()
    };
    let mstop = if stop.is_empty() || cmp_key(&revision.stop, stop) == Ordering::Less {
        revision.stop.clone()
    } else {
        stop.to_vec()
    };
    Some((mstart, mstop))
}

/// Versioned, concurrently writable management of one series.
#[derive(Clone, Debug)]
pub struct Series {
    label: String,
    schema: Schema,
    pod: Arc<dyn Pod>,
    segment_pod: Arc<dyn Pod>,
    changelog: Changelog,
}

impl Series {
    /// Binds a schema to a series pod. The changelog lives under
    /// `changelog/`; segments go to `segment_pod`, which is typically
    /// shared so identical columns dedupe across series.
    pub fn new(
        label: impl Into<String>,
        schema: Schema,
        pod: Arc<dyn Pod>,
        segment_pod: Option<Arc<dyn Pod>>,
    ) -> Self {
        let segment_pod = segment_pod.unwrap_or_else(|| pod.cd("segment"));
        let changelog = Changelog::new(pod.cd("changelog"));
        Self {
            label: label.into(),
            schema,
            pod,
            segment_pod,
            changelog,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    pub(crate) fn segment_pod(&self) -> &Arc<dyn Pod> {
        &self.segment_pod
    }

    /// Appends a sorted batch of rows as one revision.
    pub fn write(&self, frame: &Frame) -> Result<CommitRef, SeriesError> {
        self.write_at(frame, None, None, None)
    }

    /// Builds a frame against this series' schema and writes it.
    pub fn write_columns(&self, named: &[(&str, Array)]) -> Result<CommitRef, SeriesError> {
        let frame = Frame::new(self.schema.clone(), named)?;
        self.write(&frame)
    }

    /// Full write: `start`/`stop` override the revision's logical bounds
    /// (defaulting to the first and last row); `parent` pins the commit
    /// parent, with the zero sentinel starting a new root.
    pub fn write_at(
        &self,
        frame: &Frame,
        start: Option<Vec<Value>>,
        stop: Option<Vec<Value>>,
        parent: Option<&CommitId>,
    ) -> Result<CommitRef, SeriesError> {
        if frame.schema() != &self.schema {
            return Err(SchemaError::SchemaMismatch.into());
        }
        if !frame.is_sorted() {
            return Err(SchemaError::Unsorted.into());
        }
        let frame = frame.collapse_duplicate_index();
        if frame.is_empty() && (start.is_none() || stop.is_none()) {
            return Err(SeriesError::EmptyFrame);
        }
        let digests = segment::save(&self.schema, &frame, &self.segment_pod)?;
        let start = start.unwrap_or_else(|| frame.row(0, true));
        let stop = stop.unwrap_or_else(|| frame.row(frame.len() - 1, true));
        let revision = Revision {
            start,
            stop,
            len: frame.len() as u64,
            digests,
            epoch: hex_util::now_ms(),
        };
        tracing::debug!(label = %self.label, rows = revision.len, "writing revision");
        Ok(self.changelog.commit(&revision, parent)?)
    }

    fn segment(&self, revision: &Revision) -> Segment {
        Segment::shallow(
            self.schema.clone(),
            self.segment_pod.clone(),
            revision.digests.clone(),
            revision.start.clone(),
            revision.stop.clone(),
            revision.len as usize,
        )
    }

    /// Resolves a range query into a sorted list of non-overlapping segment
    /// slices. `after`/`before` filter revisions by epoch (closed on the
    /// left, open on the right).
    pub fn read(
        &self,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
        after: Option<u64>,
        before: Option<u64>,
        closed: Closed,
    ) -> Result<Vec<Segment>, SeriesError> {
        let start = start.unwrap_or(&[]);
        let stop = stop.unwrap_or(&[]);

        let mut revisions = vec![];
        for item in self.changelog.walk()? {
            let (_, revision) = item?;
            if after.is_some_and(|epoch| revision.epoch < epoch) {
                continue;
            }
            if before.is_some_and(|epoch| revision.epoch >= epoch) {
                continue;
            }
            if intersect(&revision, start, stop).is_some() {
                revisions.push(revision);
            }
        }
        // Newest revisions win, so they are consumed first.
        revisions.reverse();

        let mut segments = self.cover(&revisions, start, stop, closed)?;
        segments.sort_by(|a, b| cmp_key(a.start(), b.start()));
        Ok(segments)
    }

    /// The recursive interval cover, unrolled onto an explicit work stack.
    /// Each task finds the first (newest) revision intersecting its range,
    /// emits that slice, and leaves the gaps on both sides to the remaining
    /// (older) revisions.
    fn cover(
        &self,
        revisions: &[Arc<Revision>],
        start: &[Value],
        stop: &[Value],
        closed: Closed,
    ) -> Result<Vec<Segment>, SeriesError> {
        struct Task {
            pos: usize,
            start: Vec<Value>,
            stop: Vec<Value>,
            closed: Closed,
        }

        let mut segments = vec![];
        let mut tasks = vec![Task {
            pos: 0,
            start: start.to_vec(),
            stop: stop.to_vec(),
            closed,
        }];
        while let Some(task) = tasks.pop() {
            for (offset, revision) in revisions[task.pos..].iter().enumerate() {
                let pos = task.pos + offset;
                let Some((mstart, mstop)) = intersect(revision, &task.start, &task.stop) else {
                    continue;
                };
                let grew_left = cmp_key(&mstart, &task.start) == Ordering::Greater;
                let shrank_right =
                    task.stop.is_empty() || cmp_key(&mstop, &task.stop) == Ordering::Less;

                // The emitted slice takes over the boundary wherever a gap
                // is left for older revisions, so that a boundary value is
                // produced exactly once across the combined result.
                let mut clsd = task.closed;
                if task.closed == Closed::Right && grew_left {
                    clsd = Closed::Both;
                } else if task.closed == Closed::None && grew_left {
                    clsd = Closed::Left;
                }
                if clsd == Closed::Left && shrank_right {
                    clsd = Closed::Both;
                } else if clsd == Closed::None && shrank_right {
                    clsd = Closed::Right;
                }

                segments.push(self.segment(revision).slice(&mstart, &mstop, clsd)?);

                // A point query is satisfied by its first (newest) match.
                if !task.start.is_empty() && task.start == task.stop {
                    break;
                }

                if grew_left {
                    let child_closed = match task.closed {
                        Closed::Both => Closed::Left,
                        Closed::Right => Closed::None,
                        other => other,
                    };
                    tasks.push(Task {
                        pos: pos + 1,
                        start: task.start.clone(),
                        stop: mstart.clone(),
                        closed: child_closed,
                    });
                }
                if shrank_right {
                    let child_closed = match task.closed {
                        Closed::Both => Closed::Right,
                        Closed::Left => Closed::None,
                        other => other,
                    };
                    tasks.push(Task {
                        pos: pos + 1,
                        start: mstop.clone(),
                        stop: task.stop.clone(),
                        closed: child_closed,
                    });
                }
                break;
            }
        }
        Ok(segments)
    }

    /// All revisions in causal order.
    pub fn revisions(&self) -> Result<Vec<(CommitRef, Arc<Revision>)>, SeriesError> {
        Ok(self.changelog.walk()?.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every column digest referenced by this series' history.
    pub fn digests(&self) -> Result<Vec<BlobId>, SeriesError> {
        let mut digests = vec![];
        for item in self.changelog.walk()? {
            let (_, revision) = item?;
            digests.extend(revision.digests.iter().cloned());
        }
        Ok(digests.into_iter().unique().collect())
    }

    /// Mirrors the remote changelog, then fetches any referenced column
    /// blob that is not already present locally.
    #[instrument(skip_all, fields(label = %self.label))]
    pub fn pull(&self, remote: &Self) -> Result<(), SeriesError> {
        self.changelog.pull(&remote.changelog)?;
        for item in self.changelog.walk()? {
            let (_, revision) = item?;
            for digest in &revision.digests {
                let path = hashed_path(&digest.hex());
                if self.segment_pod.isfile(&path) {
                    continue;
                }
                let bytes = remote.segment_pod.read(&path)?;
                self.segment_pod.write(&path, &bytes)?;
                tracing::debug!(blob = %digest, "fetched blob");
            }
        }
        Ok(())
    }

    pub fn truncate(&self, keep: &[CommitRef]) -> Result<(), SeriesError> {
        Ok(self.changelog.truncate(keep)?)
    }

    /// Collapses history into ⌈rows / chunk⌉ revisions rooted at the zero
    /// sentinel, then drops every other commit. Reads before and after are
    /// pointwise equal; the content-addressed blob pool dedupes unchanged
    /// columns automatically.
    pub fn squash(&self) -> Result<Vec<CommitRef>, SeriesError> {
        self.squash_with(false)
    }

    /// Like [`Series::squash`]; with `archive`, superseded commit files are
    /// first copied under `archive/` beside the changelog.
    #[instrument(skip_all, fields(label = %self.label))]
    pub fn squash_with(&self, archive: bool) -> Result<Vec<CommitRef>, SeriesError> {
        if archive {
            self.archive_commits()?;
        }
        let segments = self.read(None, None, None, None, Closed::Left)?;
        let mut commits = vec![];
        let mut offset = 0;
        loop {
            let frame =
                Frame::from_segments(&self.schema, &segments, Some(SQUASH_CHUNK_ROWS), offset, None)?;
            if frame.is_empty() {
                break;
            }
            offset += frame.len();
            commits.push(self.write_at(&frame, None, None, Some(&CommitId::root()))?);
        }
        self.changelog.truncate(&commits)?;
        tracing::debug!(revisions = commits.len(), "squashed series");
        Ok(commits)
    }

    fn archive_commits(&self) -> Result<(), SeriesError> {
        let archive_pod = self.pod.cd("archive");
        for entry in self.changelog.entries()? {
            let name = entry.filename();
            let bytes = self.changelog.pod().read(&name)?;
            archive_pod.write(&name, &bytes)?;
        }
        Ok(())
    }

    /// A query builder over this series.
    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    /// The full series contents as one frame.
    pub fn frame(&self) -> Result<Frame, QueryError> {
        self.query().frame()
    }

    /// Total row count of the current view, without materializing columns.
    pub fn count(&self) -> Result<usize, QueryError> {
        self.query().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(start: &[i64], stop: &[i64]) -> Revision {
        Revision {
            start: start.iter().map(|v| Value::I64(*v)).collect(),
            stop: stop.iter().map(|v| Value::I64(*v)).collect(),
            len: 1,
            digests: vec![],
            epoch: 0,
        }
    }

    fn key(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::I64(*v)).collect()
    }

    #[test]
    fn test_intersect_basic() {
        let rev = revision(&[2], &[6]);
        assert_eq!(
            intersect(&rev, &key(&[0]), &key(&[4])),
            Some((key(&[2]), key(&[4])))
        );
        assert_eq!(
            intersect(&rev, &key(&[3]), &key(&[9])),
            Some((key(&[3]), key(&[6])))
        );
        assert_eq!(intersect(&rev, &key(&[7]), &key(&[9])), None);
        assert_eq!(intersect(&rev, &key(&[0]), &key(&[1])), None);
        // Unbounded sides adopt the revision bounds.
        assert_eq!(intersect(&rev, &[], &[]), Some((key(&[2]), key(&[6]))));
        assert_eq!(intersect(&rev, &key(&[4]), &[]), Some((key(&[4]), key(&[6]))));
    }

    #[test]
    fn test_intersect_partial_key() {
        // Full-length revision bounds against a shorter user key: the
        // prefix rule makes [2] act as an open prefix.
        let rev = Revision {
            start: vec![Value::I64(2), Value::Str("a".into())],
            stop: vec![Value::I64(6), Value::Str("z".into())],
            len: 1,
            digests: vec![],
            epoch: 0,
        };
        let hit = intersect(&rev, &key(&[2]), &key(&[2]));
        assert!(hit.is_some());
        let (mstart, mstop) = hit.unwrap();
        // max([2, "a"], [2]) keeps the longer revision bound.
        assert_eq!(mstart, rev.start);
        assert_eq!(mstop, key(&[2]));
        assert_eq!(intersect(&rev, &key(&[7]), &[]), None);
        assert_eq!(intersect(&rev, &[], &key(&[1])), None);
    }
}
