// Copyright 2024 The Strata Authors
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

//! Range/projection/pagination builder over a series.

use thiserror::Error;

use crate::frame::Closed;
use crate::frame::Frame;
use crate::schema::Schema;
use crate::segment::Segment;
use crate::segment::SegmentError;
use crate::series::Series;
use crate::series::SeriesError;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error("pagination step must be > 0")]
    InvalidStep,
}

/// Accumulates query parameters; every setter returns a new query, so a
/// partially configured query can be kept and refined.
#[derive(Clone, Debug)]
pub struct Query<'a> {
    series: &'a Series,
    start: Option<Vec<Value>>,
    stop: Option<Vec<Value>>,
    after: Option<u64>,
    before: Option<u64>,
    closed: Closed,
    limit: Option<usize>,
    offset: usize,
    select: Option<Vec<String>>,
}

impl<'a> Query<'a> {
    pub fn new(series: &'a Series) -> Self {
        Self {
            series,
            start: None,
            stop: None,
            after: None,
            before: None,
            closed: Closed::Left,
            limit: None,
            offset: 0,
            select: None,
        }
    }

    pub fn start(mut self, key: Vec<Value>) -> Self {
        self.start = Some(key);
        self
    }

    pub fn stop(mut self, key: Vec<Value>) -> Self {
        self.stop = Some(key);
        self
    }

    /// Keep only revisions committed at or after `epoch` (milliseconds).
    pub fn after(mut self, epoch: u64) -> Self {
        self.after = Some(epoch);
        self
    }

    /// Keep only revisions committed strictly before `epoch`.
    pub fn before(mut self, epoch: u64) -> Self {
        self.before = Some(epoch);
        self
    }

    pub fn closed(mut self, closed: Closed) -> Self {
        self.closed = closed;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn select<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// The resolved segment slices.
    pub fn segments(&self) -> Result<Vec<Segment>, QueryError> {
        Ok(self.series.read(
            self.start.as_deref(),
            self.stop.as_deref(),
            self.after,
            self.before,
            self.closed,
        )?)
    }

    /// Total row count of the resolved slices; no column is materialized.
    pub fn count(&self) -> Result<usize, QueryError> {
        Ok(self.segments()?.iter().map(Segment::len).sum())
    }

    fn select_refs(&self) -> Option<Vec<&str>> {
        self.select
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect())
    }

    /// Concatenates the resolved slices into one frame, honoring
    /// `limit`/`offset`/`select`.
    pub fn frame(&self) -> Result<Frame, QueryError> {
        let segments = self.segments()?;
        let select = self.select_refs();
        Ok(Frame::from_segments(
            self.series.schema(),
            &segments,
            self.limit,
            self.offset,
            select.as_deref(),
        )?)
    }

    /// Iterates the result as frames of at most `step` rows.
    pub fn paginate(&self, step: usize) -> Result<Paginate, QueryError> {
        if step == 0 {
            return Err(QueryError::InvalidStep);
        }
        Ok(Paginate {
            schema: self.series.schema().clone(),
            segments: self.segments()?,
            select: self.select.clone(),
            step,
            pos: self.offset,
            remaining: self.limit,
            done: false,
        })
    }
}

#[derive(Debug)]
pub struct Paginate {
    schema: Schema,
    segments: Vec<Segment>,
    select: Option<Vec<String>>,
    step: usize,
    pos: usize,
    remaining: Option<usize>,
    done: bool,
}

impl Iterator for Paginate {
    type Item = Result<Frame, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let limit = match self.remaining {
            Some(0) => return None,
            Some(remaining) => self.step.min(remaining),
            None => self.step,
        };
        let select: Option<Vec<&str>> = self
            .select
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect());
        match Frame::from_segments(&self.schema, &self.segments, Some(limit), self.pos, select.as_deref())
        {
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
            Ok(frame) if frame.is_empty() => None,
            Ok(frame) => {
                if let Some(remaining) = self.remaining {
                    self.remaining = Some(remaining - frame.len());
                }
                self.pos += self.step;
                Some(Ok(frame))
            }
        }
    }
}
