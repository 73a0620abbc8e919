// Copyright 2023-2024 The Strata Authors
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

//! Immutable persisted frames: one content-addressed blob per column.
//!
//! A shallow segment knows only its column digests and bounds; columns are
//! fetched and decoded on demand. Slicing avoids materialization whenever
//! the requested range covers or misses the segment entirely.

use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use crate::codec::CodecError;
use crate::frame::Closed;
use crate::frame::Frame;
use crate::object_id::BlobId;
use crate::object_id::ObjectId as _;
use crate::object_id::hashed_path;
use crate::pod::Pod;
use crate::pod::PodError;
use crate::schema::Schema;
use crate::schema::SchemaError;
use crate::value::Array;
use crate::value::Value;
use crate::value::cmp_key_prefix;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(transparent)]
    Pod(#[from] PodError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Clone, Debug)]
pub struct ShallowSegment {
    schema: Schema,
    pod: Arc<dyn Pod>,
    digests: Vec<BlobId>,
    start: Vec<Value>,
    stop: Vec<Value>,
    length: usize,
}

#[derive(Clone, Debug)]
pub struct MaterializedSegment {
    start: Vec<Value>,
    stop: Vec<Value>,
    frame: Frame,
}

#[derive(Clone, Debug)]
pub struct EmptySegment {
    schema: Schema,
    start: Vec<Value>,
    stop: Vec<Value>,
}

/// A slice-able view over persisted columns.
#[derive(Clone, Debug)]
pub enum Segment {
    Shallow(ShallowSegment),
    Materialized(MaterializedSegment),
    Empty(EmptySegment),
}

impl Segment {
    pub fn shallow(
        schema: Schema,
        pod: Arc<dyn Pod>,
        digests: Vec<BlobId>,
        start: Vec<Value>,
        stop: Vec<Value>,
        length: usize,
    ) -> Self {
        Self::Shallow(ShallowSegment {
            schema,
            pod,
            digests,
            start,
            stop,
            length,
        })
    }

    pub fn empty(schema: Schema, start: Vec<Value>, stop: Vec<Value>) -> Self {
        Self::Empty(EmptySegment {
            schema,
            start,
            stop,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Shallow(segment) => segment.length,
            Self::Materialized(segment) => segment.frame.len(),
            Self::Empty(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(&self) -> &[Value] {
        match self {
            Self::Shallow(segment) => &segment.start,
            Self::Materialized(segment) => &segment.start,
            Self::Empty(segment) => &segment.start,
        }
    }

    pub fn stop(&self) -> &[Value] {
        match self {
            Self::Shallow(segment) => &segment.stop,
            Self::Materialized(segment) => &segment.stop,
            Self::Empty(segment) => &segment.stop,
        }
    }

    /// Fetches and decodes one column, truncated to `limit` rows.
    pub fn read(&self, name: &str, limit: Option<usize>) -> Result<Array, SegmentError> {
        let cap = limit.unwrap_or(usize::MAX);
        match self {
            Self::Shallow(segment) => Ok(segment.read(name)?.slice(0..cap)),
            Self::Materialized(segment) => {
                let array = segment
                    .frame
                    .column(name)
                    .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))?;
                Ok(array.slice(0..cap))
            }
            Self::Empty(segment) => {
                let column = segment
                    .schema
                    .get(name)
                    .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))?;
                Ok(Array::empty(column.dtype))
            }
        }
    }

    /// Restricts the segment to `[start, stop]` under the closure flag.
    ///
    /// A range that misses the segment yields an empty segment; a range that
    /// covers it yields the segment itself with no blob fetch; anything else
    /// decodes the columns and slices the resulting frame.
    pub fn slice(
        &self,
        start: &[Value],
        stop: &[Value],
        closed: Closed,
    ) -> Result<Self, SegmentError> {
        match self {
            Self::Empty(segment) => Ok(Self::Empty(EmptySegment {
                schema: segment.schema.clone(),
                start: start.to_vec(),
                stop: stop.to_vec(),
            })),
            Self::Materialized(segment) => Ok(Self::Materialized(MaterializedSegment {
                start: start.to_vec(),
                stop: stop.to_vec(),
                frame: segment.frame.index_slice(start, stop, closed),
            })),
            Self::Shallow(segment) => segment.slice(start, stop, closed),
        }
    }
}

impl ShallowSegment {
    fn read(&self, name: &str) -> Result<Array, SegmentError> {
        let pos = self
            .schema
            .position(name)
            .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))?;
        let column = &self.schema.columns()[pos];
        let path = hashed_path(&self.digests[pos].hex());
        let bytes = self.pod.read(&path)?;
        Ok(column.decode(&bytes)?)
    }

    fn slice(&self, start: &[Value], stop: &[Value], closed: Closed) -> Result<Segment, SegmentError> {
        use std::cmp::Ordering;

        // Bounds of different lengths compare on their common prefix: a
        // partial user key acts as an open prefix against the segment's
        // full-length bounds.
        let disjoint = cmp_key_prefix(start, &self.stop) == Ordering::Greater
            || cmp_key_prefix(stop, &self.start) == Ordering::Less
            || (cmp_key_prefix(start, &self.stop) == Ordering::Equal && !closed.includes_start())
            || (cmp_key_prefix(stop, &self.start) == Ordering::Equal && !closed.includes_stop());
        if disjoint {
            return Ok(Segment::empty(
                self.schema.clone(),
                start.to_vec(),
                stop.to_vec(),
            ));
        }

        let covers_start = if closed.includes_start() {
            cmp_key_prefix(start, &self.start) != Ordering::Greater
        } else {
            cmp_key_prefix(start, &self.start) == Ordering::Less
        };
        let covers_stop = if closed.includes_stop() {
            cmp_key_prefix(stop, &self.stop) != Ordering::Less
        } else {
            cmp_key_prefix(stop, &self.stop) == Ordering::Greater
        };
        if covers_start && covers_stop {
            return Ok(Segment::Shallow(self.clone()));
        }

        // Materialize all columns and slice by key.
        let columns = self
            .schema
            .columns()
            .iter()
            .map(|column| self.read(&column.name))
            .collect::<Result<Vec<_>, _>>()?;
        let frame = Frame::with_columns(self.schema.clone(), columns);
        Ok(Segment::Materialized(MaterializedSegment {
            start: start.to_vec(),
            stop: stop.to_vec(),
            frame: frame.index_slice(start, stop, closed),
        }))
    }
}

/// Persists each column of `frame`: encode, hash, then a content-addressed
/// create-if-absent write. Identical column bytes land on the same path, so
/// duplicate data across writes is stored once.
pub fn save(schema: &Schema, frame: &Frame, pod: &Arc<dyn Pod>) -> Result<Vec<BlobId>, SegmentError> {
    let encoded: Vec<(BlobId, Vec<u8>)> = (0..schema.len())
        .into_par_iter()
        .map(|pos| {
            let column = &schema.columns()[pos];
            let bytes = column.encode(&frame.columns()[pos])?;
            Ok((BlobId::hash(&bytes), bytes))
        })
        .collect::<Result<_, CodecError>>()?;
    let mut digests = vec![];
    for (digest, bytes) in encoded {
        let path = hashed_path(&digest.hex());
        pod.write(&path, &bytes)?;
        tracing::trace!(blob = %digest, "saved column blob");
        digests.push(digest);
    }
    Ok(digests)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory_pod::MemoryPod;
    use crate::value::DataType;

    fn setup() -> (Arc<dyn Pod>, Schema, Segment) {
        let pod: Arc<dyn Pod> = Arc::new(MemoryPod::new());
        let schema = Schema::parse("ts i64* | value f8").unwrap();
        let frame = Frame::new(
            schema.clone(),
            &[
                ("ts", Array::from(vec![2i64, 4, 6])),
                ("value", Array::from(vec![20.0, 40.0, 60.0])),
            ],
        )
        .unwrap();
        let digests = save(&schema, &frame, &pod).unwrap();
        let segment = Segment::shallow(
            schema.clone(),
            pod.clone(),
            digests,
            vec![Value::I64(2)],
            vec![Value::I64(6)],
            3,
        );
        (pod, schema, segment)
    }

    fn key(v: i64) -> Vec<Value> {
        vec![Value::I64(v)]
    }

    #[test]
    fn test_read_round_trip() {
        let (_pod, _schema, segment) = setup();
        assert_eq!(segment.read("ts", None).unwrap(), Array::from(vec![2i64, 4, 6]));
        assert_eq!(segment.read("ts", Some(2)).unwrap(), Array::from(vec![2i64, 4]));
        assert_matches!(
            segment.read("bogus", None),
            Err(SegmentError::Schema(SchemaError::UnknownColumn(_)))
        );
    }

    #[test]
    fn test_content_addressing_dedups() {
        let (pod, schema, _segment) = setup();
        let blobs = pod.walk(".", None).unwrap().len();
        // Re-saving identical data adds nothing.
        let frame = Frame::new(
            schema.clone(),
            &[
                ("ts", Array::from(vec![2i64, 4, 6])),
                ("value", Array::from(vec![20.0, 40.0, 60.0])),
            ],
        )
        .unwrap();
        save(&schema, &frame, &pod).unwrap();
        assert_eq!(pod.walk(".", None).unwrap().len(), blobs);
    }

    #[test]
    fn test_slice_disjoint() {
        let (_pod, _schema, segment) = setup();
        assert_matches!(
            segment.slice(&key(7), &key(9), Closed::Both).unwrap(),
            Segment::Empty(_)
        );
        assert_matches!(
            segment.slice(&key(0), &key(1), Closed::Both).unwrap(),
            Segment::Empty(_)
        );
        // Touching an edge counts only when the closure includes it.
        assert_matches!(
            segment.slice(&key(6), &key(9), Closed::Right).unwrap(),
            Segment::Empty(_)
        );
        assert_matches!(
            segment.slice(&key(0), &key(2), Closed::Left).unwrap(),
            Segment::Empty(_)
        );
    }

    #[test]
    fn test_slice_covering_returns_self() {
        let (_pod, _schema, segment) = setup();
        let sliced = segment.slice(&key(0), &key(9), Closed::Left).unwrap();
        assert_matches!(sliced, Segment::Shallow(_));
        assert_eq!(sliced.len(), 3);
        // Exactly matching bounds with closed ends also avoids the fetch.
        assert_matches!(
            segment.slice(&key(2), &key(6), Closed::Both).unwrap(),
            Segment::Shallow(_)
        );
    }

    #[test]
    fn test_slice_materializes() {
        let (_pod, _schema, segment) = setup();
        let sliced = segment.slice(&key(2), &key(6), Closed::Left).unwrap();
        assert_matches!(sliced, Segment::Materialized(_));
        assert_eq!(sliced.read("ts", None).unwrap(), Array::from(vec![2i64, 4]));

        let sliced = segment.slice(&key(4), &key(6), Closed::Both).unwrap();
        assert_eq!(sliced.read("ts", None).unwrap(), Array::from(vec![4i64, 6]));
        assert_eq!(
            sliced.read("value", None).unwrap(),
            Array::from(vec![40.0, 60.0])
        );
    }

    #[test]
    fn test_empty_segment_reads() {
        let (_pod, schema, _segment) = setup();
        let empty = Segment::empty(schema, key(0), key(1));
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.read("ts", None).unwrap(), Array::empty(DataType::I64));
        assert_eq!(empty.read("value", None).unwrap(), Array::empty(DataType::F64));
    }
}
