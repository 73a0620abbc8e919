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

//! In-memory columnar container with index-keyed slicing.

use crate::expr;
use crate::expr::ExprError;
use crate::schema::Schema;
use crate::schema::SchemaError;
use crate::segment::Segment;
use crate::segment::SegmentError;
use crate::value::Array;
use crate::value::Value;
use crate::value::cmp_key;

/// Interval closure flag over an index range query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Closed {
    #[default]
    Left,
    Right,
    Both,
    None,
}

impl Closed {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "both" => Some(Self::Both),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn includes_start(self) -> bool {
        matches!(self, Self::Left | Self::Both)
    }

    pub fn includes_stop(self) -> bool {
        matches!(self, Self::Right | Self::Both)
    }
}

/// Mapping of column name to dense typed array, all of equal length, with
/// rows sorted ascending by the index tuple.
///
/// Columns are stored in schema order. Construction casts input arrays to
/// the schema dtypes; sortedness is asserted by the write path rather than
/// here, so a frame sliced out of storage never re-checks it.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    schema: Schema,
    columns: Vec<Array>,
}

impl Frame {
    /// Builds a frame from named columns, casting each to the schema dtype.
    /// Every schema column must be present, and nothing else.
    pub fn new(schema: Schema, named: &[(&str, Array)]) -> Result<Self, SchemaError> {
        for (name, _) in named {
            if schema.get(name).is_none() {
                return Err(SchemaError::UnknownColumn((*name).to_string()));
            }
        }
        let mut columns = vec![];
        for column in schema.columns() {
            let array = named
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, array)| array)
                .ok_or_else(|| SchemaError::MissingColumn(column.name.clone()))?;
            columns.push(column.cast(array)?);
        }
        let frame = Self { schema, columns };
        frame.check_lengths()?;
        Ok(frame)
    }

    /// An empty frame of the given schema.
    pub fn empty(schema: Schema) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|c| Array::empty(c.dtype))
            .collect();
        Self { schema, columns }
    }

    /// Internal constructor for pre-validated columns in schema order.
    pub(crate) fn with_columns(schema: Schema, columns: Vec<Array>) -> Self {
        Self { schema, columns }
    }

    fn check_lengths(&self) -> Result<(), SchemaError> {
        let expected = self.len();
        for (column, array) in std::iter::zip(self.schema.columns(), &self.columns) {
            if array.len() != expected {
                return Err(SchemaError::LengthMismatch {
                    column: column.name.clone(),
                    expected,
                    found: array.len(),
                });
            }
        }
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Array::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Array> {
        let pos = self.schema.position(name)?;
        Some(&self.columns[pos])
    }

    pub(crate) fn columns(&self) -> &[Array] {
        &self.columns
    }

    /// The row at `pos` as a value tuple; only the index columns when
    /// `index_only`.
    pub fn row(&self, pos: usize, index_only: bool) -> Vec<Value> {
        let count = if index_only {
            self.schema.index_len()
        } else {
            self.columns.len()
        };
        self.columns[..count].iter().map(|c| c.get(pos)).collect()
    }

    /// Iterates over full row tuples.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.len()).map(|pos| self.row(pos, false))
    }

    /// The row whose index tuple equals `key`, as `(name, value)` pairs in
    /// schema order.
    pub fn row_dict(&self, key: &[Value]) -> Option<Vec<(String, Value)>> {
        if key.len() > self.schema.index_len() {
            return None;
        }
        let pos = self.index(key, false)?;
        if pos >= self.len() || self.row(pos, true)[..key.len()] != *key {
            return None;
        }
        Some(
            std::iter::zip(self.schema.names(), self.row(pos, false))
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    /// Binary-searches the first (or with `right`, one-past-last) row whose
    /// index tuple is >= `key` (resp. > `key`), refining a `lo..hi` window
    /// across each index column in order. An empty key is undefined.
    pub fn index(&self, key: &[Value], right: bool) -> Option<usize> {
        if key.is_empty() {
            return None;
        }
        let index_len = self.schema.index_len();
        let mut lo = 0;
        let mut hi = self.len();
        for (array, value) in std::iter::zip(&self.columns[..index_len], key) {
            lo = array.bisect_left(value, lo, hi);
            hi = array.bisect_right(value, lo, hi);
        }
        Some(if right { hi } else { lo })
    }

    /// View over the positional half-open range `start..stop`.
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        let columns = self.columns.iter().map(|c| c.slice(start..stop)).collect();
        Self {
            schema: self.schema.clone(),
            columns,
        }
    }

    /// Slice between two index keys. A lone `start` with an empty `stop` is
    /// a point query and forces `closed = both`.
    pub fn index_slice(&self, start: &[Value], stop: &[Value], closed: Closed) -> Self {
        let (stop, closed) = if !start.is_empty() && stop.is_empty() {
            (start, Closed::Both)
        } else {
            (stop, closed)
        };
        let idx_start = if start.is_empty() {
            0
        } else {
            self.index(start, !closed.includes_start()).unwrap()
        };
        let idx_stop = if stop.is_empty() {
            self.len()
        } else {
            self.index(stop, closed.includes_stop()).unwrap()
        };
        self.slice(idx_start, idx_stop.max(idx_start))
    }

    /// Whether rows are sorted ascending by the index tuple.
    pub fn is_sorted(&self) -> bool {
        let index_len = self.schema.index_len();
        (1..self.len()).all(|pos| {
            let prev: Vec<Value> = self.columns[..index_len].iter().map(|c| c.get(pos - 1)).collect();
            let cur: Vec<Value> = self.columns[..index_len].iter().map(|c| c.get(pos)).collect();
            cmp_key(&prev, &cur) != std::cmp::Ordering::Greater
        })
    }

    /// Collapses runs of equal index tuples, keeping the last row of each
    /// run. Assumes the frame is sorted.
    pub(crate) fn collapse_duplicate_index(&self) -> Self {
        let n = self.len();
        let keep: Vec<usize> = (0..n)
            .filter(|pos| {
                *pos + 1 == n || self.row(*pos, true) != self.row(*pos + 1, true)
            })
            .collect();
        if keep.len() == n {
            return self.clone();
        }
        let columns = self.columns.iter().map(|c| c.take(&keep)).collect();
        Self {
            schema: self.schema.clone(),
            columns,
        }
    }

    /// Element-wise arithmetic over columns; see the expression grammar.
    pub fn eval(&self, text: &str) -> Result<Array, ExprError> {
        expr::evaluate(self, text)
    }

    /// Concatenates segment slices into one frame, applying `offset` and
    /// `limit` positionally across segments and projecting `select` columns.
    pub fn from_segments(
        schema: &Schema,
        segments: &[Segment],
        limit: Option<usize>,
        offset: usize,
        select: Option<&[&str]>,
    ) -> Result<Self, SegmentError> {
        let out_schema = match select {
            Some(names) => schema.project(names)?,
            None => schema.clone(),
        };
        // Positional windows per segment, consuming offset then limit.
        let mut windows = vec![];
        let mut skip = offset;
        let mut remaining = limit;
        for segment in segments {
            let length = segment.len();
            if skip >= length {
                skip -= length;
                continue;
            }
            let take = match remaining {
                Some(0) => break,
                Some(lim) => (length - skip).min(lim),
                None => length - skip,
            };
            windows.push((segment, skip, skip + take));
            if let Some(lim) = remaining {
                remaining = Some(lim - take);
            }
            skip = 0;
        }
        let mut columns = vec![];
        for column in out_schema.columns() {
            let mut out = Array::empty(column.dtype);
            for (segment, start, stop) in &windows {
                let array = segment.read(&column.name, Some(*stop))?;
                out.extend(&array.slice(*start..*stop));
            }
            columns.push(out);
        }
        Ok(Self {
            schema: out_schema,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::value::DataType;

    fn frame() -> Frame {
        let schema = Schema::parse("ts i64* | value f8").unwrap();
        Frame::new(
            schema,
            &[
                ("ts", Array::from(vec![1i64, 2, 4, 4, 7])),
                ("value", Array::from(vec![10.0, 20.0, 40.0, 41.0, 70.0])),
            ],
        )
        .unwrap()
    }

    fn key(v: i64) -> Vec<Value> {
        vec![Value::I64(v)]
    }

    #[test]
    fn test_new_validates() {
        let schema = Schema::parse("ts i64* | value f8").unwrap();
        assert_matches!(
            Frame::new(schema.clone(), &[("ts", Array::from(vec![1i64]))]),
            Err(SchemaError::MissingColumn(_))
        );
        assert_matches!(
            Frame::new(
                schema.clone(),
                &[
                    ("ts", Array::from(vec![1i64])),
                    ("value", Array::from(vec![1.0])),
                    ("bogus", Array::from(vec![1.0])),
                ]
            ),
            Err(SchemaError::UnknownColumn(_))
        );
        assert_matches!(
            Frame::new(
                schema,
                &[
                    ("ts", Array::from(vec![1i64, 2])),
                    ("value", Array::from(vec![1.0])),
                ]
            ),
            Err(SchemaError::LengthMismatch { .. })
        );
    }

    #[test]
    fn test_index() {
        let frame = frame();
        assert_eq!(frame.index(&key(4), false), Some(2));
        assert_eq!(frame.index(&key(4), true), Some(4));
        assert_eq!(frame.index(&key(0), false), Some(0));
        assert_eq!(frame.index(&key(99), false), Some(5));
        assert_eq!(frame.index(&[], false), None);
    }

    #[test]
    fn test_multi_column_index() {
        let schema = Schema::parse("a i64* | b str* | v f8").unwrap();
        let frame = Frame::new(
            schema,
            &[
                ("a", Array::from(vec![1i64, 1, 2, 2])),
                ("b", Array::from(vec!["x", "y", "x", "y"])),
                ("v", Array::from(vec![0.0, 1.0, 2.0, 3.0])),
            ],
        )
        .unwrap();
        assert_eq!(
            frame.index(&[Value::I64(2), Value::Str("x".into())], false),
            Some(2)
        );
        // Partial key spans the whole run of a == 2.
        assert_eq!(frame.index(&[Value::I64(2)], false), Some(2));
        assert_eq!(frame.index(&[Value::I64(2)], true), Some(4));
    }

    #[test]
    fn test_index_slice_closures() {
        let frame = frame();
        let ts = |frm: &Frame| frm.column("ts").unwrap().clone();

        let sliced = frame.index_slice(&key(2), &key(4), Closed::Left);
        assert_eq!(ts(&sliced), Array::from(vec![2i64]));

        let sliced = frame.index_slice(&key(2), &key(4), Closed::Both);
        assert_eq!(ts(&sliced), Array::from(vec![2i64, 4, 4]));

        let sliced = frame.index_slice(&key(2), &key(4), Closed::Right);
        assert_eq!(ts(&sliced), Array::from(vec![4i64, 4]));

        let sliced = frame.index_slice(&key(2), &key(4), Closed::None);
        assert_eq!(ts(&sliced), Array::empty(DataType::I64));

        // Point query: lone start forces closed = both.
        let sliced = frame.index_slice(&key(4), &[], Closed::Left);
        assert_eq!(ts(&sliced), Array::from(vec![4i64, 4]));
    }

    #[test]
    fn test_row_dict() {
        let frame = frame();
        let row = frame.row_dict(&key(2)).unwrap();
        assert_eq!(row[0], ("ts".to_string(), Value::I64(2)));
        assert_eq!(row[1], ("value".to_string(), Value::F64(20.0)));
        assert_eq!(frame.row_dict(&key(3)), None);
    }

    #[test]
    fn test_sorted_and_collapse() {
        let frame = frame();
        assert!(frame.is_sorted());

        let collapsed = frame.collapse_duplicate_index();
        assert_eq!(
            collapsed.column("ts").unwrap(),
            &Array::from(vec![1i64, 2, 4, 7])
        );
        // Last row of the duplicate run wins.
        assert_eq!(
            collapsed.column("value").unwrap(),
            &Array::from(vec![10.0, 20.0, 41.0, 70.0])
        );

        let schema = Schema::parse("ts i64* | value f8").unwrap();
        let unsorted = Frame::new(
            schema,
            &[
                ("ts", Array::from(vec![3i64, 1])),
                ("value", Array::from(vec![0.0, 0.0])),
            ],
        )
        .unwrap();
        assert!(!unsorted.is_sorted());
    }
}
