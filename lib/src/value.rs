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

//! Typed scalars and dense typed columns.
//!
//! Every column of a frame is one [`Array`]; index bounds are tuples of
//! [`Value`] compared lexicographically. Timestamps are nanoseconds since
//! the Unix epoch, dates are days since the epoch.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

/// The closed set of element types a column can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Str,
    Timestamp,
    Date,
}

impl DataType {
    /// Parses a dtype token. `int` and `float` are accepted as aliases of
    /// `i64` and `f8`.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "bool" => Some(Self::Bool),
            "i8" => Some(Self::I8),
            "i16" => Some(Self::I16),
            "i32" => Some(Self::I32),
            "i64" | "int" => Some(Self::I64),
            "f4" => Some(Self::F32),
            "f8" | "float" => Some(Self::F64),
            "str" => Some(Self::Str),
            "timestamp" => Some(Self::Timestamp),
            "date" => Some(Self::Date),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f4",
            Self::F64 => "f8",
            Self::Str => "str",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    /// Nanoseconds since the Unix epoch.
    Timestamp(i64),
    /// Days since the Unix epoch.
    Date(i32),
}

impl Value {
    pub fn dtype(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::I8(_) => DataType::I8,
            Self::I16(_) => DataType::I16,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
            Self::Str(_) => DataType::Str,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Date(_) => DataType::Date,
        }
    }

    /// Parses a textual literal into a value of the given dtype. Timestamps
    /// accept the usual ISO shapes (`2020-01-01`, `2020-01-01T12:30`, …) or
    /// a bare integer of nanoseconds.
    pub fn parse(dtype: DataType, text: &str) -> Option<Self> {
        match dtype {
            DataType::Bool => match text {
                "true" | "1" => Some(Self::Bool(true)),
                "false" | "0" => Some(Self::Bool(false)),
                _ => None,
            },
            DataType::I8 => text.parse().ok().map(Self::I8),
            DataType::I16 => text.parse().ok().map(Self::I16),
            DataType::I32 => text.parse().ok().map(Self::I32),
            DataType::I64 => text.parse().ok().map(Self::I64),
            DataType::F32 => text.parse().ok().map(Self::F32),
            DataType::F64 => text.parse().ok().map(Self::F64),
            DataType::Str => Some(Self::Str(text.to_string())),
            DataType::Timestamp => text
                .parse()
                .ok()
                .or_else(|| parse_timestamp(text))
                .map(Self::Timestamp),
            DataType::Date => text
                .parse()
                .ok()
                .or_else(|| parse_date(text))
                .map(Self::Date),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::I8(_) => 1,
            Self::I16(_) => 2,
            Self::I32(_) => 3,
            Self::I64(_) => 4,
            Self::F32(_) => 5,
            Self::F64(_) => 6,
            Self::Str(_) => 7,
            Self::Timestamp(_) => 8,
            Self::Date(_) => 9,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::I8(a), Self::I8(b)) => a.cmp(b),
            (Self::I16(a), Self::I16(b)) => a.cmp(b),
            (Self::I32(a), Self::I32(b)) => a.cmp(b),
            (Self::I64(a), Self::I64(b)) => a.cmp(b),
            (Self::F32(a), Self::F32(b)) => a.total_cmp(b),
            (Self::F64(a), Self::F64(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            // Values at the same key position always share a dtype; mixed
            // comparison only has to be a lawful total order.
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Timestamp(ns) => {
                let dt = DateTime::from_timestamp_nanos(*ns).naive_utc();
                if ns % 1_000_000_000 == 0 {
                    write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S"))
                } else {
                    write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.9f"))
                }
            }
            Self::Date(days) => {
                let date = if *days >= 0 {
                    epoch_date() + chrono::Days::new(u64::from(days.unsigned_abs()))
                } else {
                    epoch_date() - chrono::Days::new(u64::from(days.unsigned_abs()))
                };
                write!(f, "{}", date.format("%Y-%m-%d"))
            }
        }
    }
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses a timestamp literal into nanoseconds since the epoch.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return dt.and_utc().timestamp_nanos_opt();
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_nanos_opt()
}

/// Parses a date literal into days since the epoch.
pub fn parse_date(text: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some((date - epoch_date()).num_days() as i32)
}

/// Lexicographic order over index tuples, Python-list style: element-wise,
/// then a prefix-equal shorter tuple sorts first.
pub fn cmp_key(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.cmp(y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// Compares two index tuples on their common prefix. This is the prefix rule
/// that lets a partial key match full-length bounds: the longer tuple is
/// truncated to the shorter one's length, so prefix-equal tuples compare
/// equal regardless of which side is partial.
pub fn cmp_key_prefix(a: &[Value], b: &[Value]) -> Ordering {
    let cut = a.len().min(b.len());
    cmp_key(&a[..cut], &b[..cut])
}

/// A dense column of values sharing one dtype.
#[derive(Clone, Debug, PartialEq)]
pub enum Array {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
    Timestamp(Vec<i64>),
    Date(Vec<i32>),
}

macro_rules! for_each_variant {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Array::Bool($inner) => $body,
            Array::I8($inner) => $body,
            Array::I16($inner) => $body,
            Array::I32($inner) => $body,
            Array::I64($inner) => $body,
            Array::F32($inner) => $body,
            Array::F64($inner) => $body,
            Array::Str($inner) => $body,
            Array::Timestamp($inner) => $body,
            Array::Date($inner) => $body,
        }
    };
}

// Rebuilds the same variant from transformed contents, so timestamp and date
// columns keep their dtype through slicing.
macro_rules! map_same_variant {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Array::Bool($inner) => Array::Bool($body),
            Array::I8($inner) => Array::I8($body),
            Array::I16($inner) => Array::I16($body),
            Array::I32($inner) => Array::I32($body),
            Array::I64($inner) => Array::I64($body),
            Array::F32($inner) => Array::F32($body),
            Array::F64($inner) => Array::F64($body),
            Array::Str($inner) => Array::Str($body),
            Array::Timestamp($inner) => Array::Timestamp($body),
            Array::Date($inner) => Array::Date($body),
        }
    };
}

impl Array {
    /// An empty array of the given dtype.
    pub fn empty(dtype: DataType) -> Self {
        match dtype {
            DataType::Bool => Self::Bool(vec![]),
            DataType::I8 => Self::I8(vec![]),
            DataType::I16 => Self::I16(vec![]),
            DataType::I32 => Self::I32(vec![]),
            DataType::I64 => Self::I64(vec![]),
            DataType::F32 => Self::F32(vec![]),
            DataType::F64 => Self::F64(vec![]),
            DataType::Str => Self::Str(vec![]),
            DataType::Timestamp => Self::Timestamp(vec![]),
            DataType::Date => Self::Date(vec![]),
        }
    }

    pub fn timestamps(values: Vec<i64>) -> Self {
        Self::Timestamp(values)
    }

    pub fn dates(values: Vec<i32>) -> Self {
        Self::Date(values)
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::I8(_) => DataType::I8,
            Self::I16(_) => DataType::I16,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
            Self::Str(_) => DataType::Str,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Date(_) => DataType::Date,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, pos: usize) -> Value {
        match self {
            Self::Bool(values) => Value::Bool(values[pos]),
            Self::I8(values) => Value::I8(values[pos]),
            Self::I16(values) => Value::I16(values[pos]),
            Self::I32(values) => Value::I32(values[pos]),
            Self::I64(values) => Value::I64(values[pos]),
            Self::F32(values) => Value::F32(values[pos]),
            Self::F64(values) => Value::F64(values[pos]),
            Self::Str(values) => Value::Str(values[pos].clone()),
            Self::Timestamp(values) => Value::Timestamp(values[pos]),
            Self::Date(values) => Value::Date(values[pos]),
        }
    }

    pub fn push(&mut self, value: &Value) {
        match (self, value) {
            (Self::Bool(values), Value::Bool(v)) => values.push(*v),
            (Self::I8(values), Value::I8(v)) => values.push(*v),
            (Self::I16(values), Value::I16(v)) => values.push(*v),
            (Self::I32(values), Value::I32(v)) => values.push(*v),
            (Self::I64(values), Value::I64(v)) => values.push(*v),
            (Self::F32(values), Value::F32(v)) => values.push(*v),
            (Self::F64(values), Value::F64(v)) => values.push(*v),
            (Self::Str(values), Value::Str(v)) => values.push(v.clone()),
            (Self::Timestamp(values), Value::Timestamp(v)) => values.push(*v),
            (Self::Date(values), Value::Date(v)) => values.push(*v),
            (array, value) => panic!(
                "cannot push {} value into {} array",
                value.dtype(),
                array.dtype()
            ),
        }
    }

    /// A copy of the positional range `range`, clamped to the array length.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let start = range.start.min(self.len());
        let stop = range.end.clamp(start, self.len());
        map_same_variant!(self, values => values[start..stop].to_vec())
    }

    /// Gathers the given positions into a new array.
    pub fn take(&self, positions: &[usize]) -> Self {
        map_same_variant!(self, values => {
            positions.iter().map(|pos| values[*pos].clone()).collect()
        })
    }

    /// Appends a copy of `other`, which must share this array's dtype.
    pub fn extend(&mut self, other: &Self) {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(b),
            (Self::I8(a), Self::I8(b)) => a.extend_from_slice(b),
            (Self::I16(a), Self::I16(b)) => a.extend_from_slice(b),
            (Self::I32(a), Self::I32(b)) => a.extend_from_slice(b),
            (Self::I64(a), Self::I64(b)) => a.extend_from_slice(b),
            (Self::F32(a), Self::F32(b)) => a.extend_from_slice(b),
            (Self::F64(a), Self::F64(b)) => a.extend_from_slice(b),
            (Self::Str(a), Self::Str(b)) => a.extend_from_slice(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.extend_from_slice(b),
            (Self::Date(a), Self::Date(b)) => a.extend_from_slice(b),
            (a, b) => panic!("cannot extend {} array with {}", a.dtype(), b.dtype()),
        }
    }

    /// First position in `lo..hi` whose value is >= `value`.
    pub fn bisect_left(&self, value: &Value, lo: usize, hi: usize) -> usize {
        self.bisect(value, lo, hi, false)
    }

    /// First position in `lo..hi` whose value is > `value`.
    pub fn bisect_right(&self, value: &Value, lo: usize, hi: usize) -> usize {
        self.bisect(value, lo, hi, true)
    }

    fn bisect(&self, value: &Value, mut lo: usize, mut hi: usize, right: bool) -> usize {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ord = self.get(mid).cmp(value);
            let go_right = if right {
                ord != Ordering::Greater
            } else {
                ord == Ordering::Less
            };
            if go_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

macro_rules! array_from_vec {
    ($elem:ty, $variant:ident) => {
        impl From<Vec<$elem>> for Array {
            fn from(values: Vec<$elem>) -> Self {
                Self::$variant(values)
            }
        }
    };
}

array_from_vec!(bool, Bool);
array_from_vec!(i8, I8);
array_from_vec!(i16, I16);
array_from_vec!(i32, I32);
array_from_vec!(i64, I64);
array_from_vec!(f32, F32);
array_from_vec!(f64, F64);
array_from_vec!(String, Str);

impl From<Vec<&str>> for Array {
    fn from(values: Vec<&str>) -> Self {
        Self::Str(values.into_iter().map(str::to_string).collect())
    }
}
