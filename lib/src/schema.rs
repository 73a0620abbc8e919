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

//! Declarative column list shared by every series of a collection.
//!
//! The textual form is one column per line: `name dtype[*] [|codec …]`,
//! where a trailing `*` marks an index column. A `|`-separated segment that
//! itself reads as `name dtype` opens a new column, so the compact one-line
//! form `"timestamp timestamp* | value float"` also parses.

use itertools::Itertools as _;
use thiserror::Error;

use crate::codec;
use crate::codec::Codec;
use crate::codec::CodecError;
use crate::value::Array;
use crate::value::DataType;
use crate::value::Value;
use crate::value::parse_date;
use crate::value::parse_timestamp;

const NS_PER_DAY: i64 = 86_400_000_000_000;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot parse schema line {0:?}")]
    Parse(String),
    #[error("unknown dtype: {0}")]
    UnknownDataType(String),
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
    #[error("schema has no index column")]
    NoIndexColumn,
    #[error("index column {0} must come before value columns")]
    IndexNotLeading(String),
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(String),
    #[error("column {column}: expected {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        found: DataType,
    },
    #[error("column {column}: value out of range for {dtype}")]
    Overflow { column: String, dtype: DataType },
    #[error("column {column}: length {found} does not match {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("frame is not sorted by its index columns")]
    Unsorted,
    #[error("frame schema does not match the series schema")]
    SchemaMismatch,
    #[error("cannot parse {text:?} as {dtype}")]
    InvalidKey { text: String, dtype: DataType },
    #[error("key has {found} values but the index has {expected} columns")]
    KeyLength { expected: usize, found: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub dtype: DataType,
    pub codecs: Vec<Codec>,
    pub index: bool,
}

fn default_codecs(dtype: DataType) -> Vec<Codec> {
    match dtype {
        DataType::Str => vec![Codec::VlenUtf8],
        _ => vec![Codec::Raw],
    }
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, dtype: DataType, index: bool) -> Self {
        Self {
            name: name.into(),
            dtype,
            codecs: default_codecs(dtype),
            index,
        }
    }

    pub fn encode(&self, array: &Array) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.codecs, array)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Array, CodecError> {
        codec::decode(self.dtype, &self.codecs, bytes)
    }

    /// Normalizes `array` to this column's dtype: integer widening, checked
    /// narrowing, int to float, int or text to timestamp/date.
    pub fn cast(&self, array: &Array) -> Result<Array, SchemaError> {
        if array.dtype() == self.dtype {
            return Ok(array.clone());
        }
        let mismatch = || SchemaError::TypeMismatch {
            column: self.name.clone(),
            expected: self.dtype,
            found: array.dtype(),
        };
        let overflow = || SchemaError::Overflow {
            column: self.name.clone(),
            dtype: self.dtype,
        };
        let ints: Option<Vec<i64>> = match array {
            Array::I8(values) => Some(values.iter().map(|v| i64::from(*v)).collect()),
            Array::I16(values) => Some(values.iter().map(|v| i64::from(*v)).collect()),
            Array::I32(values) => Some(values.iter().map(|v| i64::from(*v)).collect()),
            Array::I64(values) => Some(values.clone()),
            _ => None,
        };
        match self.dtype {
            DataType::I8 => {
                let ints = ints.ok_or_else(mismatch)?;
                let narrowed: Result<Vec<i8>, _> = ints.iter().map(|v| i8::try_from(*v)).collect();
                Ok(Array::I8(narrowed.map_err(|_| overflow())?))
            }
            DataType::I16 => {
                let ints = ints.ok_or_else(mismatch)?;
                let narrowed: Result<Vec<i16>, _> = ints.iter().map(|v| i16::try_from(*v)).collect();
                Ok(Array::I16(narrowed.map_err(|_| overflow())?))
            }
            DataType::I32 => {
                let ints = ints.ok_or_else(mismatch)?;
                let narrowed: Result<Vec<i32>, _> = ints.iter().map(|v| i32::try_from(*v)).collect();
                Ok(Array::I32(narrowed.map_err(|_| overflow())?))
            }
            DataType::I64 => Ok(Array::I64(ints.ok_or_else(mismatch)?)),
            DataType::F32 => match array {
                Array::F64(values) => Ok(Array::F32(values.iter().map(|v| *v as f32).collect())),
                _ => {
                    let ints = ints.ok_or_else(mismatch)?;
                    Ok(Array::F32(ints.iter().map(|v| *v as f32).collect()))
                }
            },
            DataType::F64 => match array {
                Array::F32(values) => Ok(Array::F64(values.iter().map(|v| f64::from(*v)).collect())),
                _ => {
                    let ints = ints.ok_or_else(mismatch)?;
                    Ok(Array::F64(ints.iter().map(|v| *v as f64).collect()))
                }
            },
            DataType::Timestamp => match array {
                Array::Str(values) => {
                    let parsed: Result<Vec<i64>, SchemaError> = values
                        .iter()
                        .map(|text| {
                            parse_timestamp(text).ok_or_else(|| SchemaError::InvalidKey {
                                text: text.clone(),
                                dtype: DataType::Timestamp,
                            })
                        })
                        .collect();
                    Ok(Array::Timestamp(parsed?))
                }
                Array::Date(values) => Ok(Array::Timestamp(
                    values.iter().map(|d| i64::from(*d) * NS_PER_DAY).collect(),
                )),
                _ => Ok(Array::Timestamp(ints.ok_or_else(mismatch)?)),
            },
            DataType::Date => match array {
                Array::Str(values) => {
                    let parsed: Result<Vec<i32>, SchemaError> = values
                        .iter()
                        .map(|text| {
                            parse_date(text).ok_or_else(|| SchemaError::InvalidKey {
                                text: text.clone(),
                                dtype: DataType::Date,
                            })
                        })
                        .collect();
                    Ok(Array::Date(parsed?))
                }
                _ => {
                    let ints = ints.ok_or_else(mismatch)?;
                    let narrowed: Result<Vec<i32>, _> = ints.iter().map(|v| i32::try_from(*v)).collect();
                    Ok(Array::Date(narrowed.map_err(|_| overflow())?))
                }
            },
            DataType::Bool | DataType::Str => Err(mismatch()),
        }
    }
}

/// Ordered list of columns; index columns come first and there is at least
/// one of them.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn from_columns(mut columns: Vec<ColumnDef>) -> Result<Self, SchemaError> {
        for column in &mut columns {
            if column.codecs.is_empty() {
                column.codecs = default_codecs(column.dtype);
            }
        }
        if !columns.iter().any(|c| c.index) {
            return Err(SchemaError::NoIndexColumn);
        }
        let mut seen_value_column = false;
        for column in &columns {
            if column.index && seen_value_column {
                return Err(SchemaError::IndexNotLeading(column.name.clone()));
            }
            seen_value_column |= !column.index;
        }
        if let Some(name) = columns.iter().map(|c| &c.name).duplicates().next() {
            return Err(SchemaError::DuplicateColumn(name.clone()));
        }
        Ok(Self { columns })
    }

    /// Parses the textual schema form; the inverse of [`Schema::dumps`].
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let mut columns: Vec<ColumnDef> = vec![];
        for line in text.lines() {
            for segment in line.split('|') {
                let tokens: Vec<&str> = segment.split_whitespace().collect();
                if tokens.is_empty() {
                    continue;
                }
                let is_column_decl =
                    tokens.len() >= 2 && DataType::parse(tokens[1].trim_end_matches('*')).is_some();
                if is_column_decl {
                    columns.push(parse_column(&tokens)?);
                } else {
                    // A codec list applying to the previous column.
                    let column = columns
                        .last_mut()
                        .ok_or_else(|| SchemaError::Parse(line.to_string()))?;
                    column.codecs = tokens
                        .iter()
                        .map(|token| {
                            Codec::parse(token)
                                .ok_or_else(|| SchemaError::UnknownCodec(token.to_string()))
                        })
                        .collect::<Result<_, _>>()?;
                }
            }
        }
        Self::from_columns(columns)
    }

    /// Canonical text form; round-trips through [`Schema::parse`].
    pub fn dumps(&self) -> String {
        self.columns
            .iter()
            .map(|column| {
                let star = if column.index { "*" } else { "" };
                let decl = format!("{} {}{star}", column.name, column.dtype.name());
                if column.codecs == default_codecs(column.dtype) {
                    decl
                } else {
                    format!("{decl} |{}", column.codecs.iter().map(Codec::name).join(" "))
                }
            })
            .join("\n")
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// The index columns, in sort order.
    pub fn index_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.index)
    }

    pub fn index_len(&self) -> usize {
        self.index_columns().count()
    }

    /// A schema restricted to the named columns, keeping their declaration
    /// order. Used for column projection; the result may lack an index.
    pub fn project(&self, names: &[&str]) -> Result<Self, SchemaError> {
        for &name in names {
            if self.get(name).is_none() {
                return Err(SchemaError::UnknownColumn(name.to_string()));
            }
        }
        let columns = self
            .columns
            .iter()
            .filter(|c| names.contains(&c.name.as_str()))
            .cloned()
            .collect_vec();
        Ok(Self { columns })
    }

    /// Parses one textual literal per index column into a key tuple. Fewer
    /// literals than index columns yield a partial (prefix) key.
    pub fn parse_key(&self, texts: &[&str]) -> Result<Vec<Value>, SchemaError> {
        let index: Vec<&ColumnDef> = self.index_columns().collect();
        if texts.len() > index.len() {
            return Err(SchemaError::KeyLength {
                expected: index.len(),
                found: texts.len(),
            });
        }
        std::iter::zip(&index, texts.iter().copied())
            .map(|(column, text)| {
                Value::parse(column.dtype, text).ok_or_else(|| SchemaError::InvalidKey {
                    text: text.to_string(),
                    dtype: column.dtype,
                })
            })
            .collect()
    }
}

fn parse_column(tokens: &[&str]) -> Result<ColumnDef, SchemaError> {
    let name = tokens[0].to_string();
    let dtype_token = tokens[1];
    let index = dtype_token.ends_with('*');
    let dtype = DataType::parse(dtype_token.trim_end_matches('*'))
        .ok_or_else(|| SchemaError::UnknownDataType(dtype_token.to_string()))?;
    let codecs = tokens[2..]
        .iter()
        .map(|token| Codec::parse(token).ok_or_else(|| SchemaError::UnknownCodec(token.to_string())))
        .collect::<Result<_, _>>()?;
    Ok(ColumnDef {
        name,
        dtype,
        codecs,
        index,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_parse_multi_line() {
        let schema = Schema::parse(
            "
            timestamp timestamp*
            float f8
            int i64
            str str
            ",
        )
        .unwrap();
        assert_eq!(
            schema.names().collect::<Vec<_>>(),
            ["timestamp", "float", "int", "str"]
        );
        assert_eq!(schema.index_len(), 1);
        assert_eq!(schema.get("str").unwrap().codecs, [Codec::VlenUtf8]);
        assert_eq!(schema.get("float").unwrap().codecs, [Codec::Raw]);
    }

    #[test]
    fn test_parse_one_line() {
        let schema = Schema::parse("timestamp timestamp* | value float").unwrap();
        assert_eq!(schema.len(), 2);
        assert!(schema.get("timestamp").unwrap().index);
        assert_eq!(schema.get("value").unwrap().dtype, DataType::F64);
    }

    #[test]
    fn test_parse_codec_list() {
        for (codecs, expected) in [
            ("", vec![Codec::VlenUtf8]),
            ("vlen-utf8", vec![Codec::VlenUtf8]),
            ("vlen-utf8 gzip", vec![Codec::VlenUtf8, Codec::Gzip]),
        ] {
            let schema = Schema::parse(&format!("val str* |{codecs}")).unwrap();
            assert_eq!(schema.get("val").unwrap().codecs, expected);
        }
    }

    #[test]
    fn test_dumps_round_trip() {
        let text = "timestamp timestamp*\nvalue f8\nname str |vlen-utf8 zstd";
        let schema = Schema::parse(text).unwrap();
        assert_eq!(schema.dumps(), text);
        assert_eq!(Schema::parse(&schema.dumps()).unwrap(), schema);
    }

    #[test]
    fn test_validation() {
        assert_matches!(
            Schema::parse("value f8"),
            Err(SchemaError::NoIndexColumn)
        );
        assert_matches!(
            Schema::parse("value f8\nstamp timestamp*"),
            Err(SchemaError::IndexNotLeading(_))
        );
        assert_matches!(
            Schema::parse("a i64*\na f8"),
            Err(SchemaError::DuplicateColumn(_))
        );
        assert_matches!(
            Schema::parse("a wat*"),
            Err(SchemaError::UnknownDataType(_))
        );
        assert_matches!(
            Schema::parse("a i64* |lzma"),
            Err(SchemaError::UnknownCodec(_))
        );
    }

    #[test]
    fn test_cast() {
        let column = ColumnDef::new("ts", DataType::Timestamp, true);
        assert_eq!(
            column.cast(&Array::from(vec![1i64, 2])).unwrap(),
            Array::timestamps(vec![1, 2])
        );
        assert_eq!(
            column
                .cast(&Array::from(vec!["1970-01-01T00:00:01"]))
                .unwrap(),
            Array::timestamps(vec![1_000_000_000])
        );

        let column = ColumnDef::new("v", DataType::I16, false);
        assert_eq!(
            column.cast(&Array::from(vec![1i64, -2])).unwrap(),
            Array::from(vec![1i16, -2])
        );
        assert_matches!(
            column.cast(&Array::from(vec![1_000_000i64])),
            Err(SchemaError::Overflow { .. })
        );
        assert_matches!(
            column.cast(&Array::from(vec!["ham"])),
            Err(SchemaError::TypeMismatch { .. })
        );
    }

    #[test]
    fn test_parse_key() {
        let schema = Schema::parse("ts timestamp* | tag str* | value f8").unwrap();
        let key = schema.parse_key(&["1970-01-01", "ham"]).unwrap();
        assert_eq!(key, [Value::Timestamp(0), Value::Str("ham".into())]);
        // Partial keys are fine, oversized ones are not.
        assert_eq!(schema.parse_key(&["1970-01-01"]).unwrap().len(), 1);
        assert_matches!(
            schema.parse_key(&["1970-01-01", "ham", "overflow"]),
            Err(SchemaError::KeyLength { .. })
        );
    }
}
