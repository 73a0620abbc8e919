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

//! Per-column codec pipeline.
//!
//! A chain is applied in order on encode and in reverse on decode. Array
//! codecs (`raw`, `vlen-utf8`, `delta`) turn arrays into bytes or arrays
//! into arrays; byte codecs (`zstd`, `gzip`) compress. A compressor fed an
//! array implies `raw` first, and a chain that never reaches bytes gets a
//! trailing `raw`.

use std::fmt;
use std::io::Read as _;
use std::io::Write as _;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::value::Array;
use crate::value::DataType;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt blob: {0}")]
    Corrupt(String),
    #[error("codec {codec} cannot handle {dtype} column")]
    Unsupported {
        codec: &'static str,
        dtype: DataType,
    },
    #[error("invalid codec chain: {0}")]
    InvalidChain(&'static str),
    #[error("compression failed")]
    Compress(#[source] std::io::Error),
    #[error("decompression failed")]
    Decompress(#[source] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    Raw,
    Zstd,
    Gzip,
    Delta,
    VlenUtf8,
}

impl Codec {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "raw" => Some(Self::Raw),
            "zstd" => Some(Self::Zstd),
            "gzip" => Some(Self::Gzip),
            "delta" => Some(Self::Delta),
            "vlen-utf8" => Some(Self::VlenUtf8),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
            Self::Delta => "delta",
            Self::VlenUtf8 => "vlen-utf8",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Stage {
    Arr(Array),
    Bytes(Vec<u8>),
}

fn into_bytes(stage: Stage) -> Result<Vec<u8>, CodecError> {
    match stage {
        Stage::Bytes(bytes) => Ok(bytes),
        Stage::Arr(array) => raw_encode(&array),
    }
}

/// Encodes `array` through the codec chain.
pub fn encode(codecs: &[Codec], array: &Array) -> Result<Vec<u8>, CodecError> {
    let mut stage = Stage::Arr(array.clone());
    for codec in codecs {
        stage = match (codec, stage) {
            (Codec::Raw, Stage::Arr(a)) => Stage::Bytes(raw_encode(&a)?),
            (Codec::Raw, bytes @ Stage::Bytes(_)) => bytes,
            (Codec::VlenUtf8, Stage::Arr(a)) => Stage::Bytes(vlen_encode(&a)?),
            (Codec::VlenUtf8, Stage::Bytes(_)) => {
                return Err(CodecError::InvalidChain("vlen-utf8 after a byte codec"));
            }
            (Codec::Delta, Stage::Arr(a)) => Stage::Arr(delta_encode(&a)?),
            (Codec::Delta, Stage::Bytes(_)) => {
                return Err(CodecError::InvalidChain("delta after a byte codec"));
            }
            (Codec::Zstd, stage) => {
                Stage::Bytes(zstd::encode_all(&into_bytes(stage)?[..], 0).map_err(CodecError::Compress)?)
            }
            (Codec::Gzip, stage) => Stage::Bytes(gzip_compress(&into_bytes(stage)?)?),
        };
    }
    into_bytes(stage)
}

/// Decodes `bytes` back into an array of `dtype` through the reversed chain.
pub fn decode(dtype: DataType, codecs: &[Codec], bytes: &[u8]) -> Result<Array, CodecError> {
    let mut stage = Stage::Bytes(bytes.to_vec());
    for codec in codecs.iter().rev() {
        stage = match (codec, stage) {
            (Codec::Raw, Stage::Bytes(b)) => Stage::Arr(raw_decode(dtype, &b)?),
            (Codec::Raw, arr @ Stage::Arr(_)) => arr,
            (Codec::VlenUtf8, Stage::Bytes(b)) => Stage::Arr(vlen_decode(&b)?),
            (Codec::VlenUtf8, Stage::Arr(_)) => {
                return Err(CodecError::InvalidChain("vlen-utf8 after a byte codec"));
            }
            (Codec::Delta, Stage::Bytes(b)) => Stage::Arr(delta_decode(raw_decode(dtype, &b)?)?),
            (Codec::Delta, Stage::Arr(a)) => Stage::Arr(delta_decode(a)?),
            (Codec::Zstd, Stage::Bytes(b)) => {
                Stage::Bytes(zstd::decode_all(&b[..]).map_err(CodecError::Decompress)?)
            }
            (Codec::Gzip, Stage::Bytes(b)) => Stage::Bytes(gzip_decompress(&b)?),
            (Codec::Zstd | Codec::Gzip, Stage::Arr(_)) => {
                return Err(CodecError::InvalidChain("compressor below an array codec"));
            }
        };
    }
    match stage {
        Stage::Arr(array) => Ok(array),
        Stage::Bytes(b) => raw_decode(dtype, &b),
    }
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![];
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    Ok(out)
}

macro_rules! write_le {
    ($values:expr) => {{
        let mut out = Vec::with_capacity(std::mem::size_of_val($values.as_slice()));
        for v in $values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }};
}

macro_rules! read_le {
    ($bytes:expr, $elem:ty) => {{
        const SIZE: usize = std::mem::size_of::<$elem>();
        if $bytes.len() % SIZE != 0 {
            return Err(CodecError::Corrupt(format!(
                "{} trailing bytes in fixed-width column",
                $bytes.len() % SIZE
            )));
        }
        $bytes
            .chunks_exact(SIZE)
            .map(|chunk| <$elem>::from_le_bytes(chunk.try_into().unwrap()))
            .collect::<Vec<$elem>>()
    }};
}

fn raw_encode(array: &Array) -> Result<Vec<u8>, CodecError> {
    match array {
        Array::Bool(values) => Ok(values.iter().map(|v| u8::from(*v)).collect()),
        Array::I8(values) => Ok(write_le!(values)),
        Array::I16(values) => Ok(write_le!(values)),
        Array::I32(values) | Array::Date(values) => Ok(write_le!(values)),
        Array::I64(values) | Array::Timestamp(values) => Ok(write_le!(values)),
        Array::F32(values) => Ok(write_le!(values)),
        Array::F64(values) => Ok(write_le!(values)),
        Array::Str(_) => Err(CodecError::Unsupported {
            codec: "raw",
            dtype: DataType::Str,
        }),
    }
}

fn raw_decode(dtype: DataType, bytes: &[u8]) -> Result<Array, CodecError> {
    match dtype {
        DataType::Bool => Ok(Array::Bool(bytes.iter().map(|b| *b != 0).collect())),
        DataType::I8 => Ok(Array::I8(read_le!(bytes, i8))),
        DataType::I16 => Ok(Array::I16(read_le!(bytes, i16))),
        DataType::I32 => Ok(Array::I32(read_le!(bytes, i32))),
        DataType::I64 => Ok(Array::I64(read_le!(bytes, i64))),
        DataType::F32 => Ok(Array::F32(read_le!(bytes, f32))),
        DataType::F64 => Ok(Array::F64(read_le!(bytes, f64))),
        DataType::Timestamp => Ok(Array::Timestamp(read_le!(bytes, i64))),
        DataType::Date => Ok(Array::Date(read_le!(bytes, i32))),
        DataType::Str => Err(CodecError::Unsupported {
            codec: "raw",
            dtype: DataType::Str,
        }),
    }
}

macro_rules! diff {
    ($values:expr) => {
        $values
            .iter()
            .enumerate()
            .map(|(i, v)| if i == 0 { *v } else { v.wrapping_sub($values[i - 1]) })
            .collect()
    };
}

macro_rules! cumsum {
    ($values:expr) => {{
        let mut acc = 0;
        $values
            .into_iter()
            .map(|v| {
                acc = v.wrapping_add(acc);
                acc
            })
            .collect()
    }};
}

fn delta_encode(array: &Array) -> Result<Array, CodecError> {
    match array {
        Array::I8(values) => Ok(Array::I8(diff!(values))),
        Array::I16(values) => Ok(Array::I16(diff!(values))),
        Array::I32(values) => Ok(Array::I32(diff!(values))),
        Array::I64(values) => Ok(Array::I64(diff!(values))),
        Array::Timestamp(values) => Ok(Array::Timestamp(diff!(values))),
        Array::Date(values) => Ok(Array::Date(diff!(values))),
        other => Err(CodecError::Unsupported {
            codec: "delta",
            dtype: other.dtype(),
        }),
    }
}

fn delta_decode(array: Array) -> Result<Array, CodecError> {
    match array {
        Array::I8(values) => Ok(Array::I8(cumsum!(values))),
        Array::I16(values) => Ok(Array::I16(cumsum!(values))),
        Array::I32(values) => Ok(Array::I32(cumsum!(values))),
        Array::I64(values) => Ok(Array::I64(cumsum!(values))),
        Array::Timestamp(values) => Ok(Array::Timestamp(cumsum!(values))),
        Array::Date(values) => Ok(Array::Date(cumsum!(values))),
        other => Err(CodecError::Unsupported {
            codec: "delta",
            dtype: other.dtype(),
        }),
    }
}

fn vlen_encode(array: &Array) -> Result<Vec<u8>, CodecError> {
    let Array::Str(values) = array else {
        return Err(CodecError::Unsupported {
            codec: "vlen-utf8",
            dtype: array.dtype(),
        });
    };
    let mut out = vec![];
    for value in values {
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    Ok(out)
}

fn vlen_decode(bytes: &[u8]) -> Result<Array, CodecError> {
    let mut values = vec![];
    let mut pos = 0;
    while pos < bytes.len() {
        if pos + 4 > bytes.len() {
            return Err(CodecError::Corrupt("truncated string length".to_string()));
        }
        let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > bytes.len() {
            return Err(CodecError::Corrupt("string overruns blob".to_string()));
        }
        let value = std::str::from_utf8(&bytes[pos..pos + len])
            .map_err(|err| CodecError::Corrupt(err.to_string()))?;
        values.push(value.to_string());
        pos += len;
    }
    Ok(Array::Str(values))
}
