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

//! Hex string helpers and the hextime filename prefix.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Encodes `data` as a lowercase hex string.
pub fn encode_hex(data: &[u8]) -> String {
    let encoded = data
        .iter()
        .flat_map(|b| [HEX_CHARS[usize::from(b >> 4)], HEX_CHARS[usize::from(b & 0xf)]])
        .collect();
    String::from_utf8(encoded).unwrap()
}

/// Decodes `hex` into bytes. Returns `None` on odd length or invalid digits.
pub fn decode_hex(hex: impl AsRef<[u8]>) -> Option<Vec<u8>> {
    let hex = hex.as_ref();
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks_exact(2)
        .map(|chunk| {
            let [hi, lo] = chunk.try_into().unwrap();
            Some(hex_value(hi)? << 4 | hex_value(lo)?)
        })
        .collect()
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lowercase hex of a millisecond timestamp, zero-padded to 12 digits so that
/// lexical order matches numeric order.
pub fn hextime(millis: u64) -> String {
    format!("{millis:012x}")
}

/// Parses a `hextime` string back into milliseconds.
pub fn parse_hextime(hex: &str) -> Option<u64> {
    if hex.is_empty() || hex.len() > 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        assert_eq!(encode_hex(b""), "");
        assert_eq!(encode_hex(b"\x01\x23\xab\xef"), "0123abef");
        assert_eq!(decode_hex("0123abef"), Some(b"\x01\x23\xab\xef".to_vec()));
        assert_eq!(decode_hex("0123ABEF"), Some(b"\x01\x23\xab\xef".to_vec()));

        // Odd length and invalid digits
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }

    #[test]
    fn test_hextime_sorts_lexically() {
        let a = hextime(1_600_000_000_000);
        let b = hextime(1_600_000_000_001);
        let c = hextime(1_700_000_000_000);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(parse_hextime(&a), Some(1_600_000_000_000));
    }

    #[test]
    fn test_hextime_width() {
        assert_eq!(hextime(0), "000000000000");
        assert_eq!(hextime(0xabc), "000000000abc");
        assert_eq!(parse_hextime("000000000abc"), Some(0xabc));
        assert_eq!(parse_hextime(""), None);
    }
}
