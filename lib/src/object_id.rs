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

use sha1::Digest as _;
use sha1::Sha1;

use crate::hex_util;

/// Number of bytes in a sha1 digest.
pub const DIGEST_LENGTH: usize = 20;

pub trait ObjectId {
    fn object_type(&self) -> String;
    fn as_bytes(&self) -> &[u8];
    fn to_bytes(&self) -> Vec<u8>;
    fn hex(&self) -> String;
}

// Defines a new struct type with visibility `vis` and name `ident` containing
// a single Vec<u8> used to store a sha1 digest as bytes. Types defined using
// this macro automatically implement the `ObjectId` trait and serde
// round-trips (hex in human-readable formats, raw bytes otherwise).
macro_rules! id_type {
    (   $(#[$attr:meta])*
        $vis:vis $name:ident
    ) => {
        $(#[$attr])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
        $vis struct $name(Vec<u8>);

        #[allow(dead_code)]
        impl $name {
            pub fn new(value: Vec<u8>) -> Self {
                Self(value)
            }

            pub fn from_bytes(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }

            /// Digest of the given bytes.
            pub fn hash(data: &[u8]) -> Self {
                Self($crate::object_id::sha1_digest(data))
            }

            /// Parses the given hex string. The string must be valid; a
            /// static str is required to prevent API misuse.
            pub fn from_hex(hex: &'static str) -> Self {
                Self::try_from_hex(hex).unwrap()
            }

            pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
                $crate::hex_util::decode_hex(hex).map(Self)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                f.debug_tuple(stringify!($name)).field(&self.hex()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                f.pad(&self.hex())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                if serializer.is_human_readable() {
                    self.hex().serialize(serializer)
                } else {
                    self.as_bytes().serialize(serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                if deserializer.is_human_readable() {
                    let hex = String::deserialize(deserializer)?;
                    Self::try_from_hex(&hex)
                        .ok_or_else(|| serde::de::Error::custom("invalid hex id"))
                } else {
                    let bytes = Vec::<u8>::deserialize(deserializer)?;
                    Ok(Self(bytes))
                }
            }
        }

        impl $crate::object_id::ObjectId for $name {
            fn object_type(&self) -> String {
                stringify!($name)
                    .strip_suffix("Id")
                    .unwrap()
                    .to_ascii_lowercase()
                    .to_string()
            }

            fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            fn to_bytes(&self) -> Vec<u8> {
                self.0.clone()
            }

            fn hex(&self) -> String {
                $crate::hex_util::encode_hex(&self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a commit file in a changelog: sha1 of its payload bytes.
    pub CommitId
);
id_type!(
    /// Identifier of a column blob: sha1 of its encoded bytes.
    pub BlobId
);

impl CommitId {
    /// The `phi` sentinel denoting "no parent", used to start a new root.
    pub fn root() -> Self {
        Self(vec![0; DIGEST_LENGTH])
    }

    pub fn is_root(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

pub(crate) fn sha1_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Splits a hex digest into nested directory names to bound directory sizes:
/// the first two hex pairs become folders, the remainder is the file name
/// (e.g. `ab12cd34ef…` becomes `ab/12/cd34ef…`).
pub fn hashed_path(digest_hex: &str) -> String {
    debug_assert!(digest_hex.len() > 4);
    format!(
        "{}/{}/{}",
        &digest_hex[0..2],
        &digest_hex[2..4],
        &digest_hex[4..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_object_id() {
        let id = CommitId::from_hex("deadbeef0123");
        assert_eq!(format!("{id}"), "deadbeef0123");
        assert_eq!(format!("{id:.6}"), "deadbe");
        assert_eq!(id.object_type(), "commit");
    }

    #[test]
    fn test_root_sentinel() {
        let phi = CommitId::root();
        assert_eq!(phi.hex(), "0".repeat(40));
        assert!(phi.is_root());
        assert!(!CommitId::hash(b"data").is_root());
    }

    #[test]
    fn test_sha1_hash() {
        // Well-known sha1 of the empty string.
        assert_eq!(
            BlobId::hash(b"").hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(BlobId::hash(b"ham"), BlobId::hash(b"ham"));
        assert_ne!(BlobId::hash(b"ham"), BlobId::hash(b"spam"));
    }

    #[test]
    fn test_hashed_path() {
        let id = BlobId::hash(b"");
        assert_eq!(
            hashed_path(&id.hex()),
            "da/39/a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }
}
