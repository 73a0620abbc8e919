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

//! The blob store abstraction: a flat byte-addressed namespace with
//! `/`-separated relative paths, offered by a local filesystem or an
//! in-process map.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::file_pod::FilePod;
use crate::memory_pod::MemoryPod;

pub type PodResult<T> = Result<T, PodError>;

#[derive(Debug, Error)]
pub enum PodError {
    #[error("no such path: {0}")]
    NotFound(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("unsupported URI scheme in {0}")]
    UnsupportedScheme(String),
    #[error("I/O error at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bytes-in/bytes-out object store.
///
/// Writes are create-if-absent: a second write of the same path is a no-op
/// returning `None` ("already existed"), which is what makes
/// content-addressed placement idempotent without coordination.
pub trait Pod: Debug + Send + Sync {
    /// Reads the file at `path`.
    fn read(&self, path: &str) -> PodResult<Vec<u8>>;

    /// Writes `data` at `path` unless the path already exists. Returns the
    /// number of bytes written, or `None` if the path existed.
    fn write(&self, path: &str, data: &[u8]) -> PodResult<Option<u64>>;

    /// Names of the immediate children of `path`, sorted. A missing
    /// directory is an error unless `missing_ok`.
    fn ls(&self, path: &str, missing_ok: bool) -> PodResult<Vec<String>>;

    /// Relative paths of every file under `path`. `max_depth` counts path
    /// components: `walk(".", Some(1))` lists only top-level files and
    /// `walk(".", Some(0))` nothing.
    fn walk(&self, path: &str, max_depth: Option<usize>) -> PodResult<Vec<String>>;

    /// Removes a file, or a directory when `recursive`.
    fn rm(&self, path: &str, recursive: bool) -> PodResult<()>;

    /// Whether `path` names a file.
    fn isfile(&self, path: &str) -> bool;

    /// Removes every entry except the top-level names in `keep`.
    fn clear(&self, keep: &[&str]) -> PodResult<()>;

    /// A pod scoped to the sub-path `path`.
    fn cd(&self, path: &str) -> Arc<dyn Pod>;
}

/// Normalizes `path` relative to `prefix`, rejecting absolute paths and
/// parent traversal. `"."` and `""` resolve to `prefix` itself.
pub(crate) fn join_path(prefix: &str, path: &str) -> PodResult<String> {
    let mut parts: Vec<&str> = if prefix.is_empty() {
        vec![]
    } else {
        prefix.split('/').collect()
    };
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(PodError::InvalidPath(path.to_string()));
            }
            name => parts.push(name),
        }
    }
    Ok(parts.join("/"))
}

/// Opens a pod from a URI: `memory://` for a fresh in-process store,
/// `file:///some/dir` for a local filesystem store.
pub fn pod_from_uri(uri: &str) -> PodResult<Arc<dyn Pod>> {
    if let Some(path) = uri.strip_prefix("file://") {
        Ok(Arc::new(FilePod::new(PathBuf::from(path))))
    } else if uri.strip_prefix("memory://").is_some() {
        Ok(Arc::new(MemoryPod::new()))
    } else {
        Err(PodError::UnsupportedScheme(uri.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", ".").unwrap(), "");
        assert_eq!(join_path("", "ham").unwrap(), "ham");
        assert_eq!(join_path("ham", "spam/foo").unwrap(), "ham/spam/foo");
        assert_eq!(join_path("ham", ".").unwrap(), "ham");
        assert_eq!(join_path("ham", "spam/").unwrap(), "ham/spam");
        assert!(join_path("ham", "../spam").is_err());
    }

    #[test]
    fn test_pod_from_uri() {
        assert!(pod_from_uri("memory://").is_ok());
        assert!(matches!(
            pod_from_uri("s3://bucket/prefix"),
            Err(PodError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            pod_from_uri("gopher://hole"),
            Err(PodError::UnsupportedScheme(_))
        ));
    }
}
