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

//! Repository: the name → collection directory over one pod.
//!
//! Layout under the root pod: `collection/` holds the top-level registry
//! changelog, `segment/` is the blob pool shared by every series, and
//! `series/{xx/yy/rest}/` hosts each collection under the hashed path of
//! its label.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::changelog::CommitRef;
use crate::changelog::Revision;
use crate::collection::Collection;
use crate::collection::REGISTRY_SCHEMA;
use crate::collection::registry_frame;
use crate::collection::registry_lookup;
use crate::memory_pod::MemoryPod;
use crate::object_id::BlobId;
use crate::object_id::ObjectId as _;
use crate::object_id::hashed_path;
use crate::pod::Pod;
use crate::pod::PodError;
use crate::pod::pod_from_uri;
use crate::query::QueryError;
use crate::schema::Schema;
use crate::schema::SchemaError;
use crate::series::Series;
use crate::series::SeriesError;
use crate::value::Array;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unknown label: {0}")]
    UnknownLabel(String),
    #[error("label already exists: {0}")]
    LabelExists(String),
    #[error(transparent)]
    Pod(#[from] PodError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Clone, Debug)]
pub struct Repo {
    pod: Arc<dyn Pod>,
    segment_pod: Arc<dyn Pod>,
    registry: Series,
}

impl Repo {
    /// Opens a repository at `memory://` or `file:///…`.
    pub fn open(uri: &str) -> Result<Self, RepoError> {
        Ok(Self::with_pod(pod_from_uri(uri)?))
    }

    /// A fresh private in-process repository.
    pub fn in_memory() -> Self {
        Self::with_pod(Arc::new(MemoryPod::new()))
    }

    pub fn with_pod(pod: Arc<dyn Pod>) -> Self {
        let segment_pod = pod.cd("segment");
        let registry = Series::new(
            "",
            REGISTRY_SCHEMA.clone(),
            pod.cd("collection"),
            Some(segment_pod.clone()),
        );
        Self {
            pod,
            segment_pod,
            registry,
        }
    }

    pub fn pod(&self) -> &Arc<dyn Pod> {
        &self.pod
    }

    /// All collection labels, sorted.
    pub fn ls(&self) -> Result<Vec<String>, RepoError> {
        let frame = self.registry.frame()?;
        match frame.column("label") {
            Some(Array::Str(labels)) => Ok(labels.clone()),
            _ => Ok(vec![]),
        }
    }

    /// Registers missing labels as collections sharing `schema`, in one
    /// revision. Labels that already exist are left as they are.
    pub fn create_collections(&self, schema: &Schema, labels: &[&str]) -> Result<(), RepoError> {
        let current = self.ls()?;
        let missing: Vec<&str> = labels
            .iter()
            .copied()
            .filter(|label| !current.iter().any(|c| c == label))
            .collect();
        if !missing.is_empty() {
            let frame = registry_frame(schema, &missing)?;
            self.registry.write(&frame)?;
        }
        Ok(())
    }

    /// Registers (if needed) and returns one collection.
    pub fn create_collection(&self, schema: &Schema, label: &str) -> Result<Collection, RepoError> {
        self.create_collections(schema, &[label])?;
        self.collection(label)
    }

    /// An existing collection.
    pub fn collection(&self, label: &str) -> Result<Collection, RepoError> {
        let frame = self.registry.frame()?;
        let schema = registry_lookup(&frame, label)?
            .ok_or_else(|| RepoError::UnknownLabel(label.to_string()))?;
        Ok(Collection::new(
            label,
            schema,
            self.collection_pod(label),
            self.segment_pod.clone(),
        ))
    }

    fn collection_pod(&self, label: &str) -> Arc<dyn Pod> {
        let digest = BlobId::hash(label.as_bytes());
        self.pod.cd("series").cd(&hashed_path(&digest.hex()))
    }

    /// Revisions of the top-level registry.
    pub fn revisions(&self) -> Result<Vec<(CommitRef, Arc<Revision>)>, RepoError> {
        Ok(self.registry.revisions()?)
    }

    /// Squashes every collection, then the top-level registry itself.
    #[instrument(skip_all)]
    pub fn squash(&self) -> Result<(), RepoError> {
        for label in self.ls()? {
            self.collection(&label)?.squash(false)?;
        }
        self.registry.squash()?;
        Ok(())
    }

    /// Mirrors a remote repository: registry first, then every collection
    /// on the merged view.
    #[instrument(skip_all)]
    pub fn pull(&self, remote: &Self) -> Result<(), RepoError> {
        self.registry.pull(&remote.registry)?;
        for label in self.ls()? {
            match remote.collection(&label) {
                Ok(remote_collection) => self.collection(&label)?.pull(&remote_collection)?,
                Err(RepoError::UnknownLabel(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Deletes segment blobs referenced by no reachable revision. Returns
    /// the number of blobs removed.
    #[instrument(skip_all)]
    pub fn gc(&self) -> Result<usize, RepoError> {
        let mut referenced: HashSet<String> = HashSet::new();
        let mut mark = |series: &Series| -> Result<(), RepoError> {
            for digest in series.digests()? {
                referenced.insert(hashed_path(&digest.hex()));
            }
            Ok(())
        };
        mark(&self.registry)?;
        for label in self.ls()? {
            let collection = self.collection(&label)?;
            mark(collection.registry())?;
            for series_label in collection.ls()? {
                mark(&collection.get(&series_label)?)?;
            }
        }
        let mut removed = 0;
        for path in self.segment_pod.walk(".", None)? {
            if !referenced.contains(&path) {
                self.segment_pod.rm(&path, false)?;
                removed += 1;
            }
        }
        tracing::debug!(removed, "collected unreferenced blobs");
        Ok(removed)
    }
}
