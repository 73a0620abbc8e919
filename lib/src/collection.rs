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

//! A named set of series sharing a default schema.
//!
//! The collection's own index is a series of `(label, schema)` rows. Child
//! series live under the hashed path of their label, so a collection with
//! enormous label cardinality never produces an oversized directory
//! listing.

use std::sync::Arc;
use std::sync::LazyLock;

use crate::changelog::CommitRef;
use crate::frame::Frame;
use crate::object_id::BlobId;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::object_id::hashed_path;
use crate::pod::Pod;
use crate::repo::RepoError;
use crate::schema::Schema;
use crate::series::Series;
use crate::value::Array;
use crate::value::Value;

pub(crate) static REGISTRY_SCHEMA: LazyLock<Schema> =
    LazyLock::new(|| Schema::parse("label str* | schema str").unwrap());

/// Builds the registry frame for a batch of new labels.
pub(crate) fn registry_frame(schema: &Schema, labels: &[&str]) -> Result<Frame, RepoError> {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let texts = vec![schema.dumps(); sorted.len()];
    Ok(Frame::new(
        REGISTRY_SCHEMA.clone(),
        &[
            ("label", Array::from(sorted)),
            ("schema", Array::Str(texts)),
        ],
    )?)
}

/// Looks up `label` in a registry frame and parses its schema column.
pub(crate) fn registry_lookup(frame: &Frame, label: &str) -> Result<Option<Schema>, RepoError> {
    let Some(row) = frame.row_dict(&[Value::Str(label.to_string())]) else {
        return Ok(None);
    };
    let Value::Str(text) = &row[1].1 else {
        return Ok(None);
    };
    Ok(Some(Schema::parse(text)?))
}

#[derive(Clone, Debug)]
pub struct Collection {
    label: String,
    default_schema: Schema,
    pod: Arc<dyn Pod>,
    segment_pod: Arc<dyn Pod>,
    registry: Series,
}

impl Collection {
    pub(crate) fn new(
        label: impl Into<String>,
        default_schema: Schema,
        pod: Arc<dyn Pod>,
        segment_pod: Arc<dyn Pod>,
    ) -> Self {
        let label = label.into();
        let registry = Series::new(
            label.clone(),
            REGISTRY_SCHEMA.clone(),
            pod.clone(),
            Some(segment_pod.clone()),
        );
        Self {
            label,
            default_schema,
            pod,
            segment_pod,
            registry,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The schema new series of this collection are created with.
    pub fn schema(&self) -> &Schema {
        &self.default_schema
    }

    pub(crate) fn registry(&self) -> &Series {
        &self.registry
    }

    /// All series labels, sorted.
    pub fn ls(&self) -> Result<Vec<String>, RepoError> {
        let frame = self.registry.frame()?;
        match frame.column("label") {
            Some(Array::Str(labels)) => Ok(labels.clone()),
            _ => Ok(vec![]),
        }
    }

    /// The series registered under `label`.
    pub fn get(&self, label: &str) -> Result<Series, RepoError> {
        let frame = self.registry.frame()?;
        let schema = registry_lookup(&frame, label)?
            .ok_or_else(|| RepoError::UnknownLabel(label.to_string()))?;
        Ok(self.series_at(label, schema))
    }

    /// The series under `label`, registering it with the collection's
    /// default schema if it does not exist yet.
    pub fn series(&self, label: &str) -> Result<Series, RepoError> {
        match self.get(label) {
            Err(RepoError::UnknownLabel(_)) => {
                self.create(&[label])?;
                self.get(label)
            }
            other => other,
        }
    }

    /// Registers new labels with the default schema in one revision.
    pub fn create(&self, labels: &[&str]) -> Result<CommitRef, RepoError> {
        let schema = self.default_schema.clone();
        self.create_with_schema(&schema, labels)
    }

    /// Registers new labels with an explicit schema. Any label that already
    /// exists fails the whole batch.
    pub fn create_with_schema(
        &self,
        schema: &Schema,
        labels: &[&str],
    ) -> Result<CommitRef, RepoError> {
        let current = self.ls()?;
        if let Some(existing) = labels.iter().find(|label| current.iter().any(|c| c == *label)) {
            return Err(RepoError::LabelExists((*existing).to_string()));
        }
        let frame = registry_frame(schema, labels)?;
        Ok(self.registry.write(&frame)?)
    }

    fn series_at(&self, label: &str, schema: Schema) -> Series {
        let digest = BlobId::hash(label.as_bytes());
        let pod = self.pod.cd(&hashed_path(&digest.hex()));
        Series::new(label, schema, pod, Some(self.segment_pod.clone()))
    }

    /// Rewrites the collection's index as a single revision if it has more
    /// than one; returns `None` otherwise.
    pub fn pack(&self) -> Result<Option<CommitRef>, RepoError> {
        if self.registry.revisions()?.len() <= 1 {
            return Ok(None);
        }
        let frame = self.registry.frame()?;
        let commit = self
            .registry
            .write_at(&frame, None, None, Some(&CommitId::root()))?;
        self.registry.truncate(std::slice::from_ref(&commit))?;
        Ok(Some(commit))
    }

    /// Squashes every child series and then the collection's own index.
    /// Returns the index's rewritten commit, or `None` when the collection
    /// is empty.
    pub fn squash(&self, archive: bool) -> Result<Option<CommitRef>, RepoError> {
        for label in self.ls()? {
            self.get(&label)?.squash_with(archive)?;
        }
        Ok(self.registry.squash_with(archive)?.into_iter().next())
    }

    /// Mirrors a remote collection: its index, then every series present on
    /// the merged view.
    pub fn pull(&self, remote: &Self) -> Result<(), RepoError> {
        self.registry.pull(&remote.registry)?;
        for label in self.ls()? {
            match remote.get(&label) {
                Ok(remote_series) => self.get(&label)?.pull(&remote_series)?,
                Err(RepoError::UnknownLabel(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Revisions of the collection's own index.
    pub fn revisions(&self) -> Result<Vec<(CommitRef, Arc<crate::changelog::Revision>)>, RepoError> {
        Ok(self.registry.revisions()?)
    }
}
