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

//! Append-only hash-chained log over a pod.
//!
//! Each commit is one file named `{hextime}-{parent}-{child}` whose body is
//! the revision payload (zstd-compressed MessagePack); `child` is the sha1
//! of the body. Commits form a DAG rooted at the all-zero sentinel. The log
//! is linear in steady state, but uncoordinated writers may branch; readers
//! merge branches deterministically at walk time, so a branch is never an
//! error.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::hex_util;
use crate::object_id::BlobId;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::pod::Pod;
use crate::pod::PodError;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error(transparent)]
    Pod(#[from] PodError),
    #[error("malformed commit filename: {0}")]
    MalformedEntry(String),
    #[error("cannot encode revision payload")]
    EncodePayload(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("cannot decode revision payload")]
    DecodePayload(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// What one write left behind: the index range it claims, its row count,
/// the content address of every column, and the wall-clock epoch of the
/// commit in milliseconds UTC.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub start: Vec<Value>,
    pub stop: Vec<Value>,
    pub len: u64,
    pub digests: Vec<BlobId>,
    pub epoch: u64,
}

impl Revision {
    pub fn encode(&self) -> Result<Vec<u8>, ChangelogError> {
        let packed =
            rmp_serde::to_vec(self).map_err(|err| ChangelogError::EncodePayload(Box::new(err)))?;
        zstd::encode_all(&packed[..], 0).map_err(|err| ChangelogError::EncodePayload(Box::new(err)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChangelogError> {
        let packed =
            zstd::decode_all(bytes).map_err(|err| ChangelogError::DecodePayload(Box::new(err)))?;
        rmp_serde::from_slice(&packed).map_err(|err| ChangelogError::DecodePayload(Box::new(err)))
    }
}

/// One parsed commit filename.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommitRef {
    pub hextime: u64,
    pub parent: CommitId,
    pub child: CommitId,
}

impl CommitRef {
    pub fn filename(&self) -> String {
        format!(
            "{}-{}-{}",
            hex_util::hextime(self.hextime),
            self.parent.hex(),
            self.child.hex()
        )
    }

    pub fn parse(name: &str) -> Result<Self, ChangelogError> {
        let malformed = || ChangelogError::MalformedEntry(name.to_string());
        let mut parts = name.split('-');
        let hextime = parts
            .next()
            .and_then(hex_util::parse_hextime)
            .ok_or_else(malformed)?;
        let parent = parts
            .next()
            .and_then(CommitId::try_from_hex)
            .ok_or_else(malformed)?;
        let child = parts
            .next()
            .and_then(CommitId::try_from_hex)
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            hextime,
            parent,
            child,
        })
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename())
    }
}

/// A pod folder of commit files plus an in-memory payload cache.
#[derive(Clone, Debug)]
pub struct Changelog {
    pod: Arc<dyn Pod>,
    cache: Arc<Mutex<HashMap<CommitId, Arc<Revision>>>>,
}

impl Changelog {
    pub fn new(pod: Arc<dyn Pod>) -> Self {
        Self {
            pod,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn pod(&self) -> &Arc<dyn Pod> {
        &self.pod
    }

    /// All commit files, sorted by filename, which is to say by
    /// `(hextime, parent, child)`.
    pub fn entries(&self) -> Result<Vec<CommitRef>, ChangelogError> {
        let mut names = self.pod.ls(".", true)?;
        names.sort();
        names.iter().map(|name| CommitRef::parse(name)).collect()
    }

    /// The writer's view of the current head: the lexically last entry.
    /// Branch ties are resolved at read time, not here.
    pub fn head(&self) -> Result<Option<CommitRef>, ChangelogError> {
        Ok(self.entries()?.into_iter().next_back())
    }

    /// Appends a revision. The parent is the observed head unless
    /// `force_parent` pins it (the zero sentinel starts a new root).
    /// Committing an already-present `(parent, child)` pair returns the
    /// existing entry.
    pub fn commit(
        &self,
        revision: &Revision,
        force_parent: Option<&CommitId>,
    ) -> Result<CommitRef, ChangelogError> {
        let bytes = revision.encode()?;
        let child = CommitId::hash(&bytes);
        let entries = self.entries()?;
        let parent = match force_parent {
            Some(parent) => parent.clone(),
            None => entries
                .last()
                .map_or_else(CommitId::root, |entry| entry.child.clone()),
        };
        if let Some(existing) = entries
            .iter()
            .find(|entry| entry.parent == parent && entry.child == child)
        {
            return Ok(existing.clone());
        }
        let entry = CommitRef {
            hextime: hex_util::now_ms(),
            parent,
            child: child.clone(),
        };
        // Create-if-absent: losing a race to an identical filename is fine.
        self.pod.write(&entry.filename(), &bytes)?;
        tracing::debug!(commit = %entry, "committed revision");
        self.cache
            .lock()
            .unwrap()
            .insert(child, Arc::new(revision.clone()));
        Ok(entry)
    }

    fn payload(&self, entry: &CommitRef) -> Result<Arc<Revision>, ChangelogError> {
        if let Some(revision) = self.cache.lock().unwrap().get(&entry.child) {
            return Ok(revision.clone());
        }
        let bytes = self.pod.read(&entry.filename())?;
        let revision = Arc::new(Revision::decode(&bytes)?);
        self.cache
            .lock()
            .unwrap()
            .insert(entry.child.clone(), revision.clone());
        Ok(revision)
    }

    /// Lazily yields every revision in causal order: depth-first from the
    /// root sentinel, children sorted by `(hextime, child)`. Revisions from
    /// concurrent branches are all emitted; emission order decides which
    /// one wins a last-writer-wins merge (later wins).
    pub fn walk(&self) -> Result<Walk<'_>, ChangelogError> {
        let mut children: HashMap<CommitId, Vec<CommitRef>> = HashMap::new();
        for entry in self.entries()? {
            children.entry(entry.parent.clone()).or_default().push(entry);
        }
        for list in children.values_mut() {
            list.sort_by(|a, b| (a.hextime, &a.child).cmp(&(b.hextime, &b.child)));
        }
        let mut stack = children.remove(&CommitId::root()).unwrap_or_default();
        stack.reverse();
        Ok(Walk {
            log: self,
            children,
            stack,
            visited: HashSet::new(),
        })
    }

    /// Copies every remote commit file whose child is not already present
    /// locally. Payload bytes are opaque; nothing is re-signed.
    pub fn pull(&self, remote: &Self) -> Result<Vec<CommitRef>, ChangelogError> {
        let known: HashSet<CommitId> = self
            .entries()?
            .into_iter()
            .map(|entry| entry.child)
            .collect();
        let mut copied = vec![];
        for entry in remote.entries()? {
            if known.contains(&entry.child) {
                continue;
            }
            let bytes = remote.pod.read(&entry.filename())?;
            self.pod.write(&entry.filename(), &bytes)?;
            tracing::debug!(commit = %entry, "pulled commit");
            copied.push(entry);
        }
        Ok(copied)
    }

    /// Removes every commit file not named in `keep`.
    pub fn truncate(&self, keep: &[CommitRef]) -> Result<(), ChangelogError> {
        let names: Vec<String> = keep.iter().map(CommitRef::filename).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.pod.clear(&names)?;
        Ok(())
    }

    /// Removes all commits, resetting history.
    pub fn clear(&self) -> Result<(), ChangelogError> {
        self.truncate(&[])
    }
}

pub struct Walk<'a> {
    log: &'a Changelog,
    children: HashMap<CommitId, Vec<CommitRef>>,
    stack: Vec<CommitRef>,
    visited: HashSet<CommitId>,
}

impl Iterator for Walk<'_> {
    type Item = Result<(CommitRef, Arc<Revision>), ChangelogError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.stack.pop() {
            // The same payload can be reachable twice (e.g. a squash that
            // reproduces an existing revision); emit it once.
            if !self.visited.insert(entry.child.clone()) {
                continue;
            }
            if let Some(mut kids) = self.children.remove(&entry.child) {
                kids.reverse();
                self.stack.append(&mut kids);
            }
            return Some(self.log.payload(&entry).map(|revision| (entry, revision)));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pod::MemoryPod;

    fn revision(start: i64, stop: i64, epoch: u64) -> Revision {
        Revision {
            start: vec![Value::I64(start)],
            stop: vec![Value::I64(stop)],
            len: (stop - start + 1) as u64,
            digests: vec![BlobId::hash(&start.to_le_bytes())],
            epoch,
        }
    }

    fn changelog() -> Changelog {
        Changelog::new(Arc::new(MemoryPod::new()))
    }

    #[test]
    fn test_payload_round_trip() {
        let revision = revision(1, 3, 42);
        let decoded = Revision::decode(&revision.encode().unwrap()).unwrap();
        assert_eq!(decoded, revision);
    }

    #[test]
    fn test_commit_and_walk_linear() {
        let log = changelog();
        for i in 0..5 {
            log.commit(&revision(i, i + 1, i as u64), None).unwrap();
        }
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 5);
        // Hash chain: each commit names the previous child.
        for pair in entries.windows(2) {
            assert_eq!(pair[1].parent, pair[0].child);
        }
        assert_eq!(entries[0].parent, CommitId::root());

        let walked: Vec<_> = log.walk().unwrap().map(|item| item.unwrap()).collect();
        assert_eq!(walked.len(), 5);
        for (pos, (_, rev)) in walked.iter().enumerate() {
            assert_eq!(rev.epoch, pos as u64);
        }
    }

    #[test]
    fn test_commit_idempotent() {
        let log = changelog();
        let rev = revision(1, 3, 42);
        let first = log.commit(&rev, None).unwrap();
        // Identical payload on the same parent maps to the same entry.
        let second = log.commit(&rev, Some(&CommitId::root())).unwrap();
        assert_eq!(first, second);
        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_branch_merge_order() {
        let log = changelog();
        let root = log.commit(&revision(0, 9, 0), None).unwrap();
        // Two writers branch from the same parent.
        let b1 = log.commit(&revision(1, 2, 1), Some(&root.child)).unwrap();
        let b2 = log.commit(&revision(2, 3, 2), Some(&root.child)).unwrap();
        assert_eq!(b1.parent, b2.parent);

        let walked: Vec<_> = log.walk().unwrap().map(|item| item.unwrap()).collect();
        assert_eq!(walked.len(), 3);
        assert_eq!(walked[0].0, root);
        // Children of a branch point come back sorted by (hextime, child).
        let mut expected = vec![b1, b2];
        expected.sort_by(|a, b| (a.hextime, &a.child).cmp(&(b.hextime, &b.child)));
        assert_eq!(walked[1].0, expected[0]);
        assert_eq!(walked[2].0, expected[1]);
    }

    #[test]
    fn test_pull() {
        let local = changelog();
        let remote = changelog();
        remote.commit(&revision(1, 2, 1), None).unwrap();
        remote.commit(&revision(3, 4, 2), None).unwrap();
        local.commit(&revision(5, 6, 3), None).unwrap();

        let copied = local.pull(&remote).unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(local.entries().unwrap().len(), 3);
        // A second pull is a no-op.
        assert_eq!(local.pull(&remote).unwrap().len(), 0);
    }

    #[test]
    fn test_truncate() {
        let log = changelog();
        let first = log.commit(&revision(1, 2, 1), None).unwrap();
        log.commit(&revision(3, 4, 2), None).unwrap();
        log.truncate(std::slice::from_ref(&first)).unwrap();
        assert_eq!(log.entries().unwrap(), [first]);
        log.clear().unwrap();
        assert_eq!(log.entries().unwrap().len(), 0);
    }
}
