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

//! In-process pod backed by a shared ordered map. Thread-safe; `cd` returns
//! a view over the same map under a longer prefix.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::pod::Pod;
use crate::pod::PodError;
use crate::pod::PodResult;
use crate::pod::join_path;

#[derive(Debug, Clone, Default)]
pub struct MemoryPod {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    prefix: String,
}

impl MemoryPod {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, path: &str) -> PodResult<String> {
        join_path(&self.prefix, path)
    }

    /// Keys under the directory `dir`, as paths relative to it.
    fn keys_under(&self, dir: &str) -> Vec<String> {
        let files = self.files.lock().unwrap();
        if dir.is_empty() {
            return files.keys().cloned().collect();
        }
        let dir_prefix = format!("{dir}/");
        files
            .range(dir_prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&dir_prefix))
            .map(|(key, _)| key[dir_prefix.len()..].to_string())
            .collect()
    }
}

impl Pod for MemoryPod {
    fn read(&self, path: &str) -> PodResult<Vec<u8>> {
        let key = self.resolve(path)?;
        let files = self.files.lock().unwrap();
        files
            .get(&key)
            .cloned()
            .ok_or_else(|| PodError::NotFound(key.clone()))
    }

    fn write(&self, path: &str, data: &[u8]) -> PodResult<Option<u64>> {
        let key = self.resolve(path)?;
        let mut files = self.files.lock().unwrap();
        if files.contains_key(&key) {
            return Ok(None);
        }
        let len = data.len() as u64;
        files.insert(key, data.to_vec());
        Ok(Some(len))
    }

    fn ls(&self, path: &str, missing_ok: bool) -> PodResult<Vec<String>> {
        let dir = self.resolve(path)?;
        let rels = self.keys_under(&dir);
        if rels.is_empty() && dir != self.prefix {
            return if missing_ok {
                Ok(vec![])
            } else {
                Err(PodError::NotFound(dir))
            };
        }
        let children: BTreeSet<String> = rels
            .iter()
            .map(|rel| rel.split('/').next().unwrap().to_string())
            .collect();
        Ok(children.into_iter().collect())
    }

    fn walk(&self, path: &str, max_depth: Option<usize>) -> PodResult<Vec<String>> {
        let dir = self.resolve(path)?;
        let mut rels = self.keys_under(&dir);
        if let Some(depth) = max_depth {
            rels.retain(|rel| rel.split('/').count() <= depth);
        }
        rels.sort();
        Ok(rels)
    }

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()> {
        let key = self.resolve(path)?;
        let mut files = self.files.lock().unwrap();
        if files.remove(&key).is_some() {
            return Ok(());
        }
        let dir_prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };
        let under: Vec<String> = files
            .keys()
            .filter(|k| k.starts_with(&dir_prefix))
            .cloned()
            .collect();
        if under.is_empty() {
            return Err(PodError::NotFound(key));
        }
        if !recursive {
            return Err(PodError::NotEmpty(key));
        }
        for k in under {
            files.remove(&k);
        }
        Ok(())
    }

    fn isfile(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(key) => self.files.lock().unwrap().contains_key(&key),
            Err(_) => false,
        }
    }

    fn clear(&self, keep: &[&str]) -> PodResult<()> {
        let rels = self.keys_under(&self.prefix.clone());
        let mut files = self.files.lock().unwrap();
        for rel in rels {
            let top = rel.split('/').next().unwrap();
            if keep.contains(&top) {
                continue;
            }
            let key = if self.prefix.is_empty() {
                rel
            } else {
                format!("{}/{rel}", self.prefix)
            };
            files.remove(&key);
        }
        Ok(())
    }

    fn cd(&self, path: &str) -> Arc<dyn Pod> {
        let prefix = self.resolve(path).expect("invalid sub-pod path");
        Arc::new(Self {
            files: self.files.clone(),
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_read_write() {
        let pod = MemoryPod::new();
        let data = b"\xde\xad\xbe\xef";
        pod.write("key", data).unwrap();
        assert_eq!(pod.ls(".", false).unwrap(), ["key"]);
        assert_eq!(pod.read("key").unwrap(), data);
    }

    #[test]
    fn test_multi_write() {
        let pod = MemoryPod::new();
        let data = b"\xde\xad\xbe\xef";
        // First write reports the byte count, the second reports "existed".
        assert_eq!(pod.write("key", data).unwrap(), Some(4));
        assert_eq!(pod.write("key", data).unwrap(), None);
    }

    #[test]
    fn test_empty_ls() {
        let pod = MemoryPod::new();
        assert_eq!(pod.ls(".", false).unwrap(), Vec::<String>::new());
        assert_matches!(pod.ls("i-do-not-exist", false), Err(PodError::NotFound(_)));
        assert_eq!(pod.ls("i-do-not-exist", true).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_write_delete() {
        let pod = MemoryPod::new();
        pod.write("key", b"data").unwrap();
        pod.rm("key", false).unwrap();
        assert_eq!(pod.ls(".", false).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_write_delete_recursive() {
        let pod = MemoryPod::new();
        let top = pod.cd("top_dir");
        top.write("sub_dir/key", b"data").unwrap();

        assert_matches!(top.rm(".", false), Err(PodError::NotEmpty(_)));
        top.rm(".", true).unwrap();
        assert_eq!(pod.ls(".", false).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_write_clear() {
        let pod = MemoryPod::new();
        pod.write("key", b"data").unwrap();
        pod.write("ham/key", b"data").unwrap();
        pod.write("ham/spam/key", b"data").unwrap();

        assert_eq!(pod.ls(".", false).unwrap().len(), 2);
        assert_eq!(pod.ls("ham", false).unwrap().len(), 2);
        assert_eq!(pod.ls("ham/spam", false).unwrap().len(), 1);

        pod.clear(&[]).unwrap();
        assert_eq!(pod.ls(".", false).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_clear_keep() {
        let pod = MemoryPod::new();
        pod.write("a", b"").unwrap();
        pod.write("b", b"").unwrap();
        pod.write("sub/c", b"").unwrap();
        pod.clear(&["b"]).unwrap();
        assert_eq!(pod.ls(".", false).unwrap(), ["b"]);
    }

    #[test]
    fn test_walk() {
        let pod = MemoryPod::new();
        pod.write("ham/spam/foo", b"").unwrap();
        pod.write("bar/baz", b"").unwrap();
        pod.write("qux", b"").unwrap();

        let all = ["bar/baz", "ham/spam/foo", "qux"];
        assert_eq!(pod.walk(".", None).unwrap(), all);
        assert_eq!(pod.walk(".", Some(10)).unwrap(), all);
        assert_eq!(pod.walk(".", Some(3)).unwrap(), all);
        assert_eq!(pod.walk(".", Some(2)).unwrap(), ["bar/baz", "qux"]);
        assert_eq!(pod.walk(".", Some(1)).unwrap(), ["qux"]);
        assert_eq!(pod.walk(".", Some(0)).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_cd_shares_storage() {
        let pod = MemoryPod::new();
        let sub = pod.cd("ham");
        sub.write("key", b"data").unwrap();
        assert_eq!(pod.read("ham/key").unwrap(), b"data");
        assert!(sub.isfile("key"));
        assert!(!sub.isfile("nope"));
    }
}
