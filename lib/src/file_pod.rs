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

//! Local filesystem pod. Writes go through a temp file persisted with
//! no-clobber semantics, so concurrent identical writes race benignly and a
//! reader never observes a partially written blob.

use std::fs;
use std::io;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::pod::Pod;
use crate::pod::PodError;
use crate::pod::PodResult;
use crate::pod::join_path;

#[derive(Debug, Clone)]
pub struct FilePod {
    root: PathBuf,
}

impl FilePod {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PodResult<PathBuf> {
        let rel = join_path("", path)?;
        Ok(self.root.join(rel))
    }
}

fn io_err(path: &Path, source: io::Error) -> PodError {
    PodError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn map_read_err(path: &Path, err: io::Error) -> PodError {
    if err.kind() == io::ErrorKind::NotFound {
        PodError::NotFound(path.display().to_string())
    } else {
        io_err(path, err)
    }
}

fn collect_files(
    dir: &Path,
    rel: &str,
    max_depth: Option<usize>,
    out: &mut Vec<String>,
) -> io::Result<()> {
    if max_depth == Some(0) {
        return Ok(());
    }
    let entries = match dir.read_dir() {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_rel = if rel.is_empty() {
            name
        } else {
            format!("{rel}/{}", name)
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(
                &entry.path(),
                &child_rel,
                max_depth.map(|d| d - 1),
                out,
            )?;
        } else {
            out.push(child_rel);
        }
    }
    Ok(())
}

impl Pod for FilePod {
    fn read(&self, path: &str) -> PodResult<Vec<u8>> {
        let disk_path = self.resolve(path)?;
        fs::read(&disk_path).map_err(|err| map_read_err(&disk_path, err))
    }

    fn write(&self, path: &str, data: &[u8]) -> PodResult<Option<u64>> {
        let disk_path = self.resolve(path)?;
        if disk_path.exists() {
            return Ok(None);
        }
        let parent = disk_path.parent().expect("pod path has a parent");
        fs::create_dir_all(parent).map_err(|err| io_err(parent, err))?;
        let mut temp_file = NamedTempFile::new_in(parent).map_err(|err| io_err(parent, err))?;
        temp_file
            .write_all(data)
            .map_err(|err| io_err(&disk_path, err))?;
        match temp_file.persist_noclobber(&disk_path) {
            Ok(_) => Ok(Some(data.len() as u64)),
            // Somebody else won the race; content-addressed paths make the
            // outcome identical either way.
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(io_err(&disk_path, err.error)),
        }
    }

    fn ls(&self, path: &str, missing_ok: bool) -> PodResult<Vec<String>> {
        let disk_path = self.resolve(path)?;
        let entries = match disk_path.read_dir() {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return if missing_ok {
                    Ok(vec![])
                } else {
                    Err(PodError::NotFound(disk_path.display().to_string()))
                };
            }
            Err(err) => return Err(io_err(&disk_path, err)),
        };
        let mut names = vec![];
        for entry in entries {
            let entry = entry.map_err(|err| io_err(&disk_path, err))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn walk(&self, path: &str, max_depth: Option<usize>) -> PodResult<Vec<String>> {
        let disk_path = self.resolve(path)?;
        let mut out = vec![];
        collect_files(&disk_path, "", max_depth, &mut out).map_err(|err| io_err(&disk_path, err))?;
        out.sort();
        Ok(out)
    }

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()> {
        let disk_path = self.resolve(path)?;
        if disk_path.is_file() {
            return fs::remove_file(&disk_path).map_err(|err| map_read_err(&disk_path, err));
        }
        if !disk_path.is_dir() {
            return Err(PodError::NotFound(disk_path.display().to_string()));
        }
        if recursive {
            fs::remove_dir_all(&disk_path).map_err(|err| io_err(&disk_path, err))
        } else {
            fs::remove_dir(&disk_path).map_err(|err| {
                if err.kind() == io::ErrorKind::DirectoryNotEmpty {
                    PodError::NotEmpty(disk_path.display().to_string())
                } else {
                    io_err(&disk_path, err)
                }
            })
        }
    }

    fn isfile(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.is_file())
    }

    fn clear(&self, keep: &[&str]) -> PodResult<()> {
        for name in self.ls(".", true)? {
            if keep.contains(&name.as_str()) {
                continue;
            }
            let disk_path = self.root.join(&name);
            if disk_path.is_dir() {
                fs::remove_dir_all(&disk_path).map_err(|err| io_err(&disk_path, err))?;
            } else {
                fs::remove_file(&disk_path).map_err(|err| io_err(&disk_path, err))?;
            }
        }
        Ok(())
    }

    fn cd(&self, path: &str) -> Arc<dyn Pod> {
        let root = self.resolve(path).expect("invalid sub-pod path");
        Arc::new(Self { root })
    }
}
