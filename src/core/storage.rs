//! Storage backends that governed operations execute against.
//!
//! Paths handed to a backend are already normalized and repo-relative (see
//! [`normalize_path`](crate::core::pattern::normalize_path)). A backend never
//! makes ownership decisions.

use crate::core::error::StorageError;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// What a storage call produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageOutput {
    Written { bytes: usize },
    Edited { replacements: usize },
    Deleted,
    Content { text: String },
    Exists { exists: bool },
    Listing { entries: Vec<String> },
}

pub trait Storage: Send + Sync {
    fn read(&self, path: &str) -> Result<String, StorageError>;

    /// Create or replace a file, creating parent directories as needed.
    fn write(&self, path: &str, content: &str) -> Result<(), StorageError>;

    fn delete(&self, path: &str) -> Result<(), StorageError>;

    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Entries directly under `dir` as repo-relative paths, sorted.
    fn list(&self, dir: &str, pattern: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// Replace every occurrence of `find`. Returns the number of replacements.
    fn edit(&self, path: &str, find: &str, replace: &str) -> Result<usize, StorageError> {
        let current = self.read(path)?;
        let replacements = count_matches(&current, find);
        if replacements == 0 {
            return Err(StorageError::MatchNotFound(path.to_string()));
        }
        self.write(path, &current.replace(find, replace))?;
        Ok(replacements)
    }
}

fn count_matches(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        0
    } else {
        haystack.matches(needle).count()
    }
}

/// Compile a file-name glob (`*`, `?`) for [`Storage::list`].
pub fn compile_name_glob(pattern: &str) -> Result<Regex, StorageError> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            '/' => {
                return Err(StorageError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "list patterns match a single file name".to_string(),
                });
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StorageError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn file_name(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

fn filter_listing(
    entries: impl IntoIterator<Item = String>,
    pattern: Option<&str>,
) -> Result<Vec<String>, StorageError> {
    let matcher = pattern.map(compile_name_glob).transpose()?;
    let mut out: Vec<String> = entries
        .into_iter()
        .filter(|rel| matcher.as_ref().is_none_or(|re| re.is_match(file_name(rel))))
        .collect();
    out.sort();
    Ok(out)
}

/// Files on disk under a fixed root directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn io_err(rel: &str, source: io::Error) -> StorageError {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(rel.to_string())
        } else {
            StorageError::Io {
                path: rel.to_string(),
                source,
            }
        }
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> Result<String, StorageError> {
        fs::read_to_string(self.resolve(path)).map_err(|e| Self::io_err(path, e))
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(path, e))?;
        }
        fs::write(&full, content).map_err(|e| Self::io_err(path, e))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if full.is_dir() {
            return Err(StorageError::Io {
                path: path.to_string(),
                source: io::Error::other("refusing to delete a directory"),
            });
        }
        fs::remove_file(full).map_err(|e| Self::io_err(path, e))
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path).exists())
    }

    fn list(&self, dir: &str, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        let full = self.resolve(dir);
        if full.is_file() {
            return Err(StorageError::NotADirectory(dir.to_string()));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| Self::io_err(dir, e))? {
            let entry = entry.map_err(|e| Self::io_err(dir, e))?;
            names.push(join_rel(dir, &entry.file_name().to_string_lossy()));
        }
        filter_listing(names, pattern)
    }
}

/// In-process storage keyed by normalized path. Directories are implied by
/// the files beneath them.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let map = files
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        Self {
            files: RwLock::new(map),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<String, StorageError> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let prefix = format!("{}/", path);
        Ok(files.contains_key(path) || files.keys().any(|k| k.starts_with(&prefix)))
    }

    fn list(&self, dir: &str, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        if !dir.is_empty() && files.contains_key(dir) {
            return Err(StorageError::NotADirectory(dir.to_string()));
        }
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let children: BTreeSet<String> = files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(|child| join_rel(dir, child))
            .collect();
        if children.is_empty() && !dir.is_empty() {
            return Err(StorageError::NotFound(dir.to_string()));
        }
        filter_listing(children, pattern)
    }

    // Read and write under one lock so concurrent edits cannot interleave.
    fn edit(&self, path: &str, find: &str, replace: &str) -> Result<usize, StorageError> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let current = files
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let replacements = count_matches(current, find);
        if replacements == 0 {
            return Err(StorageError::MatchNotFound(path.to_string()));
        }
        *current = current.replace(find, replace);
        Ok(replacements)
    }
}
