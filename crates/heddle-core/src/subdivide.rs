//! TaskSubdivider - 大きなタスクを独立したサブタスクに分割
//!
//! Pure function over `(description, files)`; it never looks at pool state.
//!
//! 1. Files are grouped by parent directory, in order of first appearance.
//! 2. Several groups: one subtask per group, labelled with the directory.
//! 3. One group larger than `max_files`: chunks of `chunk_size`, labelled
//!    `Part 1`, `Part 2`, ...
//! 4. Otherwise: a single subtask with the original description.

use serde::Serialize;
use thiserror::Error;

use crate::domain::{Priority, TaskSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubdivideError {
    #[error("cannot subdivide a task with no files")]
    EmptyFileList,

    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubdivideOptions {
    /// A lone directory group larger than this is split.
    pub max_files: usize,
    pub chunk_size: usize,
}

impl Default for SubdivideOptions {
    fn default() -> Self {
        Self {
            max_files: 3,
            chunk_size: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subtask {
    pub description: String,
    pub files: Vec<String>,
    pub priority: Priority,
}

impl Subtask {
    fn new(description: String, files: Vec<String>) -> Self {
        Self {
            description,
            files,
            priority: Priority::Normal,
        }
    }

    pub fn into_spec(self, payload: serde_json::Value) -> TaskSpec {
        TaskSpec::new(self.description, self.files)
            .with_priority(self.priority)
            .with_payload(payload)
    }
}

pub fn subdivide(description: &str, files: &[String]) -> Result<Vec<Subtask>, SubdivideError> {
    subdivide_with(description, files, SubdivideOptions::default())
}

pub fn subdivide_with(
    description: &str,
    files: &[String],
    options: SubdivideOptions,
) -> Result<Vec<Subtask>, SubdivideError> {
    if options.chunk_size == 0 {
        return Err(SubdivideError::ZeroChunkSize);
    }

    let groups = group_by_directory(files);
    if groups.is_empty() {
        return Err(SubdivideError::EmptyFileList);
    }

    if groups.len() > 1 {
        return Ok(groups
            .into_iter()
            .map(|(dir, files)| Subtask::new(format!("{description} ({dir})"), files))
            .collect());
    }

    let Some((_, files)) = groups.into_iter().next() else {
        return Err(SubdivideError::EmptyFileList);
    };
    if files.len() <= options.max_files {
        return Ok(vec![Subtask::new(description.to_string(), files)]);
    }

    Ok(files
        .chunks(options.chunk_size)
        .enumerate()
        .map(|(i, chunk)| Subtask::new(format!("{description} (Part {})", i + 1), chunk.to_vec()))
        .collect())
}

/// `(directory, files)` in first-appearance order. Duplicates and blank paths
/// are dropped. Top-level files group under `"."`.
fn group_by_directory(files: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for file in files {
        let file = file.trim();
        if file.is_empty() {
            continue;
        }
        let dir = match file.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir,
            _ => ".",
        };
        let idx = match groups.iter().position(|(d, _)| d == dir) {
            Some(idx) => idx,
            None => {
                groups.push((dir.to_string(), Vec::new()));
                groups.len() - 1
            }
        };
        let members = &mut groups[idx].1;
        if !members.iter().any(|f| f == file) {
            members.push(file.to_string());
        }
    }
    groups
}
