//! JsonClaimFile - claim 表の JSON スナップショット
//!
//! File format: one JSON object, `{"3": ["src/a.ts", "src/b.ts"], ...}`.
//! Every save replaces the whole file through a temp file + rename, so a crash
//! leaves either the old or the new snapshot on disk, never a torn one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::domain::PersistError;
use crate::ports::{ClaimMap, ClaimSnapshot};

#[derive(Debug, Clone)]
pub struct JsonClaimFile {
    path: PathBuf,
}

impl JsonClaimFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl ClaimSnapshot for JsonClaimFile {
    fn load(&self) -> Result<ClaimMap, PersistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ClaimMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(ClaimMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| PersistError::Json { line: 1, source })
    }

    fn save(&self, claims: &ClaimMap) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let body = serde_json::to_vec_pretty(claims)?;
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
