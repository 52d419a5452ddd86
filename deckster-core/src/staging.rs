//! Temporary on-disk staging for uploads awaiting indexing.
//!
//! A [`StagedFile`] owns its temp file; dropping it removes the file, so
//! every exit path of an ingestion attempt cleans up.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a fresh temp file. Runs on the blocking pool.
    pub async fn stage(&self, name: &str, media_type: &str, bytes: Bytes) -> std::io::Result<StagedFile> {
        let dir = self.dir.clone();
        let suffix = format!("_{}", sanitize_file_name(name));
        let size_bytes = bytes.len() as u64;

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("deckster-")
                .suffix(&suffix)
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(StagedFile {
            file,
            name: name.to_string(),
            media_type: media_type.to_string(),
            size_bytes,
        })
    }
}

#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    pub name: String,
    pub media_type: String,
    pub size_bytes: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Keep only characters that are safe in a temp file suffix.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
