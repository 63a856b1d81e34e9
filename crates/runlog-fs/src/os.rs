use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{bad_pattern, FileStream, Filesystem};

/// [`Filesystem`] backed by the native filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

#[async_trait]
impl Filesystem for OsFilesystem {
    async fn find_files(&self, dir: &Path, basename_glob: &str) -> io::Result<Vec<PathBuf>> {
        let pattern = glob::Pattern::new(basename_glob).map_err(bad_pattern)?;
        let mut pending = vec![dir.to_path_buf()];
        let mut results = Vec::new();
        while let Some(next) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&next).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if pattern.matches(&entry.file_name().to_string_lossy()) {
                    results.push(entry.path());
                }
            }
        }
        results.sort();
        Ok(results)
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                results.push(entry.path());
            }
        }
        results.sort();
        Ok(results)
    }

    async fn open(&self, path: &Path) -> io::Result<Box<dyn FileStream>> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}
