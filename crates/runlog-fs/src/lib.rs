#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! A small filesystem abstraction so the loaders can be driven by the native
//! filesystem in production and by an in-memory fake in tests.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

pub mod mem;
pub mod os;

pub use mem::MemFilesystem;
pub use os::OsFilesystem;

/// A readable, seekable stream over one file.
pub trait FileStream: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> FileStream for T {}

/// The filesystem operations the loaders need.
#[async_trait]
pub trait Filesystem: Send + Sync + 'static {
    /// Finds all files under `dir` (recursively) whose basenames match
    /// `basename_glob`. The result does not include directories; paths
    /// include the directory prefix and are sorted lexically.
    async fn find_files(&self, dir: &Path, basename_glob: &str) -> io::Result<Vec<PathBuf>>;

    /// Lists the files directly inside `dir` (non-recursive, no
    /// directories). Paths include the directory prefix and are sorted
    /// lexically.
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Opens a file for sequential reading. The file may keep growing after
    /// it has been opened; reads past the current end report zero bytes and
    /// may succeed later.
    async fn open(&self, path: &Path) -> io::Result<Box<dyn FileStream>>;
}

fn bad_pattern(err: glob::PatternError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}
