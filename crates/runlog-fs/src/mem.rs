use std::collections::BTreeMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::{bad_pattern, FileStream, Filesystem};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type FileContents = Arc<Mutex<Vec<u8>>>;

/// An in-memory [`Filesystem`] for tests and demos. Files can be appended to
/// after they have been opened, which models an event file that is still
/// being written: open streams see the new bytes on their next read.
#[derive(Debug, Clone, Default)]
pub struct MemFilesystem {
    files: Arc<Mutex<BTreeMap<PathBuf, FileContents>>>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the file at `path`.
    pub fn write(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        lock(&self.files).insert(path.into(), Arc::new(Mutex::new(bytes.into())));
    }

    /// Appends to the file at `path`, creating it if absent. Readers that
    /// already hit end-of-file will see the new bytes.
    pub fn append(&self, path: impl Into<PathBuf>, bytes: &[u8]) {
        let mut files = lock(&self.files);
        let contents = files.entry(path.into()).or_default();
        lock(contents).extend_from_slice(bytes);
    }

    /// Removes one file. Returns whether it existed.
    pub fn remove_file(&self, path: &Path) -> bool {
        lock(&self.files).remove(path).is_some()
    }

    /// Removes every file under the directory `dir`.
    pub fn remove_dir_all(&self, dir: &Path) {
        lock(&self.files).retain(|path, _| !path.starts_with(dir));
    }
}

#[async_trait]
impl Filesystem for MemFilesystem {
    async fn find_files(&self, dir: &Path, basename_glob: &str) -> io::Result<Vec<PathBuf>> {
        let pattern = glob::Pattern::new(basename_glob).map_err(bad_pattern)?;
        let files = lock(&self.files);
        Ok(files
            .keys()
            .filter(|path| path.starts_with(dir))
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
            })
            .cloned()
            .collect())
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let files = lock(&self.files);
        Ok(files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    async fn open(&self, path: &Path) -> io::Result<Box<dyn FileStream>> {
        let files = lock(&self.files);
        match files.get(path) {
            Some(contents) => Ok(Box::new(MemFile {
                data: contents.clone(),
                pos: 0,
            })),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )),
        }
    }
}

/// A read handle over a [`MemFilesystem`] file. Reading past the current end
/// reports zero bytes rather than a hard error, like a regular file that is
/// still being appended to.
pub struct MemFile {
    data: FileContents,
    pos: u64,
}

impl AsyncRead for MemFile {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let data = lock(&this.data);
        let pos = (this.pos.min(data.len() as u64)) as usize;
        let n = (data.len() - pos).min(buf.remaining());
        buf.put_slice(&data[pos..pos + n]);
        drop(data);
        this.pos += n as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MemFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let len = lock(&this.data).len() as i64;
        let next = match position {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => this.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        this.pos = next as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}
