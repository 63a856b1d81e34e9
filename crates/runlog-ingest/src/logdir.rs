use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::task::JoinSet;

use runlog_fs::Filesystem;

use crate::run::{RunAccumulator, RunReader};
use crate::LoadMetrics;

/// Basename pattern that identifies event files during run discovery.
const EVENT_FILE_GLOB: &str = "*tfevents*";

struct RunHandle {
    reader: RunReader,
    accumulator: RunAccumulator,
}

/// Discovers runs under a root log directory and keeps one reader and one
/// accumulator per run. Reads may proceed concurrently with a reload;
/// [`LogdirLoader::reload`] itself must not be called concurrently with
/// itself.
pub struct LogdirLoader {
    fs: Arc<dyn Filesystem>,
    logdir: PathBuf,
    read_buf_bytes: usize,
    metrics: Arc<LoadMetrics>,
    runs: RwLock<HashMap<String, RunHandle>>,
}

impl LogdirLoader {
    pub fn new(fs: Arc<dyn Filesystem>, logdir: impl Into<PathBuf>) -> Self {
        LogdirLoader {
            fs,
            logdir: logdir.into(),
            read_buf_bytes: 0,
            metrics: Arc::new(LoadMetrics::default()),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Overrides the per-file read buffer size; zero means a default.
    pub fn with_read_buf_bytes(mut self, bytes: usize) -> Self {
        self.read_buf_bytes = bytes;
        self
    }

    pub fn metrics(&self) -> Arc<LoadMetrics> {
        self.metrics.clone()
    }

    /// All current runs, keyed by name. The map is owned by the caller; the
    /// accumulators are shared handles.
    pub async fn runs(&self) -> HashMap<String, RunAccumulator> {
        let runs = self.runs.read().await;
        runs.iter()
            .map(|(name, handle)| (name.clone(), handle.accumulator.clone()))
            .collect()
    }

    /// The accumulator for one run, if it exists.
    pub async fn run(&self, name: &str) -> Option<RunAccumulator> {
        let runs = self.runs.read().await;
        runs.get(name).map(|handle| handle.accumulator.clone())
    }

    /// Polls the log directory, synchronizing the run set with what is on
    /// disk, then reloads every run in parallel. Blocks until every value
    /// read in this pass has been ingested.
    pub async fn reload(&self) {
        let started = Instant::now();
        let rundirs = match self.run_dirs().await {
            Ok(rundirs) => rundirs,
            Err(err) => {
                self.metrics.ingest_errors.inc();
                tracing::warn!(logdir = %self.logdir.display(), error = %err, "discovering runs failed");
                return;
            }
        };
        self.sync_runs(rundirs).await;

        let readers: Vec<RunReader> = {
            let runs = self.runs.read().await;
            runs.values().map(|handle| handle.reader.clone()).collect()
        };
        let mut passes = JoinSet::new();
        for reader in readers {
            passes.spawn(async move { reader.reload().await });
        }
        while passes.join_next().await.is_some() {}

        self.metrics.reload_passes.inc();
        self.metrics.reload_duration.record(started.elapsed());
    }

    /// Closes every run reader and drops the run map.
    pub async fn close(&self) {
        let mut runs = self.runs.write().await;
        for (_, handle) in runs.drain() {
            handle.reader.close().await;
        }
        self.metrics.runs_active.set(0);
    }

    /// Finds all run directories under the logdir by looking for event
    /// files. Returns run name -> directory path.
    async fn run_dirs(&self) -> std::io::Result<BTreeMap<String, PathBuf>> {
        let files = self.fs.find_files(&self.logdir, EVENT_FILE_GLOB).await?;
        let mut rundirs = BTreeMap::new();
        for file in files {
            let Some(dir) = file.parent() else { continue };
            let name = run_name(&self.logdir, dir);
            rundirs.entry(name).or_insert_with(|| dir.to_path_buf());
        }
        Ok(rundirs)
    }

    /// Synchronizes the run map with the discovered directories: removed
    /// runs are closed and dropped, new runs get a reader and accumulator.
    async fn sync_runs(&self, rundirs: BTreeMap<String, PathBuf>) {
        let mut runs = self.runs.write().await;

        let stale: Vec<String> = runs
            .keys()
            .filter(|name| !rundirs.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            if let Some(handle) = runs.remove(&name) {
                tracing::info!(run = %name, "removing run");
                handle.reader.close().await;
            }
        }

        for (name, dir) in rundirs {
            if runs.contains_key(&name) {
                continue;
            }
            tracing::info!(run = %name, dir = %dir.display(), "discovered run");
            let (reader, values) =
                RunReader::spawn(self.fs.clone(), dir, self.read_buf_bytes);
            let accumulator =
                RunAccumulator::spawn(name.clone(), values, self.metrics.clone());
            runs.insert(
                name,
                RunHandle {
                    reader,
                    accumulator,
                },
            );
        }

        self.metrics.runs_active.set(runs.len() as u64);
    }
}

/// A run's name is its directory path relative to the logdir root, with
/// forward-slash separators; the root itself is named ".".
fn run_name(root: &Path, dir: &Path) -> String {
    match dir.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            parts.join("/")
        }
        // Discovery only yields directories under the root, but fall back
        // to the full path rather than mangling it.
        Err(_) => dir.display().to_string(),
    }
}
