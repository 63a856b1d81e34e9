use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

use runlog_core::types::{DataClass, Step, StepIndexed, SummaryMetadata, TensorValue};
use runlog_fs::Filesystem;
use runlog_io::eventfile::{EventFileError, EventFileHandle, FileOutcome, WakeAction};

use crate::compat::{event_values, MetadataStore};
use crate::reservoir::EagerReservoir;
use crate::LoadMetrics;

/// A file name contains this substring if and only if it is an event file.
pub const EVENT_FILE_INFIX: &str = "tfevents";

/// One value from a run's event files, after compatibility rewriting, with
/// the step and wall time of the enclosing event.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDatum {
    pub step: Step,
    pub wall_time: f64,
    pub tag: String,
    /// Set only on the first sighting of the tag; the accumulator's
    /// metadata table keeps the authoritative copy.
    pub metadata: Option<Arc<SummaryMetadata>>,
    /// Absent for summary shapes that were not rewritten to tensors.
    pub tensor: Option<TensorValue>,
}

impl StepIndexed for ValueDatum {
    fn step(&self) -> Step {
        self.step
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("event file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: EventFileError,
    },
}

/// A message from a run reader to its accumulator.
#[derive(Debug)]
pub enum RunMessage {
    Datum(ValueDatum),
    Error(IngestError),
    /// Barrier: acknowledged once every message before it has been
    /// processed, so that a reload pass returns only after its data is
    /// queryable.
    Flush(oneshot::Sender<()>),
}

enum RunControl {
    Reload(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Handle to the reader task for one run directory. The reader discovers the
/// run's event files, drives them in lexical filename order, and forwards
/// compatibility-rewritten values to the accumulator.
///
/// Lexical filename order is assumed to match the order the files were
/// written in; event-file names embed their creation timestamps, so this
/// holds for the common writers.
#[derive(Clone)]
pub struct RunReader {
    control: mpsc::Sender<RunControl>,
}

impl RunReader {
    /// Spawns the reader task. The returned receiver is the value stream to
    /// hand to [`RunAccumulator::spawn`]. `buf_size` of zero selects a
    /// default per-file read buffer.
    pub fn spawn(
        fs: Arc<dyn Filesystem>,
        dir: PathBuf,
        buf_size: usize,
    ) -> (RunReader, mpsc::Receiver<RunMessage>) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::channel(1);
        let task = RunReaderTask {
            fs,
            dir,
            buf_size,
            loaders: BTreeMap::new(),
            mds: MetadataStore::new(),
            out: out_tx,
            control: control_rx,
        };
        tokio::spawn(task.run());
        (RunReader { control: control_tx }, out_rx)
    }

    /// Polls the run's event files again and reads them to their current
    /// ends. Blocks until every value read in this pass has been ingested.
    /// Must not be called concurrently with itself.
    pub async fn reload(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.control.send(RunControl::Reload(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Aborts every file reader and closes their files.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.control.send(RunControl::Close(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

struct FileSlot {
    handle: EventFileHandle,
    /// Set after a fatal error. The slot stays in the map so the file
    /// handle is held open until shutdown and the file is never re-opened.
    retired: bool,
}

struct RunReaderTask {
    fs: Arc<dyn Filesystem>,
    dir: PathBuf,
    buf_size: usize,
    loaders: BTreeMap<PathBuf, FileSlot>,
    mds: MetadataStore,
    out: mpsc::Sender<RunMessage>,
    control: mpsc::Receiver<RunControl>,
}

impl RunReaderTask {
    async fn run(mut self) {
        while let Some(control) = self.control.recv().await {
            match control {
                RunControl::Reload(done) => {
                    self.reload_pass().await;
                    let _ = done.send(());
                }
                RunControl::Close(done) => {
                    self.close_all().await;
                    let _ = done.send(());
                    return;
                }
            }
        }
        self.close_all().await;
    }

    async fn reload_pass(&mut self) {
        self.ensure_loaders().await;
        let files: Vec<PathBuf> = self.loaders.keys().cloned().collect();
        for file in files {
            self.drain_file(&file).await;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.out.send(RunMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Ensures a reader exists for every event file currently in the run
    /// directory.
    async fn ensure_loaders(&mut self) {
        let files = match self.fs.list_files(&self.dir).await {
            Ok(files) => files,
            Err(err) => {
                self.send_error(IngestError::Io {
                    context: format!("listing run directory {}", self.dir.display()),
                    source: err,
                })
                .await;
                return;
            }
        };
        for path in files {
            let is_event_file = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().contains(EVENT_FILE_INFIX));
            if !is_event_file || self.loaders.contains_key(&path) {
                continue;
            }
            match self.fs.open(&path).await {
                Ok(stream) => {
                    let handle = EventFileHandle::spawn(stream, self.buf_size);
                    self.loaders.insert(
                        path,
                        FileSlot {
                            handle,
                            retired: false,
                        },
                    );
                }
                Err(err) => {
                    self.send_error(IngestError::Io {
                        context: format!("opening event file {}", path.display()),
                        source: err,
                    })
                    .await;
                }
            }
        }
    }

    /// Reads one file to its current end, forwarding values and errors.
    async fn drain_file(&mut self, file: &PathBuf) {
        let woke = match self.loaders.get(file) {
            Some(slot) if !slot.retired => slot.handle.wake(WakeAction::Resume).await,
            _ => return,
        };
        if !woke {
            self.retire(file);
            return;
        }
        loop {
            let outcome = match self.loaders.get_mut(file) {
                Some(slot) if !slot.retired => slot.handle.next_outcome().await,
                _ => return,
            };
            match outcome {
                Some(FileOutcome::Asleep) => return,
                Some(FileOutcome::Event(event)) => {
                    for value in event_values(&event, &mut self.mds) {
                        let datum = ValueDatum {
                            step: event.step,
                            wall_time: event.wall_time,
                            tag: value.tag,
                            metadata: value.metadata,
                            tensor: value.tensor,
                        };
                        if self.out.send(RunMessage::Datum(datum)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(FileOutcome::Error(err)) => {
                    let fatal = err.is_fatal();
                    self.send_error(IngestError::File {
                        path: file.display().to_string(),
                        source: err,
                    })
                    .await;
                    if fatal {
                        tracing::warn!(file = %file.display(), "retiring event file after fatal error");
                        self.retire(file);
                        return;
                    }
                }
                None => {
                    self.retire(file);
                    return;
                }
            }
        }
    }

    fn retire(&mut self, file: &PathBuf) {
        if let Some(slot) = self.loaders.get_mut(file) {
            slot.retired = true;
        }
    }

    async fn send_error(&self, err: IngestError) {
        let _ = self.out.send(RunMessage::Error(err)).await;
    }

    async fn close_all(&mut self) {
        for (_, slot) in std::mem::take(&mut self.loaders) {
            slot.handle.shutdown().await;
        }
    }
}

/// Reservoir capacity for each data class.
fn reservoir_capacity(class: DataClass) -> usize {
    match class {
        DataClass::Scalar => 1000,
        DataClass::Tensor => 100,
        DataClass::BlobSequence => 10,
        DataClass::Unknown => 10,
    }
}

/// Metadata and reservoir-sampled data for every time series within one
/// run. Reads are safe concurrently with ingestion; every accessor returns
/// copies.
#[derive(Clone)]
pub struct RunAccumulator {
    shared: Arc<AccumulatorShared>,
}

struct AccumulatorShared {
    run: String,
    metrics: Arc<LoadMetrics>,
    // One lock guards the metadata table and the reservoir map together;
    // per-reservoir mutation happens under it.
    state: Mutex<AccumulatorState>,
}

#[derive(Default)]
struct AccumulatorState {
    mds: MetadataStore,
    data: HashMap<String, EagerReservoir<ValueDatum>>,
}

impl RunAccumulator {
    /// Creates an accumulator over a run reader's value stream and spawns
    /// its consumer task. The caller is still in charge of waking the
    /// reader via [`RunReader::reload`].
    pub fn spawn(
        run: String,
        values: mpsc::Receiver<RunMessage>,
        metrics: Arc<LoadMetrics>,
    ) -> RunAccumulator {
        let shared = Arc::new(AccumulatorShared {
            run,
            metrics,
            state: Mutex::new(AccumulatorState::default()),
        });
        tokio::spawn(consume(shared.clone(), values));
        RunAccumulator { shared }
    }

    /// All tags seen in this run with their stored metadata. Tags that
    /// arrived without metadata map to `None` (and have no data).
    pub async fn list(&self) -> HashMap<String, Option<Arc<SummaryMetadata>>> {
        self.shared.state.lock().await.mds.clone()
    }

    /// The stored metadata for one tag, or `None` if the tag is unseen or
    /// was seen without metadata.
    pub async fn metadata(&self, tag: &str) -> Option<Arc<SummaryMetadata>> {
        self.shared.state.lock().await.mds.get(tag).cloned().flatten()
    }

    /// A copy of the sampled values for one tag, in step order. Empty if no
    /// data has been stored.
    pub async fn sample(&self, tag: &str) -> Vec<ValueDatum> {
        let state = self.shared.state.lock().await;
        state.data.get(tag).map(EagerReservoir::sample).unwrap_or_default()
    }

    /// The most recent non-preempted value for one tag.
    pub async fn last(&self, tag: &str) -> Option<ValueDatum> {
        let state = self.shared.state.lock().await;
        state.data.get(tag).and_then(|rsv| rsv.last().cloned())
    }
}

async fn consume(shared: Arc<AccumulatorShared>, mut values: mpsc::Receiver<RunMessage>) {
    while let Some(message) = values.recv().await {
        match message {
            RunMessage::Datum(datum) => ingest(&shared, datum).await,
            RunMessage::Error(err) => {
                shared.metrics.ingest_errors.inc();
                tracing::warn!(run = %shared.run, error = %err, "ingestion error");
            }
            RunMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn ingest(shared: &AccumulatorShared, datum: ValueDatum) {
    if datum.tensor.is_none() {
        shared.metrics.datums_skipped.inc();
        tracing::debug!(run = %shared.run, tag = %datum.tag, step = %datum.step, "skipping value with no tensor payload");
        return;
    }

    let mut state = shared.state.lock().await;
    let metadata = match state.mds.get(&datum.tag) {
        Some(stored) => stored.clone(),
        None => {
            let fresh = datum.metadata.clone();
            state.mds.insert(datum.tag.clone(), fresh.clone());
            if fresh.is_none() {
                tracing::warn!(run = %shared.run, tag = %datum.tag, "skipping tag with no metadata");
            }
            fresh
        }
    };
    let Some(metadata) = metadata else {
        shared.metrics.datums_skipped.inc();
        return;
    };

    let capacity = reservoir_capacity(metadata.data_class);
    state
        .data
        .entry(datum.tag.clone())
        .or_insert_with(|| EagerReservoir::new(capacity))
        .offer(datum);
    shared.metrics.datums_ingested.inc();
}
