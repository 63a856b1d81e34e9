use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use runlog_core::types::Event;
use runlog_fs::FileStream;

use crate::record::{read_record, ChecksumError, ReadRecordError, Record, RecordState};

/// What a sleeping event-file reader should do when woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    /// Keep reading records from the current position.
    Resume,
    /// Discard state and exit immediately.
    Abort,
}

/// One message from an event-file reader to its owner. Messages arrive in
/// order: zero or more `Event`/`Error` outcomes, then `Asleep` once the file
/// has been read to its current end. After a fatal `Error` the reader sends
/// nothing further.
#[derive(Debug)]
pub enum FileOutcome {
    Event(Event),
    Error(EventFileError),
    Asleep,
}

#[derive(Debug, Error)]
pub enum EventFileError {
    #[error("reading record: {0}")]
    Record(#[from] ReadRecordError),
    #[error("bad data checksum: {0}")]
    Checksum(#[from] ChecksumError),
    #[error("undecodable event payload: {0}")]
    Decode(#[from] runlog_wire::ConvertError),
}

impl EventFileError {
    /// Fatal errors end reading of this file for the process lifetime; the
    /// rest skip one record and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EventFileError::Record(err) if err.is_fatal())
    }
}

/// Owner-side handle to a spawned event-file reader task.
///
/// The reader expects the file it reads to be actively written, so it dozes
/// off at end-of-file instead of exiting; wake it with
/// [`WakeAction::Resume`] once new data may have arrived.
pub struct EventFileHandle {
    wake: mpsc::Sender<WakeAction>,
    outcomes: mpsc::Receiver<FileOutcome>,
    task: JoinHandle<()>,
}

impl EventFileHandle {
    /// Spawns a reader task over `file`. `buf_size` of zero selects a
    /// default read buffer.
    pub fn spawn(file: Box<dyn FileStream>, buf_size: usize) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(1);
        let file = if buf_size == 0 {
            BufReader::new(file)
        } else {
            BufReader::with_capacity(buf_size, file)
        };
        let reader = EventFileReader {
            file,
            state: RecordState::default(),
            outcomes: out_tx,
            wake: wake_rx,
        };
        EventFileHandle {
            wake: wake_tx,
            outcomes: out_rx,
            task: tokio::spawn(reader.run()),
        }
    }

    /// Delivers a wake action. Returns false if the reader task is gone.
    pub async fn wake(&self, action: WakeAction) -> bool {
        self.wake.send(action).await.is_ok()
    }

    /// Receives the next outcome, or `None` if the reader task is gone.
    pub async fn next_outcome(&mut self) -> Option<FileOutcome> {
        self.outcomes.recv().await
    }

    /// Aborts the reader and waits for it to exit, closing its file.
    pub async fn shutdown(self) {
        let EventFileHandle {
            wake,
            outcomes,
            task,
        } = self;
        // Unblock a reader stuck on a full outcome channel before joining.
        drop(outcomes);
        let _ = wake.send(WakeAction::Abort).await;
        let _ = task.await;
    }
}

struct EventFileReader {
    file: BufReader<Box<dyn FileStream>>,
    state: RecordState,
    outcomes: mpsc::Sender<FileOutcome>,
    wake: mpsc::Receiver<WakeAction>,
}

impl EventFileReader {
    async fn run(mut self) {
        // Do nothing until the owner asks for the first read.
        loop {
            match self.wake.recv().await {
                Some(WakeAction::Resume) => {}
                Some(WakeAction::Abort) | None => return,
            }
            loop {
                match read_record(&mut self.state, &mut self.file).await {
                    Ok(record) => {
                        let outcome = match decode_record(record) {
                            Ok(event) => FileOutcome::Event(event),
                            Err(err) => FileOutcome::Error(err),
                        };
                        if self.outcomes.send(outcome).await.is_err() {
                            return;
                        }
                    }
                    Err(ReadRecordError::Truncated) => {
                        if self.outcomes.send(FileOutcome::Asleep).await.is_err() {
                            return;
                        }
                        break;
                    }
                    Err(err) => {
                        let _ = self.outcomes.send(FileOutcome::Error(err.into())).await;
                        // Fatal: emit nothing further, but keep the file
                        // handle open until the owner aborts.
                        loop {
                            match self.wake.recv().await {
                                Some(WakeAction::Abort) | None => return,
                                Some(WakeAction::Resume) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}

fn decode_record(record: Record) -> Result<Event, EventFileError> {
    record.verify_checksum()?;
    Ok(runlog_wire::decode_event(&record.data)?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;

    use runlog_core::types::{Event, EventPayload, Step, SummaryPayload, SummaryValue};
    use runlog_fs::{Filesystem, MemFilesystem};

    use super::*;
    use crate::masked_crc::MaskedCrc;

    fn scalar_event_bytes(step: i64, tag: &str, value: f32) -> Vec<u8> {
        let event = Event {
            step: Step(step),
            wall_time: 1000.0 + step as f64,
            payload: EventPayload::Summary(vec![SummaryValue {
                tag: tag.to_string(),
                metadata: None,
                payload: SummaryPayload::SimpleValue(value),
            }]),
        };
        let mut buf = Vec::new();
        Record::from_data(runlog_wire::encode_event(&event))
            .write(&mut buf)
            .unwrap();
        buf
    }

    fn bad_length_crc_bytes() -> Vec<u8> {
        let mut buf = scalar_event_bytes(0, "x", 0.0);
        buf[8] ^= 0xff;
        buf
    }

    fn bad_data_crc_bytes() -> Vec<u8> {
        let mut buf = scalar_event_bytes(0, "x", 0.0);
        let footer = buf.len() - 1;
        buf[footer] ^= 0xff;
        buf
    }

    async fn spawn_on(fs: &MemFilesystem, path: &Path) -> EventFileHandle {
        let file = fs.open(path).await.unwrap();
        EventFileHandle::spawn(file, 0)
    }

    #[tokio::test]
    async fn reads_then_sleeps_then_resumes() -> Result<()> {
        let fs = MemFilesystem::new();
        let path = Path::new("/run/events.out.tfevents.1");
        fs.write(path, scalar_event_bytes(0, "accuracy", 0.5));

        let mut handle = spawn_on(&fs, path).await;
        assert!(handle.wake(WakeAction::Resume).await);

        match handle.next_outcome().await {
            Some(FileOutcome::Event(event)) => assert_eq!(event.step, Step(0)),
            other => panic!("want event, got {other:?}"),
        }
        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Asleep)
        ));

        // The file grows while the reader sleeps.
        fs.append(path, &scalar_event_bytes(1, "accuracy", 0.75));
        assert!(handle.wake(WakeAction::Resume).await);
        match handle.next_outcome().await {
            Some(FileOutcome::Event(event)) => assert_eq!(event.step, Step(1)),
            other => panic!("want event, got {other:?}"),
        }
        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Asleep)
        ));

        // Waking with no new data yields another sleep notice.
        assert!(handle.wake(WakeAction::Resume).await);
        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Asleep)
        ));

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn bad_data_crc_skips_one_record() -> Result<()> {
        let fs = MemFilesystem::new();
        let path = Path::new("/run/events.out.tfevents.1");
        let mut bytes = bad_data_crc_bytes();
        bytes.extend_from_slice(&scalar_event_bytes(7, "accuracy", 0.9));
        fs.write(path, bytes);

        let mut handle = spawn_on(&fs, path).await;
        handle.wake(WakeAction::Resume).await;

        match handle.next_outcome().await {
            Some(FileOutcome::Error(err)) => {
                assert!(!err.is_fatal());
                assert!(matches!(err, EventFileError::Checksum(_)));
            }
            other => panic!("want non-fatal error, got {other:?}"),
        }
        match handle.next_outcome().await {
            Some(FileOutcome::Event(event)) => assert_eq!(event.step, Step(7)),
            other => panic!("want event after skipped record, got {other:?}"),
        }
        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Asleep)
        ));
        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn bad_length_crc_kills_the_file() -> Result<()> {
        let fs = MemFilesystem::new();
        let path = Path::new("/run/events.out.tfevents.1");
        let mut bytes = scalar_event_bytes(0, "accuracy", 0.5);
        bytes.extend_from_slice(&bad_length_crc_bytes());
        fs.write(path, bytes);

        let mut handle = spawn_on(&fs, path).await;
        handle.wake(WakeAction::Resume).await;

        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Event(_))
        ));
        match handle.next_outcome().await {
            Some(FileOutcome::Error(err)) => {
                assert!(err.is_fatal());
                assert!(matches!(
                    err,
                    EventFileError::Record(ReadRecordError::BadLengthCrc(_))
                ));
            }
            other => panic!("want fatal error, got {other:?}"),
        }

        // Abort is still honored after a fatal error.
        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_payload_is_nonfatal() -> Result<()> {
        let fs = MemFilesystem::new();
        let path = Path::new("/run/events.out.tfevents.1");
        // A record whose payload is valid as a frame but not as an event:
        // field 1 is declared as a double but the byte string ends early.
        let mut buf = Vec::new();
        Record::from_data(vec![0x09, 0x01]).write(&mut buf).unwrap();
        buf.extend_from_slice(&scalar_event_bytes(3, "accuracy", 0.25));
        fs.write(path, buf);

        let mut handle = spawn_on(&fs, path).await;
        handle.wake(WakeAction::Resume).await;

        match handle.next_outcome().await {
            Some(FileOutcome::Error(err)) => {
                assert!(!err.is_fatal());
                assert!(matches!(err, EventFileError::Decode(_)));
            }
            other => panic!("want decode error, got {other:?}"),
        }
        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Event(_))
        ));
        assert!(matches!(
            handle.next_outcome().await,
            Some(FileOutcome::Asleep)
        ));
        handle.shutdown().await;
        Ok(())
    }

    #[test]
    fn checksum_error_mentions_both_sums() {
        let err = ChecksumError {
            got: MaskedCrc(0x224b7fa3),
            want: MaskedCrc(0x554b7f99),
        };
        let msg = EventFileError::Checksum(err).to_string();
        assert!(msg.contains("0x224b7fa3"), "{msg}");
        assert!(msg.contains("0x554b7f99"), "{msg}");
    }
}
