//! Output records and the sinks they are appended to.
//!
//! Each engine emits its own record type; [`OutputRecord`] unifies them so a
//! sink or runner can handle any engine.

use crate::core::hopping::WindowResult;
use crate::core::sliding::SlidingResult;
use crate::core::snapshot::SnapshotResult;
use crate::source::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A record produced by any engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum OutputRecord {
    Hopping(WindowResult),
    Sliding(SlidingResult),
    CrossSectional(SnapshotResult),
}

impl OutputRecord {
    pub fn key(&self) -> &str {
        match self {
            OutputRecord::Hopping(r) => &r.key,
            OutputRecord::Sliding(r) => &r.key,
            OutputRecord::CrossSectional(r) => &r.key,
        }
    }

    pub fn time(&self) -> Timestamp {
        match self {
            OutputRecord::Hopping(r) => r.time,
            OutputRecord::Sliding(r) => r.time,
            OutputRecord::CrossSectional(r) => r.time,
        }
    }
}

impl From<WindowResult> for OutputRecord {
    fn from(r: WindowResult) -> Self {
        OutputRecord::Hopping(r)
    }
}

impl From<SlidingResult> for OutputRecord {
    fn from(r: SlidingResult) -> Self {
        OutputRecord::Sliding(r)
    }
}

impl From<SnapshotResult> for OutputRecord {
    fn from(r: SnapshotResult) -> Self {
        OutputRecord::CrossSectional(r)
    }
}

/// Errors raised while appending to a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only destination for output records.
pub trait OutputSink {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError>;

    fn append_all<I>(&mut self, records: I) -> Result<(), SinkError>
    where
        I: IntoIterator,
        I::Item: Into<OutputRecord>,
        Self: Sized,
    {
        for record in records {
            self.append(record.into())?;
        }
        Ok(())
    }
}

impl OutputSink for Vec<OutputRecord> {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        self.push(record);
        Ok(())
    }
}

/// In-memory sink that any number of clones may append to concurrently.
///
/// Readers consume incrementally by keeping a cursor and calling
/// [`SharedSink::read_from`].
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    records: Arc<Mutex<Vec<OutputRecord>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutputRecord>> {
        // Appends are single pushes, so a poisoned vector is still intact.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records appended at or after `cursor`.
    pub fn read_from(&self, cursor: usize) -> Vec<OutputRecord> {
        let records = self.lock();
        records.get(cursor..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Copy of every record appended so far.
    pub fn snapshot(&self) -> Vec<OutputRecord> {
        self.read_from(0)
    }
}

impl OutputSink for SharedSink {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        self.lock().push(record);
        Ok(())
    }
}

/// Sink writing one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for JsonLinesSink<W> {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }
}
