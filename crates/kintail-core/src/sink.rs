//! Output sinks receive merged records one at a time.

use std::io;

use crate::record::Record;

/// Why a sink refused a record.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The consumer went away (e.g. a closed pipe). Ends the run cleanly.
    #[error("output consumer closed")]
    Closed,

    #[error("output write failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::BrokenPipe {
            Self::Closed
        } else {
            Self::Io(err)
        }
    }
}

/// Consumer of the ordered record stream.
pub trait OutputSink {
    /// Accept the next record in delivery order.
    ///
    /// # Errors
    ///
    /// [`SinkError::Closed`] when the consumer is gone, [`SinkError::Io`]
    /// for any other failure.
    fn deliver(&mut self, record: Record) -> Result<(), SinkError>;
}

impl<K: OutputSink + ?Sized> OutputSink for &mut K {
    fn deliver(&mut self, record: Record) -> Result<(), SinkError> {
        (**self).deliver(record)
    }
}

/// Collects every delivered record.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<Record>,
}

impl VecSink {
    #[must_use]
    pub fn timestamps(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.timestamp).collect()
    }
}

impl OutputSink for VecSink {
    fn deliver(&mut self, record: Record) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}

/// Accepts `limit` records, then reports the consumer as gone.
#[derive(Debug)]
pub struct LimitSink {
    limit: usize,
    pub records: Vec<Record>,
    pub rejected: usize,
}

impl LimitSink {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            records: Vec::new(),
            rejected: 0,
        }
    }
}

impl OutputSink for LimitSink {
    fn deliver(&mut self, record: Record) -> Result<(), SinkError> {
        if self.records.len() >= self.limit {
            self.rejected += 1;
            return Err(SinkError::Closed);
        }
        self.records.push(record);
        Ok(())
    }
}
