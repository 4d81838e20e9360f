//! Line-oriented output sink for `kt`.

use std::io::Write;

use kintail_core::{OutputSink, Record, SinkError};
use serde_json::{Map, Value};
use tracing::warn;

use crate::format::Template;

/// Where template fields come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// The record itself: `timestamp`, `message`, `logGroup`, ...
    Record,
    /// The message parsed as a JSON object.
    JsonMessage,
}

/// Renders each record through a [`Template`] and writes it as one line.
///
/// Every line is flushed so the output keeps up with a live tail. A closed
/// reader surfaces as [`SinkError::Closed`].
pub struct TemplateSink<W: Write> {
    out: W,
    template: Template,
    source: FieldSource,
    warned_non_json: bool,
    written: u64,
}

impl<W: Write> TemplateSink<W> {
    pub const fn new(out: W, template: Template, source: FieldSource) -> Self {
        Self {
            out,
            template,
            source,
            warned_non_json: false,
            written: 0,
        }
    }

    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    fn fields(&mut self, record: &Record) -> Map<String, Value> {
        if self.source == FieldSource::Record {
            return record.fields();
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&record.message) {
            return map;
        }
        if !self.warned_non_json {
            warn!(
                shard = record.shard.as_ref().map(ToString::to_string),
                "message is not a JSON object, using record fields"
            );
            self.warned_non_json = true;
        }
        record.fields()
    }
}

impl<W: Write> OutputSink for TemplateSink<W> {
    fn deliver(&mut self, record: Record) -> Result<(), SinkError> {
        let fields = self.fields(&record);
        let line = self.template.render(&fields);
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }
}
