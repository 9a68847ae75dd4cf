//! Writes a record stream as a numbered sequence of parts.

use std::io::Write;

use bytes::Bytes;
use log::{debug, info};

use super::PartSink;
use super::codec::{CompressedWriter, Compression};
use crate::error::Result;
use crate::kafka::types::ConsumedRecord;
use crate::part::{KeySource, PartBoundary, PartState};

/// Routes each record's value, newline terminated, into the current part and
/// opens `<base>.<seq:05><ext>` whenever the boundary asks for a cut.
pub struct PartSequence<S: PartSink> {
    sink: S,
    boundary: PartBoundary,
    state: PartState<Option<Bytes>>,
    key_source: KeySource,
    base_name: String,
    compression: Compression,
    next_seq: u32,
    current: Option<CompressedWriter<Box<dyn Write + Send>>>,
    parts: Vec<String>,
    records: u64,
}

impl<S: PartSink> PartSequence<S> {
    pub fn new(
        sink: S,
        boundary: PartBoundary,
        key_source: KeySource,
        base_name: impl Into<String>,
        compression: Compression,
    ) -> Self {
        Self {
            sink,
            boundary,
            state: PartState::default(),
            key_source,
            base_name: base_name.into(),
            compression,
            next_seq: 0,
            current: None,
            parts: Vec::new(),
            records: 0,
        }
    }

    fn part_name(&self, seq: u32) -> String {
        format!(
            "{}.{:05}{}",
            self.base_name,
            seq,
            self.compression.extension()
        )
    }

    fn open_part(&mut self) -> Result<()> {
        let name = self.part_name(self.next_seq);
        let writer = self.sink.create(&name)?;
        debug!("Started part {}", name);
        self.current = Some(self.compression.writer(writer));
        self.parts.push(name);
        self.next_seq += 1;
        Ok(())
    }

    fn close_part(&mut self) -> Result<()> {
        if let Some(writer) = self.current.take() {
            writer.finish()?;
        }
        Ok(())
    }

    pub fn push(&mut self, record: &ConsumedRecord) -> Result<()> {
        let key = self
            .key_source
            .extract(record.key.as_ref(), record.value.as_ref());
        if self.boundary.should_cut(&mut self.state, key) {
            self.close_part()?;
        }
        if self.current.is_none() {
            self.open_part()?;
        }

        if let Some(writer) = self.current.as_mut() {
            if let Some(value) = &record.value {
                writer.write_all(value)?;
            }
            writer.write_all(b"\n")?;
        }
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Close the open part and return the names of all parts written.
    pub fn finish(mut self) -> Result<Vec<String>> {
        self.close_part()?;
        info!(
            "Wrote {} records into {} parts",
            self.records,
            self.parts.len()
        );
        Ok(self.parts)
    }
}
