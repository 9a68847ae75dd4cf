//! Part boundaries for the export path.
//!
//! A part is closed once it holds more than `max_count` records, but never in
//! the middle of a run of records sharing the same continuity key. A key that
//! never changes therefore yields a single unbounded part.

use bytes::Bytes;

use crate::error::{KpipeError, Result};

/// Per-export memory of the boundary. Owned by the caller, one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartState<K> {
    pub count: u64,
    pub last_key: Option<K>,
}

impl<K> Default for PartState<K> {
    fn default() -> Self {
        Self {
            count: 0,
            last_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PartBoundary {
    max_count: u64,
}

impl PartBoundary {
    pub fn new(max_count: u64) -> Result<Self> {
        if max_count == 0 {
            return Err(KpipeError::Config(
                "part record limit must be a positive integer".to_string(),
            ));
        }
        Ok(Self { max_count })
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Returns true when the record carrying `key` must open a new part.
    /// The record that triggers the cut is not counted toward the new part.
    pub fn should_cut<K: PartialEq>(&self, state: &mut PartState<K>, key: K) -> bool {
        state.count += 1;
        if state.count > self.max_count && state.last_key.as_ref() != Some(&key) {
            state.count = 0;
            state.last_key = None;
            return true;
        }
        state.last_key = Some(key);
        false
    }
}

/// How the continuity key is derived from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// The Kafka record key.
    MessageKey,
    /// The leading field of the record value, up to the first delimiter.
    LeadingField { delimiter: Vec<u8> },
}

impl KeySource {
    pub fn leading_field(delimiter: &str) -> Result<Self> {
        if delimiter.is_empty() {
            return Err(KpipeError::Config(
                "field key needs a non-empty delimiter".to_string(),
            ));
        }
        Ok(Self::LeadingField {
            delimiter: delimiter.as_bytes().to_vec(),
        })
    }

    pub fn extract(&self, key: Option<&Bytes>, value: Option<&Bytes>) -> Option<Bytes> {
        match self {
            KeySource::MessageKey => key.cloned(),
            KeySource::LeadingField { delimiter } => {
                let value = value?;
                let end = value
                    .windows(delimiter.len())
                    .position(|w| w == delimiter.as_slice())
                    .unwrap_or(value.len());
                Some(value.slice(..end))
            }
        }
    }
}
