use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KpipeError>;

#[derive(Debug, Error)]
pub enum KpipeError {
    /// Contradictory or underspecified read range.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// A single partition's watermark query failed. Never fatal to a report.
    #[error("partition {topic}/{partition}: {message}")]
    PartitionQuery {
        topic: String,
        partition: i32,
        message: String,
    },

    /// The query capability itself is gone, nothing further can be asked.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("broker returned {name} ({code})")]
    Broker { code: i16, name: &'static str },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KpipeError {
    pub fn protocol<E: std::fmt::Display>(err: E) -> Self {
        Self::Protocol(err.to_string())
    }

    /// Message shown inline for a failed partition, without the topic/partition prefix.
    pub fn partition_message(&self) -> String {
        match self {
            Self::PartitionQuery { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Re-tag any non-fatal error as a failure of one partition.
    pub fn for_partition(self, topic: &str, partition: i32) -> Self {
        match self {
            Self::BrokerUnavailable(_) | Self::PartitionQuery { .. } => self,
            other => Self::PartitionQuery {
                topic: topic.to_string(),
                partition,
                message: other.to_string(),
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BrokerUnavailable(_))
    }
}
