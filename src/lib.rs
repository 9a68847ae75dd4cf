//! kpipe: inspect a Kafka cluster and move records between Kafka, files and
//! standard streams.

pub mod config;
pub mod error;
pub mod kafka;
pub mod part;
pub mod position;
pub mod render;
pub mod storage;
pub mod summary;
pub mod track;

pub use error::{KpipeError, Result};
