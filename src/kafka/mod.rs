pub mod admin;
pub mod client;
pub(crate) mod connection;
pub mod consumer;
pub(crate) mod protocol;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::NewTopic;
pub use client::{FetchedPartition, KafkaClient};
pub use consumer::{ConsumerOptions, consume, random_group_id};
pub use types::*;
