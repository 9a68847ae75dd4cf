//! Topic administration, always addressed to the active controller.

use std::time::Duration;

use kafka_protocol::messages::create_partitions_request::CreatePartitionsTopic;
use kafka_protocol::messages::create_topics_request::{CreatableTopic, CreateableTopicConfig};
use kafka_protocol::messages::*;
use kafka_protocol::protocol::StrBytes;
use log::info;

use super::client::KafkaClient;
use super::protocol::*;
use crate::error::Result;

// Admin requests carry their timeout as i32 milliseconds
fn timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    pub configs: Vec<(String, String)>,
}

impl NewTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication_factor: 1,
            configs: Vec::new(),
        }
    }

    /// Log compaction instead of time based deletion.
    pub fn compacted(mut self) -> Self {
        self.configs
            .push(("cleanup.policy".to_string(), "compact".to_string()));
        self
    }
}

impl KafkaClient {
    pub async fn create_topic(&self, topic: &NewTopic) -> Result<()> {
        let mut creatable = CreatableTopic::default();
        creatable.name = TopicName(StrBytes::from_string(topic.name.clone()));
        creatable.num_partitions = topic.partitions;
        creatable.replication_factor = topic.replication_factor;
        creatable.configs = topic
            .configs
            .iter()
            .map(|(name, value)| {
                let mut config = CreateableTopicConfig::default();
                config.name = StrBytes::from_string(name.clone());
                config.value = Some(StrBytes::from_string(value.clone()));
                config
            })
            .collect();

        let mut request = CreateTopicsRequest::default();
        request.timeout_ms = timeout_ms(self.config().request_timeout);
        request.topics.push(creatable);

        let response: CreateTopicsResponse = self
            .send_to_controller(ApiKey::CreateTopics, CREATE_TOPICS_VERSION, &request)
            .await?;
        for result in &response.topics {
            check_error_code(result.error_code)?;
        }
        info!(
            "Created topic {} ({} partitions, replication {})",
            topic.name, topic.partitions, topic.replication_factor
        );
        Ok(())
    }

    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let mut request = DeleteTopicsRequest::default();
        request.timeout_ms = timeout_ms(self.config().request_timeout);
        request.topic_names = vec![TopicName(StrBytes::from_string(name.to_string()))];

        let response: DeleteTopicsResponse = self
            .send_to_controller(ApiKey::DeleteTopics, DELETE_TOPICS_VERSION, &request)
            .await?;
        for result in &response.responses {
            check_error_code(result.error_code)?;
        }
        info!("Deleted topic {}", name);
        Ok(())
    }

    /// Grow `name` to `total` partitions.
    pub async fn create_partitions(&self, name: &str, total: i32) -> Result<()> {
        let mut topic = CreatePartitionsTopic::default();
        topic.name = TopicName(StrBytes::from_string(name.to_string()));
        topic.count = total;
        topic.assignments = None;

        let mut request = CreatePartitionsRequest::default();
        request.timeout_ms = timeout_ms(self.config().request_timeout);
        request.topics.push(topic);

        let response: CreatePartitionsResponse = self
            .send_to_controller(ApiKey::CreatePartitions, CREATE_PARTITIONS_VERSION, &request)
            .await?;
        for result in &response.results {
            check_error_code(result.error_code)?;
        }
        info!("Topic {} now has {} partitions", name, total);
        Ok(())
    }
}
