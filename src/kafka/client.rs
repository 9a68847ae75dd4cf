use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use kafka_protocol::messages::fetch_request::{FetchPartition, FetchTopic};
use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::offset_commit_request::{
    OffsetCommitRequestPartition, OffsetCommitRequestTopic,
};
use kafka_protocol::messages::offset_fetch_request::OffsetFetchRequestTopic;
use kafka_protocol::messages::*;
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use kafka_protocol::records::{Compression, RecordBatchDecoder};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::connection::BrokerConnection;
use super::protocol::*;
use super::types::*;
use crate::config::ClientConfig;
use crate::error::{KpipeError, Result};
use crate::summary::WatermarkSource;

// base offset (8) + batch length (4)
const BATCH_PREFIX_LEN: usize = 12;

/// Records returned by one fetch of one partition.
#[derive(Debug, Default)]
pub struct FetchedPartition {
    pub high_watermark: i64,
    pub records: Vec<ConsumedRecord>,
}

/// Kafka client speaking the wire protocol directly.
///
/// Cluster-wide requests go to the bootstrap broker. Partition requests go to
/// the partition leader learned from the last metadata response, over one
/// lazily opened connection per broker.
pub struct KafkaClient {
    config: ClientConfig,
    bootstrap: Mutex<BrokerConnection>,
    brokers: DashMap<i32, String>,
    leaders: DashMap<(String, i32), i32>,
    connections: DashMap<i32, Arc<Mutex<BrokerConnection>>>,
}

impl KafkaClient {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let mut failures = Vec::new();
        for addr in &config.brokers {
            match BrokerConnection::connect(addr, &config.client_id, config.connect_timeout).await
            {
                Ok(conn) => {
                    info!("Connected to bootstrap broker {}", addr);
                    return Ok(Self {
                        config,
                        bootstrap: Mutex::new(conn),
                        brokers: DashMap::new(),
                        leaders: DashMap::new(),
                        connections: DashMap::new(),
                    });
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    failures.push(format!("{addr}: {e}"));
                }
            }
        }
        Err(KpipeError::BrokerUnavailable(format!(
            "no bootstrap broker reachable ({})",
            failures.join(", ")
        )))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch metadata for `topics`, or for every topic when `None`.
    pub async fn metadata(&self, topics: Option<&[String]>) -> Result<ClusterMetadata> {
        let mut request = MetadataRequest::default();
        request.topics = topics.map(|names| {
            names
                .iter()
                .map(|name| {
                    let mut topic = MetadataRequestTopic::default();
                    topic.name = Some(TopicName(StrBytes::from_string(name.clone())));
                    topic
                })
                .collect()
        });

        let mut conn = self.bootstrap.lock().await;
        let response: MetadataResponse = conn
            .send(
                ApiKey::Metadata,
                METADATA_VERSION,
                &request,
                self.config.request_timeout,
            )
            .await
            .map_err(|e| {
                KpipeError::BrokerUnavailable(format!(
                    "metadata request to {} failed: {}",
                    conn.addr(),
                    e
                ))
            })?;
        let metadata = metadata_from_response(&response, conn.addr());
        drop(conn);

        debug!(
            "Metadata: {} brokers, {} topics",
            metadata.brokers.len(),
            metadata.topics.len()
        );
        self.remember(&metadata);
        Ok(metadata)
    }

    fn remember(&self, metadata: &ClusterMetadata) {
        for broker in &metadata.brokers {
            self.brokers.insert(broker.id, broker.address());
        }
        for topic in &metadata.topics {
            for partition in &topic.partitions {
                self.leaders
                    .insert((topic.name.clone(), partition.id), partition.leader);
            }
        }
    }

    fn leader_of(&self, topic: &str, partition: i32) -> Result<i32> {
        let leader = self
            .leaders
            .get(&(topic.to_string(), partition))
            .map(|l| *l.value())
            .ok_or_else(|| {
                KpipeError::Protocol(format!("no known leader for {topic}/{partition}"))
            })?;
        if leader < 0 {
            return Err(KpipeError::Broker {
                code: 5,
                name: error_name(5),
            });
        }
        Ok(leader)
    }

    async fn broker_connection(&self, broker_id: i32) -> Result<Arc<Mutex<BrokerConnection>>> {
        if let Some(conn) = self.connections.get(&broker_id) {
            return Ok(conn.value().clone());
        }

        let addr = self
            .brokers
            .get(&broker_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| KpipeError::Protocol(format!("unknown broker id {broker_id}")))?;
        let conn = BrokerConnection::connect(
            &addr,
            &self.config.client_id,
            self.config.connect_timeout,
        )
        .await?;

        // Another task may have connected meanwhile, keep whichever landed first
        let conn = self
            .connections
            .entry(broker_id)
            .or_insert_with(|| Arc::new(Mutex::new(conn)))
            .value()
            .clone();
        Ok(conn)
    }

    async fn send_to<Req, Resp>(
        &self,
        broker_id: i32,
        api_key: ApiKey,
        api_version: i16,
        request: &Req,
        request_timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let conn = self.broker_connection(broker_id).await?;
        let mut guard = conn.lock().await;
        let result = guard
            .send(api_key, api_version, request, request_timeout)
            .await;
        drop(guard);

        if let Err(e) = &result {
            debug!("Dropping connection to broker {}: {}", broker_id, e);
            self.connections.remove(&broker_id);
        }
        result
    }

    /// Offset for `timestamp` (or one of the earliest/latest markers).
    pub async fn list_offset(
        &self,
        topic: &str,
        partition: i32,
        timestamp: i64,
        request_timeout: Duration,
    ) -> Result<i64> {
        let leader = self.leader_of(topic, partition)?;

        let mut request = ListOffsetsRequest::default();
        request.replica_id = BrokerId(-1);
        let mut list_topic = ListOffsetsTopic::default();
        list_topic.name = TopicName(StrBytes::from_string(topic.to_string()));
        let mut list_partition = ListOffsetsPartition::default();
        list_partition.partition_index = partition;
        list_partition.timestamp = timestamp;
        list_topic.partitions.push(list_partition);
        request.topics.push(list_topic);

        let response: ListOffsetsResponse = self
            .send_to(
                leader,
                ApiKey::ListOffsets,
                LIST_OFFSETS_VERSION,
                &request,
                request_timeout,
            )
            .await?;

        let result = response
            .topics
            .iter()
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition_index == partition)
            .ok_or_else(|| {
                KpipeError::Protocol(format!("no offset returned for {topic}/{partition}"))
            })?;
        check_error_code(result.error_code)?;
        Ok(result.offset)
    }

    /// Low and high watermark, both queries sharing one deadline.
    pub async fn watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<WatermarkOffsets> {
        let deadline = Instant::now() + timeout;
        let low = self
            .list_offset(topic, partition, EARLIEST_TIMESTAMP, timeout)
            .await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(KpipeError::Timeout(timeout));
        }
        let high = self
            .list_offset(topic, partition, LATEST_TIMESTAMP, remaining)
            .await?;
        Ok(WatermarkOffsets { low, high })
    }

    /// Fetch records of one partition starting at `offset`.
    pub async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_wait: Duration,
        max_bytes: i32,
    ) -> Result<FetchedPartition> {
        let leader = self.leader_of(topic, partition)?;

        let mut request = FetchRequest::default();
        request.replica_id = BrokerId(-1);
        request.max_wait_ms = max_wait.as_millis() as i32;
        request.min_bytes = 1;
        request.max_bytes = max_bytes;
        let mut fetch_topic = FetchTopic::default();
        fetch_topic.topic = TopicName(StrBytes::from_string(topic.to_string()));
        let mut fetch_partition = FetchPartition::default();
        fetch_partition.partition = partition;
        fetch_partition.fetch_offset = offset;
        fetch_partition.partition_max_bytes = max_bytes;
        fetch_topic.partitions.push(fetch_partition);
        request.topics.push(fetch_topic);

        let response: FetchResponse = self
            .send_to(
                leader,
                ApiKey::Fetch,
                FETCH_VERSION,
                &request,
                self.config.request_timeout + max_wait,
            )
            .await?;

        let data = response
            .responses
            .iter()
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition_index == partition)
            .ok_or_else(|| {
                KpipeError::Protocol(format!("no fetch data returned for {topic}/{partition}"))
            })?;
        check_error_code(data.error_code)?;

        let records = match &data.records {
            Some(bytes) => decode_records(topic, partition, offset, bytes.clone())?,
            None => Vec::new(),
        };
        debug!(
            "Fetched {} records from {}/{} at offset {}",
            records.len(),
            topic,
            partition,
            offset
        );
        Ok(FetchedPartition {
            high_watermark: data.high_watermark,
            records,
        })
    }

    pub async fn find_coordinator(&self, group_id: &str) -> Result<i32> {
        let mut request = FindCoordinatorRequest::default();
        request.key = StrBytes::from_string(group_id.to_string());
        request.key_type = 0;

        let response: FindCoordinatorResponse = self
            .bootstrap
            .lock()
            .await
            .send(
                ApiKey::FindCoordinator,
                FIND_COORDINATOR_VERSION,
                &request,
                self.config.request_timeout,
            )
            .await?;
        check_error_code(response.error_code)?;

        let node_id = response.node_id.0;
        self.brokers
            .insert(node_id, format!("{}:{}", response.host, response.port));
        debug!("Coordinator for group {} is broker {}", group_id, node_id);
        Ok(node_id)
    }

    /// Offset committed by `group_id`, `None` when the group has none.
    pub async fn committed_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>> {
        let coordinator = self.find_coordinator(group_id).await?;

        let mut request = OffsetFetchRequest::default();
        request.group_id = GroupId(StrBytes::from_string(group_id.to_string()));
        let mut fetch_topic = OffsetFetchRequestTopic::default();
        fetch_topic.name = TopicName(StrBytes::from_string(topic.to_string()));
        fetch_topic.partition_indexes = vec![partition];
        request.topics = Some(vec![fetch_topic]);

        let response: OffsetFetchResponse = self
            .send_to(
                coordinator,
                ApiKey::OffsetFetch,
                OFFSET_FETCH_VERSION,
                &request,
                self.config.request_timeout,
            )
            .await?;

        match response
            .topics
            .iter()
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition_index == partition)
        {
            Some(p) => {
                check_error_code(p.error_code)?;
                Ok((p.committed_offset >= 0).then_some(p.committed_offset))
            }
            None => Ok(None),
        }
    }

    /// Commit `(partition, next offset)` pairs for `group_id` outside of any
    /// group generation.
    pub async fn commit_offsets(
        &self,
        group_id: &str,
        topic: &str,
        offsets: &[(i32, i64)],
    ) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let coordinator = self.find_coordinator(group_id).await?;

        let mut request = OffsetCommitRequest::default();
        request.group_id = GroupId(StrBytes::from_string(group_id.to_string()));
        request.generation_id_or_member_epoch = -1;
        request.member_id = StrBytes::from_string(String::new());
        let mut commit_topic = OffsetCommitRequestTopic::default();
        commit_topic.name = TopicName(StrBytes::from_string(topic.to_string()));
        commit_topic.partitions = offsets
            .iter()
            .map(|(partition, offset)| {
                let mut p = OffsetCommitRequestPartition::default();
                p.partition_index = *partition;
                p.committed_offset = *offset;
                p
            })
            .collect();
        request.topics.push(commit_topic);

        let response: OffsetCommitResponse = self
            .send_to(
                coordinator,
                ApiKey::OffsetCommit,
                OFFSET_COMMIT_VERSION,
                &request,
                self.config.request_timeout,
            )
            .await?;

        for partition in response.topics.iter().flat_map(|t| t.partitions.iter()) {
            check_error_code(partition.error_code)
                .map_err(|e| e.for_partition(topic, partition.partition_index))?;
        }
        info!(
            "Committed {} offsets for group {} on {}",
            offsets.len(),
            group_id,
            topic
        );
        Ok(())
    }

    /// Send a request to the active controller.
    pub(crate) async fn send_to_controller<Req, Resp>(
        &self,
        api_key: ApiKey,
        api_version: i16,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let metadata = self.metadata(Some(&[])).await?;
        let controller = metadata
            .controller_id
            .ok_or_else(|| KpipeError::BrokerUnavailable("no active controller".to_string()))?;
        self.send_to(
            controller,
            api_key,
            api_version,
            request,
            self.config.request_timeout,
        )
        .await
    }
}

#[async_trait]
impl WatermarkSource for KafkaClient {
    async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<WatermarkOffsets> {
        if self.brokers.is_empty() {
            return Err(KpipeError::BrokerUnavailable(
                "no broker metadata loaded".to_string(),
            ));
        }
        self.watermarks(topic, partition, timeout)
            .await
            .map_err(|e| e.for_partition(topic, partition))
    }
}

fn metadata_from_response(response: &MetadataResponse, bootstrap_addr: &str) -> ClusterMetadata {
    let brokers: Vec<BrokerInfo> = response
        .brokers
        .iter()
        .map(|b| BrokerInfo {
            id: b.node_id.0,
            host: b.host.to_string(),
            port: b.port,
        })
        .collect();

    let topics = response
        .topics
        .iter()
        .filter_map(|topic| {
            let name = topic.name.as_ref()?.0.to_string();
            if topic.error_code != 0 {
                warn!(
                    "Metadata for topic {} carries {}",
                    name,
                    error_name(topic.error_code)
                );
            }
            let partitions = topic
                .partitions
                .iter()
                .map(|p| PartitionInfo::new(p.partition_index, p.leader_id.0))
                .collect();
            Some(TopicInfo::new(name, partitions))
        })
        .collect();

    let orig = brokers.iter().find(|b| b.address() == bootstrap_addr);
    ClusterMetadata {
        orig_broker_id: orig.map(|b| b.id),
        orig_broker_name: Some(match orig {
            Some(b) => format!("{}/{}", b.address(), b.id),
            None => format!("{bootstrap_addr}/bootstrap"),
        }),
        controller_id: (response.controller_id.0 >= 0).then_some(response.controller_id.0),
        topics,
        brokers,
    }
}

/// Decode the record batches of a fetch response, skipping records below
/// `from_offset`. A trailing partial batch is dropped.
fn decode_records(
    topic: &str,
    partition: i32,
    from_offset: i64,
    mut buf: Bytes,
) -> Result<Vec<ConsumedRecord>> {
    let mut records = Vec::new();
    while buf.len() >= BATCH_PREFIX_LEN {
        let batch_len = i32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let total = BATCH_PREFIX_LEN + batch_len.max(0) as usize;
        if batch_len <= 0 || buf.len() < total {
            break;
        }
        let mut batch = buf.split_to(total);
        let decoded = RecordBatchDecoder::decode_with_custom_compression::<
            _,
            fn(&mut Bytes, Compression) -> anyhow::Result<Bytes>,
        >(&mut batch, None)
        .map_err(KpipeError::protocol)?;

        records.extend(
            decoded
                .into_iter()
                .filter(|r| r.offset >= from_offset)
                .map(|r| ConsumedRecord {
                    topic: topic.to_string(),
                    partition,
                    offset: r.offset,
                    timestamp: r.timestamp,
                    key: r.key,
                    value: r.value,
                }),
        );
    }
    Ok(records)
}
