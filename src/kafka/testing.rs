//! In-process broker answering the handful of requests the client sends.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_protocol::messages::create_partitions_response::CreatePartitionsTopicResult;
use kafka_protocol::messages::create_topics_response::CreatableTopicResult;
use kafka_protocol::messages::delete_topics_response::DeletableTopicResult;
use kafka_protocol::messages::fetch_response::{FetchableTopicResponse, PartitionData};
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::metadata_response::{
    MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::offset_commit_response::{
    OffsetCommitResponsePartition, OffsetCommitResponseTopic,
};
use kafka_protocol::messages::offset_fetch_response::{
    OffsetFetchResponsePartition, OffsetFetchResponseTopic,
};
use kafka_protocol::messages::*;
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub(crate) struct FakePartition {
    pub low: i64,
    pub high: i64,
    pub error_code: i16,
    pub delay: Duration,
}

impl FakePartition {
    /// A partition holding offsets `low..high`; each record's value is
    /// `"<offset>"`, its key `"k<offset>"`.
    pub fn new(low: i64, high: i64) -> Self {
        Self {
            low,
            high,
            error_code: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(mut self, error_code: i16) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeCluster {
    topics: Vec<(String, Vec<FakePartition>)>,
    committed: HashMap<(String, String, i32), i64>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, name: &str, partitions: Vec<FakePartition>) -> Self {
        self.topics.push((name.to_string(), partitions));
        self
    }

    fn partition(&self, topic: &str, partition: i32) -> Option<&FakePartition> {
        self.topics
            .iter()
            .find(|(name, _)| name == topic)
            .and_then(|(_, partitions)| partitions.get(partition as usize))
    }
}

pub(crate) struct FakeBroker {
    addr: SocketAddr,
    cluster: Arc<Mutex<FakeCluster>>,
    handle: JoinHandle<()>,
}

impl FakeBroker {
    pub const NODE_ID: i32 = 1;

    pub async fn start(cluster: FakeCluster) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cluster = Arc::new(Mutex::new(cluster));

        let shared = cluster.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let cluster = shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, addr, cluster).await;
                });
            }
        });

        Self {
            addr,
            cluster,
            handle,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let cluster = self.cluster.lock().unwrap();
        cluster
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        let cluster = self.cluster.lock().unwrap();
        cluster
            .topics
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, partitions)| partitions.len())
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    addr: SocketAddr,
    cluster: Arc<Mutex<FakeCluster>>,
) -> Result<()> {
    loop {
        let size = stream.read_i32().await? as usize;
        let mut payload = vec![0u8; size];
        stream.read_exact(&mut payload).await?;
        let mut payload = Bytes::from(payload);

        let api_key = ApiKey::try_from(payload.clone().get_i16())
            .map_err(|_| anyhow::anyhow!("unknown api key"))?;
        let api_version = payload.clone().slice(2..).get_i16();
        let header =
            RequestHeader::decode(&mut payload, api_key.request_header_version(api_version))?;

        let (body, delay) = respond(api_key, api_version, &mut payload, addr, &cluster)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut frame = BytesMut::new();
        frame.put_i32(0);
        let mut response_header = ResponseHeader::default();
        response_header.correlation_id = header.correlation_id;
        response_header.encode(&mut frame, api_key.response_header_version(api_version))?;
        frame.extend_from_slice(&body);
        let size = (frame.len() - 4) as i32;
        frame[..4].copy_from_slice(&size.to_be_bytes());

        stream.write_all(&frame).await?;
    }
}

fn encoded<R: Encodable>(response: &R, api_version: i16) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    response.encode(&mut buf, api_version)?;
    Ok(buf)
}

fn respond(
    api_key: ApiKey,
    v: i16,
    payload: &mut Bytes,
    addr: SocketAddr,
    cluster: &Mutex<FakeCluster>,
) -> Result<(BytesMut, Duration)> {
    let mut cluster = cluster.lock().unwrap();
    let mut delay = Duration::ZERO;

    let body = match api_key {
        ApiKey::Metadata => {
            let request = MetadataRequest::decode(payload, v)?;
            let wanted: Option<Vec<String>> = request.topics.map(|topics| {
                topics
                    .iter()
                    .filter_map(|t| t.name.as_ref().map(|n| n.0.to_string()))
                    .collect()
            });

            let mut response = MetadataResponse::default();
            response.controller_id = BrokerId(FakeBroker::NODE_ID);
            let mut broker = MetadataResponseBroker::default();
            broker.node_id = BrokerId(FakeBroker::NODE_ID);
            broker.host = StrBytes::from_string(addr.ip().to_string());
            broker.port = addr.port() as i32;
            response.brokers = vec![broker];

            response.topics = cluster
                .topics
                .iter()
                .filter(|(name, _)| wanted.as_ref().is_none_or(|w| w.contains(name)))
                .map(|(name, partitions)| {
                    let mut topic = MetadataResponseTopic::default();
                    topic.name = Some(TopicName(StrBytes::from_string(name.clone())));
                    topic.partitions = (0..partitions.len() as i32)
                        .map(|index| {
                            let mut partition = MetadataResponsePartition::default();
                            partition.partition_index = index;
                            partition.leader_id = BrokerId(FakeBroker::NODE_ID);
                            partition.replica_nodes = vec![BrokerId(FakeBroker::NODE_ID)];
                            partition.isr_nodes = vec![BrokerId(FakeBroker::NODE_ID)];
                            partition
                        })
                        .collect();
                    topic
                })
                .collect();
            encoded(&response, v)?
        }
        ApiKey::ListOffsets => {
            let request = ListOffsetsRequest::decode(payload, v)?;
            let mut response = ListOffsetsResponse::default();
            for topic in &request.topics {
                let mut topic_response = ListOffsetsTopicResponse::default();
                topic_response.name = topic.name.clone();
                for p in &topic.partitions {
                    let mut partition = ListOffsetsPartitionResponse::default();
                    partition.partition_index = p.partition_index;
                    match cluster.partition(&topic.name.0, p.partition_index) {
                        Some(fake) => {
                            delay = delay.max(fake.delay);
                            partition.error_code = fake.error_code;
                            partition.offset = if p.timestamp == -2 { fake.low } else { fake.high };
                        }
                        None => partition.error_code = 3,
                    }
                    partition.timestamp = -1;
                    topic_response.partitions.push(partition);
                }
                response.topics.push(topic_response);
            }
            encoded(&response, v)?
        }
        ApiKey::Fetch => {
            let request = FetchRequest::decode(payload, v)?;
            let mut response = FetchResponse::default();
            for topic in &request.topics {
                let mut topic_response = FetchableTopicResponse::default();
                topic_response.topic = topic.topic.clone();
                for p in &topic.partitions {
                    let mut data = PartitionData::default();
                    data.partition_index = p.partition;
                    match cluster.partition(&topic.topic.0, p.partition) {
                        Some(fake) if fake.error_code != 0 => data.error_code = fake.error_code,
                        Some(fake) if p.fetch_offset < fake.low || p.fetch_offset > fake.high => {
                            data.error_code = 1
                        }
                        Some(fake) => {
                            data.high_watermark = fake.high;
                            // Deliver at most 3 records per fetch
                            let end = fake.high.min(p.fetch_offset + 3);
                            if end > p.fetch_offset {
                                data.records = Some(record_batch(p.fetch_offset..end)?);
                            }
                        }
                        None => data.error_code = 3,
                    }
                    topic_response.partitions.push(data);
                }
                response.responses.push(topic_response);
            }
            encoded(&response, v)?
        }
        ApiKey::FindCoordinator => {
            FindCoordinatorRequest::decode(payload, v)?;
            let mut response = FindCoordinatorResponse::default();
            response.node_id = BrokerId(FakeBroker::NODE_ID);
            response.host = StrBytes::from_string(addr.ip().to_string());
            response.port = addr.port() as i32;
            encoded(&response, v)?
        }
        ApiKey::OffsetFetch => {
            let request = OffsetFetchRequest::decode(payload, v)?;
            let group = request.group_id.0.to_string();
            let mut response = OffsetFetchResponse::default();
            for topic in request.topics.iter().flatten() {
                let mut topic_response = OffsetFetchResponseTopic::default();
                topic_response.name = topic.name.clone();
                for partition_index in &topic.partition_indexes {
                    let mut partition = OffsetFetchResponsePartition::default();
                    partition.partition_index = *partition_index;
                    partition.committed_offset = cluster
                        .committed
                        .get(&(group.clone(), topic.name.0.to_string(), *partition_index))
                        .copied()
                        .unwrap_or(-1);
                    topic_response.partitions.push(partition);
                }
                response.topics.push(topic_response);
            }
            encoded(&response, v)?
        }
        ApiKey::OffsetCommit => {
            let request = OffsetCommitRequest::decode(payload, v)?;
            let group = request.group_id.0.to_string();
            let mut response = OffsetCommitResponse::default();
            for topic in &request.topics {
                let mut topic_response = OffsetCommitResponseTopic::default();
                topic_response.name = topic.name.clone();
                for p in &topic.partitions {
                    cluster.committed.insert(
                        (group.clone(), topic.name.0.to_string(), p.partition_index),
                        p.committed_offset,
                    );
                    let mut partition = OffsetCommitResponsePartition::default();
                    partition.partition_index = p.partition_index;
                    topic_response.partitions.push(partition);
                }
                response.topics.push(topic_response);
            }
            encoded(&response, v)?
        }
        ApiKey::CreateTopics => {
            let request = CreateTopicsRequest::decode(payload, v)?;
            let mut response = CreateTopicsResponse::default();
            for topic in &request.topics {
                let name = topic.name.0.to_string();
                let mut result = CreatableTopicResult::default();
                result.name = topic.name.clone();
                if cluster.topics.iter().any(|(n, _)| *n == name) {
                    result.error_code = 36;
                } else {
                    let count = topic.num_partitions.max(1) as usize;
                    cluster.topics.push((name, vec![FakePartition::new(0, 0); count]));
                }
                response.topics.push(result);
            }
            encoded(&response, v)?
        }
        ApiKey::DeleteTopics => {
            let request = DeleteTopicsRequest::decode(payload, v)?;
            let mut response = DeleteTopicsResponse::default();
            for name in &request.topic_names {
                let mut result = DeletableTopicResult::default();
                result.name = Some(name.clone());
                let before = cluster.topics.len();
                cluster.topics.retain(|(n, _)| *n != name.0.to_string());
                if cluster.topics.len() == before {
                    result.error_code = 3;
                }
                response.responses.push(result);
            }
            encoded(&response, v)?
        }
        ApiKey::CreatePartitions => {
            let request = CreatePartitionsRequest::decode(payload, v)?;
            let mut response = CreatePartitionsResponse::default();
            for topic in &request.topics {
                let mut result = CreatePartitionsTopicResult::default();
                result.name = topic.name.clone();
                match cluster.topics.iter_mut().find(|(n, _)| *n == topic.name.0.to_string()) {
                    Some((_, partitions)) if topic.count as usize > partitions.len() => {
                        partitions.resize(topic.count as usize, FakePartition::new(0, 0));
                    }
                    Some(_) => result.error_code = 37,
                    None => result.error_code = 3,
                }
                response.results.push(result);
            }
            encoded(&response, v)?
        }
        other => bail!("fake broker does not serve {:?}", other),
    };

    Ok((body, delay))
}

fn record_batch(offsets: std::ops::Range<i64>) -> Result<Bytes> {
    let records: Vec<Record> = offsets
        .map(|offset| Record {
            transactional: false,
            control: false,
            partition_leader_epoch: 0,
            producer_id: -1,
            producer_epoch: -1,
            timestamp_type: TimestampType::Creation,
            offset,
            sequence: -1,
            timestamp: 1_700_000_000_000 + offset,
            key: Some(Bytes::from(format!("k{offset}"))),
            value: Some(Bytes::from(offset.to_string())),
            headers: Default::default(),
        })
        .collect();

    let mut buf = BytesMut::new();
    RecordBatchEncoder::encode_with_custom_compression::<
        _,
        _,
        fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>,
    >(
        &mut buf,
        records.iter(),
        &RecordEncodeOptions {
            version: 2,
            compression: Compression::None,
        },
        None,
    )?;
    Ok(buf.freeze())
}
