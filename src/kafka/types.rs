use bytes::Bytes;
use serde::Serialize;

/// A partition and the broker currently leading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    pub id: i32,
    pub leader: i32,
}

impl PartitionInfo {
    pub fn new(id: i32, leader: i32) -> Self {
        Self { id, leader }
    }
}

/// A topic and its partitions, in the order the broker listed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

impl TopicInfo {
    pub fn new(name: impl Into<String>, partitions: Vec<PartitionInfo>) -> Self {
        Self {
            name: name.into(),
            partitions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerInfo {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read-only snapshot of cluster metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMetadata {
    /// Id of the broker that answered the metadata request, when known.
    pub orig_broker_id: Option<i32>,
    pub orig_broker_name: Option<String>,
    pub controller_id: Option<i32>,
    pub topics: Vec<TopicInfo>,
    pub brokers: Vec<BrokerInfo>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicInfo> {
        self.topics.iter().find(|t| t.name == name)
    }

    pub fn broker(&self, id: i32) -> Option<&BrokerInfo> {
        self.brokers.iter().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WatermarkOffsets {
    pub low: i64,
    pub high: i64,
}

impl WatermarkOffsets {
    pub fn message_count(&self) -> i64 {
        self.high - self.low
    }
}

/// One record read from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

/// JSON shape of a record for `read kafka --full`.
#[derive(Debug, Serialize)]
pub struct FullMessage<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl<'a> From<&'a ConsumedRecord> for FullMessage<'a> {
    fn from(record: &'a ConsumedRecord) -> Self {
        Self {
            topic: &record.topic,
            partition: record.partition,
            offset: record.offset,
            timestamp: record.timestamp,
            key: record
                .key
                .as_ref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            value: record
                .value
                .as_ref()
                .map(|v| String::from_utf8_lossy(v).into_owned()),
        }
    }
}
