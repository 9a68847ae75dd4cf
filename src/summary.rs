//! Cluster status report: per-partition watermarks for every topic.
//!
//! Topics are handled one after another. Within a topic the partition queries
//! run concurrently and land in a slot per partition, so the report keeps the
//! broker's partition order whatever order the answers arrive in.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use serde::Serialize;

use crate::error::{KpipeError, Result};
use crate::kafka::types::{BrokerInfo, ClusterMetadata, TopicInfo, WatermarkOffsets};
use crate::render::{human_number, render_seq};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Per-partition watermark lookup.
///
/// A failure of one partition is a non-fatal error, `BrokerUnavailable`
/// means no further query can succeed.
#[async_trait]
pub trait WatermarkSource: Send + Sync {
    async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<WatermarkOffsets>;
}

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    /// One line per partition instead of one rollup line per topic.
    pub all: bool,
    pub human: bool,
    pub leaders: bool,
    pub timeout: Duration,
    pub max_in_flight: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            all: false,
            human: false,
            leaders: false,
            timeout: DEFAULT_QUERY_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PartitionStatus {
    Ok { low: i64, high: i64 },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub id: i32,
    pub leader: i32,
    #[serde(flatten)]
    pub status: PartitionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicReport {
    pub name: String,
    pub partitions: Vec<PartitionReport>,
}

impl TopicReport {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Messages held by the partitions that answered. Failed partitions
    /// contribute nothing.
    pub fn total_messages(&self) -> i64 {
        self.partitions
            .iter()
            .map(|p| match p.status {
                PartitionStatus::Ok { low, high } => high - low,
                PartitionStatus::Error { .. } => 0,
            })
            .sum()
    }

    /// Partition ids grouped by leader, ordered by leader id.
    pub fn partitions_by_leader(&self) -> BTreeMap<i32, Vec<i32>> {
        let mut leaders: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for p in &self.partitions {
            leaders.entry(p.leader).or_default().push(p.id);
        }
        leaders
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig_broker_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig_broker_name: Option<String>,
    pub topics: Vec<TopicReport>,
    pub brokers: Vec<BrokerInfo>,
}

pub async fn summarize<S>(
    source: &S,
    metadata: &ClusterMetadata,
    options: &SummaryOptions,
) -> Result<ClusterReport>
where
    S: WatermarkSource + ?Sized,
{
    let mut topics = Vec::with_capacity(metadata.topics.len());
    for topic in &metadata.topics {
        topics.push(summarize_topic(source, topic, options).await?);
    }

    Ok(ClusterReport {
        orig_broker_id: metadata.orig_broker_id,
        orig_broker_name: metadata.orig_broker_name.clone(),
        topics,
        brokers: metadata.brokers.clone(),
    })
}

async fn summarize_topic<S>(
    source: &S,
    topic: &TopicInfo,
    options: &SummaryOptions,
) -> Result<TopicReport>
where
    S: WatermarkSource + ?Sized,
{
    let partition_count = topic.partitions.len();
    debug!(
        "Querying watermarks for {} ({} partitions)",
        topic.name, partition_count
    );

    let mut results = stream::iter(topic.partitions.iter().enumerate())
        .map(|(idx, partition)| async move {
            let result = source
                .query_watermarks(&topic.name, partition.id, options.timeout)
                .await;
            (idx, result)
        })
        .buffer_unordered(options.max_in_flight.max(1));

    let mut slots: Vec<Option<PartitionStatus>> = vec![None; partition_count];
    while let Some((idx, result)) = results.next().await {
        let status = match result {
            Ok(offsets) => PartitionStatus::Ok {
                low: offsets.low,
                high: offsets.high,
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}", e);
                PartitionStatus::Error {
                    message: e.partition_message(),
                }
            }
        };
        slots[idx] = Some(status);
    }

    let partitions = topic
        .partitions
        .iter()
        .zip(slots)
        .map(|(partition, slot)| {
            let status = slot.ok_or_else(|| {
                KpipeError::Protocol(format!(
                    "no result for partition {}/{}",
                    topic.name, partition.id
                ))
            })?;
            Ok(PartitionReport {
                id: partition.id,
                leader: partition.leader,
                status,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TopicReport {
        name: topic.name.clone(),
        partitions,
    })
}

/// Render the report as indented text lines.
///
/// Rollup lines count every partition but only sum the ones that answered;
/// the per-partition listing shows failures inline.
pub fn render_report(report: &ClusterReport, options: &SummaryOptions) -> Vec<String> {
    let number = |n: i64| {
        if options.human {
            human_number(n)
        } else {
            n.to_string()
        }
    };

    let mut lines = Vec::new();
    if let Some(id) = report.orig_broker_id {
        lines.push(format!("orig_broker_id: {id}"));
    }
    if let Some(name) = &report.orig_broker_name {
        lines.push(format!("orig_broker_name: {name}"));
    }

    lines.push("topics:".to_string());
    for topic in &report.topics {
        lines.push(format!("  {}:", topic.name));
        if options.all {
            for p in &topic.partitions {
                lines.push(match &p.status {
                    PartitionStatus::Ok { low, high } => format!(
                        "    {} [{} - {}] ({})",
                        p.id,
                        number(*low),
                        number(*high),
                        p.leader
                    ),
                    PartitionStatus::Error { message } => {
                        format!("    {} [ERROR] ({}) {}", p.id, p.leader, message)
                    }
                });
            }
        } else {
            lines.push(format!(
                "    {} [{}]",
                topic.partition_count(),
                number(topic.total_messages())
            ));
        }

        if options.leaders {
            let groups: Vec<String> = topic
                .partitions_by_leader()
                .iter()
                .map(|(leader, ids)| format!("{}/{}", leader, render_seq(ids)))
                .collect();
            lines.push(format!("    leaders: {}", groups.join(" ")));
        }
    }

    lines.push("brokers:".to_string());
    for broker in &report.brokers {
        lines.push(format!("  {}: {}", broker.id, broker.address()));
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::kafka::types::PartitionInfo;

    enum Answer {
        Offsets(i64, i64),
        Fail(&'static str),
        Down,
    }

    /// Answers after a per-partition delay, so completion order differs
    /// from partition order.
    struct ScriptedSource {
        answers: HashMap<(String, i32), (u64, Answer)>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                answers: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn answer(mut self, topic: &str, partition: i32, delay_ms: u64, answer: Answer) -> Self {
            self.answers
                .insert((topic.to_string(), partition), (delay_ms, answer));
            self
        }
    }

    #[async_trait]
    impl WatermarkSource for ScriptedSource {
        async fn query_watermarks(
            &self,
            topic: &str,
            partition: i32,
            _timeout: Duration,
        ) -> Result<WatermarkOffsets> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (delay, answer) = &self.answers[&(topic.to_string(), partition)];
            tokio::time::sleep(Duration::from_millis(*delay)).await;
            match answer {
                Answer::Offsets(low, high) => Ok(WatermarkOffsets {
                    low: *low,
                    high: *high,
                }),
                Answer::Fail(message) => Err(KpipeError::PartitionQuery {
                    topic: topic.to_string(),
                    partition,
                    message: message.to_string(),
                }),
                Answer::Down => Err(KpipeError::BrokerUnavailable("connection lost".to_string())),
            }
        }
    }

    fn metadata(topics: &[(&str, usize)]) -> ClusterMetadata {
        ClusterMetadata {
            orig_broker_id: Some(1),
            orig_broker_name: Some("kafka-1:9092/1".to_string()),
            controller_id: Some(1),
            topics: topics
                .iter()
                .map(|(name, count)| {
                    TopicInfo::new(
                        *name,
                        (0..*count as i32)
                            .map(|id| PartitionInfo::new(id, 1 + id % 2))
                            .collect(),
                    )
                })
                .collect(),
            brokers: vec![
                BrokerInfo {
                    id: 1,
                    host: "kafka-1".to_string(),
                    port: 9092,
                },
                BrokerInfo {
                    id: 2,
                    host: "kafka-2".to_string(),
                    port: 9092,
                },
            ],
        }
    }

    fn three_partitions_one_failing() -> ScriptedSource {
        // Partition 0 answers last, partition 2 fails first
        ScriptedSource::new()
            .answer("orders", 0, 60, Answer::Offsets(0, 100))
            .answer("orders", 1, 30, Answer::Offsets(10, 30))
            .answer("orders", 2, 5, Answer::Fail("NOT_LEADER_OR_FOLLOWER"))
    }

    #[tokio::test]
    async fn test_rollup_skips_failed_partition() {
        let source = three_partitions_one_failing();
        let options = SummaryOptions::default();
        let report = summarize(&source, &metadata(&[("orders", 3)]), &options)
            .await
            .unwrap();

        let topic = &report.topics[0];
        assert_eq!(topic.partition_count(), 3);
        assert_eq!(topic.total_messages(), 120);

        assert_eq!(
            render_report(&report, &options),
            vec![
                "orig_broker_id: 1",
                "orig_broker_name: kafka-1:9092/1",
                "topics:",
                "  orders:",
                "    3 [120]",
                "brokers:",
                "  1: kafka-1:9092",
                "  2: kafka-2:9092",
            ]
        );
    }

    #[tokio::test]
    async fn test_detailed_keeps_partition_order() {
        let source = three_partitions_one_failing();
        let options = SummaryOptions {
            all: true,
            ..Default::default()
        };
        let report = summarize(&source, &metadata(&[("orders", 3)]), &options)
            .await
            .unwrap();

        let lines = render_report(&report, &options);
        let partition_lines: Vec<&str> = lines
            .iter()
            .filter(|l| l.starts_with("    "))
            .map(String::as_str)
            .collect();
        assert_eq!(
            partition_lines,
            vec![
                "    0 [0 - 100] (1)",
                "    1 [10 - 30] (2)",
                "    2 [ERROR] (1) NOT_LEADER_OR_FOLLOWER",
            ]
        );
        assert_eq!(
            partition_lines
                .iter()
                .filter(|l| l.contains("[ERROR]"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_topics_in_broker_order() {
        let source = ScriptedSource::new()
            .answer("zeta", 0, 40, Answer::Offsets(0, 1))
            .answer("alpha", 0, 1, Answer::Offsets(0, 2))
            .answer("alpha", 1, 1, Answer::Offsets(0, 3));
        let report = summarize(
            &source,
            &metadata(&[("zeta", 1), ("alpha", 2)]),
            &SummaryOptions::default(),
        )
        .await
        .unwrap();

        let names: Vec<_> = report.topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(report.topics[1].total_messages(), 5);
    }

    #[tokio::test]
    async fn test_broker_unavailable_is_fatal() {
        let source = ScriptedSource::new()
            .answer("orders", 0, 1, Answer::Offsets(0, 10))
            .answer("orders", 1, 1, Answer::Down)
            .answer("audit", 0, 1, Answer::Offsets(0, 10));
        let err = summarize(
            &source,
            &metadata(&[("orders", 2), ("audit", 1)]),
            &SummaryOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(err.is_fatal());
        // The next topic is never queried
        assert!(source.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_in_flight_cap_of_one() {
        let source = three_partitions_one_failing();
        let options = SummaryOptions {
            all: true,
            max_in_flight: 1,
            ..Default::default()
        };
        let report = summarize(&source, &metadata(&[("orders", 3)]), &options)
            .await
            .unwrap();
        let ids: Vec<_> = report.topics[0].partitions.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_summarize_against_broker() {
        use crate::config::ClientConfig;
        use crate::kafka::KafkaClient;
        use crate::kafka::testing::{FakeBroker, FakeCluster, FakePartition};

        let broker = FakeBroker::start(FakeCluster::new().with_topic(
            "orders",
            vec![
                FakePartition::new(0, 40),
                FakePartition::new(5, 9).failing(3),
                FakePartition::new(2, 4),
            ],
        ))
        .await;
        let config = ClientConfig::from_broker_list(&broker.address()).unwrap();
        let client = KafkaClient::connect(config).await.unwrap();
        let metadata = client.metadata(None).await.unwrap();

        let options = SummaryOptions {
            all: true,
            ..Default::default()
        };
        let report = summarize(&client, &metadata, &options).await.unwrap();
        let lines = render_report(&report, &options);
        assert!(lines.contains(&"    0 [0 - 40] (1)".to_string()));
        assert!(lines.contains(
            &"    1 [ERROR] (1) broker returned UNKNOWN_TOPIC_OR_PARTITION (3)".to_string()
        ));
        assert!(lines.contains(&"    2 [2 - 4] (1)".to_string()));
        assert_eq!(report.topics[0].total_messages(), 42);
    }

    #[test]
    fn test_human_and_leaders() {
        let report = ClusterReport {
            orig_broker_id: None,
            orig_broker_name: None,
            topics: vec![TopicReport {
                name: "clicks".to_string(),
                partitions: (0..6)
                    .map(|id| PartitionReport {
                        id,
                        leader: if id < 4 { 1 } else { 2 },
                        status: PartitionStatus::Ok {
                            low: 0,
                            high: 5_000,
                        },
                    })
                    .collect(),
            }],
            brokers: vec![],
        };
        let options = SummaryOptions {
            human: true,
            leaders: true,
            ..Default::default()
        };
        assert_eq!(
            render_report(&report, &options),
            vec![
                "topics:",
                "  clicks:",
                "    6 [30.0K]",
                "    leaders: 1/0-3 2/4,5",
                "brokers:",
            ]
        );
    }

    #[test]
    fn test_json_shape() {
        let report = ClusterReport {
            orig_broker_id: None,
            orig_broker_name: None,
            topics: vec![TopicReport {
                name: "t".to_string(),
                partitions: vec![
                    PartitionReport {
                        id: 0,
                        leader: 1,
                        status: PartitionStatus::Ok { low: 1, high: 4 },
                    },
                    PartitionReport {
                        id: 1,
                        leader: 1,
                        status: PartitionStatus::Error {
                            message: "timed out after 1000ms".to_string(),
                        },
                    },
                ],
            }],
            brokers: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["topics"][0]["partitions"][0],
            serde_json::json!({"id": 0, "leader": 1, "status": "ok", "low": 1, "high": 4})
        );
        assert_eq!(json["topics"][0]["partitions"][1]["status"], "error");
        assert!(json.get("orig_broker_id").is_none());
    }
}
