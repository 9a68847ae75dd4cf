//! Turns a resolved range into a stream of records.
//!
//! Partitions are read one fetch at a time in round-robin order. Without
//! `follow`, a partition is done once it reaches the high watermark seen at
//! start; the whole read stops once `count` records were delivered.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::client::KafkaClient;
use super::protocol::{EARLIEST_TIMESTAMP, LATEST_TIMESTAMP};
use super::types::ConsumedRecord;
use crate::error::{KpipeError, Result};
use crate::position::{Offset, OffsetSymbol, ResolvedRange};

const CHANNEL_SIZE: usize = 1_000;
const DEFAULT_MAX_BYTES: i32 = 1_048_576;

/// Random consumer group id, `kpipe-` followed by six characters.
pub fn random_group_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("kpipe-{suffix}")
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub group_id: String,
    /// Commit the next offset of every partition read once the read ends.
    pub commit: bool,
    /// Keep polling past the high watermark.
    pub follow: bool,
    pub max_wait: Duration,
    pub max_bytes: i32,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            group_id: random_group_id(),
            commit: false,
            follow: false,
            max_wait: Duration::from_millis(500),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    partition: i32,
    next_offset: i64,
    stop_at: Option<i64>,
    started_at: i64,
}

impl Cursor {
    fn done(&self) -> bool {
        self.stop_at.is_some_and(|end| self.next_offset >= end)
    }
}

/// Start consuming `topic` over `range`. Start offsets are resolved before
/// this returns; records then arrive through the stream, followed by at most
/// one error.
pub async fn consume(
    client: Arc<KafkaClient>,
    topic: &str,
    range: &ResolvedRange,
    options: ConsumerOptions,
) -> Result<ReceiverStream<Result<ConsumedRecord>>> {
    let metadata = client.metadata(Some(&[topic.to_string()])).await?;
    let info = metadata
        .topic(topic)
        .filter(|t| !t.partitions.is_empty())
        .ok_or_else(|| KpipeError::Config(format!("unknown topic {topic}")))?;

    let partitions: Vec<i32> = match range.partition {
        Some(p) if info.partitions.iter().any(|i| i.id == p) => vec![p],
        Some(p) => {
            return Err(KpipeError::Config(format!(
                "topic {topic} has no partition {p}"
            )));
        }
        None => info.partitions.iter().map(|p| p.id).collect(),
    };

    let mut cursors = Vec::with_capacity(partitions.len());
    for partition in partitions {
        cursors.push(open_cursor(&client, topic, partition, range.offset, &options).await?);
    }

    let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
    let topic = topic.to_string();
    let count = range.count;
    tokio::spawn(async move {
        if let Err(e) = run(&client, &topic, cursors, count, &options, &tx).await {
            let _ = tx.send(Err(e)).await;
        }
    });

    Ok(ReceiverStream::new(rx))
}

/// Pull `offset` into `low..=high`. Truncation between the two watermark
/// queries can leave `low > high`, in which case `high` wins.
fn bounded(offset: i64, low: i64, high: i64) -> i64 {
    offset.max(low).min(high)
}

async fn open_cursor(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    offset: Option<Offset>,
    options: &ConsumerOptions,
) -> Result<Cursor> {
    let timeout = client.config().request_timeout;
    let low = client
        .list_offset(topic, partition, EARLIEST_TIMESTAMP, timeout)
        .await?;
    let high = client
        .list_offset(topic, partition, LATEST_TIMESTAMP, timeout)
        .await?;

    let start = match offset {
        Some(Offset::Numeric(n)) => bounded(n, low, high),
        Some(Offset::Symbolic(OffsetSymbol::Earliest | OffsetSymbol::Beginning)) => low,
        Some(Offset::Symbolic(OffsetSymbol::Latest | OffsetSymbol::End)) => high,
        Some(Offset::Symbolic(OffsetSymbol::Stored)) | None => client
            .committed_offset(&options.group_id, topic, partition)
            .await?
            .map_or(high, |committed| bounded(committed, low, high)),
    };

    debug!(
        "Reading {}/{} from {} (watermarks {} - {})",
        topic, partition, start, low, high
    );
    Ok(Cursor {
        partition,
        next_offset: start,
        stop_at: (!options.follow).then_some(high),
        started_at: start,
    })
}

async fn run(
    client: &KafkaClient,
    topic: &str,
    mut cursors: Vec<Cursor>,
    count: Option<u64>,
    options: &ConsumerOptions,
    tx: &mpsc::Sender<Result<ConsumedRecord>>,
) -> Result<()> {
    let mut remaining = count;
    let mut delivered: u64 = 0;

    'outer: while remaining != Some(0) && cursors.iter().any(|c| !c.done()) {
        for cursor in cursors.iter_mut().filter(|c| !c.done()) {
            let fetched = client
                .fetch(
                    topic,
                    cursor.partition,
                    cursor.next_offset,
                    options.max_wait,
                    options.max_bytes,
                )
                .await?;

            // Compaction or aborted transactions can leave gaps up to the watermark
            if fetched.records.is_empty() {
                if let Some(end) = cursor.stop_at {
                    debug!(
                        "Nothing left below {} on {}/{}",
                        end, topic, cursor.partition
                    );
                    cursor.next_offset = end;
                }
                continue;
            }

            for record in fetched.records {
                if cursor.done() || remaining == Some(0) {
                    break;
                }
                cursor.next_offset = record.offset + 1;
                if tx.send(Ok(record)).await.is_err() {
                    debug!("Record stream dropped, stopping consumer");
                    break 'outer;
                }
                delivered += 1;
                remaining = remaining.map(|r| r - 1);
            }

            if remaining == Some(0) {
                break;
            }
        }
    }

    info!("Consumed {} records from {}", delivered, topic);

    if options.commit {
        let offsets: Vec<(i32, i64)> = cursors
            .iter()
            .filter(|c| c.next_offset != c.started_at)
            .map(|c| (c.partition, c.next_offset))
            .collect();
        if let Err(e) = client
            .commit_offsets(&options.group_id, topic, &offsets)
            .await
        {
            warn!("Failed to commit offsets for {}: {}", options.group_id, e);
            return Err(e);
        }
    }
    Ok(())
}
