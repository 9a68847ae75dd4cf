use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use kpipe::config::ClientConfig;
use kpipe::kafka::{ConsumerOptions, KafkaClient, random_group_id};
use kpipe::position::{Offset, ReadPosition};
use kpipe::storage::Compression;
use kpipe::storage::streams::DEFAULT_RANDOM_WIDTH;
use kpipe::summary::{DEFAULT_MAX_IN_FLIGHT, SummaryOptions};

use crate::Cli;

pub mod export;
pub mod kafka;
pub mod read;
pub mod write;

pub const ROLLUP_NOTE: &str = "Rollup lines count every partition but only sum the partitions \
that answered. Use --all to see failed partitions as [ERROR] lines.";

#[derive(Subcommand, Clone)]
pub enum KafkaCommands {
    /// List topics with their partition watermarks
    #[command(alias = "status", after_help = ROLLUP_NOTE)]
    Ls(LsArgs),
    /// Create a topic
    Create {
        topic: String,
        #[arg(short, long, default_value = "1")]
        partitions: i32,
        #[arg(short, long, default_value = "1")]
        replicas: i16,
        /// Compact the log instead of expiring it
        #[arg(long)]
        compact: bool,
    },
    /// Delete a topic
    Delete { topic: String },
    /// Grow a topic to a total number of partitions
    Partition { topic: String, total: i32 },
}

#[derive(Args, Clone)]
pub struct LsArgs {
    /// One line per partition
    #[arg(short, long)]
    pub all: bool,
    /// Abbreviate offsets and totals (12.3K)
    #[arg(short = 'H', long)]
    pub human: bool,
    /// Show partition leaders per topic
    #[arg(long)]
    pub leaders: bool,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
    /// Per-partition query timeout in milliseconds
    #[arg(long, default_value = "1000")]
    pub timeout: u64,
    /// Partition queries in flight per topic
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,
}

impl LsArgs {
    pub fn options(&self) -> SummaryOptions {
        SummaryOptions {
            all: self.all,
            human: self.human,
            leaders: self.leaders,
            timeout: Duration::from_millis(self.timeout),
            max_in_flight: self.max_in_flight,
        }
    }
}

#[derive(Args, Clone)]
pub struct PositionArgs {
    /// Partition to read, all partitions when absent
    #[arg(short, long)]
    pub partition: Option<i32>,
    /// Numeric offset or one of stored, latest, earliest, beginning, end
    #[arg(short, long)]
    pub offset: Option<Offset>,
    /// Stop before this offset (needs a numeric --offset)
    #[arg(short, long, conflicts_with = "count")]
    pub end: Option<i64>,
    /// Number of records to read
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
}

impl PositionArgs {
    pub fn read_position(&self) -> ReadPosition {
        ReadPosition {
            partition: self.partition,
            offset: self.offset,
            end: self.end,
            count: self.count,
        }
    }
}

#[derive(Args, Clone)]
pub struct GroupArgs {
    /// Consumer group, random kpipe-xxxxxx when absent
    #[arg(short, long)]
    pub group_id: Option<String>,
    /// Commit the read offsets for the group
    #[arg(long)]
    pub commit: bool,
}

impl GroupArgs {
    pub fn consumer_options(&self, follow: bool) -> ConsumerOptions {
        ConsumerOptions {
            group_id: self.group_id.clone().unwrap_or_else(random_group_id),
            commit: self.commit,
            follow,
            ..Default::default()
        }
    }
}

#[derive(Args, Clone)]
pub struct DecodeArgs {
    /// Input is gzip compressed
    #[arg(short = 'z', long)]
    pub gunzip: bool,
    /// Input is snappy (framed) compressed
    #[arg(long, conflicts_with = "gunzip")]
    pub snappy: bool,
}

#[derive(Args, Clone)]
pub struct EncodeArgs {
    /// Gzip the output
    #[arg(short = 'z', long)]
    pub gzip: bool,
    /// Snappy (framed) compress the output
    #[arg(long, conflicts_with = "gzip")]
    pub snappy: bool,
}

#[derive(Subcommand, Clone)]
pub enum ReadCommands {
    /// Read stdin
    Stdio(DecodeArgs),
    /// Read a local file
    Fs {
        file: PathBuf,
        #[command(flatten)]
        decode: DecodeArgs,
    },
    /// Generate random text lines
    Random {
        /// Number of lines
        length: u64,
        /// Characters per line
        #[arg(long, default_value_t = DEFAULT_RANDOM_WIDTH)]
        width: usize,
    },
    /// Read records of a topic
    Kafka {
        topic: String,
        #[command(flatten)]
        position: PositionArgs,
        #[command(flatten)]
        group: GroupArgs,
        /// Print each record as JSON with its metadata
        #[arg(long)]
        full: bool,
        /// Keep waiting for new records
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum WriteCommands {
    /// Write to stdout
    Stdio(EncodeArgs),
    /// Write to a local file
    Fs {
        file: PathBuf,
        #[command(flatten)]
        encode: EncodeArgs,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitKey {
    /// The record key
    MessageKey,
    /// The leading field of the record value
    Field,
}

#[derive(Subcommand, Clone)]
pub enum ExportCommands {
    /// Export into a local directory
    Fs(ExportFsArgs),
}

#[derive(Args, Clone)]
pub struct ExportFsArgs {
    pub dir: PathBuf,
    pub topic: String,
    #[command(flatten)]
    pub position: PositionArgs,
    #[command(flatten)]
    pub group: GroupArgs,
    /// Part file prefix, the topic name when absent
    #[arg(long)]
    pub base_name: Option<String>,
    /// Records per part before a cut is allowed
    #[arg(long, default_value = "100000")]
    pub part_records: u64,
    /// Records sharing this key never straddle two parts
    #[arg(long, value_enum, default_value = "message-key")]
    pub split_key: SplitKey,
    /// Field delimiter for --split-key field
    #[arg(long, default_value = ",")]
    pub delimiter: String,
    #[command(flatten)]
    pub encode: EncodeArgs,
}

impl DecodeArgs {
    pub fn compression(&self) -> Result<Compression> {
        Ok(Compression::from_flags(self.gunzip, self.snappy)?)
    }
}

impl EncodeArgs {
    pub fn compression(&self) -> Result<Compression> {
        Ok(Compression::from_flags(self.gzip, self.snappy)?)
    }
}

pub fn client_config(cli: &Cli) -> Result<ClientConfig> {
    let config = ClientConfig::from_broker_list(&cli.brokers)
        .context("invalid --broker list")?
        .with_client_id(cli.client_id.clone());
    Ok(config)
}

pub async fn connect(cli: &Cli) -> Result<Arc<KafkaClient>> {
    let config = client_config(cli)?;
    let client = KafkaClient::connect(config)
        .await
        .with_context(|| format!("cannot reach brokers {}", cli.brokers))?;
    Ok(Arc::new(client))
}
