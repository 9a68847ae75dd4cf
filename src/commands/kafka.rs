use std::io::{self, Write};

use anyhow::{Context, Result};
use log::info;

use kpipe::kafka::NewTopic;
use kpipe::summary::{render_report, summarize};

use super::{KafkaCommands, LsArgs, connect};
use crate::Cli;

pub async fn execute(cmd: &KafkaCommands, cli: &Cli) -> Result<()> {
    match cmd {
        KafkaCommands::Ls(args) => list(args, cli).await,
        KafkaCommands::Create {
            topic,
            partitions,
            replicas,
            compact,
        } => {
            let mut new_topic = NewTopic {
                partitions: *partitions,
                replication_factor: *replicas,
                ..NewTopic::new(topic.clone())
            };
            if *compact {
                new_topic = new_topic.compacted();
            }
            let client = connect(cli).await?;
            client
                .create_topic(&new_topic)
                .await
                .with_context(|| format!("failed to create topic {topic}"))
        }
        KafkaCommands::Delete { topic } => {
            let client = connect(cli).await?;
            client
                .delete_topic(topic)
                .await
                .with_context(|| format!("failed to delete topic {topic}"))
        }
        KafkaCommands::Partition { topic, total } => {
            let client = connect(cli).await?;
            client
                .create_partitions(topic, *total)
                .await
                .with_context(|| format!("failed to grow {topic} to {total} partitions"))
        }
    }
}

pub async fn list(args: &LsArgs, cli: &Cli) -> Result<()> {
    let client = connect(cli).await?;
    let metadata = client
        .metadata(None)
        .await
        .context("failed to load cluster metadata")?;
    info!(
        "Cluster has {} topics on {} brokers",
        metadata.topics.len(),
        metadata.brokers.len()
    );

    let options = args.options();
    let report = summarize(client.as_ref(), &metadata, &options)
        .await
        .context("cluster summary aborted")?;

    let mut out = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
    } else {
        for line in render_report(&report, &options) {
            writeln!(out, "{line}")?;
        }
    }
    out.flush()?;
    Ok(())
}
