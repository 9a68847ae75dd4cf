use anyhow::{Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use kpipe::kafka::consume;
use kpipe::kafka::types::ConsumedRecord;
use kpipe::part::{KeySource, PartBoundary};
use kpipe::position::resolve;
use kpipe::storage::{FsSink, PartSequence};

use super::{ExportCommands, ExportFsArgs, SplitKey, connect};
use crate::Cli;

const WRITER_QUEUE: usize = 1_000;

pub async fn execute(cmd: &ExportCommands, cli: &Cli) -> Result<()> {
    match cmd {
        ExportCommands::Fs(args) => export_fs(args, cli).await,
    }
}

async fn export_fs(args: &ExportFsArgs, cli: &Cli) -> Result<()> {
    let compression = args.encode.compression()?;
    let boundary = PartBoundary::new(args.part_records)?;
    let key_source = match args.split_key {
        SplitKey::MessageKey => KeySource::MessageKey,
        SplitKey::Field => KeySource::leading_field(&args.delimiter)?,
    };
    let range = resolve(&args.position.read_position())?;
    let sink = FsSink::new(&args.dir)
        .with_context(|| format!("cannot use {} as export directory", args.dir.display()))?;
    let base_name = args.base_name.clone().unwrap_or_else(|| args.topic.clone());
    let mut sequence = PartSequence::new(sink, boundary, key_source, base_name, compression);

    let client = connect(cli).await?;
    let options = args.group.consumer_options(false);
    info!(
        "Exporting {} to {} as group {}",
        args.topic,
        args.dir.display(),
        options.group_id
    );
    let mut records = consume(client, &args.topic, &range, options).await?;

    // Part files are written on a blocking thread fed through a channel
    let (tx, mut rx) = mpsc::channel::<ConsumedRecord>(WRITER_QUEUE);
    let writer = tokio::task::spawn_blocking(move || -> kpipe::Result<Vec<String>> {
        while let Some(record) = rx.blocking_recv() {
            sequence.push(&record)?;
        }
        sequence.finish()
    });

    let mut read_error = None;
    while let Some(record) = records.next().await {
        match record {
            Ok(record) => {
                if tx.send(record).await.is_err() {
                    // Writer gave up, its error is reported below
                    break;
                }
            }
            Err(e) => {
                read_error = Some(e);
                break;
            }
        }
    }
    drop(tx);

    let parts = writer.await.context("export writer task failed")??;
    if let Some(e) = read_error {
        return Err(e).context(format!("export of {} stopped early", args.topic));
    }
    for part in &parts {
        info!("Wrote {}", args.dir.join(part).display());
    }
    Ok(())
}
