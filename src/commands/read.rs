use anyhow::{Context, Result};
use log::info;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use kpipe::kafka::consume;
use kpipe::kafka::types::{ConsumedRecord, FullMessage};
use kpipe::position::resolve;
use kpipe::storage::Compression;
use kpipe::storage::streams::{ByteSink, ByteSource, pipe};

use super::{ReadCommands, connect};
use crate::Cli;

pub async fn execute(cmd: &ReadCommands, cli: &Cli) -> Result<()> {
    let (source, compression) = match cmd {
        ReadCommands::Stdio(decode) => (ByteSource::Stdin, decode.compression()?),
        ReadCommands::Fs { file, decode } => (ByteSource::File(file.clone()), decode.compression()?),
        ReadCommands::Random { length, width } => (
            ByteSource::Random {
                lines: *length,
                width: *width,
            },
            Compression::None,
        ),
        ReadCommands::Kafka {
            topic,
            position,
            group,
            full,
            follow,
        } => {
            let range = resolve(&position.read_position())?;
            let client = connect(cli).await?;
            let options = group.consumer_options(*follow);
            info!("Reading {} as group {}", topic, options.group_id);
            let records = consume(client, topic, &range, options).await?;
            return print_records(records, *full).await;
        }
    };

    tokio::task::spawn_blocking(move || {
        pipe(&source, compression, &ByteSink::Stdout, Compression::None)
    })
    .await
    .context("reader task failed")?
    .context("failed to copy to stdout")?;
    Ok(())
}

async fn print_records(
    mut records: ReceiverStream<kpipe::Result<ConsumedRecord>>,
    full: bool,
) -> Result<()> {
    let mut out = BufWriter::new(tokio::io::stdout());
    let mut line = Vec::new();
    while let Some(record) = records.next().await {
        let record = record?;
        line.clear();
        if full {
            serde_json::to_writer(&mut line, &FullMessage::from(&record))?;
        } else if let Some(value) = &record.value {
            line.extend_from_slice(value);
        }
        line.push(b'\n');

        match out.write_all(&line).await {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                info!("Output closed");
                return Ok(());
            }
            result => result?,
        }
    }
    out.flush().await?;
    Ok(())
}
