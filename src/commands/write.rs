use anyhow::{Context, Result};

use kpipe::storage::streams::{ByteSink, ByteSource, pipe};
use kpipe::storage::Compression;

use super::WriteCommands;

pub async fn execute(cmd: &WriteCommands) -> Result<()> {
    let (sink, compression) = match cmd {
        WriteCommands::Stdio(encode) => (ByteSink::Stdout, encode.compression()?),
        WriteCommands::Fs { file, encode } => (ByteSink::File(file.clone()), encode.compression()?),
    };

    tokio::task::spawn_blocking(move || {
        pipe(&ByteSource::Stdin, Compression::None, &sink, compression)
    })
    .await
    .context("writer task failed")?
    .context("failed to write stdin")?;
    Ok(())
}
