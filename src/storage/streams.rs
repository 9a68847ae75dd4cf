//! Plain byte streams for the `read` and `write` commands: stdin, stdout,
//! local files and a generator of random text lines.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use log::info;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::codec::{CompressedWriter, Compression};
use crate::error::{KpipeError, Result};

pub const DEFAULT_RANDOM_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteSource {
    Stdin,
    File(PathBuf),
    /// `lines` lines of `width` random alphanumeric characters.
    Random { lines: u64, width: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteSink {
    Stdout,
    File(PathBuf),
}

impl ByteSource {
    /// Open the source, decoding `compression` on the way.
    pub fn open(&self, compression: Compression) -> Result<Box<dyn Read + Send>> {
        Ok(match self {
            ByteSource::Stdin => compression.reader(io::stdin()),
            ByteSource::File(path) => compression.reader(BufReader::new(File::open(path)?)),
            ByteSource::Random { lines, width } => {
                if *width == 0 {
                    return Err(KpipeError::Config(
                        "random line width must be positive".to_string(),
                    ));
                }
                Box::new(RandomLines::new(*lines, *width))
            }
        })
    }
}

impl ByteSink {
    /// Open the sink, encoding `compression` on the way. The writer must be
    /// finished for the output to be complete.
    pub fn open(
        &self,
        compression: Compression,
    ) -> Result<CompressedWriter<Box<dyn Write + Send>>> {
        let inner: Box<dyn Write + Send> = match self {
            ByteSink::Stdout => Box::new(BufWriter::new(io::stdout())),
            ByteSink::File(path) => Box::new(BufWriter::new(File::create(path)?)),
        };
        Ok(compression.writer(inner))
    }
}

/// Copy everything from `source` to `sink`, returning the bytes read.
/// Blocking; run it off the async runtime.
pub fn pipe(
    source: &ByteSource,
    source_compression: Compression,
    sink: &ByteSink,
    sink_compression: Compression,
) -> Result<u64> {
    let mut reader = source.open(source_compression)?;
    let mut writer = sink.open(sink_compression)?;
    let copied = match io::copy(&mut reader, &mut writer) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            info!("Output closed");
            return Ok(0);
        }
        result => result?,
    };
    writer.finish()?;
    info!("Copied {} bytes", copied);
    Ok(copied)
}

/// Reader producing random alphanumeric lines, each newline terminated.
pub struct RandomLines {
    remaining: u64,
    width: usize,
    rng: StdRng,
    line: Vec<u8>,
    pos: usize,
}

impl RandomLines {
    pub fn new(lines: u64, width: usize) -> Self {
        Self {
            remaining: lines,
            width,
            rng: StdRng::from_entropy(),
            line: Vec::with_capacity(width + 1),
            pos: 0,
        }
    }

    fn refill(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.line.clear();
        let rng = &mut self.rng;
        self.line
            .extend((0..self.width).map(|_| rng.sample(Alphanumeric)));
        self.line.push(b'\n');
        self.pos = 0;
        true
    }
}

impl Read for RandomLines {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.line.len() && !self.refill() {
            return Ok(0);
        }
        let n = buf.len().min(self.line.len() - self.pos);
        buf[..n].copy_from_slice(&self.line[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
