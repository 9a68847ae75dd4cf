use std::io::{self, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::{KpipeError, Result};

/// Byte-stream compression applied to files and export parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    /// Snappy framing format.
    Snappy,
}

impl Compression {
    pub fn from_flags(gzip: bool, snappy: bool) -> Result<Self> {
        match (gzip, snappy) {
            (true, true) => Err(KpipeError::Config(
                "gzip and snappy are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(Compression::Gzip),
            (false, true) => Ok(Compression::Snappy),
            (false, false) => Ok(Compression::None),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Snappy => ".sz",
        }
    }

    pub fn writer<W: Write>(self, inner: W) -> CompressedWriter<W> {
        match self {
            Compression::None => CompressedWriter::Plain(inner),
            Compression::Gzip => {
                CompressedWriter::Gzip(GzEncoder::new(inner, flate2::Compression::default()))
            }
            Compression::Snappy => CompressedWriter::Snappy(snap::write::FrameEncoder::new(inner)),
        }
    }

    pub fn reader<'a, R: Read + Send + 'a>(self, inner: R) -> Box<dyn Read + Send + 'a> {
        match self {
            Compression::None => Box::new(inner),
            Compression::Gzip => Box::new(MultiGzDecoder::new(inner)),
            Compression::Snappy => Box::new(snap::read::FrameDecoder::new(inner)),
        }
    }
}

/// A writer that must be finished to emit the compression trailer.
pub enum CompressedWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Snappy(snap::write::FrameEncoder<W>),
}

impl<W: Write> CompressedWriter<W> {
    /// Flush all compressed data and hand back the inner writer, flushed.
    pub fn finish(self) -> io::Result<W> {
        let mut inner = match self {
            CompressedWriter::Plain(w) => w,
            CompressedWriter::Gzip(encoder) => encoder.finish()?,
            CompressedWriter::Snappy(encoder) => encoder.into_inner().map_err(|e| e.into_error())?,
        };
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressedWriter::Plain(w) => w.write(buf),
            CompressedWriter::Gzip(w) => w.write(buf),
            CompressedWriter::Snappy(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Plain(w) => w.flush(),
            CompressedWriter::Gzip(w) => w.flush(),
            CompressedWriter::Snappy(w) => w.flush(),
        }
    }
}
