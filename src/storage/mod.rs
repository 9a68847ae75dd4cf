pub mod codec;
pub mod sequence;
pub mod streams;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;

pub use codec::{CompressedWriter, Compression};
pub use sequence::PartSequence;

/// Where export parts are written.
pub trait PartSink: Send {
    /// Open a new, empty part called `name`.
    fn create(&mut self, name: &str) -> Result<Box<dyn Write + Send>>;
}

/// Parts as files in one local directory.
pub struct FsSink {
    dir: PathBuf,
}

impl FsSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PartSink for FsSink {
    fn create(&mut self, name: &str) -> Result<Box<dyn Write + Send>> {
        let path = self.dir.join(name);
        debug!("Opening part {}", path.display());
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}
