//! Positional byte access to an opened container
//!
//! The decoder never touches the file system itself; it asks a [`ByteSource`]
//! for the bytes of one atom or one frame at a time.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Random-access reader over a container
pub trait ByteSource: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Returns true if the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `offset` into a new buffer
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Human-readable origin, for logging
    fn describe(&self) -> String {
        format!("{} byte source", self.len())
    }
}

fn out_of_bounds(offset: u64, len: usize, total: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "read of {} bytes at {} exceeds source length {}",
            len, offset, total
        ),
    )
}

/// Container held in memory, such as an asset loaded by the host
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    /// Wrap a shared buffer
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// The whole buffer
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset).ok();
        let range = start.and_then(|s| Some(s..s.checked_add(buf.len())?));
        match range.and_then(|r| self.data.get(r)) {
            Some(bytes) => {
                buf.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(out_of_bounds(offset, buf.len(), self.len()).into()),
        }
    }

    fn describe(&self) -> String {
        format!("in-memory asset ({} bytes)", self.data.len())
    }
}

/// Container read from a file with buffered positional reads
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    reader: Mutex<BufReader<File>>,
    len: u64,
}

impl FileSource {
    /// Open a file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            reader: Mutex::new(BufReader::new(file)),
            len,
        })
    }

    /// Path of the opened file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(out_of_bounds(offset, buf.len(), self.len).into());
        }

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
