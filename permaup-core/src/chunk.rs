use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Chunk size used by the storage network.
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub length: u32,
}

impl Chunk {
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub file_size: u64,
    pub chunk_size: u32,
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Never true: even an empty file gets one zero-length chunk.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Chunk> {
        self.chunks.get(idx)
    }
}

/// Split `[0, file_size)` into fixed-size chunks; the last one may be short.
/// An empty file still gets one zero-length chunk.
pub fn plan(file_size: u64, chunk_size: u32) -> Result<ChunkPlan> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be greater than zero".into()));
    }
    let step = chunk_size as u64;
    let count = file_size.div_ceil(step).max(1);
    if count > u32::MAX as u64 {
        return Err(Error::InvalidInput(format!(
            "{file_size} bytes at chunk size {chunk_size} needs {count} chunks, more than {}",
            u32::MAX
        )));
    }
    let mut chunks = Vec::with_capacity(count as usize);
    if file_size == 0 {
        chunks.push(Chunk { offset: 0, length: 0 });
    }
    let mut offset = 0u64;
    while offset < file_size {
        let length = std::cmp::min(step, file_size - offset) as u32;
        chunks.push(Chunk { offset, length });
        offset += length as u64;
    }
    Ok(ChunkPlan { file_size, chunk_size, chunks })
}

/// Same as [`plan`] for callers holding a signed size (e.g. values decoded from JSON).
pub fn plan_signed(file_size: i64, chunk_size: u32) -> Result<ChunkPlan> {
    let size = u64::try_from(file_size)
        .map_err(|_| Error::InvalidInput(format!("negative file size: {file_size}")))?;
    plan(size, chunk_size)
}

/// Seekable content behind a transaction; planned chunks are re-read on demand.
pub struct ChunkSource<R> {
    inner: R,
    size: u64,
    label: String,
}

impl ChunkSource<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(PathBuf::from(path)),
            _ => Error::Io(e),
        })?;
        let size = f.metadata()?.len();
        Ok(Self { inner: f, size, label: path.display().to_string() })
    }
}

impl ChunkSource<Cursor<Vec<u8>>> {
    pub fn from_bytes(label: &str, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { inner: Cursor::new(data), size, label: label.to_string() }
    }
}

impl<R: Read + Seek> ChunkSource<R> {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read exactly the bytes of `chunk`. A short read means the content
    /// shrank after it was planned.
    pub fn read_chunk(&mut self, chunk: &Chunk) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; chunk.length as usize];
        if chunk.length == 0 {
            return Ok(buf);
        }
        self.inner.seek(SeekFrom::Start(chunk.offset))?;
        self.inner.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::InvalidInput(format!(
                "{}: short read at offset {} ({} bytes wanted)",
                self.label, chunk.offset, chunk.length
            )),
            _ => Error::Io(e),
        })?;
        Ok(buf)
    }
}
