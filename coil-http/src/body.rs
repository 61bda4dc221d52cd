//! Message body sources and sinks.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use bytes::Bytes;

/// A message body: a byte source drained by `read` and a sink filled
/// by `write` while a body is being received.
///
/// `read` returning an empty buffer means the body is exhausted.
pub trait Body {
    /// Read up to `max` bytes from the body.
    fn read(&mut self, max: usize) -> io::Result<Bytes>;

    /// Append received bytes to the body.
    fn write(&mut self, piece: &[u8]) -> io::Result<()>;

    /// Reposition at the start, so the accumulated content can be read
    /// back.
    fn rewind(&mut self) -> io::Result<()>;

    /// Bytes left to read, when known.
    fn remaining(&self) -> Option<u64>;
}

/// In-memory body. The default body of every message.
#[derive(Default)]
pub struct MemoryBody {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryBody {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Body for MemoryBody {
    fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let end = (self.pos + max).min(self.data.len());
        let piece = Bytes::copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(piece)
    }

    fn write(&mut self, piece: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(piece);
        Ok(())
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        Some((self.data.len() - self.pos) as u64)
    }
}

/// Body backed by a file on disk.
pub struct FileBody {
    file: File,
    len: u64,
    pos: u64,
}

impl FileBody {
    pub fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file, len, pos: 0 })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Body for FileBody {
    fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; max];
        let n = self.file.read(&mut buf)?;
        buf.truncate(n);
        self.pos += n as u64;
        Ok(buf.into())
    }

    fn write(&mut self, piece: &[u8]) -> io::Result<()> {
        self.file.write_all(piece)?;
        self.len += piece.len() as u64;
        Ok(())
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.pos = 0;
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.len.saturating_sub(self.pos))
    }
}

/// Pseudo-random body of a fixed size, for bulk-transfer payloads.
/// Serves slices of one pre-generated block so reads cost no entropy.
pub struct RandomBody {
    block: Bytes,
    total: u64,
    left: u64,
}

impl RandomBody {
    pub const BLOCK_SIZE: usize = 262144;

    pub fn new(total: u64) -> Self {
        Self::with_seed(total, 0x2545f4914f6cdd1d)
    }

    pub fn with_seed(total: u64, seed: u64) -> Self {
        let mut state = seed.max(1);
        let mut block = Vec::with_capacity(Self::BLOCK_SIZE);
        while block.len() < Self::BLOCK_SIZE {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            block.extend_from_slice(&state.to_le_bytes());
        }
        block.truncate(Self::BLOCK_SIZE);
        Self {
            block: block.into(),
            total,
            left: total,
        }
    }
}

impl Body for RandomBody {
    fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let amount = (self.left.min(max as u64) as usize).min(self.block.len());
        self.left -= amount as u64;
        Ok(self.block.slice(..amount))
    }

    fn write(&mut self, _piece: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "random body is read-only",
        ))
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.left = self.total;
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_body_round_trip() {
        let mut body = MemoryBody::default();
        body.write(b"hello ").unwrap();
        body.write(b"world").unwrap();
        body.rewind().unwrap();
        assert_eq!(body.remaining(), Some(11));
        assert_eq!(&body.read(5).unwrap()[..], b"hello");
        assert_eq!(&body.read(64).unwrap()[..], b" world");
        assert!(body.read(64).unwrap().is_empty());
    }

    #[test]
    fn random_body_honors_total() {
        let mut body = RandomBody::new(1000);
        let mut total = 0;
        loop {
            let piece = body.read(300).unwrap();
            if piece.is_empty() {
                break;
            }
            total += piece.len();
        }
        assert_eq!(total, 1000);
        body.rewind().unwrap();
        assert_eq!(body.remaining(), Some(1000));
    }

    #[test]
    fn random_body_is_deterministic() {
        let mut a = RandomBody::with_seed(64, 7);
        let mut b = RandomBody::with_seed(64, 7);
        assert_eq!(a.read(64).unwrap(), b.read(64).unwrap());
    }
}
