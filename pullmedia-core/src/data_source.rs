//! Random-access byte providers consumed by extractors

use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Size reported when a source cannot tell how large it is
pub const UNKNOWN_SIZE: u64 = u64::MAX;

/// Uniform byte-range read contract for files, sockets and devices
pub trait DataSource: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`; returns the count read,
    /// zero at end of data
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MediaResult<usize>;

    /// Total size in bytes, or [`UNKNOWN_SIZE`]
    fn size(&self) -> MediaResult<u64>;

    /// Fill `buf` completely or fail with [`MediaError::ShortRead`]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> MediaResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(MediaError::ShortRead {
                    offset,
                    expected: buf.len(),
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }
}

impl<D: DataSource + ?Sized> DataSource for std::sync::Arc<D> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MediaResult<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> MediaResult<u64> {
        (**self).size()
    }
}

/// File-backed data source
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    /// Open a file for random access
    pub fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl DataSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MediaResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn size(&self) -> MediaResult<u64> {
        Ok(self.size)
    }
}

/// In-memory data source
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    report_size: bool,
}

impl MemorySource {
    /// Wrap bytes; the size is known
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            report_size: true,
        }
    }

    /// Wrap bytes but report [`UNKNOWN_SIZE`], like a live stream
    pub fn unsized_stream(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            report_size: false,
        }
    }
}

impl DataSource for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MediaResult<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> MediaResult<u64> {
        if self.report_size {
            Ok(self.data.len() as u64)
        } else {
            Ok(UNKNOWN_SIZE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads() {
        let source = MemorySource::new(vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(source.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(source.read_at(9, &mut buf).unwrap(), 0);
        assert_eq!(source.size().unwrap(), 5);
        assert_eq!(
            MemorySource::unsized_stream(vec![0u8]).size().unwrap(),
            UNKNOWN_SIZE
        );
    }

    #[test]
    fn test_read_exact_reports_short_read() {
        let source = MemorySource::new(vec![0u8; 4]);
        let mut buf = [0u8; 8];
        match source.read_exact_at(2, &mut buf) {
            Err(MediaError::ShortRead {
                offset,
                expected,
                actual,
            }) => {
                assert_eq!((offset, expected, actual), (2, 8, 2));
            }
            other => panic!("expected short read, got {:?}", other),
        }
    }

    #[test]
    fn test_file_source() {
        let path = std::env::temp_dir().join(format!("pullmedia-fs-{}.bin", std::process::id()));
        std::fs::write(&path, b"0123456789").unwrap();
        let source = FileSource::open(&path).unwrap();
        let mut buf = [0u8; 4];
        source.read_exact_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"6789");
        assert_eq!(source.size().unwrap(), 10);
        std::fs::remove_file(&path).unwrap();
    }
}
