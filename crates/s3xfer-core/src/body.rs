//! Upload body sources.
//!
//! Parts of a multipart PUT read only their own byte range, so a source must
//! support positioned reads without a shared cursor.

use bytes::Bytes;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Random-access body for PUT meta-requests.
pub trait BodySource: Send + Sync {
    /// Total body length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `start`. May block; callers run
    /// it on the blocking pool.
    fn read_range(&self, start: u64, len: u64) -> io::Result<Bytes>;
}

/// In-memory body. Range reads are zero-copy slices.
#[derive(Debug, Clone, Default)]
pub struct BytesBody {
    data: Bytes,
}

impl BytesBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl BodySource for BytesBody {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, start: u64, len: u64) -> io::Result<Bytes> {
        let end = start.checked_add(len).filter(|e| *e <= self.len()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {}+{} beyond body of {} bytes", start, len, self.len()),
            )
        })?;
        Ok(self.data.slice(start as usize..end as usize))
    }
}

/// File-backed body using positioned reads.
#[derive(Debug, Clone)]
pub struct FileBody {
    file: Arc<File>,
    path: PathBuf,
    len: u64,
}

impl FileBody {
    /// Open `path`; the length is fixed at open time.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    /// Non-Unix fallback: seek + read on a cloned handle. Not safe for concurrent use.
    #[cfg(not(unix))]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(buf)
    }
}

impl BodySource for FileBody {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, len: u64) -> io::Result<Bytes> {
        let mut buf = vec![0u8; len as usize];
        self.read_exact_at(&mut buf, start)?;
        Ok(Bytes::from(buf))
    }
}
