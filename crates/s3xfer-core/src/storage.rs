//! Offset writer for downloaded objects.
//!
//! Body chunks land at their object offsets in a `.part` temp file, which is
//! renamed to the final path once the transfer succeeded.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Temporary file suffix used before the final rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Writer for a temp download file. Cloneable; each `write_at` is independent.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    temp_path: PathBuf,
}

impl StorageWriter {
    /// Create (or truncate) the temp file for `final_path`.
    pub fn create(final_path: &Path) -> Result<Self> {
        let temp_path = temp_path(final_path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        Ok(Self {
            file: Arc::new(file),
            temp_path,
        })
    }

    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .write_all_at(data, offset)
            .context("storage write_at failed")
    }

    /// Non-Unix fallback: seek + write. Not safe for concurrent use.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("storage sync failed")
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Rename the temp file to `final_path`, consuming the writer.
    pub fn finalize(self, final_path: &Path) -> Result<()> {
        let temp_path = self.temp_path.clone();
        drop(self.file);
        std::fs::rename(&temp_path, final_path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                final_path.display()
            )
        })
    }

    /// Remove the temp file after a failed transfer.
    pub fn discard(self) -> Result<()> {
        let temp_path = self.temp_path.clone();
        drop(self.file);
        std::fs::remove_file(&temp_path)
            .with_context(|| format!("failed to remove {}", temp_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_part() {
        assert_eq!(temp_path(Path::new("obj.bin")).to_string_lossy(), "obj.bin.part");
        assert_eq!(
            temp_path(Path::new("/tmp/a.zip")).to_string_lossy(),
            "/tmp/a.zip.part"
        );
    }

    #[test]
    fn out_of_order_writes_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let w = StorageWriter::create(&final_path).unwrap();
        w.write_at(5, b"world").unwrap();
        w.write_at(0, b"hello").unwrap();
        w.sync().unwrap();
        assert!(w.temp_path().exists());
        w.finalize(&final_path).unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), b"helloworld");
        assert!(!temp_path(&final_path).exists());
    }

    #[test]
    fn discard_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("gone.bin");
        let w = StorageWriter::create(&final_path).unwrap();
        w.write_at(0, b"x").unwrap();
        w.discard().unwrap();
        assert!(!temp_path(&final_path).exists());
        assert!(!final_path.exists());
    }
}
