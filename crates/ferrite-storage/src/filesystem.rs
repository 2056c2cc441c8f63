//! Local filesystem driver

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::driver::{
    ByteStream, FileInfo, FileWriter, StorageDriver, UrlOptions, validate_path,
};
use crate::error::DriverError;

/// Storage driver backed by a local directory tree.
///
/// Object paths map directly onto files under the root; writes go through a
/// temp file and a rename so concurrent readers never observe partial
/// content.
pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        FilesystemDriver {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, DriverError> {
        validate_path(path)?;
        Ok(self.root.join(&path[1..]))
    }

    fn not_found(path: &str, err: std::io::Error) -> DriverError {
        if err.kind() == std::io::ErrorKind::NotFound {
            DriverError::PathNotFound {
                path: path.to_string(),
            }
        } else {
            DriverError::Io(err)
        }
    }

    async fn ensure_parent(full: &Path) -> Result<(), DriverError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        let full = self.full_path(path)?;
        let data = fs::read(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), DriverError> {
        let full = self.full_path(path)?;
        Self::ensure_parent(&full).await?;

        // Write through a temp file so the final path is atomic.
        let tmp = full.with_extension("tmp");
        fs::write(&tmp, &content).await?;
        fs::rename(&tmp, &full).await?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ByteStream, DriverError> {
        let full = self.full_path(path)?;
        let mut file = File::open(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;

        let len = file.metadata().await?.len();
        if offset > len {
            return Err(DriverError::InvalidOffset {
                path: path.to_string(),
                offset,
            });
        }
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let stream = tokio_util::io::ReaderStream::new(file);
        Ok(Box::pin(stream.map(|result| result.map_err(DriverError::Io))))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        let full = self.full_path(path)?;
        Self::ensure_parent(&full).await?;

        let (file, size) = if append {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&full)
                .await?;
            let size = file.metadata().await?.len();
            (file, size)
        } else {
            (File::create(&full).await?, 0)
        };

        debug!("opened writer for {:?} at offset {}", full, size);
        Ok(Box::new(FilesystemWriter {
            path: full,
            inner: Some(BufWriter::new(file)),
            size,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        let full = self.full_path(path)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(FileInfo {
            path: path.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mod_time: meta.modified().ok(),
            is_dir: meta.is_dir(),
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        let full = if path == "/" {
            self.root.clone()
        } else {
            self.full_path(path)?
        };
        let mut read_dir = fs::read_dir(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;

        let prefix = if path == "/" { "" } else { path };
        let mut children = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                children.push(format!("{prefix}/{name}"));
            }
        }
        Ok(children)
    }

    async fn rename(&self, source: &str, dest: &str) -> Result<(), DriverError> {
        let from = self.full_path(source)?;
        let to = self.full_path(dest)?;
        Self::ensure_parent(&to).await?;
        fs::rename(&from, &to)
            .await
            .map_err(|e| Self::not_found(source, e))
    }

    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        let full = self.full_path(path)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full).await?;
        } else {
            fs::remove_file(&full).await?;
        }
        Ok(())
    }

    async fn url_for(&self, _path: &str, _options: &UrlOptions) -> Result<String, DriverError> {
        Err(DriverError::Unsupported {
            driver: self.name(),
            operation: "url_for",
        })
    }
}

struct FilesystemWriter {
    path: PathBuf,
    inner: Option<BufWriter<File>>,
    size: u64,
}

impl FilesystemWriter {
    fn writer(&mut self) -> Result<&mut BufWriter<File>, DriverError> {
        self.inner.as_mut().ok_or(DriverError::WriterClosed)
    }
}

#[async_trait]
impl FileWriter for FilesystemWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let writer = self.writer()?;
        writer.write_all(data).await?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        let writer = self.writer()?;
        writer.flush().await?;
        writer.get_mut().sync_all().await?;
        self.inner = None;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.inner = None;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriverError::Io(e)),
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(writer) = self.inner.as_mut() {
            writer.flush().await?;
            self.inner = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{WalkControl, walk};

    fn driver() -> (tempfile::TempDir, FilesystemDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path());
        (dir, driver)
    }

    #[tokio::test]
    async fn test_content_roundtrip() {
        let (_dir, driver) = driver();
        driver
            .put_content("/a/b/data", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let data = driver.get_content("/a/b/data").await.unwrap();
        assert_eq!(&data[..], b"hello");

        let err = driver.get_content("/a/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reader_offset() {
        let (_dir, driver) = driver();
        driver
            .put_content("/f", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let mut stream = driver.reader("/f", 4).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(&out, b"456789");

        let err = driver.reader("/f", 11).await.err().unwrap();
        assert!(matches!(err, DriverError::InvalidOffset { offset: 11, .. }));
    }

    #[tokio::test]
    async fn test_writer_append_resume() {
        let (_dir, driver) = driver();

        let mut w = driver.writer("/up/data", false).await.unwrap();
        w.write_all(b"first").await.unwrap();
        w.close().await.unwrap();

        let mut w = driver.writer("/up/data", true).await.unwrap();
        assert_eq!(w.size(), 5);
        w.write_all(b"-second").await.unwrap();
        w.commit().await.unwrap();

        let data = driver.get_content("/up/data").await.unwrap();
        assert_eq!(&data[..], b"first-second");
    }

    #[tokio::test]
    async fn test_writer_cancel_removes_file() {
        let (_dir, driver) = driver();
        let mut w = driver.writer("/up/data", false).await.unwrap();
        w.write_all(b"partial").await.unwrap();
        w.cancel().await.unwrap();
        assert!(driver.stat("/up/data").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let (_dir, driver) = driver();
        driver
            .put_content("/src/data", Bytes::from_static(b"x"))
            .await
            .unwrap();
        driver.rename("/src/data", "/dst/deep/data").await.unwrap();
        assert!(driver.stat("/src/data").await.unwrap_err().is_not_found());
        assert_eq!(driver.stat("/dst/deep/data").await.unwrap().size, 1);

        driver.delete("/dst").await.unwrap();
        assert!(driver.stat("/dst").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_walk() {
        let (_dir, driver) = driver();
        for path in ["/r/a/data", "/r/b/data", "/r/b/meta", "/top"] {
            driver
                .put_content(path, Bytes::from_static(b"1"))
                .await
                .unwrap();
        }

        let mut children = driver.list("/r").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["/r/a", "/r/b"]);

        let mut files = Vec::new();
        walk(&driver, "/r", &mut |info: &FileInfo| {
            if !info.is_dir {
                files.push(info.path.clone());
            }
            WalkControl::Continue
        })
        .await
        .unwrap();
        assert_eq!(files, vec!["/r/a/data", "/r/b/data", "/r/b/meta"]);

        // Pruning a directory hides its files.
        let mut seen = Vec::new();
        walk(&driver, "/r", &mut |info: &FileInfo| {
            if info.is_dir && info.path == "/r/b" {
                return WalkControl::SkipDir;
            }
            if !info.is_dir {
                seen.push(info.path.clone());
            }
            WalkControl::Continue
        })
        .await
        .unwrap();
        assert_eq!(seen, vec!["/r/a/data"]);
    }

    #[tokio::test]
    async fn test_url_for_unsupported() {
        let (_dir, driver) = driver();
        let err = driver
            .url_for("/f", &UrlOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Unsupported { .. }));
    }
}
