//! In-memory driver
//!
//! Reference driver used by tests and small deployments. Objects live in a
//! sorted map keyed by path; directories exist implicitly as key prefixes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::RwLock;

use crate::driver::{
    ByteStream, FileInfo, FileWriter, StorageDriver, UrlOptions, validate_path,
};
use crate::error::DriverError;

#[derive(Clone)]
struct MemFile {
    data: Bytes,
    mod_time: SystemTime,
}

type Tree = Arc<RwLock<BTreeMap<String, MemFile>>>;

/// Storage driver holding all objects in process memory.
#[derive(Default)]
pub struct InMemoryDriver {
    tree: Tree,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(path: &str) -> DriverError {
        DriverError::PathNotFound {
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl StorageDriver for InMemoryDriver {
    fn name(&self) -> &'static str {
        "inmemory"
    }

    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        validate_path(path)?;
        let tree = self.tree.read();
        tree.get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), DriverError> {
        validate_path(path)?;
        self.tree.write().insert(
            path.to_string(),
            MemFile {
                data: content,
                mod_time: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ByteStream, DriverError> {
        validate_path(path)?;
        let data = {
            let tree = self.tree.read();
            tree.get(path)
                .map(|f| f.data.clone())
                .ok_or_else(|| Self::not_found(path))?
        };
        if offset > data.len() as u64 {
            return Err(DriverError::InvalidOffset {
                path: path.to_string(),
                offset,
            });
        }
        let tail = data.slice(offset as usize..);
        Ok(Box::pin(stream::iter([Ok(tail)])))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        validate_path(path)?;
        let mut buffer = Vec::new();
        if append {
            if let Some(existing) = self.tree.read().get(path) {
                buffer.extend_from_slice(&existing.data);
            }
        }
        // Reserve the path so stat sees the in-progress upload.
        self.tree.write().insert(
            path.to_string(),
            MemFile {
                data: Bytes::from(buffer.clone()),
                mod_time: SystemTime::now(),
            },
        );
        Ok(Box::new(InMemoryWriter {
            tree: self.tree.clone(),
            path: path.to_string(),
            buffer,
            open: true,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        validate_path(path)?;
        let tree = self.tree.read();
        if let Some(file) = tree.get(path) {
            return Ok(FileInfo {
                path: path.to_string(),
                size: file.data.len() as u64,
                mod_time: Some(file.mod_time),
                is_dir: false,
            });
        }
        let prefix = format!("{path}/");
        if tree.range(prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&prefix)) {
            return Ok(FileInfo {
                path: path.to_string(),
                size: 0,
                mod_time: None,
                is_dir: true,
            });
        }
        Err(Self::not_found(path))
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        if path != "/" {
            validate_path(path)?;
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };

        let tree = self.tree.read();
        let mut children: Vec<String> = Vec::new();
        for key in tree.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let child = match rest.split_once('/') {
                Some((first, _)) => format!("{prefix}{first}"),
                None => key.clone(),
            };
            if children.last() != Some(&child) {
                children.push(child);
            }
        }
        if children.is_empty() && tree.get(path).is_none() {
            return Err(Self::not_found(path));
        }
        Ok(children)
    }

    async fn rename(&self, source: &str, dest: &str) -> Result<(), DriverError> {
        validate_path(source)?;
        validate_path(dest)?;
        let mut tree = self.tree.write();
        match tree.remove(source) {
            Some(file) => {
                tree.insert(dest.to_string(), file);
                Ok(())
            }
            None => Err(Self::not_found(source)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        validate_path(path)?;
        let mut tree = self.tree.write();
        let prefix = format!("{path}/");
        let keys: Vec<String> = tree
            .keys()
            .filter(|k| *k == path || k.starts_with(&prefix))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Err(Self::not_found(path));
        }
        for key in keys {
            tree.remove(&key);
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

struct InMemoryWriter {
    tree: Tree,
    path: String,
    buffer: Vec<u8>,
    open: bool,
}

impl InMemoryWriter {
    fn flush_to_tree(&self) {
        self.tree.write().insert(
            self.path.clone(),
            MemFile {
                data: Bytes::from(self.buffer.clone()),
                mod_time: SystemTime::now(),
            },
        );
    }
}

#[async_trait]
impl FileWriter for InMemoryWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::WriterClosed);
        }
        self.buffer.extend_from_slice(data);
        self.flush_to_tree();
        Ok(())
    }

    fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::WriterClosed);
        }
        self.flush_to_tree();
        self.open = false;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.open = false;
        self.tree.write().remove(&self.path);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.open {
            self.flush_to_tree();
            self.open = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_roundtrip_and_stat() {
        let driver = InMemoryDriver::new();
        driver
            .put_content("/a/b/c", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert_eq!(&driver.get_content("/a/b/c").await.unwrap()[..], b"abc");

        let info = driver.stat("/a/b/c").await.unwrap();
        assert!(!info.is_dir);
        assert_eq!(info.size, 3);

        let info = driver.stat("/a/b").await.unwrap();
        assert!(info.is_dir);

        assert!(driver.stat("/a/x").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_children() {
        let driver = InMemoryDriver::new();
        for path in ["/r/one/data", "/r/two/data", "/r/file"] {
            driver.put_content(path, Bytes::new()).await.unwrap();
        }
        let mut children = driver.list("/r").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["/r/file", "/r/one", "/r/two"]);

        assert!(driver.list("/missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reader_offset_bounds() {
        let driver = InMemoryDriver::new();
        driver
            .put_content("/f", Bytes::from_static(b"0123"))
            .await
            .unwrap();

        let mut stream = driver.reader("/f", 2).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"23");

        assert!(matches!(
            driver.reader("/f", 5).await.err().unwrap(),
            DriverError::InvalidOffset { .. }
        ));
    }

    #[tokio::test]
    async fn test_writer_lifecycle() {
        let driver = InMemoryDriver::new();

        let mut w = driver.writer("/up", false).await.unwrap();
        w.write_all(b"he").await.unwrap();
        w.write_all(b"llo").await.unwrap();
        assert_eq!(w.size(), 5);
        w.commit().await.unwrap();
        assert_eq!(&driver.get_content("/up").await.unwrap()[..], b"hello");

        let mut w = driver.writer("/up", true).await.unwrap();
        w.write_all(b" world").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&driver.get_content("/up").await.unwrap()[..], b"hello world");

        let mut w = driver.writer("/gone", false).await.unwrap();
        w.write_all(b"x").await.unwrap();
        w.cancel().await.unwrap();
        assert!(driver.get_content("/gone").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rename_and_recursive_delete() {
        let driver = InMemoryDriver::new();
        driver
            .put_content("/u/1/data", Bytes::from_static(b"d"))
            .await
            .unwrap();
        driver.rename("/u/1/data", "/b/aa/hash/data").await.unwrap();
        assert!(driver.get_content("/u/1/data").await.unwrap_err().is_not_found());
        assert_eq!(&driver.get_content("/b/aa/hash/data").await.unwrap()[..], b"d");

        driver
            .put_content("/b/aa/hash/meta", Bytes::new())
            .await
            .unwrap();
        driver.delete("/b").await.unwrap();
        assert!(driver.stat("/b").await.unwrap_err().is_not_found());
    }
}
