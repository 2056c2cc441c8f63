//! Resumable blob upload writer
//!
//! One writer is one upload session. The session lives in the driver under
//! `_uploads/<id>/` (data, startedat, hash checkpoints) and moves through
//! OPEN to COMMITTED or CANCELLED; sessions abandoned in OPEN are reclaimed
//! by the purge task.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ferrite_reference::{Algorithm, Digest, Digester, Name};
use ferrite_storage::{DriverError, FileWriter, StorageDriver};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
use crate::error::DistributionError;
use crate::paths::{PathSpec, path_for};

#[derive(Debug, PartialEq, Eq)]
enum WriterState {
    Open,
    Committed,
    Cancelled,
}

/// An in-progress upload session.
pub struct BlobWriter {
    driver: Arc<dyn StorageDriver>,
    name: Name,
    id: String,
    started_at: DateTime<Utc>,
    file: Box<dyn FileWriter>,
    digester: Digester,
    state: WriterState,
}

impl BlobWriter {
    /// Begin a fresh session: allocate an id, persist `startedat`, open the
    /// data file.
    pub(crate) async fn start(
        driver: Arc<dyn StorageDriver>,
        name: Name,
    ) -> Result<Self, DistributionError> {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        let started_path = path_for(PathSpec::UploadStartedAt {
            name: &name,
            id: &id,
        });
        driver
            .put_content(&started_path, Bytes::from(started_at.to_rfc3339()))
            .await?;

        let data_path = path_for(PathSpec::UploadData {
            name: &name,
            id: &id,
        });
        let file = driver.writer(&data_path, false).await?;

        debug!("started upload {id} for {name}");
        Ok(BlobWriter {
            driver,
            name,
            id,
            started_at,
            file,
            digester: Algorithm::Sha256.digester(),
            state: WriterState::Open,
        })
    }

    /// Reopen an existing session after a disconnect or in a new process.
    ///
    /// The streaming hash cannot be thawed from a checkpoint file directly,
    /// so the committed prefix is replayed through a fresh digester before
    /// the writer accepts new chunks.
    pub(crate) async fn resume(
        driver: Arc<dyn StorageDriver>,
        name: Name,
        id: &str,
    ) -> Result<Self, DistributionError> {
        let started_path = path_for(PathSpec::UploadStartedAt { name: &name, id });
        let raw = driver.get_content(&started_path).await.map_err(|e| {
            if e.is_not_found() {
                DistributionError::UnknownUpload { id: id.to_string() }
            } else {
                e.into()
            }
        })?;
        let started_at = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| DistributionError::UnknownUpload { id: id.to_string() })?;

        let data_path = path_for(PathSpec::UploadData { name: &name, id });
        let mut digester = Algorithm::Sha256.digester();
        match driver.reader(&data_path, 0).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    digester.update(&chunk?);
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let file = driver.writer(&data_path, true).await?;
        debug!("resumed upload {id} for {name} at offset {}", file.size());
        Ok(BlobWriter {
            driver,
            name,
            id: id.to_string(),
            started_at,
            file,
            digester,
            state: WriterState::Open,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Bytes accepted so far.
    pub fn size(&self) -> u64 {
        self.file.size()
    }

    fn ensure_open(&self) -> Result<(), DistributionError> {
        if self.state == WriterState::Open {
            Ok(())
        } else {
            Err(DistributionError::UploadClosed)
        }
    }

    /// Append a chunk and return the new offset.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<u64, DistributionError> {
        self.ensure_open()?;
        self.file.write_all(data).await?;
        self.digester.update(data);
        Ok(self.file.size())
    }

    /// Record a hash checkpoint at the current offset. The file marks how
    /// far the streamed hash has verified; its offset is embedded in the key
    /// so resume can pick the highest checkpoint at or below the data size.
    pub async fn checkpoint(&self) -> Result<(), DistributionError> {
        self.ensure_open()?;
        let path = path_for(PathSpec::UploadHashState {
            name: &self.name,
            id: &self.id,
            algorithm: self.digester.algorithm(),
            offset: self.file.size(),
        });
        self.driver.put_content(&path, Bytes::new()).await?;
        Ok(())
    }

    /// Flush without ending the session, keeping it resumable.
    pub async fn close(&mut self) -> Result<(), DistributionError> {
        if self.state == WriterState::Open {
            self.file.close().await?;
        }
        Ok(())
    }

    /// Validate against the client-supplied descriptor and move the content
    /// into the blob store.
    ///
    /// On a digest or size mismatch the session data stays on disk and the
    /// session remains resumable; only a successful commit consumes it.
    pub async fn commit(
        &mut self,
        provisional: Descriptor,
    ) -> Result<Descriptor, DistributionError> {
        self.ensure_open()?;
        self.file.close().await?;

        let size = self.file.size() as i64;
        if provisional.size > 0 && provisional.size != size {
            return Err(DistributionError::SizeMismatch {
                declared: provisional.size,
                received: size,
            });
        }
        provisional.digest.validate()?;

        let canonical = self.digester.clone().finalize();
        if provisional.digest.algorithm() == canonical.algorithm() {
            if provisional.digest != canonical {
                return Err(DistributionError::DigestMismatch {
                    expected: provisional.digest.clone(),
                    actual: canonical,
                });
            }
        } else {
            // The client hashed with a different supported algorithm; verify
            // by replaying the uploaded data under that algorithm.
            let alternate = self.digest_uploaded(provisional.digest.algorithm()).await?;
            if provisional.digest != alternate {
                return Err(DistributionError::DigestMismatch {
                    expected: provisional.digest.clone(),
                    actual: alternate,
                });
            }
        }

        self.move_into_place(&canonical).await?;
        self.state = WriterState::Committed;

        let media_type = if provisional.media_type.is_empty() {
            MEDIA_TYPE_OCTET_STREAM.to_string()
        } else {
            provisional.media_type
        };
        debug!("committed upload {} as {canonical}", self.id);
        Ok(Descriptor {
            media_type,
            digest: canonical,
            size,
        })
    }

    /// Abort the session and remove all its state.
    pub async fn cancel(&mut self) -> Result<(), DistributionError> {
        let root = path_for(PathSpec::UploadRoot {
            name: &self.name,
            id: &self.id,
        });
        match self.driver.delete(&root).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        self.state = WriterState::Cancelled;
        debug!("cancelled upload {}", self.id);
        Ok(())
    }

    async fn digest_uploaded(&self, algorithm: Algorithm) -> Result<Digest, DistributionError> {
        let data_path = path_for(PathSpec::UploadData {
            name: &self.name,
            id: &self.id,
        });
        let mut digester = algorithm.digester();
        let mut stream = self.driver.reader(&data_path, 0).await?;
        while let Some(chunk) = stream.next().await {
            digester.update(&chunk?);
        }
        Ok(digester.finalize())
    }

    /// Move the uploaded data to its content address. If an upload of the
    /// same content won the race, discard ours; the bytes are identical.
    async fn move_into_place(&self, digest: &Digest) -> Result<(), DistributionError> {
        let data_path = path_for(PathSpec::UploadData {
            name: &self.name,
            id: &self.id,
        });
        let blob_path = path_for(PathSpec::BlobData { digest });

        match self.driver.stat(&blob_path).await {
            Ok(_) => {
                debug!("blob {digest} already present, discarding upload data");
            }
            Err(err) if err.is_not_found() => {
                self.driver.rename(&data_path, &blob_path).await?;
            }
            Err(err) => return Err(err.into()),
        }

        let root = path_for(PathSpec::UploadRoot {
            name: &self.name,
            id: &self.id,
        });
        match self.driver.delete(&root).await {
            Ok(()) => Ok(()),
            Err(DriverError::PathNotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
