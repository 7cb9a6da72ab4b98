//! Chunked copy of an inbound upload stream to disk.
//!
//! Every chunk is written to the destination file before it is counted
//! on the bound [`UploadProgress`], so the reported byte count never runs
//! ahead of what has been handed to the file.

use crate::error::{CopyError, ProgressError};
use crate::progress::{UploadProgress, UploadStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct StreamCopier<R> {
    source: R,
    progress: Arc<UploadProgress>,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin> StreamCopier<R> {
    pub fn new(source: R, progress: Arc<UploadProgress>) -> Self {
        Self {
            source,
            progress,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Copies the source into `destination_dir.join(path)` until end of stream.
    ///
    /// Aborting the bound upload is noticed at the next chunk boundary and
    /// ends the copy with [`CopyError::Cancelled`]. Read and write failures
    /// stop the copy at once. In both cases the partial file stays on disk.
    pub async fn copy_to(
        mut self,
        destination_dir: impl AsRef<Path>,
        path: impl AsRef<Path>,
    ) -> Result<CopyReport, CopyError> {
        let target = destination_dir.as_ref().join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CopyError::Sink)?;
        }

        let mut file = File::create(&target).await.map_err(CopyError::Sink)?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut copied: u64 = 0;

        loop {
            if self.progress.status() == UploadStatus::Aborted {
                debug!(path = %target.display(), copied, "Copy cancelled at chunk boundary");
                return Err(CopyError::Cancelled);
            }

            let n = self.source.read(&mut buf).await.map_err(CopyError::Source)?;
            if n == 0 {
                break;
            }
            if self.progress.status() == UploadStatus::Aborted {
                debug!(path = %target.display(), copied, "Copy cancelled before write");
                return Err(CopyError::Cancelled);
            }

            file.write_all(&buf[..n]).await.map_err(CopyError::Sink)?;
            copied += n as u64;

            match self.progress.advance(n as u64) {
                Ok(_) => {}
                Err(ProgressError::Terminal(UploadStatus::Aborted)) => {
                    debug!(path = %target.display(), copied, "Copy cancelled mid-chunk");
                    return Err(CopyError::Cancelled);
                }
                Err(e) => return Err(e.into()),
            }
        }

        file.flush().await.map_err(CopyError::Sink)?;
        file.sync_all().await.map_err(CopyError::Sink)?;
        drop(file);

        Ok(CopyReport {
            path: target,
            bytes: copied,
        })
    }
}
