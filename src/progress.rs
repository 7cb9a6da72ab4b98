use crate::error::ProgressError;
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    InProgress,
    Completed,
    Aborted,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadStatus::InProgress)
    }
}

/// Consistent view of one upload at a single instant.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressSnapshot {
    pub upload_id: String,
    pub status: UploadStatus,
    pub total_size: u64, // 0 when the client sent no length
    pub bytes_written: u64,
    pub available_path: Option<String>,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
}

impl ProgressSnapshot {
    pub fn percent_complete(&self) -> Option<f64> {
        if self.total_size == 0 {
            return None;
        }
        Some(self.bytes_written as f64 / self.total_size as f64 * 100.0)
    }
}

/// Live progress of a single upload.
///
/// The bound copier is the only writer; any number of pollers may read
/// concurrently. Each mutation installs a fresh [`ProgressSnapshot`], so a
/// reader sees either the state before or after it, never a mix.
///
/// Once the status leaves `InProgress` it is final: `advance` and
/// `mark_completed` return [`ProgressError::Terminal`] and change nothing.
#[derive(Debug)]
pub struct UploadProgress {
    current: RwLock<ProgressSnapshot>,
}

impl UploadProgress {
    pub fn new(upload_id: impl Into<String>, total_size: u64) -> Self {
        Self {
            current: RwLock::new(ProgressSnapshot {
                upload_id: upload_id.into(),
                status: UploadStatus::InProgress,
                total_size,
                bytes_written: 0,
                available_path: None,
                finished_at: None,
            }),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn upload_id(&self) -> String {
        self.snapshot().upload_id
    }

    pub fn status(&self) -> UploadStatus {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn bytes_written(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes_written
    }

    pub fn percent_complete(&self) -> Option<f64> {
        self.snapshot().percent_complete()
    }

    /// Records `n` more bytes as persisted and returns the new total.
    pub fn advance(&self, n: u64) -> Result<u64, ProgressError> {
        self.transition(|current| {
            if current.status.is_terminal() {
                return Err(ProgressError::Terminal(current.status));
            }
            let bytes_written = current.bytes_written.saturating_add(n);
            if current.total_size > 0 && bytes_written > current.total_size {
                return Err(ProgressError::ExceedsTotal {
                    requested: n,
                    bytes_written: current.bytes_written,
                    total_size: current.total_size,
                });
            }
            Ok(ProgressSnapshot {
                bytes_written,
                ..current.clone()
            })
        })
        .map(|next| next.bytes_written)
    }

    pub fn mark_completed(&self, path: impl Into<String>) -> Result<(), ProgressError> {
        let path = path.into();
        self.transition(move |current| {
            if current.status.is_terminal() {
                return Err(ProgressError::Terminal(current.status));
            }
            Ok(ProgressSnapshot {
                status: UploadStatus::Completed,
                available_path: Some(path),
                finished_at: Some(Instant::now()),
                ..current.clone()
            })
        })
        .map(|_| ())
    }

    /// Aborting twice is a no-op; aborting a completed upload is rejected.
    pub fn mark_aborted(&self) -> Result<(), ProgressError> {
        self.transition(|current| match current.status {
            UploadStatus::InProgress => Ok(ProgressSnapshot {
                status: UploadStatus::Aborted,
                finished_at: Some(Instant::now()),
                ..current.clone()
            }),
            UploadStatus::Aborted => Ok(current.clone()),
            UploadStatus::Completed => Err(ProgressError::Terminal(UploadStatus::Completed)),
        })
        .map(|_| ())
    }

    fn transition<F>(&self, next: F) -> Result<ProgressSnapshot, ProgressError>
    where
        F: FnOnce(&ProgressSnapshot) -> Result<ProgressSnapshot, ProgressError>,
    {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let updated = next(&current)?;
        *current = updated.clone();
        Ok(updated)
    }
}
