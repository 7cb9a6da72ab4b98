use crate::progress::UploadStatus;

/// Rejected mutations of an [`UploadProgress`](crate::progress::UploadProgress).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("upload is already {0:?}")]
    Terminal(UploadStatus),

    #[error("advancing by {requested} bytes would exceed the declared total of {total_size} (at {bytes_written})")]
    ExceedsTotal {
        requested: u64,
        bytes_written: u64,
        total_size: u64,
    },
}

/// Outcome of a copy that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("failed reading upload stream: {0}")]
    Source(#[source] std::io::Error),

    #[error("failed writing destination file: {0}")]
    Sink(#[source] std::io::Error),

    #[error("upload was aborted")]
    Cancelled,

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

impl CopyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyError::Cancelled)
    }
}
