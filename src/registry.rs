use crate::progress::{ProgressSnapshot, UploadProgress, UploadStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Upload id -> live progress, shared by the upload handler, pollers and
/// background tasks. Cloning shares the same map.
#[derive(Clone, Default, Debug)]
pub struct ProgressRegistry {
    entries: Arc<Mutex<HashMap<String, Arc<UploadProgress>>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<UploadProgress>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `progress` under its upload id, replacing any previous entry.
    ///
    /// A replaced upload that is still running is aborted so its copier
    /// stops at the next chunk instead of writing on unobserved.
    pub fn store(&self, progress: Arc<UploadProgress>) -> Option<Arc<UploadProgress>> {
        let id = progress.upload_id();
        let displaced = self.lock().insert(id.clone(), progress);

        if let Some(old) = &displaced
            && old.status() == UploadStatus::InProgress
        {
            warn!("Upload id {} re-registered while in progress; aborting the previous copy", id);
            let _ = old.mark_aborted();
        }
        displaced
    }

    /// Like [`store`](Self::store), but leaves a running upload in place and
    /// returns `false` instead of displacing it.
    pub fn try_store(&self, progress: Arc<UploadProgress>) -> bool {
        let id = progress.upload_id();
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&id)
            && existing.status() == UploadStatus::InProgress
        {
            return false;
        }
        entries.insert(id, progress);
        true
    }

    pub fn get(&self, upload_id: &str) -> Option<Arc<UploadProgress>> {
        self.lock().get(upload_id).cloned()
    }

    /// Forgets `upload_id`, aborting it first if it is still running.
    /// Unknown ids are ignored.
    pub fn abort(&self, upload_id: &str) {
        let removed = self.lock().remove(upload_id);

        match removed {
            Some(progress) => {
                if let Err(e) = progress.mark_aborted() {
                    debug!("Removed upload {} without aborting it: {}", upload_id, e);
                }
            }
            None => debug!("Abort requested for unknown upload {}", upload_id),
        }
    }

    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        let entries: Vec<_> = self.lock().values().cloned().collect();
        entries.iter().map(|p| p.snapshot()).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops entries that reached a terminal status more than `older_than`
    /// ago. Running uploads are kept. Returns how many were removed.
    pub fn evict_finished(&self, older_than: Duration) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, progress| {
            match progress.snapshot().finished_at {
                Some(at) => at.elapsed() < older_than,
                None => true,
            }
        });
        before - entries.len()
    }
}
