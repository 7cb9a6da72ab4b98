use crate::copier::StreamCopier;
use crate::error::CopyError;
use crate::handlers::files::{available_path, invalid_upload_id, stored_file_name};
use crate::progress::{ProgressSnapshot, UploadProgress};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header::CONTENT_LENGTH},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

/// Accepts `multipart/form-data` where a `uid` text field precedes the file
/// part. An optional `size` field gives the file length; otherwise the
/// request's Content-Length is used as the expected total.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    info!("Received {} bytes through POST.", content_length);

    let mut params: HashMap<String, String> = HashMap::new();
    let mut finished = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_rejection(e),
        };

        let Some(original_name) = field.file_name().map(str::to_string) else {
            let name = field.name().unwrap_or_default().to_string();
            match field.text().await {
                Ok(value) => {
                    params.insert(name, value);
                }
                Err(e) => return multipart_rejection(e),
            }
            continue;
        };

        let uid = params.get("uid").map(String::as_str).unwrap_or_default();
        if let Some(reason) = invalid_upload_id(uid) {
            warn!("Rejected file part {:?}: {}", original_name, reason);
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }

        let total_size = params
            .get("size")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(content_length);

        let source = Box::pin(StreamReader::new(field.map_err(io::Error::other)));
        match receive_file(&state, uid, total_size, &original_name, source).await {
            Ok(snapshot) => finished = Some(snapshot),
            Err(response) => return response,
        }
    }

    match finished {
        Some(snapshot) => Json(snapshot).into_response(),
        None => StatusCode::OK.into_response(),
    }
}

async fn receive_file<R: AsyncRead + Unpin>(
    state: &AppState,
    uid: &str,
    total_size: u64,
    original_name: &str,
    source: R,
) -> Result<ProgressSnapshot, Response> {
    let progress = Arc::new(UploadProgress::new(uid, total_size));
    if !state.uploads.try_store(progress.clone()) {
        warn!("Upload id {} is already in progress", uid);
        return Err((StatusCode::CONFLICT, "Upload id already in progress").into_response());
    }

    let file_name = stored_file_name(uid, Some(original_name));
    let disk_path = state.settings.files_dir.join(&file_name);
    let start = Instant::now();
    info!("Started writing {}", file_name);

    let result = StreamCopier::new(source, progress.clone())
        .with_chunk_size(state.settings.chunk_size)
        .copy_to(&state.settings.files_dir, &file_name)
        .await;

    let failure = match result {
        Ok(report) => {
            let path = available_path(&file_name);
            match progress.mark_completed(path.clone()) {
                Ok(()) => {
                    info!(
                        "Finished writing {} ({} bytes) in {} ms.",
                        file_name,
                        report.bytes,
                        start.elapsed().as_millis()
                    );
                    notify(state, uid, "completed", Some(&path));
                    return Ok(progress.snapshot());
                }
                // aborted after the last chunk landed
                Err(_) => CopyError::Cancelled,
            }
        }
        Err(e) => e,
    };

    let response = match &failure {
        CopyError::Cancelled => {
            info!(
                "Upload {} aborted after {} bytes",
                uid,
                progress.bytes_written()
            );
            let _ = progress.mark_aborted();
            if owns_upload(state, uid, &progress) {
                remove_partial(&disk_path).await;
            }
            (StatusCode::CONFLICT, "Upload aborted").into_response()
        }
        CopyError::Progress(e) => {
            warn!("Upload {} rejected: {}", uid, e);
            // the id stays registered and running until the file is gone
            remove_partial(&disk_path).await;
            state.uploads.abort(uid);
            (StatusCode::BAD_REQUEST, "Upload larger than declared size").into_response()
        }
        CopyError::Source(_) | CopyError::Sink(_) => {
            error!("An error occurred while handling upload id {}: {}", uid, failure);
            remove_partial(&disk_path).await;
            state.uploads.abort(uid);
            (StatusCode::INTERNAL_SERVER_ERROR, "Upload failed").into_response()
        }
    };

    notify(state, uid, "aborted", None);
    Err(response)
}

/// A newer upload may already have taken over this id and its file.
fn owns_upload(state: &AppState, uid: &str, progress: &Arc<UploadProgress>) -> bool {
    state
        .uploads
        .get(uid)
        .is_none_or(|current| Arc::ptr_eq(&current, progress))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed partial file {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {:?}: {}", path, e),
    }
}

fn notify(state: &AppState, uid: &str, status: &str, path: Option<&str>) {
    let _ = state.tx.send(
        serde_json::json!({
            "type": "upload",
            "status": status,
            "id": uid,
            "path": path
        })
        .to_string(),
    );
}

fn multipart_rejection(e: MultipartError) -> Response {
    warn!("Malformed multipart request: {}", e);
    (e.status(), e.body_text()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::progress::UploadStatus;
    use crate::registry::ProgressRegistry;
    use axum::body::Bytes;
    use futures::stream;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncWriteExt, ReadBuf};
    use tokio::sync::broadcast;

    fn test_state(files_dir: std::path::PathBuf) -> AppState {
        let (tx, _) = broadcast::channel(10);
        AppState {
            settings: Settings {
                server_port: 0,
                files_dir,
                log_level: "info".to_string(),
                chunk_size: 256,
                retention_secs: 0,
                max_upload_bytes: 16 * 1024 * 1024,
            },
            uploads: ProgressRegistry::new(),
            tx,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn wait_for_bytes(state: &AppState, uid: &str, expected: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state
                .uploads
                .get(uid)
                .is_none_or(|p| p.bytes_written() < expected)
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("upload made no progress");
    }

    /// Serves `data`, then aborts `uid` when the copier asks for more.
    struct AbortAtEof {
        data: Vec<u8>,
        pos: usize,
        uploads: ProgressRegistry,
        uid: &'static str,
    }

    impl AsyncRead for AbortAtEof {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = &mut *self;
            if this.pos >= this.data.len() {
                this.uploads.abort(this.uid);
                return Poll::Ready(Ok(()));
            }
            let n = buf.remaining().min(this.data.len() - this.pos);
            buf.put_slice(&this.data[this.pos..this.pos + n]);
            this.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_receive_file_completes() {
        let tmp = tempdir().unwrap();
        let state = test_state(tmp.path().to_path_buf());

        let snapshot = receive_file(&state, "u1", 1000, "clip.bin", &payload(1000)[..])
            .await
            .unwrap();

        assert_eq!(snapshot.status, UploadStatus::Completed);
        assert_eq!(snapshot.available_path.as_deref(), Some("/files/u1.bin"));
        assert_eq!(std::fs::read(tmp.path().join("u1.bin")).unwrap(), payload(1000));
    }

    #[tokio::test]
    async fn test_abort_during_upload_removes_partial_file() {
        let tmp = tempdir().unwrap();
        let state = test_state(tmp.path().to_path_buf());
        let (mut tx, rx) = tokio::io::duplex(4096);

        let task_state = state.clone();
        let upload = tokio::spawn(async move {
            receive_file(&task_state, "u1", 4096, "clip.bin", rx).await
        });

        tx.write_all(&payload(256)).await.unwrap();
        wait_for_bytes(&state, "u1", 256).await;
        assert!(tmp.path().join("u1.bin").exists());
        let progress = state.uploads.get("u1").unwrap();

        state.uploads.abort("u1");
        let _ = tx.write_all(&payload(512)).await;
        drop(tx);

        let response = upload.await.unwrap().unwrap_err();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(progress.status(), UploadStatus::Aborted);
        assert_eq!(progress.bytes_written(), 256);
        assert!(state.uploads.get("u1").is_none());
        assert!(!tmp.path().join("u1.bin").exists());
    }

    #[tokio::test]
    async fn test_abort_after_last_chunk_is_not_completed() {
        let tmp = tempdir().unwrap();
        let state = test_state(tmp.path().to_path_buf());
        let source = AbortAtEof {
            data: payload(600),
            pos: 0,
            uploads: state.uploads.clone(),
            uid: "u1",
        };

        let response = receive_file(&state, "u1", 600, "clip.bin", source)
            .await
            .unwrap_err();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(state.uploads.get("u1").is_none());
        assert!(!tmp.path().join("u1.bin").exists());
    }

    #[tokio::test]
    async fn test_cancelled_upload_keeps_file_of_newer_upload() {
        let tmp = tempdir().unwrap();
        let state = test_state(tmp.path().to_path_buf());
        let (mut tx, rx) = tokio::io::duplex(4096);

        let task_state = state.clone();
        let upload = tokio::spawn(async move {
            receive_file(&task_state, "u1", 0, "clip.bin", rx).await
        });

        tx.write_all(&payload(256)).await.unwrap();
        wait_for_bytes(&state, "u1", 256).await;

        state.uploads.abort("u1");
        let newer = Arc::new(UploadProgress::new("u1", 0));
        assert!(state.uploads.try_store(newer.clone()));
        drop(tx);

        let response = upload.await.unwrap().unwrap_err();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(Arc::ptr_eq(&state.uploads.get("u1").unwrap(), &newer));
        assert!(tmp.path().join("u1.bin").exists());
    }

    #[tokio::test]
    async fn test_source_failure_is_server_error() {
        let tmp = tempdir().unwrap();
        let state = test_state(tmp.path().to_path_buf());
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(payload(100))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let source = StreamReader::new(stream::iter(chunks));

        let response = receive_file(&state, "u2", 500, "clip.bin", source)
            .await
            .unwrap_err();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.uploads.get("u2").is_none());
        assert!(!tmp.path().join("u2.bin").exists());
    }

    #[tokio::test]
    async fn test_sink_failure_is_server_error() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let state = test_state(blocker.clone());

        let response = receive_file(&state, "u1", 0, "clip.bin", &payload(10)[..])
            .await
            .unwrap_err();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.uploads.get("u1").is_none());
        assert_eq!(std::fs::read(&blocker).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_and_removed() {
        let tmp = tempdir().unwrap();
        let state = test_state(tmp.path().to_path_buf());

        let response = receive_file(&state, "u1", 100, "clip.bin", &payload(1000)[..])
            .await
            .unwrap_err();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.uploads.get("u1").is_none());
        assert!(!tmp.path().join("u1.bin").exists());
    }
}
