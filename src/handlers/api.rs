use crate::progress::ProgressSnapshot;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ProgressReport {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    pub percent: Option<f64>,
}

impl From<ProgressSnapshot> for ProgressReport {
    fn from(snapshot: ProgressSnapshot) -> Self {
        let percent = snapshot.percent_complete();
        Self { snapshot, percent }
    }
}

pub async fn list_uploads(State(state): State<AppState>) -> Json<Vec<ProgressReport>> {
    let mut reports: Vec<ProgressReport> = state
        .uploads
        .snapshots()
        .into_iter()
        .map(ProgressReport::from)
        .collect();
    reports.sort_by(|a, b| a.snapshot.upload_id.cmp(&b.snapshot.upload_id));
    Json(reports)
}

pub async fn upload_progress(
    Path(uid): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProgressReport>, (StatusCode, &'static str)> {
    match state.uploads.get(&uid) {
        Some(progress) => Ok(Json(progress.snapshot().into())),
        None => Err((StatusCode::NOT_FOUND, "Upload not found")),
    }
}

pub async fn abort_upload(Path(uid): Path<String>, State(state): State<AppState>) -> StatusCode {
    info!("Abort requested for upload {}", uid);
    state.uploads.abort(&uid);
    StatusCode::NO_CONTENT
}

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.tx.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|msg| match msg {
        Ok(msg) => Ok(Event::default().data(msg)),
        Err(_) => Ok(Event::default().comment("keepalive")),
    });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
