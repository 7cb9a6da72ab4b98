use crate::handlers::api::ProgressReport;
use crate::progress::ProgressSnapshot;
use crate::state::AppState;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

pub fn start_background_tasks(state: AppState) {
    // 1. Progress feed with per-upload speed
    let state_feed = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut last_bytes_map: HashMap<String, u64> = HashMap::new();

        loop {
            interval.tick().await;
            let snapshots = state_feed.uploads.snapshots();
            if let Some(msg) = progress_message(&snapshots, &mut last_bytes_map) {
                let _ = state_feed.tx.send(msg);
            }
        }
    });

    // 2. Retention sweeper for finished uploads
    let retention = Duration::from_secs(state.settings.retention_secs);
    if retention.is_zero() {
        info!("Upload retention disabled; finished uploads are kept until aborted.");
        return;
    }
    let state_sweep = state;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(retention.min(Duration::from_secs(60)));
        loop {
            interval.tick().await;
            let evicted = state_sweep.uploads.evict_finished(retention);
            if evicted > 0 {
                info!(
                    "Evicted {} finished uploads older than {:?}",
                    evicted, retention
                );
            }
        }
    });
}

/// Builds the `uploads` feed message, updating `last_bytes_map` with the
/// byte counts seen this tick. Returns `None` when nothing is registered.
fn progress_message(
    snapshots: &[ProgressSnapshot],
    last_bytes_map: &mut HashMap<String, u64>,
) -> Option<String> {
    let data: Vec<serde_json::Value> = snapshots
        .iter()
        .map(|snap| {
            let last = last_bytes_map.get(&snap.upload_id).cloned().unwrap_or(0);
            let speed = snap.bytes_written.saturating_sub(last); // bytes per second
            let mut value =
                serde_json::to_value(ProgressReport::from(snap.clone())).unwrap_or_default();
            value["speed"] = speed.into();
            value
        })
        .collect();

    // Forget uploads that left the registry
    last_bytes_map.retain(|id, _| snapshots.iter().any(|s| &s.upload_id == id));
    for snap in snapshots {
        last_bytes_map.insert(snap.upload_id.clone(), snap.bytes_written);
    }

    if data.is_empty() {
        return None;
    }
    Some(
        serde_json::json!({
            "type": "uploads",
            "data": data
        })
        .to_string(),
    )
}
