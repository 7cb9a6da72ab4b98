use crate::config::Settings;
use crate::registry::ProgressRegistry;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub uploads: ProgressRegistry,
    pub tx: broadcast::Sender<String>,
}
