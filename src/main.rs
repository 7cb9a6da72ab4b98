use local_ip_address::local_ip;
use std::net::SocketAddr;
use streamload::config::Settings;
use streamload::registry::ProgressRegistry;
use streamload::state::AppState;
use streamload::{create_app, tasks};
use tokio::sync::broadcast;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let settings = Settings::new().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .init();

    info!("Starting Streamload...");

    if !settings.files_dir.exists() {
        info!("Creating directory {:?}", settings.files_dir);
        std::fs::create_dir_all(&settings.files_dir).expect("Failed to create files directory");
        info!("Directory {:?} successfully created.", settings.files_dir);
    }

    let local_ip = local_ip().unwrap_or("127.0.0.1".parse().unwrap());
    let host_url = format!("http://{}:{}", local_ip, settings.server_port);
    let (tx, _) = broadcast::channel(100);

    let state = AppState {
        settings: settings.clone(),
        uploads: ProgressRegistry::new(),
        tx,
    };

    // Start background tasks (Progress feed, Retention)
    tasks::start_background_tasks(state.clone());

    // --- Router Setup ---
    let app = create_app(state);

    let port = settings.server_port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on http://{}", addr);
    info!("Network address: {}", host_url);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
