use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server_port: u16,
    pub files_dir: PathBuf,
    pub log_level: String,
    pub chunk_size: usize,
    pub retention_secs: u64, // 0 keeps finished uploads forever
    pub max_upload_bytes: u64,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            // Default settings
            .set_default("server_port", 3000)?
            .set_default("files_dir", "./files")?
            .set_default("log_level", "info")?
            .set_default("chunk_size", 64 * 1024)?
            .set_default("retention_secs", 3600)?
            .set_default("max_upload_bytes", 4u64 * 1024 * 1024 * 1024)?
            // Config file (optional)
            .add_source(File::with_name("config").required(false))
            // Environment variables (e.g. STREAMLOAD_SERVER_PORT=8080)
            .add_source(Environment::with_prefix("STREAMLOAD"));

        builder.build()?.try_deserialize()
    }
}
