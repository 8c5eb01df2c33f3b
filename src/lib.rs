pub mod assembly;
pub mod audio;
pub mod bus;
pub mod config;
pub mod pipeline;
pub mod poller;
pub mod services;
pub mod storage;
pub mod utils;

use std::env;

use once_cell::sync::Lazy;

pub use config::PipelineConfig;
pub use pipeline::{PipelineOrchestrator, TaskRequest};

const P2V_LOG_PATH: &str = "./p2v_data/logs/";

pub static LOG_PATH: Lazy<String> = Lazy::new(|| match env::var("P2V_LOG_PATH") {
    Ok(path) => path,
    Err(_) => dotenv::var("P2V_LOG_PATH").unwrap_or_else(|_| P2V_LOG_PATH.to_string()),
});

/// Load `.env` and make sure the log directory exists.
pub fn init_env() {
    dotenv::dotenv().ok();

    std::fs::create_dir_all(LOG_PATH.as_str()).unwrap_or_else(|e| {
        eprintln!("Failed to create log directory: {}", e);
    });
}
