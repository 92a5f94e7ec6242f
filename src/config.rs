//! Environment-driven configuration.

use crate::supervisor::SupervisorConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub http_port: u16,
    /// Address of the whatsapp-web.js sidecar.
    pub bridge_addr: String,
    pub ready_timeout: Duration,
    pub restart_base_delay: Duration,
    pub restart_max_delay: Duration,
    pub tesseract_command: String,
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = std::env::var("BOLETABOT_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.boletabot/boletabot.db")
        });

        Self {
            db_path,
            http_port: env_parsed("BOLETABOT_PORT", 3000),
            bridge_addr: std::env::var("BOLETABOT_BRIDGE_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8765".to_string()),
            ready_timeout: Duration::from_millis(env_parsed("BOLETABOT_READY_TIMEOUT_MS", 45_000)),
            restart_base_delay: Duration::from_millis(env_parsed("BOLETABOT_RESTART_BASE_MS", 5_000)),
            restart_max_delay: Duration::from_millis(env_parsed("BOLETABOT_RESTART_MAX_MS", 60_000)),
            tesseract_command: std::env::var("BOLETABOT_TESSERACT")
                .unwrap_or_else(|_| "tesseract".to_string()),
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            ready_timeout: self.ready_timeout,
            base_delay: self.restart_base_delay,
            max_delay: self.restart_max_delay,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
