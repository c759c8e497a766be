use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// PostgreSQL connection URL. Absent means the in-memory store.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Polling intervals for the five reconciliation jobs, in seconds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub inspection_interval_secs: u64,
    pub auto_mark_interval_secs: u64,
    pub auto_close_interval_secs: u64,
    pub transaction_close_interval_secs: u64,
    pub update_status_interval_secs: u64,
    /// Batch size for the transaction-close and update-status scans.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            inspection_interval_secs: 24 * 60 * 60,
            auto_mark_interval_secs: 24 * 60 * 60,
            auto_close_interval_secs: 24 * 60 * 60,
            transaction_close_interval_secs: 10 * 60,
            update_status_interval_secs: 10 * 60,
            batch_size: 20,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.inspection_interval_secs, 86400);
        assert_eq!(cfg.transaction_close_interval_secs, 600);
        assert_eq!(cfg.update_status_interval_secs, 600);
        assert_eq!(cfg.batch_size, 20);
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
log_level: info
log_dir: ./logs
log_file: escrowd.log
use_json: false
rotation: daily
enable_tracing: true
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.postgres_url.is_none());
        assert_eq!(cfg.scheduler.batch_size, 20);
    }
}
