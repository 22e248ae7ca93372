//! Application configuration.
//!
//! Layering (later wins): built-in defaults → JSON config file → environment.
//! The binary accepts a positional port and an optional config file path.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Indicator periods fed to the atomic computer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaConfig {
    pub sma: Vec<usize>,
    pub ema: Vec<usize>,
    pub vwap: Vec<usize>,
    pub median: Vec<usize>,
    pub min: Vec<usize>,
    pub max: Vec<usize>,
    pub stddev: Vec<usize>,
    pub rsi: usize,
}

impl Default for TaConfig {
    fn default() -> Self {
        Self {
            sma: vec![5, 20],
            ema: vec![12, 26],
            vwap: vec![20],
            median: vec![20],
            min: vec![14],
            max: vec![14],
            stddev: vec![20],
            rsi: 14,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_port: u16,
    pub thread_pool_size: usize,
    pub listener_queue_cap: usize,
    pub log_level: String,
    pub log_format: String,
    pub log_file: String,
    pub metrics_enabled: bool,
    pub metrics_interval_sec: u64,
    pub ta_history_max: usize,
    pub ta: TaConfig,
    /// Upstream feed endpoints to connect out to (in addition to the /feed
    /// ingress route). Empty by default.
    pub feed_urls: Vec<String>,
    pub ob_depth: usize,
    pub ob_throttle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: 9002,
            thread_pool_size: 8,
            listener_queue_cap: 1024,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_file: String::new(),
            metrics_enabled: true,
            metrics_interval_sec: 60,
            ta_history_max: 512,
            ta: TaConfig::default(),
            feed_urls: Vec::new(),
            ob_depth: 20,
            ob_throttle_ms: 10,
        }
    }
}

/// Raw shape of the JSON config file; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FileConfig {
    ws_port: Option<u16>,
    thread_pool_size: Option<usize>,
    listener_queue_cap: Option<usize>,
    log_level: Option<String>,
    log_format: Option<String>,
    log_file: Option<String>,
    metrics_enabled: Option<bool>,
    metrics_interval_sec: Option<u64>,
    ta_history_max: Option<usize>,
    #[serde(rename = "taSMA")]
    ta_sma: Option<Vec<usize>>,
    #[serde(rename = "taEMA")]
    ta_ema: Option<Vec<usize>>,
    #[serde(rename = "taVWAP")]
    ta_vwap: Option<Vec<usize>>,
    #[serde(rename = "taMED")]
    ta_med: Option<Vec<usize>>,
    #[serde(rename = "taMIN")]
    ta_min: Option<Vec<usize>>,
    #[serde(rename = "taMAX")]
    ta_max: Option<Vec<usize>>,
    #[serde(rename = "taSTD")]
    ta_std: Option<Vec<usize>>,
    #[serde(rename = "taRSI")]
    ta_rsi: Option<usize>,
    feed_urls: Option<Vec<String>>,
    ob_depth: Option<usize>,
    ob_throttle_ms: Option<u64>,
}

impl Config {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        self.ws_port = env_parse("TICKMESH_WS_PORT", self.ws_port);
        self.thread_pool_size = env_parse("TICKMESH_THREADS", self.thread_pool_size);
        self.listener_queue_cap = env_parse("TICKMESH_LISTENER_Q", self.listener_queue_cap);
        if let Ok(v) = env::var("TICKMESH_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = env::var("TICKMESH_LOG_FORMAT") {
            self.log_format = v;
        }
        if let Ok(v) = env::var("TICKMESH_LOG_FILE") {
            self.log_file = v;
        }
        self.metrics_enabled = env_bool("TICKMESH_METRICS_ON", self.metrics_enabled);
        self.metrics_interval_sec = env_parse("TICKMESH_METRICS_EVERY", self.metrics_interval_sec);
        self.ta_history_max = env_parse("TICKMESH_TA_HISTORY_MAX", self.ta_history_max);
        self.ta.rsi = env_parse("TICKMESH_TA_RSI", self.ta.rsi);
        if let Ok(v) = env::var("TICKMESH_FEED_URLS") {
            self.feed_urls = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self.ob_depth = env_parse("TICKMESH_OB_DEPTH", self.ob_depth);
        self.ob_throttle_ms = env_parse("TICKMESH_OB_THROTTLE_MS", self.ob_throttle_ms);
    }

    /// Overlay a JSON config file on top of the current values.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let f: FileConfig = serde_json::from_str(&data)
            .with_context(|| format!("config file {} is not valid JSON", path.display()))?;

        macro_rules! take {
            ($field:ident, $dst:expr) => {
                if let Some(v) = f.$field {
                    $dst = v;
                }
            };
        }
        take!(ws_port, self.ws_port);
        take!(thread_pool_size, self.thread_pool_size);
        take!(listener_queue_cap, self.listener_queue_cap);
        take!(log_level, self.log_level);
        take!(log_format, self.log_format);
        take!(log_file, self.log_file);
        take!(metrics_enabled, self.metrics_enabled);
        take!(metrics_interval_sec, self.metrics_interval_sec);
        take!(ta_history_max, self.ta_history_max);
        take!(ta_sma, self.ta.sma);
        take!(ta_ema, self.ta.ema);
        take!(ta_vwap, self.ta.vwap);
        take!(ta_med, self.ta.median);
        take!(ta_min, self.ta.min);
        take!(ta_max, self.ta.max);
        take!(ta_std, self.ta.stddev);
        take!(ta_rsi, self.ta.rsi);
        take!(feed_urls, self.feed_urls);
        take!(ob_depth, self.ob_depth);
        take!(ob_throttle_ms, self.ob_throttle_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.ws_port, 9002);
        assert_eq!(cfg.thread_pool_size, 8);
        assert_eq!(cfg.listener_queue_cap, 1024);
        assert_eq!(cfg.ta.sma, vec![5, 20]);
        assert_eq!(cfg.ta.rsi, 14);
    }

    #[test]
    fn test_file_overlay() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"{{"wsPort": 9100, "taSMA": [3, 9, 27], "logFormat": "json", "feedUrls": ["ws://h:1/a"]}}"#
        )
        .unwrap();

        let mut cfg = Config::default();
        cfg.apply_file(tmp.path()).unwrap();
        assert_eq!(cfg.ws_port, 9100);
        assert_eq!(cfg.ta.sma, vec![3, 9, 27]);
        assert_eq!(cfg.log_format, "json");
        assert_eq!(cfg.feed_urls, vec!["ws://h:1/a".to_string()]);
        // untouched keys keep defaults
        assert_eq!(cfg.thread_pool_size, 8);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "not json").unwrap();
        let mut cfg = Config::default();
        assert!(cfg.apply_file(tmp.path()).is_err());
    }
}
