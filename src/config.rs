// Configuration for the instrumentation core
//
// Configuration is loaded in order of precedence:
// 1. Environment variables (highest priority)
// 2. Config file (~/.config/rspy/config.toml)
// 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Detection bootstrap tuning
    pub detection: DetectionConfig,

    /// Render-tree bridge tuning
    pub bridge: BridgeConfig,

    /// Monitor log capacities
    pub monitors: MonitorsConfig,

    /// Context assembler slice sizes
    pub assembler: AssemblerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Telemetry session export (JSONL)
    pub export: ExportConfig,
}

/// Detection bootstrap tuning
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Interval between detection attempts
    pub poll_interval_ms: u64,
    /// Total attempts before resolving "not a React page"
    pub max_attempts: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        // 50 x 100ms = a five second budget
        Self {
            poll_interval_ms: 100,
            max_attempts: 50,
        }
    }
}

/// Render-tree bridge tuning
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Commit-hook registration attempts before permanent degradation
    pub hook_retry_attempts: u32,
    /// Delay between registration attempts
    pub hook_retry_delay_ms: u64,
    /// Walk guard against malformed/cyclic trees
    pub max_walk_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hook_retry_attempts: 10,
            hook_retry_delay_ms: 100,
            max_walk_depth: 512,
        }
    }
}

/// Monitor log capacities. Zero means append-only (no eviction).
#[derive(Debug, Clone)]
pub struct MonitorsConfig {
    pub console_capacity: usize,
    pub network_capacity: usize,
    pub dom_capacity: usize,
    /// Element id to observe mutations under; None means document body
    pub dom_root: Option<String>,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            console_capacity: 1000,
            network_capacity: 500,
            dom_capacity: 1000,
            dom_root: None,
        }
    }
}

/// Context assembler slice sizes
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub console_slice: usize,
    pub network_slice: usize,
    pub dom_slice: usize,
    /// Hook entries shown per selected component
    pub hook_preview: usize,
    /// Character cap for serialized values in context blocks
    pub value_preview_chars: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            console_slice: 50,
            network_slice: 20,
            dom_slice: 30,
            hook_preview: 8,
            value_preview_chars: 400,
        }
    }
}

/// Log file rotation frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter level when RUST_LOG is unset
    pub level: String,
    /// Whether to also write JSON logs to rotating files
    pub file_enabled: bool,
    pub file_dir: PathBuf,
    pub file_prefix: String,
    pub file_rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs"),
            file_prefix: "rspy".to_string(),
            file_rotation: LogRotation::Daily,
        }
    }
}

/// Telemetry session export configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./sessions"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (everything optional; absent keys keep defaults)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub detection: Option<FileDetection>,
    pub bridge: Option<FileBridge>,
    pub monitors: Option<FileMonitors>,
    pub assembler: Option<FileAssembler>,
    pub logging: Option<FileLogging>,
    pub export: Option<FileExport>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileDetection {
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileBridge {
    pub hook_retry_attempts: Option<u32>,
    pub hook_retry_delay_ms: Option<u64>,
    pub max_walk_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileMonitors {
    pub console_capacity: Option<usize>,
    pub network_capacity: Option<usize>,
    pub dom_capacity: Option<usize>,
    pub dom_root: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileAssembler {
    pub console_slice: Option<usize>,
    pub network_slice: Option<usize>,
    pub dom_slice: Option<usize>,
    pub hook_preview: Option<usize>,
    pub value_preview_chars: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub file_rotation: Option<LogRotation>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileExport {
    pub enabled: Option<bool>,
    pub dir: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/rspy/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("rspy").join("config.toml"))
    }

    /// Load configuration with full precedence: env > file > defaults
    pub fn load() -> Self {
        let file = Self::load_file_config();
        let mut config = Self::default().merge_file(file);
        config.apply_env();
        config
    }

    /// Load file config if it exists; a missing file is fine, a broken file
    /// falls back to defaults with a warning (the core must never refuse to
    /// attach over a stale config).
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("ignoring unparseable config {}: {}", path.display(), e);
                    FileConfig::default()
                }
            },
            Err(_) => FileConfig::default(),
        }
    }

    fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(d) = file.detection {
            if let Some(v) = d.poll_interval_ms {
                self.detection.poll_interval_ms = v;
            }
            if let Some(v) = d.max_attempts {
                self.detection.max_attempts = v;
            }
        }
        if let Some(b) = file.bridge {
            if let Some(v) = b.hook_retry_attempts {
                self.bridge.hook_retry_attempts = v;
            }
            if let Some(v) = b.hook_retry_delay_ms {
                self.bridge.hook_retry_delay_ms = v;
            }
            if let Some(v) = b.max_walk_depth {
                self.bridge.max_walk_depth = v;
            }
        }
        if let Some(m) = file.monitors {
            if let Some(v) = m.console_capacity {
                self.monitors.console_capacity = v;
            }
            if let Some(v) = m.network_capacity {
                self.monitors.network_capacity = v;
            }
            if let Some(v) = m.dom_capacity {
                self.monitors.dom_capacity = v;
            }
            if m.dom_root.is_some() {
                self.monitors.dom_root = m.dom_root;
            }
        }
        if let Some(a) = file.assembler {
            if let Some(v) = a.console_slice {
                self.assembler.console_slice = v;
            }
            if let Some(v) = a.network_slice {
                self.assembler.network_slice = v;
            }
            if let Some(v) = a.dom_slice {
                self.assembler.dom_slice = v;
            }
            if let Some(v) = a.hook_preview {
                self.assembler.hook_preview = v;
            }
            if let Some(v) = a.value_preview_chars {
                self.assembler.value_preview_chars = v;
            }
        }
        if let Some(l) = file.logging {
            if let Some(v) = l.level {
                self.logging.level = v;
            }
            if let Some(v) = l.file_enabled {
                self.logging.file_enabled = v;
            }
            if let Some(v) = l.file_dir {
                self.logging.file_dir = PathBuf::from(v);
            }
            if let Some(v) = l.file_prefix {
                self.logging.file_prefix = v;
            }
            if let Some(v) = l.file_rotation {
                self.logging.file_rotation = v;
            }
        }
        if let Some(e) = file.export {
            if let Some(v) = e.enabled {
                self.export.enabled = v;
            }
            if let Some(v) = e.dir {
                self.export.dir = PathBuf::from(v);
            }
        }
        self
    }

    /// Environment overrides, RSPY_* namespace
    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u64>("RSPY_DETECT_POLL_MS") {
            self.detection.poll_interval_ms = v;
        }
        if let Some(v) = env_parse::<u32>("RSPY_DETECT_ATTEMPTS") {
            self.detection.max_attempts = v;
        }
        if let Some(v) = env_parse::<usize>("RSPY_CONSOLE_CAPACITY") {
            self.monitors.console_capacity = v;
        }
        if let Some(v) = env_parse::<usize>("RSPY_NETWORK_CAPACITY") {
            self.monitors.network_capacity = v;
        }
        if let Some(v) = env_parse::<usize>("RSPY_DOM_CAPACITY") {
            self.monitors.dom_capacity = v;
        }
        if let Ok(v) = std::env::var("RSPY_LOG") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("RSPY_EXPORT_DIR") {
            self.export.enabled = true;
            self.export.dir = PathBuf::from(v);
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec_budgets() {
        let config = Config::default();
        assert_eq!(config.detection.poll_interval_ms, 100);
        assert_eq!(config.detection.max_attempts, 50);
        assert_eq!(config.bridge.hook_retry_attempts, 10);
        assert_eq!(config.monitors.console_capacity, 1000);
        assert_eq!(config.monitors.network_capacity, 500);
        assert_eq!(config.monitors.dom_capacity, 1000);
        assert_eq!(config.assembler.console_slice, 50);
        assert_eq!(config.assembler.network_slice, 20);
        assert_eq!(config.assembler.dom_slice, 30);
    }

    #[test]
    fn test_file_merge_overrides_only_present_keys() {
        let file: FileConfig = toml::from_str(
            r#"
            [monitors]
            console_capacity = 10

            [logging]
            level = "debug"
            file_rotation = "hourly"
            "#,
        )
        .unwrap();
        let config = Config::default().merge_file(file);
        assert_eq!(config.monitors.console_capacity, 10);
        assert_eq!(config.monitors.network_capacity, 500);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file_rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_empty_file_keeps_defaults() {
        let file: FileConfig = toml::from_str("").unwrap();
        let config = Config::default().merge_file(file);
        assert_eq!(config.monitors.console_capacity, 1000);
        assert_eq!(config.assembler.hook_preview, 8);
    }
}
