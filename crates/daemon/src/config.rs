//! Configuration management for the deskpin daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `%APPDATA%/deskpin/config.toml` (Windows standard)
//! 2. `~/.config/deskpin/config.toml` (Unix-style, for WSL compatibility)
//! 3. `./config.toml` (current directory, for development)

use anyhow::{Context, Result};
use deskpin_core_engine::DetectionConfig;
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Allowed range for `detection.poll_interval_ms`.
pub const POLL_INTERVAL_RANGE_MS: (u64, u64) = (5, 200);
/// Allowed range for `detection.timeout_ms`.
pub const TIMEOUT_RANGE_MS: (u64, u64) = (50, 5_000);
/// Upper bound for `detection.cooldown_ms`.
pub const MAX_COOLDOWN_MS: u64 = 30_000;

/// Main configuration structure for deskpin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Switch detection timing.
    pub detection: DetectionSettings,
    /// Behavior configuration.
    pub behavior: BehaviorConfig,
    /// Windows that can never be pinned and never count towards the fingerprint.
    #[serde(default)]
    pub ignore_rules: Vec<IgnoreRule>,
}

/// Which monitors the desktop fingerprint looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionScope {
    /// Every visible window on every monitor.
    #[default]
    AllMonitors,
    /// Only windows on the primary monitor.
    PrimaryMonitor,
}

/// Switch detection timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Interval between fingerprint polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for the desktop to change after a hotkey, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Quiet period after every detection cycle, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Fingerprint scope.
    #[serde(default)]
    pub scope: DetectionScope,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            cooldown_ms: default_cooldown_ms(),
            scope: DetectionScope::default(),
        }
    }
}

impl DetectionSettings {
    /// Timing parameters for the detector.
    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

/// Behavior-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Whether hotkey signals trigger detection at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error).
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_poll_interval_ms() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    300
}

fn default_cooldown_ms() -> u64 {
    1500
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Ignore Rules
// ============================================================================

/// A rule excluding windows from pinning and fingerprinting.
///
/// # Example Config
///
/// ```toml
/// [[ignore_rules]]
/// match_class = "^Chrome_WidgetWin_1$"
/// match_title = ".*Picture-in-Picture.*"
///
/// [[ignore_rules]]
/// match_class = "#32770"  # Windows dialogs
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreRule {
    /// Regex pattern to match window class name.
    #[serde(default)]
    pub match_class: Option<String>,

    /// Regex pattern to match window title.
    #[serde(default)]
    pub match_title: Option<String>,
}

/// An ignore rule pattern that is not a valid regex.
#[derive(Debug, Error)]
#[error("Invalid regex in ignore_rules[{index}].{field}: {source}")]
pub struct RuleError {
    pub index: usize,
    pub field: &'static str,
    #[source]
    pub source: regex::Error,
}

/// An [`IgnoreRule`] with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    class: Option<Regex>,
    title: Option<Regex>,
}

impl CompiledRule {
    /// Check if this rule matches a window with the given properties.
    ///
    /// All specified match criteria must match for the rule to apply.
    /// If no match criteria are specified, the rule matches nothing.
    pub fn matches(&self, class_name: &str, title: &str) -> bool {
        if self.class.is_none() && self.title.is_none() {
            return false;
        }

        if let Some(ref re) = self.class {
            if !re.is_match(class_name) {
                return false;
            }
        }

        if let Some(ref re) = self.title {
            if !re.is_match(title) {
                return false;
            }
        }

        true
    }
}

impl IgnoreRule {
    fn compile(&self, index: usize) -> Result<CompiledRule, RuleError> {
        let compile = |field: &'static str, pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| RuleError { index, field, source })
        };
        Ok(CompiledRule {
            class: compile("match_class", &self.match_class)?,
            title: compile("match_title", &self.match_title)?,
        })
    }
}

/// A configuration value that was out of range and has been corrected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn clamp_field(field: &'static str, value: &mut u64, min: u64, max: u64, warnings: &mut Vec<ConfigWarning>) {
    let clamped = (*value).clamp(min, max);
    if clamped != *value {
        warnings.push(ConfigWarning {
            field,
            message: format!("{} is outside {}..={}, using {}", value, min, max, clamped),
        });
        *value = clamped;
    }
}

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Tries the following locations in order:
    /// 1. `%APPDATA%/deskpin/config.toml`
    /// 2. `~/.config/deskpin/config.toml`
    /// 3. `./config.toml`
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Clamp out-of-range values in place and drop ignore rules that fail to compile.
    ///
    /// Returns one warning per corrected value.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let detection = &mut self.detection;

        let (min, max) = POLL_INTERVAL_RANGE_MS;
        clamp_field("detection.poll_interval_ms", &mut detection.poll_interval_ms, min, max, &mut warnings);
        let (min, max) = TIMEOUT_RANGE_MS;
        clamp_field("detection.timeout_ms", &mut detection.timeout_ms, min, max, &mut warnings);
        clamp_field("detection.cooldown_ms", &mut detection.cooldown_ms, 0, MAX_COOLDOWN_MS, &mut warnings);

        if detection.poll_interval_ms > detection.timeout_ms {
            warnings.push(ConfigWarning {
                field: "detection.poll_interval_ms",
                message: format!(
                    "{} exceeds timeout_ms, using {}",
                    detection.poll_interval_ms, detection.timeout_ms
                ),
            });
            detection.poll_interval_ms = detection.timeout_ms;
        }

        let mut kept = Vec::with_capacity(self.ignore_rules.len());
        for (index, rule) in self.ignore_rules.drain(..).enumerate() {
            match rule.compile(index) {
                Ok(_) => kept.push(rule),
                Err(e) => warnings.push(ConfigWarning {
                    field: "ignore_rules",
                    message: format!("{}; rule dropped", e),
                }),
            }
        }
        self.ignore_rules = kept;

        warnings
    }

    /// Write the default configuration to `path` unless a file already exists there.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        tracing::info!("Wrote default config to {}", path.display());
        Ok(())
    }

    /// Compile the ignore rules, skipping (and logging) invalid ones.
    pub fn compiled_rules(&self) -> Vec<CompiledRule> {
        self.ignore_rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| match rule.compile(index) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            })
            .collect()
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Windows standard: %APPDATA%/deskpin/config.toml
    if let Some(proj_dirs) = project_dirs() {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. Unix-style: ~/.config/deskpin/config.toml
    if let Some(home) = dirs_home() {
        paths.push(home.join(".config").join("deskpin").join("config.toml"));
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

/// Path the tray's "Open Config" item opens: the first existing config file,
/// otherwise the standard location.
pub fn preferred_config_path() -> Option<PathBuf> {
    let paths = config_paths();
    paths
        .iter()
        .find(|p| p.exists())
        .cloned()
        .or_else(|| paths.into_iter().next())
}

/// Project directories shared by the config and the pin store.
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "deskpin", "deskpin")
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
