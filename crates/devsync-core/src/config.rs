//! Configuration module for devsync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, defaults, and a builder pattern for
//! programmatic use.
//!
//! Every recognized option is an explicit field with a default; the whole
//! structure is validated once at session construction, never probed during
//! sync decisions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for devsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub ignore: IgnoreConfig,
    pub bandwidth: BandwidthConfig,
    pub transfers: TransfersConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local project directory to mirror.
    pub local_root: PathBuf,
    /// Absolute destination directory inside the remote container.
    pub remote_root: String,
    /// Block the start call until the initial reconciliation completes.
    pub wait_for_initial_sync: bool,
    /// Seconds between remote change-list polls.
    pub poll_interval: u64,
    /// Milliseconds a local path must stay quiet before its change is synced.
    pub debounce_delay_ms: u64,
    /// Optional path to a persisted index snapshot to restore and keep updated.
    pub index_snapshot: Option<PathBuf>,
}

/// Ignore pattern settings (gitignore syntax).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Patterns excluded from every sync decision in both directions.
    pub patterns: Vec<String>,
    /// Patterns excluded from uploads only; remote deletions are still
    /// blocked for matching paths, nothing else is.
    pub upload_exclude: Vec<String>,
}

/// Per-direction bandwidth caps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandwidthConfig {
    /// Upload cap in kilobytes per second; 0 means unlimited.
    pub upload_kbps: u64,
    /// Download cap in kilobytes per second; 0 means unlimited.
    pub download_kbps: u64,
}

/// Transfer worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransfersConfig {
    /// Maximum concurrent upstream transfers.
    pub upload_workers: u32,
    /// Maximum concurrent downstream transfers.
    pub download_workers: u32,
}

/// Remote channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Command (argv) that attaches to the remote endpoint and bridges the
    /// framed protocol over its stdio, e.g. an exec into the container.
    pub attach_command: Vec<String>,
    /// Seconds allowed for channel establishment.
    pub connect_timeout: u64,
    /// Seconds allowed per logical operation (change-list request, transfer).
    pub request_timeout: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file; stderr when absent.
    pub file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("."),
            remote_root: "/app".to_string(),
            wait_for_initial_sync: true,
            poll_interval: 2,
            debounce_delay_ms: 400,
            index_snapshot: None,
        }
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            upload_workers: 4,
            download_workers: 4,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            attach_command: Vec::new(),
            connect_timeout: 30,
            request_timeout: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/devsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("devsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !self.sync.remote_root.starts_with('/') {
            errors.push(ValidationError {
                field: "sync.remote_root".into(),
                message: format!("must be an absolute path: {}", self.sync.remote_root),
            });
        }

        // Check local root only when it does not start with `~` (tilde is
        // expanded at runtime).
        let root_str = self.sync.local_root.to_string_lossy();
        if !root_str.starts_with('~') && !self.sync.local_root.is_dir() {
            errors.push(ValidationError {
                field: "sync.local_root".into(),
                message: format!(
                    "directory does not exist: {}",
                    self.sync.local_root.display()
                ),
            });
        }

        // --- transfers ---
        if self.transfers.upload_workers == 0 || self.transfers.upload_workers > 32 {
            errors.push(ValidationError {
                field: "transfers.upload_workers".into(),
                message: "must be in range 1..=32".into(),
            });
        }
        if self.transfers.download_workers == 0 || self.transfers.download_workers > 32 {
            errors.push(ValidationError {
                field: "transfers.download_workers".into(),
                message: "must be in range 1..=32".into(),
            });
        }

        // --- transport ---
        if self.transport.attach_command.is_empty() {
            errors.push(ValidationError {
                field: "transport.attach_command".into(),
                message: "must name the command that attaches to the remote endpoint".into(),
            });
        }
        if self.transport.connect_timeout == 0 {
            errors.push(ValidationError {
                field: "transport.connect_timeout".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.transport.request_timeout == 0 {
            errors.push(ValidationError {
                field: "transport.request_timeout".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use devsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .local_root(PathBuf::from("/work/app"))
///     .remote_root("/app")
///     .upload_kbps(512)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn local_root(mut self, root: PathBuf) -> Self {
        self.config.sync.local_root = root;
        self
    }

    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        self.config.sync.remote_root = root.into();
        self
    }

    pub fn wait_for_initial_sync(mut self, wait: bool) -> Self {
        self.config.sync.wait_for_initial_sync = wait;
        self
    }

    pub fn poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn debounce_delay_ms(mut self, millis: u64) -> Self {
        self.config.sync.debounce_delay_ms = millis;
        self
    }

    pub fn index_snapshot(mut self, path: PathBuf) -> Self {
        self.config.sync.index_snapshot = Some(path);
        self
    }

    // --- ignore ---

    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore.patterns = patterns;
        self
    }

    pub fn upload_exclude(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore.upload_exclude = patterns;
        self
    }

    // --- bandwidth ---

    pub fn upload_kbps(mut self, kbps: u64) -> Self {
        self.config.bandwidth.upload_kbps = kbps;
        self
    }

    pub fn download_kbps(mut self, kbps: u64) -> Self {
        self.config.bandwidth.download_kbps = kbps;
        self
    }

    // --- transfers ---

    pub fn upload_workers(mut self, n: u32) -> Self {
        self.config.transfers.upload_workers = n;
        self
    }

    pub fn download_workers(mut self, n: u32) -> Self {
        self.config.transfers.download_workers = n;
        self
    }

    // --- transport ---

    pub fn attach_command(mut self, argv: Vec<String>) -> Self {
        self.config.transport.attach_command = argv;
        self
    }

    pub fn connect_timeout(mut self, seconds: u64) -> Self {
        self.config.transport.connect_timeout = seconds;
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.config.transport.request_timeout = seconds;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = Some(file);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
