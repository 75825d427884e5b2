//! Layered configuration.
//!
//! Values are merged with `figment`, lowest priority first:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. the TOML file (`config.toml` in the platform config directory, or
//!    `--config PATH`),
//! 3. the selected `[profile.NAME]` table of that file, if any,
//! 4. environment variables prefixed `TAKEOUT_DEDUPE_`
//!    (e.g. `TAKEOUT_DEDUPE_IO_THREADS=8`),
//! 5. command-line flags ([`Config::merge_cli`], [`Config::merge_scan_options`]).
//!
//! A file that fails to parse is reported and ignored; the run continues with
//! the remaining layers.
//!
//! ```toml
//! strategy = "full"
//! io_threads = 8
//! mtime_tolerance_secs = 2.0
//!
//! [profile.nas]
//! io_threads = 2
//! ignore_patterns = ["@eaDir/", "*.db"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_DATE_BATCH_SIZE;
use crate::cli::{Cli, ScanOptions};
use crate::error::DEFAULT_ERROR_SAMPLE_SIZE;
use crate::reconcile::DEFAULT_MTIME_TOLERANCE_SECS;
use crate::scanner::directory::DEFAULT_IO_THREADS;
use crate::scanner::{Strategy, WalkerConfig};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TAKEOUT_DEDUPE_";

/// File name of the fingerprint cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "fingerprints.db";

/// Errors while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be parsed or has a value of the wrong type.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    /// No platform directory is available for the default paths.
    #[error("Cannot determine platform directories (is $HOME set?)")]
    NoProjectDirs,
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Invalid(Box::new(err))
    }
}

/// Overrides allowed inside a `[profile.NAME]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Fingerprint strategy
    pub strategy: Option<Strategy>,
    /// Hashing workers
    pub io_threads: Option<usize>,
    /// Cache database path
    pub cache_path: Option<PathBuf>,
    /// Follow symbolic links in destination trees
    pub follow_symlinks: Option<bool>,
    /// Skip hidden files in destination trees
    pub skip_hidden: Option<bool>,
    /// Gitignore-style patterns skipped in destination trees
    pub ignore_patterns: Option<Vec<String>>,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fingerprint strategy, resolved once per run
    pub strategy: Strategy,
    /// Hashing workers
    pub io_threads: usize,
    /// Cache database path; platform cache directory when unset
    pub cache_path: Option<PathBuf>,
    /// Date writes buffered before a flush
    pub date_batch_size: usize,
    /// Mtime difference tolerated when reusing a cached key
    pub mtime_tolerance_secs: f64,
    /// Error messages kept verbatim per operation
    pub error_sample_size: usize,
    /// Follow symbolic links in destination trees
    pub follow_symlinks: bool,
    /// Skip hidden files in destination trees
    pub skip_hidden: bool,
    /// Gitignore-style patterns skipped in destination trees
    pub ignore_patterns: Vec<String>,
    /// Named profiles
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, ProfileConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            io_threads: DEFAULT_IO_THREADS,
            cache_path: None,
            date_batch_size: DEFAULT_DATE_BATCH_SIZE,
            mtime_tolerance_secs: DEFAULT_MTIME_TOLERANCE_SECS,
            error_sample_size: DEFAULT_ERROR_SAMPLE_SIZE,
            follow_symlinks: false,
            skip_hidden: false,
            ignore_patterns: Vec::new(),
            profile: BTreeMap::new(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "takeout-dedupe")
}

impl Config {
    /// Default location of the config file.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Default location of the fingerprint cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProjectDirs`] when no home directory exists.
    pub fn default_cache_path() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|dirs| dirs.cache_dir().join(CACHE_FILE_NAME))
            .ok_or(ConfigError::NoProjectDirs)
    }

    /// Load from `path` (or the default file), falling back to defaults
    /// when the file is malformed.
    #[must_use]
    pub fn load(path: Option<&Path>, profile: Option<&str>) -> Self {
        let path = path.map(Path::to_path_buf).or_else(Self::default_config_path);
        match path {
            Some(path) => Self::load_from_path(path, profile),
            None => Self::try_load(None, profile).unwrap_or_default(),
        }
    }

    /// Load from a specific file, falling back to defaults on error.
    #[must_use]
    pub fn load_from_path(path: PathBuf, profile: Option<&str>) -> Self {
        match Self::try_load(Some(&path), profile) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring config file {}: {}", path.display(), e);
                Self::try_load(None, profile).unwrap_or_default()
            }
        }
    }

    /// Load all layers below the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a layer has the wrong shape.
    pub fn try_load(path: Option<&Path>, profile: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if path.exists() {
                log::debug!("Loading config from {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(name) = profile {
            let key = format!("profile.{name}");
            if figment.find_value(&key).is_ok() {
                log::debug!("Applying profile '{}'", name);
                let overrides = figment.focus(&key);
                figment = figment.merge(overrides);
            } else {
                log::warn!("Profile '{}' not found, using base configuration", name);
            }
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]))
            .extract()?;
        Ok(config.validated())
    }

    fn validated(mut self) -> Self {
        if self.io_threads == 0 {
            log::warn!("io_threads must be at least 1, using 1");
            self.io_threads = 1;
        }
        if self.date_batch_size == 0 {
            self.date_batch_size = 1;
        }
        if !self.mtime_tolerance_secs.is_finite() || self.mtime_tolerance_secs < 0.0 {
            log::warn!(
                "Invalid mtime_tolerance_secs {}, using {}",
                self.mtime_tolerance_secs,
                DEFAULT_MTIME_TOLERANCE_SECS
            );
            self.mtime_tolerance_secs = DEFAULT_MTIME_TOLERANCE_SECS;
        }
        self
    }

    /// Apply global command-line flags.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(cache) = &cli.cache {
            self.cache_path = Some(cache.clone());
        }
    }

    /// Apply per-command scan flags.
    pub fn merge_scan_options(&mut self, options: &ScanOptions) {
        if let Some(strategy) = options.strategy {
            self.strategy = strategy;
        }
        if let Some(io_threads) = options.io_threads {
            self.io_threads = io_threads.max(1);
        }
        if options.follow_symlinks {
            self.follow_symlinks = true;
        }
        if options.skip_hidden {
            self.skip_hidden = true;
        }
        self.ignore_patterns
            .extend(options.ignore_patterns.iter().cloned());
    }

    /// Walker settings for destination trees.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig::new(
            self.follow_symlinks,
            self.skip_hidden,
            self.ignore_patterns.clone(),
        )
    }

    /// Cache path to use: configured or platform default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProjectDirs`] when no default exists.
    pub fn resolved_cache_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_cache_path(),
        }
    }
}
