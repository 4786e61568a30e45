//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DsgError, Result};

/// 700 MiB, the stock limit for a managed site tree.
pub const DEFAULT_LIMIT_BYTES: u64 = 700 * 1024 * 1024;

/// Full guard configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub guard: GuardConfig,
    pub cache: CacheConfig,
    pub scanner: ScannerConfig,
    pub removable: RemovableConfig,
    pub paths: PathsConfig,
}

/// What is measured and where the line is drawn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardConfig {
    /// Root of the managed directory tree.
    pub root_path: PathBuf,
    /// Enforcement limit in exact bytes.
    pub limit_bytes: u64,
}

/// Usage cache behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    /// Drop the cached measurement whenever an operation is admitted; the
    /// caller is about to write. On by default.
    pub invalidate_on_admit: bool,
}

/// Usage scanner behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub parallelism: usize,
    pub one_file_system: bool,
    pub excluded_paths: Vec<PathBuf>,
    /// Scan deadline in milliseconds; 0 disables it.
    pub timeout_ms: u64,
    pub max_recorded_skips: usize,
}

/// Patterns (regex, matched against root-relative paths) for assets that are
/// safe to suggest for removal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemovableConfig {
    pub patterns: Vec<String>,
}

/// Filesystem paths used by dsg itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/www/html"),
            limit_bytes: DEFAULT_LIMIT_BYTES,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3_600,
            invalidate_on_admit: true,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            one_file_system: false,
            excluded_paths: Vec::new(),
            timeout_ms: 0,
            max_recorded_skips: 256,
        }
    }
}

impl Default for RemovableConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                r"^wp-content/themes/twenty[a-z-]+$".to_string(),
                r"^wp-content/plugins/hello\.php$".to_string(),
                r"^wp-content/plugins/akismet$".to_string(),
                r"^wp-content/upgrade$".to_string(),
                r"^wp-content/cache$".to_string(),
            ],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[DSG-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("dsg").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("dsg")
                .join("activity.jsonl"),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl ScannerConfig {
    /// Scan deadline, if one is configured.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DsgError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DsgError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form so it is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DSG_GUARD_ROOT_PATH") {
            self.guard.root_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DSG_GUARD_LIMIT_BYTES") {
            self.guard.limit_bytes = parse_env("DSG_GUARD_LIMIT_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("DSG_CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = parse_env("DSG_CACHE_TTL_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("DSG_CACHE_INVALIDATE_ON_ADMIT") {
            self.cache.invalidate_on_admit = parse_env("DSG_CACHE_INVALIDATE_ON_ADMIT", &raw)?;
        }
        if let Some(raw) = lookup("DSG_SCANNER_PARALLELISM") {
            self.scanner.parallelism = parse_env("DSG_SCANNER_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("DSG_SCANNER_ONE_FILE_SYSTEM") {
            self.scanner.one_file_system = parse_env("DSG_SCANNER_ONE_FILE_SYSTEM", &raw)?;
        }
        if let Some(raw) = lookup("DSG_SCANNER_TIMEOUT_MS") {
            self.scanner.timeout_ms = parse_env("DSG_SCANNER_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("DSG_LOG_JSONL_PATH") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Strip trailing slashes so exclusions compare equal to walked paths.
    fn normalize_paths(&mut self) {
        for path in std::iter::once(&mut self.guard.root_path).chain(&mut self.scanner.excluded_paths)
        {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.guard.root_path.as_os_str().is_empty() {
            return Err(DsgError::InvalidConfig {
                details: "guard.root_path must not be empty".to_string(),
            });
        }
        if self.guard.limit_bytes == 0 {
            return Err(DsgError::InvalidConfig {
                details: "guard.limit_bytes must be > 0".to_string(),
            });
        }
        if self.cache.ttl_seconds == 0 {
            return Err(DsgError::InvalidConfig {
                details: "cache.ttl_seconds must be > 0".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(DsgError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        for pattern in &self.removable.patterns {
            crate::scanner::removable::validate_pattern(pattern)?;
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| DsgError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, DEFAULT_LIMIT_BYTES, DsgError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.guard.limit_bytes, DEFAULT_LIMIT_BYTES);
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(3_600));
        assert_eq!(cfg.scanner.timeout(), None);
    }

    #[test]
    fn zero_limit_rejected() {
        let mut cfg = Config::default();
        cfg.guard.limit_bytes = 0;
        let err = cfg.validate().expect_err("expected limit error");
        assert!(err.to_string().contains("limit_bytes"));
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut cfg = Config::default();
        cfg.cache.ttl_seconds = 0;
        let err = cfg.validate().expect_err("expected ttl error");
        assert!(err.to_string().contains("ttl_seconds"));
    }

    #[test]
    fn maximal_ttl_is_accepted() {
        let mut cfg = Config::default();
        cfg.cache.ttl_seconds = u64::MAX;
        cfg.validate().expect("huge ttl is valid");
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.parallelism = 0;
        let err = cfg.validate().expect_err("expected parallelism error");
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn bad_removable_pattern_rejected() {
        let mut cfg = Config::default();
        cfg.removable.patterns = vec!["([unclosed".to_string()];
        let err = cfg.validate().expect_err("expected pattern error");
        assert_eq!(err.code(), "DSG-1004");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("DSG_GUARD_ROOT_PATH", "/srv/site"),
            ("DSG_GUARD_LIMIT_BYTES", "1048576"),
            ("DSG_CACHE_TTL_SECONDS", "60"),
            ("DSG_CACHE_INVALIDATE_ON_ADMIT", "false"),
            ("DSG_SCANNER_TIMEOUT_MS", "2500"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");

        assert_eq!(cfg.guard.root_path, PathBuf::from("/srv/site"));
        assert_eq!(cfg.guard.limit_bytes, 1_048_576);
        assert_eq!(cfg.cache.ttl_seconds, 60);
        assert!(!cfg.cache.invalidate_on_admit);
        assert_eq!(cfg.scanner.timeout(), Some(Duration::from_millis(2_500)));
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("DSG_GUARD_LIMIT_BYTES", "700MB")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("non-numeric limit should fail");
        match err {
            DsgError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("DSG_GUARD_LIMIT_BYTES"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn toml_sections_parse_with_defaults_for_missing_keys() {
        let raw = r#"
            [guard]
            root_path = "/srv/site"
            limit_bytes = 5000

            [cache]
            ttl_seconds = 30
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.guard.limit_bytes, 5_000);
        assert_eq!(cfg.cache.ttl_seconds, 30);
        assert!(cfg.cache.invalidate_on_admit);
        assert!(!cfg.removable.patterns.is_empty());
    }

    #[test]
    fn normalize_paths_trims_trailing_slashes_and_keeps_root() {
        let mut cfg = Config::default();
        cfg.guard.root_path = PathBuf::from("/srv/site/");
        cfg.scanner.excluded_paths = vec![PathBuf::from("/"), PathBuf::from("/srv/site/cache/")];
        cfg.normalize_paths();
        assert_eq!(cfg.guard.root_path, PathBuf::from("/srv/site"));
        assert!(cfg.scanner.excluded_paths.contains(&PathBuf::from("/")));
        assert!(
            cfg.scanner
                .excluded_paths
                .contains(&PathBuf::from("/srv/site/cache"))
        );
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/dsg/config.toml"))).unwrap_err();
        assert!(matches!(err, DsgError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[guard]\nlimit_bytes = 4096\n").expect("write config");
        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.paths.config_file, path);
        assert!(cfg.guard.limit_bytes > 0);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash");
        assert_eq!(before, cfg.stable_hash().expect("hash"));
        let mut modified = Config::default();
        modified.guard.limit_bytes += 1;
        assert_ne!(before, modified.stable_hash().expect("hash"));
    }
}
