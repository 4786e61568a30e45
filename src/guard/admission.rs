//! Admission guard: the surface host call sites talk to.
//!
//! Wires the scanner, the shared cache, the limit policy and the optional
//! activity logger together behind `check_admission` (enforcement) and
//! `current_usage_summary` (presentation). Both read through the same cache.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::{DsgError, Result};
use crate::core::units::bytes_to_megabytes;
use crate::guard::cache::UsageCache;
use crate::guard::invalidation::InvalidationCoordinator;
use crate::guard::policy::{Decision, LimitConfig, UsageLevel};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::removable::{PatternRemovableSource, RemovableAssetSource, RemovableCandidate};
use crate::scanner::walker::{DirectoryWalker, UsageMeasurement, UsageScanner, WalkerConfig};

/// How many skipped entries a single scan may write to the activity log.
const MAX_LOGGED_SKIPS: usize = 32;

/// Write-producing operation a host asks permission for. Informational only:
/// it changes the message and the enforcement, never the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    PluginInstall,
    ThemeInstall,
    Publish,
}

/// What the host does with a denied operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Refuse the operation outright.
    Reject,
    /// Let the content be saved, but not published.
    DowngradeToDraft,
}

impl OperationKind {
    pub const ALL: [Self; 4] = [
        Self::Upload,
        Self::PluginInstall,
        Self::ThemeInstall,
        Self::Publish,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::PluginInstall => "plugin_install",
            Self::ThemeInstall => "theme_install",
            Self::Publish => "publish",
        }
    }

    #[must_use]
    pub const fn enforcement(self) -> Enforcement {
        match self {
            Self::Publish => Enforcement::DowngradeToDraft,
            Self::Upload | Self::PluginInstall | Self::ThemeInstall => Enforcement::Reject,
        }
    }

    /// Text a host shows when this operation is denied.
    #[must_use]
    pub const fn denial_message(self) -> &'static str {
        match self {
            Self::Upload => "Disk space limit reached. Cannot upload new files.",
            Self::PluginInstall => "Disk space limit reached. Cannot install new plugins.",
            Self::ThemeInstall => "Disk space limit reached. Cannot install new themes.",
            Self::Publish => "Disk space limit reached. Post saved as a draft.",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = DsgError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| DsgError::InvalidConfig {
                details: format!(
                    "unknown operation {s:?} (expected upload, plugin_install, theme_install, publish)"
                ),
            })
    }
}

/// Host-chosen fallback for when usage cannot be measured.
///
/// The guard itself always surfaces the failure; this only exists so hosts
/// make the choice explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the operation when usage is unknown.
    FailOpen,
    /// Deny the operation when usage is unknown.
    FailClosed,
}

impl FailurePolicy {
    /// Collapse an admission outcome into a decision.
    #[must_use]
    pub fn resolve(self, outcome: &Result<Decision>) -> Decision {
        match (outcome, self) {
            (Ok(decision), _) => *decision,
            (Err(_), Self::FailOpen) => Decision::Allowed,
            (Err(_), Self::FailClosed) => Decision::Denied,
        }
    }
}

/// Read-only usage view for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub root: PathBuf,
    pub usage_bytes: u64,
    pub limit_bytes: u64,
    /// Usage strictly above the limit; drives the dashboard warning.
    pub over_limit: bool,
    pub level: UsageLevel,
    pub usage_mb: f64,
    pub limit_mb: f64,
    pub file_count: u64,
    pub skipped_count: u64,
    pub computed_at: DateTime<Utc>,
}

impl UsageSummary {
    fn new(measurement: &UsageMeasurement, limit: LimitConfig) -> Self {
        let level = limit.classify(measurement.size_bytes);
        Self {
            root: measurement.root.clone(),
            usage_bytes: measurement.size_bytes,
            limit_bytes: limit.limit_bytes,
            over_limit: level.shows_warning(),
            level,
            usage_mb: bytes_to_megabytes(measurement.size_bytes),
            limit_mb: bytes_to_megabytes(limit.limit_bytes),
            file_count: measurement.file_count,
            skipped_count: measurement.skipped_count,
            computed_at: DateTime::<Utc>::from(measurement.computed_at),
        }
    }
}

/// Admission control for one managed tree.
pub struct AdmissionGuard {
    root: PathBuf,
    limit: LimitConfig,
    ttl: Duration,
    invalidate_on_admit: bool,
    cache: Arc<UsageCache>,
    scanner: Arc<dyn UsageScanner>,
    removable: Option<Arc<dyn RemovableAssetSource>>,
    logger: Option<ActivityLoggerHandle>,
}

impl AdmissionGuard {
    /// Guard over `root` with a fresh cache and no logger or removable source.
    /// Invalidate-on-admit starts off here; `from_config` turns it on by default.
    pub fn new(
        root: impl Into<PathBuf>,
        limit: LimitConfig,
        ttl: Duration,
        scanner: Arc<dyn UsageScanner>,
    ) -> Self {
        Self {
            root: root.into(),
            limit,
            ttl,
            invalidate_on_admit: false,
            cache: Arc::new(UsageCache::new()),
            scanner,
            removable: None,
            logger: None,
        }
    }

    /// Build the directory walker, pattern source and cache from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let walker = DirectoryWalker::new(WalkerConfig::from(&config.scanner));
        let removable = PatternRemovableSource::new(&config.removable.patterns)?;
        Ok(Self::new(
            config.guard.root_path.clone(),
            LimitConfig::new(config.guard.limit_bytes),
            config.cache.ttl(),
            Arc::new(walker),
        )
        .with_invalidate_on_admit(config.cache.invalidate_on_admit)
        .with_removable(Arc::new(removable)))
    }

    /// Share an existing cache, e.g. one also held by the host's coordinator.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<UsageCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn with_removable(mut self, source: Arc<dyn RemovableAssetSource>) -> Self {
        self.removable = Some(source);
        self
    }

    #[must_use]
    pub fn with_invalidate_on_admit(mut self, enabled: bool) -> Self {
        self.invalidate_on_admit = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn limit(&self) -> LimitConfig {
        self.limit
    }

    pub fn cache(&self) -> &Arc<UsageCache> {
        &self.cache
    }

    /// Coordinator that invalidates this guard's cache.
    pub fn coordinator(&self) -> InvalidationCoordinator {
        let coordinator = InvalidationCoordinator::new(Arc::clone(&self.cache));
        match &self.logger {
            Some(logger) => coordinator.with_logger(logger.clone()),
            None => coordinator,
        }
    }

    /// Current measurement, through the cache.
    pub fn measure(&self) -> Result<Arc<UsageMeasurement>> {
        let observed = ObservedScanner {
            inner: self.scanner.as_ref(),
            logger: self.logger.as_ref(),
        };
        self.cache.get(&observed, &self.root, self.ttl)
    }

    /// Decide whether `kind` may proceed. Scan failures propagate.
    pub fn check_admission(&self, kind: OperationKind) -> Result<Decision> {
        let measurement = self.measure()?;
        let decision = self.limit.decide(measurement.size_bytes);

        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::AdmissionDecided {
                operation: kind.to_string(),
                decision,
                usage_bytes: measurement.size_bytes,
                limit_bytes: self.limit.limit_bytes,
            });
        }

        if decision.is_allowed() && self.invalidate_on_admit {
            self.cache.invalidate();
            if let Some(logger) = &self.logger {
                logger.send(ActivityEvent::CacheInvalidated {
                    cause: format!("admitted {kind}"),
                });
            }
        }
        Ok(decision)
    }

    /// `check_admission` with the host's fallback applied to failures.
    pub fn check_admission_or(&self, kind: OperationKind, policy: FailurePolicy) -> Decision {
        policy.resolve(&self.check_admission(kind))
    }

    /// Presentation summary. Same cache semantics as enforcement.
    pub fn current_usage_summary(&self) -> Result<UsageSummary> {
        let measurement = self.measure()?;
        Ok(UsageSummary::new(&measurement, self.limit))
    }

    /// Removable candidates under the root, largest first. Empty without a source.
    pub fn suggest_removable(&self) -> Result<Vec<RemovableCandidate>> {
        match &self.removable {
            Some(source) => source.suggest(&self.root, self.scanner.as_ref()),
            None => Ok(Vec::new()),
        }
    }
}

/// Logs each real scan. The cache only calls it on a miss, so cache hits stay silent.
struct ObservedScanner<'a> {
    inner: &'a dyn UsageScanner,
    logger: Option<&'a ActivityLoggerHandle>,
}

impl UsageScanner for ObservedScanner<'_> {
    fn scan(&self, root: &Path) -> Result<UsageMeasurement> {
        let outcome = self.inner.scan(root);
        let Some(logger) = self.logger else {
            return outcome;
        };
        match &outcome {
            Ok(m) => {
                for skipped in m.skipped.iter().take(MAX_LOGGED_SKIPS) {
                    logger.send(ActivityEvent::EntrySkipped {
                        path: skipped.path.display().to_string(),
                        reason: skipped.reason.clone(),
                    });
                }
                logger.send(ActivityEvent::ScanCompleted {
                    root: root.display().to_string(),
                    size_bytes: m.size_bytes,
                    file_count: m.file_count,
                    skipped_count: m.skipped_count,
                    duration_ms: u64::try_from(m.elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(err) => logger.send(ActivityEvent::ScanFailed {
                root: root.display().to_string(),
                error_code: err.code().to_string(),
                error_message: err.to_string(),
            }),
        }
        outcome
    }
}
