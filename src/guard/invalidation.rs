//! Invalidation coordinator: turns host change notifications into cache invalidations.
//!
//! Deliberately coarse. Every recognized change empties the cache and nothing
//! is filtered or deduplicated; a burst of events still costs at most one
//! rescan on the next read thanks to single-flight.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DsgError, Result};
use crate::guard::cache::UsageCache;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// A completed host operation known to change disk usage under the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskChangeEvent {
    FileAdded,
    FileDeleted,
    PackageInstalled,
    PackageRemoved,
    PackageActivated,
    PackageDeactivated,
    UpgradeCompleted,
}

impl DiskChangeEvent {
    pub const ALL: [Self; 7] = [
        Self::FileAdded,
        Self::FileDeleted,
        Self::PackageInstalled,
        Self::PackageRemoved,
        Self::PackageActivated,
        Self::PackageDeactivated,
        Self::UpgradeCompleted,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileAdded => "file_added",
            Self::FileDeleted => "file_deleted",
            Self::PackageInstalled => "package_installed",
            Self::PackageRemoved => "package_removed",
            Self::PackageActivated => "package_activated",
            Self::PackageDeactivated => "package_deactivated",
            Self::UpgradeCompleted => "upgrade_completed",
        }
    }
}

impl fmt::Display for DiskChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskChangeEvent {
    type Err = DsgError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == needle)
            .ok_or_else(|| DsgError::InvalidConfig {
                details: format!("unknown disk change event {s:?}"),
            })
    }
}

/// Receiver of disk change notifications, for hosts that hold the coordinator
/// behind a trait object.
pub trait DiskChangeListener: Send + Sync {
    fn on_disk_change(&self, event: DiskChangeEvent);
}

/// Invalidates a shared [`UsageCache`] on every disk change notification.
pub struct InvalidationCoordinator {
    cache: Arc<UsageCache>,
    logger: Option<ActivityLoggerHandle>,
}

impl InvalidationCoordinator {
    #[must_use]
    pub fn new(cache: Arc<UsageCache>) -> Self {
        Self {
            cache,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Empty the cache so the next read rescans.
    pub fn notify(&self, event: DiskChangeEvent) {
        self.cache.invalidate();
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::CacheInvalidated {
                cause: event.to_string(),
            });
        }
    }

    /// Parse a host event name and notify. Unknown names leave the cache untouched.
    pub fn notify_named(&self, name: &str) -> Result<DiskChangeEvent> {
        let event = name.parse::<DiskChangeEvent>()?;
        self.notify(event);
        Ok(event)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<UsageCache> {
        &self.cache
    }
}

impl DiskChangeListener for InvalidationCoordinator {
    fn on_disk_change(&self, event: DiskChangeEvent) {
        self.notify(event);
    }
}
