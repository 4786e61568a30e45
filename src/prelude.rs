//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use disk_space_guard::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DsgError, Result};

// Guard
pub use crate::guard::admission::{
    AdmissionGuard, Enforcement, FailurePolicy, OperationKind, UsageSummary,
};
pub use crate::guard::cache::{Clock, SystemClock, UsageCache};
pub use crate::guard::invalidation::{DiskChangeEvent, DiskChangeListener, InvalidationCoordinator};
pub use crate::guard::policy::{Decision, LimitConfig, UsageLevel};

// Scanner
pub use crate::scanner::removable::{PatternRemovableSource, RemovableAssetSource, RemovableCandidate};
pub use crate::scanner::walker::{DirectoryWalker, UsageMeasurement, UsageScanner, WalkerConfig};

// Logger
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
