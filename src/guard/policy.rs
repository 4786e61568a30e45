//! Limit policy: pure comparisons between a usage figure and the configured limit.
//!
//! Two thresholds deliberately coexist. Enforcement denies once usage reaches
//! the limit (`>=`); the presentation warning only fires once usage exceeds it
//! (`>`). [`UsageLevel`] carries enough detail to express both.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Static, process-wide limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Exact byte count at which enforcement starts denying.
    pub limit_bytes: u64,
}

/// Admission outcome for a write-producing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The operation may proceed.
    Allowed,
    /// The managed tree is full; the caller enforces the consequence.
    Denied,
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Presentation classification of usage against the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    /// Strictly below the limit.
    Under,
    /// Exactly at the limit: denied, but no warning shown.
    AtLimit,
    /// Strictly above the limit.
    Over,
}

impl UsageLevel {
    /// Whether the dashboard warning ("limit exceeded") applies.
    #[must_use]
    pub const fn shows_warning(self) -> bool {
        matches!(self, Self::Over)
    }

    /// Whether enforcement treats this level as full.
    #[must_use]
    pub const fn is_at_or_over(self) -> bool {
        matches!(self, Self::AtLimit | Self::Over)
    }
}

impl fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Under => write!(f, "under limit"),
            Self::AtLimit => write!(f, "at limit"),
            Self::Over => write!(f, "over limit"),
        }
    }
}

/// Enforcement decision: denied as soon as usage reaches the limit.
#[must_use]
pub const fn decide(usage_bytes: u64, limit_bytes: u64) -> Decision {
    if usage_bytes >= limit_bytes {
        Decision::Denied
    } else {
        Decision::Allowed
    }
}

/// Presentation classification. Never used for enforcement.
#[must_use]
pub const fn classify(usage_bytes: u64, limit_bytes: u64) -> UsageLevel {
    if usage_bytes > limit_bytes {
        UsageLevel::Over
    } else if usage_bytes == limit_bytes {
        UsageLevel::AtLimit
    } else {
        UsageLevel::Under
    }
}

impl LimitConfig {
    #[must_use]
    pub const fn new(limit_bytes: u64) -> Self {
        Self { limit_bytes }
    }

    #[must_use]
    pub const fn decide(&self, usage_bytes: u64) -> Decision {
        decide(usage_bytes, self.limit_bytes)
    }

    #[must_use]
    pub const fn classify(&self, usage_bytes: u64) -> UsageLevel {
        classify(usage_bytes, self.limit_bytes)
    }

    /// Bytes left before enforcement starts denying.
    #[must_use]
    pub const fn headroom(&self, usage_bytes: u64) -> u64 {
        self.limit_bytes.saturating_sub(usage_bytes)
    }
}
