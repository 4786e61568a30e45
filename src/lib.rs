#![forbid(unsafe_code)]

//! Disk Space Guard (dsg) — admission control for writes into a managed
//! directory tree.
//!
//! The guard measures the exact byte usage of a tree, caches that figure for a
//! fixed TTL, and answers whether an upload, install or publish may proceed.
//! Hosts report completed disk-changing operations so the next decision
//! rescans instead of trusting a stale figure.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use disk_space_guard::prelude::*;
//!
//! # fn main() -> disk_space_guard::core::errors::Result<()> {
//! let config = Config::load(None)?;
//! let guard = AdmissionGuard::from_config(&config)?;
//! if guard.check_admission(OperationKind::Upload)? == Decision::Denied {
//!     eprintln!("{}", OperationKind::Upload.denial_message());
//! }
//! guard.coordinator().notify(DiskChangeEvent::FileAdded);
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
pub mod guard;
pub mod logger;
pub mod scanner;
