//! Parallel usage walker: exact byte totals for a directory tree.
//!
//! The walker is the guard's only source of truth about disk consumption. It
//! sums the lengths of regular files beneath a root, never follows symlinks
//! below the root, and records (rather than aborts on) entries it cannot read.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel as channel;
use serde::Serialize;

use crate::core::config::ScannerConfig;
use crate::core::errors::{DsgError, Result};

/// One exact usage figure for a tree. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageMeasurement {
    pub root: PathBuf,
    pub size_bytes: u64,
    pub file_count: u64,
    /// Exact number of entries that could not be read.
    pub skipped_count: u64,
    /// The first skipped entries, capped by `max_recorded_skips`.
    pub skipped: Vec<SkippedEntry>,
    pub computed_at: SystemTime,
    pub elapsed: Duration,
}

impl UsageMeasurement {
    /// True when every entry under the root was accounted for.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.skipped_count == 0
    }
}

/// An entry left out of a total because it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Anything that can produce a [`UsageMeasurement`] for a root path.
pub trait UsageScanner: Send + Sync {
    fn scan(&self, root: &Path) -> Result<UsageMeasurement>;
}

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub parallelism: usize,
    pub one_file_system: bool,
    pub excluded_paths: HashSet<PathBuf>,
    pub timeout: Option<Duration>,
    pub max_recorded_skips: usize,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for WalkerConfig {
    fn from(cfg: &ScannerConfig) -> Self {
        Self {
            parallelism: cfg.parallelism,
            one_file_system: cfg.one_file_system,
            excluded_paths: cfg.excluded_paths.iter().cloned().collect(),
            timeout: cfg.timeout(),
            max_recorded_skips: cfg.max_recorded_skips,
        }
    }
}

/// Parallel directory walker.
///
/// Safety invariants:
/// - Symlinks below the root are never followed and contribute zero bytes
/// - Only regular files contribute their length
/// - Excluded subtrees are never entered
/// - A missing or unreadable root fails the scan; unreadable children do not
pub struct DirectoryWalker {
    config: WalkerConfig,
}

/// Per-worker running totals, merged after all workers finish.
#[derive(Debug, Default)]
struct Tally {
    bytes: u64,
    files: u64,
    skipped_count: u64,
    skipped: Vec<SkippedEntry>,
}

impl Tally {
    fn add_file(&mut self, len: u64) {
        self.bytes = self.bytes.saturating_add(len);
        self.files += 1;
    }

    fn skip(&mut self, path: PathBuf, reason: impl ToString, cap: usize) {
        self.skipped_count += 1;
        if self.skipped.len() < cap {
            self.skipped.push(SkippedEntry {
                path,
                reason: reason.to_string(),
            });
        }
    }

    fn merge(&mut self, other: Self, cap: usize) {
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.files += other.files;
        self.skipped_count += other.skipped_count;
        let room = cap.saturating_sub(self.skipped.len());
        self.skipped.extend(other.skipped.into_iter().take(room));
    }
}

impl DirectoryWalker {
    #[must_use]
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    fn walk(&self, root: &Path) -> Result<UsageMeasurement> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|limit| started + limit);

        // The root itself is resolved, so a root that is a symlink to the real
        // tree still measures that tree.
        let root_meta = fs::metadata(root).map_err(|err| DsgError::ScanFailure {
            root: root.to_path_buf(),
            details: err.to_string(),
        })?;
        if !root_meta.is_dir() {
            return Err(DsgError::ScanFailure {
                root: root.to_path_buf(),
                details: "not a directory".to_string(),
            });
        }
        let root_dev = device_id(&root_meta);

        let mut tally = Tally::default();
        let mut children = Vec::new();
        let entries = fs::read_dir(root).map_err(|err| DsgError::ScanFailure {
            root: root.to_path_buf(),
            details: err.to_string(),
        })?;
        visit_entries(root, entries, root_dev, &self.config, &mut tally, &mut children);
        self.check_deadline(root, deadline)?;

        if !children.is_empty() {
            let Some(workers) = self.walk_children(children, root_dev, deadline) else {
                return Err(self.timeout_error(root));
            };
            for worker in workers {
                tally.merge(worker, self.config.max_recorded_skips);
            }
        }

        Ok(UsageMeasurement {
            root: root.to_path_buf(),
            size_bytes: tally.bytes,
            file_count: tally.files,
            skipped_count: tally.skipped_count,
            skipped: tally.skipped,
            computed_at: SystemTime::now(),
            elapsed: started.elapsed(),
        })
    }

    fn check_deadline(&self, root: &Path, deadline: Option<Instant>) -> Result<()> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(self.timeout_error(root));
        }
        Ok(())
    }

    fn timeout_error(&self, root: &Path) -> DsgError {
        let limit = self.config.timeout.unwrap_or_default();
        DsgError::ScanTimeout {
            root: root.to_path_buf(),
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Fan the subdirectories of the root out to worker threads and collect
    /// one tally per worker. `None` when the deadline cut the walk short.
    fn walk_children(
        &self,
        seeds: Vec<PathBuf>,
        root_dev: u64,
        deadline: Option<Instant>,
    ) -> Option<Vec<Tally>> {
        let parallelism = self.config.parallelism.max(1);
        let (work_tx, work_rx) = channel::unbounded::<PathBuf>();
        let in_flight = AtomicUsize::new(seeds.len());
        let expired = AtomicBool::new(false);
        for seed in seeds {
            let _ = work_tx.send(seed);
        }

        let tallies: Vec<Tally> = thread::scope(|scope| {
            let handles: Vec<_> = (0..parallelism)
                .map(|_| {
                    let work_rx = work_rx.clone();
                    let work_tx = work_tx.clone();
                    let in_flight = &in_flight;
                    let expired = &expired;
                    let config = &self.config;
                    scope.spawn(move || {
                        walker_thread(
                            &work_rx, &work_tx, in_flight, expired, config, root_dev, deadline,
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .collect()
        });

        if expired.load(Ordering::Acquire) {
            None
        } else {
            Some(tallies)
        }
    }
}

impl UsageScanner for DirectoryWalker {
    fn scan(&self, root: &Path) -> Result<UsageMeasurement> {
        self.walk(root)
    }
}

/// Worker loop: pull directories, tally their files, push their subdirectories.
fn walker_thread(
    work_rx: &channel::Receiver<PathBuf>,
    work_tx: &channel::Sender<PathBuf>,
    in_flight: &AtomicUsize,
    expired: &AtomicBool,
    config: &WalkerConfig,
    root_dev: u64,
    deadline: Option<Instant>,
) -> Tally {
    let mut tally = Tally::default();
    let mut children = Vec::new();
    loop {
        if expired.load(Ordering::Acquire) {
            return tally;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            expired.store(true, Ordering::Release);
            return tally;
        }

        match work_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(dir_path) => {
                match fs::read_dir(&dir_path) {
                    Ok(entries) => {
                        visit_entries(
                            &dir_path,
                            entries,
                            root_dev,
                            config,
                            &mut tally,
                            &mut children,
                        );
                    }
                    // Removed between listing and visiting: nothing left to count.
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => tally.skip(dir_path, err, config.max_recorded_skips),
                }

                // Children are counted in flight before the parent is retired so
                // the counter cannot touch zero while work remains.
                in_flight.fetch_add(children.len(), Ordering::AcqRel);
                for child in children.drain(..) {
                    let _ = work_tx.send(child);
                }
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return tally;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return tally,
        }
    }
}

/// Tally one directory listing; subdirectories to descend into go to `children`.
fn visit_entries(
    dir_path: &Path,
    entries: fs::ReadDir,
    root_dev: u64,
    config: &WalkerConfig,
    tally: &mut Tally,
    children: &mut Vec<PathBuf>,
) {
    let cap = config.max_recorded_skips;
    for entry_result in entries {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                tally.skip(dir_path.to_path_buf(), err, cap);
                continue;
            }
        };
        let child_path = entry.path();

        // file_type() does not follow symlinks and is usually free from the dirent.
        let ft = match entry.file_type() {
            Ok(ft) => ft,
            Err(err) => {
                tally.skip(child_path, err, cap);
                continue;
            }
        };

        if ft.is_symlink() {
            continue;
        }

        if ft.is_dir() {
            if config.excluded_paths.contains(&child_path) {
                continue;
            }
            if config.one_file_system {
                match entry.metadata() {
                    Ok(meta) if device_id(&meta) != root_dev => continue,
                    Ok(_) => {}
                    Err(err) => {
                        tally.skip(child_path, err, cap);
                        continue;
                    }
                }
            }
            children.push(child_path);
        } else if ft.is_file() {
            match entry.metadata() {
                Ok(meta) => tally.add_file(meta.len()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => tally.skip(child_path, err, cap),
            }
        }
        // Sockets, FIFOs and device nodes occupy no file data.
    }
}

/// Get device ID from metadata (for one-file-system scans).
fn device_id(meta: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.dev()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}
