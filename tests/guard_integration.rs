//! End-to-end guard scenarios over real temporary trees.

mod common;

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use disk_space_guard::prelude::*;
use tempfile::TempDir;

fn walker() -> Arc<dyn UsageScanner> {
    let config = WalkerConfig {
        parallelism: 2,
        ..WalkerConfig::default()
    };
    Arc::new(DirectoryWalker::new(config))
}

fn guard_over(root: &std::path::Path, limit: u64) -> AdmissionGuard {
    AdmissionGuard::new(
        root,
        LimitConfig::new(limit),
        Duration::from_secs(3_600),
        walker(),
    )
}

#[test]
fn upload_denied_exactly_at_limit_and_allowed_after_delete() {
    let tmp = TempDir::new().unwrap();
    common::build_site(tmp.path());
    let guard = guard_over(tmp.path(), 3_500);

    assert_eq!(
        guard.check_admission(OperationKind::Upload).unwrap(),
        Decision::Denied
    );
    let summary = guard.current_usage_summary().unwrap();
    assert_eq!(summary.usage_bytes, 3_500);
    assert_eq!(summary.file_count, 4);
    assert!(!summary.over_limit);

    fs::remove_file(tmp.path().join("index.php")).unwrap();
    // Still the cached figure until the host reports the deletion.
    assert_eq!(
        guard.check_admission(OperationKind::Upload).unwrap(),
        Decision::Denied
    );
    guard.coordinator().notify(DiskChangeEvent::FileDeleted);
    assert_eq!(
        guard.check_admission(OperationKind::Upload).unwrap(),
        Decision::Allowed
    );
    assert_eq!(guard.current_usage_summary().unwrap().usage_bytes, 2_500);
}

#[test]
fn publish_over_limit_downgrades_and_warns() {
    let tmp = TempDir::new().unwrap();
    common::build_site(tmp.path());
    let guard = guard_over(tmp.path(), 3_000);

    let decision = guard.check_admission(OperationKind::Publish).unwrap();
    assert_eq!(decision, Decision::Denied);
    assert_eq!(
        OperationKind::Publish.enforcement(),
        Enforcement::DowngradeToDraft
    );
    let summary = guard.current_usage_summary().unwrap();
    assert_eq!(summary.level, UsageLevel::Over);
    assert!(summary.over_limit);
}

#[test]
fn missing_root_surfaces_scan_failure_every_time() {
    let tmp = TempDir::new().unwrap();
    let guard = guard_over(&tmp.path().join("not-there"), 1_000);

    for _ in 0..2 {
        let err = guard.check_admission(OperationKind::Upload).unwrap_err();
        assert_eq!(err.code(), "DSG-2001");
    }
    assert_eq!(guard.cache().stats().scans, 2);
    assert!(guard.cache().peek().is_none());

    fs::create_dir(tmp.path().join("not-there")).unwrap();
    assert_eq!(
        guard.check_admission(OperationKind::Upload).unwrap(),
        Decision::Allowed
    );
}

#[test]
fn concurrent_checks_on_cold_cache_scan_once() {
    let tmp = TempDir::new().unwrap();
    common::build_site(tmp.path());
    let guard = Arc::new(guard_over(tmp.path(), 10_000));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let guard = Arc::clone(&guard);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                guard.current_usage_summary().unwrap().usage_bytes
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3_500);
    }
    assert_eq!(guard.cache().stats().scans, 1);
}

#[test]
fn shared_cache_between_guard_and_host_coordinator() {
    let tmp = TempDir::new().unwrap();
    common::build_site(tmp.path());
    let cache = Arc::new(UsageCache::new());
    let guard = guard_over(tmp.path(), 10_000).with_cache(Arc::clone(&cache));
    let listener: Arc<dyn DiskChangeListener> =
        Arc::new(InvalidationCoordinator::new(Arc::clone(&cache)));

    guard.check_admission(OperationKind::PluginInstall).unwrap();
    common::write_file(&tmp.path().join("wp-content/plugins/big/big.zip"), 8_000);
    listener.on_disk_change(DiskChangeEvent::PackageInstalled);

    assert_eq!(
        guard.check_admission(OperationKind::PluginInstall).unwrap(),
        Decision::Denied
    );
}

#[test]
fn from_config_suggests_default_themes() {
    let tmp = TempDir::new().unwrap();
    let site = tmp.path().join("site");
    common::build_site(&site);
    let config_path = common::write_config(tmp.path(), &site, 700);
    let config = Config::load(Some(&config_path)).unwrap();
    let guard = AdmissionGuard::from_config(&config).unwrap();

    let candidates = guard.suggest_removable().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(
        candidates[0].path,
        site.join("wp-content/themes/twentytwenty")
    );
    assert_eq!(candidates[0].size_bytes, 500);
}

#[test]
fn from_config_rescans_after_every_admitted_write() {
    let tmp = TempDir::new().unwrap();
    let site = tmp.path().join("site");
    common::build_site(&site);
    let config_path = common::write_config(tmp.path(), &site, 4_000);
    let guard = AdmissionGuard::from_config(&Config::load(Some(&config_path)).unwrap()).unwrap();

    assert_eq!(
        guard.check_admission(OperationKind::Upload).unwrap(),
        Decision::Allowed
    );
    assert!(guard.cache().peek().is_none());

    // The admitted upload lands without any host notification.
    common::write_file(&site.join("wp-content/uploads/new.jpg"), 600);
    assert_eq!(
        guard.check_admission(OperationKind::Upload).unwrap(),
        Decision::Denied
    );
    assert_eq!(guard.cache().stats().scans, 2);
    assert_eq!(guard.cache().peek().unwrap().size_bytes, 4_100);
}

#[test]
fn activity_log_captures_the_guard_lifecycle() {
    let tmp = TempDir::new().unwrap();
    common::build_site(tmp.path());
    let log_path = tmp.path().join("log").join("activity.jsonl");
    let (logger, join) =
        spawn_logger(disk_space_guard::logger::jsonl::JsonlConfig::at(log_path.clone())).unwrap();

    let guard = guard_over(tmp.path(), 10_000).with_logger(logger.clone());
    guard.check_admission(OperationKind::Upload).unwrap();
    guard.coordinator().notify(DiskChangeEvent::FileAdded);
    guard.check_admission(OperationKind::Upload).unwrap();
    logger.shutdown();
    join.join().unwrap();

    let events: Vec<String> = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        events,
        vec![
            "scan_complete",
            "admission_allowed",
            "cache_invalidated",
            "scan_complete",
            "admission_allowed",
        ]
    );
}

#[cfg(unix)]
#[test]
fn unreadable_directory_is_logged_as_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let site = tmp.path().join("site");
    common::build_site(&site);
    let locked = site.join("wp-content/private");
    common::write_file(&locked.join("secret.bin"), 4_096);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users read through mode bits; nothing to observe then.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let log_path = tmp.path().join("activity.jsonl");
    let (logger, join) =
        spawn_logger(disk_space_guard::logger::jsonl::JsonlConfig::at(log_path.clone())).unwrap();
    let guard = guard_over(&site, 10_000).with_logger(logger.clone());
    let summary = guard.current_usage_summary();
    logger.shutdown();
    join.join().unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(summary.unwrap().usage_bytes, 3_500);
    let lines: Vec<serde_json::Value> = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines[0]["event"], "entry_skipped");
    assert_eq!(lines[0]["path"], locked.display().to_string());
    assert_eq!(lines[1]["event"], "scan_complete");
    assert_eq!(lines[1]["skipped"], 1);
}
