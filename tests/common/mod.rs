#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dsg") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dsg.exe" } else { "dsg" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dsg binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run `dsg` with extra environment variables. `DSG_*` variables from the
/// calling environment are cleared so tests only see what they set.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("dsg-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command.args(args).env("RUST_BACKTRACE", "1");
    for (name, _) in std::env::vars() {
        if name.starts_with("DSG_") {
            command.env_remove(name);
        }
    }
    for (name, value) in env {
        command.env(name, value);
    }
    let output = command.output().expect("execute dsg command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("env={env:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write a file of `len` zero bytes, creating parent directories.
pub fn write_file(path: &Path, len: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(path, vec![0u8; len]).expect("write fixture file");
}

/// Small site-like tree: 1_000 + 2_000 + 0 + 500 = 3_500 bytes in 4 files.
pub fn build_site(root: &Path) {
    write_file(&root.join("index.php"), 1_000);
    write_file(&root.join("wp-content/uploads/2024/01/photo.jpg"), 2_000);
    write_file(&root.join("wp-content/uploads/2024/01/empty.txt"), 0);
    write_file(&root.join("wp-content/themes/twentytwenty/style.css"), 500);
}

/// Write a config file pointing at `root` with `limit` bytes; the activity log
/// goes next to it.
pub fn write_config(dir: &Path, root: &Path, limit: u64) -> PathBuf {
    let config_path = dir.join("config.toml");
    let contents = format!(
        r#"[guard]
root_path = "{root}"
limit_bytes = {limit}

[cache]
ttl_seconds = 60

[scanner]
parallelism = 2

[removable]
patterns = ['^wp-content/themes/twenty[a-z-]+$']

[paths]
jsonl_log = "{log}"
"#,
        root = root.display(),
        log = dir.join("activity.jsonl").display(),
    );
    fs::write(&config_path, contents).expect("write config");
    config_path
}
