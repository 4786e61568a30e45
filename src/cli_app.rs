//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use disk_space_guard::core::config::Config;
use disk_space_guard::core::errors::DsgError;
use disk_space_guard::core::units::{bytes_to_megabytes, format_bytes};
use disk_space_guard::guard::admission::{AdmissionGuard, FailurePolicy, OperationKind};
use disk_space_guard::guard::policy::{Decision, UsageLevel};
use disk_space_guard::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use disk_space_guard::logger::jsonl::JsonlConfig;
use disk_space_guard::scanner::walker::{DirectoryWalker, UsageScanner, WalkerConfig};

/// Disk Space Guard — gates writes once a managed tree reaches its limit.
#[derive(Debug, Parser)]
#[command(
    name = "dsg",
    author,
    version,
    about = "Disk Space Guard - usage accounting and admission control",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Measure a tree once, bypassing the cache.
    Scan(ScanArgs),
    /// Show usage against the configured limit.
    Status,
    /// Ask whether an operation would be admitted.
    Check(CheckArgs),
    /// List removable assets under the managed root.
    Suggest,
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Tree to measure (defaults to the configured root).
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,
    /// Print every skipped entry that was recorded.
    #[arg(long)]
    show_skipped: bool,
}

#[derive(Debug, Clone, Args)]
struct CheckArgs {
    /// Operation to check: upload, plugin_install, theme_install, publish.
    #[arg(value_name = "OPERATION")]
    operation: String,
    /// Decision to use when usage cannot be measured. Without it a scan failure is an error.
    #[arg(long, value_enum, value_name = "POLICY")]
    on_error: Option<OnError>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnError {
    Open,
    Closed,
}

impl From<OnError> for FailurePolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Open => Self::FailOpen,
            OnError::Closed => Self::FailClosed,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// The checked operation would be denied.
    #[error("{0}")]
    Denied(String),
    /// Invalid user input.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI: 1 user error, 2 runtime
    /// failure, 3 serialization failure, 4 operation denied.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Denied(_) => 4,
        }
    }
}

impl From<DsgError> for CliError {
    fn from(value: DsgError) -> Self {
        match value {
            DsgError::InvalidConfig { .. }
            | DsgError::MissingConfig { .. }
            | DsgError::ConfigParse { .. }
            | DsgError::InvalidPattern { .. } => Self::User(value.to_string()),
            _ => Self::Runtime(value.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Status => run_status(cli),
        Command::Check(args) => run_check(cli, args),
        Command::Suggest => run_suggest(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

/// Guard plus the logger thread feeding its activity log.
struct LoggedGuard {
    guard: AdmissionGuard,
    logger: ActivityLoggerHandle,
    join: JoinHandle<()>,
}

impl LoggedGuard {
    fn open(config: &Config) -> Result<Self, CliError> {
        let (logger, join) = spawn_logger(JsonlConfig::at(config.paths.jsonl_log.clone()))?;
        logger.send(ActivityEvent::GuardStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config.stable_hash()?,
        });
        let guard = AdmissionGuard::from_config(config)?.with_logger(logger.clone());
        Ok(Self {
            guard,
            logger,
            join,
        })
    }

    fn close(self) {
        self.logger.shutdown();
        drop(self.guard);
        let _ = self.join.join();
    }
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let root = args
        .path
        .clone()
        .unwrap_or_else(|| config.guard.root_path.clone());
    let walker = DirectoryWalker::new(WalkerConfig::from(&config.scanner));
    let measurement = walker.scan(&root)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", root.display().to_string().bold());
            println!(
                "  Size:    {} ({} bytes, {:.2} MB)",
                format_bytes(measurement.size_bytes),
                measurement.size_bytes,
                bytes_to_megabytes(measurement.size_bytes)
            );
            println!("  Files:   {}", measurement.file_count);
            println!("  Elapsed: {} ms", measurement.elapsed.as_millis());
            if measurement.skipped_count > 0 {
                println!(
                    "  {} {} entries could not be read",
                    "Skipped:".yellow(),
                    measurement.skipped_count
                );
                if args.show_skipped {
                    for skipped in &measurement.skipped {
                        println!("    {} ({})", skipped.path.display(), skipped.reason);
                    }
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "root": root.to_string_lossy(),
                "size_bytes": measurement.size_bytes,
                "size_mb": bytes_to_megabytes(measurement.size_bytes),
                "file_count": measurement.file_count,
                "skipped_count": measurement.skipped_count,
                "skipped": measurement.skipped,
                "elapsed_ms": u64::try_from(measurement.elapsed.as_millis()).unwrap_or(u64::MAX),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let logged = LoggedGuard::open(&config)?;
    let summary = logged.guard.current_usage_summary();
    logged.close();
    let summary = summary?;

    match output_mode(cli) {
        OutputMode::Human => {
            let level = match summary.level {
                UsageLevel::Under => summary.level.to_string().green(),
                UsageLevel::AtLimit => summary.level.to_string().yellow(),
                UsageLevel::Over => summary.level.to_string().red().bold(),
            };
            println!("{}", summary.root.display().to_string().bold());
            println!(
                "  Usage: {:.2} MB of {:.2} MB ({level})",
                summary.usage_mb, summary.limit_mb
            );
            println!("  Files: {}", summary.file_count);
            if summary.skipped_count > 0 {
                println!(
                    "  {} {} entries could not be read",
                    "Skipped:".yellow(),
                    summary.skipped_count
                );
            }
            if summary.over_limit {
                println!(
                    "{}",
                    "Disk space limit exceeded. Remove unused files to continue.".red()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "summary": serde_json::to_value(&summary)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_check(cli: &Cli, args: &CheckArgs) -> Result<(), CliError> {
    let kind = args
        .operation
        .parse::<OperationKind>()
        .map_err(|e| CliError::User(e.to_string()))?;
    let config = Config::load(cli.config.as_deref())?;
    let logged = LoggedGuard::open(&config)?;
    let outcome = logged.guard.check_admission(kind);
    let limit = logged.guard.limit();
    logged.close();

    let (decision, error) = match (outcome, args.on_error) {
        (Ok(decision), _) => (decision, None),
        (Err(e), Some(policy)) => {
            let decision = FailurePolicy::from(policy).resolve(&Err(e.clone()));
            (decision, Some(e))
        }
        (Err(e), None) => return Err(e.into()),
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if let Some(e) = &error {
                eprintln!("dsg: usage unknown ({e}); applying --on-error policy");
            }
            match decision {
                Decision::Allowed => println!("{}: {}", kind, "allowed".green()),
                Decision::Denied => {
                    println!("{}: {}", kind, "denied".red().bold());
                    println!("  {}", kind.denial_message());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "check",
                "operation": kind,
                "decision": decision,
                "enforcement": kind.enforcement(),
                "message": (!decision.is_allowed()).then(|| kind.denial_message()),
                "limit_bytes": limit.limit_bytes,
                "error": error.map(|e| e.to_string()),
            });
            write_json_line(&payload)?;
        }
    }

    match decision {
        Decision::Allowed => Ok(()),
        Decision::Denied => Err(CliError::Denied(kind.denial_message().to_string())),
    }
}

fn run_suggest(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let guard = AdmissionGuard::from_config(&config)?;
    let candidates = guard.suggest_removable()?;

    match output_mode(cli) {
        OutputMode::Human => {
            if candidates.is_empty() {
                println!("No removable assets found under {}.", guard.root().display());
            }
            for candidate in &candidates {
                println!(
                    "{:>10}  {}",
                    format_bytes(candidate.size_bytes),
                    candidate.path.display()
                );
            }
        }
        OutputMode::Json => {
            let total: u64 = candidates.iter().map(|c| c.size_bytes).sum();
            let payload = json!({
                "command": "suggest",
                "root": guard.root().to_string_lossy(),
                "candidates": candidates,
                "total_bytes": total,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DSG_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_flag_wins_over_env() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
    }

    #[test]
    fn env_mode_overrides_tty_detection() {
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some(" JSON "), true),
            OutputMode::Json
        );
        assert_eq!(resolve_output_mode(false, Some("auto"), false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
    }

    #[test]
    fn parses_check_with_policy() {
        let cli = Cli::try_parse_from(["dsg", "--json", "check", "upload", "--on-error", "closed"])
            .unwrap();
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.operation, "upload");
                assert!(matches!(args.on_error, Some(OnError::Closed)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::Denied(String::new()).exit_code(), 4);
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(
            CliError::from(DsgError::ScanFailure {
                root: PathBuf::from("/x"),
                details: "gone".to_string()
            })
            .exit_code(),
            2
        );
        assert_eq!(
            CliError::from(DsgError::InvalidConfig {
                details: "bad".to_string()
            })
            .exit_code(),
            1
        );
    }
}
