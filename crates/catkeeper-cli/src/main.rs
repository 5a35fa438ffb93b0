use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use catkeeper_core::{InternPool, ServiceIndex};
use catkeeper_fetch::FetchFabric;
use catkeeper_mirror::{DownloadMode, IdFilter, Layout, MirrorConfig};
use catkeeper_types::{CancelToken, LogLevel, Logger};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "catkeeper", version)]
#[command(about = "Read and mirror a NuGet-style package catalog")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print `id version` for every flattened entry in a window.
    List {
        /// Service index URI.
        feed_index: String,

        /// Window start (ISO-8601). Defaults to the epoch.
        #[arg(short = 's', long)]
        start: Option<String>,

        /// Window end (ISO-8601). Defaults to now.
        #[arg(short = 'e', long)]
        end: Option<String>,

        /// Verbose logging.
        #[arg(short = 'v', long)]
        verbose: bool,
    },
    /// Mirror package archives for a window into an on-disk layout.
    Nupkgs {
        /// Service index URI.
        feed_index: String,

        /// Output root directory.
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,

        /// `v2` or `v3` on-disk layout (spec.md §4.10.1).
        #[arg(long, default_value = "v3")]
        folder_format: String,

        /// Minutes subtracted from `now` for the traversal window end.
        #[arg(long)]
        delay: Option<i64>,

        /// Bounded concurrency for page reads and downloads.
        #[arg(long)]
        max_threads: Option<usize>,

        /// Exit 0 even if some tasks failed after retrying.
        #[arg(long)]
        ignore_errors: bool,

        /// Include only ids matching one of these globs (repeatable).
        #[arg(short = 'i', long = "include")]
        include: Vec<String>,

        /// Exclude ids matching one of these globs (repeatable); wins over include.
        #[arg(short = 'e', long = "exclude")]
        exclude: Vec<String>,
    },
    /// Check that every flattened entry's archive is reachable.
    Validate {
        /// Service index URI.
        feed_index: String,

        /// Minutes subtracted from `now` for the traversal window end.
        #[arg(long)]
        delay: Option<i64>,

        /// Bounded concurrency for page reads and HEAD checks.
        #[arg(long)]
        max_threads: Option<usize>,
    },
}

/// Leveled stderr sink (spec.md §6.1), the CLI's concrete [`Logger`].
struct StderrLogger {
    threshold: LogLevel,
}

impl Logger for StderrLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if level < self.threshold {
            return;
        }
        let prefix = match level {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Information => "info",
            LogLevel::Minimal => "minimal",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        };
        eprintln!("[{prefix}] {message}");
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("[error] {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on overall success, `Ok(false)` on a handled failure
/// (spec.md §6.5: exit 0 success, 1 failure).
fn run(cli: Cli) -> Result<bool> {
    match cli.cmd {
        Commands::List { feed_index, start, end, verbose } => run_list(&feed_index, start, end, verbose),
        Commands::Nupkgs {
            feed_index,
            output,
            folder_format,
            delay,
            max_threads,
            ignore_errors,
            include,
            exclude,
        } => run_nupkgs(&feed_index, output, &folder_format, delay, max_threads, ignore_errors, include, exclude),
        Commands::Validate { feed_index, delay, max_threads } => run_validate(&feed_index, delay, max_threads),
    }
}

fn load_service_index(
    fabric: &FetchFabric,
    feed_index: &str,
    logger: &dyn Logger,
    cancel: &CancelToken,
) -> Result<ServiceIndex> {
    let doc = fabric
        .fetch_json(feed_index, logger, cancel)
        .with_context(|| format!("failed to fetch service index {feed_index}"))?;
    ServiceIndex::parse(&doc).context("failed to parse service index document")
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid ISO-8601 timestamp '{raw}'"))
}

fn run_list(feed_index: &str, start: Option<String>, end: Option<String>, verbose: bool) -> Result<bool> {
    let logger = StderrLogger { threshold: if verbose { LogLevel::Verbose } else { LogLevel::Minimal } };
    let cache_dir = std::env::temp_dir().join("catkeeper-cache");
    let fabric = FetchFabric::new(cache_dir);
    let pool = InternPool::new();
    let cancel = CancelToken::new();

    let service_index = load_service_index(&fabric, feed_index, &logger, &cancel)?;
    let start = start.as_deref().map(parse_timestamp).transpose()?.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = end.as_deref().map(parse_timestamp).transpose()?.unwrap_or_else(Utc::now);

    let max_threads = catkeeper_config::resolve(
        None,
        catkeeper_config::MAX_THREADS_ENV,
        catkeeper_core::DEFAULT_MAX_THREADS,
    )?;

    let mut entries =
        catkeeper_core::traverse_window(&fabric, &service_index, &pool, &logger, &cancel, start, end, max_threads)?;
    entries.sort_by(|a, b| {
        a.id.to_ascii_lowercase()
            .cmp(&b.id.to_ascii_lowercase())
            .then_with(|| a.version.cmp(&b.version))
    });

    for entry in &entries {
        println!("{} {}", entry.id, entry.version);
    }

    Ok(true)
}

#[allow(clippy::too_many_arguments)]
fn run_nupkgs(
    feed_index: &str,
    output: PathBuf,
    folder_format: &str,
    delay: Option<i64>,
    max_threads: Option<usize>,
    ignore_errors: bool,
    include: Vec<String>,
    exclude: Vec<String>,
) -> Result<bool> {
    let logger = StderrLogger { threshold: LogLevel::Information };
    let cache_dir = output.join(".cache");
    let fabric = FetchFabric::new(cache_dir);
    let pool = InternPool::new();
    let cancel = CancelToken::new();

    let service_index = load_service_index(&fabric, feed_index, &logger, &cancel)?;
    let package_base_uri = service_index
        .package_base_address_uri()
        .context("repository does not expose a package base address")?;

    let layout = match folder_format {
        "v2" => Layout::V2,
        "v3" => Layout::V3,
        other => anyhow::bail!("invalid --folder-format '{other}': expected 'v2' or 'v3'"),
    };
    let filter = IdFilter::new(&include, &exclude).map_err(|e| anyhow::anyhow!(e))?;
    let max_threads =
        catkeeper_config::resolve(max_threads, catkeeper_config::MAX_THREADS_ENV, catkeeper_core::DEFAULT_MAX_THREADS)?;
    let delay_minutes = catkeeper_config::resolve(
        delay,
        catkeeper_config::DELAY_MINUTES_ENV,
        catkeeper_mirror::DEFAULT_DELAY_MINUTES,
    )?;

    let config = MirrorConfig {
        roots: vec![output.clone()],
        layout,
        download_mode: DownloadMode::SkipIfExists,
        batch_size: catkeeper_mirror::DEFAULT_BATCH_SIZE,
        max_threads,
        delay: std::time::Duration::from_secs((delay_minutes.max(0) as u64) * 60),
        filter,
    };

    let error_count =
        catkeeper_mirror::run(&fabric, &service_index, &pool, &logger, &cancel, &output, &package_base_uri, &config)?;

    if error_count > 0 {
        logger.warning(&format!("mirror run completed with {error_count} failed task(s)"));
    }
    Ok(error_count == 0 || ignore_errors)
}

fn run_validate(feed_index: &str, delay: Option<i64>, max_threads: Option<usize>) -> Result<bool> {
    let logger = StderrLogger { threshold: LogLevel::Information };
    let cache_dir = std::env::temp_dir().join("catkeeper-validate-cache");
    let fabric = FetchFabric::new(cache_dir);
    let pool = InternPool::new();
    let cancel = CancelToken::new();

    let service_index = load_service_index(&fabric, feed_index, &logger, &cancel)?;
    let package_base_uri = service_index
        .package_base_address_uri()
        .context("repository does not expose a package base address")?;

    let max_threads =
        catkeeper_config::resolve(max_threads, catkeeper_config::MAX_THREADS_ENV, catkeeper_core::DEFAULT_MAX_THREADS)?;
    let delay_minutes = catkeeper_config::resolve(
        delay,
        catkeeper_config::DELAY_MINUTES_ENV,
        catkeeper_mirror::DEFAULT_DELAY_MINUTES,
    )?;
    let end = Utc::now() - chrono::Duration::minutes(delay_minutes);

    let report = catkeeper_mirror::validator::validate(
        &fabric,
        &service_index,
        &pool,
        &logger,
        &cancel,
        &package_base_uri,
        DateTime::<Utc>::MIN_UTC,
        end,
        max_threads,
    )?;

    for failure in report.sorted_failures() {
        eprintln!("[error] {} {}: {}", failure.id, failure.version, failure.message);
    }
    logger.info(&format!("validated {} entries, {} failure(s)", report.checked, report.failures.len()));

    Ok(report.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_rfc3339_and_rejects_garbage() {
        assert!(parse_timestamp("2024-01-01T00:00:00Z").is_ok());
        assert!(parse_timestamp("not-a-date").is_err());
    }

    #[test]
    fn stderr_logger_filters_below_threshold() {
        let logger = StderrLogger { threshold: LogLevel::Warning };
        logger.debug("should not panic even though filtered");
        logger.error("should not panic");
    }

    #[test]
    fn cli_parses_list_subcommand_with_flags() {
        let cli = Cli::parse_from([
            "catkeeper",
            "list",
            "https://example.com/index.json",
            "-s",
            "2024-01-01T00:00:00Z",
            "-e",
            "2024-02-01T00:00:00Z",
            "-v",
        ]);
        match cli.cmd {
            Commands::List { feed_index, start, end, verbose } => {
                assert_eq!(feed_index, "https://example.com/index.json");
                assert_eq!(start.as_deref(), Some("2024-01-01T00:00:00Z"));
                assert_eq!(end.as_deref(), Some("2024-02-01T00:00:00Z"));
                assert!(verbose);
            }
            other => panic!("expected List, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_nupkgs_subcommand_with_filters() {
        let cli = Cli::parse_from([
            "catkeeper",
            "nupkgs",
            "https://example.com/index.json",
            "-o",
            "/tmp/out",
            "--folder-format",
            "v2",
            "--ignore-errors",
            "-i",
            "Foo.*",
            "-e",
            "Foo.Internal",
        ]);
        match cli.cmd {
            Commands::Nupkgs { folder_format, ignore_errors, include, exclude, .. } => {
                assert_eq!(folder_format, "v2");
                assert!(ignore_errors);
                assert_eq!(include, vec!["Foo.*".to_string()]);
                assert_eq!(exclude, vec!["Foo.Internal".to_string()]);
            }
            other => panic!("expected Nupkgs, got {other:?}"),
        }
    }

    #[test]
    fn invalid_folder_format_is_rejected_before_any_network_use() {
        let err = match (|| -> Result<bool> {
            let folder_format = "bogus";
            match folder_format {
                "v2" => Ok(true),
                "v3" => Ok(true),
                other => anyhow::bail!("invalid --folder-format '{other}': expected 'v2' or 'v3'"),
            }
        })() {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("invalid --folder-format"));
    }
}
