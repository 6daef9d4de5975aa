//! Command-line interface for auditbatch.
//!
//! Provides commands for running audit batches, managing the result
//! cache, checking the audit engine and showing configuration.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{Auditor, ChromeScreenshotter, LighthouseAuditor};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    BatchLimits, BatchOrchestrator, BlobStore, FsBlobStore, MemoryBlobStore, ResultCache,
    RetryExecutor,
};
use crate::domain::{parse_target_list, JobOptions, Target};
use crate::report::{render_json, render_text};

/// auditbatch - Concurrency-limited, cached, retrying website audits
#[derive(Parser, Debug)]
#[command(name = "auditbatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Audit a batch of targets
    Run {
        /// Targets to audit (URLs or bare hostnames)
        targets: Vec<String>,

        /// Read targets from a file, one per line ("-" for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Maximum number of audits running at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Retries per target after the first attempt
        #[arg(short, long)]
        retries: Option<u32>,

        /// Seconds a cached result stays reusable
        #[arg(long)]
        cache_ttl: Option<u64>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Audit categories (comma-separated)
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<String>>,

        /// Capture a screenshot of each target
        #[arg(long)]
        screenshot: bool,

        /// Summary format
        #[arg(long, value_enum, default_value = "text")]
        format: SummaryFormat,

        /// Write the summary to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Neither read nor persist cached results
        #[arg(long)]
        no_cache: bool,
    },

    /// Manage the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Check that the audit engine is installed
    Check,

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// Evict expired and unreadable entries
    Sweep,
    /// Delete every entry
    Clear,
    /// Show entry counts
    Stats,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFormat {
    Text,
    Json,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                targets,
                file,
                concurrency,
                retries,
                cache_ttl,
                timeout,
                categories,
                screenshot,
                format,
                output,
                no_cache,
            } => {
                let cfg = config::config()?;
                let targets = collect_targets(&targets, file.as_deref())?;

                let mut options = cfg.job_options();
                if let Some(categories) = categories {
                    options.categories = categories;
                }
                if let Some(seconds) = timeout {
                    options.retry.attempt_timeout_ms = seconds.saturating_mul(1000);
                }
                options.screenshot.enabled |= screenshot;

                let mut limits = cfg.batch_limits();
                if let Some(concurrency) = concurrency {
                    limits.max_concurrent = concurrency;
                }
                if let Some(retries) = retries {
                    limits.max_retries = retries;
                }
                if let Some(seconds) = cache_ttl {
                    limits.cache_duration = Duration::from_secs(seconds);
                }

                run_batch(cfg, targets, options, limits, format, output, no_cache).await
            }

            Commands::Cache { action } => cache_command(config::config()?, action).await,

            Commands::Check => {
                let cfg = config::config()?;
                let auditor = LighthouseAuditor::with_binary_path(&cfg.audit.lighthouse_binary);
                auditor.health_check().await?;
                println!("{} is available ({})", auditor.name(), cfg.audit.lighthouse_binary);
                Ok(())
            }

            Commands::Config => show_config(),
        }
    }
}

/// Combine positional targets with a target list file
fn collect_targets(args: &[String], file: Option<&Path>) -> Result<Vec<Target>> {
    let mut targets = args
        .iter()
        .map(|arg| Target::parse(arg))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(path) = file {
        let content = if path == Path::new("-") {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read targets from stdin")?;
            buffer
        } else {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read target file: {}", path.display()))?
        };
        targets.extend(parse_target_list(&content)?);
    }

    if targets.is_empty() {
        anyhow::bail!("No targets provided. Pass targets as arguments or use --file <path>");
    }

    Ok(targets)
}

/// Run a batch and print its summary
async fn run_batch(
    cfg: &ResolvedConfig,
    targets: Vec<Target>,
    options: JobOptions,
    limits: BatchLimits,
    format: SummaryFormat,
    output: Option<PathBuf>,
    no_cache: bool,
) -> Result<()> {
    // Bad options fail the whole invocation before any audit starts
    options.validate()?;

    let store: Arc<dyn BlobStore> = if no_cache {
        Arc::new(MemoryBlobStore::new())
    } else {
        Arc::new(FsBlobStore::new(&cfg.cache_dir))
    };

    let auditor = LighthouseAuditor::with_binary_path(&cfg.audit.lighthouse_binary);
    let mut executor = RetryExecutor::new(Arc::new(auditor));
    if options.screenshot.enabled {
        let screenshotter = match &cfg.screenshot.chrome_binary {
            Some(binary) => ChromeScreenshotter::with_chrome_binary(binary),
            None => ChromeScreenshotter::new(),
        };
        executor = executor.with_screenshotter(Arc::new(screenshotter));
    }

    let orchestrator =
        BatchOrchestrator::new(limits, store, executor).context("Invalid batch limits")?;

    eprintln!(
        "Auditing {} target(s), {} at a time...",
        targets.len(),
        limits.max_concurrent
    );
    let report = orchestrator.run_batch(targets, options).await;

    let rendered = match format {
        SummaryFormat::Text => render_text(&report.summary),
        SummaryFormat::Json => {
            render_json(&report.summary).context("Failed to serialize summary")?
        }
    };

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("Failed to write summary: {}", path.display()))?;
            eprintln!("Summary written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

async fn cache_command(cfg: &ResolvedConfig, action: CacheCommand) -> Result<()> {
    let cache = ResultCache::new(
        Arc::new(FsBlobStore::new(&cfg.cache_dir)),
        cfg.batch_limits().cache_duration,
    );

    match action {
        CacheCommand::Sweep => {
            let stats = cache.sweep().await;
            println!(
                "Scanned {} entries, evicted {}, {} errors",
                stats.scanned, stats.evicted, stats.errors
            );
        }
        CacheCommand::Clear => {
            let removed = cache.clear().await;
            println!("Removed {} cached results", removed);
        }
        CacheCommand::Stats => {
            let stats = cache.stats().await;
            println!("{:<12} {}", "Directory:", cfg.cache_dir.display());
            println!("{:<12} {}", "Entries:", stats.entries);
            println!("{:<12} {}", "Expired:", stats.expired);
            println!("{:<12} {}", "Unreadable:", stats.unreadable);
        }
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("auditbatch configuration");
    println!("{}", "-".repeat(40));
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("{}", serde_yaml::to_string(cfg).context("Failed to render configuration")?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "auditbatch",
            "run",
            "a.example",
            "b.example",
            "--concurrency",
            "1",
            "--categories",
            "performance,seo",
            "--format",
            "json",
            "--no-cache",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                targets,
                concurrency,
                categories,
                format,
                no_cache,
                ..
            } => {
                assert_eq!(targets, vec!["a.example", "b.example"]);
                assert_eq!(concurrency, Some(1));
                assert_eq!(categories.unwrap(), vec!["performance", "seo"]);
                assert_eq!(format, SummaryFormat::Json);
                assert!(no_cache);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_subcommand() {
        let cli = Cli::try_parse_from(["auditbatch", "cache", "sweep"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheCommand::Sweep
            }
        ));
    }

    #[test]
    fn test_collect_targets_from_args_and_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let list = temp.path().join("targets.txt");
        std::fs::write(&list, "# staging\nc.example\n\nhttps://d.example/path\n").unwrap();

        let targets = collect_targets(&["a.example".to_string()], Some(&list)).unwrap();
        let urls: Vec<&str> = targets.iter().map(Target::as_str).collect();
        assert_eq!(
            urls,
            vec!["https://a.example", "https://c.example", "https://d.example/path"]
        );
    }

    #[test]
    fn test_collect_targets_requires_input() {
        assert!(collect_targets(&[], None).is_err());
    }
}
