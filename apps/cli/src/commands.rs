//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use hss_core::{BuildOptions, BuildResult, Builder, Phase};
use hss_shared::{BuildConfig, CONFIG_FILE_NAME, load_config, load_config_from};
use tracing::info;

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// hss: build IIIF Manifests and Collections into a static site.
#[derive(Parser)]
#[command(
    name = "hss",
    version,
    about = "Incremental static builds for IIIF Manifests and Collections.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to the project config (defaults to ./hss.toml).
    #[arg(long, global = true, env = "HSS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the build pipeline.
    Build(BuildArgs),

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct BuildArgs {
    /// Ignore every cached result and rebuild from source.
    #[arg(long)]
    pub no_cache: bool,

    /// Skip emit and build-indices.
    #[arg(long)]
    pub no_emit: bool,

    /// Process and emit only this slug.
    #[arg(long, value_name = "SLUG")]
    pub exact: Option<String>,

    /// Run only these optional phases (repeatable).
    #[arg(long = "phase", value_name = "NAME")]
    pub phases: Vec<Phase>,

    /// Resources processed in parallel.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Canvases processed in parallel per Manifest.
    #[arg(long)]
    pub canvas_concurrency: Option<usize>,

    /// Fail the build when any enrichment fails.
    #[arg(long)]
    pub strict: bool,

    /// Skip prefetching remote stores.
    #[arg(long)]
    pub no_warm: bool,
}

impl BuildArgs {
    fn options(&self) -> BuildOptions {
        BuildOptions {
            cache: !self.no_cache,
            emit: !self.no_emit,
            phases: (!self.phases.is_empty()).then(|| self.phases.clone()),
            concurrency: self.concurrency,
            canvas_concurrency: self.canvas_concurrency,
            exact: self.exact.clone(),
            warm: !self.no_warm,
            strict: self.strict,
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Validate the config and print it, defaults and generator stores included.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "hss=info",
        1 => "hss=debug",
        _ => "hss=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = read_config(cli.config.as_deref())?;
    match cli.command {
        Command::Build(args) => cmd_build(config, &args).await,
        Command::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<BuildConfig> {
    match path {
        Some(path) => load_config_from(path)
            .wrap_err_with(|| format!("cannot load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| eyre!("cannot determine working directory: {e}"))?;
            load_config(&cwd).wrap_err_with(|| format!("cannot load {CONFIG_FILE_NAME}"))
        }
    }
}

async fn cmd_build(config: BuildConfig, args: &BuildArgs) -> Result<()> {
    let options = args.options();
    info!(
        stores = config.stores.len(),
        cache = options.cache,
        emit = options.emit,
        exact = options.exact.as_deref().unwrap_or("-"),
        "starting build"
    );

    let progress = Arc::new(CliProgress::new());
    let result = Builder::new(config).build(options, progress.clone()).await;
    progress.finish();
    let result = result?;

    print_summary(&result);
    check_result(&result)
}

/// Warnings leave a complete output behind; only failures fail the command.
fn check_result(result: &BuildResult) -> Result<()> {
    if result.failures.is_empty() {
        return Ok(());
    }
    Err(eyre!(
        "build finished with {} failure(s) and {} warning(s)",
        result.failures.len(),
        result.warnings.len()
    ))
}

fn cmd_config_show(config: &BuildConfig) -> Result<()> {
    config.validate()?;
    let mut resolved = config.clone();
    resolved.stores = config.effective_stores();
    let text = serde_json::to_string_pretty(&resolved).wrap_err("cannot render config")?;
    println!("{text}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

fn print_summary(result: &BuildResult) {
    println!();
    println!(
        "  {:<14} {:>7} {:>9} {:>6} {:>6} {:>7}",
        "phase", "total", "processed", "hits", "steps", "failed"
    );
    for (phase, stats) in &result.stats {
        println!(
            "  {:<14} {:>7} {:>9} {:>6} {:>6} {:>7}",
            phase.as_str(),
            stats.total,
            stats.processed,
            stats.cache_hits,
            stats.steps_run,
            stats.failed
        );
    }
    println!();
    println!("  Resources:   {}", result.sitemap.len());
    println!("  Collections: {}", result.collections.len());
    if let Some(warm) = result.warm {
        println!("  Warmed:      {}/{}", warm.completed, warm.discovered);
    }
    println!("  Failures:    {}", result.failures.len());
    println!("  Warnings:    {}", result.warnings.len());
    println!("  Time:        {:.1}s", result.elapsed.as_secs_f64());
    for failure in &result.failures {
        println!("  ! {failure}");
    }
    for warning in &result.warnings {
        println!("  ~ {warning}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "hss",
            "build",
            "--no-cache",
            "--exact",
            "manifests/a",
            "--phase",
            "extract",
            "--phase",
            "emit",
            "--concurrency",
            "4",
        ])
        .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        let options = args.options();
        assert!(!options.cache);
        assert!(options.emit);
        assert_eq!(options.exact.as_deref(), Some("manifests/a"));
        assert_eq!(options.phases, Some(vec![Phase::Extract, Phase::Emit]));
        assert_eq!(options.concurrency, Some(4));
        assert!(options.warm);
    }

    #[test]
    fn warnings_alone_do_not_fail_the_command() {
        let mut result = BuildResult {
            warnings: vec!["warm-remote: 1 url(s) failed".into()],
            ..Default::default()
        };
        assert!(check_result(&result).is_ok());

        result.failures.push("load `manifests/a`: bad json".into());
        let err = check_result(&result).unwrap_err();
        assert!(err.to_string().contains("1 failure(s) and 1 warning(s)"));
    }

    #[test]
    fn unknown_phase_is_rejected() {
        assert!(Cli::try_parse_from(["hss", "build", "--phase", "deploy"]).is_err());
    }
}
