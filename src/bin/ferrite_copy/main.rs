//! ferrite-copy - copy keys between Redis-compatible servers
//!
//! Copies every key matching a pattern from a source server to a
//! destination server, preserving types and TTLs, with optional
//! verification of the copied keys.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use colored::Colorize;

use ferrite_copy::telemetry::init_logging;
use ferrite_copy::{
    ConnectionSpec, ConsoleNotifier, CopyError, EmitterChoice, LogFormat, MigrationDriver,
    RespClient, RunConfig, Stats, StrategyChoice,
};

/// ferrite-copy - copy a keyspace between Redis-compatible servers
#[derive(Parser, Debug)]
#[command(name = "ferrite-copy")]
#[command(author, version, about = "Copy keys from one Redis-compatible server to another")]
struct CopyArgs {
    /// Source connection string ([redis://][user:password@]host[:port][/db])
    source: String,

    /// Destination connection string
    destination: String,

    /// TOML configuration file; flags override its values
    #[arg(short = 'c', long, env = "FERRITE_COPY_CONFIG")]
    config: Option<PathBuf>,

    /// Transfer strategy
    #[arg(long, value_enum, env = "FERRITE_COPY_STRATEGY")]
    strategy: Option<StrategyArg>,

    /// Key emitter
    #[arg(long, value_enum, env = "FERRITE_COPY_EMITTER")]
    emitter: Option<EmitterArg>,

    /// Only copy keys matching this glob pattern
    #[arg(long, env = "FERRITE_COPY_PATTERN")]
    pattern: Option<String>,

    /// Group the writes for each key into one round trip
    #[arg(long, overrides_with = "no_pipeline")]
    pipeline: bool,

    /// Send every write on its own
    #[arg(long)]
    no_pipeline: bool,

    /// Verify a percentage of copied keys (bare flag verifies all)
    #[arg(
        long,
        value_name = "PERCENT",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "100",
        value_parser = clap::value_parser!(u8).range(0..=100),
        env = "FERRITE_COPY_VERIFY"
    )]
    verify: Option<u8>,

    /// Stop at the first failed or mismatched key
    #[arg(long)]
    fail_fast: bool,

    /// Allow copying into a destination that already has keys
    #[arg(long)]
    allow_nonempty: bool,

    /// Do not ask for confirmation
    #[arg(long, visible_alias = "yes")]
    no_prompt: bool,

    /// Print every key as it is copied
    #[arg(long)]
    debug: bool,

    /// Print the full error chain on failure
    #[arg(long)]
    trace: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FERRITE_COPY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum, env = "FERRITE_COPY_LOG_FORMAT")]
    log_format: Option<LogFormatArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    /// Snapshot when both servers support it
    Auto,
    /// Type-specific reads and writes
    Classic,
    /// DUMP / RESTORE
    Snapshot,
}

impl From<StrategyArg> for StrategyChoice {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => StrategyChoice::Auto,
            StrategyArg::Classic => StrategyChoice::Classic,
            StrategyArg::Snapshot => StrategyChoice::Snapshot,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmitterArg {
    /// SCAN when the source supports it
    Auto,
    /// One blocking KEYS call
    FullScan,
    /// Incremental SCAN
    CursorScan,
}

impl From<EmitterArg> for EmitterChoice {
    fn from(arg: EmitterArg) -> Self {
        match arg {
            EmitterArg::Auto => EmitterChoice::Auto,
            EmitterArg::FullScan => EmitterChoice::FullScan,
            EmitterArg::CursorScan => EmitterChoice::CursorScan,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CopyArgs::parse();
    let trace = args.trace;

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            if trace {
                for cause in e.chain().skip(1) {
                    eprintln!("  {} {}", "caused by:".dimmed(), cause);
                }
            }
            let code = e
                .downcast_ref::<CopyError>()
                .map_or(1, CopyError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(args: CopyArgs) -> anyhow::Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let source = ConnectionSpec::parse(&args.source)?;
    let destination = ConnectionSpec::parse(&args.destination)?;

    if args.dry_run {
        println!("# source = {}", source.identity());
        println!("# destination = {}", destination.identity());
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::FAILURE);
    }

    init_logging(&config.logging);

    let source_client = RespClient::connect(source.clone())
        .await
        .with_context(|| format!("connecting to source {}", source.identity()))?;
    let destination_client = RespClient::connect(destination.clone())
        .await
        .with_context(|| format!("connecting to destination {}", destination.identity()))?;

    let notifier = Arc::new(ConsoleNotifier::new(config.prompt, config.debug));
    let mut driver = MigrationDriver::new(
        Arc::new(source_client),
        Arc::new(destination_client),
        config,
        notifier,
    );

    let token = driver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} cancelling...", "→".yellow().bold());
            token.cancel();
        }
    });

    let started = Instant::now();
    let stats = driver.run().await?;
    print_summary(&stats, started.elapsed().as_secs_f64());

    Ok(ExitCode::SUCCESS)
}

fn apply_overrides(config: &mut RunConfig, args: &CopyArgs) {
    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }
    if let Some(emitter) = args.emitter {
        config.key_emitter = emitter.into();
    }
    if let Some(pattern) = &args.pattern {
        config.pattern = pattern.clone();
    }
    if args.pipeline {
        config.pipeline = true;
    }
    if args.no_pipeline {
        config.pipeline = false;
    }
    if let Some(percent) = args.verify {
        config.verify_percent = percent;
    }
    config.fail_fast |= args.fail_fast;
    config.allow_nonempty |= args.allow_nonempty;
    config.debug |= args.debug;
    if args.no_prompt {
        config.prompt = false;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format.into();
    }
}

fn print_summary(stats: &Stats, secs: f64) {
    println!();
    if stats.failure == 0 && stats.mismatched == 0 {
        println!("{}", "✓ Copy completed successfully!".green().bold());
    } else {
        println!("{}", "✗ Copy completed with errors.".red().bold());
    }
    println!();
    println!("{}", "Result Summary".bold().underline());
    println!("  Keys attempted:  {}", stats.attempt);
    println!("  Keys copied:     {}", stats.success);
    println!("  Keys failed:     {}", stats.failure);
    println!("  Keys verified:   {}", stats.verified);
    println!("  Mismatched:      {}", stats.mismatched);
    println!("  Duration:        {:.1}s", secs);
    println!();
}
