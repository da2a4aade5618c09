use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use reelbatch::cli::{Cli, Commands, ConfigAction};
use reelbatch::config::Config;
use reelbatch::credentials::CredentialPool;
use reelbatch::pipeline::{
    ChannelSink, FanOutSink, LogSink, ProgressSink, StageName, dry_run_stages,
};
use reelbatch::scheduler::BatchScheduler;
use reelbatch::{defaults, output};
use std::collections::HashMap;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    tracing::debug!(version = %reelbatch::version_string(), "reelbatch starting");

    match cli.command {
        Commands::Run {
            urls,
            file,
            json,
            delay,
        } => {
            let options = RunOptions {
                urls,
                file,
                json,
                delay,
                quiet: cli.quiet,
                verbose: cli.verbose,
            };
            run_batch(cli.config.as_deref(), options).await?;
        }
        Commands::Keys => {
            list_keys(cli.config.as_deref())?;
        }
        Commands::Stages => {
            list_stages(cli.config.as_deref())?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "reelbatch",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise -q → warn, default info, -v → debug, -vv → trace.
fn init_tracing(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reelbatch={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        let default_path = Config::default_path();
        Config::load_or_default(&default_path)
            .with_context(|| format!("Failed to load config from {}", default_path.display()))?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

struct RunOptions {
    urls: Vec<String>,
    file: Option<PathBuf>,
    json: bool,
    delay: Option<Duration>,
    quiet: bool,
    verbose: u8,
}

/// Queue URLs, run them through dry-run stages, and print progress until the
/// queue drains or Ctrl-C is pressed.
async fn run_batch(config_path: Option<&Path>, options: RunOptions) -> Result<()> {
    let config = load_config(config_path)?;
    let policy = config.cooldown_policy()?;
    let stage_names = config.stage_names()?;
    let delay = match options.delay {
        Some(delay) => delay,
        None => config.dry_run_delay()?,
    };

    let pool = Arc::new(CredentialPool::from_source(&config)?);
    if pool.is_empty() && stage_names.iter().any(StageName::uses_api_key) {
        bail!(
            "No API keys configured. Add a [credentials] table to {} or set {}",
            Config::default_path().display(),
            defaults::API_KEYS_ENV
        );
    }

    let (channel_sink, events) = ChannelSink::bounded(defaults::EVENT_BUFFER);
    let mut sink = FanOutSink::new(vec![Arc::new(channel_sink) as Arc<dyn ProgressSink>]);
    if options.verbose > 0 {
        sink = sink.with(Arc::new(LogSink));
    }

    let scheduler = Arc::new(
        BatchScheduler::new(pool, dry_run_stages(&stage_names, delay), Arc::new(sink))?
            .with_cooldown_policy(policy),
    );

    let text = collect_input(&options.urls, options.file.as_deref())?;
    let report = scheduler.enqueue_text(&text);
    if report.added == 0 {
        bail!("No new URLs to process ({} duplicate(s))", report.duplicates);
    }
    if !options.quiet {
        eprintln!(
            "Queued {} URL(s){}",
            report.added,
            if report.duplicates > 0 {
                format!(", {} duplicate(s) ignored", report.duplicates)
            } else {
                String::new()
            }
        );
    }

    let json = options.json;
    let quiet = options.quiet;
    let printer = std::thread::spawn(move || {
        // Ends when the scheduler (and with it the sender) is dropped
        for event in events.iter() {
            if json {
                match event.to_json() {
                    Ok(line) => println!("{line}"),
                    Err(e) => eprintln!("reelbatch: failed to encode event: {e}"),
                }
            } else if !quiet {
                output::render_event(&event);
            }
        }
    });

    scheduler.start()?;

    let waiter = {
        let scheduler = Arc::clone(&scheduler);
        tokio::task::spawn_blocking(move || scheduler.wait_idle(None))
    };

    tokio::select! {
        result = waiter => {
            result.context("Batch wait task failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Stopping after the current stage...");
        }
    }
    scheduler.stop();

    let items = scheduler.snapshot();
    let counts = scheduler.counts();
    drop(scheduler);
    if printer.join().is_err() {
        eprintln!("reelbatch: event printer thread panicked");
    }

    if !json {
        eprintln!();
        for item in &items {
            eprintln!("{}", output::format_item(item));
        }
    }
    eprintln!("{}", output::format_counts(&counts).bold());

    if counts.failed > 0 {
        bail!("{} item(s) failed", counts.failed);
    }
    Ok(())
}

/// URLs from arguments plus `--file` (or piped stdin when neither is given).
fn collect_input(urls: &[String], file: Option<&Path>) -> Result<String> {
    let mut text = urls.join("\n");

    let extra = match file {
        Some(path) if path == Path::new("-") => Some(read_stdin()?),
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None if urls.is_empty() && !std::io::stdin().is_terminal() => Some(read_stdin()?),
        None => None,
    };

    if let Some(extra) = extra {
        text.push('\n');
        text.push_str(&extra);
    }
    Ok(text)
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read stdin")?;
    Ok(buffer)
}

fn list_keys(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = CredentialPool::from_source(&config)?;

    if pool.is_empty() {
        println!(
            "No API keys configured (set {} or add a [credentials] table).",
            defaults::API_KEYS_ENV
        );
        return Ok(());
    }

    let masked: HashMap<String, String> = config
        .credentials()
        .iter()
        .map(|credential| (credential.name().to_string(), credential.masked_secret()))
        .collect();

    println!("{}", format!("API keys ({})", pool.len()).bold());
    for line in output::format_pool_status(&pool.status(), |name| masked.get(name).cloned()) {
        println!("  {line}");
    }
    Ok(())
}

fn list_stages(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let stages = config.stage_names()?;

    println!("{}", "Pipeline stages".bold());
    for line in output::format_stages(&stages) {
        println!("  {line}");
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            print!("{}", config.to_display_toml()?);
        }
        ConfigAction::Path => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
