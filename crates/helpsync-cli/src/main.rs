use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use helpsync_core::artifact_index::FileHashStore;
use helpsync_core::config::load_from_process_env;
use helpsync_core::harvester::Harvester;
use helpsync_core::lock_store::FileBlobStore;
use helpsync_core::orchestrator::Orchestrator;
use helpsync_core::reporter::{Reporter, StderrReporter};
use helpsync_core::retry::RetryPolicy;
use helpsync_core::tick_loop::{self, OrchestratorFactory, ShutdownFlag};
use helpsync_core::types::RuntimeConfig;
use helpsync_core::uploader::{HttpArtifactStore, Uploader};

#[derive(Parser, Debug)]
#[command(name = "helpsync", version)]
#[command(about = "Mirrors a hierarchical knowledge base into a vector-store artifact index")]
struct Cli {
    /// Optional TOML config overlay (environment variables still take precedence).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the resolved tick interval for this invocation (e.g. "30m", "2h").
    #[arg(long)]
    tick_interval: Option<String>,

    /// Run exactly one tick and exit, instead of entering daemon mode.
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print resolved configuration and perform lightweight reachability checks.
    Doctor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config =
        load_from_process_env(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(raw) = &cli.tick_interval {
        config.tick_interval = humantime::parse_duration(raw)
            .with_context(|| format!("invalid --tick-interval value: {raw}"))?;
    }

    match cli.cmd {
        Some(Commands::Doctor) => run_doctor(&config),
        None if cli.once => run_once(&config),
        None => run_daemon(&config),
    }
}

fn reporter_handle() -> Arc<Mutex<dyn Reporter + Send>> {
    Arc::new(Mutex::new(StderrReporter))
}

fn build_orchestrator(
    config: &RuntimeConfig,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
) -> Result<Orchestrator> {
    let harvester = Harvester::new(
        config.kb_base_url.clone(),
        config.locale.clone(),
        config.harvest_concurrency,
        config.call_timeout,
        Arc::clone(&reporter),
    )
    .context("failed to construct harvester")?;

    let artifact_store = Arc::new(
        HttpArtifactStore::new(
            config.artifact_store_base_url.clone(),
            config.artifact_collection.clone(),
            config.artifact_store_token.clone(),
            config.call_timeout,
        )
        .context("failed to construct artifact store client")?,
    );

    let uploader = Uploader::new(
        artifact_store,
        config.upload_concurrency,
        RetryPolicy::Default.to_config(),
        Arc::clone(&reporter),
    );

    let state_dir = PathBuf::from(&config.state_dir);
    let lock_store = Arc::new(FileBlobStore::new(state_dir.clone()));
    let index_store = Arc::new(FileHashStore::new(state_dir));

    Ok(Orchestrator::new(
        config.clone(),
        harvester,
        uploader,
        lock_store,
        index_store,
        reporter,
    ))
}

/// Runs exactly one tick and exits 0 on success, nonzero (via `Err`) on
/// failure -- the `--once` mode for cron-style invocation or CI smoke
/// tests.
fn run_once(config: &RuntimeConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config, reporter_handle())?;
    let outcome = orchestrator.sync().context("sync tick failed")?;
    println!(
        "new={} updated={} deleted={} unchanged={} upload_failures={} duration={:?}",
        outcome.new_count,
        outcome.updated_count,
        outcome.deleted_count,
        outcome.unchanged_count,
        outcome.upload_failures,
        outcome.duration
    );
    Ok(())
}

struct HelpsyncFactory {
    config: RuntimeConfig,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
}

impl OrchestratorFactory for HelpsyncFactory {
    fn build(&self) -> Orchestrator {
        build_orchestrator(&self.config, Arc::clone(&self.reporter))
            .expect("failed to (re)construct orchestrator from already-validated configuration")
    }
}

/// Never returns 0 in normal operation: runs the tick loop until a
/// Ctrl-C/SIGTERM sets the shutdown flag, which is checked
/// only at iteration boundaries so a signal never interrupts a tick
/// mid-commit.
fn run_daemon(config: &RuntimeConfig) -> Result<()> {
    let reporter = reporter_handle();
    let shutdown = ShutdownFlag::new();

    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.request())
            .context("failed to install Ctrl-C/SIGTERM handler")?;
    }

    let factory = HelpsyncFactory {
        config: config.clone(),
        reporter: Arc::clone(&reporter),
    };

    tick_loop::run(
        &factory,
        config.tick_interval,
        config.error_backoff,
        shutdown,
        reporter,
        std::thread::sleep,
        None,
    );

    anyhow::bail!("tick loop exited without a shutdown request");
}

fn run_doctor(config: &RuntimeConfig) -> Result<()> {
    println!("locale:               {}", config.locale);
    println!("kb_base_url:          {}", config.kb_base_url);
    println!("output_dir:           {}", config.output_dir);
    println!("state_dir:            {}", config.state_dir);
    println!("lock_key:             {}", config.lock_key);
    println!("index_key:            {}", config.index_key);
    println!("artifact_store_url:   {}", config.artifact_store_base_url);
    println!("artifact_collection:  {}", config.artifact_collection);
    println!(
        "telemetry_sink_url:   {}",
        config.telemetry_sink_url.as_deref().unwrap_or("(none)")
    );
    println!("tick_interval:        {}", humantime::format_duration(config.tick_interval));
    println!("error_backoff:        {}", humantime::format_duration(config.error_backoff));
    println!("harvest_concurrency:  {}", config.harvest_concurrency);
    println!("upload_concurrency:   {}", config.upload_concurrency);
    println!("call_timeout:         {}", humantime::format_duration(config.call_timeout));
    println!();

    check_reachable("knowledge base", &config.kb_base_url, config.call_timeout);
    check_reachable(
        "artifact store",
        &config.artifact_store_base_url,
        config.call_timeout,
    );

    let state_dir = PathBuf::from(&config.state_dir);
    match std::fs::create_dir_all(&state_dir) {
        Ok(()) => println!("state_dir:            writable"),
        Err(e) => println!("state_dir:            NOT writable ({e})"),
    }

    Ok(())
}

fn check_reachable(label: &str, base_url: &str, timeout: Duration) {
    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            println!("{label}: reachability check skipped ({e})");
            return;
        }
    };

    match client.get(base_url).send() {
        Ok(response) => println!("{label}: reachable (HTTP {})", response.status()),
        Err(e) => println!("{label}: unreachable ({e})"),
    }
}
