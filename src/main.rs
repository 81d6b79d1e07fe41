mod audit;
mod classify;
mod config;
mod rotate;
mod stability;
mod status;
mod supervisor;
mod tail;
mod worker;

use clap::Parser;
use std::path::PathBuf;

/// A self-healing supervisor that keeps a crawl worker alive inside a
/// container: launch the worker, follow its merged output, and exit non-zero
/// (so the runtime restarts the unit) when a fatal marker or a non-zero
/// failed-job count stays on the stable line past the stability window.
#[derive(Parser, Debug)]
#[command(name = "crawlkeeper", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "keeper.toml")]
    config: PathBuf,

    /// Stability timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Worker log file (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Audit log file (overrides config)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (follower reads, rotation decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Worker command and arguments, forwarded verbatim
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "WORKER_ARGV"
    )]
    worker_argv: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let mut config = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    // CLI overrides
    if let Some(timeout) = cli.timeout {
        config.watch.stability_timeout_secs = timeout;
    }
    if let Some(log_file) = cli.log_file {
        config.files.log_file = log_file;
    }
    if let Some(audit_log) = cli.audit_log {
        config.files.audit_log = audit_log;
    }
    if !cli.worker_argv.is_empty() {
        config.worker.command = cli.worker_argv[0].clone();
        config.worker.args = cli.worker_argv[1..].to_vec();
    }

    if cli.dry_run {
        println!("crawlkeeper v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file:       {}", cli.config.display());
        println!(
            "Worker:            {} {}",
            config.worker.command,
            config.worker.args.join(" ")
        );
        println!("Log file:          {}", config.files.log_file.display());
        println!("Audit log:         {}", config.files.audit_log.display());
        println!("Stability timeout: {}s", config.watch.stability_timeout_secs);
        println!(
            "Stall ceiling:     {}",
            match config.watch.stall_ceiling() {
                Some(d) => format!("{}s", d.as_secs()),
                None => "disabled".to_string(),
            }
        );
        println!(
            "Rotation:          keep {} of max {} lines",
            config.rotation.trim_to_lines, config.rotation.max_log_lines
        );
        println!("Dry run mode — config validated, not running.");
        return;
    }

    let classifier = match classify::Classifier::new(
        &config.patterns.fatal_marker,
        &config.patterns.failure_count_marker,
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid failure-count marker");
            std::process::exit(2);
        }
    };

    if let Err(e) = worker::prepare_log_file(&config.files.log_file) {
        tracing::error!(
            error = %e,
            path = %config.files.log_file.display(),
            "failed to prepare log file"
        );
        std::process::exit(2);
    }

    // Follower attaches before the worker starts, so the first lines the
    // worker writes are never missed.
    let lines = tail::LineSource::spawn(config.files.log_file.clone(), config.watch.poll_interval());

    let handle = match worker::launch(
        &config.worker.command,
        &config.worker.args,
        &config.files.log_file,
    ) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, "failed to launch worker");
            std::process::exit(2);
        }
    };

    let reason = supervisor::run(&config, classifier, handle, lines).await;
    tracing::info!(reason = ?reason, "supervisor exiting");
    std::process::exit(reason.exit_code());
}
