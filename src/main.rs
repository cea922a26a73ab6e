//! syspart - version 0.1.0
//!
//! Rule-based process classification daemon with tracing logging.
//! This is the main entry point that starts the dispatch loop and handles subcommands.

mod cli;
mod commands;
mod startup_checks;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_classify, command_config, command_dump};
use syspart::config::{load_config, show_config};
use syspart::daemon::Reloader;
use syspart::process::{ProcScanner, ProcfsSource};
use syspart::sysmon::ProcStatSource;
use syspart::{
    Classifier, Config, ConfigError, Daemon, Event, LogNotifier, Notifier, TokioScheduler,
};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Where the configuration comes from, kept around for reloads.
#[derive(Debug, Clone)]
struct ConfigSource {
    path: Option<PathBuf>,
    no_config: bool,
    mount: Option<PathBuf>,
    proc_root: Option<PathBuf>,
}

impl ConfigSource {
    fn from_args(args: &Args) -> Self {
        Self {
            path: args.config.clone(),
            no_config: args.no_config,
            mount: args.mount.clone(),
            proc_root: args.proc_root.clone(),
        }
    }

    /// Loads the file (unless disabled) and applies command line overrides.
    fn load(&self) -> Result<Config, ConfigError> {
        let mut config = if self.no_config {
            Config::default()
        } else {
            load_config(self.path.as_deref())?
        };
        if let Some(mount) = &self.mount {
            config.mount = Some(mount.clone());
        }
        if let Some(root) = &self.proc_root {
            config.proc_root = Some(root.clone());
        }
        Ok(config)
    }
}

/// Forwards SIGHUP as reload and SIGINT/SIGTERM as shutdown.
fn install_signal_handlers(tx: UnboundedSender<Event>) -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    Event::Reload
                }
                _ = interrupt.recv() => {
                    info!("SIGINT received, shutting down");
                    Event::Shutdown
                }
                _ = terminate.recv() => {
                    info!("SIGTERM received, shutting down");
                    Event::Shutdown
                }
            };
            let stop = event == Event::Shutdown;
            if tx.send(event).is_err() || stop {
                break;
            }
        }
    });
    Ok(())
}

/// Builds the daemon from `config` and runs it until shutdown.
async fn run_daemon(source: ConfigSource, config: Config) -> anyhow::Result<()> {
    let options = config.options();
    if let Err(e) = startup_checks::validate_requirements(&options) {
        error!("❌ Startup validation failed: {}", e);
        std::process::exit(1);
    }

    let ctx = match syspart::validate(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("❌ Failed to apply configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let classifier = Classifier::new(
        Box::new(ProcfsSource::new(&options.proc_root)),
        notifier.clone(),
    );
    let reloader: Reloader = Box::new(move || {
        let config = source.load()?;
        syspart::validate(&config)
    });

    let mut daemon = Daemon::new(ctx, classifier, TokioScheduler::new(tx.clone()), notifier)
        .with_scanner(ProcScanner::new(&options.proc_root))
        .with_reloader(reloader);
    match ProcStatSource::open(&options.proc_root) {
        Ok(stats) => daemon = daemon.with_stats(Box::new(stats)),
        Err(e) => warn!("Kernel statistics unavailable, pressure monitors disabled: {}", e),
    }

    install_signal_handlers(tx)?;

    info!("Starting syspart on {}", options.mount.display());
    daemon.start();
    daemon.run(rx).await;
    info!("syspart stopped");
    Ok(())
}

/// Main application entry point.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    let source = ConfigSource::from_args(&args);
    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    if args.check_config {
        if let Err(e) = config.compile() {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        print!("{}", show_config(&config, args.config_format)?);
        return Ok(());
    }

    match args.command {
        Some(Commands::Check { cgroups }) => command_check(cgroups, &config),
        Some(Commands::Dump) => command_dump(&config),
        Some(Commands::Classify { pid }) => command_classify(pid, &config),
        Some(Commands::Config { output }) => command_config(output),
        Some(Commands::Run) | None => run_daemon(source, config).await,
    }
}
