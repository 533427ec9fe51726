pub mod config;
pub mod gpio;
pub mod heartbeat;
pub mod mqtt;
pub mod poll;

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rppal::gpio::Gpio;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{Cli, Config, ConfigError};
use crate::gpio::debounce::DebounceEngine;
use crate::gpio::hardware::{EdgeMonitor, GpioError, OutputBank};
use crate::gpio::tick::TickClock;
use crate::heartbeat::{Heartbeat, HEARTBEAT_INTERVAL};
use crate::mqtt::bridge::MqttBridge;
use crate::mqtt::command::CommandRouter;
use crate::poll::PollLoop;

const EXIT_CONFIG: u8 = 1;
const EXIT_HARDWARE: u8 = 3;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to reach GPIO hardware: {0}")]
    Hardware(#[from] GpioError),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl AppError {
    fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::Runtime(_) => EXIT_CONFIG,
            AppError::Hardware(_) => EXIT_HARDWARE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap itself exits with code 2 on argument errors
    let cli = Cli::parse();

    if let Err(e) = setup(&cli) {
        eprintln!("Error: {e}");
        return ExitCode::from(EXIT_CONFIG);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn setup(cli: &Cli) -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_logging(cli)?;
    Ok(())
}

fn init_logging(cli: &Cli) -> Result<(), ConfigError> {
    let level = match cli.verbose {
        0 | 1 => Level::ERROR,
        2 => Level::WARN,
        3 => Level::INFO,
        _ => Level::DEBUG,
    };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);
    match &cli.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ConfigError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    info!("using configuration file {}", cli.config.display());
    let cfg = Config::load(&cli.config)?;
    info!(
        "going to monitor gpios {:?}, settable gpios {:?}",
        cfg.gpios_monitor, cfg.gpios_set
    );

    let gpio = Gpio::new().map_err(GpioError::from)?;
    let clock = Arc::new(TickClock::new());
    let engine = DebounceEngine::new(&cfg.gpios_monitor);
    let monitor = EdgeMonitor::register(&gpio, Arc::clone(&clock), &engine)?;
    let sink = OutputBank::claim(&gpio, &cfg.gpios_set)?;
    let router = CommandRouter::new(&cfg.id, &cfg.gpios_set, sink);
    let topics = router.topics();

    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(100);
    let (bridge, mut bridge_task) = MqttBridge::start(&cfg, topics, inbound_tx, cancel.clone());
    let router_task = tokio::spawn(router.run(inbound_rx));

    let heartbeat = Heartbeat::new(HEARTBEAT_INTERVAL);
    let poll = PollLoop::new(bridge.clone(), engine, heartbeat, clock);
    let poll_task = tokio::spawn(poll.run(cancel.clone()));

    info!("gpiomon device {} started", cfg.id);
    wait_for_shutdown().await?;

    info!("stopping gpiomon device {}", cfg.id);
    cancel.cancel();
    let _ = poll_task.await;
    bridge.disconnect();
    if tokio::time::timeout(Duration::from_secs(2), &mut bridge_task)
        .await
        .is_err()
    {
        warn!("MQTT event loop did not stop in time, aborting");
        bridge_task.abort();
    }
    let _ = router_task.await;
    monitor.release();
    info!("stopped");
    Ok(())
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("signal SIGINT received"),
        _ = sigterm.recv() => info!("signal SIGTERM received"),
        _ = sighup.recv() => info!("signal SIGHUP received"),
    }
    Ok(())
}
