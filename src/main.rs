use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use court_lights::*;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "court-lights.toml")]
    config: PathBuf,

    /// Log fixture commands instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum FixtureArg {
    /// Half Court A light
    HalfCourtA,
    /// Half Court B light
    HalfCourtB,
    /// Full Court light
    FullCourt,
}

impl From<FixtureArg> for Fixture {
    fn from(arg: FixtureArg) -> Self {
        match arg {
            FixtureArg::HalfCourtA => Fixture::HalfCourtA,
            FixtureArg::HalfCourtB => Fixture::HalfCourtB,
            FixtureArg::FullCourt => Fixture::FullCourt,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run today's schedule now, then every day at the configured time
    Run,
    /// Run today's schedule once and exit
    Once,
    /// Print today's plan without touching the lights
    Plan {
        /// Booking email to read instead of the configured source
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show whether each light is on
    Status,
    /// Turn a light on
    On {
        #[arg(value_enum)]
        fixture: FixtureArg,
    },
    /// Turn a light off
    Off {
        #[arg(value_enum)]
        fixture: FixtureArg,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("court_lights=info,courtlights=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let config = Config::load(&cli.config)
        .wrap_err_with(|| format!("Failed to load {}", cli.config.display()))?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let controller = connect(&config, cli.dry_run).await?;
            run_daemon(&config, controller.as_ref()).await?;
        }
        Commands::Once => {
            let controller = connect(&config, cli.dry_run).await?;
            let scheduler = LightingScheduler::new(
                controller.as_ref(),
                SystemClock,
                config.scheduler_settings()?,
            );
            let source = FileSource::new(&config.source.path);
            daily_routine(&scheduler, &source, wait_for_shutdown(shutdown_signal())).await;
        }
        Commands::Plan { file } => {
            let path = file.unwrap_or_else(|| config.source.path.clone());
            print_plan(&config, FileSource::new(path)).await?;
        }
        Commands::Status => {
            let controller = connect(&config, cli.dry_run).await?;
            for fixture in FIXTURES {
                match controller.status(fixture).await {
                    Ok(true) => println!("{fixture} is ON"),
                    Ok(false) => println!("{fixture} is OFF"),
                    Err(e) => {
                        error!("Status query for {} failed: {}", fixture, e);
                        println!("Failed to retrieve status for {fixture}");
                    }
                }
            }
        }
        Commands::On { fixture } => {
            let controller = connect(&config, cli.dry_run).await?;
            controller.turn_on(fixture.into()).await?;
        }
        Commands::Off { fixture } => {
            let controller = connect(&config, cli.dry_run).await?;
            controller.turn_off(fixture.into()).await?;
        }
    }

    Ok(())
}

/// Opens the configured fixture controller
async fn connect(config: &Config, dry_run: bool) -> Result<Box<dyn FixtureController>> {
    if dry_run {
        info!("Dry run: fixture commands are only logged");
        return Ok(Box::new(DryRunController::new()));
    }

    match BridgeController::spawn(config).await {
        Ok(controller) => Ok(Box::new(controller)),
        Err(e) => {
            error!("Failed to set up devices: {}", e);
            Err(e.into())
        }
    }
}

/// Runs the daily routine now and then every day, until SIGINT or SIGTERM.
/// The lights are switched off on the way out.
async fn run_daemon(config: &Config, controller: &dyn FixtureController) -> Result<()> {
    let scheduler = LightingScheduler::new(controller, SystemClock, config.scheduler_settings()?);
    let source = FileSource::new(&config.source.path);
    let shutdown = shutdown_signal();
    let mut trigger = DailyTrigger::new(config.schedule.daily_run_at, config.poll_interval());

    info!(
        "Daily routine scheduled at {}",
        config.schedule.daily_run_at.format("%H:%M")
    );

    tokio::select! {
        _ = trigger.run(&SystemClock, || {
            daily_routine(&scheduler, &source, wait_for_shutdown(shutdown.clone()))
        }) => {}
        _ = wait_for_shutdown(shutdown.clone()) => {
            info!("Shutting down");
        }
    }

    scheduler.all_off().await;
    Ok(())
}

/// Reads today's bookings and drives the lights through them
#[instrument(skip_all)]
async fn daily_routine<F, C, S>(
    scheduler: &LightingScheduler<F, C>,
    source: &dyn ReservationSource,
    shutdown: S,
) where
    F: FixtureController,
    C: Clock,
    S: std::future::Future<Output = ()>,
{
    info!("Starting daily routine");

    let reservations = match source.fetch().await {
        Ok(reservations) => reservations,
        Err(e) => {
            error!("An error occurred during the daily routine: {}", e);
            return;
        }
    };

    match scheduler.run_day_until(&reservations, shutdown).await {
        DayOutcome::NoReservations => info!("Nothing booked today"),
        DayOutcome::Completed => info!("Daily routine finished"),
        DayOutcome::Interrupted => warn!("Daily routine interrupted"),
    }
}

async fn print_plan(config: &Config, source: FileSource) -> Result<()> {
    let reservations = source
        .fetch()
        .await
        .wrap_err_with(|| format!("Failed to read {}", source.path().display()))?;

    let scheduler = LightingScheduler::new(
        DryRunController::new(),
        SystemClock,
        config.scheduler_settings()?,
    );
    let plan = scheduler.plan(&reservations);

    println!(
        "Full court policy: {}, blackout {}-{}",
        config.schedule.full_court_policy,
        config.blackout.start.format("%H:%M"),
        config.blackout.end.format("%H:%M")
    );
    print!("{plan}");
    Ok(())
}

/// Flips to `true` on SIGINT, or SIGTERM on unix
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
            _ = terminate => info!("Received SIGTERM"),
        }

        let _ = tx.send(true);
    });

    rx
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        // Sender gone without a signal: never shut down
        std::future::pending::<()>().await;
    }
}
