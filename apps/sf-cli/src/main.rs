mod signals;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use sf_app::{AppResult, ControllerBuilder, Cycle, CycleObserver, StatusHandle};
use sf_controls::{AlgorithmRegistry, ControlError, ExpressionParser};
use sf_core::{Duty, DutyRange};
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spinflow")]
#[command(about = "spinflow - temperature driven fan control", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and show the fan update order
    Validate {
        /// Path to the YAML or JSON configuration
        config_path: PathBuf,
    },
    /// List the available algorithms and their parameters
    Algorithms,
    /// Print the duty curve of an algorithm over a temperature range
    Simulate {
        /// Algorithm expression, e.g. "Quadratic(sensors.cpu, 50, 85)"
        algorithm: String,
        /// First temperature in °C
        #[arg(long, default_value_t = 20.0)]
        from: f64,
        /// Last temperature in °C
        #[arg(long, default_value_t = 100.0)]
        to: f64,
        /// Temperature step in °C
        #[arg(long, default_value_t = 5.0)]
        step: f64,
        #[arg(long, default_value_t = 0)]
        min_duty: i64,
        #[arg(long, default_value_t = 100)]
        max_duty: i64,
    },
    /// Control the fans until interrupted
    Run {
        /// Path to the YAML or JSON configuration
        config_path: PathBuf,
        /// Log duty changes without applying them
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Seconds between status tables (0 prints after every cycle)
        #[arg(long, default_value_t = 0.0)]
        log_interval: f64,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { config_path } => cmd_validate(&config_path),
        Commands::Algorithms => {
            cmd_algorithms();
            Ok(())
        }
        Commands::Simulate {
            algorithm,
            from,
            to,
            step,
            min_duty,
            max_duty,
        } => cmd_simulate(&algorithm, from, to, step, min_duty, max_duty),
        Commands::Run {
            config_path,
            dry_run,
            log_interval,
        } => cmd_run(&config_path, dry_run, log_interval).await,
    }
}

fn cmd_validate(config_path: &Path) -> AppResult<()> {
    println!("Validating configuration: {}", config_path.display());
    let config = sf_config::load(config_path)?;
    let controller = ControllerBuilder::new(config).build()?;
    println!("✓ Configuration is valid");

    let store = controller.store();
    println!(
        "  {} sensors, {} fans",
        store.sensor_count(),
        store.fan_count()
    );
    for (index, wave) in controller.waves().iter().enumerate() {
        let names: Vec<&str> = wave.iter().map(|id| store.fan_name(*id)).collect();
        println!("  wave {}: {}", index + 1, names.join(", "));
    }
    Ok(())
}

fn cmd_algorithms() {
    println!("Available algorithms:");
    for spec in AlgorithmRegistry::with_defaults().iter() {
        println!("  {spec}");
        println!("      {}", spec.summary);
    }
    println!();
    println!("Arguments may be passed by position or as name=value.");
    println!("Inputs are expressions over sensors.<id>, fans.<id>, numbers, + - * and ( ).");
}

fn cmd_simulate(
    algorithm: &str,
    from: f64,
    to: f64,
    step: f64,
    min_duty: i64,
    max_duty: i64,
) -> AppResult<()> {
    let range = Duty::new(min_duty)
        .and_then(|min| DutyRange::new(min, Duty::new(max_duty)?))
        .map_err(ControlError::from)?;
    let temperatures = sf_app::sweep(from, to, step)?;
    let points = sf_app::simulate_curve(&ExpressionParser::default(), algorithm, range, temperatures)?;

    println!("{algorithm}");
    println!("{:>8}  {:>5}", "°C", "duty");
    for point in points {
        println!("{:>8.1}  {:>4}%", point.temperature, point.duty.percent());
    }
    Ok(())
}

/// Prints a status table at most once per interval.
struct StatusPrinter {
    every: Duration,
    last: Option<Instant>,
}

#[async_trait]
impl CycleObserver for StatusPrinter {
    async fn on_cycle(&mut self, cycle: &Cycle, status: &StatusHandle) -> AppResult<()> {
        for update in &cycle.updates {
            info!(
                fan = %update.fan,
                duty = %update.decision.duty,
                algorithm = %update.decision.algorithm,
                "duty updated"
            );
        }
        let now = Instant::now();
        if self.last.is_some_and(|last| now.duration_since(last) < self.every) {
            return Ok(());
        }
        self.last = Some(now);
        println!("{}", status.snapshot());
        Ok(())
    }
}

async fn cmd_run(config_path: &Path, dry_run: bool, log_interval: f64) -> AppResult<()> {
    let config = sf_config::load(config_path)?;
    let mut controller = ControllerBuilder::new(config).dry_run(dry_run).build()?;

    // Listen before setup so a signal during it still restores the hardware.
    let token = controller.stop_token();
    tokio::spawn(async move {
        match signals::wait_for_shutdown_signal().await {
            Ok(()) => {
                info!("shutdown signal received");
                token.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for shutdown signals"),
        }
    });
    controller.setup().await?;

    let every = Duration::try_from_secs_f64(log_interval.max(0.0)).unwrap_or(Duration::ZERO);
    let mut printer = StatusPrinter { every, last: None };
    controller.run(&mut printer).await
}
