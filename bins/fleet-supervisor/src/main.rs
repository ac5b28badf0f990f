use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use fleet_compliance::{ComplianceEvaluator, ComplianceReport};
use fleet_registry::RegistryConfig;
use fleet_supervisor::{api, ControlClient, ControlSurface, OperationOutcome, ServiceStatus, Supervisor};

const DEFAULT_CONTROL_URL: &str = "http://127.0.0.1:9400";

/// Fleet Supervisor - runs, monitors and restarts a fleet of local services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Control API base URL used by the client commands
    #[arg(long, global = true, default_value = DEFAULT_CONTROL_URL)]
    control: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the supervisor daemon
    Run {
        /// Registry file path (YAML)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Control API port (overrides the registry)
        #[arg(short, long)]
        port: Option<u16>,

        /// Run duration in seconds (for testing)
        #[arg(long)]
        run_duration: Option<u64>,
    },

    /// Validate a registry file and print its static compliance report
    Check {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show the status of one service or of the whole fleet
    Status {
        name: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Start a service
    Start {
        name: String,

        /// Start even if a CRITICAL compliance rule fails
        #[arg(long)]
        skip_compliance_check: bool,
    },

    /// Stop a service
    Stop { name: String },

    /// Restart a service
    Restart { name: String },

    /// Start every enabled auto-start service
    StartAll,

    /// Stop every service
    Shutdown,

    /// Evaluate compliance against the running fleet
    Compliance {
        name: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Reload the registry (from PATH, or the file the daemon was started with)
    Reload { path: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            run_duration,
        } => run(config, port, run_duration, cli.debug).await,
        Command::Check { config, json } => {
            initialize_logging(log_level(cli.debug, "warn"));
            check(config, json)
        }
        command => {
            initialize_logging(log_level(cli.debug, "warn"));
            control(ControlClient::new(cli.control), command).await
        }
    }
}

fn log_level(debug: bool, default: &str) -> &str {
    if debug {
        "debug"
    } else {
        default
    }
}

fn initialize_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

// =============================================================================
// Daemon
// =============================================================================

async fn run(config_path: PathBuf, port: Option<u16>, run_duration: Option<u64>, debug: bool) -> Result<()> {
    let mut config = RegistryConfig::load_from_file(&config_path)
        .with_context(|| format!("Failed to load registry {}", config_path.display()))?;
    initialize_logging(log_level(debug, &config.supervisor.log_level));

    info!("Starting Fleet Supervisor");
    info!("Registry file: {}", config_path.display());

    if let Some(port) = port {
        config.supervisor.control_port = port;
    }
    let addr = SocketAddr::from(([127, 0, 0, 1], config.supervisor.control_port));
    info!("Loaded registry with {} service(s)", config.services.len());

    let supervisor = Supervisor::new(config)?;
    for (name, result) in supervisor.start_all().await? {
        match result {
            Ok(status) => info!(service = %name, state = %status.state, "Started"),
            Err(e) => warn!(service = %name, "Not started: {}", e),
        }
    }

    let shutdown = shutdown_signal(run_duration)?;
    let control = ControlSurface::new(supervisor.clone(), Some(config_path));
    api::serve(addr, control, shutdown)
        .await
        .with_context(|| format!("Control API failed on {}", addr))?;

    info!("Shutting down fleet...");
    for (name, result) in supervisor.shutdown_all().await? {
        if let Err(e) = result {
            warn!(service = %name, "Stop failed: {}", e);
        }
    }
    info!("Fleet Supervisor shut down");

    Ok(())
}

/// Resolves on SIGTERM/SIGINT, or after `run_duration` seconds when given.
fn shutdown_signal(run_duration: Option<u64>) -> Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    Ok(async move {
        let deadline = async {
            match run_duration {
                Some(secs) => {
                    info!("Running for {} seconds (test mode)", secs);
                    tokio::time::sleep(Duration::from_secs(secs)).await
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM signal"),
            _ = sigint.recv() => info!("Received SIGINT signal"),
            _ = deadline => info!("Run duration reached"),
        }
    })
}

// =============================================================================
// Offline check
// =============================================================================

fn check(config_path: PathBuf, json: bool) -> Result<()> {
    let config = RegistryConfig::load_from_file(&config_path)
        .with_context(|| format!("Invalid registry {}", config_path.display()))?;

    let evaluator = ComplianceEvaluator::new(config.compliance.rules.clone());
    let report = evaluator.evaluate_all(&config.services, &Default::default());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Registry OK: {} service(s), {} rule(s)",
            config.services.len(),
            evaluator.rules().len()
        );
        print_report(&report);
    }
    Ok(())
}

// =============================================================================
// Control commands
// =============================================================================

async fn control(client: ControlClient, command: Command) -> Result<()> {
    match command {
        Command::Status { name: Some(name), json } => {
            let status = client.status(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_statuses(std::slice::from_ref(&status));
                if let Some(error) = &status.last_error {
                    println!("\nlast error: {}", error);
                }
            }
        }
        Command::Status { name: None, json } => {
            let statuses = client.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                print_statuses(&statuses);
            }
        }
        Command::Start {
            name,
            skip_compliance_check,
        } => report_outcomes(&[client.start(&name, skip_compliance_check).await?])?,
        Command::Stop { name } => report_outcomes(&[client.stop(&name).await?])?,
        Command::Restart { name } => report_outcomes(&[client.restart(&name).await?])?,
        Command::StartAll => report_outcomes(&client.start_all().await?)?,
        Command::Shutdown => report_outcomes(&client.shutdown().await?)?,
        Command::Compliance { name, json } => {
            let report = client.compliance(name.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Reload { path } => {
            let path = match path {
                Some(p) => Some(std::fs::canonicalize(&p).with_context(|| format!("No such file {}", p.display()))?),
                None => None,
            };
            let outcome = client.reload(path).await?;
            if !outcome.success {
                bail!("Reload rejected: {}", outcome.message);
            }
            println!("Reloaded: {}", outcome.message);
        }
        Command::Run { .. } | Command::Check { .. } => bail!("not a control command"),
    }
    Ok(())
}

fn report_outcomes(outcomes: &[OperationOutcome]) -> Result<()> {
    let mut failed = 0;
    for outcome in outcomes {
        if outcome.success {
            println!("{}", outcome.message);
        } else {
            failed += 1;
            eprintln!("{}: {}", outcome.service, outcome.message);
        }
    }
    if failed > 0 {
        bail!("{} of {} operation(s) failed", failed, outcomes.len());
    }
    Ok(())
}

fn print_statuses(statuses: &[ServiceStatus]) {
    println!(
        "{:<20} {:<9} {:>7} {:>6} {:>8} {:<9} {:>10}",
        "NAME", "STATE", "PID", "PORT", "RESTARTS", "HEALTH", "UPTIME"
    );
    for s in statuses {
        let pid = s.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
        let uptime = s
            .uptime()
            .map_or_else(|| "-".to_string(), |d| format!("{}s", d.num_seconds()));
        println!(
            "{:<20} {:<9} {:>7} {:>6} {:>8} {:<9} {:>10}",
            s.name, s.state, pid, s.target_port, s.restart_count, s.last_health_result, uptime
        );
    }
}

fn print_report(report: &ComplianceReport) {
    for entry in &report.services {
        let marker = if entry.is_blocked() { "BLOCKED" } else { "ok" };
        println!(
            "{:<20} score {:>5.1}%  {}/{} passed, {} skipped  {}",
            entry.service,
            entry.score * 100.0,
            entry.passed, entry.applicable, entry.skipped, marker
        );
        for finding in &entry.findings {
            println!("    [{}] {}: {}", finding.severity, finding.rule_id, finding.fix_hint);
        }
    }
    println!(
        "\nmean score {:.1}%, {} critical, {} warning",
        report.mean_score * 100.0,
        report.critical_services, report.warning_services
    );
}
