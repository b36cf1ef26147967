use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flow_e2e::assertion::{GeminiConfig, GeminiOracle, VisualOracle};
use flow_e2e::discovery::{AppEndpoint, DiscoveryListener, DEFAULT_DISCOVERY_PORT};
use flow_e2e::parser::{self, AssertionKind, Severity, ValidationReport};
use flow_e2e::report::FlowOutput;
use flow_e2e::runner::{ConsoleEventListener, EventEmitter, Orchestrator};
use flow_e2e::transport::{RetryPolicy, TransportClient};
use flow_e2e::{E2eError, RunConfig};

#[derive(Parser)]
#[command(name = "flow-e2e")]
#[command(version = "0.1.0")]
#[command(about = "E2E UI test orchestrator for Unity and Flutter apps", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario against a running app
    Run(RunArgs),

    /// Listen for app broadcasts
    Discover {
        /// Seconds to listen
        #[arg(short, long, default_value = "5", value_parser = parse_seconds)]
        timeout: Duration,

        /// Only accept this app
        #[arg(short, long)]
        app: Option<String>,

        /// Only accept this platform (unity, flutter)
        #[arg(short, long)]
        platform: Option<String>,

        /// Keep listening for the whole timeout and list every app found
        #[arg(long, default_value = "false")]
        all: bool,

        /// UDP discovery port
        #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
        port: u16,
    },

    /// Check a scenario file without running it
    Validate {
        /// Path to scenario YAML
        scenario: PathBuf,
    },

    /// Check whether an app's E2E server answers
    Health {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long)]
        port: u16,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to scenario YAML
    scenario: PathBuf,

    /// Overall test timeout in seconds (defaults to the scenario's meta.timeout)
    #[arg(short, long, value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Discovery timeout in seconds (defaults to 10% of --timeout)
    #[arg(long, value_parser = parse_seconds)]
    discovery_timeout: Option<Duration>,

    /// Seconds between status polls
    #[arg(long, value_parser = parse_seconds)]
    poll_interval: Option<Duration>,

    /// Override the scenario platform (unity, flutter)
    #[arg(short, long)]
    platform: Option<String>,

    /// Only accept broadcasts from this app
    #[arg(short, long)]
    app: Option<String>,

    /// Connect to this host directly instead of discovering
    #[arg(long, requires = "port")]
    host: Option<String>,

    /// E2E server port on --host
    #[arg(long, requires = "host")]
    port: Option<u16>,

    /// UDP discovery port
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// Max retries per request
    #[arg(long)]
    retry: Option<u32>,

    /// Retry preset (default, aggressive, none)
    #[arg(long, default_value = "default")]
    retry_profile: String,

    /// Skip the readiness probe before submitting
    #[arg(long, default_value = "false")]
    no_probe: bool,

    /// Write e2e_report_<app>.json
    #[arg(long, default_value = "false")]
    save_report: bool,

    /// Directory for reports
    #[arg(long, default_value = ".")]
    report_dir: PathBuf,

    /// Also write junit.xml
    #[arg(long, default_value = "false")]
    junit: bool,

    /// Save screenshots to this directory
    #[arg(long)]
    screenshots_dir: Option<PathBuf>,

    /// Minimum oracle confidence before a warning is attached
    #[arg(long)]
    confidence_threshold: Option<f64>,

    /// Gemini model for visual assertions
    #[arg(long)]
    model: Option<String>,

    /// Run without a visual oracle; screenshot assertions fail
    #[arg(long, default_value = "false")]
    no_oracle: bool,

    /// Pretty-print the JSON output
    #[arg(long, default_value = "false")]
    pretty: bool,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("'{}' is not a usable number of seconds: {}", value, e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Run(args) => run_command(args).await?,
        Commands::Discover {
            timeout,
            app,
            platform,
            all,
            port,
        } => discover_command(timeout, app, platform, all, port).await?,
        Commands::Validate { scenario } => validate_command(&scenario)?,
        Commands::Health { host, port } => health_command(&host, port).await?,
    };

    std::process::exit(code);
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

async fn run_command(args: RunArgs) -> anyhow::Result<i32> {
    let mut scenario = match parser::parse_scenario_file(&args.scenario) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            print_output(&FlowOutput::error(&format!("Invalid scenario: {}", e)), args.pretty)?;
            return Ok(1);
        }
    };

    if let Some(ref platform) = args.platform {
        scenario.meta.platform = platform.parse().map_err(anyhow::Error::msg)?;
    }

    let validation = parser::validate_scenario(&scenario);
    print_issues(&validation);
    if !validation.is_valid() {
        print_output(
            &FlowOutput::error(&format!("Invalid scenario: {}", validation)),
            args.pretty,
        )?;
        return Ok(1);
    }

    eprintln!(
        "{} Running {} ({})",
        "▶".green().bold(),
        scenario.name().cyan(),
        scenario.meta.platform
    );
    eprintln!(
        "  Steps: {}, Assertions: {}",
        scenario.total_steps(),
        scenario.total_assertions()
    );

    let config = build_config(&args)?;
    let needs_oracle = scenario
        .assertions
        .iter()
        .any(|a| a.kind == AssertionKind::Screenshot);
    let oracle = if needs_oracle && !args.no_oracle {
        build_oracle(args.model.as_deref())
    } else {
        None
    };

    let endpoint = match (args.host, args.port) {
        (Some(host), Some(port)) => Some(AppEndpoint::new(
            args.app.as_deref().unwrap_or(&scenario.meta.app),
            &host,
            port,
            Some(scenario.meta.platform.to_string()),
            None,
        )),
        _ => None,
    };

    let (events, receiver) = EventEmitter::new();
    let console = tokio::spawn(ConsoleEventListener::listen(receiver));

    let mut orchestrator = Orchestrator::new(scenario, config).with_events(events);
    if let Some(endpoint) = endpoint {
        orchestrator = orchestrator.with_endpoint(endpoint);
    }
    if let Some(oracle) = oracle {
        orchestrator = orchestrator.with_oracle(oracle);
    }

    let interrupt = Arc::new(tokio::sync::Notify::new());
    let handler = interrupt.clone();
    ctrlc::set_handler(move || handler.notify_one())
        .context("Failed to install Ctrl+C handler")?;

    let result = orchestrator
        .execute_until(async move { interrupt.notified().await })
        .await;

    // The orchestrator held the last emitter; the console drains and exits
    let _ = console.await;

    print_output(&FlowOutput::from_result(&result), args.pretty)?;
    Ok(result.exit_code())
}

fn build_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::default();

    match args.timeout {
        Some(timeout) => config = config.with_total_timeout(timeout, args.discovery_timeout),
        None => {
            if let Some(discovery) = args.discovery_timeout {
                config.discovery_timeout = discovery;
            }
        }
    }
    if let Some(interval) = args.poll_interval {
        config.poll_interval = interval;
    }

    let mut retry = RetryPolicy::preset(&args.retry_profile)
        .with_context(|| format!("Unknown retry profile '{}'", args.retry_profile))?;
    if let Some(max_retries) = args.retry {
        retry = retry.with_max_retries(max_retries);
    }
    config.retry_policy = retry;

    if let Some(threshold) = args.confidence_threshold {
        anyhow::ensure!(
            (0.0..=1.0).contains(&threshold),
            "--confidence-threshold must be between 0 and 1"
        );
        config.confidence_threshold = threshold;
    }

    config.discovery_port = args.discovery_port;
    config.readiness_probe = !args.no_probe;
    config.app_filter = args.app.clone();
    config.screenshot_dir = args.screenshots_dir.clone();
    config.report_dir = args.report_dir.clone();
    config.save_report = args.save_report;
    config.junit = args.junit;

    Ok(config)
}

/// Gemini oracle when an API key is available. Without one, screenshot assertions fail.
fn build_oracle(model: Option<&str>) -> Option<Arc<dyn VisualOracle>> {
    let config = match GeminiConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Visual oracle disabled: {}", e);
            eprintln!("  {} Visual oracle disabled: {}", "⚠".yellow(), e);
            return None;
        }
    };
    let config = match model {
        Some(model) => config.with_model(model),
        None => config,
    };

    match GeminiOracle::new(config) {
        Ok(oracle) => {
            log::info!("Visual oracle: {}", oracle.model());
            Some(Arc::new(oracle))
        }
        Err(e) => {
            log::warn!("Visual oracle disabled: {}", e);
            None
        }
    }
}

async fn discover_command(
    timeout: Duration,
    app: Option<String>,
    platform: Option<String>,
    all: bool,
    port: u16,
) -> anyhow::Result<i32> {
    let listener = DiscoveryListener::bind(port)
        .with_context(|| format!("Cannot listen on UDP port {}", port))?;
    let platform = platform.map(|p| p.to_lowercase());

    eprintln!(
        "{} Listening on UDP port {} for {:.0}s...",
        "🔍".to_string().blue(),
        port,
        timeout.as_secs_f64()
    );

    let endpoints = if all {
        listener
            .listen_all(timeout, app.as_deref())
            .await?
            .into_iter()
            .filter(|e| platform.is_none() || e.platform == platform)
            .collect()
    } else {
        match listener
            .listen(timeout, app.as_deref(), platform.as_deref())
            .await
        {
            Ok(endpoint) => vec![endpoint],
            Err(E2eError::DiscoveryTimeout { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        }
    };

    if endpoints.is_empty() {
        eprintln!("{} No apps found", "✗".red().bold());
        return Ok(1);
    }

    for endpoint in &endpoints {
        eprintln!("  {} {}", "✓".green(), endpoint.to_string().cyan());
    }
    println!("{}", serde_json::to_string_pretty(&endpoints)?);
    Ok(0)
}

fn validate_command(path: &std::path::Path) -> anyhow::Result<i32> {
    let scenario = match parser::parse_scenario_file(path) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return Ok(1);
        }
    };

    let report = parser::validate_scenario(&scenario);
    print_issues(&report);

    if report.is_valid() {
        eprintln!(
            "{} {}: {} ({} steps, {} assertions)",
            "✓".green().bold(),
            path.display(),
            report,
            scenario.total_steps(),
            scenario.total_assertions()
        );
        Ok(0)
    } else {
        eprintln!("{} {}: {}", "✗".red().bold(), path.display(), report);
        Ok(1)
    }
}

async fn health_command(host: &str, port: u16) -> anyhow::Result<i32> {
    let url = format!("http://{}:{}", host, port);
    let client = TransportClient::new(&url, RetryPolicy::none(), Duration::from_secs(5))
        .context("Failed to create HTTP client")?;

    if client.health_check().await {
        eprintln!("{} {} is reachable", "✓".green().bold(), url);
        Ok(0)
    } else {
        eprintln!("{} {} is not reachable", "✗".red().bold(), url);
        Ok(1)
    }
}

fn print_issues(report: &ValidationReport) {
    for issue in report.errors.iter().chain(report.warnings.iter()) {
        let label = match issue.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        eprintln!("  {} {}: {}", label, issue.path, issue.message);
    }
}

fn print_output(output: &FlowOutput, pretty: bool) -> anyhow::Result<()> {
    println!("{}", output.to_json(pretty)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_seconds("0").unwrap(), Duration::ZERO);
        assert!(parse_seconds("abc").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("1e30").is_err());
    }

    #[test]
    fn test_run_args_build_config() {
        let cli = Cli::try_parse_from([
            "flow-e2e",
            "run",
            "login.yaml",
            "--timeout",
            "60",
            "--retry-profile",
            "aggressive",
            "--retry",
            "2",
            "--host",
            "10.0.0.7",
            "--port",
            "51321",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };

        let config = build_config(&args).unwrap();
        assert_eq!(config.test_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.discovery_timeout, Duration::from_secs(6));
        assert_eq!(config.retry_policy.max_retries, 2);
        assert_eq!(args.host.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_huge_timeout_is_rejected_by_cli() {
        assert!(Cli::try_parse_from(["flow-e2e", "run", "a.yaml", "--timeout", "1e30"]).is_err());
        assert!(Cli::try_parse_from(["flow-e2e", "run", "a.yaml", "--host", "h"]).is_err());
    }
}
