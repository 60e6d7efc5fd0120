use crate::infra::build_reminder_api;
use crate::server;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use vehicle_reminders::config::AppConfig;
use vehicle_reminders::error::AppError;
use vehicle_reminders::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "Vehicle Document Reminders",
    about = "Scan vehicle documents for upcoming expiries and notify their owners",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run a single reminder scan and print the report as JSON
    Scan(ScanArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ScanArgs {
    /// Evaluate milestones as of this RFC 3339 instant instead of now
    #[arg(long)]
    pub(crate) now: Option<DateTime<Utc>>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Scan(args) => run_scan(args).await,
    }
}

async fn run_scan(args: ScanArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let api = build_reminder_api(&config)?;
    let report = api
        .scanner
        .scan(args.now.unwrap_or_else(Utc::now))
        .await?;

    let rendered = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}
