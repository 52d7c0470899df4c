//! CLI entry point: recipe-driven backtesting, reporting, and historical
//! data import against exchange REST endpoints.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use crypto_backtest_engine::config::Config;

#[derive(Parser, Debug)]
#[command(name = "crypto-backtest-engine")]
#[command(about = "Recipe-driven crypto backtesting, paper trading, and live market ingestion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the application config file (exchange credentials, defaults, storage path)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and persist a historical candle range
    Import {
        symbol: String,
        timeframe: String,
        days: u32,
    },

    /// Ping, fetch server time, and read the authenticated account
    TestAuth { api_key: String, api_secret: String },

    /// Run one backtest and print the text report
    Backtest {
        recipe_json: String,
        candles_csv: String,

        /// Also write the JSON report to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Run one backtest and emit a report in the requested format only
    Report {
        recipe_json: String,
        candles_csv: String,

        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!("{}_{}.log", command_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("logging initialized, file: logs/{}", log_filename);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Import { .. } => "import",
        Commands::TestAuth { .. } => "test-auth",
        Commands::Backtest { .. } => "backtest",
        Commands::Report { .. } => "report",
    };
    setup_logging(cli.verbose, command_name)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    match cli.command {
        Commands::Import { symbol, timeframe, days } => commands::import::run(&symbol, &timeframe, days, &config),

        Commands::TestAuth { api_key, api_secret } => commands::test_auth::run(&api_key, &api_secret, &config),

        Commands::Backtest { recipe_json, candles_csv, json } => {
            let json_output = json.map(|p| p.to_string_lossy().to_string());
            commands::backtest::run(&recipe_json, &candles_csv, json_output.as_deref(), &config)
        }

        Commands::Report { recipe_json, candles_csv, format } => {
            commands::report::run(&recipe_json, &candles_csv, &format, &config)
        }
    }
}
