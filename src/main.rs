use anyhow::Result;
use clap::{Parser, Subcommand};
use forecast_engine::{
    commands::{assets, correlation, fetch, forecast, indicators, movers, search, verify},
    config::DEFAULT_HISTORY_PERIOD,
    context::AppContext,
    service::{ForecastRequest, ModelChoice},
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forecast-engine")]
#[command(about = "Market data, technical indicators and price forecasts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in asset catalog
    Assets,
    /// Search symbols by name or ticker (at least 2 characters)
    Search {
        keywords: String,
    },
    /// Fetch cleaned daily OHLCV history
    Fetch {
        symbol: String,
        /// History period such as 1mo, 6mo, 1y, 2y, 5y, max
        #[arg(long, default_value = DEFAULT_HISTORY_PERIOD)]
        period: String,
    },
    /// Train forecasters on recent history and forecast the next days
    Forecast {
        symbol: String,
        #[arg(long, value_enum, default_value_t = ModelChoice::Both)]
        model: ModelChoice,
        /// Training window as "<N>d" (for example 365d); other values use the full 5y history
        #[arg(long = "training-period", default_value = "5y")]
        training_period: String,
        /// Forecast horizon in days (7-30)
        #[arg(long, default_value_t = 30)]
        horizon: usize,
    },
    /// Compute RSI, MACD and Bollinger Bands
    Indicators {
        symbol: String,
        #[arg(long, default_value = DEFAULT_HISTORY_PERIOD)]
        period: String,
    },
    /// Score a stored prediction against realized prices
    Verify {
        /// JSON file holding the stored prediction
        #[arg(long = "file", value_name = "PATH")]
        file: PathBuf,
    },
    /// Biggest daily gainers and losers across the catalog
    Movers,
    /// Close-price correlation matrix across the catalog
    Correlation,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_context = AppContext::initialize()?;
    info!("Starting forecast engine. Forecasts are not financial advice.");

    match cli.command {
        Commands::Assets => assets::run(&app_context)?,
        Commands::Search { keywords } => search::run(&app_context, &keywords)?,
        Commands::Fetch { symbol, period } => fetch::run(&app_context, &symbol, &period)?,
        Commands::Forecast {
            symbol,
            model,
            training_period,
            horizon,
        } => {
            let request = ForecastRequest {
                symbol,
                model,
                training_period,
                horizon,
            };
            forecast::run(&app_context, &request)?;
        }
        Commands::Indicators { symbol, period } => {
            indicators::run(&app_context, &symbol, &period)?
        }
        Commands::Verify { file } => verify::run(&app_context, &file)?,
        Commands::Movers => movers::run(&app_context)?,
        Commands::Correlation => correlation::run(&app_context)?,
    }

    Ok(())
}
