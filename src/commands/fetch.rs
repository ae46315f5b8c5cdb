use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub fn run(app: &AppContext, symbol: &str, period: &str) -> Result<()> {
    let response = app.service().fetch_series(symbol, period);
    info!("Loaded {} rows for {} ({})", response.data.len(), symbol, period);
    print_json(&response)
}
