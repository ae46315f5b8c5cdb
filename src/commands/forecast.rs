use crate::commands::print_json;
use crate::context::AppContext;
use crate::service::ForecastRequest;
use anyhow::{Context, Result};

pub fn run(app: &AppContext, request: &ForecastRequest) -> Result<()> {
    let response = app
        .service()
        .train_and_forecast(request)
        .with_context(|| format!("Forecast for {} failed", request.symbol))?;
    print_json(&response)
}
