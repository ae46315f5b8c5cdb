use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;

pub fn run(app: &AppContext, symbol: &str, period: &str) -> Result<()> {
    print_json(&app.service().compute_indicators(symbol, period))
}
