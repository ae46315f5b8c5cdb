use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub fn run(app: &AppContext) -> Result<()> {
    let report = app.service().movers();
    info!(
        "Movers: {} gainers, {} losers across {} quotes",
        report.gainers.len(),
        report.losers.len(),
        report.all.len()
    );
    print_json(&report)
}
