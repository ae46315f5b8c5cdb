use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub fn run(app: &AppContext, keywords: &str) -> Result<()> {
    let results = app.service().search_assets(keywords);
    info!("Search '{}' matched {} assets", keywords, results.len());
    print_json(&results)
}
