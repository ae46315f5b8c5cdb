use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;

pub fn run(app: &AppContext) -> Result<()> {
    let report = app.service().correlation()?;
    print_json(&report)
}
