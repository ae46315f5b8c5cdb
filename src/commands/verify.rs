use crate::commands::print_json;
use crate::context::AppContext;
use crate::verify::StoredPrediction;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

pub fn run(app: &AppContext, stored_path: &Path) -> Result<()> {
    let raw = fs::read_to_string(stored_path)
        .with_context(|| format!("Failed to read {}", stored_path.display()))?;
    let stored: StoredPrediction = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a stored prediction", stored_path.display()))?;
    info!("Verifying prediction {} for {}", stored.id, stored.symbol);

    let report = app.service().verify(stored);
    print_json(&report)
}
