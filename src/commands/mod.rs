pub mod assets;
pub mod correlation;
pub mod fetch;
pub mod forecast;
pub mod indicators;
pub mod movers;
pub mod search;
pub mod verify;

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{self, Write};

/// Pretty JSON on stdout; logs go to stderr.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value).context("Failed to write JSON output")?;
    writeln!(handle)?;
    Ok(())
}
