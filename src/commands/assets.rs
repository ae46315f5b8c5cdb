use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;

pub fn run(app: &AppContext) -> Result<()> {
    print_json(app.service().assets())
}
