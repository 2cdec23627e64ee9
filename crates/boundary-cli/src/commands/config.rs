use boundary_core::BoundaryConfig;
use serde_json::Value;

use crate::error::CliError;

pub fn run(config: &BoundaryConfig) -> Result<Value, CliError> {
    config.validate()?;
    Ok(serde_json::to_value(config)?)
}
