use boundary_core::BoundaryService;
use serde_json::Value;

use crate::error::CliError;

pub async fn run(service: &BoundaryService) -> Result<Value, CliError> {
    Ok(serde_json::to_value(service.health().await)?)
}
