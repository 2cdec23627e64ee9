use boundary_core::BoundaryService;
use serde_json::Value;
use tracing::info;

use crate::cli::ResolveArgs;
use crate::error::CliError;

pub async fn run(service: &BoundaryService, args: &ResolveArgs) -> Result<Value, CliError> {
    let query = args.query();
    let overrides = args.overrides()?;

    let result = service.resolve(&query, Some(overrides)).await?;
    info!(
        query = %query,
        provider = %result.source_provider_id,
        exact = result.is_exact(),
        "resolved boundary"
    );

    Ok(serde_json::to_value(result)?)
}
