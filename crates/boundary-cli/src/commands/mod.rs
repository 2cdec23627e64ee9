mod config;
mod health;
mod resolve;

use std::path::Path;

use boundary_core::{BoundaryConfig, BoundaryEvent, BoundaryService};
use serde_json::Value;
use tracing::warn;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Config => config::run(&config),
        Command::Resolve(args) => {
            let service = start_service(cli, config)?;
            let outcome = resolve::run(&service, args).await;
            service.shutdown().await;
            outcome
        }
        Command::Health => {
            let service = start_service(cli, config)?;
            let outcome = health::run(&service).await;
            service.shutdown().await;
            outcome
        }
    }
}

/// Reads the optional partial config file and fills API keys from the environment.
pub fn load_config(path: Option<&Path>) -> Result<BoundaryConfig, CliError> {
    let mut config = match path {
        Some(path) => BoundaryConfig::load(path)?,
        None => BoundaryConfig::default(),
    };
    config.apply_env_api_keys();
    Ok(config)
}

fn start_service(cli: &Cli, config: BoundaryConfig) -> Result<BoundaryService, CliError> {
    let service = BoundaryService::new(config)?;
    if cli.events {
        // Subscription does not unsubscribe on drop.
        drop(service.subscribe(write_event));
    }
    Ok(service)
}

fn write_event(event: &BoundaryEvent) {
    match serde_json::to_string(event) {
        Ok(line) => eprintln!("{line}"),
        Err(error) => warn!(kind = event.kind(), error = %error, "failed to serialize event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_path_uses_defaults() {
        let config = load_config(None).expect("defaults");

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.queue.max_size, 1_000);
    }

    #[test]
    fn config_file_overrides_are_applied() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "queue": {{ "maxSize": 5 }} }}"#).expect("write config");

        let config = load_config(Some(file.path())).expect("valid file");

        assert_eq!(config.queue.max_size, 5);
        assert_eq!(config.queue.retry.max_attempts, 3);
    }

    #[test]
    fn unreadable_config_is_an_io_error() {
        let error = load_config(Some(Path::new("/nonexistent/boundary.json")))
            .expect_err("missing file");

        assert_eq!(error.exit_code(), 10);
    }
}
