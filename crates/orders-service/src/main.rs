//! Main entry point for the order store CLI.
//!
//! Loads the configuration, builds an order store on the configured storage
//! backend and runs one store operation per invocation. Failures map to
//! distinct exit codes so scripts can tell a missing order from a conflict
//! or a backend fault.

use clap::Parser;
use orders_config::Config;
use orders_core::OperationContext;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod factory_registry;

use commands::{CliError, Command, Runner};

/// Command-line arguments for the order store CLI.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();

	match run(args).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!(error = %e, "Command failed");
			eprintln!("error: {}", e);
			ExitCode::from(e.exit_code())
		},
	}
}

async fn run(args: Args) -> Result<(), CliError> {
	let config = Config::from_file(&args.config).await?;
	tracing::debug!("Loaded configuration [{}]", config.service.id);

	let store = factory_registry::build_store_from_config(&config).map_err(CliError::Setup)?;

	let shutdown = OperationContext::background();
	let token = shutdown.cancellation_token().clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("Interrupted, cancelling");
			token.cancel();
		}
	});

	let runner = Runner::new(store, config.service, shutdown);
	runner.run(args.command, &mut std::io::stdout().lock()).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_args_defaults() {
		let args = Args::try_parse_from(["orders", "get", "7"]).unwrap();

		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
		assert_eq!(args.command, Command::Get { id: 7 });
	}

	#[test]
	fn test_args_list_flags() {
		let args = Args::try_parse_from([
			"orders", "-c", "custom.toml", "-l", "debug", "list", "--size", "25", "--all",
		])
		.unwrap();

		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
		assert_eq!(
			args.command,
			Command::List {
				size: Some(25),
				cursor: 0,
				all: true,
			}
		);
	}

	#[test]
	fn test_args_reject_bad_id() {
		assert!(Args::try_parse_from(["orders", "delete", "abc"]).is_err());
		assert!(Args::try_parse_from(["orders", "list", "--cursor", "3", "--all"]).is_err());
	}

	#[tokio::test]
	async fn test_run_with_file_config() {
		let dir = TempDir::new().unwrap();
		let config_path = dir.path().join("config.toml");
		let db_path = dir.path().join("data").join("orders.db");
		std::fs::write(
			&config_path,
			format!(
				r#"
[service]
id = "orders-cli-test"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "{}"
sync_writes = false
"#,
				db_path.display()
			),
		)
		.unwrap();

		let args = Args::try_parse_from([
			"orders",
			"--config",
			config_path.to_str().unwrap(),
			"delete",
			"1",
		])
		.unwrap();
		let err = run(args).await.unwrap_err();
		assert_eq!(err.exit_code(), 3);
	}

	#[tokio::test]
	async fn test_run_missing_config() {
		let args = Args::try_parse_from(["orders", "--config", "/nonexistent/config.toml", "cleanup"])
			.unwrap();
		let err = run(args).await.unwrap_err();
		assert_eq!(err.exit_code(), 2);
	}
}
