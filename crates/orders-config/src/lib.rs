//! Configuration for the order store service.
//!
//! Configuration is read from TOML. `${VAR}` and `${VAR:-default}`
//! references are resolved from the environment before parsing, and a file
//! may pull in other files with `include = ["storage.toml"]`. Each top-level
//! section must be unique across all included files.

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

#[cfg(feature = "testing")]
pub use builders::config::ConfigBuilder;

use orders_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest page size accepted for `default_page_size`.
pub const MAX_PAGE_SIZE: u64 = 10_000;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Settings for this service instance.
	pub service: ServiceConfig,
	/// Key-value storage backend selection.
	pub storage: StorageConfig,
}

/// Settings for this service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Identifier used in logs.
	pub id: String,
	/// Deadline applied to each store operation, in milliseconds.
	/// `0` disables the deadline. Defaults to 5000.
	#[serde(default = "default_operation_timeout_ms")]
	pub operation_timeout_ms: u64,
	/// Number of index members scanned per page when listing orders.
	#[serde(default = "default_page_size")]
	pub default_page_size: u64,
}

impl ServiceConfig {
	/// Returns the per-operation deadline, if any.
	pub fn operation_timeout(&self) -> Option<Duration> {
		(self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
	}
}

fn default_operation_timeout_ms() -> u64 {
	5000
}

fn default_page_size() -> u64 {
	10
}

/// Fields accepted in the `[service]` table.
pub struct ServiceConfigSchema;

impl ConfigSchema for ServiceConfigSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("id", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(id) if id.trim().is_empty() => Err("Service ID cannot be empty".to_string()),
					_ => Ok(()),
				}
			})],
			vec![
				Field::new(
					"operation_timeout_ms",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"default_page_size",
					FieldType::Integer {
						min: Some(1),
						max: Some(MAX_PAGE_SIZE as i64),
					},
				),
			],
		);

		schema.validate(config)
	}
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

impl StorageConfig {
	/// Returns the configuration table of the primary implementation.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let base_dir = path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path.display())))?;
		loader.load_config(file_name).await
	}

	/// Checks the storage section once the `[service]` table has passed its schema.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if self.storage.primary_config().is_none() {
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let raw: toml::Value = toml::from_str(&resolved)?;
		if let Some(service) = raw.get("service") {
			ServiceConfigSchema
				.validate(service)
				.map_err(|e| ConfigError::Validation(e.to_string()))?;
		}
		let config: Config = raw.try_into()?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[service]
id = "orders-test"

[storage]
primary = "memory"
[storage.implementations.memory]
"#;

	#[test]
	fn test_defaults() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.service.id, "orders-test");
		assert_eq!(config.service.operation_timeout_ms, 5000);
		assert_eq!(
			config.service.operation_timeout(),
			Some(Duration::from_secs(5))
		);
		assert_eq!(config.service.default_page_size, 10);
		assert!(config.storage.primary_config().is_some());
	}

	#[test]
	fn test_zero_timeout_disables_deadline() {
		let config: Config = MINIMAL
			.replace("id = \"orders-test\"", "id = \"x\"\noperation_timeout_ms = 0")
			.parse()
			.unwrap();
		assert_eq!(config.service.operation_timeout(), None);
	}

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("ORDERS_TEST_HOST", "localhost");
		std::env::set_var("ORDERS_TEST_PORT", "6379");

		let input = "host = \"${ORDERS_TEST_HOST}:${ORDERS_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:6379\"");

		std::env::remove_var("ORDERS_TEST_HOST");
		std::env::remove_var("ORDERS_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "path = \"${ORDERS_MISSING_PATH:-./data/orders.db}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "path = \"./data/orders.db\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${ORDERS_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("ORDERS_MISSING_VAR"));
	}

	#[test]
	fn test_config_with_env_vars() {
		std::env::set_var("ORDERS_TEST_SERVICE_ID", "from-env");

		let config_str = r#"
[service]
id = "${ORDERS_TEST_SERVICE_ID}"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "${ORDERS_TEST_STORAGE_PATH:-/tmp/orders.db}"
"#;

		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.service.id, "from-env");
		assert_eq!(
			config.storage.primary_config().unwrap()["storage_path"].as_str(),
			Some("/tmp/orders.db")
		);

		std::env::remove_var("ORDERS_TEST_SERVICE_ID");
	}

	#[test]
	fn test_primary_must_be_configured() {
		let config_str = r#"
[service]
id = "orders-test"

[storage]
primary = "file"
[storage.implementations.memory]
"#;
		let err = Config::from_str(config_str).unwrap_err();
		assert!(err
			.to_string()
			.contains("Primary storage 'file' not found in implementations"));
	}

	#[test]
	fn test_page_size_bounds() {
		let config_str = MINIMAL.replace(
			"id = \"orders-test\"",
			"id = \"orders-test\"\ndefault_page_size = 0",
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
		assert!(err.to_string().contains("default_page_size"));
		assert!(err.to_string().contains("less than minimum 1"));

		let config_str = MINIMAL.replace(
			"id = \"orders-test\"",
			&format!("id = \"orders-test\"\ndefault_page_size = {}", MAX_PAGE_SIZE + 1),
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("greater than maximum"));

		let config_str = MINIMAL.replace(
			"id = \"orders-test\"",
			&format!("id = \"orders-test\"\ndefault_page_size = {}", MAX_PAGE_SIZE),
		);
		let config = Config::from_str(&config_str).unwrap();
		assert_eq!(config.service.default_page_size, MAX_PAGE_SIZE);
	}

	#[test]
	fn test_negative_timeout_rejected() {
		let config_str = MINIMAL.replace(
			"id = \"orders-test\"",
			"id = \"orders-test\"\noperation_timeout_ms = -1",
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
		assert!(err.to_string().contains("operation_timeout_ms"));
	}

	#[test]
	fn test_unknown_service_field_rejected() {
		let config_str = MINIMAL.replace(
			"id = \"orders-test\"",
			"id = \"orders-test\"\npage_size = 5",
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("Unknown field: page_size"));
	}

	#[test]
	fn test_service_schema_types() {
		let table: toml::Value = toml::from_str("id = 7").unwrap();
		let err = ServiceConfigSchema.validate(&table).unwrap_err();
		assert!(matches!(err, ValidationError::TypeMismatch { ref field, .. } if field == "id"));

		let table: toml::Value = toml::from_str("operation_timeout_ms = 0").unwrap();
		let err = ServiceConfigSchema.validate(&table).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(ref f) if f == "id"));
	}

	#[test]
	fn test_empty_service_id_rejected() {
		let err = Config::from_str(&MINIMAL.replace("orders-test", " ")).unwrap_err();
		assert!(err.to_string().contains("Service ID cannot be empty"));
	}

	#[test]
	fn test_parse_error_is_reported() {
		let err = Config::from_str("[service\nid = 1").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}
}
