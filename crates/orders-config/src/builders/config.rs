//! Configuration builder for tests and local tooling.

use crate::{Config, ServiceConfig, StorageConfig};
use std::collections::HashMap;

/// Builds a [`Config`] with defaults suitable for tests: an in-memory
/// backend and a short operation deadline.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	operation_timeout_ms: u64,
	default_page_size: u64,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);

		Self {
			service_id: "orders-test".to_string(),
			operation_timeout_ms: 1000,
			default_page_size: 10,
			storage_primary: "memory".to_string(),
			storage_implementations,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	pub fn operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.operation_timeout_ms = timeout_ms;
		self
	}

	pub fn default_page_size(mut self, size: u64) -> Self {
		self.default_page_size = size;
		self
	}

	/// Adds a storage implementation and makes it the primary one.
	pub fn storage(mut self, name: impl Into<String>, config: toml::Value) -> Self {
		let name = name.into();
		self.storage_implementations.insert(name.clone(), config);
		self.storage_primary = name;
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
				operation_timeout_ms: self.operation_timeout_ms,
				default_page_size: self.default_page_size,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
			},
		}
	}
}
