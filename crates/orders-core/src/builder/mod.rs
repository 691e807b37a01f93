//! Builder pattern for constructing order stores.
//!
//! Composes an [`OrderStore`] from the configured storage backend using
//! factory functions, so the service binary decides which backends are
//! available and the configuration decides which one is used.

use crate::OrderStore;
use orders_config::Config;
use orders_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order store construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions available to the builder, keyed by implementation name.
pub struct StoreFactories<SF> {
	pub storage_factories: HashMap<String, SF>,
}

/// Builder for constructing an [`OrderStore`] with a pluggable backend.
pub struct OrderStoreBuilder {
	config: Config,
}

impl OrderStoreBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Creates the primary storage backend and wraps it in an order store.
	///
	/// Configured implementations other than the primary one are not
	/// instantiated, but each must name a known factory.
	pub fn build<SF>(self, factories: StoreFactories<SF>) -> Result<OrderStore, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		for name in self.config.storage.implementations.keys() {
			if !factories.storage_factories.contains_key(name) {
				return Err(BuilderError::Config(format!(
					"Unknown storage implementation '{}'",
					name
				)));
			}
		}

		let primary = &self.config.storage.primary;
		let config = self.config.storage.primary_config().ok_or_else(|| {
			BuilderError::MissingComponent(format!(
				"configuration for primary storage '{}'",
				primary
			))
		})?;
		let factory = factories
			.storage_factories
			.get(primary)
			.ok_or_else(|| BuilderError::MissingComponent(format!("storage '{}'", primary)))?;

		let backend = match factory(config) {
			Ok(implementation) => implementation,
			Err(e) => {
				tracing::error!(
					component = "storage",
					implementation = %primary,
					error = %e,
					"Failed to create storage implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create storage implementation '{}': {}",
					primary, e
				)));
			},
		};
		tracing::info!(component = "storage", implementation = %primary, "Loaded");

		Ok(OrderStore::new(Arc::new(StorageService::new(backend))))
	}
}
