//! Registry of storage backends available to the binary.
//!
//! Backends register themselves through `orders_storage::get_all_implementations`;
//! the configuration then picks which of them are instantiated.

use orders_config::Config;
use orders_core::{OrderStore, OrderStoreBuilder, StoreFactories};
use orders_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry of implementation factories.
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in orders_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		registry
	})
}

/// Builds an order store for the configured storage backend.
pub fn build_store_from_config(config: &Config) -> Result<OrderStore, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let mut storage_factories = HashMap::new();
	for name in config.storage.implementations.keys() {
		let Some(factory) = registry.storage.get(name) else {
			let mut available: Vec<_> = registry.storage.keys().cloned().collect();
			available.sort();
			return Err(format!(
				"Unknown storage implementation '{}'. Available: [{}]",
				name,
				available.join(", ")
			)
			.into());
		};
		storage_factories.insert(name.clone(), *factory);
	}

	let builder = OrderStoreBuilder::new(config.clone());
	Ok(builder.build(StoreFactories { storage_factories })?)
}
