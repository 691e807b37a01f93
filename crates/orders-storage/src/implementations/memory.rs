//! In-memory storage backend.
//!
//! Useful for tests and local development. Nothing survives a restart.

use crate::keyspace::Keyspace;
use crate::{
	Command, Reply, ScanPage, SetCondition, StorageError, StorageFactory, StorageInterface,
	StorageRegistry,
};
use async_trait::async_trait;
use orders_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory storage implementation.
///
/// Every command takes the keyspace lock once, so single commands and
/// batches are atomic with respect to each other.
pub struct MemoryStorage {
	keyspace: Arc<RwLock<Keyspace>>,
}

impl MemoryStorage {
	/// Creates a new, empty MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			keyspace: Arc::new(RwLock::new(Keyspace::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.keyspace.read().await.get(key)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.keyspace
			.write()
			.await
			.set(key, value, ttl, SetCondition::Always);
		Ok(())
	}

	async fn set_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		Ok(self
			.keyspace
			.write()
			.await
			.set(key, value, ttl, SetCondition::IfAbsent))
	}

	async fn set_if_present(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		Ok(self
			.keyspace
			.write()
			.await
			.set(key, value, ttl, SetCondition::IfPresent))
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		if self.keyspace.write().await.delete(key) {
			Ok(())
		} else {
			Err(StorageError::NotFound)
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.keyspace.read().await.exists(key))
	}

	async fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError> {
		self.keyspace.write().await.set_add(key, member)
	}

	async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError> {
		self.keyspace.write().await.set_remove(key, member)
	}

	async fn set_scan(
		&self,
		key: &str,
		cursor: u64,
		pattern: &str,
		count: u64,
	) -> Result<ScanPage, StorageError> {
		self.keyspace
			.read()
			.await
			.set_scan(key, cursor, pattern, count)
	}

	async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
		Ok(self.keyspace.read().await.multi_get(keys))
	}

	async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StorageError> {
		self.keyspace.write().await.exec(commands)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(self.keyspace.write().await.purge_expired())
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// Memory storage takes no configuration
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		storage.set_bytes("k", b"value".to_vec(), None).await.unwrap();
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"value");
		assert!(storage.exists("k").await.unwrap());

		storage.delete("k").await.unwrap();
		assert!(!storage.exists("k").await.unwrap());
		assert!(matches!(
			storage.get_bytes("k").await,
			Err(StorageError::NotFound)
		));
		assert!(matches!(storage.delete("k").await, Err(StorageError::NotFound)));
	}

	#[tokio::test]
	async fn test_conditional_writes() {
		let storage = MemoryStorage::new();

		assert!(!storage.set_if_present("k", b"a".to_vec(), None).await.unwrap());
		assert!(!storage.exists("k").await.unwrap());

		assert!(storage.set_if_absent("k", b"a".to_vec(), None).await.unwrap());
		assert!(!storage.set_if_absent("k", b"b".to_vec(), None).await.unwrap());
		assert!(storage.set_if_present("k", b"c".to_vec(), None).await.unwrap());
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"c");
	}

	#[tokio::test]
	async fn test_set_membership_and_scan() {
		let storage = MemoryStorage::new();

		assert!(storage.set_add("s", "a").await.unwrap());
		assert!(!storage.set_add("s", "a").await.unwrap());
		assert!(storage.set_add("s", "b").await.unwrap());

		let page = storage.set_scan("s", 0, "*", 10).await.unwrap();
		assert_eq!(page.members, vec!["a", "b"]);
		assert_eq!(page.cursor, 0);

		assert!(storage.set_remove("s", "a").await.unwrap());
		assert!(!storage.set_remove("s", "a").await.unwrap());
	}

	#[tokio::test]
	async fn test_cleanup_expired() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("short", b"v".to_vec(), Some(Duration::from_millis(1)))
			.await
			.unwrap();
		storage.set_bytes("long", b"v".to_vec(), None).await.unwrap();

		tokio::time::sleep(Duration::from_millis(5)).await;

		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert!(storage.exists("long").await.unwrap());
	}

	#[test]
	fn test_factory_rejects_unknown_fields() {
		let config: toml::Value = toml::from_str("storage_path = \"x\"").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));

		let empty = toml::Value::Table(toml::map::Map::new());
		assert!(create_storage(&empty).is_ok());
	}
}
