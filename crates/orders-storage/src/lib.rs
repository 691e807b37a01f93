//! Key-value storage for the order store.
//!
//! This crate defines the contract the order store expects from its
//! key-value collaborator: plain and conditional sets, deletes, a set type
//! with cursor-based scanning, bulk reads, and batched commands that commit
//! all-or-nothing. Backends implement [`StorageInterface`]; callers use them
//! through [`StorageService`].

use async_trait::async_trait;
use orders_types::{ConfigSchema, ImplementationRegistry};
use std::time::Duration;
use thiserror::Error;

mod keyspace;
mod transaction;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use transaction::Transaction;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested key is not found.
	#[error("Not found")]
	NotFound,
	/// A value command was used on a set key or the other way around.
	#[error("Operation against a key holding the wrong kind of value: {0}")]
	WrongType(String),
	/// Error that occurs during serialization/deserialization of backend data.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Precondition for a set command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
	/// Write unconditionally.
	Always,
	/// Write only if the key does not exist.
	IfAbsent,
	/// Write only if the key already exists.
	IfPresent,
}

/// A single command queued in a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Set {
		key: String,
		value: Vec<u8>,
		ttl: Option<Duration>,
		condition: SetCondition,
	},
	Delete {
		key: String,
	},
	SetAdd {
		key: String,
		member: String,
	},
	SetRemove {
		key: String,
		member: String,
	},
}

/// Result of one command within an executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
	/// Unconditional write succeeded.
	Ok,
	/// Whether a conditional write was applied.
	Bool(bool),
	/// Number of keys or members affected.
	Count(u64),
}

impl Reply {
	/// Interprets the reply as "did this command take effect".
	pub fn applied(&self) -> bool {
		match self {
			Reply::Ok => true,
			Reply::Bool(applied) => *applied,
			Reply::Count(n) => *n > 0,
		}
	}
}

/// One batch of set members returned by a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
	/// Members examined in this call that matched the pattern.
	pub members: Vec<String>,
	/// Cursor to resume from; `0` once the iteration is complete.
	pub cursor: u64,
}

/// Trait defining the low-level interface for key-value backends.
///
/// Any backend the order store runs on must implement these operations.
/// A key holds either a byte value or a set of strings; using a command of
/// the wrong kind yields [`StorageError::WrongType`].
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live, replacing any previous value.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Stores raw bytes only if the key does not exist. Returns whether the key was created.
	async fn set_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError>;

	/// Stores raw bytes only if the key already exists. Returns whether the key was updated.
	async fn set_if_present(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError>;

	/// Deletes the key, failing with [`StorageError::NotFound`] if it does not exist.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Adds a member to a set. Returns whether the member was newly added.
	async fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError>;

	/// Removes a member from a set. Returns whether the member was present.
	async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError>;

	/// Examines up to `count` members of a set starting at `cursor` and
	/// returns those matching the glob `pattern`.
	///
	/// The cursor is anchored to members rather than to a position in the
	/// set. A member present for the whole iteration is returned exactly
	/// once; members added or removed while a scan is in progress may or may
	/// not be returned.
	async fn set_scan(
		&self,
		key: &str,
		cursor: u64,
		pattern: &str,
		count: u64,
	) -> Result<ScanPage, StorageError>;

	/// Retrieves several values in one round trip, in the order of `keys`.
	/// Missing keys and set keys yield `None`.
	async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

	/// Applies a batch of commands atomically and returns one reply per command.
	///
	/// Either every command is applied or, if any command fails, none is.
	/// A conditional set that is not applied is not a failure.
	async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Client handle over a storage backend.
///
/// The service is safe to share between tasks; it holds no state of its own
/// beyond the backend.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Starts a batch of commands that commit together.
	pub fn transaction(&self) -> Transaction<'_> {
		Transaction::new(self.backend.as_ref())
	}

	pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		tracing::trace!(key, "GET");
		self.backend.get_bytes(key).await
	}

	pub async fn set(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		tracing::trace!(key, "SET");
		self.backend.set_bytes(key, value, ttl).await
	}

	pub async fn set_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		tracing::trace!(key, "SET NX");
		self.backend.set_if_absent(key, value, ttl).await
	}

	pub async fn set_if_present(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		tracing::trace!(key, "SET XX");
		self.backend.set_if_present(key, value, ttl).await
	}

	pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
		tracing::trace!(key, "DEL");
		self.backend.delete(key).await
	}

	pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.backend.exists(key).await
	}

	pub async fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError> {
		tracing::trace!(key, member, "SADD");
		self.backend.set_add(key, member).await
	}

	pub async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError> {
		tracing::trace!(key, member, "SREM");
		self.backend.set_remove(key, member).await
	}

	pub async fn set_scan(
		&self,
		key: &str,
		cursor: u64,
		pattern: &str,
		count: u64,
	) -> Result<ScanPage, StorageError> {
		tracing::trace!(key, cursor, pattern, count, "SSCAN");
		self.backend.set_scan(key, cursor, pattern, count).await
	}

	pub async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
		tracing::trace!(keys = keys.len(), "MGET");
		self.backend.multi_get(keys).await
	}

	/// Removes expired entries from storage.
	///
	/// Returns the number of entries that were removed.
	/// This is a no-op for backends that don't support TTL.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;

	#[test]
	fn test_all_implementations_registered() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["file", "memory"]);
	}

	#[test]
	fn test_reply_applied() {
		assert!(Reply::Ok.applied());
		assert!(Reply::Bool(true).applied());
		assert!(!Reply::Bool(false).applied());
		assert!(Reply::Count(1).applied());
		assert!(!Reply::Count(0).applied());
	}

	#[tokio::test]
	async fn test_service_delegates_to_backend() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));

		assert!(service.set_if_absent("k", b"v1".to_vec(), None).await.unwrap());
		assert!(!service.set_if_absent("k", b"v2".to_vec(), None).await.unwrap());
		assert_eq!(service.get("k").await.unwrap(), b"v1");

		service.delete("k").await.unwrap();
		assert!(matches!(
			service.delete("k").await,
			Err(StorageError::NotFound)
		));
	}
}
