//! File-backed storage implementation.
//!
//! The whole keyspace lives in a single snapshot file. Every mutation locks a
//! sibling `.lock` file, reloads the snapshot, applies the command and
//! replaces the snapshot through a temp file and a rename, so a batch either
//! lands completely or not at all, also across processes sharing the file.

use crate::keyspace::Keyspace;
use crate::{
	Command, Reply, ScanPage, SetCondition, StorageError, StorageFactory, StorageInterface,
	StorageRegistry,
};
use async_trait::async_trait;
use fs2::FileExt;
use orders_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STORAGE_PATH: &str = "./data/orders.db";

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size snapshot header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "ORDS"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Time of the write (u64, little-endian, Unix milliseconds)
/// - [14-63]: Reserved
#[derive(Debug, Clone)]
struct SnapshotHeader {
	version: u16,
	written_at: u64,
}

impl SnapshotHeader {
	const MAGIC: &'static [u8; 4] = b"ORDS";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new() -> Self {
		Self {
			version: Self::VERSION,
			written_at: crate::keyspace::now_millis(),
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.written_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("Snapshot too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Not an order store snapshot".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported snapshot version: {}",
				version
			)));
		}

		let mut written_at = [0u8; 8];
		written_at.copy_from_slice(&bytes[6..14]);

		Ok(Self {
			version,
			written_at: u64::from_le_bytes(written_at),
		})
	}
}

fn backend_error(context: &str, path: &Path, e: std::io::Error) -> StorageError {
	StorageError::Backend(format!("{} {}: {}", context, path.display(), e))
}

/// File-based storage implementation.
#[derive(Debug, Clone)]
pub struct FileStorage {
	/// Path of the snapshot file.
	path: PathBuf,
	/// Path of the lock file guarding the snapshot.
	lock_path: PathBuf,
	/// Whether to fsync the snapshot before it replaces the previous one.
	sync_writes: bool,
}

impl FileStorage {
	/// Creates a new FileStorage backed by the snapshot at `path`.
	pub fn new(path: PathBuf, sync_writes: bool) -> Self {
		let lock_path = path.with_extension("lock");
		Self {
			path,
			lock_path,
			sync_writes,
		}
	}

	fn open_lock(&self) -> Result<File, StorageError> {
		if let Some(parent) = self.lock_path.parent() {
			fs::create_dir_all(parent)
				.map_err(|e| backend_error("Failed to create directory", parent, e))?;
		}
		OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&self.lock_path)
			.map_err(|e| backend_error("Failed to open lock file", &self.lock_path, e))
	}

	fn load(&self) -> Result<Keyspace, StorageError> {
		let data = match fs::read(&self.path) {
			Ok(data) => data,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Keyspace::new()),
			Err(e) => return Err(backend_error("Failed to read snapshot", &self.path, e)),
		};

		let header = SnapshotHeader::deserialize(&data)?;
		tracing::trace!(
			path = %self.path.display(),
			written_at = header.written_at,
			"Loaded snapshot"
		);
		serde_json::from_slice(&data[SnapshotHeader::SIZE..])
			.map_err(|e| StorageError::Serialization(e.to_string()))
	}

	fn persist(&self, keyspace: &Keyspace) -> Result<(), StorageError> {
		let body =
			serde_json::to_vec(keyspace).map_err(|e| StorageError::Serialization(e.to_string()))?;

		let mut file_data = Vec::with_capacity(SnapshotHeader::SIZE + body.len());
		file_data.extend_from_slice(&SnapshotHeader::new().serialize());
		file_data.extend_from_slice(&body);

		// Write atomically by writing to temp file then renaming
		let temp_path = self.path.with_extension("tmp");
		let mut temp = File::create(&temp_path)
			.map_err(|e| backend_error("Failed to create", &temp_path, e))?;
		temp.write_all(&file_data)
			.map_err(|e| backend_error("Failed to write", &temp_path, e))?;
		if self.sync_writes {
			temp.sync_all()
				.map_err(|e| backend_error("Failed to sync", &temp_path, e))?;
		}
		drop(temp);

		fs::rename(&temp_path, &self.path)
			.map_err(|e| backend_error("Failed to replace snapshot", &self.path, e))
	}

	fn unlock(&self, lock: &File) {
		// Closing the handle releases the lock anyway.
		if let Err(e) = FileExt::unlock(lock) {
			tracing::warn!(path = %self.lock_path.display(), error = %e, "Failed to unlock");
		}
	}

	/// Runs `f` against the current snapshot under a shared lock.
	async fn read<T, F>(&self, f: F) -> Result<T, StorageError>
	where
		F: FnOnce(&Keyspace) -> Result<T, StorageError> + Send + 'static,
		T: Send + 'static,
	{
		let storage = self.clone();
		tokio::task::spawn_blocking(move || {
			let lock = storage.open_lock()?;
			lock.lock_shared()
				.map_err(|e| backend_error("Failed to lock", &storage.lock_path, e))?;
			let result = storage.load().and_then(|keyspace| f(&keyspace));
			storage.unlock(&lock);
			result
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
	}

	/// Runs `f` against the current snapshot under an exclusive lock and
	/// persists the result if `f` succeeds and changed anything.
	async fn write<T, F>(&self, f: F) -> Result<T, StorageError>
	where
		F: FnOnce(&mut Keyspace) -> Result<T, StorageError> + Send + 'static,
		T: Send + 'static,
	{
		let storage = self.clone();
		tokio::task::spawn_blocking(move || {
			let lock = storage.open_lock()?;
			lock.lock_exclusive()
				.map_err(|e| backend_error("Failed to lock", &storage.lock_path, e))?;
			let result = storage.load().and_then(|mut keyspace| {
				let revision = keyspace.revision();
				let value = f(&mut keyspace)?;
				if keyspace.revision() != revision {
					storage.persist(&keyspace)?;
				}
				Ok(value)
			});
			storage.unlock(&lock);
			result
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let key = key.to_string();
		self.read(move |ks| ks.get(&key)).await
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let key = key.to_string();
		self.write(move |ks| {
			ks.set(&key, value, ttl, SetCondition::Always);
			Ok(())
		})
		.await
	}

	async fn set_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		let key = key.to_string();
		self.write(move |ks| Ok(ks.set(&key, value, ttl, SetCondition::IfAbsent)))
			.await
	}

	async fn set_if_present(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		let key = key.to_string();
		self.write(move |ks| Ok(ks.set(&key, value, ttl, SetCondition::IfPresent)))
			.await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let key = key.to_string();
		self.write(move |ks| {
			if ks.delete(&key) {
				Ok(())
			} else {
				Err(StorageError::NotFound)
			}
		})
		.await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let key = key.to_string();
		self.read(move |ks| Ok(ks.exists(&key))).await
	}

	async fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError> {
		let (key, member) = (key.to_string(), member.to_string());
		self.write(move |ks| ks.set_add(&key, &member)).await
	}

	async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError> {
		let (key, member) = (key.to_string(), member.to_string());
		self.write(move |ks| ks.set_remove(&key, &member)).await
	}

	async fn set_scan(
		&self,
		key: &str,
		cursor: u64,
		pattern: &str,
		count: u64,
	) -> Result<ScanPage, StorageError> {
		let (key, pattern) = (key.to_string(), pattern.to_string());
		self.read(move |ks| ks.set_scan(&key, cursor, &pattern, count))
			.await
	}

	async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
		let keys = keys.to_vec();
		self.read(move |ks| Ok(ks.multi_get(&keys))).await
	}

	async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StorageError> {
		self.write(move |ks| ks.exec(commands)).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let removed = self.write(|ks| Ok(ks.purge_expired())).await?;
		if removed > 0 {
			tracing::debug!(removed, path = %self.path.display(), "Purged expired keys");
		}
		Ok(removed)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("storage_path", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(path) if path.trim().is_empty() => {
							Err("storage_path cannot be empty".to_string())
						},
						_ => Ok(()),
					}
				}),
				Field::new("sync_writes", FieldType::Boolean),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Snapshot file (default: "./data/orders.db")
/// - `sync_writes`: fsync each snapshot before replacing the old one (default: true)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_STORAGE_PATH);
	let sync_writes = config
		.get("sync_writes")
		.and_then(|v| v.as_bool())
		.unwrap_or(true);

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		sync_writes,
	)))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
