//! Errors returned by the order store.

use orders_storage::StorageError;
use thiserror::Error;

/// Errors that can occur during order store operations.
///
/// Store-level failures keep the underlying [`StorageError`] as their source,
/// so callers can tell "not found" apart from transport faults and decide
/// whether to retry.
#[derive(Debug, Error)]
pub enum OrderStoreError {
	/// The order could not be serialized.
	#[error("failed to encode order: {0}")]
	Encoding(#[source] serde_json::Error),
	/// A stored blob could not be parsed back into an order.
	#[error("failed to decode order at '{key}': {source}")]
	Decoding {
		key: String,
		#[source]
		source: serde_json::Error,
	},
	/// No order exists with this ID.
	#[error("order {0} does not exist")]
	NotFound(u64),
	/// An order with this ID already exists.
	#[error("failed to insert order {0}: an order with this ID already exists")]
	InsertFailed(u64),
	/// Order IDs must be non-zero.
	#[error("order ID must be non-zero")]
	InvalidOrderId,
	/// The transaction could not be committed; none of its commands were applied.
	#[error("failed to execute transaction: {0}")]
	Transaction(#[source] StorageError),
	/// A single store command failed.
	#[error("failed to {operation} order: {source}")]
	Store {
		operation: &'static str,
		#[source]
		source: StorageError,
	},
	/// Scanning the order index failed.
	#[error("failed to get order IDs: {0}")]
	Scan(#[source] StorageError),
	/// Fetching the orders listed by the index failed.
	#[error("failed to get orders: {0}")]
	Fetch(#[source] StorageError),
	/// The index lists a key that has no stored order.
	#[error("order index references missing key '{0}'")]
	DanglingIndexEntry(String),
	/// The operation's context was cancelled.
	#[error("operation cancelled")]
	Cancelled,
	/// The operation's deadline passed before the store answered.
	#[error("operation deadline exceeded")]
	DeadlineExceeded,
}

impl OrderStoreError {
	/// Whether this error means the requested order does not exist.
	pub fn is_not_found(&self) -> bool {
		matches!(self, OrderStoreError::NotFound(_))
	}

	/// Whether this error means the order already exists.
	pub fn is_conflict(&self) -> bool {
		matches!(self, OrderStoreError::InsertFailed(_))
	}

	/// Whether the failure came from the store or its transport and may
	/// succeed if the caller tries again.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			OrderStoreError::Transaction(_)
				| OrderStoreError::Store { .. }
				| OrderStoreError::Scan(_)
				| OrderStoreError::Fetch(_)
				| OrderStoreError::DeadlineExceeded
		)
	}

	/// The underlying storage error, if any.
	pub fn storage_error(&self) -> Option<&StorageError> {
		match self {
			OrderStoreError::Transaction(e)
			| OrderStoreError::Store { source: e, .. }
			| OrderStoreError::Scan(e)
			| OrderStoreError::Fetch(e) => Some(e),
			_ => None,
		}
	}
}
