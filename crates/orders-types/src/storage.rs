//! Key layout for orders in the key-value store.

use std::fmt;

/// Prefix shared by every order primary key.
pub const ORDER_KEY_PREFIX: &str = "order:";

/// Name of the set that indexes every order primary key.
pub const ORDER_INDEX_KEY: &str = "orders";

/// Storage keys used by the order store.
///
/// This enum provides type safety for storage operations by replacing
/// hand-formatted strings with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Primary key of a single order, `order:<id>`.
	Order(u64),
	/// The set holding the primary key of every existing order.
	OrderIndex,
}

impl fmt::Display for StorageKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StorageKey::Order(id) => write!(f, "{}{}", ORDER_KEY_PREFIX, id),
			StorageKey::OrderIndex => f.write_str(ORDER_INDEX_KEY),
		}
	}
}

impl From<StorageKey> for String {
	fn from(key: StorageKey) -> Self {
		key.to_string()
	}
}
