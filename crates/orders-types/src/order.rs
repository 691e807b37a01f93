//! Order entity persisted by the order store.
//!
//! Apart from `order_id`, every field is opaque to the store: it is carried
//! through the JSON blob and never inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StorageKey;

/// A customer order.
///
/// The order is serialized as a field-named JSON object, so stored blobs stay
/// readable when fields are reordered or new optional fields are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Unique, non-zero identifier. Immutable once the order is inserted.
	pub order_id: u64,
	/// Customer that placed the order.
	pub customer_id: Uuid,
	/// Items included in the order.
	#[serde(default)]
	pub line_items: Vec<LineItem>,
	/// When the order was placed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<DateTime<Utc>>,
	/// When the order left the warehouse.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shipped_at: Option<DateTime<Utc>>,
	/// When the order was delivered.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
}

/// A single item within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
	pub item_id: Uuid,
	pub quantity: u32,
	/// Unit price in minor currency units.
	pub price: u64,
}

impl Order {
	/// Creates an empty order for the given customer.
	pub fn new(order_id: u64, customer_id: Uuid) -> Self {
		Self {
			order_id,
			customer_id,
			line_items: Vec::new(),
			created_at: None,
			shipped_at: None,
			completed_at: None,
		}
	}

	/// Returns the primary key this order is stored under.
	pub fn storage_key(&self) -> StorageKey {
		StorageKey::Order(self.order_id)
	}
}
