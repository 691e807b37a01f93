//! The order store.

use crate::{OperationContext, OrderStoreError};
use orders_storage::{Reply, StorageError, StorageService};
use orders_types::{FindAllPage, FindResult, Order, StorageKey};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Persists orders in a key-value store.
///
/// The store keeps no state of its own: consistency between primary keys and
/// the index set is delegated to the backend's transactions, and the handle
/// can be shared freely between tasks. No operation retries internally.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

fn decode(key: &str, value: &[u8]) -> Result<Order, OrderStoreError> {
	serde_json::from_slice(value).map_err(|source| OrderStoreError::Decoding {
		key: key.to_string(),
		source,
	})
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// The storage handle this store runs on.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Creates an order.
	///
	/// The primary key is created only if absent and added to the index in
	/// the same transaction. Fails with [`OrderStoreError::InsertFailed`] if
	/// an order with the same ID already exists; the stored order is left
	/// unchanged in that case.
	#[instrument(skip(self, ctx, order), fields(order_id = order.order_id))]
	pub async fn insert(&self, ctx: &OperationContext, order: &Order) -> Result<(), OrderStoreError> {
		if order.order_id == 0 {
			return Err(OrderStoreError::InvalidOrderId);
		}

		let data = serde_json::to_vec(order).map_err(OrderStoreError::Encoding)?;
		let key = order.storage_key().to_string();

		let mut transaction = self.storage.transaction();
		transaction
			.set_if_absent(key.as_str(), data, None)
			.set_add(StorageKey::OrderIndex, key.as_str());

		if let Err(e) = ctx.check() {
			transaction.discard();
			return Err(e);
		}

		let replies = ctx
			.run(transaction.commit())
			.await?
			.map_err(OrderStoreError::Transaction)?;

		// A rejected create still re-adds an existing member to the index, which is a no-op.
		if !replies.first().is_some_and(Reply::applied) {
			tracing::warn!(key = %key, "Order already exists");
			return Err(OrderStoreError::InsertFailed(order.order_id));
		}

		tracing::debug!(key = %key, "Inserted order");
		Ok(())
	}

	/// Fetches an order by ID.
	#[instrument(skip(self, ctx))]
	pub async fn find_by_id(&self, ctx: &OperationContext, id: u64) -> Result<Order, OrderStoreError> {
		let key = StorageKey::Order(id).to_string();

		let value = match ctx.run(self.storage.get(&key)).await? {
			Ok(value) => value,
			Err(StorageError::NotFound) => return Err(OrderStoreError::NotFound(id)),
			Err(source) => {
				return Err(OrderStoreError::Store {
					operation: "get",
					source,
				})
			},
		};

		decode(&key, &value)
	}

	/// Deletes an order and its index entry in one transaction.
	///
	/// Fails with [`OrderStoreError::NotFound`] if no order has this ID.
	#[instrument(skip(self, ctx))]
	pub async fn delete_by_id(&self, ctx: &OperationContext, id: u64) -> Result<(), OrderStoreError> {
		let key = StorageKey::Order(id).to_string();

		let mut transaction = self.storage.transaction();
		transaction
			.delete(key.as_str())
			.set_remove(StorageKey::OrderIndex, key.as_str());

		if let Err(e) = ctx.check() {
			transaction.discard();
			return Err(e);
		}

		let replies = ctx
			.run(transaction.commit())
			.await?
			.map_err(OrderStoreError::Transaction)?;

		if !replies.first().is_some_and(Reply::applied) {
			return Err(OrderStoreError::NotFound(id));
		}

		tracing::debug!(key = %key, "Deleted order");
		Ok(())
	}

	/// Replaces the stored value of an existing order.
	///
	/// The write only applies if the key exists, so a missing order fails
	/// with [`OrderStoreError::NotFound`] and is not created.
	#[instrument(skip(self, ctx, order), fields(order_id = order.order_id))]
	pub async fn update(&self, ctx: &OperationContext, order: &Order) -> Result<(), OrderStoreError> {
		let data = serde_json::to_vec(order).map_err(OrderStoreError::Encoding)?;
		let key = order.storage_key().to_string();

		let updated = ctx
			.run(self.storage.set_if_present(&key, data, None))
			.await?
			.map_err(|source| OrderStoreError::Store {
				operation: "update",
				source,
			})?;

		if !updated {
			return Err(OrderStoreError::NotFound(order.order_id));
		}

		tracing::debug!(key = %key, "Updated order");
		Ok(())
	}

	/// Returns one page of orders.
	///
	/// Scans up to `page.size` members of the index starting at the cursor
	/// `page.offset` and fetches their orders in one round trip, in the
	/// order the scan returned them. A page with no members ends the
	/// iteration with cursor `0`.
	///
	/// The scan is not a snapshot, but the cursor follows index members
	/// rather than positions. An order that exists for the whole iteration
	/// is returned exactly once; orders inserted or deleted while a caller is
	/// paging may or may not be returned.
	#[instrument(skip(self, ctx))]
	pub async fn find_all(
		&self,
		ctx: &OperationContext,
		page: FindAllPage,
	) -> Result<FindResult, OrderStoreError> {
		if page.size == 0 {
			return Ok(FindResult::empty());
		}

		let index = StorageKey::OrderIndex.to_string();
		let scan = ctx
			.run(self.storage.set_scan(&index, page.offset, "*", page.size))
			.await?
			.map_err(OrderStoreError::Scan)?;

		if scan.members.is_empty() {
			return Ok(FindResult::empty());
		}

		let values = ctx
			.run(self.storage.multi_get(&scan.members))
			.await?
			.map_err(OrderStoreError::Fetch)?;

		let orders = scan
			.members
			.iter()
			.zip(values)
			.map(|(key, value)| {
				let value =
					value.ok_or_else(|| OrderStoreError::DanglingIndexEntry(key.clone()))?;
				decode(key, &value)
			})
			.collect::<Result<Vec<_>, _>>()?;

		tracing::debug!(count = orders.len(), cursor = scan.cursor, "Scanned orders");
		Ok(FindResult {
			orders,
			cursor: scan.cursor,
		})
	}

	/// Pages through the whole index and returns every order once.
	///
	/// Orders are deduplicated by ID in case one is deleted and reinserted
	/// while paging.
	pub async fn scan_all(
		&self,
		ctx: &OperationContext,
		page_size: u64,
	) -> Result<Vec<Order>, OrderStoreError> {
		let mut seen = HashSet::new();
		let mut orders = Vec::new();
		let mut page = Some(FindAllPage::first(page_size));

		while let Some(current) = page {
			let result = self.find_all(ctx, current).await?;
			page = current.next(&result);
			orders.extend(
				result
					.orders
					.into_iter()
					.filter(|order| seen.insert(order.order_id)),
			);
		}

		Ok(orders)
	}
}
