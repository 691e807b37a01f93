//! Order store: persistence of orders in a key-value store.
//!
//! Each order lives under its primary key `order:<id>` as a JSON blob, and
//! every primary key is also a member of the `orders` index set so that
//! orders can be enumerated without a "list all keys" primitive. Inserts and
//! deletes touch both structures inside one transaction; updates are a single
//! conditional write.

pub mod builder;
mod context;
mod error;
mod store;

pub use builder::{BuilderError, OrderStoreBuilder, StoreFactories};
pub use context::OperationContext;
pub use error::OrderStoreError;
pub use store::OrderStore;
