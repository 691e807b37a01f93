//! Common types for the order store workspace.
//!
//! This crate defines the order entity, the key layout used to persist it in
//! the key-value store, pagination types, and the configuration validation
//! helpers shared by every storage backend.

/// Order entity and line items.
pub mod order;
/// Pagination request and result types for enumerating orders.
pub mod pagination;
/// Self-registering implementation registry.
pub mod registry;
/// Key layout for orders and the order index set.
pub mod storage;
/// Configuration validation types for backend configuration tables.
pub mod validation;

pub use order::*;
pub use pagination::*;
pub use registry::*;
pub use storage::*;
pub use validation::*;
