//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each backend module provides a `Registry` struct implementing this trait,
/// declaring the name it is configured under and its factory function.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. "memory" for `storage.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory function for this implementation.
	fn factory() -> Self::Factory;
}
