//! Client-side command batches.

use crate::{Command, Reply, SetCondition, StorageError, StorageInterface};
use std::time::Duration;

/// A batch of commands that is applied all-or-nothing on commit.
///
/// Commands are queued locally and nothing reaches the backend until
/// [`Transaction::commit`]. Dropping or discarding a transaction has no
/// effect on the store.
#[must_use = "a transaction does nothing unless committed"]
pub struct Transaction<'a> {
	backend: &'a dyn StorageInterface,
	commands: Vec<Command>,
}

impl<'a> Transaction<'a> {
	pub(crate) fn new(backend: &'a dyn StorageInterface) -> Self {
		Self {
			backend,
			commands: Vec::new(),
		}
	}

	fn push(&mut self, command: Command) -> &mut Self {
		self.commands.push(command);
		self
	}

	/// Queues a write that only applies if the key does not exist.
	pub fn set_if_absent(
		&mut self,
		key: impl Into<String>,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> &mut Self {
		self.push(Command::Set {
			key: key.into(),
			value,
			ttl,
			condition: SetCondition::IfAbsent,
		})
	}

	pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
		self.push(Command::Delete { key: key.into() })
	}

	pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
		self.push(Command::SetAdd {
			key: key.into(),
			member: member.into(),
		})
	}

	pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
		self.push(Command::SetRemove {
			key: key.into(),
			member: member.into(),
		})
	}

	/// Sends the batch to the backend. Replies are in the order commands were queued.
	pub async fn commit(self) -> Result<Vec<Reply>, StorageError> {
		if self.commands.is_empty() {
			return Ok(Vec::new());
		}
		tracing::trace!(commands = self.commands.len(), "EXEC");
		self.backend.exec(self.commands).await
	}

	/// Drops the queued commands without sending them.
	pub fn discard(self) {
		tracing::trace!(commands = self.commands.len(), "DISCARD");
	}
}
