//! Cancellation and deadlines for store operations.

use crate::OrderStoreError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carries the cancellation signal and deadline for one store operation.
///
/// Every round trip to the key-value store runs under the context: it fails
/// with [`OrderStoreError::Cancelled`] as soon as the token is cancelled and
/// with [`OrderStoreError::DeadlineExceeded`] once the deadline passes.
/// Cloning a context shares its token.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
	cancel: CancellationToken,
	deadline: Option<Instant>,
}

impl OperationContext {
	/// A context that is never cancelled and has no deadline.
	pub fn background() -> Self {
		Self::default()
	}

	/// A context whose deadline is `timeout` from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self::default().deadline_in(timeout)
	}

	/// Sets the deadline to `timeout` from now, keeping an earlier deadline if one is set.
	pub fn deadline_in(mut self, timeout: Duration) -> Self {
		let deadline = Instant::now() + timeout;
		self.deadline = Some(match self.deadline {
			Some(existing) if existing < deadline => existing,
			_ => deadline,
		});
		self
	}

	/// Returns a context that is cancelled with this one but can also be
	/// cancelled on its own.
	pub fn child(&self) -> Self {
		Self {
			cancel: self.cancel.child_token(),
			deadline: self.deadline,
		}
	}

	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Fails if the context is already cancelled or past its deadline.
	pub(crate) fn check(&self) -> Result<(), OrderStoreError> {
		if self.cancel.is_cancelled() {
			return Err(OrderStoreError::Cancelled);
		}
		if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
			return Err(OrderStoreError::DeadlineExceeded);
		}
		Ok(())
	}

	/// Drives `fut` to completion unless the context is cancelled or expires first.
	pub(crate) async fn run<T, F>(&self, fut: F) -> Result<T, OrderStoreError>
	where
		F: Future<Output = T>,
	{
		self.check()?;

		let bounded = async {
			match self.deadline {
				Some(deadline) => tokio::time::timeout_at(deadline, fut)
					.await
					.map_err(|_| OrderStoreError::DeadlineExceeded),
				None => Ok(fut.await),
			}
		};

		tokio::select! {
			biased;
			() = self.cancel.cancelled() => Err(OrderStoreError::Cancelled),
			result = bounded => result,
		}
	}
}
