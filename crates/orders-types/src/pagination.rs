//! Pagination types for enumerating orders.

use serde::{Deserialize, Serialize};

use crate::Order;

/// A request for one page of orders.
///
/// `offset` is the store-native scan cursor returned by the previous page,
/// not a logical row offset. Start an iteration with `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindAllPage {
	/// Maximum number of index members to scan in this call.
	pub size: u64,
	/// Cursor to resume the scan from.
	pub offset: u64,
}

impl FindAllPage {
	/// Returns the first page of a new iteration.
	pub fn first(size: u64) -> Self {
		Self { size, offset: 0 }
	}

	/// Returns the page that continues after `result`, or `None` once the
	/// iteration is complete.
	pub fn next(&self, result: &FindResult) -> Option<Self> {
		if result.is_last() {
			None
		} else {
			Some(Self {
				size: self.size,
				offset: result.cursor,
			})
		}
	}
}

/// One page of orders and the cursor to resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResult {
	/// Orders in the order the scan returned their keys.
	pub orders: Vec<Order>,
	/// Cursor for the next call; `0` when the iteration is complete.
	pub cursor: u64,
}

impl FindResult {
	/// An empty, terminal result.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Whether this page ends the iteration.
	pub fn is_last(&self) -> bool {
		self.cursor == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_next_page_follows_cursor() {
		let page = FindAllPage::first(2);
		let result = FindResult {
			orders: Vec::new(),
			cursor: 2,
		};

		assert_eq!(page.next(&result), Some(FindAllPage { size: 2, offset: 2 }));
		assert_eq!(page.next(&FindResult::empty()), None);
	}
}
