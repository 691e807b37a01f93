//! Key-value semantics shared by the storage backends.
//!
//! The memory backend keeps a [`Keyspace`] behind a lock; the file backend
//! loads one from its snapshot, mutates it and writes it back. Either way
//! the command semantics live here.

use crate::{Command, Reply, ScanPage, SetCondition, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Members examined per scan call when the caller passes a count of zero.
const DEFAULT_SCAN_COUNT: u64 = 10;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum Data {
	Value(Vec<u8>),
	Set(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
	data: Data,
	/// Expiry in Unix milliseconds; `None` never expires.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	expires_at: Option<u64>,
}

impl Entry {
	fn is_live(&self, now: u64) -> bool {
		self.expires_at.is_none_or(|at| now < at)
	}
}

/// Position of a set member in scan order.
///
/// 64-bit FNV-1a of the member. Scan cursors are positions in this space, so
/// the value must not change between releases or processes.
fn scan_position(member: &str) -> u64 {
	const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
	const PRIME: u64 = 0x0000_0100_0000_01b3;

	member.bytes().fold(OFFSET_BASIS, |hash, byte| {
		(hash ^ u64::from(byte)).wrapping_mul(PRIME)
	})
}

/// In-memory keyspace of values and sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Keyspace {
	entries: HashMap<String, Entry>,
	/// Bumped on every change; not persisted.
	#[serde(skip)]
	revision: u64,
}

impl Keyspace {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Changes whenever the keyspace is modified.
	pub(crate) fn revision(&self) -> u64 {
		self.revision
	}

	fn touch(&mut self) {
		self.revision = self.revision.wrapping_add(1);
	}

	fn live(&self, key: &str) -> Option<&Entry> {
		let now = now_millis();
		self.entries.get(key).filter(|entry| entry.is_live(now))
	}

	/// Drops the entry for `key` if it has expired so writes see it as absent.
	fn evict_expired(&mut self, key: &str) {
		let now = now_millis();
		if self.entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
			self.entries.remove(key);
			self.touch();
		}
	}

	pub(crate) fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		match self.live(key) {
			Some(Entry {
				data: Data::Value(value),
				..
			}) => Ok(value.clone()),
			Some(_) => Err(StorageError::WrongType(key.to_string())),
			None => Err(StorageError::NotFound),
		}
	}

	pub(crate) fn exists(&self, key: &str) -> bool {
		self.live(key).is_some()
	}

	pub(crate) fn set(
		&mut self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
		condition: SetCondition,
	) -> bool {
		self.evict_expired(key);
		let present = self.entries.contains_key(key);
		let allowed = match condition {
			SetCondition::Always => true,
			SetCondition::IfAbsent => !present,
			SetCondition::IfPresent => present,
		};

		if allowed {
			let expires_at = ttl.map(|ttl| {
				now_millis().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
			});
			self.entries.insert(
				key.to_string(),
				Entry {
					data: Data::Value(value),
					expires_at,
				},
			);
			self.touch();
		}
		allowed
	}

	pub(crate) fn delete(&mut self, key: &str) -> bool {
		self.evict_expired(key);
		let removed = self.entries.remove(key).is_some();
		if removed {
			self.touch();
		}
		removed
	}

	pub(crate) fn set_add(&mut self, key: &str, member: &str) -> Result<bool, StorageError> {
		self.evict_expired(key);
		let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
			data: Data::Set(BTreeSet::new()),
			expires_at: None,
		});

		let added = match &mut entry.data {
			Data::Set(members) => members.insert(member.to_string()),
			Data::Value(_) => return Err(StorageError::WrongType(key.to_string())),
		};
		if added {
			self.touch();
		}
		Ok(added)
	}

	pub(crate) fn set_remove(&mut self, key: &str, member: &str) -> Result<bool, StorageError> {
		self.evict_expired(key);
		let Some(entry) = self.entries.get_mut(key) else {
			return Ok(false);
		};

		match &mut entry.data {
			Data::Set(members) => {
				let removed = members.remove(member);
				// Empty sets do not exist.
				if members.is_empty() {
					self.entries.remove(key);
				}
				if removed {
					self.touch();
				}
				Ok(removed)
			},
			Data::Value(_) => Err(StorageError::WrongType(key.to_string())),
		}
	}

	pub(crate) fn set_scan(
		&self,
		key: &str,
		cursor: u64,
		pattern: &str,
		count: u64,
	) -> Result<ScanPage, StorageError> {
		let members = match self.live(key) {
			Some(Entry {
				data: Data::Set(members),
				..
			}) => members,
			Some(_) => return Err(StorageError::WrongType(key.to_string())),
			None => return Ok(ScanPage::default()),
		};

		let count = if count == 0 { DEFAULT_SCAN_COUNT } else { count };
		let count = usize::try_from(count).unwrap_or(usize::MAX);

		let mut remaining: Vec<(u64, &String)> = members
			.iter()
			.map(|member| (scan_position(member), member))
			.filter(|(position, _)| *position >= cursor)
			.collect();
		remaining.sort_unstable();

		// Members sharing a position are returned together so the next cursor
		// never falls between them.
		let mut end = remaining.len().min(count);
		if let Some(&(last, _)) = end.checked_sub(1).and_then(|i| remaining.get(i)) {
			while remaining.get(end).is_some_and(|(position, _)| *position == last) {
				end += 1;
			}
		}

		let cursor = match remaining.get(end) {
			// Positions are sorted, so the last returned one is below u64::MAX here.
			Some(_) => remaining[end - 1].0 + 1,
			None => 0,
		};

		Ok(ScanPage {
			members: remaining[..end]
				.iter()
				.map(|(_, member)| *member)
				.filter(|member| glob_match(pattern.as_bytes(), member.as_bytes()))
				.cloned()
				.collect(),
			cursor,
		})
	}

	pub(crate) fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
		keys.iter().map(|key| self.get(key).ok()).collect()
	}

	fn apply(&mut self, command: Command) -> Result<Reply, StorageError> {
		match command {
			Command::Set {
				key,
				value,
				ttl,
				condition,
			} => {
				let applied = self.set(&key, value, ttl, condition);
				Ok(match condition {
					SetCondition::Always => Reply::Ok,
					_ => Reply::Bool(applied),
				})
			},
			Command::Delete { key } => Ok(Reply::Count(u64::from(self.delete(&key)))),
			Command::SetAdd { key, member } => {
				self.set_add(&key, &member).map(|added| Reply::Count(u64::from(added)))
			},
			Command::SetRemove { key, member } => self
				.set_remove(&key, &member)
				.map(|removed| Reply::Count(u64::from(removed))),
		}
	}

	/// Applies every command or none of them.
	///
	/// Before each command the previous state of the key it touches is
	/// recorded; if a command fails, the recorded states are restored in
	/// reverse order.
	pub(crate) fn exec(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>, StorageError> {
		let mut undo: Vec<(String, Option<Entry>)> = Vec::with_capacity(commands.len());
		let mut replies = Vec::with_capacity(commands.len());

		for command in commands {
			let key = match &command {
				Command::Set { key, .. }
				| Command::Delete { key }
				| Command::SetAdd { key, .. }
				| Command::SetRemove { key, .. } => key.clone(),
			};
			undo.push((key.clone(), self.entries.get(&key).cloned()));

			match self.apply(command) {
				Ok(reply) => replies.push(reply),
				Err(e) => {
					for (key, previous) in undo.into_iter().rev() {
						match previous {
							Some(entry) => self.entries.insert(key, entry),
							None => self.entries.remove(&key),
						};
					}
					return Err(e);
				},
			}
		}

		Ok(replies)
	}

	/// Removes every expired entry and returns how many were removed.
	pub(crate) fn purge_expired(&mut self) -> usize {
		let now = now_millis();
		let before = self.entries.len();
		self.entries.retain(|_, entry| entry.is_live(now));
		let removed = before - self.entries.len();
		if removed > 0 {
			self.touch();
		}
		removed
	}
}

/// Matches `text` against a glob supporting `*`, `?` and `\` escapes.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
	let (mut p, mut t) = (0, 0);
	// Position of the last `*` in the pattern and the text index it matched up to.
	let mut backtrack: Option<(usize, usize)> = None;

	while t < text.len() {
		match pattern.get(p) {
			Some(b'*') => {
				backtrack = Some((p, t));
				p += 1;
				continue;
			},
			Some(b'?') => {
				p += 1;
				t += 1;
				continue;
			},
			Some(b'\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
				p += 2;
				t += 1;
				continue;
			},
			Some(&c) if c != b'\\' && c == text[t] => {
				p += 1;
				t += 1;
				continue;
			},
			_ => {},
		}

		match backtrack {
			Some((star, matched)) => {
				p = star + 1;
				t = matched + 1;
				backtrack = Some((star, matched + 1));
			},
			None => return false,
		}
	}

	pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
	use super::*;

	fn keyspace_with_set(members: &[&str]) -> Keyspace {
		let mut ks = Keyspace::new();
		for member in members {
			ks.set_add("s", member).unwrap();
		}
		ks
	}

	#[test]
	fn test_conditional_sets() {
		let mut ks = Keyspace::new();

		assert!(!ks.set("k", b"a".to_vec(), None, SetCondition::IfPresent));
		assert!(!ks.exists("k"));

		assert!(ks.set("k", b"a".to_vec(), None, SetCondition::IfAbsent));
		assert!(!ks.set("k", b"b".to_vec(), None, SetCondition::IfAbsent));
		assert_eq!(ks.get("k").unwrap(), b"a");

		assert!(ks.set("k", b"c".to_vec(), None, SetCondition::IfPresent));
		assert_eq!(ks.get("k").unwrap(), b"c");
	}

	#[test]
	fn test_wrong_type() {
		let mut ks = keyspace_with_set(&["a"]);
		ks.set("v", b"x".to_vec(), None, SetCondition::Always);

		assert!(matches!(ks.get("s"), Err(StorageError::WrongType(_))));
		assert!(matches!(ks.set_add("v", "m"), Err(StorageError::WrongType(_))));
		assert!(matches!(
			ks.set_scan("v", 0, "*", 10),
			Err(StorageError::WrongType(_))
		));
	}

	#[test]
	fn test_empty_set_is_removed() {
		let mut ks = keyspace_with_set(&["a"]);
		assert!(ks.set_remove("s", "a").unwrap());
		assert!(!ks.exists("s"));
		assert!(!ks.set_remove("s", "a").unwrap());
	}

	/// Follows the cursor to the end, running `between` after every page.
	fn scan_to_end(
		ks: &mut Keyspace,
		count: u64,
		mut between: impl FnMut(&mut Keyspace, &[String]),
	) -> Vec<String> {
		let mut seen = Vec::new();
		let mut cursor = 0;
		loop {
			let page = ks.set_scan("s", cursor, "*", count).unwrap();
			assert!(page.members.len() <= count as usize);
			between(ks, &page.members);
			seen.extend(page.members);
			cursor = page.cursor;
			if cursor == 0 {
				return seen;
			}
		}
	}

	#[test]
	fn test_scan_pages_through_every_member() {
		let mut ks = keyspace_with_set(&["e", "d", "c", "b", "a"]);

		let first = ks.set_scan("s", 0, "*", 2).unwrap();
		assert_eq!(first.members.len(), 2);
		assert_ne!(first.cursor, 0);

		let mut seen = scan_to_end(&mut ks, 2, |_, _| {});
		seen.sort();
		assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
	}

	#[test]
	fn test_scan_order_is_stable() {
		let ks = keyspace_with_set(&["order:1", "order:2", "order:3"]);
		let mut other = keyspace_with_set(&["order:3", "order:1"]);
		other.set_add("s", "order:2").unwrap();

		assert_eq!(
			ks.set_scan("s", 0, "*", 10).unwrap(),
			other.set_scan("s", 0, "*", 10).unwrap()
		);
		assert_eq!(scan_position(""), 0xcbf2_9ce4_8422_2325);
		assert_eq!(scan_position("a"), 0xaf63_dc4c_8601_ec8c);
	}

	#[test]
	fn test_scan_survives_removal_of_returned_members() {
		let ids: Vec<String> = (1..=20).map(|id| format!("order:{}", id)).collect();
		let mut ks = Keyspace::new();
		for id in &ids {
			ks.set_add("s", id).unwrap();
		}

		// Drop everything already returned before asking for the next page.
		let seen = scan_to_end(&mut ks, 3, |ks, page| {
			for member in page {
				ks.set_remove("s", member).unwrap();
			}
		});

		let mut seen_sorted = seen.clone();
		seen_sorted.sort();
		let mut expected = ids.clone();
		expected.sort();
		assert_eq!(seen_sorted, expected);
		assert_eq!(seen.len(), ids.len());
	}

	#[test]
	fn test_scan_filters_by_pattern() {
		let ks = keyspace_with_set(&["order:1", "order:2", "other:3"]);
		let mut page = ks.set_scan("s", 0, "order:*", 10).unwrap();
		page.members.sort();
		assert_eq!(page.members, vec!["order:1", "order:2"]);
		assert_eq!(page.cursor, 0);
	}

	#[test]
	fn test_scan_missing_set_is_empty() {
		let ks = Keyspace::new();
		assert_eq!(ks.set_scan("s", 0, "*", 10).unwrap(), ScanPage::default());
	}

	#[test]
	fn test_scan_cursor_past_end_terminates() {
		let ks = keyspace_with_set(&["a"]);
		let page = ks.set_scan("s", u64::MAX, "*", 10).unwrap();
		assert!(page.members.is_empty());
		assert_eq!(page.cursor, 0);
	}

	#[test]
	fn test_multi_get_preserves_order() {
		let mut ks = keyspace_with_set(&["a"]);
		ks.set("x", b"1".to_vec(), None, SetCondition::Always);
		ks.set("y", b"2".to_vec(), None, SetCondition::Always);

		let keys = ["y", "missing", "x", "s"].map(String::from);
		assert_eq!(
			ks.multi_get(&keys),
			vec![Some(b"2".to_vec()), None, Some(b"1".to_vec()), None]
		);
	}

	#[test]
	fn test_exec_replies() {
		let mut ks = Keyspace::new();
		let replies = ks
			.exec(vec![
				Command::Set {
					key: "k".into(),
					value: b"v".to_vec(),
					ttl: None,
					condition: SetCondition::IfAbsent,
				},
				Command::SetAdd {
					key: "s".into(),
					member: "k".into(),
				},
				Command::Delete { key: "nope".into() },
			])
			.unwrap();

		assert_eq!(
			replies,
			vec![Reply::Bool(true), Reply::Count(1), Reply::Count(0)]
		);
	}

	#[test]
	fn test_exec_rolls_back_on_failure() {
		let mut ks = Keyspace::new();
		ks.set("v", b"x".to_vec(), None, SetCondition::Always);
		let before = ks.clone();

		let result = ks.exec(vec![
			Command::Set {
				key: "k".into(),
				value: b"v".to_vec(),
				ttl: None,
				condition: SetCondition::Always,
			},
			Command::Delete { key: "v".into() },
			Command::SetAdd {
				key: "k".into(),
				member: "m".into(),
			},
		]);

		assert!(matches!(result, Err(StorageError::WrongType(_))));
		assert_eq!(ks.entries, before.entries);
	}

	#[test]
	fn test_revision_tracks_changes_only() {
		let mut ks = keyspace_with_set(&["a"]);
		ks.set("k", b"v".to_vec(), None, SetCondition::Always);
		let revision = ks.revision();

		assert!(!ks.set("k", b"w".to_vec(), None, SetCondition::IfAbsent));
		assert!(!ks.set("x", b"w".to_vec(), None, SetCondition::IfPresent));
		assert!(!ks.delete("missing"));
		assert!(!ks.set_add("s", "a").unwrap());
		assert!(!ks.set_remove("s", "b").unwrap());
		assert_eq!(ks.purge_expired(), 0);
		assert_eq!(ks.revision(), revision);

		assert!(ks.set_add("s", "b").unwrap());
		assert_ne!(ks.revision(), revision);
	}

	#[test]
	fn test_huge_ttl_does_not_expire() {
		let mut ks = Keyspace::new();
		ks.set("k", b"v".to_vec(), Some(Duration::MAX), SetCondition::Always);
		ks.set(
			"j",
			b"v".to_vec(),
			Some(Duration::from_millis(u64::MAX) + Duration::from_secs(1)),
			SetCondition::Always,
		);

		assert!(ks.exists("k"));
		assert!(ks.exists("j"));
		assert_eq!(ks.purge_expired(), 0);
	}

	#[test]
	fn test_expired_entries_are_absent() {
		let mut ks = Keyspace::new();
		ks.set("k", b"v".to_vec(), Some(Duration::ZERO), SetCondition::Always);
		ks.set("keep", b"v".to_vec(), None, SetCondition::Always);

		assert!(!ks.exists("k"));
		assert!(matches!(ks.get("k"), Err(StorageError::NotFound)));
		assert!(ks.set("k", b"w".to_vec(), None, SetCondition::IfAbsent));

		ks.set("gone", b"v".to_vec(), Some(Duration::ZERO), SetCondition::Always);
		assert_eq!(ks.purge_expired(), 1);
		assert!(ks.exists("keep"));
	}

	#[test]
	fn test_glob_match() {
		assert!(glob_match(b"*", b""));
		assert!(glob_match(b"order:*", b"order:12"));
		assert!(!glob_match(b"order:*", b"orders"));
		assert!(glob_match(b"o?der:1", b"order:1"));
		assert!(glob_match(b"*:1*", b"order:15"));
		assert!(glob_match(b"a\\*b", b"a*b"));
		assert!(!glob_match(b"a\\*b", b"axb"));
		assert!(!glob_match(b"abc", b"ab"));
	}
}
