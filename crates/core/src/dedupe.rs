//! Dedupe keys and the bounded seen-message set.

use std::collections::{HashSet, VecDeque};

/// Capacity of the seen-message set.
pub const SEEN_CAPACITY: usize = 100;

/// Identity of a transcript line: author, text and timestamp bucket.
///
/// The bucket is only present when the line carries its own clock stamp, so
/// re-scanning an unstamped line always produces the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
	username: String,
	text: String,
	bucket: Option<u64>,
}

impl DedupeKey {
	pub fn new(username: &str, text: &str, stamp_secs: Option<u64>, window_ms: u64) -> Self {
		let window_secs = (window_ms / 1000).max(1);
		Self {
			username: username.to_lowercase(),
			text: text.trim().to_string(),
			bucket: stamp_secs.map(|secs| secs / window_secs),
		}
	}
}

/// FIFO set of recently seen keys, evicting the oldest past [`SEEN_CAPACITY`].
#[derive(Debug)]
pub struct SeenMessageSet {
	order: VecDeque<DedupeKey>,
	members: HashSet<DedupeKey>,
	capacity: usize,
}

impl Default for SeenMessageSet {
	fn default() -> Self {
		Self::with_capacity(SEEN_CAPACITY)
	}
}

impl SeenMessageSet {
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			order: VecDeque::with_capacity(capacity),
			members: HashSet::with_capacity(capacity),
			capacity,
		}
	}

	/// Inserts `key`, returning `false` if it was already present.
	pub fn insert(&mut self, key: DedupeKey) -> bool {
		if self.members.contains(&key) {
			return false;
		}
		if self.order.len() == self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.members.remove(&oldest);
			}
		}
		self.members.insert(key.clone());
		self.order.push_back(key);
		true
	}

	pub fn contains(&self, key: &DedupeKey) -> bool {
		self.members.contains(key)
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	pub fn clear(&mut self) {
		self.order.clear();
		self.members.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(n: usize) -> DedupeKey {
		DedupeKey::new("ada", &format!("message {n}"), None, 60_000)
	}

	#[test]
	fn duplicates_are_rejected() {
		let mut set = SeenMessageSet::default();
		assert!(set.insert(key(1)));
		assert!(!set.insert(key(1)));
		assert_eq!(set.len(), 1);
	}

	#[test]
	fn hundred_and_first_key_evicts_exactly_the_oldest() {
		let mut set = SeenMessageSet::default();
		for n in 0..SEEN_CAPACITY {
			assert!(set.insert(key(n)));
		}
		assert_eq!(set.len(), SEEN_CAPACITY);

		assert!(set.insert(key(SEEN_CAPACITY)));
		assert_eq!(set.len(), SEEN_CAPACITY);
		assert!(!set.contains(&key(0)));
		assert!(set.contains(&key(1)));
		assert!(set.contains(&key(SEEN_CAPACITY)));
	}

	#[test]
	fn same_line_within_window_shares_a_key() {
		// 12:00:05 and 12:00:40 fall in the same minute bucket.
		let a = DedupeKey::new("Ada", "hi", Some(43_205), 60_000);
		let b = DedupeKey::new("ada", "hi", Some(43_240), 60_000);
		let c = DedupeKey::new("ada", "hi", Some(43_265), 60_000);
		assert_eq!(a, b);
		assert_ne!(b, c);
	}
}
