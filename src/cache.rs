//! In-process TTL cache for idempotent reads.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::time::Instant;
// self
use crate::_prelude::*;

/// Horizon used when `now + ttl` overflows the clock.
const FAR_FUTURE: StdDuration = StdDuration::from_secs(100 * 365 * 24 * 60 * 60);

/// Counters describing cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
	/// Reads served from the cache.
	pub hits: u64,
	/// Reads that found nothing usable.
	pub misses: u64,
	/// Expired entries dropped on access or purge.
	pub evictions: u64,
	/// Entries currently held, expired or not.
	pub size: usize,
}
impl CacheStats {
	/// Fraction of reads served from the cache, `0.0` before the first read.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;

		if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
	}
}

#[derive(Debug)]
struct Entry<V> {
	value: V,
	expires_at: Instant,
}

/// String-keyed cache whose entries expire after a per-entry TTL.
///
/// Entries are visible while `now <= expiry` and dropped lazily on the read that finds them
/// stale. The lock is never held across an `.await`.
#[derive(Debug)]
pub struct TtlCache<V> {
	entries: Mutex<HashMap<String, Entry<V>>>,
	hits: AtomicU64,
	misses: AtomicU64,
	evictions: AtomicU64,
}
impl<V> TtlCache<V>
where
	V: Clone,
{
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
			evictions: AtomicU64::new(0),
		}
	}

	/// Returns the value for `key` if present and unexpired.
	pub fn get(&self, key: &str) -> Option<V> {
		let now = Instant::now();
		let mut entries = self.entries.lock();

		match entries.get(key) {
			Some(entry) if now <= entry.expires_at => {
				self.hits.fetch_add(1, Ordering::Relaxed);

				Some(entry.value.clone())
			},
			Some(_) => {
				entries.remove(key);
				self.evictions.fetch_add(1, Ordering::Relaxed);
				self.misses.fetch_add(1, Ordering::Relaxed);

				None
			},
			None => {
				self.misses.fetch_add(1, Ordering::Relaxed);

				None
			},
		}
	}

	/// Stores `value` under `key`, replacing any previous entry and its expiry.
	///
	/// A `ttl` past what the clock can represent is clamped to a far-future expiry.
	pub fn set(&self, key: impl Into<String>, value: V, ttl: StdDuration) {
		let expires_at = expiry_after(Instant::now(), ttl);

		self.entries.lock().insert(key.into(), Entry { value, expires_at });
	}

	/// Returns the cached value or computes, stores, and returns a fresh one.
	///
	/// Concurrent misses for the same key each run `compute`; failures are not cached.
	pub async fn get_or_compute<F, Fut, E>(
		&self,
		key: &str,
		compute: F,
		ttl: StdDuration,
	) -> Result<V, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V, E>>,
	{
		if let Some(value) = self.get(key) {
			return Ok(value);
		}

		let value = compute().await?;

		self.set(key, value.clone(), ttl);

		Ok(value)
	}

	/// Drops the entry for `key`, returning `true` if one existed.
	pub fn invalidate(&self, key: &str) -> bool {
		self.entries.lock().remove(key).is_some()
	}

	/// Drops every entry. Counters are kept.
	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	/// Drops every expired entry and returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let mut entries = self.entries.lock();
		let before = entries.len();

		entries.retain(|_, entry| now <= entry.expires_at);

		let purged = before - entries.len();

		self.evictions.fetch_add(purged as u64, Ordering::Relaxed);

		purged
	}

	/// Number of entries held, including ones that expired but were not read yet.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns `true` when no entries are held.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Snapshot of the counters.
	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			size: self.len(),
		}
	}
}
impl<V> Default for TtlCache<V>
where
	V: Clone,
{
	fn default() -> Self {
		Self::new()
	}
}

fn expiry_after(now: Instant, ttl: StdDuration) -> Instant {
	now.checked_add(ttl)
		.or_else(|| now.checked_add(FAR_FUTURE))
		.unwrap_or(now)
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn entries_expire_after_ttl() {
		let cache = TtlCache::new();

		cache.set("k", 1, StdDuration::from_secs(10));
		tokio::time::advance(StdDuration::from_secs(10)).await;

		assert_eq!(cache.get("k"), Some(1));

		tokio::time::advance(StdDuration::from_millis(1)).await;

		assert_eq!(cache.get("k"), None);
		assert!(cache.is_empty());
		assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, evictions: 1, size: 0 });
	}

	#[tokio::test(start_paused = true)]
	async fn zero_ttl_recomputes_once_time_moves() {
		let cache = TtlCache::new();
		let counter = AtomicUsize::new(0);
		let calls = &counter;
		let compute =
			move || async move { Ok::<_, Error>(calls.fetch_add(1, Ordering::SeqCst) + 1) };
		let first = cache
			.get_or_compute("k", compute, StdDuration::ZERO)
			.await
			.expect("First compute should succeed.");

		tokio::time::advance(StdDuration::from_millis(1)).await;

		let second = cache
			.get_or_compute("k", compute, StdDuration::ZERO)
			.await
			.expect("Second compute should succeed.");

		assert_eq!((first, second), (1, 2));
		assert_eq!(counter.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn hits_skip_compute_and_failures_are_not_cached() {
		let cache = TtlCache::new();
		let ttl = StdDuration::from_secs(60);
		let failed =
			cache.get_or_compute("k", || async { Err::<u32, _>(Error::Unauthenticated) }, ttl).await;

		assert!(failed.is_err());
		assert!(cache.is_empty());

		let value = cache
			.get_or_compute("k", || async { Ok::<_, Error>(7) }, ttl)
			.await
			.expect("Compute should succeed.");
		let cached = cache
			.get_or_compute("k", || async { Ok::<_, Error>(8) }, ttl)
			.await
			.expect("Cached value should be returned.");

		assert_eq!((value, cached), (7, 7));
		assert!(cache.stats().hit_rate() > 0.0);
	}

	#[tokio::test(start_paused = true)]
	async fn unbounded_ttl_is_clamped_instead_of_overflowing() {
		let cache = TtlCache::new();

		cache.set("k", 1, StdDuration::MAX);
		tokio::time::advance(StdDuration::from_secs(365 * 24 * 60 * 60)).await;

		assert_eq!(cache.get("k"), Some(1));
		assert!(expiry_after(Instant::now(), StdDuration::MAX) > Instant::now());
	}

	#[test]
	fn invalidate_and_clear_drop_entries() {
		let cache = TtlCache::new();

		cache.set("a", "x", StdDuration::from_secs(60));
		cache.set("b", "y", StdDuration::from_secs(60));

		assert!(cache.invalidate("a"));
		assert!(!cache.invalidate("a"));
		assert_eq!(cache.len(), 1);

		cache.clear();

		assert!(cache.is_empty());
		assert_eq!(CacheStats::default().hit_rate(), 0.0);
	}
}
