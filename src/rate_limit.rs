//! Concurrency and cadence limiter for outbound platform calls.
//!
//! A caller is dispatched only once both constraints hold: a concurrency slot is free and at
//! least the minimum interval (`60s / requests_per_minute`) has passed since the previous
//! dispatch. Waiters are served in arrival order because both the slot semaphore and the
//! cadence mutex are fair.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use tokio::{
	sync::{Mutex as FairMutex, Semaphore},
	time::Instant,
};
// self
use crate::_prelude::*;

/// Bounds in-flight calls and dispatch cadence.
#[derive(Debug)]
pub struct RateLimiter {
	slots: Semaphore,
	last_dispatch: FairMutex<Option<Instant>>,
	min_interval: StdDuration,
	max_concurrent: usize,
	in_flight: AtomicUsize,
}
impl RateLimiter {
	/// Creates a limiter; `requests_per_minute == 0` disables the cadence constraint.
	pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
		let max_concurrent = max_concurrent.max(1);
		let min_interval = if requests_per_minute == 0 {
			StdDuration::ZERO
		} else {
			StdDuration::from_secs(60) / requests_per_minute
		};

		Self {
			slots: Semaphore::new(max_concurrent),
			last_dispatch: FairMutex::new(None),
			min_interval,
			max_concurrent,
			in_flight: AtomicUsize::new(0),
		}
	}

	/// Minimum gap between two dispatches.
	pub fn min_interval(&self) -> StdDuration {
		self.min_interval
	}

	/// Concurrency ceiling.
	pub fn max_concurrent(&self) -> usize {
		self.max_concurrent
	}

	/// Number of operations currently running.
	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::Acquire)
	}

	/// Stops admitting work; queued and future callers fail with [`Error::LimiterClosed`].
	pub fn close(&self) {
		self.slots.close();
	}

	/// Runs `op` once a slot is free and the cadence allows it.
	///
	/// The slot is released when `op` finishes, fails, or is dropped mid-flight.
	pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<Error>,
	{
		let _permit = self.slots.acquire().await.map_err(|_| Error::LimiterClosed)?;

		self.await_cadence().await;

		let _in_flight = InFlight::enter(&self.in_flight);

		op().await
	}

	async fn await_cadence(&self) {
		let mut last = self.last_dispatch.lock().await;

		if let Some(previous) = *last {
			tokio::time::sleep_until(previous + self.min_interval).await;
		}

		*last = Some(Instant::now());
	}
}

struct InFlight<'a>(&'a AtomicUsize);
impl<'a> InFlight<'a> {
	fn enter(counter: &'a AtomicUsize) -> Self {
		counter.fetch_add(1, Ordering::AcqRel);

		Self(counter)
	}
}
impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use futures::future;
	// self
	use super::*;

	#[test]
	fn interval_derives_from_requests_per_minute() {
		assert_eq!(RateLimiter::new(10, 100).min_interval(), StdDuration::from_millis(600));
		assert_eq!(RateLimiter::new(0, 0).min_interval(), StdDuration::ZERO);
		assert_eq!(RateLimiter::new(0, 0).max_concurrent(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn single_slot_runs_operations_strictly_in_order() {
		let limiter = Arc::new(RateLimiter::new(1, 60));
		let log = Arc::new(Mutex::new(Vec::new()));
		let ops = (0..3).map(|id| {
			let limiter = limiter.clone();
			let log = log.clone();

			async move {
				let limiter = &*limiter;
				let log = &*log;

				limiter
					.execute(move || async move {
						let started = Instant::now();

						assert_eq!(limiter.in_flight(), 1);

						tokio::time::sleep(StdDuration::from_millis(100)).await;
						log.lock().push((id, started, Instant::now()));

						Ok::<_, Error>(())
					})
					.await
			}
		});

		for result in future::join_all(ops).await {
			result.expect("Limited operation should succeed.");
		}

		let log = log.lock();

		assert_eq!(log.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2]);

		for pair in log.windows(2) {
			let (_, prev_start, prev_end) = pair[0];
			let (_, next_start, _) = pair[1];

			assert!(next_start >= prev_end);
			assert!(next_start - prev_start >= StdDuration::from_secs(1));
		}

		assert_eq!(limiter.in_flight(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn concurrency_ceiling_is_respected() {
		let limiter = Arc::new(RateLimiter::new(2, 0));
		let peak = Arc::new(AtomicUsize::new(0));
		let ops = (0..6).map(|_| {
			let limiter = limiter.clone();
			let peak = peak.clone();

			async move {
				let limiter = &*limiter;
				let peak = &*peak;

				limiter
					.execute(move || async move {
						peak.fetch_max(limiter.in_flight(), Ordering::SeqCst);
						tokio::time::sleep(StdDuration::from_millis(50)).await;

						Ok::<_, Error>(())
					})
					.await
			}
		});

		future::join_all(ops).await;

		assert_eq!(peak.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn failures_and_cancellation_release_the_slot() {
		let limiter = RateLimiter::new(1, 0);
		let failed = limiter.execute(|| async { Err::<(), _>(Error::Unauthenticated) }).await;

		assert!(matches!(failed, Err(Error::Unauthenticated)));
		assert_eq!(limiter.in_flight(), 0);

		let cancelled = tokio::time::timeout(
			StdDuration::from_millis(10),
			limiter.execute(|| async {
				future::pending::<()>().await;

				Ok::<_, Error>(())
			}),
		)
		.await;

		assert!(cancelled.is_err());
		assert_eq!(limiter.in_flight(), 0);

		limiter.execute(|| async { Ok::<_, Error>(()) }).await.expect("Slot should be free again.");
	}

	#[tokio::test]
	async fn closed_limiter_rejects_work() {
		let limiter = RateLimiter::new(1, 0);

		limiter.close();

		let result = limiter.execute(|| async { Ok::<_, Error>(()) }).await;

		assert!(matches!(result, Err(Error::LimiterClosed)));
	}
}
