//! Application log retrieval and tailing for deployed runtime applications.
//!
//! [`LogsClient::tail`] returns a cold stream: nothing is requested until it is first polled,
//! each call starts a fresh cursor, and the stream only ends when it is dropped. Pages are
//! requested from the last timestamp seen (inclusive); overlap is filtered by a bounded dedup
//! window so an entry is yielded at most once while it stays inside the window.

// crates.io
use futures::{Stream, stream};
use serde_json::Value;
// self
use super::decode;
use crate::{
	_prelude::*,
	auth::epoch_millis,
	pipeline::{HttpPipeline, RequestOptions},
};

/// Delay between two polls of a tail stream.
pub const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(3);
/// Entries requested per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
/// Number of recent entries remembered for dedup.
pub const DEFAULT_DEDUP_WINDOW: usize = 1_000;

/// Single log line emitted by an application replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
	/// Emission time in epoch milliseconds.
	pub timestamp: i64,
	/// Log message.
	pub message: String,
	/// Level such as `INFO` or `ERROR`.
	#[serde(default)]
	pub log_level: Option<String>,
	/// Logger context (thread, logger name, replica) when present.
	#[serde(default)]
	pub context: Option<Value>,
}
impl LogEntry {
	fn dedup_key(&self) -> (i64, String) {
		(self.timestamp, self.message.clone())
	}
}

/// Coordinates of one deployed application spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogTarget {
	/// Organization identifier.
	pub organization_id: String,
	/// Environment identifier.
	pub environment_id: String,
	/// Deployment identifier.
	pub deployment_id: String,
	/// Deployment spec (version) identifier.
	pub spec_id: String,
}
impl LogTarget {
	/// Groups the four identifiers.
	pub fn new(
		organization_id: impl Into<String>,
		environment_id: impl Into<String>,
		deployment_id: impl Into<String>,
		spec_id: impl Into<String>,
	) -> Self {
		Self {
			organization_id: organization_id.into(),
			environment_id: environment_id.into(),
			deployment_id: deployment_id.into(),
			spec_id: spec_id.into(),
		}
	}

	fn path(&self) -> String {
		format!(
			"/amc/application-manager/api/v2/organizations/{}/environments/{}/deployments/{}/specs/{}/logs",
			self.organization_id, self.environment_id, self.deployment_id, self.spec_id
		)
	}
}

/// Polling knobs for [`LogsClient::tail`].
#[derive(Clone, Debug)]
pub struct TailOptions {
	/// Delay between polls.
	pub poll_interval: StdDuration,
	/// Page size per poll.
	pub limit: u32,
	/// First `startTime` in epoch milliseconds; defaults to the moment of the first poll.
	pub start_time: Option<i64>,
	/// Entries remembered for dedup; at least one.
	pub dedup_window: usize,
}
impl TailOptions {
	/// Sets the polling interval.
	pub fn poll_interval(mut self, interval: StdDuration) -> Self {
		self.poll_interval = interval;

		self
	}

	/// Sets the page size.
	pub fn limit(mut self, limit: u32) -> Self {
		self.limit = limit;

		self
	}

	/// Starts tailing from `start_time` instead of now.
	pub fn start_time(mut self, start_time: i64) -> Self {
		self.start_time = Some(start_time);

		self
	}

	/// Sets the dedup window size.
	pub fn dedup_window(mut self, size: usize) -> Self {
		self.dedup_window = size;

		self
	}
}
impl Default for TailOptions {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			limit: DEFAULT_PAGE_LIMIT,
			start_time: None,
			dedup_window: DEFAULT_DEDUP_WINDOW,
		}
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogPage {
	Bare(Vec<LogEntry>),
	Wrapped {
		#[serde(default)]
		data: Vec<LogEntry>,
	},
}

/// Runtime application logs client.
#[derive(Clone, Debug)]
pub struct LogsClient {
	pipeline: Arc<HttpPipeline>,
}
impl LogsClient {
	/// Wraps a shared pipeline.
	pub fn new(pipeline: Arc<HttpPipeline>) -> Self {
		Self { pipeline }
	}

	/// Fetches one ascending page of entries emitted at or after `start_time`.
	pub async fn fetch(
		&self,
		target: &LogTarget,
		start_time: i64,
		limit: u32,
	) -> Result<Vec<LogEntry>> {
		let options = RequestOptions::new()
			.query("startTime", start_time)
			.query("limit", limit)
			.query("descending", false);
		let value = self.pipeline.get(&target.path(), options).await?;

		if value.is_null() {
			return Ok(Vec::new());
		}

		Ok(match decode::<LogPage>(value)? {
			LogPage::Bare(entries) | LogPage::Wrapped { data: entries } => entries,
		})
	}

	/// Infinite stream of non-empty batches of new entries.
	///
	/// A failed poll is yielded as an error and the next poll happens after the usual interval.
	pub fn tail(
		&self,
		target: LogTarget,
		options: TailOptions,
	) -> impl Stream<Item = Result<Vec<LogEntry>>> + use<> {
		let state = TailState {
			client: self.clone(),
			target,
			cursor: options.start_time,
			window: DedupWindow::new(options.dedup_window),
			options,
			primed: false,
		};

		stream::unfold(state, |mut state| async move {
			loop {
				if state.primed {
					tokio::time::sleep(state.options.poll_interval).await;
				}

				state.primed = true;

				match state.next_batch().await {
					Ok(batch) if batch.is_empty() => continue,
					outcome => return Some((outcome, state)),
				}
			}
		})
	}
}

struct TailState {
	client: LogsClient,
	target: LogTarget,
	options: TailOptions,
	cursor: Option<i64>,
	window: DedupWindow,
	primed: bool,
}
impl TailState {
	async fn next_batch(&mut self) -> Result<Vec<LogEntry>> {
		let start = *self.cursor.get_or_insert_with(|| epoch_millis(OffsetDateTime::now_utc()));
		let limit = self.options.limit;
		let entries = self.client.fetch(&self.target, start, limit).await?;
		let page_len = entries.len();
		let latest = entries.iter().map(|entry| entry.timestamp).max();
		let window = &mut self.window;
		let fresh = entries
			.into_iter()
			.filter(|entry| window.insert(entry.dedup_key()))
			.collect::<Vec<_>>();

		self.cursor = Some(next_cursor(start, latest, page_len, limit));

		tracing::trace!(start, fresh = fresh.len(), "polled application logs");

		Ok(fresh)
	}
}

/// Start of the next page: the newest timestamp seen, inclusive.
///
/// A full page pinned to `start` would be refetched forever, so the cursor steps one millisecond
/// past it; entries at `start` beyond that page are skipped.
fn next_cursor(start: i64, latest: Option<i64>, page_len: usize, limit: u32) -> i64 {
	let latest = latest.map_or(start, |latest| latest.max(start));

	if latest == start && page_len > 0 && page_len >= limit as usize {
		tracing::warn!(
			start,
			limit,
			"log page is full at a single timestamp; skipping ahead one millisecond"
		);

		return start.saturating_add(1);
	}

	latest
}

/// FIFO set of recently yielded entries.
#[derive(Debug)]
struct DedupWindow {
	capacity: usize,
	order: VecDeque<(i64, String)>,
	seen: HashSet<(i64, String)>,
}
impl DedupWindow {
	fn new(capacity: usize) -> Self {
		Self { capacity: capacity.max(1), order: VecDeque::new(), seen: HashSet::new() }
	}

	/// Records `key`, returning `false` when it is already inside the window.
	fn insert(&mut self, key: (i64, String)) -> bool {
		if self.seen.contains(&key) {
			return false;
		}

		self.seen.insert(key.clone());
		self.order.push_back(key);

		let overflow = self.order.len().saturating_sub(self.capacity);

		for oldest in self.order.drain(..overflow) {
			self.seen.remove(&oldest);
		}

		true
	}
}
