//! Authenticated request pipeline shared by every platform API client.
//!
//! Each call obtains a valid access token from the [`TokenManager`], attaches it as a bearer
//! header, and is dispatched through the [`RateLimiter`]. There are no automatic retries: a
//! non-2xx answer surfaces as [`Error::Api`] with the upstream body and retry hint.

// crates.io
use reqwest::{Method, header::ACCEPT};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	cache::TtlCache,
	config::Config,
	error::TransportError,
	http,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	rate_limit::RateLimiter,
	session::TokenManager,
};

const API_TARGET: &str = "platform API";
const JSON_ACCEPT: &str = "application/json";

/// Per-request query pairs, extra headers, and JSON body.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
	/// Query pairs appended to the URL.
	pub query: Vec<(String, String)>,
	/// Extra headers sent with the request.
	pub headers: Vec<(String, String)>,
	/// JSON body, if any.
	pub body: Option<Value>,
}
impl RequestOptions {
	/// Empty options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a query pair.
	pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
		self.query.push((key.into(), value.to_string()));

		self
	}

	/// Appends a header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Sets the JSON body.
	pub fn json(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}
}

/// Rate-limited, token-injecting HTTP pipeline with a read-through cache.
#[derive(Debug)]
pub struct HttpPipeline {
	config: Config,
	http: ReqwestClient,
	tokens: Arc<TokenManager>,
	limiter: Arc<RateLimiter>,
	cache: TtlCache<Value>,
}
impl HttpPipeline {
	/// Builds a pipeline with its own HTTP client and a limiter sized from `config`.
	pub fn new(config: &Config, tokens: Arc<TokenManager>) -> Result<Self> {
		let limiter = Arc::new(RateLimiter::new(config.max_concurrent, config.requests_per_minute));

		Ok(Self::with_parts(config, config.http_client()?, tokens, limiter))
	}

	/// Builds a pipeline from pre-built collaborators; the limiter may be shared.
	pub fn with_parts(
		config: &Config,
		http: ReqwestClient,
		tokens: Arc<TokenManager>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self { config: config.clone(), http, tokens, limiter, cache: TtlCache::new() }
	}

	/// Session backing this pipeline.
	pub fn tokens(&self) -> &Arc<TokenManager> {
		&self.tokens
	}

	/// Limiter every call goes through.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Read-through cache used by [`HttpPipeline::get_cached`].
	pub fn cache(&self) -> &TtlCache<Value> {
		&self.cache
	}

	/// `GET path`.
	pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Value> {
		self.json(Method::GET, path, options).await
	}

	/// `POST path`.
	pub async fn post(&self, path: &str, options: RequestOptions) -> Result<Value> {
		self.json(Method::POST, path, options).await
	}

	/// `PUT path`.
	pub async fn put(&self, path: &str, options: RequestOptions) -> Result<Value> {
		self.json(Method::PUT, path, options).await
	}

	/// `PATCH path`.
	pub async fn patch(&self, path: &str, options: RequestOptions) -> Result<Value> {
		self.json(Method::PATCH, path, options).await
	}

	/// `DELETE path`.
	pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Value> {
		self.json(Method::DELETE, path, options).await
	}

	/// `GET path`, returning the raw body.
	///
	/// No `Accept` header is implied; pass one through `options` to negotiate a format.
	pub async fn download(&self, path: &str, options: RequestOptions) -> Result<Vec<u8>> {
		self.send(Method::GET, path, options, None).await
	}

	/// `GET path` through the cache; `ttl` defaults to the configured read TTL.
	///
	/// The cache key is the fully resolved URL including the query string.
	pub async fn get_cached(
		&self,
		path: &str,
		options: RequestOptions,
		ttl: Option<StdDuration>,
	) -> Result<Value> {
		let key = format!("GET {}", self.url_for(path, &options.query)?);
		let ttl = ttl.unwrap_or(self.config.cache_ttl);

		self.cache.get_or_compute(&key, || self.get(path, options), ttl).await
	}

	async fn json(&self, method: Method, path: &str, options: RequestOptions) -> Result<Value> {
		let body = self.send(method, path, options, Some(JSON_ACCEPT)).await?;

		if body.iter().all(u8::is_ascii_whitespace) {
			return Ok(Value::Null);
		}

		serde_json::from_slice(&body).map_err(|e| TransportError::ResponseParse(e).into())
	}

	async fn send(
		&self,
		method: Method,
		path: &str,
		options: RequestOptions,
		accept: Option<&'static str>,
	) -> Result<Vec<u8>> {
		const KIND: FlowKind = FlowKind::ApiRequest;

		let url = self.url_for(path, &options.query)?;
		let span = FlowSpan::new(KIND, "pipeline.send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let token = self.tokens.access_token().await?;
				let (http, token, options) = (&self.http, &token, &options);
				let (method, url) = (&method, &url);

				self.limiter
					.execute(move || async move {
						tracing::debug!(%method, %url, "dispatching platform request");

						let mut request =
							http.request(method.clone(), url.clone()).bearer_auth(token.expose());

						if let Some(accept) = default_accept(options, accept) {
							request = request.header(ACCEPT, accept);
						}
						for (name, value) in &options.headers {
							request = request.header(name.as_str(), value.as_str());
						}
						if let Some(body) = &options.body {
							request = request.json(body);
						}

						let response = request
							.send()
							.await
							.map_err(|e| TransportError::network(API_TARGET, e))?;
						let (meta, body) = http::read_bytes(response, API_TARGET).await?;

						obs::record_api_status(meta.status);

						if !meta.is_success() {
							return Err(Error::Api {
								status: meta.status,
								body: String::from_utf8_lossy(&body).into_owned(),
								retry_after: meta.retry_after,
							});
						}

						Ok(body)
					})
					.await
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	fn url_for(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
		let mut url = self.config.url(path)?;

		if !query.is_empty() {
			url.query_pairs_mut().extend_pairs(query);
		}

		Ok(url)
	}
}

/// `Accept` value to add unless the caller already supplied one.
fn default_accept(options: &RequestOptions, accept: Option<&'static str>) -> Option<&'static str> {
	if options.headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(ACCEPT.as_str())) {
		return None;
	}

	accept
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn pipeline() -> HttpPipeline {
		let config = Config::builder("client", "secret")
			.base_url("http://127.0.0.1:9/root")
			.expect("Base URL should parse.")
			.token_path("/tmp/unused.json")
			.build()
			.expect("Config should build.");
		let tokens = TokenManager::with_store(&config, Arc::new(MemoryStore::default()))
			.expect("Manager should build.");

		HttpPipeline::new(&config, Arc::new(tokens)).expect("Pipeline should build.")
	}

	#[test]
	fn url_for_keeps_prefix_and_encodes_query() {
		let url = pipeline()
			.url_for("/logs", &[("q".into(), "a b".into()), ("limit".into(), "10".into())])
			.expect("URL should resolve.");

		assert_eq!(url.as_str(), "http://127.0.0.1:9/root/logs?q=a+b&limit=10");
	}

	#[tokio::test]
	async fn unauthenticated_pipeline_never_dispatches() {
		let pipeline = pipeline();
		let err = pipeline
			.get("/accounts/api/me", RequestOptions::new())
			.await
			.expect_err("Missing session should fail.");

		assert!(matches!(err, Error::Unauthenticated));
		assert_eq!(pipeline.limiter().in_flight(), 0);
		assert!(pipeline.cache().is_empty());
	}

	#[test]
	fn options_builder_collects_parts() {
		let options = RequestOptions::new()
			.query("limit", 5)
			.header("x-trace", "1")
			.json(serde_json::json!({ "a": 1 }));

		assert_eq!(options.query, vec![("limit".to_owned(), "5".to_owned())]);
		assert_eq!(options.headers.len(), 1);
		assert!(options.body.is_some());
	}

	#[test]
	fn caller_accept_header_wins_over_default() {
		let plain = RequestOptions::new();
		let custom = RequestOptions::new().header("accept", "text/plain");

		assert_eq!(default_accept(&plain, Some(JSON_ACCEPT)), Some(JSON_ACCEPT));
		assert_eq!(default_accept(&plain, None), None);
		assert_eq!(default_accept(&custom, Some(JSON_ACCEPT)), None);
	}
}
