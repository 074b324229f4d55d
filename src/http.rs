//! Response helpers shared by the OAuth client and the request pipeline.

// crates.io
use reqwest::{
	Response,
	header::{HeaderMap, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Status and retry hint captured from an HTTP response before its body is consumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}
impl ResponseMetadata {
	/// Captures metadata from `response`.
	pub fn from_response(response: &Response) -> Self {
		Self {
			status: response.status().as_u16(),
			retry_after: parse_retry_after(response.headers()),
		}
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Reads the full body as text, keeping the response metadata.
pub(crate) async fn read_text(
	response: Response,
	target: &'static str,
) -> Result<(ResponseMetadata, String)> {
	let meta = ResponseMetadata::from_response(&response);
	let body = response.text().await.map_err(|e| TransportError::network(target, e))?;

	Ok((meta, body))
}

/// Reads the full body as bytes, keeping the response metadata.
pub(crate) async fn read_bytes(
	response: Response,
	target: &'static str,
) -> Result<(ResponseMetadata, Vec<u8>)> {
	let meta = ResponseMetadata::from_response(&response);
	let body = response.bytes().await.map_err(|e| TransportError::network(target, e))?;

	Ok((meta, body.to_vec()))
}

/// Parses a `Retry-After` header given either as delta-seconds or as an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds_and_rejects_garbage() {
		let mut headers = HeaderMap::new();

		assert_eq!(parse_retry_after(&headers), None);

		headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(7)));

		headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));

		assert_eq!(parse_retry_after(&headers), None);
	}

	#[test]
	fn retry_after_in_the_past_is_ignored() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 +0000"));

		assert_eq!(parse_retry_after(&headers), None);
	}
}
