//! Thin platform API clients layered on [`HttpPipeline`](crate::pipeline::HttpPipeline).

pub mod account;
pub mod logs;

pub use account::*;
pub use logs::*;

// crates.io
use serde::de::DeserializeOwned;
use serde_json::Value;
// self
use crate::{_prelude::*, error::TransportError};

fn decode<T>(value: Value) -> Result<T>
where
	T: DeserializeOwned,
{
	serde_json::from_value(value).map_err(|e| TransportError::ResponseParse(e).into())
}
