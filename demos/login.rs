//! Signs in through the browser, then prints the session status and the signed-in profile.
//!
//! Reads `ANYPOINT_CLIENT_ID`, `ANYPOINT_CLIENT_SECRET` and the optional overrides from the
//! environment. Run with `RUST_LOG=anypoint_broker=debug` to follow the flow.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use tracing_subscriber::EnvFilter;
// self
use anypoint_broker::{
	api::AccountClient, config::Config, pipeline::HttpPipeline, session::TokenManager,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let config = Config::from_env()?;
	let manager = Arc::new(TokenManager::new(&config)?);
	let status = manager.status().await?;

	if status.authenticated {
		println!("Already signed in; refreshing if needed.");
	} else {
		manager.authenticate().await?;
		println!("Signed in.");
	}

	let pipeline = Arc::new(HttpPipeline::new(&config, manager.clone())?);
	let profile = AccountClient::new(pipeline).me().await?;
	let status = manager.status().await?;

	println!("User: {} ({})", profile.username, profile.email.as_deref().unwrap_or("no email"));
	println!("Session: {}", serde_json::to_string_pretty(&status)?);

	Ok(())
}
