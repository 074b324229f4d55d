//! Tails application logs for one deployment.
//!
//! Usage: `cargo run --example tail_logs -- <org> <env> <deployment> <spec>`. Requires a
//! prior login (see the `login` demo).

// std
use std::{sync::Arc, time::Duration};
// crates.io
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;
// self
use anypoint_broker::{
	api::{LogTarget, LogsClient, TailOptions},
	config::Config,
	pipeline::HttpPipeline,
	session::TokenManager,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
		)
		.init();

	let args = std::env::args().skip(1).collect::<Vec<_>>();
	let [organization, environment, deployment, spec] = args.as_slice() else {
		return Err(eyre!("usage: tail_logs <org> <env> <deployment> <spec>"));
	};
	let config = Config::from_env()?;
	let manager = Arc::new(TokenManager::new(&config)?);
	let pipeline = Arc::new(HttpPipeline::new(&config, manager)?);
	let target = LogTarget::new(organization, environment, deployment, spec);
	let options = TailOptions::default().poll_interval(Duration::from_secs(2));
	let mut stream = Box::pin(LogsClient::new(pipeline).tail(target, options));

	while let Some(batch) = stream.next().await {
		match batch {
			Ok(entries) => {
				for entry in entries {
					println!(
						"{} [{}] {}",
						entry.timestamp,
						entry.log_level.as_deref().unwrap_or("-"),
						entry.message
					);
				}
			},
			Err(e) => eprintln!("poll failed: {e}"),
		}
	}

	Ok(())
}
