//! Short-lived loopback HTTP listener that receives the OAuth redirect.
//!
//! Exactly one resolution (code, provider error, or timeout) tears the listener down, and the
//! bound port is released before [`CallbackListener::wait`] returns.

// std
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
// crates.io
use axum::{
	Router,
	extract::{Query, State},
	http::{StatusCode, header},
	response::{Html, IntoResponse, Response},
	routing::get,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
// self
use crate::{_prelude::*, error::CallbackError};

const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(1);

type Outcome = Result<AuthorizationCallback>;

/// Code and state delivered by the provider redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCallback {
	/// Authorization code to exchange.
	pub code: String,
	/// State echoed by the provider.
	pub state: String,
}
impl Debug for AuthorizationCallback {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationCallback")
			.field("code", &"<redacted>")
			.field("state", &self.state)
			.finish()
	}
}

/// Bound loopback socket waiting to serve a single callback.
#[derive(Debug)]
pub struct CallbackListener {
	listener: TcpListener,
	addr: SocketAddr,
	path: String,
}
impl CallbackListener {
	/// Binds `127.0.0.1:{port}`; port `0` picks an ephemeral port.
	pub async fn bind(port: u16, path: &str) -> Result<Self, CallbackError> {
		Self::bind_on(IpAddr::V4(Ipv4Addr::LOCALHOST), port, path).await
	}

	/// Binds `{ip}:{port}`, matching the loopback host of the redirect URI.
	pub async fn bind_on(ip: IpAddr, port: u16, path: &str) -> Result<Self, CallbackError> {
		let listener = TcpListener::bind((ip, port))
			.await
			.map_err(|source| CallbackError::Bind { port, source })?;
		let addr = listener.local_addr().map_err(|source| CallbackError::Bind { port, source })?;
		let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };

		Ok(Self { listener, addr, path })
	}

	/// Address actually bound.
	pub fn local_addr(&self) -> SocketAddr {
		self.addr
	}

	/// Path the listener answers on.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Rewrites `configured` so it points at the bound port.
	pub fn redirect_uri(&self, configured: &Url) -> Url {
		let mut uri = configured.clone();

		// Only fails for URLs that cannot carry a port, which config validation rules out.
		let _ = uri.set_port(Some(self.addr.port()));

		uri
	}

	/// Serves requests until one callback resolves or `timeout` elapses.
	pub async fn wait(self, timeout: StdDuration) -> Result<AuthorizationCallback> {
		let (result_tx, result_rx) = oneshot::channel::<Outcome>();
		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
		let state = Arc::new(CallbackState { result: Mutex::new(Some(result_tx)) });
		let router = Router::new()
			.route(&self.path, get(handle_callback))
			.fallback(not_found)
			.with_state(state);
		let listener = self.listener;
		let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
			axum::serve(listener, router)
				.with_graceful_shutdown(async move {
					let _ = shutdown_rx.await;
				})
				.await
		});

		tracing::debug!(addr = %self.addr, path = %self.path, "waiting for OAuth callback");

		let outcome = tokio::time::timeout(timeout, result_rx).await;
		let _ = shutdown_tx.send(());
		let served = match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
			Ok(joined) => joined.ok(),
			Err(_) => {
				server.abort();

				let _ = server.await;

				None
			},
		};

		match outcome {
			Ok(Ok(outcome)) => outcome,
			Err(_) => Err(CallbackError::Timeout { waited: timeout }.into()),
			Ok(Err(_)) => match served {
				Some(Err(e)) => Err(CallbackError::Server(e).into()),
				_ => Err(CallbackError::Closed.into()),
			},
		}
	}
}

/// Binds the listener and waits for a single callback.
pub async fn wait_for_callback(
	port: u16,
	path: &str,
	timeout: StdDuration,
) -> Result<AuthorizationCallback> {
	CallbackListener::bind(port, path).await?.wait(timeout).await
}

struct CallbackState {
	result: Mutex<Option<oneshot::Sender<Outcome>>>,
}
impl CallbackState {
	fn resolve(&self, outcome: Outcome) {
		if let Some(sender) = self.result.lock().take() {
			let _ = sender.send(outcome);
		}
	}
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
	#[serde(default)]
	code: Option<String>,
	#[serde(default)]
	state: Option<String>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}

async fn handle_callback(
	State(state): State<Arc<CallbackState>>,
	Query(params): Query<CallbackParams>,
) -> Response {
	if let Some(error) = params.error {
		tracing::warn!(%error, description = ?params.error_description, "provider returned an error");

		let page = error_page(&error, params.error_description.as_deref());

		state.resolve(Err(Error::OAuthProvider { error, description: params.error_description }));

		return page_response(StatusCode::OK, page);
	}

	match (params.code, params.state) {
		(Some(code), Some(returned_state)) if !code.is_empty() => {
			state.resolve(Ok(AuthorizationCallback { code, state: returned_state }));

			page_response(StatusCode::OK, success_page())
		},
		_ => {
			let page = error_page(
				"invalid_request",
				Some("The callback is missing the code or state parameter."),
			);

			page_response(StatusCode::BAD_REQUEST, page)
		},
	}
}

async fn not_found() -> Response {
	page_response(StatusCode::NOT_FOUND, "<!DOCTYPE html><title>Not Found</title>".into())
}

fn page_response(status: StatusCode, page: String) -> Response {
	(status, [(header::CONNECTION, "close")], Html(page)).into_response()
}

fn success_page() -> String {
	render_page(
		"Authentication Successful",
		"#34d399",
		"<p>You are signed in to the Anypoint Platform.</p>\
		 <p class=\"hint\">You can close this window and return to the terminal.</p>",
	)
}

fn error_page(error: &str, description: Option<&str>) -> String {
	let body = format!(
		"<p>The platform rejected the sign-in request.</p>\
		 <div class=\"details\"><code>{}</code><p>{}</p></div>\
		 <p class=\"hint\">Close this window and run the login command again.</p>",
		html_escape(error),
		html_escape(description.unwrap_or("No description was provided.")),
	);

	render_page("Authentication Failed", "#f87171", &body)
}

fn render_page(title: &str, accent: &str, body: &str) -> String {
	format!(
		r#"<!DOCTYPE html>
<html lang="en">
<head>
	<meta charset="UTF-8">
	<title>{title}</title>
	<style>
		body {{
			font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
			display: flex;
			justify-content: center;
			align-items: center;
			min-height: 100vh;
			margin: 0;
			background: #16213e;
			color: #e0e0e0;
		}}
		.container {{ text-align: center; padding: 2rem; max-width: 480px; }}
		h1 {{ color: {accent}; }}
		.details {{ border: 1px solid {accent}; border-radius: 8px; padding: 1rem; text-align: left; }}
		.hint {{ font-size: 0.875rem; color: #6b7280; }}
	</style>
</head>
<body>
	<div class="container">
		<h1>{title}</h1>
		{body}
	</div>
</body>
</html>"#
	)
}

fn html_escape(raw: &str) -> String {
	raw.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
		.replace('\'', "&#x27;")
}
