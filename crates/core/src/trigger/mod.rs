//! `/notify` endpoint that instrumented page loads call.
//!
//! The handler answers immediately and runs the health check in a detached
//! task after a short delay, giving a freshly loaded page time to crash.


use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::probe::HealthCheck;

pub const NOTIFY_PATH: &str = "/notify";

#[derive(Clone)]
struct TriggerState {
	check: Arc<dyn HealthCheck>,
	delay: Duration,
}

/// Builds the trigger router. Every response carries permissive CORS headers
/// because the caller is a page served from another port.
pub fn router(check: Arc<dyn HealthCheck>, delay: Duration) -> Router {
	Router::new()
		// axum answers HEAD with the GET handler unless told otherwise.
		.route(NOTIFY_PATH, get(notify).head(not_found).fallback(not_found))
		.fallback(not_found)
		.layer(SetResponseHeaderLayer::overriding(
			header::ACCESS_CONTROL_ALLOW_ORIGIN,
			HeaderValue::from_static("*"),
		))
		.layer(SetResponseHeaderLayer::overriding(
			header::ACCESS_CONTROL_ALLOW_METHODS,
			HeaderValue::from_static("GET"),
		))
		.with_state(TriggerState { check, delay })
}

async fn notify(State(state): State<TriggerState>) -> &'static str {
	info!(target = "devmon.trigger", "page load detected, scheduling health check");
	let TriggerState { check, delay } = state;
	tokio::spawn(async move {
		tokio::time::sleep(delay).await;
		let outcome = check.check_health().await;
		debug!(target = "devmon.trigger", ?outcome, "scheduled check finished");
	});
	"ok"
}

async fn not_found() -> StatusCode {
	StatusCode::NOT_FOUND
}

pub struct TriggerListener {
	listener: TcpListener,
	router: Router,
}

impl TriggerListener {
	pub async fn bind(addr: &str, check: Arc<dyn HealthCheck>, delay: Duration) -> Result<Self> {
		let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
			addr: addr.to_string(),
			source,
		})?;
		Ok(Self {
			listener,
			router: router(check, delay),
		})
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	/// Serves until `shutdown` resolves.
	pub async fn serve<F>(self, shutdown: F) -> Result<()>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		if let Ok(addr) = self.listener.local_addr() {
			info!(target = "devmon.trigger", %addr, "monitor listening for page reloads");
		}
		axum::serve(self.listener, self.router)
			.with_graceful_shutdown(shutdown)
			.await?;
		Ok(())
	}
}
