//! Page loads through a real Chrome against a local axum app.
//!
//! Needs Chrome or Chromium on the machine, so every test is ignored by
//! default. Run with `cargo test -p devmon-rs --test chromium_backend -- --ignored`.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use devmon::config::DEFAULT_USER_AGENT;
use devmon::{
	BrowserBackend, ChromiumBackend, ErrorMarkers, HealthVerdict, MonitorConfig, PageEvent, PageSession,
};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn healthy() -> Html<&'static str> {
	Html("<!doctype html><html><body><h1>portfolio</h1></body></html>")
}

async fn hydration() -> Html<&'static str> {
	Html(
		"<!doctype html><html><body><script>\
		console.error('Hydration failed because the server rendered HTML did not match the client');\
		</script></body></html>",
	)
}

async fn uncaught() -> Html<&'static str> {
	Html(
		"<!doctype html><html><body><script>\
		throw new TypeError('Runtime TypeError: project is undefined');\
		</script></body></html>",
	)
}

async fn crashed() -> impl IntoResponse {
	(StatusCode::INTERNAL_SERVER_ERROR, Html("<h1>oops</h1>"))
}

/// 200 only for the monitor's own user agent.
async fn agent(headers: HeaderMap) -> StatusCode {
	match headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
		Some(DEFAULT_USER_AGENT) => StatusCode::OK,
		_ => StatusCode::BAD_GATEWAY,
	}
}

async fn serve_app() -> SocketAddr {
	let app = Router::new()
		.route("/", get(healthy))
		.route("/hydration", get(hydration))
		.route("/uncaught", get(uncaught))
		.route("/crashed", get(crashed))
		.route("/agent", get(agent));
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	addr
}

async fn launch() -> <ChromiumBackend as BrowserBackend>::Session {
	ChromiumBackend::from_config(&MonitorConfig::default())
		.launch()
		.await
		.expect("chrome available")
}

#[tokio::test]
#[ignore = "needs a local Chrome"]
async fn healthy_page_passes() {
	let addr = serve_app().await;
	let mut session = launch().await;

	let load = session.load(&format!("http://{addr}/"), TIMEOUT).await.unwrap();
	assert_eq!(load.status, Some(200));
	assert!(load.navigation_error.is_none(), "{load:?}");
	assert!(!HealthVerdict::classify(&load, &ErrorMarkers::default()).failed);

	session.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a local Chrome"]
async fn console_error_is_captured() {
	let addr = serve_app().await;
	let mut session = launch().await;

	let load = session.load(&format!("http://{addr}/hydration"), TIMEOUT).await.unwrap();
	assert!(load.events.iter().any(
		|event| matches!(event, PageEvent::ConsoleError(text) if text.contains("Hydration failed"))
	));

	let verdict = HealthVerdict::classify(&load, &ErrorMarkers::default());
	assert!(verdict.failed);
	assert!(verdict.diagnostics[0].contains("Hydration failed"));

	session.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a local Chrome"]
async fn uncaught_exception_is_a_page_error() {
	let addr = serve_app().await;
	let mut session = launch().await;

	let load = session.load(&format!("http://{addr}/uncaught"), TIMEOUT).await.unwrap();
	assert!(load.events.iter().any(
		|event| matches!(event, PageEvent::PageError(text) if text.contains("Runtime TypeError"))
	));
	assert!(HealthVerdict::classify(&load, &ErrorMarkers::default()).failed);

	session.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a local Chrome"]
async fn server_error_status_fails() {
	let addr = serve_app().await;
	let mut session = launch().await;

	let load = session.load(&format!("http://{addr}/crashed"), TIMEOUT).await.unwrap();
	assert_eq!(load.status, Some(500));

	let verdict = HealthVerdict::classify(&load, &ErrorMarkers::default());
	assert!(verdict.failed);
	assert!(verdict.diagnostics.contains(&"HTTP Status 500".to_string()));

	session.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a local Chrome"]
async fn pages_load_with_monitor_user_agent() {
	let addr = serve_app().await;
	let mut session = launch().await;

	let load = session.load(&format!("http://{addr}/agent"), TIMEOUT).await.unwrap();
	assert_eq!(load.status, Some(200));

	session.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a local Chrome"]
async fn refused_connection_is_a_navigation_error() {
	let port = StdTcpListener::bind("127.0.0.1:0")
		.unwrap()
		.local_addr()
		.unwrap()
		.port();
	let mut session = launch().await;

	let load = session.load(&format!("http://127.0.0.1:{port}/"), TIMEOUT).await.unwrap();
	assert!(load.connection_refused(), "{load:?}");
	assert!(!HealthVerdict::classify(&load, &ErrorMarkers::default()).failed);

	session.close().await.unwrap();
}
