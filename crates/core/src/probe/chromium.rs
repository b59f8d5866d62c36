//! Chrome DevTools backend for the probe.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::log::{
	EnableParams as LogEnableParams, EventEntryAdded, LogEntryLevel,
};
use chromiumoxide::cdp::browser_protocol::network::{
	EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
	RequestId, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
	ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, ExceptionDetails,
	RemoteObject,
};
use chromiumoxide::error::CdpError;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{BrowserBackend, PageSession};
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::verdict::{PageEvent, PageLoad};

/// How long the network must stay without in-flight requests.
const NETWORK_IDLE: Duration = Duration::from_millis(500);
const IDLE_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ChromiumBackend {
	headless: bool,
	chrome_executable: Option<PathBuf>,
	user_agent: String,
}

impl ChromiumBackend {
	pub fn from_config(config: &MonitorConfig) -> Self {
		Self {
			headless: config.headless,
			chrome_executable: config.chrome_executable.clone(),
			user_agent: config.user_agent.clone(),
		}
	}
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
	type Session = ChromiumSession;

	async fn launch(&self) -> Result<ChromiumSession> {
		let mut builder = BrowserConfig::builder()
			.no_sandbox()
			.arg("--disable-setuid-sandbox");
		if !self.headless {
			builder = builder.with_head();
		}
		if let Some(path) = &self.chrome_executable {
			builder = builder.chrome_executable(path);
		}
		let config = builder.build().map_err(Error::BrowserLaunch)?;

		let (browser, mut handler) = Browser::launch(config)
			.await
			.map_err(|err| Error::BrowserLaunch(err.to_string()))?;

		let handler_task = tokio::spawn(async move {
			while let Some(event) = handler.next().await {
				if let Err(err) = event {
					debug!(target = "devmon.probe", error = %err, "browser handler error");
				}
			}
		});

		info!(target = "devmon.probe", headless = self.headless, "launched chromium");
		Ok(ChromiumSession {
			browser,
			handler_task,
			user_agent: self.user_agent.clone(),
		})
	}
}

pub struct ChromiumSession {
	browser: Browser,
	handler_task: JoinHandle<()>,
	user_agent: String,
}

#[async_trait]
impl PageSession for ChromiumSession {
	async fn load(&mut self, url: &str, timeout: Duration) -> Result<PageLoad> {
		let page = self
			.browser
			.new_page("about:blank")
			.await
			.map_err(|err| Error::PageOpen(err.to_string()))?;

		let result = observe(&page, url, timeout, &self.user_agent).await;

		if let Err(err) = page.close().await {
			debug!(target = "devmon.probe", error = %err, "failed to close page");
		}
		result
	}

	async fn close(&mut self) -> Result<()> {
		self.browser
			.close()
			.await
			.map_err(|err| Error::Browser(err.to_string()))?;
		if let Err(err) = self.browser.wait().await {
			debug!(target = "devmon.probe", error = %err, "failed waiting for browser exit");
		}
		self.handler_task.abort();
		Ok(())
	}
}

impl Drop for ChromiumSession {
	fn drop(&mut self) {
		self.handler_task.abort();
	}
}

fn page_open(err: CdpError) -> Error {
	Error::PageOpen(err.to_string())
}

/// Navigates `page` and records error events until the network is idle.
///
/// Mirrors `networkidle0`: the load is settled once navigation has committed
/// and no request has been in flight for [`NETWORK_IDLE`].
async fn observe(page: &Page, url: &str, timeout: Duration, user_agent: &str) -> Result<PageLoad> {
	page.set_user_agent(SetUserAgentOverrideParams::new(user_agent))
		.await
		.map_err(page_open)?;
	page.execute(LogEnableParams::default())
		.await
		.map_err(page_open)?;

	let mut console = page
		.event_listener::<EventConsoleApiCalled>()
		.await
		.map_err(page_open)?;
	let mut exceptions = page
		.event_listener::<EventExceptionThrown>()
		.await
		.map_err(page_open)?;
	let mut log_entries = page
		.event_listener::<EventEntryAdded>()
		.await
		.map_err(page_open)?;
	let mut responses = page
		.event_listener::<EventResponseReceived>()
		.await
		.map_err(page_open)?;
	let mut requests = page
		.event_listener::<EventRequestWillBeSent>()
		.await
		.map_err(page_open)?;
	let mut finished = page
		.event_listener::<EventLoadingFinished>()
		.await
		.map_err(page_open)?;
	let mut failed = page
		.event_listener::<EventLoadingFailed>()
		.await
		.map_err(page_open)?;
	let main_frame = page.mainframe().await.map_err(page_open)?;

	let mut load = PageLoad::default();
	let mut in_flight: HashSet<RequestId> = HashSet::new();
	let mut quiet_since: Option<Instant> = None;
	let mut navigated = false;

	let deadline = tokio::time::sleep(timeout);
	tokio::pin!(deadline);
	let mut idle_tick = tokio::time::interval(IDLE_TICK);
	let navigation = page.goto(url);
	tokio::pin!(navigation);

	loop {
		tokio::select! {
			result = &mut navigation, if !navigated => {
				navigated = true;
				if let Err(err) = result {
					load.navigation_error = Some(err.to_string());
					break;
				}
			}
			Some(event) = console.next() => {
				if event.r#type == ConsoleApiCalledType::Error {
					load.events.push(PageEvent::ConsoleError(console_text(&event.args)));
				}
			}
			Some(event) = log_entries.next() => {
				if event.entry.level == LogEntryLevel::Error {
					load.events.push(PageEvent::ConsoleError(event.entry.text.clone()));
				}
			}
			Some(event) = exceptions.next() => {
				load.events.push(PageEvent::PageError(exception_text(&event.exception_details)));
			}
			Some(event) = responses.next() => {
				let main_document = event.r#type == ResourceType::Document
					&& (main_frame.is_none() || event.frame_id == main_frame);
				if main_document && load.status.is_none() {
					load.status = u16::try_from(event.response.status).ok();
				}
			}
			Some(event) = requests.next() => {
				in_flight.insert(event.request_id.clone());
			}
			Some(event) = finished.next() => {
				in_flight.remove(&event.request_id);
			}
			Some(event) = failed.next() => {
				in_flight.remove(&event.request_id);
			}
			_ = idle_tick.tick(), if navigated => {
				if !in_flight.is_empty() {
					quiet_since = None;
				} else if quiet_since.get_or_insert_with(Instant::now).elapsed() >= NETWORK_IDLE {
					break;
				}
			}
			_ = &mut deadline => {
				if load.navigation_error.is_none() {
					load.navigation_error = Some(format!(
						"Navigation timeout of {} ms exceeded",
						timeout.as_millis()
					));
				}
				break;
			}
		}
	}

	Ok(load)
}

/// Joins console arguments the way DevTools prints them.
fn console_text(args: &[RemoteObject]) -> String {
	args.iter()
		.map(|arg| match &arg.value {
			Some(Value::String(text)) => text.clone(),
			Some(value) => value.to_string(),
			None => arg.description.clone().unwrap_or_default(),
		})
		.filter(|text| !text.is_empty())
		.collect::<Vec<_>>()
		.join(" ")
}

fn exception_text(details: &ExceptionDetails) -> String {
	details
		.exception
		.as_ref()
		.and_then(|exception| exception.description.clone())
		.unwrap_or_else(|| details.text.clone())
}
