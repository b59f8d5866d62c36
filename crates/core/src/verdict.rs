//! Classification of a single page load into a [`HealthVerdict`].

/// Something the browser reported while the page was loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
	/// Console message of error severity (console API call or browser log entry).
	ConsoleError(String),
	/// Uncaught exception thrown by page script.
	PageError(String),
}

impl PageEvent {
	pub fn text(&self) -> &str {
		match self {
			PageEvent::ConsoleError(text) | PageEvent::PageError(text) => text,
		}
	}
}

/// Backend-neutral observation of one navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLoad {
	pub events: Vec<PageEvent>,
	/// Status of the main document response, if one arrived.
	pub status: Option<u16>,
	/// Navigation failure message (timeout, connection refused, ...).
	pub navigation_error: Option<String>,
}

impl PageLoad {
	/// True when the navigation failed only because nothing was listening yet.
	pub fn connection_refused(&self) -> bool {
		self.navigation_error
			.as_deref()
			.is_some_and(is_connection_refused)
	}
}

/// Chrome reports a dead port as `net::ERR_CONNECTION_REFUSED`.
pub fn is_connection_refused(message: &str) -> bool {
	message.contains("ERR_CONNECTION_REFUSED")
}

/// Text fragments that mark a console or page error as critical.
#[derive(Debug, Clone)]
pub struct ErrorMarkers(Vec<String>);

impl ErrorMarkers {
	pub fn new<I, S>(markers: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(
			markers
				.into_iter()
				.map(Into::into)
				.filter(|m: &String| !m.is_empty())
				.collect(),
		)
	}

	pub fn matches(&self, text: &str) -> bool {
		self.0.iter().any(|marker| text.contains(marker.as_str()))
	}
}

impl Default for ErrorMarkers {
	fn default() -> Self {
		Self::new(crate::config::DEFAULT_ERROR_MARKERS.iter().copied())
	}
}

/// Result of one health check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthVerdict {
	pub failed: bool,
	/// Matching error texts in observation order, then any HTTP status anomaly.
	pub diagnostics: Vec<String>,
}

impl HealthVerdict {
	/// Classifies a page load. Navigation errors never fail a check on their
	/// own; only matching errors and a 5xx document status do.
	pub fn classify(load: &PageLoad, markers: &ErrorMarkers) -> Self {
		let mut diagnostics: Vec<String> = load
			.events
			.iter()
			.map(PageEvent::text)
			.filter(|text| markers.matches(text))
			.map(str::to_string)
			.collect();

		if let Some(status) = load.status.filter(|s| *s >= 500) {
			diagnostics.push(format!("HTTP Status {status}"));
		}

		Self {
			failed: !diagnostics.is_empty(),
			diagnostics,
		}
	}
}
