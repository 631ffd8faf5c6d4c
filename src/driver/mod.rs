//! The narrow browser surface the scraping core talks to.
//!
//! Components never keep a handle across a click that can re-render the page: every step re-queries.

use std::{fmt, future::Future};

use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::{config::Timing, orchestrator::RunObserver, selectors::SelectorTable};

pub mod chromium;
#[cfg(test)]
pub mod fake;

/// A single selector strategy. Strings starting with `//`, `./` or `(` are XPath, everything else is CSS.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Selector {
	Css(String),
	XPath(String),
}

impl Selector {
	pub fn parse(raw: &str) -> Self {
		let raw = raw.trim();
		if raw.starts_with("//") || raw.starts_with("./") || raw.starts_with('(') {
			Selector::XPath(raw.to_string())
		} else {
			Selector::Css(raw.to_string())
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Selector::Css(s) | Selector::XPath(s) => s,
		}
	}

	pub fn is_template(&self) -> bool {
		let s = self.as_str();
		s.contains("{index}") || s.contains("{ordinal}")
	}

	/// Substitutes `{index}` (zero-based) and `{ordinal}` (one-based)
	pub fn render(&self, index: usize) -> Selector {
		let fill = |s: &str| s.replace("{index}", &index.to_string()).replace("{ordinal}", &(index + 1).to_string());
		match self {
			Selector::Css(s) => Selector::Css(fill(s)),
			Selector::XPath(s) => Selector::XPath(fill(s)),
		}
	}
}

impl From<String> for Selector {
	fn from(s: String) -> Self {
		Selector::parse(&s)
	}
}

impl From<&str> for Selector {
	fn from(s: &str) -> Self {
		Selector::parse(s)
	}
}

impl From<Selector> for String {
	fn from(s: Selector) -> Self {
		match s {
			Selector::Css(s) | Selector::XPath(s) => s,
		}
	}
}

impl fmt::Display for Selector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Vertical scroll state of a scrollable element
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ScrollMetrics {
	pub top: f64,
	pub client_height: f64,
	pub scroll_height: f64,
}

impl ScrollMetrics {
	/// Within `slack` pixels of the end, or not scrollable at all
	pub fn at_bottom(&self, slack: f64) -> bool {
		self.top + self.client_height >= self.scroll_height - slack
	}

	/// Next `scrollTop` when advancing by half the visible height
	pub fn half_page_down(&self) -> f64 {
		let step = (self.client_height / 2.0).max(1.0);
		let max_top = (self.scroll_height - self.client_height).max(0.0);
		(self.top + step).min(max_top)
	}
}

/// Browser operations the scraper depends on.
///
/// Element operations fail (rather than lie) when a handle no longer refers to a live node.
pub trait Driver: Sync {
	type Handle: Clone + fmt::Debug + Send + Sync;

	fn goto(&self, url: &str) -> impl Future<Output = Result<()>> + Send;
	fn current_url(&self) -> impl Future<Output = Result<String>> + Send;
	fn title(&self) -> impl Future<Output = Result<String>> + Send;
	/// All matches in document order, searching the whole page or below `scope`
	fn query_all(&self, scope: Option<&Self::Handle>, selector: &Selector) -> impl Future<Output = Result<Vec<Self::Handle>>> + Send;
	/// Runs a script in the page and returns its JSON value (`Null` when it returns nothing)
	fn evaluate(&self, script: &str) -> impl Future<Output = Result<serde_json::Value>> + Send;
	fn page_source(&self) -> impl Future<Output = Result<String>> + Send;
	/// Body of `url` requested from inside the page, so the session's cookies go along. Relative URLs resolve against the page.
	fn fetch_text(&self, url: &str) -> impl Future<Output = Result<String>> + Send;

	fn is_displayed(&self, el: &Self::Handle) -> impl Future<Output = Result<bool>> + Send;
	fn is_enabled(&self, el: &Self::Handle) -> impl Future<Output = Result<bool>> + Send;
	fn attribute(&self, el: &Self::Handle, name: &str) -> impl Future<Output = Result<Option<String>>> + Send;
	fn text(&self, el: &Self::Handle) -> impl Future<Output = Result<String>> + Send;
	fn scroll_into_view(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	fn hover(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	/// Pointer moved onto the element, then pressed and released there
	fn pointer_click(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	fn click(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	/// `element.click()` from inside the page, ignoring overlays and visibility
	fn script_click(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	fn focus(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	fn clear(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	fn send_keys(&self, el: &Self::Handle, text: &str) -> impl Future<Output = Result<()>> + Send;
	fn press_enter(&self, el: &Self::Handle) -> impl Future<Output = Result<()>> + Send;
	fn scroll_metrics(&self, el: &Self::Handle) -> impl Future<Output = Result<ScrollMetrics>> + Send;
	fn scroll_to(&self, el: &Self::Handle, top: f64) -> impl Future<Output = Result<()>> + Send;

	/// Current cookies as raw JSON objects
	fn cookies(&self) -> impl Future<Output = Result<Vec<serde_json::Value>>> + Send;
	fn set_cookie(&self, cookie: &serde_json::Value) -> impl Future<Output = Result<()>> + Send;
}

/// What every browser-facing component borrows: the page, the selector data, the timing policy and the log channel.
pub struct Ctx<'a, D: Driver> {
	pub driver: &'a D,
	pub selectors: &'a SelectorTable,
	pub timing: &'a Timing,
	pub observer: &'a dyn RunObserver,
}

impl<D: Driver> Clone for Ctx<'_, D> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<D: Driver> Copy for Ctx<'_, D> {}

impl<'a, D: Driver> Ctx<'a, D> {
	pub fn new(driver: &'a D, selectors: &'a SelectorTable, timing: &'a Timing, observer: &'a dyn RunObserver) -> Self {
		Self {
			driver,
			selectors,
			timing,
			observer,
		}
	}

	/// Narration for the caller plus a trace line
	pub fn log(&self, message: impl AsRef<str>) {
		let message = message.as_ref();
		tracing::debug!("{message}");
		self.observer.log(message);
	}

	pub async fn pause(&self, d: std::time::Duration) {
		if !d.is_zero() {
			tokio::time::sleep(d).await;
		}
	}

	pub async fn url(&self) -> String {
		self.driver.current_url().await.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selector_kind_detection() {
		assert_eq!(Selector::parse("//a[contains(@href, 'login')]"), Selector::XPath("//a[contains(@href, 'login')]".into()));
		assert_eq!(Selector::parse("(//button)[1]"), Selector::XPath("(//button)[1]".into()));
		assert_eq!(Selector::parse(" .transcript-cue "), Selector::Css(".transcript-cue".into()));
	}

	#[test]
	fn selector_templates() {
		let s = Selector::parse("div[data-purpose='section-panel-{index}'] ~ :nth-child({ordinal})");
		assert!(s.is_template());
		assert_eq!(s.render(2).as_str(), "div[data-purpose='section-panel-2'] ~ :nth-child(3)");
		assert!(!s.render(2).is_template());
	}

	#[test]
	fn selector_serde_is_plain_string() {
		let s: Selector = serde_json::from_str("\"//div\"").unwrap();
		assert!(matches!(s, Selector::XPath(_)));
		assert_eq!(serde_json::to_string(&Selector::Css("video".into())).unwrap(), "\"video\"");
	}

	#[test]
	fn scroll_geometry() {
		let m = ScrollMetrics {
			top: 0.0,
			client_height: 100.0,
			scroll_height: 260.0,
		};
		assert!(!m.at_bottom(5.0));
		assert_eq!(m.half_page_down(), 50.0);
		let near_end = ScrollMetrics { top: 140.0, ..m };
		assert_eq!(near_end.half_page_down(), 160.0);
		assert!(ScrollMetrics { top: 160.0, ..m }.at_bottom(5.0));
		assert!(ScrollMetrics::default().at_bottom(0.0));
	}
}
