use std::time::Duration;

use v_utils::macros::{MyConfigPrimitives, Settings};

#[derive(Clone, Debug, Default, MyConfigPrimitives, Settings)]
pub struct AppConfig {
	/// Account email for the semi-automatic login (2FA code is entered by hand)
	#[serde(default)]
	pub email: Option<String>,
	/// Root directory for transcripts (default: "output")
	#[settings(default = default_output_dir())]
	pub output_dir: String,
	/// Cookie snapshot written after a successful login (default: "sessions/udemy_session.json")
	#[settings(default = default_session_file())]
	pub session_file: String,
	/// Platform root (default: "https://www.udemy.com")
	#[settings(default = default_base_url())]
	pub base_url: String,
	/// Run with visible browser window (non-headless mode)
	#[serde(default)]
	pub visible: bool,
	/// Attach to a browser already listening on this remote-debugging port instead of launching one
	#[serde(default)]
	pub debug_port: Option<u16>,
	/// How long to wait for the user to finish an interactive login, in seconds (default: 300)
	#[serde(default = "default_login_timeout_secs")]
	pub login_timeout_secs: u64,
	/// Interval between condition checks in every smart wait (default: 300)
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Settle time after full page navigations (default: 2000)
	#[serde(default = "default_page_load_delay_ms")]
	pub page_load_delay_ms: u64,
	/// Pause after a click before checking its effect (default: 300)
	#[serde(default = "default_click_delay_ms")]
	pub click_delay_ms: u64,
	/// Pause after hovering, for hover-revealed controls to render (default: 300)
	#[serde(default = "default_hover_delay_ms")]
	pub hover_delay_ms: u64,
	/// Readiness budget for video lectures (default: 15000)
	#[serde(default = "default_video_timeout_ms")]
	pub video_timeout_ms: u64,
	/// Readiness budget for article lectures (default: 5000)
	#[serde(default = "default_document_timeout_ms")]
	pub document_timeout_ms: u64,
	/// Readiness budget for quizzes and assignments (default: 3000)
	#[serde(default = "default_quiz_timeout_ms")]
	pub quiz_timeout_ms: u64,
	/// Readiness budget for resource items (default: 2000)
	#[serde(default = "default_resource_timeout_ms")]
	pub resource_timeout_ms: u64,
	/// Readiness budget when the kind could not be determined (default: 8000)
	#[serde(default = "default_unknown_timeout_ms")]
	pub unknown_timeout_ms: u64,
	/// Transcript panel open/close and lecture-list reappearance (default: 10000)
	#[serde(default = "default_panel_timeout_ms")]
	pub panel_timeout_ms: u64,
	/// Accordion content after clicking a section toggle (default: 10000)
	#[serde(default = "default_section_timeout_ms")]
	pub section_timeout_ms: u64,
	/// Next lecture row becoming clickable after a navigation (default: 15000)
	#[serde(default = "default_next_lecture_timeout_ms")]
	pub next_lecture_timeout_ms: u64,
	/// Pause after each transcript panel scroll (default: 500)
	#[serde(default = "default_scroll_pause_ms")]
	pub scroll_pause_ms: u64,
	/// Hard cap on scroll rounds per transcript (default: 200)
	#[serde(default = "default_max_scroll_rounds")]
	pub max_scroll_rounds: u32,
	/// Consecutive scrolls without new cues before giving up (default: 1)
	#[serde(default = "default_scroll_idle_limit")]
	pub scroll_idle_limit: u32,
	/// One of "auto", "bulk", "scroll" (default: "auto")
	#[settings(default = default_extraction_strategy())]
	pub extraction_strategy: String,
	/// Lower bound of the random pause between lectures (default: 1000)
	#[serde(default = "default_lecture_delay_min_ms")]
	pub lecture_delay_min_ms: u64,
	/// Upper bound of the random pause between lectures (default: 3000)
	#[serde(default = "default_lecture_delay_max_ms")]
	pub lecture_delay_max_ms: u64,
	/// Type into inputs one character at a time with jittered delays (default: true)
	#[serde(default = "default_human_typing")]
	pub human_typing: bool,
	/// JSON file with selector overrides, tried before the built-in lists
	#[serde(default)]
	pub selectors_file: Option<String>,
	/// Persist the page HTML whenever a lecture errors out
	#[serde(default)]
	pub save_failed_pages: bool,
	/// Command to run on completion/error (receives message as argument)
	#[serde(default)]
	pub stop_hook: Option<String>,
}

fn default_output_dir() -> String {
	"output".to_string()
}

fn default_session_file() -> String {
	"sessions/udemy_session.json".to_string()
}

fn default_base_url() -> String {
	"https://www.udemy.com".to_string()
}

fn default_login_timeout_secs() -> u64 {
	300
}

fn default_poll_interval_ms() -> u64 {
	300
}

fn default_page_load_delay_ms() -> u64 {
	2000
}

fn default_click_delay_ms() -> u64 {
	300
}

fn default_hover_delay_ms() -> u64 {
	300
}

fn default_video_timeout_ms() -> u64 {
	15_000
}

fn default_document_timeout_ms() -> u64 {
	5_000
}

fn default_quiz_timeout_ms() -> u64 {
	3_000
}

fn default_resource_timeout_ms() -> u64 {
	2_000
}

fn default_unknown_timeout_ms() -> u64 {
	8_000
}

fn default_panel_timeout_ms() -> u64 {
	10_000
}

fn default_section_timeout_ms() -> u64 {
	10_000
}

fn default_next_lecture_timeout_ms() -> u64 {
	15_000
}

fn default_scroll_pause_ms() -> u64 {
	500
}

fn default_max_scroll_rounds() -> u32 {
	200
}

fn default_scroll_idle_limit() -> u32 {
	1
}

fn default_extraction_strategy() -> String {
	"auto".to_string()
}

fn default_lecture_delay_min_ms() -> u64 {
	1000
}

fn default_lecture_delay_max_ms() -> u64 {
	3000
}

fn default_human_typing() -> bool {
	true
}

impl AppConfig {
	pub fn my_learning_url(&self) -> String {
		crate::course_finder::my_learning_url(&self.base_url)
	}

	pub fn login_url(&self) -> String {
		format!("{}/join/login-popup/", self.base_url.trim_end_matches('/'))
	}
}

/// How cues are pulled out of the transcript panel
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExtractionStrategy {
	/// Bulk first, scrolling only when bulk finds nothing
	#[default]
	Auto,
	Bulk,
	Scroll,
}

impl std::str::FromStr for ExtractionStrategy {
	type Err = color_eyre::Report;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"auto" | "" => Ok(Self::Auto),
			"bulk" => Ok(Self::Bulk),
			"scroll" => Ok(Self::Scroll),
			other => Err(color_eyre::eyre::eyre!("Unknown extraction strategy '{other}', expected auto|bulk|scroll")),
		}
	}
}

/// Every delay, budget and limit the browser-facing components use.
/// Built from [AppConfig] for real runs; tests construct it directly.
#[derive(Clone, Debug)]
pub struct Timing {
	pub poll: Duration,
	pub page_load: Duration,
	pub after_click: Duration,
	pub hover: Duration,
	pub video: Duration,
	pub document: Duration,
	pub quiz: Duration,
	pub resource: Duration,
	pub unknown: Duration,
	pub panel: Duration,
	pub section: Duration,
	pub next_lecture: Duration,
	/// How long a lecture URL gets to show up after clicking a row
	pub url_change: Duration,
	pub scroll_pause: Duration,
	pub max_scroll_rounds: u32,
	pub scroll_idle_limit: u32,
	pub lecture_delay: (Duration, Duration),
	pub human_typing: bool,
	pub strategy: ExtractionStrategy,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			poll: Duration::from_millis(default_poll_interval_ms()),
			page_load: Duration::from_millis(default_page_load_delay_ms()),
			after_click: Duration::from_millis(default_click_delay_ms()),
			hover: Duration::from_millis(default_hover_delay_ms()),
			video: Duration::from_millis(default_video_timeout_ms()),
			document: Duration::from_millis(default_document_timeout_ms()),
			quiz: Duration::from_millis(default_quiz_timeout_ms()),
			resource: Duration::from_millis(default_resource_timeout_ms()),
			unknown: Duration::from_millis(default_unknown_timeout_ms()),
			panel: Duration::from_millis(default_panel_timeout_ms()),
			section: Duration::from_millis(default_section_timeout_ms()),
			next_lecture: Duration::from_millis(default_next_lecture_timeout_ms()),
			url_change: Duration::from_secs(5),
			scroll_pause: Duration::from_millis(default_scroll_pause_ms()),
			max_scroll_rounds: default_max_scroll_rounds(),
			scroll_idle_limit: default_scroll_idle_limit(),
			lecture_delay: (Duration::from_millis(default_lecture_delay_min_ms()), Duration::from_millis(default_lecture_delay_max_ms())),
			human_typing: default_human_typing(),
			strategy: ExtractionStrategy::Auto,
		}
	}
}

impl TryFrom<&AppConfig> for Timing {
	type Error = color_eyre::Report;

	fn try_from(config: &AppConfig) -> Result<Self, Self::Error> {
		let ms = Duration::from_millis;
		let (lo, hi) = (config.lecture_delay_min_ms, config.lecture_delay_max_ms.max(config.lecture_delay_min_ms));
		Ok(Self {
			poll: ms(config.poll_interval_ms.max(10)),
			page_load: ms(config.page_load_delay_ms),
			after_click: ms(config.click_delay_ms),
			hover: ms(config.hover_delay_ms),
			video: ms(config.video_timeout_ms),
			document: ms(config.document_timeout_ms),
			quiz: ms(config.quiz_timeout_ms),
			resource: ms(config.resource_timeout_ms),
			unknown: ms(config.unknown_timeout_ms),
			panel: ms(config.panel_timeout_ms),
			section: ms(config.section_timeout_ms),
			next_lecture: ms(config.next_lecture_timeout_ms),
			url_change: Duration::from_secs(5),
			scroll_pause: ms(config.scroll_pause_ms),
			max_scroll_rounds: config.max_scroll_rounds.max(1),
			scroll_idle_limit: config.scroll_idle_limit.max(1),
			lecture_delay: (ms(lo), ms(hi)),
			human_typing: config.human_typing,
			strategy: config.extraction_strategy.parse()?,
		})
	}
}

impl Timing {
	/// Readiness budget for a lecture of the given kind
	pub fn budget_for(&self, kind: crate::LectureKind) -> Duration {
		use crate::LectureKind::*;
		match kind {
			Video => self.video,
			Document => self.document,
			Quiz => self.quiz,
			Resource => self.resource,
			Unknown => self.unknown,
		}
	}

	/// Near-zero delays and short budgets, so scripted pages finish quickly even without paused time
	#[cfg(test)]
	pub fn fast() -> Self {
		let ms = Duration::from_millis;
		Self {
			poll: ms(10),
			page_load: ms(0),
			after_click: ms(0),
			hover: ms(0),
			video: ms(500),
			document: ms(200),
			quiz: ms(150),
			resource: ms(100),
			unknown: ms(300),
			panel: ms(400),
			section: ms(400),
			next_lecture: ms(400),
			url_change: ms(200),
			scroll_pause: ms(0),
			max_scroll_rounds: 50,
			scroll_idle_limit: 1,
			lecture_delay: (ms(0), ms(0)),
			human_typing: false,
			strategy: ExtractionStrategy::Auto,
		}
	}
}
