//! Selector data. Each logical target maps to an ordered list of strategies, most stable first
//! (`data-purpose`/ARIA/structure), generated class names and generic tags last.
//!
//! Markup drift is fixed by adding entries here or in a `selectors_file` override, not by touching the callers.

use std::{collections::BTreeMap, fmt, path::Path};

use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use serde::{Deserialize, Serialize};

use crate::{LectureKind, driver::Selector};

/// Bumped whenever a target is added, removed or changes meaning
pub const SELECTOR_TABLE_VERSION: u32 = 2;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
	TranscriptToggle,
	TranscriptPanel,
	TranscriptCue,
	CueText,
	/// Separate time element inside a cue, when the markup has one
	CueTime,
	/// `<track>` of the player carrying a WebVTT caption file
	CaptionTrack,
	VideoSurface,

	/// Container of the section accordion; section lookups are scoped to it when found
	CurriculumRoot,
	/// Every section panel, in document order
	SectionPanels,
	/// One panel by position; entries are `{index}`/`{ordinal}` templates
	SectionPanel,
	SectionToggle,
	SectionTitle,
	SectionContent,
	LectureRow,
	LectureTitle,
	LectureDuration,
	LectureClickable,
	LectureIcon,

	/// Present and displayed while the lecture list is navigable
	ListVisible,
	VideoLandmark,
	DocumentLandmark,
	QuizLandmark,
	ResourceLandmark,

	MyLearningLink,
	SearchInput,
	SearchButton,
	CourseCard,
	CourseTitle,
	CourseLink,
	Loader,
	LoginIndicator,
	LoginButton,
	EmailInput,
	EmailSubmit,
}

impl Target {
	/// Targets that are only useful when they can be interacted with
	pub fn requires_enabled(self) -> bool {
		use Target::*;
		matches!(
			self,
			TranscriptToggle | SectionToggle | LectureClickable | MyLearningLink | SearchInput | SearchButton | LoginButton | EmailInput | EmailSubmit
		)
	}

	/// Targets inspected for presence or text only; a collapsed or off-screen match still counts
	pub fn accepts_hidden(self) -> bool {
		use Target::*;
		matches!(self, SectionPanels | SectionContent | LectureRow | LectureTitle | LectureDuration | LectureIcon | CueText | CueTime | CaptionTrack | TranscriptCue | SectionTitle | CourseTitle | Loader)
	}
}

impl fmt::Display for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = serde_json::to_value(self).ok().and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_else(|| format!("{self:?}"));
		write!(f, "{s}")
	}
}

/// Case-insensitive substring that marks a lecture kind
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KindMarker {
	pub pattern: String,
	pub kind: LectureKind,
}

impl KindMarker {
	fn new(pattern: &str, kind: LectureKind) -> Self {
		Self {
			pattern: pattern.to_lowercase(),
			kind,
		}
	}
}

/// Attribute value marking the lecture row that is currently open
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateMarker {
	pub attribute: String,
	/// Matched case-insensitively as a substring of any whitespace-separated token of the attribute
	pub value: String,
}

impl StateMarker {
	fn new(attribute: &str, value: &str) -> Self {
		Self {
			attribute: attribute.to_string(),
			value: value.to_lowercase(),
		}
	}
}

/// Whether `value`, read from `attribute`, carries one of the markers
pub fn matches_state(markers: &[StateMarker], attribute: &str, value: &str) -> bool {
	let value = value.to_lowercase();
	markers
		.iter()
		.filter(|m| m.attribute == attribute && !m.value.is_empty())
		.any(|m| value.split_whitespace().any(|token| token.contains(&m.value)))
}

/// First marker whose pattern occurs in `haystack`
pub fn match_marker(markers: &[KindMarker], haystack: &str) -> Option<LectureKind> {
	let haystack = haystack.to_lowercase();
	markers.iter().find(|m| !m.pattern.is_empty() && haystack.contains(&m.pattern)).map(|m| m.kind)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SelectorTable {
	pub version: u32,
	#[serde(default)]
	pub targets: BTreeMap<Target, Vec<Selector>>,
	/// Matched against icon `href`/`xlink:href`/`aria-label` and the row's `data-purpose`
	#[serde(default)]
	pub icon_markers: Vec<KindMarker>,
	/// Matched against the loaded page URL
	#[serde(default)]
	pub url_markers: Vec<KindMarker>,
	/// Matched against the loaded page title
	#[serde(default)]
	pub title_markers: Vec<KindMarker>,
	/// Read from a lecture row to tell whether it is the one playing
	#[serde(default)]
	pub current_markers: Vec<StateMarker>,
}

impl SelectorTable {
	pub fn get(&self, target: Target) -> &[Selector] {
		self.targets.get(&target).map(Vec::as_slice).unwrap_or(&[])
	}

	/// Attributes named by `current_markers`, each once, in marker order
	pub fn current_attributes(&self) -> Vec<&str> {
		let mut attributes: Vec<&str> = Vec::new();
		for m in &self.current_markers {
			if !attributes.contains(&m.attribute.as_str()) {
				attributes.push(&m.attribute);
			}
		}
		attributes
	}

	/// Defaults extended by a JSON override file; the file's entries are tried first.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path).map_err(|e| eyre!("Failed to read selector file {}: {}", path.display(), e))?;
		let overrides: SelectorTable = serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse selector file {}: {}", path.display(), e))?;
		Self::default().merged_with(overrides)
	}

	pub fn merged_with(mut self, overrides: SelectorTable) -> Result<Self> {
		if overrides.version < self.version {
			bail!("Selector overrides target table version {}, but this build uses version {}", overrides.version, self.version);
		}

		for (target, mut preferred) in overrides.targets {
			let defaults = self.targets.remove(&target).unwrap_or_default();
			for s in defaults {
				if !preferred.contains(&s) {
					preferred.push(s);
				}
			}
			self.targets.insert(target, preferred);
		}
		prepend_markers(&mut self.icon_markers, overrides.icon_markers);
		prepend_markers(&mut self.url_markers, overrides.url_markers);
		prepend_markers(&mut self.title_markers, overrides.title_markers);

		let mut current: Vec<StateMarker> = overrides.current_markers.iter().map(|m| StateMarker::new(&m.attribute, &m.value)).collect();
		current.extend(self.current_markers.drain(..).filter(|m| !overrides.current_markers.contains(m)));
		self.current_markers = current;
		Ok(self)
	}
}

fn prepend_markers(existing: &mut Vec<KindMarker>, mut preferred: Vec<KindMarker>) {
	for m in preferred.iter_mut() {
		m.pattern = m.pattern.to_lowercase();
	}
	preferred.extend(existing.drain(..));
	*existing = preferred;
}

impl Default for SelectorTable {
	fn default() -> Self {
		use LectureKind::*;
		use Target::*;

		let mut targets = BTreeMap::new();
		let mut add = |target: Target, list: &[&str]| {
			targets.insert(target, list.iter().map(|s| Selector::parse(s)).collect::<Vec<_>>());
		};

		add(TranscriptToggle, &[
			"button[data-purpose='transcript-toggle']",
			"button[aria-label='Transcript']",
			"button[aria-label*='ranscript']",
			"button[aria-label='대본']",
			".transcript-toggle",
			"//button[contains(@aria-label, 'ranscript')]",
		]);
		add(TranscriptPanel, &[
			"[data-purpose='transcript-panel']",
			"div[class*='transcript--transcript-panel']",
			".transcript-panel",
			".captions-panel",
		]);
		add(TranscriptCue, &["[data-purpose='transcript-cue']", "div[class*='transcript--cue-container']", ".transcript-cue", ".caption-cue"]);
		add(CueText, &["[data-purpose='cue-text']", "span[class*='transcript--cue-text']", ".cue-text", ".caption-text"]);
		add(CueTime, &["[data-purpose='cue-time']", "span[class*='transcript--cue-time']", ".cue-time", ".cue-timestamp"]);
		add(CaptionTrack, &["video track[kind='captions']", "video track[kind='subtitles']", "track[kind='captions']", "track[kind='subtitles']"]);
		add(VideoSurface, &[
			"[data-purpose='video-player']",
			"div[class*='video-player--container']",
			".video-player",
			"video",
			".vjs-tech",
			".player-container",
			".lecture-view",
		]);

		add(CurriculumRoot, &[
			"[data-purpose='curriculum-section-container']",
			"[data-purpose='sidebar']",
			"div[class*='curriculum-sidebar']",
			".curriculum-section-container",
		]);
		add(SectionPanels, &["div[data-purpose^='section-panel-']", "[data-purpose='section-panel']", ".curriculum-section"]);
		add(SectionPanel, &[
			"div[data-purpose='section-panel-{index}']",
			"div[data-purpose='section-panel-{ordinal}']",
			"[data-purpose='curriculum-section-container'] > div:nth-child({ordinal})",
			".curriculum-section:nth-child({ordinal})",
		]);
		add(SectionToggle, &[
			"button.js-panel-toggler",
			"button[data-purpose='section-header-button']",
			".section-header button",
			"button[aria-expanded]",
			"[role='button'][aria-expanded]",
			"button",
		]);
		add(SectionTitle, &[
			"[data-purpose='section-heading'] .ud-accordion-panel-title",
			"span.ud-accordion-panel-title",
			"[data-purpose='section-title']",
			".section-title",
			"h3",
			"h2",
		]);
		add(SectionContent, &["[data-purpose='section-content']", "div[class*='accordion-panel-module--content']", "ul.ud-unstyled-list", ".section-content", "ul"]);
		add(LectureRow, &["[data-purpose^='curriculum-item-']", ".curriculum-item-link", ".lecture-item", "li"]);
		add(LectureTitle, &["span[data-purpose='item-title']", "[data-purpose='item-title']", ".curriculum-item-title", ".item-title", "span[class*='title']"]);
		add(LectureDuration, &["[data-purpose='item-duration']", ".curriculum-item-duration", ".duration", "span[class*='duration']"]);
		add(LectureClickable, &["div[class*='item-link']", ".item-link", "a[href*='lecture']", "[role='link']", "a"]);
		add(LectureIcon, &["svg use", "use", "svg[aria-label]"]);

		add(ListVisible, &[
			"[data-purpose='curriculum-section-container']",
			"div[data-purpose^='section-panel-']",
			".curriculum-section",
			"[data-purpose^='curriculum-item-']",
			".curriculum-item-link",
		]);
		add(VideoLandmark, &[
			"video",
			".ud-video-player",
			".video-js",
			".vjs-poster",
			"[data-purpose='video-player']",
			"[data-purpose*='video']",
			".lecture-video",
			".player-wrapper",
		]);
		add(DocumentLandmark, &[
			"[data-purpose='lecture-content']",
			".article-content",
			".lecture-content",
			".text-content",
			".ud-component--course-taking--lecture-view",
			".lecture-view",
		]);
		add(QuizLandmark, &[
			"[data-purpose='quiz']",
			"[data-purpose='practice-test']",
			".quiz-container",
			".practice-test",
			".assignment-container",
			".ud-component--course-taking--quiz",
			".course-taking-quiz",
		]);
		add(ResourceLandmark, &["[data-purpose='resource']", ".resource-list", ".download-link", ".external-link", ".ud-component--course-taking--resource"]);

		add(MyLearningLink, &[
			"a[href='/home/my-courses/'][data-testid='my-courses']",
			"a[data-testid='my-courses']",
			"a[href='/home/my-courses/']",
			"[data-purpose='my-learning-nav']",
			"//a[contains(text(), 'My learning')]",
			"//a[contains(@href, '/home/my-courses')]",
			".header-my-learning",
			"a[href*='my-courses']",
		]);
		add(SearchInput, &[
			"input[placeholder='Search my courses']",
			"input[placeholder='내 강의 검색']",
			"form[class*='search-my-courses'] input",
			".search-my-courses-field input",
			"input[placeholder*='Search']",
			".autosuggest-input",
			"input[type='text'][role='combobox']",
		]);
		add(SearchButton, &[
			".search-my-courses-field button[type='submit']",
			"form[class*='search-my-courses'] button[type='submit']",
			"button[type='submit'].ud-btn-primary.ud-btn-icon",
			"button[type='submit'].ud-btn-primary",
			"button[type='submit']",
		]);
		add(CourseCard, &[
			"[data-purpose='enrolled-course-card']",
			"[data-purpose='course-card']",
			".card-component",
			".course-card",
			".my-course-card",
			".enrolled-course-card",
			".course-item",
		]);
		add(CourseTitle, &["[data-purpose='course-title-url']", "[data-purpose='course-title']", "h3", "h2", "h4", ".course-title", ".card-title", ".title"]);
		add(CourseLink, &["a[href*='/course/']", "[data-purpose='course-title-url'] a", "a"]);
		add(Loader, &["[data-purpose='loader']", ".loading", ".spinner"]);
		add(LoginIndicator, &[
			"a[href*='/home/my-courses']",
			"[data-purpose='my-learning-nav']",
			"[class*='user-avatar']",
			"[class*='user-menu']",
			"//a[contains(text(), 'My learning')]",
			"//a[contains(text(), '내 학습')]",
		]);
		add(LoginButton, &[
			"[data-purpose='header-login']",
			"a[href*='login-popup']",
			"//a[contains(text(), 'Log in')]",
			"//button[contains(text(), 'Log in')]",
			".login-button",
			".header-login",
			"a[href*='login']",
		]);
		add(EmailInput, &["#id_email", "input[name='email']", "input[type='email']"]);
		add(EmailSubmit, &["#submit-id-submit", "button[type='submit']", "input[type='submit']"]);

		let markers = |list: &[(&str, LectureKind)]| list.iter().map(|(p, k)| KindMarker::new(p, *k)).collect::<Vec<_>>();

		Self {
			version: SELECTOR_TABLE_VERSION,
			targets,
			icon_markers: markers(&[
				("icon-video", Video),
				("icon-play", Video),
				("icon-article", Document),
				("icon-file", Document),
				("icon-text", Document),
				("icon-quiz", Quiz),
				("icon-assignment", Quiz),
				("icon-code", Quiz),
				("icon-practice", Quiz),
				("icon-download", Resource),
				("icon-resource", Resource),
				("icon-link", Resource),
				("quiz", Quiz),
				("practice", Quiz),
				("assignment", Quiz),
				("coding-exercise", Quiz),
				("article", Document),
				("video", Video),
			]),
			url_markers: markers(&[("/quiz/", Quiz), ("/practice", Quiz), ("/assignment", Quiz), ("/coding-exercise", Quiz), ("/resource", Resource)]),
			title_markers: markers(&[
				("quiz", Quiz),
				("practice test", Quiz),
				("assignment", Quiz),
				("article", Document),
				("reading", Document),
			]),
			current_markers: vec![
				StateMarker::new("aria-current", "true"),
				StateMarker::new("aria-current", "page"),
				StateMarker::new("class", "is-current"),
			],
		}
	}
}
