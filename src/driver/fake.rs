//! Scripted in-memory site used by the tests.
//!
//! State is re-rendered to HTML after every mutation and queried with `scraper`. Every element is identified by its
//! `data-k` attribute (or its tree position when it has none); a handle stays valid only while that element remains
//! continuously mounted, which is how stale references show up here.

use std::{
	collections::{HashMap, HashSet},
	sync::Mutex,
};

use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use scraper::{ElementRef, Html};

use super::{Driver, ScrollMetrics, Selector};
use crate::LectureKind;

pub const ROW_HEIGHT: f64 = 20.0;
pub const COURSE_URL: &str = "https://www.udemy.com/course/fake-course/learn/";

#[derive(Clone, Debug)]
pub struct Page {
	pub url: String,
	pub title: String,
	pub body: String,
}

impl Page {
	pub fn new(url: &str, title: &str, body: &str) -> Self {
		Self {
			url: url.to_string(),
			title: title.to_string(),
			body: body.to_string(),
		}
	}
}

#[derive(Clone, Debug)]
pub struct FakeCue {
	pub start: Option<f64>,
	pub text: String,
	/// Rendered as a separate time element ahead of the text
	pub stamp: Option<String>,
}

impl FakeCue {
	pub fn new(start: Option<f64>, text: &str) -> Self {
		Self {
			start,
			text: text.to_string(),
			stamp: None,
		}
	}

	pub fn stamp(mut self, clock: &str) -> Self {
		self.stamp = Some(clock.to_string());
		self
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptMode {
	/// Every cue is in the DOM
	Full,
	/// Only this many rows are rendered, following the scroll position
	Windowed(usize),
	/// Like `Windowed`, but nothing renders until the panel is scrolled once
	Lazy(usize),
	/// The panel opens without any cues
	Empty,
	/// No transcript toggle at all
	Absent,
}

#[derive(Clone, Debug)]
pub struct FakeLecture {
	pub title: String,
	pub duration: String,
	pub kind: LectureKind,
	/// Icon href rendered in the row; empty renders no icon
	pub icon: String,
	pub cues: Vec<FakeCue>,
	pub transcript: TranscriptMode,
	/// WebVTT served for the player's caption track
	pub captions: Option<String>,
}

impl FakeLecture {
	fn new(title: &str, kind: LectureKind, icon: &str) -> Self {
		Self {
			title: title.to_string(),
			duration: "5min".to_string(),
			kind,
			icon: icon.to_string(),
			cues: Vec::new(),
			transcript: TranscriptMode::Full,
			captions: None,
		}
	}

	/// Cues start every 5 seconds
	pub fn video(title: &str, cues: &[&str]) -> Self {
		let mut lecture = Self::new(title, LectureKind::Video, "#icon-video");
		lecture.cues = cues.iter().enumerate().map(|(i, t)| FakeCue::new(Some(i as f64 * 5.0), t)).collect();
		lecture
	}

	pub fn document(title: &str) -> Self {
		Self::new(title, LectureKind::Document, "#icon-article")
	}

	pub fn quiz(title: &str) -> Self {
		Self::new(title, LectureKind::Quiz, "#icon-quiz")
	}

	pub fn resource(title: &str) -> Self {
		Self::new(title, LectureKind::Resource, "#icon-download")
	}

	pub fn transcript(mut self, mode: TranscriptMode) -> Self {
		self.transcript = mode;
		self
	}

	pub fn icon(mut self, icon: &str) -> Self {
		self.icon = icon.to_string();
		self
	}

	pub fn cues(mut self, cues: Vec<FakeCue>) -> Self {
		self.cues = cues;
		self
	}

	pub fn captions(mut self, vtt: &str) -> Self {
		self.captions = Some(vtt.to_string());
		self
	}
}

#[derive(Clone, Debug)]
pub struct FakeSection {
	pub title: String,
	pub lectures: Vec<FakeLecture>,
	/// When false the accordion flips `aria-expanded` but never renders its rows
	pub renders_content: bool,
}

impl FakeSection {
	pub fn new(title: &str, lectures: Vec<FakeLecture>) -> Self {
		Self {
			title: title.to_string(),
			lectures,
			renders_content: true,
		}
	}

	pub fn never_renders(mut self) -> Self {
		self.renders_content = false;
		self
	}
}

/// Misbehaviours for exercising fallbacks
#[derive(Clone, Copy, Debug, Default)]
pub struct Quirks {
	pub pointer_click_fails: bool,
	pub direct_click_inert: bool,
	/// Section toggles lack `aria-expanded`
	pub no_expanded_attr: bool,
	/// The playing row carries this class instead of `aria-current`
	pub current_class: Option<&'static str>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FakeHandle {
	pub key: String,
	pub epoch: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Stats {
	pub transcript_opens: usize,
	pub transcript_closes: usize,
	pub lecture_clicks: Vec<(usize, usize)>,
	pub section_clicks: Vec<usize>,
	/// Which click path took effect, in order
	pub strategies: Vec<&'static str>,
	pub typed: HashMap<String, String>,
	pub enter_presses: usize,
	pub scrolls: usize,
	pub visited: Vec<String>,
	pub fetched: Vec<String>,
}

struct CourseState {
	sections: Vec<FakeSection>,
	expanded: Vec<bool>,
	current: Option<(usize, usize)>,
	transcript_open: bool,
	panel_top: f64,
	scrolled: bool,
	navigations: u64,
	video_hovered: bool,
}

impl CourseState {
	fn lecture(&self) -> Option<&FakeLecture> {
		let (s, l) = self.current?;
		self.sections.get(s)?.lectures.get(l)
	}

	fn visible_cues(&self) -> std::ops::Range<usize> {
		let Some(lecture) = self.lecture() else {
			return 0..0;
		};
		let n = lecture.cues.len();
		let window = |rows: usize| {
			let first = ((self.panel_top / ROW_HEIGHT).floor() as usize).min(n);
			first..(first + rows).min(n)
		};
		match lecture.transcript {
			TranscriptMode::Full => 0..n,
			TranscriptMode::Windowed(rows) => window(rows),
			TranscriptMode::Lazy(rows) if self.scrolled => window(rows),
			TranscriptMode::Lazy(_) | TranscriptMode::Empty | TranscriptMode::Absent => 0..0,
		}
	}

	fn panel_metrics(&self) -> ScrollMetrics {
		let Some(lecture) = self.lecture() else {
			return ScrollMetrics::default();
		};
		let total = lecture.cues.len() as f64 * ROW_HEIGHT;
		let client = match lecture.transcript {
			TranscriptMode::Windowed(rows) | TranscriptMode::Lazy(rows) => rows as f64 * ROW_HEIGHT,
			_ => total,
		};
		ScrollMetrics {
			top: self.panel_top,
			client_height: client.min(total),
			scroll_height: total,
		}
	}

	fn url(&self) -> String {
		match (self.current, self.lecture()) {
			(Some((s, l)), Some(lecture)) => {
				let id = 1000 + s * 100 + l;
				match lecture.kind {
					LectureKind::Quiz => format!("{COURSE_URL}quiz/{id}"),
					_ => format!("{COURSE_URL}lecture/{id}"),
				}
			}
			_ => COURSE_URL.to_string(),
		}
	}

	fn caption_src(section: usize, lecture: usize) -> String {
		format!("/captions/{}.vtt", 1000 + section * 100 + lecture)
	}

	fn captions_at(&self, url: &str) -> Option<String> {
		self.sections.iter().enumerate().find_map(|(s, section)| {
			section.lectures.iter().enumerate().find_map(|(l, lecture)| lecture.captions.clone().filter(|_| Self::caption_src(s, l) == url))
		})
	}

	fn title(&self) -> String {
		match self.lecture() {
			Some(lecture) => format!("{} | Fake Course", lecture.title),
			None => "Fake Course | Udemy".to_string(),
		}
	}

	fn render(&self, quirks: &Quirks) -> String {
		let nav = self.navigations;
		let mut h = String::new();
		let sidebar_hidden = if self.transcript_open { " hidden" } else { "" };
		h.push_str(&format!(r#"<div data-k="sidebar" data-purpose="sidebar"{sidebar_hidden}><div data-k="curr" data-purpose="curriculum-section-container">"#));
		for (i, section) in self.sections.iter().enumerate() {
			let expanded = self.expanded[i];
			let aria = if quirks.no_expanded_attr { String::new() } else { format!(r#" aria-expanded="{expanded}""#) };
			h.push_str(&format!(
				r#"<div data-k="sec-{i}" data-purpose="section-panel-{i}"><div data-k="sec-{i}-head" data-purpose="section-heading"><button data-k="sec-{i}-toggle" type="button" class="js-panel-toggler"{aria} data-action="section:{i}"><span data-k="sec-{i}-title" class="ud-accordion-panel-title">{}</span></button></div>"#,
				esc(&section.title)
			));
			if expanded && section.renders_content {
				h.push_str(&format!(r#"<div data-k="sec-{i}-content-{nav}" data-purpose="section-content"><ul data-k="sec-{i}-list-{nav}" class="ud-unstyled-list">"#));
				for (j, lecture) in section.lectures.iter().enumerate() {
					let current = self.current == Some((i, j));
					let marker = match quirks.current_class {
						Some(class) if current => format!(r#" class="{class}""#),
						Some(_) => String::new(),
						None => format!(r#" aria-current="{current}""#),
					};
					let k = format!("row-{i}-{j}-{nav}");
					let icon = if lecture.icon.is_empty() {
						String::new()
					} else {
						format!(r#"<svg data-k="{k}-svg"><use data-k="{k}-icon" href="{}"></use></svg>"#, esc(&lecture.icon))
					};
					h.push_str(&format!(
						r#"<li data-k="{k}" data-purpose="curriculum-item-{i}-{j}"{marker}><div data-k="{k}-link" class="item-link" data-action="lecture:{i}:{j}">{icon}<span data-k="{k}-title" data-purpose="item-title">{}</span><span data-k="{k}-dur" class="curriculum-item-duration">{}</span></div></li>"#,
						esc(&lecture.title),
						esc(&lecture.duration)
					));
				}
				h.push_str("</ul></div>");
			}
			h.push_str("</div>");
		}
		h.push_str("</div></div>");

		if let Some(lecture) = self.lecture() {
			h.push_str(&format!(r#"<div data-k="viewer-{nav}" class="lecture-viewer">"#));
			match lecture.kind {
				LectureKind::Video | LectureKind::Unknown => {
					let track = match (&lecture.captions, self.current) {
						(Some(_), Some((s, l))) => format!(r#"<track data-k="track-{nav}" kind="captions" src="{}">"#, Self::caption_src(s, l)),
						_ => String::new(),
					};
					h.push_str(&format!(r#"<div data-k="player-{nav}" data-purpose="video-player"><video data-k="video-{nav}">{track}</video>"#));
					if self.video_hovered && lecture.transcript != TranscriptMode::Absent {
						h.push_str(&format!(
							r#"<div data-k="controls-{nav}" class="control-bar"><button data-k="ttoggle" data-purpose="transcript-toggle" aria-expanded="{}" data-action="transcript">Transcript</button></div>"#,
							self.transcript_open
						));
					}
					h.push_str("</div>");
				}
				LectureKind::Document => h.push_str(&format!(r#"<div data-k="article-{nav}" data-purpose="lecture-content" class="article-content">Reading material</div>"#)),
				LectureKind::Quiz => h.push_str(&format!(r#"<div data-k="quiz-{nav}" data-purpose="quiz">Question 1</div>"#)),
				LectureKind::Resource => h.push_str(&format!(r#"<div data-k="res-{nav}" data-purpose="resource">Download</div>"#)),
			}
			h.push_str("</div>");

			if self.transcript_open {
				h.push_str(r#"<div data-k="tpanel" data-purpose="transcript-panel">"#);
				for idx in self.visible_cues() {
					let cue = &lecture.cues[idx];
					let start = cue.start.map(|s| format!(r#" data-start="{s}""#)).unwrap_or_default();
					let stamp = cue.stamp.as_ref().map(|c| format!(r#"<span data-k="cue-{idx}-time" data-purpose="cue-time">{}</span>"#, esc(c))).unwrap_or_default();
					h.push_str(&format!(
						r#"<div data-k="cue-{idx}" data-purpose="transcript-cue"{start}>{stamp}<span data-k="cue-{idx}-text" data-purpose="cue-text">{}</span></div>"#,
						esc(&cue.text)
					));
				}
				h.push_str("</div>");
			}
		}
		h
	}
}

enum Mode {
	Pages { pages: Vec<Page>, current: usize },
	Course(CourseState),
}

struct State {
	mode: Mode,
	quirks: Quirks,
	html: String,
	mounted: HashMap<String, u64>,
	next_epoch: u64,
	cookies: Vec<serde_json::Value>,
	focused: Option<String>,
	stats: Stats,
}

impl State {
	fn url(&self) -> String {
		match &self.mode {
			Mode::Pages { pages, current } => pages[*current].url.clone(),
			Mode::Course(c) => c.url(),
		}
	}

	fn title(&self) -> String {
		match &self.mode {
			Mode::Pages { pages, current } => pages[*current].title.clone(),
			Mode::Course(c) => c.title(),
		}
	}

	fn rerender(&mut self) {
		let body = match &self.mode {
			Mode::Pages { pages, current } => pages[*current].body.clone(),
			Mode::Course(c) => c.render(&self.quirks),
		};
		self.html = format!("<html><head><title>{}</title></head><body>{body}</body></html>", esc(&self.title()));

		let doc = Html::parse_document(&self.html);
		let present: HashSet<String> = doc.root_element().descendants().filter_map(ElementRef::wrap).map(|el| key_of(&el)).collect();
		self.mounted.retain(|k, _| present.contains(k));
		for key in present {
			if !self.mounted.contains_key(&key) {
				self.next_epoch += 1;
				self.mounted.insert(key, self.next_epoch);
			}
		}
	}

	fn check(&self, h: &FakeHandle) -> Result<()> {
		match self.mounted.get(&h.key) {
			Some(epoch) if *epoch == h.epoch => Ok(()),
			_ => bail!("stale element reference: {}", h.key),
		}
	}

	fn with_el<T>(&self, h: &FakeHandle, f: impl FnOnce(ElementRef) -> T) -> Result<T> {
		self.check(h)?;
		let doc = Html::parse_document(&self.html);
		let el = locate(&doc, &h.key).ok_or_else(|| eyre!("stale element reference: {}", h.key))?;
		Ok(f(el))
	}

	fn handle(&self, el: &ElementRef) -> Option<FakeHandle> {
		let key = key_of(el);
		self.mounted.get(&key).map(|epoch| FakeHandle { key, epoch: *epoch })
	}

	/// Runs the closest `data-action` at or above the element
	fn dispatch(&mut self, h: &FakeHandle) -> Result<()> {
		let action = self.with_el(h, |el| std::iter::once(el).chain(el.ancestors().filter_map(ElementRef::wrap)).find_map(|e| e.value().attr("data-action").map(str::to_owned)))?;
		let Some(action) = action else {
			return Ok(());
		};
		let (verb, arg) = action.split_once(':').unwrap_or((action.as_str(), ""));

		match (&mut self.mode, verb) {
			(Mode::Course(c), "section") => {
				let i: usize = arg.parse()?;
				c.expanded[i] = !c.expanded[i];
				self.stats.section_clicks.push(i);
			}
			(Mode::Course(c), "lecture") => {
				let (s, l) = arg.split_once(':').ok_or_else(|| eyre!("bad lecture action"))?;
				let (s, l) = (s.parse()?, l.parse()?);
				c.current = Some((s, l));
				c.navigations += 1;
				c.video_hovered = false;
				c.panel_top = 0.0;
				c.scrolled = false;
				self.stats.lecture_clicks.push((s, l));
			}
			(Mode::Course(c), "transcript") => {
				if c.transcript_open {
					self.stats.transcript_closes += 1;
				} else {
					self.stats.transcript_opens += 1;
				}
				c.transcript_open = !c.transcript_open;
				c.panel_top = 0.0;
				c.scrolled = false;
			}
			(Mode::Pages { pages, current }, "goto") => {
				if let Some(i) = pages.iter().position(|p| p.url == arg) {
					*current = i;
				}
				self.stats.visited.push(arg.to_string());
			}
			_ => {}
		}
		self.rerender();
		Ok(())
	}

	fn set_hover(&mut self, h: &FakeHandle) -> Result<()> {
		let over_player = self.with_el(h, |el| {
			std::iter::once(el)
				.chain(el.ancestors().filter_map(ElementRef::wrap))
				.any(|e| e.value().attr("data-purpose") == Some("video-player"))
		})?;
		if let Mode::Course(c) = &mut self.mode {
			if c.video_hovered != over_player {
				c.video_hovered = over_player;
				self.rerender();
			}
		}
		Ok(())
	}
}

pub struct FakeSite {
	state: Mutex<State>,
}

impl FakeSite {
	fn from_mode(mode: Mode) -> Self {
		let mut state = State {
			mode,
			quirks: Quirks::default(),
			html: String::new(),
			mounted: HashMap::new(),
			next_epoch: 0,
			cookies: Vec::new(),
			focused: None,
			stats: Stats::default(),
		};
		state.rerender();
		Self { state: Mutex::new(state) }
	}

	pub fn static_page(page: Page) -> Self {
		Self::pages(vec![page])
	}

	/// Several static pages; `goto` and `data-action="goto:<url>"` switch between them
	pub fn pages(pages: Vec<Page>) -> Self {
		assert!(!pages.is_empty());
		Self::from_mode(Mode::Pages { pages, current: 0 })
	}

	pub fn course(sections: Vec<FakeSection>) -> Self {
		let expanded = vec![false; sections.len()];
		Self::from_mode(Mode::Course(CourseState {
			sections,
			expanded,
			current: None,
			transcript_open: false,
			panel_top: 0.0,
			scrolled: false,
			navigations: 0,
			video_hovered: false,
		}))
	}

	pub fn with_quirks(self, quirks: Quirks) -> Self {
		{
			let mut s = self.state.lock().unwrap();
			s.quirks = quirks;
			s.rerender();
		}
		self
	}

	pub fn stats(&self) -> Stats {
		self.state.lock().unwrap().stats.clone()
	}

	pub fn html(&self) -> String {
		self.state.lock().unwrap().html.clone()
	}

	pub fn stored_cookies(&self) -> Vec<serde_json::Value> {
		self.state.lock().unwrap().cookies.clone()
	}

	pub fn transcript_open(&self) -> bool {
		match &self.state.lock().unwrap().mode {
			Mode::Course(c) => c.transcript_open,
			Mode::Pages { .. } => false,
		}
	}

	pub fn expanded(&self, section: usize) -> bool {
		match &self.state.lock().unwrap().mode {
			Mode::Course(c) => c.expanded[section],
			Mode::Pages { .. } => false,
		}
	}

	/// Puts the site into a state as if the user had already done this
	pub fn open_section(&self, section: usize) {
		let mut s = self.state.lock().unwrap();
		if let Mode::Course(c) = &mut s.mode {
			c.expanded[section] = true;
		}
		s.rerender();
	}

	pub fn enter_lecture(&self, section: usize, lecture: usize) {
		let mut s = self.state.lock().unwrap();
		if let Mode::Course(c) = &mut s.mode {
			c.current = Some((section, lecture));
			c.navigations += 1;
		}
		s.rerender();
	}
}

fn key_of(el: &ElementRef) -> String {
	el.value().attr("data-k").map(str::to_owned).unwrap_or_else(|| format!("node{:?}", el.id()))
}

fn locate<'a>(doc: &'a Html, key: &str) -> Option<ElementRef<'a>> {
	doc.root_element().descendants().filter_map(ElementRef::wrap).find(|el| key_of(el) == key)
}

fn esc(s: &str) -> String {
	s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

impl Driver for FakeSite {
	type Handle = FakeHandle;

	async fn goto(&self, url: &str) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.stats.visited.push(url.to_string());
		match &mut s.mode {
			Mode::Pages { pages, current } =>
				if let Some(i) = pages.iter().position(|p| p.url == url) {
					*current = i;
				},
			Mode::Course(c) =>
				if url.trim_end_matches('/') == COURSE_URL.trim_end_matches('/') {
					c.current = None;
					c.transcript_open = false;
					c.navigations += 1;
				},
		}
		s.rerender();
		Ok(())
	}

	async fn current_url(&self) -> Result<String> {
		Ok(self.state.lock().unwrap().url())
	}

	async fn title(&self) -> Result<String> {
		Ok(self.state.lock().unwrap().title())
	}

	async fn query_all(&self, scope: Option<&FakeHandle>, selector: &Selector) -> Result<Vec<FakeHandle>> {
		let Selector::Css(css) = selector else {
			return Ok(Vec::new());
		};
		let parsed = scraper::Selector::parse(css).map_err(|e| eyre!("invalid selector {css}: {e:?}"))?;
		let s = self.state.lock().unwrap();
		let doc = Html::parse_document(&s.html);
		let found: Vec<FakeHandle> = match scope {
			Some(h) => {
				s.check(h)?;
				let root = locate(&doc, &h.key).ok_or_else(|| eyre!("stale element reference: {}", h.key))?;
				root.select(&parsed).filter_map(|el| s.handle(&el)).collect()
			}
			None => doc.select(&parsed).filter_map(|el| s.handle(&el)).collect(),
		};
		Ok(found)
	}

	async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
		Ok(serde_json::Value::Null)
	}

	async fn page_source(&self) -> Result<String> {
		Ok(self.html())
	}

	async fn fetch_text(&self, url: &str) -> Result<String> {
		let mut s = self.state.lock().unwrap();
		s.stats.fetched.push(url.to_string());
		let body = match &s.mode {
			Mode::Course(c) => c.captions_at(url),
			Mode::Pages { .. } => None,
		};
		body.ok_or_else(|| eyre!("HTTP 404 for {url}"))
	}

	async fn is_displayed(&self, el: &FakeHandle) -> Result<bool> {
		self.state.lock().unwrap().with_el(el, |el| {
			!std::iter::once(el).chain(el.ancestors().filter_map(ElementRef::wrap)).any(|e| {
				let style = e.value().attr("style").unwrap_or_default().replace(' ', "");
				e.value().attr("hidden").is_some() || style.contains("display:none")
			})
		})
	}

	async fn is_enabled(&self, el: &FakeHandle) -> Result<bool> {
		self.state.lock().unwrap().with_el(el, |el| el.value().attr("disabled").is_none())
	}

	async fn attribute(&self, el: &FakeHandle, name: &str) -> Result<Option<String>> {
		self.state.lock().unwrap().with_el(el, |el| el.value().attr(name).map(str::to_owned))
	}

	async fn text(&self, el: &FakeHandle) -> Result<String> {
		self.state.lock().unwrap().with_el(el, |el| el.text().collect::<String>())
	}

	async fn scroll_into_view(&self, el: &FakeHandle) -> Result<()> {
		self.state.lock().unwrap().check(el)
	}

	async fn hover(&self, el: &FakeHandle) -> Result<()> {
		self.state.lock().unwrap().set_hover(el)
	}

	async fn pointer_click(&self, el: &FakeHandle) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		if s.quirks.pointer_click_fails {
			bail!("element click intercepted: {}", el.key);
		}
		s.set_hover(el)?;
		s.dispatch(el)?;
		s.stats.strategies.push("pointer");
		Ok(())
	}

	async fn click(&self, el: &FakeHandle) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		if s.quirks.direct_click_inert {
			s.stats.strategies.push("direct-inert");
			return Ok(());
		}
		s.dispatch(el)?;
		s.stats.strategies.push("direct");
		Ok(())
	}

	async fn script_click(&self, el: &FakeHandle) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.dispatch(el)?;
		s.stats.strategies.push("script");
		Ok(())
	}

	async fn focus(&self, el: &FakeHandle) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		s.focused = Some(el.key.clone());
		Ok(())
	}

	async fn clear(&self, el: &FakeHandle) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		s.stats.typed.insert(el.key.clone(), String::new());
		Ok(())
	}

	async fn send_keys(&self, el: &FakeHandle, text: &str) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		s.stats.typed.entry(el.key.clone()).or_default().push_str(text);
		Ok(())
	}

	async fn press_enter(&self, el: &FakeHandle) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		s.stats.enter_presses += 1;
		s.dispatch(el)
	}

	async fn scroll_metrics(&self, el: &FakeHandle) -> Result<ScrollMetrics> {
		let s = self.state.lock().unwrap();
		s.check(el)?;
		Ok(match &s.mode {
			Mode::Course(c) if el.key == "tpanel" => c.panel_metrics(),
			_ => ScrollMetrics::default(),
		})
	}

	async fn scroll_to(&self, el: &FakeHandle, top: f64) -> Result<()> {
		let mut s = self.state.lock().unwrap();
		s.check(el)?;
		if let Mode::Course(c) = &mut s.mode {
			if el.key == "tpanel" {
				let m = c.panel_metrics();
				c.panel_top = top.clamp(0.0, (m.scroll_height - m.client_height).max(0.0));
				c.scrolled = true;
			}
		}
		s.stats.scrolls += 1;
		s.rerender();
		Ok(())
	}

	async fn cookies(&self) -> Result<Vec<serde_json::Value>> {
		Ok(self.stored_cookies())
	}

	async fn set_cookie(&self, cookie: &serde_json::Value) -> Result<()> {
		let has = |field: &str| cookie.get(field).and_then(|v| v.as_str()).is_some();
		if !has("name") || !has("value") {
			bail!("invalid cookie: {cookie}");
		}
		self.state.lock().unwrap().cookies.push(cookie.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn handles_go_stale_when_subtree_remounts() {
		let site = FakeSite::course(vec![FakeSection::new("One", vec![FakeLecture::video("A", &["a"]), FakeLecture::video("B", &["b"])])]);
		site.open_section(0);
		let rows = site.query_all(None, &Selector::parse("[data-purpose^='curriculum-item-']")).await.unwrap();
		assert_eq!(rows.len(), 2);

		let link = site.query_all(Some(&rows[0]), &Selector::parse(".item-link")).await.unwrap();
		site.click(&link[0]).await.unwrap();

		assert!(site.text(&rows[1]).await.is_err(), "row captured before navigation must be stale");
		let toggle = site.query_all(None, &Selector::parse("button.js-panel-toggler")).await.unwrap();
		assert_eq!(site.attribute(&toggle[0], "aria-expanded").await.unwrap().as_deref(), Some("true"));
	}

	#[tokio::test]
	async fn transcript_toggle_needs_hover() {
		let site = FakeSite::course(vec![FakeSection::new("One", vec![FakeLecture::video("A", &["a"])])]);
		site.enter_lecture(0, 0);
		let toggle = Selector::parse("[data-purpose='transcript-toggle']");
		assert!(site.query_all(None, &toggle).await.unwrap().is_empty());

		let player = site.query_all(None, &Selector::parse("[data-purpose='video-player']")).await.unwrap();
		site.hover(&player[0]).await.unwrap();
		assert_eq!(site.query_all(None, &toggle).await.unwrap().len(), 1);
	}
}
