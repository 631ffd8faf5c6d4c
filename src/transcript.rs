//! Transcript side-panel: open, harvest cues, close.
//!
//! The toggle lives in the player's control bar and is only rendered while the pointer is over the video, so every
//! lookup hovers the video surface first when the toggle is not already on screen.

use crate::{
	Subtitle,
	config::ExtractionStrategy,
	driver::{Ctx, Driver},
	executor::Executor,
	locator::Locator,
	selectors::Target,
	subtitle::{finalize_cues, parse_timestamp, parse_vtt, split_leading_clock},
	waiter::Waiter,
};

/// Attributes a cue may carry its start offset in, seconds or clock format
const OFFSET_ATTRIBUTES: [&str; 3] = ["data-time", "data-start", "data-timestamp"];
/// Pixels from the end that still count as scrolled to the bottom
const BOTTOM_SLACK: f64 = 2.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PanelOpen {
	AlreadyOpen,
	/// Expanded and showing cues
	Opened,
	/// Expanded, but no cue showed up in time; cues may still render on scroll
	OpenedEmpty,
	/// The lecture offers no transcript toggle
	NoToggle,
	Failed,
}

impl PanelOpen {
	pub fn is_open(self) -> bool {
		matches!(self, PanelOpen::AlreadyOpen | PanelOpen::Opened | PanelOpen::OpenedEmpty)
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PanelClose {
	AlreadyClosed,
	Closed,
	/// Collapsed, but the lecture list did not come back in time
	Partial,
	NoToggle,
	Failed,
}

impl PanelClose {
	/// The panel no longer covers the curriculum, whether or not the list has finished reappearing
	pub fn is_closed(self) -> bool {
		matches!(self, PanelClose::AlreadyClosed | PanelClose::Closed | PanelClose::Partial)
	}
}

pub struct TranscriptExtractor<'a, D: Driver> {
	ctx: Ctx<'a, D>,
}

impl<D: Driver> Clone for TranscriptExtractor<'_, D> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<D: Driver> Copy for TranscriptExtractor<'_, D> {}

impl<'a, D: Driver> TranscriptExtractor<'a, D> {
	pub fn new(ctx: Ctx<'a, D>) -> Self {
		Self { ctx }
	}

	pub async fn open_panel(&self) -> bool {
		self.open().await.is_open()
	}

	pub async fn close_panel(&self) -> bool {
		self.close().await.is_closed()
	}

	/// Clicks the toggle only when it reports collapsed, then waits for the state flip and for cues
	pub async fn open(&self) -> PanelOpen {
		let (ctx, timing) = (self.ctx, self.ctx.timing);
		self.hover_video().await;
		let Some(toggle) = self.toggle().await else {
			ctx.log("No transcript toggle on this lecture");
			return PanelOpen::NoToggle;
		};

		if self.expanded(&toggle).await {
			tracing::debug!("transcript panel already open");
			return PanelOpen::AlreadyOpen;
		}

		let this = *self;
		let clicked = Executor::new(ctx).click_until(&toggle, move || async move { this.is_expanded().await == Some(true) }).await;
		let Some(path) = clicked else {
			ctx.log("Transcript toggle did not respond");
			return PanelOpen::Failed;
		};
		tracing::debug!("transcript toggle opened via {path}");

		if Waiter::new(ctx).for_cues(timing.panel).await {
			PanelOpen::Opened
		} else {
			ctx.log("Transcript panel is open but shows no cues yet");
			PanelOpen::OpenedEmpty
		}
	}

	/// Symmetric to [Self::open]: click only when expanded, wait for the flip, then for the lecture list
	pub async fn close(&self) -> PanelClose {
		let (ctx, timing) = (self.ctx, self.ctx.timing);
		self.hover_video().await;
		let Some(toggle) = self.toggle().await else {
			if Locator::new(ctx).is_present(Target::TranscriptPanel).await {
				ctx.log("Transcript panel is showing but its toggle is gone");
				return PanelClose::NoToggle;
			}
			return PanelClose::AlreadyClosed;
		};

		if !self.expanded(&toggle).await {
			return PanelClose::AlreadyClosed;
		}

		let this = *self;
		let clicked = Executor::new(ctx).click_until(&toggle, move || async move { this.is_expanded().await != Some(true) }).await;
		if clicked.is_none() {
			ctx.log("Transcript panel refused to close");
			return PanelClose::Failed;
		}

		if Waiter::new(ctx).for_list_visible(timing.panel).await {
			PanelClose::Closed
		} else {
			ctx.log("Transcript closed, lecture list still hidden");
			PanelClose::Partial
		}
	}

	/// Cues of the open panel in order, or of the player's caption track when the panel has none.
	/// `None` when neither yields anything.
	pub async fn extract_content(&self) -> Option<Vec<Subtitle>> {
		let cues = match self.collect_panel().await {
			Some(raw) => finalize_cues(raw),
			None => Vec::new(),
		};
		if cues.is_empty() {
			return self.from_caption_track().await;
		}
		self.ctx.log(format!("Collected {} transcript cues", cues.len()));
		Some(cues)
	}

	async fn collect_panel(&self) -> Option<Vec<(Option<f64>, String)>> {
		match self.ctx.timing.strategy {
			ExtractionStrategy::Bulk => self.collect_bulk().await,
			ExtractionStrategy::Scroll => self.collect_by_scrolling().await,
			// a virtualized panel renders only its first window, so cues alone do not mean the bulk pass saw everything
			ExtractionStrategy::Auto => {
				let bulk = self.collect_bulk().await?;
				if bulk.is_empty() || !self.panel_fully_shown().await {
					tracing::debug!("bulk pass saw {} cue(s), scrolling the panel for the rest", bulk.len());
					self.collect_by_scrolling().await
				} else {
					Some(bulk)
				}
			}
		}
	}

	/// Downloads and parses the `<track kind=captions|subtitles>` of the player, with the session's cookies
	pub async fn from_caption_track(&self) -> Option<Vec<Subtitle>> {
		let ctx = self.ctx;
		let track = Locator::new(ctx).find(Target::CaptionTrack).await?;
		let src = ctx.driver.attribute(&track, "src").await.ok().flatten().filter(|s| !s.trim().is_empty())?;
		let body = match ctx.driver.fetch_text(&src).await {
			Ok(body) => body,
			Err(e) => {
				ctx.log(format!("Caption track {src} could not be downloaded: {e}"));
				return None;
			}
		};
		let cues = parse_vtt(&body);
		if cues.is_empty() {
			tracing::debug!("caption track {src} holds no cues");
			return None;
		}
		ctx.log(format!("Read {} cues from the caption track", cues.len()));
		Some(cues)
	}

	/// Every cue currently rendered in the panel, in document order
	pub async fn collect_bulk(&self) -> Option<Vec<(Option<f64>, String)>> {
		let panel = Locator::new(self.ctx).find(Target::TranscriptPanel).await?;
		Some(self.read_cues(&panel).await)
	}

	/// Walks a virtualized panel half a page at a time from the top. Consecutive windows overlap, and only the part of a
	/// window past that overlap is kept, so a line said twice is kept twice.
	///
	/// Stops at the bottom, after `scroll_idle_limit` scrolls in a row that surfaced nothing new, or at `max_scroll_rounds`.
	pub async fn collect_by_scrolling(&self) -> Option<Vec<(Option<f64>, String)>> {
		let (driver, timing) = (self.ctx.driver, self.ctx.timing);
		let locator = Locator::new(self.ctx);
		let panel = locator.find(Target::TranscriptPanel).await?;
		if let Err(e) = driver.scroll_to(&panel, 0.0).await {
			tracing::debug!("could not rewind transcript panel: {e}");
		}

		let mut collected = Vec::new();
		let mut idle_rounds = 0;
		for round in 0..timing.max_scroll_rounds {
			let Some(panel) = locator.find(Target::TranscriptPanel).await else {
				tracing::debug!("transcript panel vanished after {round} scroll round(s)");
				break;
			};

			let fresh = append_window(&mut collected, self.read_cues(&panel).await);

			// the first pass happens before any scroll, so only later ones can be idle
			if round > 0 {
				if fresh == 0 {
					idle_rounds += 1;
					if idle_rounds >= timing.scroll_idle_limit {
						break;
					}
				} else {
					idle_rounds = 0;
				}
			}

			let Ok(metrics) = driver.scroll_metrics(&panel).await else {
				break;
			};
			if metrics.at_bottom(BOTTOM_SLACK) && !collected.is_empty() {
				break;
			}
			if let Err(e) = driver.scroll_to(&panel, metrics.half_page_down()).await {
				tracing::debug!("transcript scroll failed: {e}");
				break;
			}
			self.ctx.pause(timing.scroll_pause).await;
		}
		tracing::debug!("scrolling collected {} cue(s)", collected.len());
		Some(collected)
	}

	async fn read_cues(&self, panel: &D::Handle) -> Vec<(Option<f64>, String)> {
		let mut out = Vec::new();
		for cue in Locator::new(self.ctx).find_all_within(panel, Target::TranscriptCue).await {
			if let Some(read) = self.read_cue(&cue).await {
				out.push(read);
			}
		}
		out
	}

	/// Text from the cue's dedicated text child (or the cue itself). The offset comes from an attribute, a time child, or a
	/// bracketed leading clock, in that order.
	async fn read_cue(&self, cue: &D::Handle) -> Option<(Option<f64>, String)> {
		let driver = self.ctx.driver;
		let locator = Locator::new(self.ctx);
		let stamp = locator.text_within(cue, Target::CueTime, 0).await;
		let text = match locator.text_within(cue, Target::CueText, 0).await {
			Some(text) => text,
			None => {
				let whole = driver.text(cue).await.ok()?.split_whitespace().collect::<Vec<_>>().join(" ");
				match stamp.as_deref().and_then(|s| whole.strip_prefix(s)) {
					Some(rest) => rest.trim().to_string(),
					None => whole,
				}
			}
		};

		let mut offset = None;
		for attr in OFFSET_ATTRIBUTES {
			if let Ok(Some(raw)) = driver.attribute(cue, attr).await {
				offset = parse_timestamp(&raw);
				if offset.is_some() {
					break;
				}
			}
		}
		let offset = offset.or_else(|| stamp.as_deref().and_then(parse_timestamp));
		let (leading, rest) = split_leading_clock(&text);
		let rest = rest.trim();
		if rest.is_empty() {
			return None;
		}
		Some((offset.or(leading), rest.to_string()))
	}

	/// True when the panel is not scrollable any further, so the bulk pass saw everything it will ever render
	async fn panel_fully_shown(&self) -> bool {
		let Some(panel) = Locator::new(self.ctx).find(Target::TranscriptPanel).await else {
			return true;
		};
		match self.ctx.driver.scroll_metrics(&panel).await {
			Ok(m) => m.top <= BOTTOM_SLACK && m.at_bottom(BOTTOM_SLACK),
			Err(_) => true,
		}
	}

	async fn hover_video(&self) {
		if let Some(surface) = Locator::new(self.ctx).find(Target::VideoSurface).await {
			Executor::new(self.ctx).hover(&surface).await;
		}
	}

	async fn toggle(&self) -> Option<D::Handle> {
		let locator = Locator::new(self.ctx);
		if let Some(toggle) = locator.find(Target::TranscriptToggle).await {
			return Some(toggle);
		}
		self.hover_video().await;
		locator.find(Target::TranscriptToggle).await
	}

	/// `aria-expanded` of the toggle, or panel visibility when the toggle has no such attribute
	async fn expanded(&self, toggle: &D::Handle) -> bool {
		match self.ctx.driver.attribute(toggle, "aria-expanded").await {
			Ok(Some(v)) => v.trim().eq_ignore_ascii_case("true"),
			_ => Locator::new(self.ctx).is_present(Target::TranscriptPanel).await,
		}
	}

	/// Re-locates the toggle and reads its state; `None` when it cannot be found
	async fn is_expanded(&self) -> Option<bool> {
		let toggle = self.toggle().await?;
		Some(self.expanded(&toggle).await)
	}
}

/// Appends what `window` adds past its overlap with the tail of `collected`. Returns how many cues that was.
fn append_window(collected: &mut Vec<(Option<f64>, String)>, window: Vec<(Option<f64>, String)>) -> usize {
	let longest = collected.len().min(window.len());
	let overlap = (0..=longest).rev().find(|&k| collected[collected.len() - k..] == window[..k]).unwrap_or(0);
	let fresh = window.len() - overlap;
	collected.extend(window.into_iter().skip(overlap));
	fresh
}
