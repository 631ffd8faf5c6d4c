//! Bounded polling waits, plus lecture-kind detection for picking the right readiness budget.
//!
//! Every wait in the crate goes through [wait_until]. A wait that runs out of time answers `false`; callers decide
//! whether that means "proceed anyway" or "skip".

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::{
	LectureKind,
	driver::{Ctx, Driver, Selector},
	locator::Locator,
	selectors::{Target, match_marker},
};

/// Re-evaluates `condition` every `poll` until it holds or `timeout` elapses.
/// The condition is checked at least once, so a zero timeout is a single check.
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration, poll: Duration) -> bool
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>, {
	let deadline = Instant::now() + timeout;
	let poll = poll.max(Duration::from_millis(1));
	loop {
		if condition().await {
			return true;
		}
		let now = Instant::now();
		if now >= deadline {
			return false;
		}
		tokio::time::sleep(poll.min(deadline - now)).await;
	}
}

/// URL fragments of pages that show a single curriculum item
const LECTURE_URL_MARKERS: [&str; 5] = ["/lecture/", "/quiz/", "/practice", "/assignment", "/coding-exercise"];

pub fn is_lecture_url(url: &str) -> bool {
	LECTURE_URL_MARKERS.iter().any(|m| url.contains(m))
}

/// Outcome of waiting for a freshly opened lecture
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Readiness {
	/// Kind of the page as finally determined; may differ from the hint taken from the row
	pub kind: LectureKind,
	pub ready: bool,
}

pub struct Waiter<'a, D: Driver> {
	ctx: Ctx<'a, D>,
}

impl<D: Driver> Clone for Waiter<'_, D> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<D: Driver> Copy for Waiter<'_, D> {}

impl<'a, D: Driver> Waiter<'a, D> {
	pub fn new(ctx: Ctx<'a, D>) -> Self {
		Self { ctx }
	}

	/// [wait_until] at the configured poll interval
	pub async fn until<F, Fut>(&self, condition: F, timeout: Duration) -> bool
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = bool>, {
		wait_until(condition, timeout, self.ctx.timing.poll).await
	}

	pub async fn for_present(&self, target: Target, timeout: Duration) -> bool {
		let ctx = self.ctx;
		self.until(move || async move { Locator::new(ctx).is_present(target).await }, timeout).await
	}

	pub async fn for_absent(&self, target: Target, timeout: Duration) -> bool {
		let ctx = self.ctx;
		self.until(move || async move { !Locator::new(ctx).is_present(target).await }, timeout).await
	}

	pub async fn for_url<P>(&self, predicate: P, timeout: Duration) -> bool
	where
		P: Fn(&str) -> bool + Copy + Send, {
		let ctx = self.ctx;
		self.until(move || async move { predicate(&ctx.url().await) }, timeout).await
	}

	/// Curriculum landmarks are back on screen
	pub async fn for_list_visible(&self, timeout: Duration) -> bool {
		self.for_present(Target::ListVisible, timeout).await
	}

	/// The transcript panel holds at least one cue with non-empty text
	pub async fn for_cues(&self, timeout: Duration) -> bool {
		let ctx = self.ctx;
		self.until(
			move || async move {
				let locator = Locator::new(ctx);
				let Some(panel) = locator.find(Target::TranscriptPanel).await else {
					return false;
				};
				for cue in locator.find_all_within(&panel, Target::TranscriptCue).await {
					if ctx.driver.text(&cue).await.map(|t| !t.trim().is_empty()).unwrap_or(false) {
						return true;
					}
				}
				false
			},
			timeout,
		)
		.await
	}

	/// Row `lecture` of section `section` can be clicked, re-querying the list on every poll
	pub async fn for_row_clickable(&self, section: usize, lecture: usize, timeout: Duration) -> bool {
		let ctx = self.ctx;
		self.until(
			move || async move {
				let locator = Locator::new(ctx);
				let Some(row) = locator.lecture_row(section, lecture).await else {
					return false;
				};
				let target = locator.row_click_target(&row).await;
				ctx.driver.is_displayed(&target).await.unwrap_or(false) && ctx.driver.is_enabled(&target).await.unwrap_or(false)
			},
			timeout,
		)
		.await
	}

	/// Kind from a curriculum row alone: icon markers first, then a link URL. `Unknown` when neither says anything.
	pub async fn classify_row(&self, row: &D::Handle) -> LectureKind {
		let (driver, selectors) = (self.ctx.driver, self.ctx.selectors);
		let locator = Locator::new(self.ctx);

		for icon in locator.find_all_within(row, Target::LectureIcon).await {
			for attr in ["href", "xlink:href", "aria-label"] {
				if let Ok(Some(value)) = driver.attribute(&icon, attr).await {
					if let Some(kind) = match_marker(&selectors.icon_markers, &value) {
						return kind;
					}
				}
			}
		}
		if let Ok(Some(purpose)) = driver.attribute(row, "data-purpose").await {
			if let Some(kind) = match_marker(&selectors.icon_markers, &purpose) {
				return kind;
			}
		}
		for link in driver.query_all(Some(row), &Selector::parse("a[href]")).await.unwrap_or_default() {
			if let Ok(Some(href)) = driver.attribute(&link, "href").await {
				if let Some(kind) = match_marker(&selectors.url_markers, &href) {
					return kind;
				}
			}
		}
		LectureKind::Unknown
	}

	/// Kind of the currently loaded page: URL, then DOM landmarks, then title keywords
	pub async fn detect_page_kind(&self) -> LectureKind {
		let selectors = self.ctx.selectors;
		let url = self.ctx.url().await;
		if let Some(kind) = match_marker(&selectors.url_markers, &url) {
			return kind;
		}

		let locator = Locator::new(self.ctx);
		for (target, kind) in [
			(Target::VideoLandmark, LectureKind::Video),
			(Target::QuizLandmark, LectureKind::Quiz),
			(Target::ResourceLandmark, LectureKind::Resource),
			(Target::DocumentLandmark, LectureKind::Document),
		] {
			if locator.is_present(target).await {
				return kind;
			}
		}

		let title = self.ctx.driver.title().await.unwrap_or_default();
		match_marker(&selectors.title_markers, &title).unwrap_or_default()
	}

	/// Readiness predicate of a lecture kind
	pub async fn is_ready(&self, kind: LectureKind) -> bool {
		let locator = Locator::new(self.ctx);
		match kind {
			LectureKind::Video => locator.is_present(Target::VideoSurface).await,
			LectureKind::Document => locator.is_present(Target::DocumentLandmark).await,
			LectureKind::Quiz => locator.is_present(Target::QuizLandmark).await,
			LectureKind::Resource => locator.is_present(Target::ResourceLandmark).await,
			LectureKind::Unknown => {
				for target in [Target::VideoSurface, Target::DocumentLandmark, Target::QuizLandmark, Target::ResourceLandmark] {
					if locator.is_present(target).await {
						return true;
					}
				}
				false
			}
		}
	}

	/// Waits for a just-clicked lecture to load, using `hint` (usually from the row icon) to pick the budget.
	///
	/// An `Unknown` hint is resolved from the page within the unknown budget. When the hinted kind never becomes
	/// ready, the page is classified again, so a mislabelled row still ends up with the kind actually shown.
	pub async fn for_lecture_content(&self, hint: LectureKind) -> Readiness {
		let timing = self.ctx.timing;
		if !self.for_url(is_lecture_url, timing.url_change).await {
			tracing::debug!("no lecture URL after {:?}, checking the page anyway", timing.url_change);
		}

		let w = *self;
		let kind = match hint {
			LectureKind::Unknown => {
				let resolved = self.until(move || async move { w.detect_page_kind().await != LectureKind::Unknown }, timing.unknown).await;
				if !resolved {
					return Readiness {
						kind: LectureKind::Unknown,
						ready: self.is_ready(LectureKind::Unknown).await,
					};
				}
				self.detect_page_kind().await
			}
			kind => kind,
		};

		let ready = self.until(move || async move { w.is_ready(kind).await }, timing.budget_for(kind)).await;
		if ready {
			self.ctx.pause(timing.after_click).await;
			return Readiness { kind, ready };
		}

		let actual = self.detect_page_kind().await;
		if actual != kind && actual != LectureKind::Unknown {
			self.ctx.log(format!("Row said {kind}, page looks like {actual}"));
			return Readiness {
				kind: actual,
				ready: self.is_ready(actual).await,
			};
		}
		Readiness { kind, ready: false }
	}
}
