//! Section accordion state machine and the per-lecture click → wait → extract → close flow.
//!
//! Nothing here survives a navigation: panels and rows are re-queried by position at every step.

use std::fmt;

use crate::{
	Lecture, LectureKind, Section, Subtitle,
	curriculum::CurriculumAnalyzer,
	driver::{Ctx, Driver},
	executor::Executor,
	locator::Locator,
	output::{LecturePath, TranscriptSink},
	selectors::{Target, matches_state},
	transcript::{PanelOpen, TranscriptExtractor},
	waiter::Waiter,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SectionOutcome {
	Open { rows: usize },
	/// Reports expanded, but no row rendered within the section budget
	Empty,
	Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
	NotVideo(LectureKind),
	NoTranscript,
	EmptyTranscript,
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SkipReason::NotVideo(kind) => write!(f, "{kind} lecture"),
			SkipReason::NoTranscript => write!(f, "no transcript offered"),
			SkipReason::EmptyTranscript => write!(f, "transcript panel was empty"),
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum LectureOutcome {
	Success { cues: usize },
	Skip(SkipReason),
	Error(String),
}

impl fmt::Display for LectureOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LectureOutcome::Success { cues } => write!(f, "success ({cues} cues)"),
			LectureOutcome::Skip(reason) => write!(f, "skip: {reason}"),
			LectureOutcome::Error(e) => write!(f, "error: {e}"),
		}
	}
}

pub struct Navigator<'a, D: Driver> {
	ctx: Ctx<'a, D>,
	sink: &'a dyn TranscriptSink,
}

impl<'a, D: Driver> Navigator<'a, D> {
	pub fn new(ctx: Ctx<'a, D>, sink: &'a dyn TranscriptSink) -> Self {
		Self { ctx, sink }
	}

	/// Closed → Opening → Open. The toggle is clicked only while it does not already report expanded.
	pub async fn open_section(&self, index: usize) -> SectionOutcome {
		let ctx = self.ctx;
		let timing = ctx.timing;
		self.restore_list().await;

		let Some(panel) = Locator::new(ctx).section_panel(index).await else {
			ctx.log(format!("Section {} panel not found", index + 1));
			return SectionOutcome::Failed;
		};
		let toggle = Locator::new(ctx).find_within(&panel, Target::SectionToggle).await;
		let (expanded, rows) = section_state(ctx, index).await;

		if rows > 0 && expanded != Some(false) {
			return SectionOutcome::Open { rows };
		}
		let Some(toggle) = toggle else {
			ctx.log(format!("Section {} has no toggle and no rows", index + 1));
			return SectionOutcome::Failed;
		};

		if expanded != Some(true) {
			let clicked = Executor::new(ctx)
				.click_until(&toggle, move || async move {
					let (expanded, rows) = section_state(ctx, index).await;
					expanded == Some(true) || rows > 0
				})
				.await;
			if clicked.is_none() {
				tracing::debug!("section {index} toggle showed no effect on any click path");
			}
		}

		let rendered = Waiter::new(ctx).until(move || async move { section_state(ctx, index).await.1 > 0 }, timing.section).await;
		let (expanded, rows) = section_state(ctx, index).await;
		if rendered && rows > 0 {
			return SectionOutcome::Open { rows };
		}
		if expanded == Some(true) {
			ctx.log(format!("Section {} is expanded but shows no lectures, probably an empty section", index + 1));
			return SectionOutcome::Empty;
		}
		ctx.log(format!("Section {} did not open", index + 1));
		SectionOutcome::Failed
	}

	/// Appends rows the analyzer could not see while the section was collapsed. Returns how many were added.
	pub async fn sync_rows(&self, section: &mut Section) -> usize {
		let rows = Locator::new(self.ctx).lecture_rows(section.index).await;
		let analyzer = CurriculumAnalyzer::new(self.ctx);
		let before = section.lectures.len();
		for (j, row) in rows.iter().enumerate().skip(before) {
			section.lectures.push(analyzer.read_row(row, j).await);
		}
		section.lectures.len() - before
	}

	/// Runs one lecture end to end. Every failure is folded into the outcome; the caller just moves on.
	pub async fn process_lecture(&self, section: usize, lecture: &mut Lecture, at: &LecturePath) -> LectureOutcome {
		let ctx = self.ctx;
		let index = lecture.index;
		let Some(row) = self.fresh_row(section, index).await else {
			return LectureOutcome::Error(format!("row {} of section {} not found", index + 1, section + 1));
		};

		let hint = match Waiter::new(ctx).classify_row(&row).await {
			LectureKind::Unknown => lecture.kind,
			kind => kind,
		};
		lecture.kind = hint;
		if hint.lacks_transcript() {
			ctx.log(format!("Skipping {}: {hint} lecture", lecture.title));
			return LectureOutcome::Skip(SkipReason::NotVideo(hint));
		}

		let target = Locator::new(ctx).row_click_target(&row).await;
		let before = ctx.url().await;
		let clicked = Executor::new(ctx)
			.click_until(&target, move || {
				let before = before.clone();
				async move { ctx.url().await != before || row_is_current(ctx, section, index).await }
			})
			.await;
		if clicked.is_none() {
			return LectureOutcome::Error(format!("could not open {}", lecture.title));
		}

		let readiness = Waiter::new(ctx).for_lecture_content(hint).await;
		lecture.url = Some(ctx.url().await).filter(|u| !u.is_empty());
		if readiness.kind != LectureKind::Unknown {
			lecture.kind = readiness.kind;
		}
		if readiness.kind.lacks_transcript() {
			ctx.log(format!("Skipping {}: page turned out to be a {} lecture", lecture.title, readiness.kind));
			return LectureOutcome::Skip(SkipReason::NotVideo(readiness.kind));
		}
		if !readiness.ready {
			ctx.log(format!("{} is not fully loaded, trying the transcript anyway", lecture.title));
		}

		let extractor = TranscriptExtractor::new(ctx);
		let outcome = match extractor.open().await {
			// no panel to close; the player's caption track is the only other source
			PanelOpen::NoToggle =>
				return match extractor.from_caption_track().await {
					Some(cues) => self.save(lecture, at, cues),
					None => LectureOutcome::Skip(SkipReason::NoTranscript),
				},
			PanelOpen::Failed => LectureOutcome::Error("transcript panel did not open".to_string()),
			_ => match extractor.extract_content().await {
				None => LectureOutcome::Skip(SkipReason::EmptyTranscript),
				Some(cues) => self.save(lecture, at, cues),
			},
		};

		if !extractor.close_panel().await {
			ctx.log("Transcript panel stayed open, the lecture list may be unreachable");
		}
		outcome
	}

	fn save(&self, lecture: &mut Lecture, at: &LecturePath, cues: Vec<Subtitle>) -> LectureOutcome {
		lecture.set_transcript(cues);
		match self.sink.write_lecture(at, &lecture.subtitles) {
			Ok(()) => LectureOutcome::Success { cues: lecture.subtitles.len() },
			Err(e) => LectureOutcome::Error(format!("Failed to write transcript: {e}")),
		}
	}

	/// Re-queries a row, recovering a hidden list or a collapsed section before giving up
	async fn fresh_row(&self, section: usize, lecture: usize) -> Option<D::Handle> {
		let ctx = self.ctx;
		let locator = Locator::new(ctx);
		if let Some(row) = locator.lecture_row(section, lecture).await {
			return Some(row);
		}

		tracing::debug!("row {section}/{lecture} missing, recovering the lecture list");
		self.restore_list().await;
		if locator.lecture_rows(section).await.is_empty() {
			self.open_section(section).await;
		}
		if !Waiter::new(ctx).for_row_clickable(section, lecture, ctx.timing.next_lecture).await {
			ctx.log(format!("Lecture {} of section {} never became clickable", lecture + 1, section + 1));
			return None;
		}
		locator.lecture_row(section, lecture).await
	}

	/// A transcript panel left open covers the curriculum; close it
	async fn restore_list(&self) {
		let ctx = self.ctx;
		if Locator::new(ctx).is_present(Target::ListVisible).await {
			return;
		}
		tracing::debug!("lecture list hidden, closing the transcript panel");
		if TranscriptExtractor::new(ctx).close_panel().await {
			Waiter::new(ctx).for_list_visible(ctx.timing.panel).await;
		}
	}
}

/// `aria-expanded` of the section toggle (when it has one) and the number of rendered rows
async fn section_state<D: Driver>(ctx: Ctx<'_, D>, index: usize) -> (Option<bool>, usize) {
	let locator = Locator::new(ctx);
	let Some(panel) = locator.section_panel(index).await else {
		return (None, 0);
	};
	let expanded = match locator.find_within(&panel, Target::SectionToggle).await {
		Some(toggle) => ctx.driver.attribute(&toggle, "aria-expanded").await.ok().flatten().map(|v| v.trim().eq_ignore_ascii_case("true")),
		None => None,
	};
	(expanded, locator.lecture_rows_in(&panel).await.len())
}

/// Whether the row carries one of the table's current-lecture markers
async fn row_is_current<D: Driver>(ctx: Ctx<'_, D>, section: usize, lecture: usize) -> bool {
	let Some(row) = Locator::new(ctx).lecture_row(section, lecture).await else {
		return false;
	};
	for attribute in ctx.selectors.current_attributes() {
		if let Ok(Some(value)) = ctx.driver.attribute(&row, attribute).await
			&& matches_state(&ctx.selectors.current_markers, attribute, &value)
		{
			return true;
		}
	}
	false
}
