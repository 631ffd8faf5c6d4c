//! Top-level run: find the course, read its curriculum, walk every section and lecture, write the results.
//!
//! The only place that decides whether a run continues. Lecture and section failures are recorded and stepped over.

use std::{
	fmt,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use rand::distr::{Distribution, Uniform};
use tokio::sync::mpsc;

use crate::{
	Course, ScrapingProgress,
	config::Timing,
	course_finder::CourseFinder,
	curriculum::CurriculumAnalyzer,
	driver::{Ctx, Driver},
	navigator::{LectureOutcome, Navigator, SectionOutcome},
	output::{LecturePath, TranscriptSink},
	selectors::SelectorTable,
};

/// One-way notifications from a run. Every method is fire-and-forget.
pub trait RunObserver: Send + Sync {
	fn progress(&self, _current: usize, _total: usize) {}
	fn status(&self, _message: &str) {}
	fn log(&self, _message: &str) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;
type MessageFn = Box<dyn Fn(&str) + Send + Sync>;

/// Observer assembled from closures; unset channels are dropped
#[derive(Default)]
pub struct Callbacks {
	on_progress: Option<ProgressFn>,
	on_status: Option<MessageFn>,
	on_log: Option<MessageFn>,
}

impl Callbacks {
	pub fn on_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
		self.on_progress = Some(Box::new(f));
		self
	}

	pub fn on_status(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.on_status = Some(Box::new(f));
		self
	}

	pub fn on_log(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.on_log = Some(Box::new(f));
		self
	}
}

impl RunObserver for Callbacks {
	fn progress(&self, current: usize, total: usize) {
		if let Some(f) = &self.on_progress {
			f(current, total);
		}
	}

	fn status(&self, message: &str) {
		if let Some(f) = &self.on_status {
			f(message);
		}
	}

	fn log(&self, message: &str) {
		if let Some(f) = &self.on_log {
			f(message);
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
	Progress { current: usize, total: usize },
	Status(String),
	Log(String),
}

/// Forwards every notification into an unbounded channel, for a consumer on another task
#[derive(Clone, Debug)]
pub struct ChannelObserver {
	tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl RunObserver for ChannelObserver {
	fn progress(&self, current: usize, total: usize) {
		let _ = self.tx.send(RunEvent::Progress { current, total });
	}

	fn status(&self, message: &str) {
		let _ = self.tx.send(RunEvent::Status(message.to_string()));
	}

	fn log(&self, message: &str) {
		let _ = self.tx.send(RunEvent::Log(message.to_string()));
	}
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
	pub succeeded: usize,
	pub skipped: usize,
	pub errored: usize,
	pub sections_open: usize,
	pub sections_empty: usize,
	pub sections_failed: usize,
}

impl fmt::Display for RunSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"lectures: {} succeeded, {} skipped, {} errored | sections: {} open, {} empty, {} failed",
			self.succeeded, self.skipped, self.errored, self.sections_open, self.sections_empty, self.sections_failed
		)
	}
}

pub struct Orchestrator<'a, D: Driver> {
	driver: &'a D,
	selectors: &'a SelectorTable,
	timing: &'a Timing,
	observer: &'a dyn RunObserver,
	sink: &'a dyn TranscriptSink,
	base_url: String,
	cancel: Option<Arc<AtomicBool>>,
	snapshots: bool,
	course: Option<Course>,
	progress: ScrapingProgress,
	summary: RunSummary,
}

impl<'a, D: Driver> Orchestrator<'a, D> {
	pub fn new(driver: &'a D, selectors: &'a SelectorTable, timing: &'a Timing, observer: &'a dyn RunObserver, sink: &'a dyn TranscriptSink) -> Self {
		Self {
			driver,
			selectors,
			timing,
			observer,
			sink,
			base_url: "https://www.udemy.com".to_string(),
			cancel: None,
			snapshots: false,
			course: None,
			progress: ScrapingProgress::default(),
			summary: RunSummary::default(),
		}
	}

	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.base_url = base_url.into();
		self
	}

	/// Checked at the start of every section and every lecture
	pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
		self.cancel = Some(flag);
		self
	}

	/// Save the page HTML whenever a lecture errors
	pub fn with_snapshots(mut self, enabled: bool) -> Self {
		self.snapshots = enabled;
		self
	}

	pub fn course(&self) -> Option<&Course> {
		self.course.as_ref()
	}

	pub fn progress(&self) -> &ScrapingProgress {
		&self.progress
	}

	pub fn run_summary(&self) -> RunSummary {
		self.summary
	}

	fn ctx(&self) -> Ctx<'a, D> {
		Ctx::new(self.driver, self.selectors, self.timing, self.observer)
	}

	fn cancelled(&self) -> bool {
		self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
	}

	/// Finds `course_name` among the enrolled courses and scrapes it.
	/// True when at least one section yielded at least one transcript.
	pub async fn run(&mut self, course_name: &str) -> bool {
		let ctx = self.ctx();
		self.observer.status(&format!("Looking for \"{course_name}\""));

		let finder = CourseFinder::new(ctx, &self.base_url);
		if !finder.go_to_my_learning().await {
			ctx.log("Could not confirm the My learning page, searching anyway");
		}
		let Some(mut course) = finder.search_and_select(course_name).await else {
			ctx.log(format!("No enrolled course matches \"{course_name}\""));
			self.observer.status("Course not found");
			return false;
		};
		ctx.pause(self.timing.page_load).await;

		let succeeded = self.scrape_course(&mut course).await;
		self.course = Some(course);
		succeeded
	}

	/// Scrapes a course whose page is already loaded
	pub async fn scrape_course(&mut self, course: &mut Course) -> bool {
		let ctx = self.ctx();
		self.summary = RunSummary::default();
		self.progress = ScrapingProgress::default();

		if !CurriculumAnalyzer::new(ctx).analyze(course).await {
			self.progress.add_error("no curriculum sections found");
			self.observer.status("Course page did not load its curriculum");
			return false;
		}
		self.progress = ScrapingProgress::for_course(course);
		self.observer.status(&format!("Scraping {course}"));

		let navigator = Navigator::new(ctx, self.sink);
		let mut productive_sections = 0;
		for si in 0..course.sections.len() {
			if self.cancelled() {
				ctx.log("Cancelled, stopping before the next section");
				break;
			}
			self.progress.current_section = si + 1;
			self.progress.current_lecture = 0;
			let section_title = course.sections[si].title.clone();
			ctx.log(format!("Section {}/{}: {section_title}", si + 1, course.total_sections()));

			match navigator.open_section(si).await {
				SectionOutcome::Open { rows } => {
					self.summary.sections_open += 1;
					tracing::debug!("section {si} open with {rows} row(s)");
				}
				SectionOutcome::Empty => {
					self.summary.sections_empty += 1;
					self.pass_over(course, si);
					continue;
				}
				SectionOutcome::Failed => {
					self.summary.sections_failed += 1;
					self.progress.add_error(format!("section {} ({section_title}) did not open", si + 1));
					self.pass_over(course, si);
					continue;
				}
			}
			if navigator.sync_rows(&mut course.sections[si]).await > 0 {
				self.progress.total_lectures = course.total_lectures();
			}

			let mut successes = 0;
			let mut stopped = false;
			for li in 0..course.sections[si].lectures.len() {
				if self.cancelled() {
					ctx.log("Cancelled, stopping before the next lecture");
					stopped = true;
					break;
				}
				self.progress.current_lecture = li + 1;
				if li > 0 {
					ctx.pause(lecture_delay(self.timing.lecture_delay)).await;
				}

				let lecture_title = course.sections[si].lectures[li].title.clone();
				let at = LecturePath::new(course.title.clone(), si, section_title.clone(), li, lecture_title.clone());
				let outcome = navigator.process_lecture(si, &mut course.sections[si].lectures[li], &at).await;
				ctx.log(format!("{}. {lecture_title}: {outcome}", li + 1));

				match &outcome {
					LectureOutcome::Success { .. } => {
						successes += 1;
						self.summary.succeeded += 1;
					}
					LectureOutcome::Skip(_) => self.summary.skipped += 1,
					LectureOutcome::Error(e) => {
						self.summary.errored += 1;
						self.progress.add_error(format!("section {}, lecture {} ({lecture_title}): {e}", si + 1, li + 1));
						self.snapshot().await;
					}
				}

				self.progress.completed_lectures += 1;
				self.observer.progress(self.progress.completed_lectures, self.progress.total_lectures);
				self.observer.status(&self.progress.status_line());
			}

			if successes > 0 {
				productive_sections += 1;
			}
			self.write_section(course, si);
			if stopped {
				break;
			}
		}

		if let Err(e) = self.sink.write_summary(course, &self.progress) {
			ctx.log(format!("Failed to write course summary: {e}"));
		}
		ctx.log(format!("Done: {}", self.summary));
		self.observer.status(&format!("Finished: {} of {} lectures transcribed", course.lectures_with_transcript(), course.total_lectures()));
		productive_sections > 0
	}

	/// A section that never opened: whatever rows the analysis saw still count as dealt with
	fn pass_over(&mut self, course: &Course, index: usize) {
		let lectures = course.sections[index].lecture_count();
		if lectures > 0 {
			self.progress.completed_lectures += lectures;
			self.observer.progress(self.progress.completed_lectures, self.progress.total_lectures);
		}
		self.write_section(course, index);
	}

	fn write_section(&mut self, course: &Course, index: usize) {
		if let Err(e) = self.sink.write_section(course, &course.sections[index]) {
			self.progress.add_error(format!("section {} not written: {e}", index + 1));
		}
	}

	async fn snapshot(&self) {
		if !self.snapshots {
			return;
		}
		#[cfg(feature = "xdg")]
		{
			let run_id = self.progress.started_at.format("%Y%m%d_%H%M%S").to_string();
			if let Err(e) = crate::output::save_page_html(self.driver, &run_id).await {
				tracing::warn!("page snapshot failed: {e}");
			}
		}
	}
}

/// Uniformly random pause within `range`
fn lecture_delay(range: (Duration, Duration)) -> Duration {
	let (lo, hi) = (range.0.as_millis() as u64, range.1.as_millis() as u64);
	if hi <= lo {
		return range.0;
	}
	let mut rng = rand::rng();
	Uniform::new_inclusive(lo, hi).map(|d| Duration::from_millis(d.sample(&mut rng))).unwrap_or(range.0)
}
