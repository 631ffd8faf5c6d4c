//! One pass over the course-taking page that turns the accordion into the [Course] tree.
//!
//! Indices assigned here are the only thing later steps keep: panels and rows are always looked up again by position.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use crate::{
	Course, Lecture, Section,
	driver::{Ctx, Driver},
	locator::Locator,
	selectors::Target,
	waiter::Waiter,
};

static DURATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2}:\d{2}(?::\d{2})?|\d+\s*(?:hr|hrs|h|min|mins|m)\b(?:\s*\d+\s*(?:min|mins|m)\b)?)").unwrap());
static SECTION_PANEL_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^section-panel-(\d+)$").unwrap());

pub const UNKNOWN_DURATION: &str = "unknown";
const MAX_TITLE_CHARS: usize = 120;

pub fn section_placeholder(index: usize) -> String {
	format!("Untitled section {}", index + 1)
}

pub fn lecture_placeholder(index: usize) -> String {
	format!("Lecture {}", index + 1)
}

pub struct CurriculumAnalyzer<'a, D: Driver> {
	ctx: Ctx<'a, D>,
}

impl<'a, D: Driver> CurriculumAnalyzer<'a, D> {
	pub fn new(ctx: Ctx<'a, D>) -> Self {
		Self { ctx }
	}

	/// Replaces `course.sections` with what the page shows. False when no section could be found at all.
	///
	/// Read-only: collapsed panels contribute a titled section without lectures, which the navigator fills in once it opens them.
	pub async fn analyze(&self, course: &mut Course) -> bool {
		let ctx = self.ctx;
		let locator = Locator::new(ctx);
		let appeared = Waiter::new(ctx)
			.until(move || async move { !Locator::new(ctx).find_all(Target::SectionPanels).await.is_empty() }, ctx.timing.section)
			.await;
		if !appeared {
			tracing::debug!("no section panel via live queries, falling back to page source");
		}

		let panels = self.section_panels().await;
		let sections = if panels.is_empty() {
			let source = ctx.driver.page_source().await.unwrap_or_default();
			sections_from_source(&source)
		} else {
			let mut sections = Vec::with_capacity(panels.len());
			for (i, fallback) in panels.iter().enumerate() {
				let panel = locator.section_panel(i).await.unwrap_or_else(|| fallback.clone());
				sections.push(self.read_section(&panel, i).await);
			}
			sections
		};

		if sections.is_empty() {
			ctx.log("No curriculum sections found, the course page did not load as expected");
			return false;
		}

		if course.url.is_none() {
			course.url = Some(ctx.url().await).filter(|u| !u.is_empty());
		}
		course.sections = sections;
		ctx.log(format!("Curriculum: {} sections, {} lectures visible", course.total_sections(), course.total_lectures()));
		true
	}

	/// Panels inside the curriculum container when there is one, so look-alike blocks elsewhere on the page are ignored
	async fn section_panels(&self) -> Vec<D::Handle> {
		let locator = Locator::new(self.ctx);
		if let Some(root) = locator.find(Target::CurriculumRoot).await {
			let scoped = locator.find_all_within(&root, Target::SectionPanels).await;
			if !scoped.is_empty() {
				return scoped;
			}
			tracing::debug!("curriculum container holds no section panel, searching the whole page");
		}
		locator.find_all(Target::SectionPanels).await
	}

	async fn read_section(&self, panel: &D::Handle, index: usize) -> Section {
		let locator = Locator::new(self.ctx);
		let title = locator.text_within(panel, Target::SectionTitle, 0).await.unwrap_or_else(|| section_placeholder(index));
		let mut section = Section::new(title, index);
		for (j, row) in locator.lecture_rows_in(panel).await.iter().enumerate() {
			section.lectures.push(self.read_row(row, j).await);
		}
		section
	}

	/// Title, duration and kind of one lecture row, with placeholders for whatever cannot be read
	pub async fn read_row(&self, row: &D::Handle, index: usize) -> Lecture {
		let locator = Locator::new(self.ctx);
		let row_text = self.ctx.driver.text(row).await.map(|t| normalize(&t)).unwrap_or_default();

		let title = match locator.text_within(row, Target::LectureTitle, 0).await {
			Some(title) => title,
			None => title_from_row_text(&row_text).unwrap_or_else(|| lecture_placeholder(index)),
		};
		let duration = match locator.text_within(row, Target::LectureDuration, 0).await {
			Some(d) => d,
			None => DURATION.find(&row_text).map(|m| m.as_str().to_string()).unwrap_or_else(|| UNKNOWN_DURATION.to_string()),
		};
		let kind = Waiter::new(self.ctx).classify_row(row).await;
		Lecture::new(title, duration, index, kind)
	}
}

fn normalize(s: &str) -> String {
	s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Row text up to the first duration-looking token
fn title_from_row_text(text: &str) -> Option<String> {
	let head = match DURATION.find(text) {
		Some(m) => &text[..m.start()],
		None => text,
	};
	let head = head.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.').trim();
	if head.is_empty() {
		return None;
	}
	Some(head.chars().take(MAX_TITLE_CHARS).collect())
}

/// Section titles (and any rendered rows) straight from the HTML, for layouts the live queries miss
pub fn sections_from_source(html: &str) -> Vec<Section> {
	let doc = Html::parse_document(html);
	let Ok(panel_sel) = scraper::Selector::parse("[data-purpose^='section-panel-']") else {
		return Vec::new();
	};
	let title_sel = scraper::Selector::parse(".ud-accordion-panel-title, [data-purpose='section-title'], .section-title, h3, h2").ok();
	let row_sel = scraper::Selector::parse("[data-purpose^='curriculum-item-']").ok();
	let item_title_sel = scraper::Selector::parse("[data-purpose='item-title'], .curriculum-item-title").ok();

	let mut panels: Vec<(usize, ElementRef)> = doc
		.select(&panel_sel)
		.filter_map(|el| {
			let purpose = el.value().attr("data-purpose")?;
			let index = SECTION_PANEL_INDEX.captures(purpose)?.get(1)?.as_str().parse().ok()?;
			Some((index, el))
		})
		.collect();
	panels.sort_by_key(|(i, _)| *i);
	panels.dedup_by_key(|(i, _)| *i);

	panels
		.into_iter()
		.enumerate()
		.map(|(position, (_, panel))| {
			let text_of = |el: ElementRef| normalize(&el.text().collect::<String>());
			let title = title_sel
				.as_ref()
				.and_then(|s| panel.select(s).map(text_of).find(|t| !t.is_empty()))
				.unwrap_or_else(|| section_placeholder(position));
			let mut section = Section::new(title, position);
			if let Some(row_sel) = &row_sel {
				for (j, row) in panel.select(row_sel).enumerate() {
					let row_text = text_of(row);
					let title = item_title_sel
						.as_ref()
						.and_then(|s| row.select(s).map(text_of).find(|t| !t.is_empty()))
						.or_else(|| title_from_row_text(&row_text))
						.unwrap_or_else(|| lecture_placeholder(j));
					let duration = DURATION.find(&row_text).map(|m| m.as_str().to_string()).unwrap_or_else(|| UNKNOWN_DURATION.to_string());
					section.lectures.push(Lecture::new(title, duration, j, Default::default()));
				}
			}
			section
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		LectureKind,
		config::Timing,
		driver::fake::{FakeLecture, FakeSection, FakeSite, Page},
		orchestrator::NullObserver,
		selectors::SelectorTable,
	};

	fn two_sections() -> FakeSite {
		FakeSite::course(vec![
			FakeSection::new("Getting started", vec![FakeLecture::video("Welcome", &["hi"]), FakeLecture::document("Setup notes")]),
			FakeSection::new("Ownership", vec![FakeLecture::video("Moves", &["a"]), FakeLecture::quiz("Check"), FakeLecture::video("Borrows", &["b"])]),
		])
	}

	#[tokio::test(start_paused = true)]
	async fn reads_titles_durations_and_kinds() {
		let site = two_sections();
		site.open_section(0);
		site.open_section(1);
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let analyzer = CurriculumAnalyzer::new(Ctx::new(&site, &table, &timing, &NullObserver));

		let mut course = Course::new("Rust");
		assert!(analyzer.analyze(&mut course).await);
		assert_eq!(course.sections.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(), vec!["Getting started", "Ownership"]);
		assert_eq!(course.total_lectures(), 5);
		let second = &course.sections[1];
		assert_eq!(second.lectures.iter().map(|l| l.title.as_str()).collect::<Vec<_>>(), vec!["Moves", "Check", "Borrows"]);
		assert_eq!(second.lectures.iter().map(|l| l.index).collect::<Vec<_>>(), vec![0, 1, 2]);
		assert_eq!(second.lectures[1].kind, LectureKind::Quiz);
		assert_eq!(second.lectures[0].duration, "5min");
		assert_eq!(course.url.as_deref(), Some(crate::driver::fake::COURSE_URL));
	}

	#[tokio::test(start_paused = true)]
	async fn collapsed_sections_have_no_lectures_yet() {
		let site = two_sections();
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let analyzer = CurriculumAnalyzer::new(Ctx::new(&site, &table, &timing, &NullObserver));
		let mut course = Course::new("Rust");
		assert!(analyzer.analyze(&mut course).await);
		assert_eq!(course.total_sections(), 2);
		assert_eq!(course.total_lectures(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn analyzing_twice_gives_the_same_tree() {
		let site = two_sections();
		site.open_section(1);
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let analyzer = CurriculumAnalyzer::new(Ctx::new(&site, &table, &timing, &NullObserver));

		let shape = |c: &Course| c.sections.iter().map(|s| (s.title.clone(), s.lectures.iter().map(|l| l.title.clone()).collect::<Vec<_>>())).collect::<Vec<_>>();
		let mut course = Course::new("Rust");
		assert!(analyzer.analyze(&mut course).await);
		let first = shape(&course);
		assert!(analyzer.analyze(&mut course).await);
		assert_eq!(shape(&course), first);
		assert_eq!(course.total_lectures(), course.sections.iter().map(|s| s.lecture_count()).sum::<usize>());
	}

	#[tokio::test(start_paused = true)]
	async fn no_sections_is_fatal() {
		let site = FakeSite::static_page(Page::new("https://www.udemy.com/course/x/learn/", "Oops", r#"<div data-k="e">Something went wrong</div>"#));
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let analyzer = CurriculumAnalyzer::new(Ctx::new(&site, &table, &timing, &NullObserver));
		let mut course = Course::new("Rust");
		assert!(!analyzer.analyze(&mut course).await);
		assert!(course.sections.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn placeholders_for_unreadable_rows() {
		let body = r#"
			<div data-k="p0" data-purpose="section-panel-0">
				<div data-k="c0" data-purpose="section-content">
					<li data-k="r0" data-purpose="curriculum-item-0-0"></li>
					<li data-k="r1" data-purpose="curriculum-item-0-1">3. Traits in depth 12min</li>
				</div>
			</div>"#;
		let site = FakeSite::static_page(Page::new("https://www.udemy.com/course/x/learn/", "Course", body));
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let analyzer = CurriculumAnalyzer::new(Ctx::new(&site, &table, &timing, &NullObserver));
		let mut course = Course::new("Rust");
		assert!(analyzer.analyze(&mut course).await);

		let section = &course.sections[0];
		assert_eq!(section.title, "Untitled section 1");
		assert_eq!((section.lectures[0].title.as_str(), section.lectures[0].duration.as_str()), ("Lecture 1", UNKNOWN_DURATION));
		assert_eq!((section.lectures[1].title.as_str(), section.lectures[1].duration.as_str()), ("Traits in depth", "12min"));
	}

	#[tokio::test(start_paused = true)]
	async fn panels_outside_the_curriculum_are_ignored() {
		let body = r#"
			<div data-k="preview" class="course-preview">
				<div data-k="decoy" data-purpose="section-panel-preview"><h3>Recommended for you</h3></div>
			</div>
			<div data-k="root" data-purpose="curriculum-section-container">
				<div data-k="p0" data-purpose="section-panel-0"><h3>Basics</h3></div>
				<div data-k="p1" data-purpose="section-panel-1"><h3>Advanced</h3></div>
			</div>"#;
		let site = FakeSite::static_page(Page::new("https://www.udemy.com/course/x/learn/", "Course", body));
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let analyzer = CurriculumAnalyzer::new(Ctx::new(&site, &table, &timing, &NullObserver));
		let mut course = Course::new("Rust");
		assert!(analyzer.analyze(&mut course).await);
		assert_eq!(course.sections.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(), vec!["Basics", "Advanced"]);
	}

	#[test]
	fn source_fallback_orders_by_panel_index() {
		let html = r#"<html><body>
			<section data-purpose="section-panel-1"><span class="ud-accordion-panel-title">Second</span>
				<li data-purpose="curriculum-item-1-0"><span data-purpose="item-title">Deep dive</span> 1:05:00</li>
			</section>
			<section data-purpose="section-panel-0"><h3> First </h3></section>
			<div data-purpose="section-panel-header">not a panel</div>
		</body></html>"#;
		let sections = sections_from_source(html);
		assert_eq!(sections.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(), vec!["First", "Second"]);
		assert_eq!(sections[1].index, 1);
		assert_eq!(sections[1].lectures[0].title, "Deep dive");
		assert_eq!(sections[1].lectures[0].duration, "1:05:00");
	}
}
