use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod course_finder;
pub mod curriculum;
pub mod driver;
pub mod executor;
pub mod locator;
pub mod login;
pub mod navigator;
pub mod orchestrator;
pub mod output;
pub mod selectors;
pub mod subtitle;
pub mod transcript;
pub mod waiter;

/// What a curriculum item turns out to be once we look at its row or its loaded page
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LectureKind {
	Video,
	Document,
	Quiz,
	Resource,
	#[default]
	Unknown,
}

impl LectureKind {
	/// Kinds for which the platform never renders a transcript UI
	pub fn lacks_transcript(self) -> bool {
		matches!(self, LectureKind::Document | LectureKind::Quiz | LectureKind::Resource)
	}
}

impl fmt::Display for LectureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			LectureKind::Video => "video",
			LectureKind::Document => "document",
			LectureKind::Quiz => "quiz",
			LectureKind::Resource => "resource",
			LectureKind::Unknown => "unknown",
		};
		write!(f, "{s}")
	}
}

/// One transcript cue
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Subtitle {
	/// `HH:MM:SS` rendering of `start_seconds`
	pub timestamp: String,
	pub text: String,
	pub start_seconds: f64,
	pub end_seconds: f64,
}

impl Subtitle {
	pub fn new(text: impl Into<String>, start_seconds: f64) -> Self {
		Self {
			timestamp: subtitle::format_timestamp(start_seconds),
			text: text.into(),
			start_seconds,
			end_seconds: start_seconds,
		}
	}
}

impl fmt::Display for Subtitle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}] {}", self.timestamp, self.text)
	}
}

/// A single curriculum item
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Lecture {
	pub title: String,
	/// Free-text duration exactly as the platform shows it
	pub duration: String,
	/// Zero-based position within the owning section
	pub index: usize,
	#[serde(default)]
	pub kind: LectureKind,
	#[serde(default)]
	pub has_transcript: bool,
	#[serde(default)]
	pub subtitles: Vec<Subtitle>,
	/// Page URL observed after navigating into the lecture
	#[serde(default)]
	pub url: Option<String>,
}

impl Lecture {
	pub fn new(title: impl Into<String>, duration: impl Into<String>, index: usize, kind: LectureKind) -> Self {
		Self {
			title: title.into(),
			duration: duration.into(),
			index,
			kind,
			has_transcript: false,
			subtitles: Vec::new(),
			url: None,
		}
	}

	pub fn set_transcript(&mut self, subtitles: Vec<Subtitle>) {
		self.has_transcript = !subtitles.is_empty();
		self.subtitles = subtitles;
	}

	/// Plain-text transcript, one `[HH:MM:SS] text` line per cue
	pub fn transcript_text(&self) -> String {
		self.subtitles.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("\n")
	}
}

impl fmt::Display for Lecture {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}. {} ({}, {})", self.index + 1, self.title, self.kind, self.duration)
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Section {
	pub title: String,
	/// Zero-based; doubles as the key into the live accordion panels
	pub index: usize,
	#[serde(default)]
	pub lectures: Vec<Lecture>,
}

impl Section {
	pub fn new(title: impl Into<String>, index: usize) -> Self {
		Self {
			title: title.into(),
			index,
			lectures: Vec::new(),
		}
	}

	pub fn lecture_count(&self) -> usize {
		self.lectures.len()
	}

	pub fn transcribed_count(&self) -> usize {
		self.lectures.iter().filter(|l| l.has_transcript).count()
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Course {
	pub title: String,
	#[serde(default)]
	pub instructor: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	/// Course-taking URL, once the course was entered
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub sections: Vec<Section>,
	pub created_at: DateTime<Local>,
}

impl Course {
	pub fn new(title: impl Into<String>) -> Self {
		Self {
			title: title.into(),
			instructor: None,
			description: None,
			url: None,
			sections: Vec::new(),
			created_at: Local::now(),
		}
	}

	pub fn total_sections(&self) -> usize {
		self.sections.len()
	}

	/// Always derived from the sections, never stored
	pub fn total_lectures(&self) -> usize {
		self.sections.iter().map(Section::lecture_count).sum()
	}

	pub fn lectures_with_transcript(&self) -> usize {
		self.sections.iter().map(Section::transcribed_count).sum()
	}

	/// Share of lectures that ended up with a transcript, in percent
	pub fn transcript_coverage(&self) -> f64 {
		match self.total_lectures() {
			0 => 0.0,
			total => self.lectures_with_transcript() as f64 / total as f64 * 100.0,
		}
	}
}

impl fmt::Display for Course {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({} sections, {} lectures)", self.title, self.total_sections(), self.total_lectures())
	}
}

/// Counters for one orchestrated run. Lives only as long as the run.
#[derive(Clone, Debug, Serialize)]
pub struct ScrapingProgress {
	/// One-based, 0 before the first section starts
	pub current_section: usize,
	pub total_sections: usize,
	/// One-based within the current section
	pub current_lecture: usize,
	/// Lectures known so far; grows as opened sections reveal rows the analysis could not see
	pub total_lectures: usize,
	/// Lectures dealt with, whatever the outcome, including the known rows of sections that never opened
	pub completed_lectures: usize,
	pub errors: Vec<String>,
	pub started_at: DateTime<Local>,
}

impl Default for ScrapingProgress {
	fn default() -> Self {
		Self {
			current_section: 0,
			total_sections: 0,
			current_lecture: 0,
			total_lectures: 0,
			completed_lectures: 0,
			errors: Vec::new(),
			started_at: Local::now(),
		}
	}
}

impl ScrapingProgress {
	pub fn for_course(course: &Course) -> Self {
		Self {
			total_sections: course.total_sections(),
			total_lectures: course.total_lectures(),
			..Default::default()
		}
	}

	pub fn percentage(&self) -> f64 {
		if self.total_lectures == 0 {
			return 0.0;
		}
		(self.completed_lectures as f64 / self.total_lectures as f64 * 100.0).min(100.0)
	}

	pub fn status_line(&self) -> String {
		format!(
			"Section {}/{} | Lecture {} | {}/{} done ({:.1}%)",
			self.current_section,
			self.total_sections,
			self.current_lecture,
			self.completed_lectures,
			self.total_lectures,
			self.percentage()
		)
	}

	pub fn add_error(&mut self, message: impl AsRef<str>) {
		self.errors.push(format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref()));
	}

	pub fn elapsed(&self) -> chrono::Duration {
		Local::now() - self.started_at
	}
}
