//! Transcript files on disk: one text file per lecture, a merged Markdown file per section, a course summary and a JSON
//! snapshot. Once a run ends, the section files are also joined into one whole-course document next to a README.

use std::{
	fs,
	path::{Path, PathBuf},
	sync::LazyLock,
};

use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::eyre};
use derive_new::new;
use regex::Regex;
use serde::Serialize;
#[cfg(feature = "xdg")]
use v_utils::xdg_state_dir;
use v_utils::log;

#[cfg(feature = "xdg")]
use crate::driver::Driver;
use crate::{Course, ScrapingProgress, Section, Subtitle};

static SECTION_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Section_(\d+)$").unwrap());
static NUMBERED_FILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)_(.*)$").unwrap());
static SECTION_TOTAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Section_(\d+)_total\.md$").unwrap());
static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^## (Section \d+: .+)$").unwrap());

const HEADER_RULE_WIDTH: usize = 50;
const MAX_FILENAME_CHARS: usize = 50;
const FORBIDDEN_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
pub const SUMMARY_FILE: &str = "00_course_summary.md";
pub const SNAPSHOT_FILE: &str = "course.json";
pub const COMPLETE_FILE: &str = "00_complete_course.md";
pub const README_FILE: &str = "README.md";
/// Markdown files below this size hold nothing but a header
const MIN_DOCUMENT_BYTES: u64 = 100;

/// Where a lecture sits in the course, as the writers need it
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct LecturePath {
	pub course_title: String,
	pub section_index: usize,
	pub section_title: String,
	pub lecture_index: usize,
	pub lecture_title: String,
}

/// Receives finished transcripts. Writes happen synchronously on the scraping task.
pub trait TranscriptSink: Send + Sync {
	fn write_lecture(&self, at: &LecturePath, cues: &[Subtitle]) -> Result<()>;
	fn write_section(&self, course: &Course, section: &Section) -> Result<()>;
	/// Course overview with a present/absent marker for every lecture
	fn write_summary(&self, course: &Course, progress: &ScrapingProgress) -> Result<()>;
}

/// Forbidden characters dropped, whitespace collapsed, at most 50 characters
pub fn sanitize_filename(name: &str) -> String {
	let cleaned: String = name.chars().filter(|c| !FORBIDDEN_FILENAME_CHARS.contains(c)).collect();
	let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
	if cleaned.is_empty() {
		return "untitled".to_string();
	}
	if cleaned.chars().count() > MAX_FILENAME_CHARS {
		let head: String = cleaned.chars().take(MAX_FILENAME_CHARS - 3).collect();
		return format!("{}...", head.trim_end());
	}
	cleaned
}

fn section_dir_name(index: usize) -> String {
	format!("Section_{:02}", index + 1)
}

fn lecture_file_name(index: usize, title: &str) -> String {
	format!("{:02}_{}.txt", index + 1, sanitize_filename(title))
}

fn section_total_name(index: usize) -> String {
	format!("Section_{:02}_total.md", index + 1)
}

fn lecture_document(title: &str, cues: &[Subtitle]) -> String {
	let mut doc = format!("Video: {title}\n{}\n\n", "=".repeat(HEADER_RULE_WIDTH));
	for cue in cues {
		doc.push_str(&cue.to_string());
		doc.push('\n');
	}
	doc
}

/// One merged section document; `None` bodies render as a placeholder
fn section_document(course_title: &str, number: usize, section_title: &str, lectures: &[(String, Option<String>)], created: DateTime<Local>) -> String {
	let mut doc = format!(
		"# {course_title}\n\n## Section {number}: {section_title}\n\n- Lectures: {}\n- Created: {}\n",
		lectures.len(),
		created.format("%Y-%m-%d %H:%M:%S")
	);
	for (i, (title, body)) in lectures.iter().enumerate() {
		doc.push_str(&format!("\n---\n\n## {}. {title}\n\n", i + 1));
		match body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
			Some(body) => doc.push_str(body),
			None => doc.push_str("*No transcript available*"),
		}
		doc.push('\n');
	}
	doc
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(|e| eyre!("Failed to create {}: {}", parent.display(), e))?;
	}
	fs::write(path, contents).map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))
}

/// Writes everything below `<output_dir>/<course title>/`
#[derive(Clone, Debug)]
pub struct MarkdownWriter {
	root: PathBuf,
}

impl MarkdownWriter {
	pub fn new(output_dir: impl AsRef<Path>) -> Self {
		Self {
			root: output_dir.as_ref().to_path_buf(),
		}
	}

	pub fn course_dir(&self, course_title: &str) -> PathBuf {
		self.root.join(sanitize_filename(course_title))
	}

	fn summary_document(course: &Course, progress: &ScrapingProgress) -> String {
		let mut doc = format!("# {}\n\n", course.title);
		if let Some(instructor) = &course.instructor {
			doc.push_str(&format!("**Instructor:** {instructor}\n\n"));
		}
		if let Some(description) = &course.description {
			doc.push_str(&format!("{description}\n\n"));
		}
		doc.push_str(&format!(
			"- Sections: {}\n- Lectures: {}\n- Created: {}\n",
			course.total_sections(),
			course.total_lectures(),
			course.created_at.format("%Y-%m-%d %H:%M:%S")
		));
		if let Some(url) = &course.url {
			doc.push_str(&format!("- URL: {url}\n"));
		}

		doc.push_str("\n## Contents\n");
		for section in &course.sections {
			doc.push_str(&format!("\n### Section {}: {}\n\n", section.index + 1, section.title));
			if section.lectures.is_empty() {
				doc.push_str("*No lectures found*\n");
			}
			for lecture in &section.lectures {
				let mark = if lecture.has_transcript { "✓" } else { "✗" };
				doc.push_str(&format!("- {mark} {}. {} ({})\n", lecture.index + 1, lecture.title, lecture.duration));
			}
		}

		doc.push_str(&format!(
			"\n## Statistics\n\n- Lectures with transcript: {}/{} ({:.1}%)\n- Cues collected: {}\n- Errors: {}\n- Elapsed: {}s\n",
			course.lectures_with_transcript(),
			course.total_lectures(),
			course.transcript_coverage(),
			course.sections.iter().flat_map(|s| &s.lectures).map(|l| l.subtitles.len()).sum::<usize>(),
			progress.errors.len(),
			progress.elapsed().num_seconds()
		));
		for error in &progress.errors {
			doc.push_str(&format!("  - {error}\n"));
		}
		doc
	}
}

#[derive(Serialize)]
struct Snapshot<'a> {
	course: &'a Course,
	progress: &'a ScrapingProgress,
}

impl TranscriptSink for MarkdownWriter {
	fn write_lecture(&self, at: &LecturePath, cues: &[Subtitle]) -> Result<()> {
		let path = self
			.course_dir(&at.course_title)
			.join(section_dir_name(at.section_index))
			.join(lecture_file_name(at.lecture_index, &at.lecture_title));
		write_file(&path, &lecture_document(&at.lecture_title, cues))?;
		tracing::info!("wrote {} cues to {}", cues.len(), path.display());
		Ok(())
	}

	fn write_section(&self, course: &Course, section: &Section) -> Result<()> {
		let lectures: Vec<(String, Option<String>)> = section
			.lectures
			.iter()
			.map(|l| (l.title.clone(), l.has_transcript.then(|| l.transcript_text())))
			.collect();
		let path = self.course_dir(&course.title).join(section_total_name(section.index));
		write_file(&path, &section_document(&course.title, section.index + 1, &section.title, &lectures, Local::now()))
	}

	/// Also the end of the run on disk: header-only documents are dropped, then the complete course and README written
	fn write_summary(&self, course: &Course, progress: &ScrapingProgress) -> Result<()> {
		let dir = self.course_dir(&course.title);
		write_file(&dir.join(SUMMARY_FILE), &Self::summary_document(course, progress))?;
		let json = serde_json::to_string_pretty(&Snapshot { course, progress }).map_err(|e| eyre!("Failed to serialize course: {}", e))?;
		write_file(&dir.join(SNAPSHOT_FILE), &json)?;
		log!("Summary written to {}", dir.display());

		cleanup_empty_files(&dir)?;
		write_complete_course(&dir, &course.title)?;
		write_readme(&dir, &course.title)?;
		Ok(())
	}
}

/// Numeric prefix and title of a lecture file name; unnumbered files sort last
fn lecture_file_key(stem: &str) -> (usize, String) {
	match NUMBERED_FILE.captures(stem) {
		Some(caps) => (
			caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(usize::MAX),
			caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
		),
		None => (usize::MAX, stem.to_string()),
	}
}

/// Title from the `Video: ...` header if present, and the body without the header
fn split_lecture_file(contents: &str, fallback_title: &str) -> (String, String) {
	let mut lines = contents.lines();
	let first = lines.clone().next().unwrap_or_default();
	let second = lines.clone().nth(1).unwrap_or_default();
	if let Some(title) = first.strip_prefix("Video:") {
		if !second.is_empty() && second.chars().all(|c| c == '=') {
			lines.next();
			lines.next();
			return (title.trim().to_string(), lines.collect::<Vec<_>>().join("\n").trim().to_string());
		}
	}
	(fallback_title.to_string(), contents.trim().to_string())
}

/// Rebuilds every `Section_NN_total.md` under `course_dir` from the per-lecture files, then the complete-course document.
/// Returns how many section documents were written.
pub fn merge_sections(course_dir: impl AsRef<Path>) -> Result<usize> {
	let course_dir = course_dir.as_ref();
	let course_title = course_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "Course".to_string());
	let entries = fs::read_dir(course_dir).map_err(|e| eyre!("Failed to read {}: {}", course_dir.display(), e))?;

	let mut sections: Vec<(usize, PathBuf)> = entries
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.path().is_dir())
		.filter_map(|entry| {
			let name = entry.file_name().to_string_lossy().into_owned();
			let number = SECTION_DIR.captures(&name)?.get(1)?.as_str().parse().ok()?;
			Some((number, entry.path()))
		})
		.collect();
	sections.sort_by_key(|(n, _)| *n);

	let mut written = 0;
	for (number, dir) in sections {
		let mut files: Vec<((usize, String), PathBuf)> = fs::read_dir(&dir)
			.map_err(|e| eyre!("Failed to read {}: {}", dir.display(), e))?
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.path())
			.filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
			.map(|path| (lecture_file_key(&path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()), path))
			.collect();
		files.sort_by(|a, b| a.0.cmp(&b.0));

		let mut lectures = Vec::with_capacity(files.len());
		for ((_, fallback_title), path) in files {
			let contents = fs::read_to_string(&path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
			let (title, body) = split_lecture_file(&contents, &fallback_title);
			lectures.push((title, Some(body)));
		}
		if lectures.is_empty() {
			continue;
		}

		let doc = section_document(&course_title, number, &format!("Section {number:02}"), &lectures, Local::now());
		write_file(&course_dir.join(format!("Section_{number:02}_total.md")), &doc)?;
		log!("Merged {} lecture(s) into Section_{number:02}_total.md", lectures.len());
		written += 1;
	}
	write_complete_course(course_dir, &course_title)?;
	Ok(written)
}

/// `Section_NN_total.md` files directly under `course_dir`, ordered by number
fn section_documents(course_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
	let entries = fs::read_dir(course_dir).map_err(|e| eyre!("Failed to read {}: {}", course_dir.display(), e))?;
	let mut found: Vec<(usize, PathBuf)> = entries
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.path().is_file())
		.filter_map(|entry| {
			let name = entry.file_name().to_string_lossy().into_owned();
			let number = SECTION_TOTAL.captures(&name)?.get(1)?.as_str().parse().ok()?;
			Some((number, entry.path()))
		})
		.collect();
	found.sort_by_key(|(n, _)| *n);
	Ok(found)
}

/// Joins every section document into [COMPLETE_FILE], behind a linked table of contents.
/// `None` when there is no section document to join.
pub fn write_complete_course(course_dir: impl AsRef<Path>, course_title: &str) -> Result<Option<PathBuf>> {
	let course_dir = course_dir.as_ref();
	let sections = section_documents(course_dir)?;
	if sections.is_empty() {
		return Ok(None);
	}

	let mut bodies = Vec::with_capacity(sections.len());
	for (number, path) in &sections {
		let contents = fs::read_to_string(path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
		let heading = SECTION_HEADING.captures(&contents).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string()).unwrap_or_else(|| format!("Section {number}"));
		bodies.push((*number, heading, contents));
	}

	let mut doc = format!(
		"# {course_title}: complete transcript

- Sections: {}
- Created: {}

## Table of contents

",
		bodies.len(),
		Local::now().format("%Y-%m-%d %H:%M:%S")
	);
	for (number, heading, _) in &bodies {
		doc.push_str(&format!("- [{heading}](#section-{number})
"));
	}
	for (number, _, contents) in &bodies {
		doc.push_str(&format!("\n---\n\n<a id=\"section-{number}\"></a>\n\n{}\n", contents.trim()));
	}

	let path = course_dir.join(COMPLETE_FILE);
	write_file(&path, &doc)?;
	log!("Joined {} section(s) into {}", bodies.len(), path.display());
	Ok(Some(path))
}

/// How the output directory is laid out, for whoever opens it later
pub fn write_readme(course_dir: impl AsRef<Path>, course_title: &str) -> Result<PathBuf> {
	let course_dir = course_dir.as_ref();
	let mut doc = format!(
		"# {course_title}: lecture transcripts\n\nExtracted on {}.\n\n## Files\n\n",
		Local::now().format("%Y-%m-%d %H:%M")
	);
	for (number, path) in section_documents(course_dir)? {
		let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
		doc.push_str(&format!("- `{name}`: every transcript of section {number}\n"));
	}
	doc.push_str(&format!("- `{COMPLETE_FILE}`: all sections in one document\n"));
	doc.push_str(&format!("- `{SUMMARY_FILE}`: course structure and statistics\n"));
	doc.push_str(&format!("- `{SNAPSHOT_FILE}`: the same data as JSON\n"));
	doc.push_str("- `Section_NN/`: one text file per lecture\n");
	doc.push_str(concat!(
		"\n## Format\n\n",
		"```markdown\n",
		"## Section 1: Section title\n\n",
		"## 1. Lecture title\n\n",
		"[00:00:15] First cue\n",
		"[00:00:32] Next cue\n",
		"```\n\n",
		"## Notes\n\n",
		"- For personal study only.\n",
		"- Do not redistribute copyrighted course material.\n",
		"- Follow the platform's terms of use.\n",
	));

	let path = course_dir.join(README_FILE);
	write_file(&path, &doc)?;
	Ok(path)
}

/// Deletes `*.md` files directly under `dir` that are smaller than a bare header. Returns how many went.
pub fn cleanup_empty_files(dir: impl AsRef<Path>) -> Result<usize> {
	let dir = dir.as_ref();
	if !dir.is_dir() {
		return Ok(0);
	}
	let entries = fs::read_dir(dir).map_err(|e| eyre!("Failed to read {}: {}", dir.display(), e))?;
	let mut removed = 0;
	for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
		if !path.extension().is_some_and(|ext| ext == "md") {
			continue;
		}
		let Ok(meta) = fs::metadata(&path) else {
			continue;
		};
		if meta.is_file() && meta.len() < MIN_DOCUMENT_BYTES {
			match fs::remove_file(&path) {
				Ok(()) => {
					tracing::info!("removed near-empty {}", path.display());
					removed += 1;
				}
				Err(e) => tracing::warn!("could not remove {}: {e}", path.display()),
			}
		}
	}
	Ok(removed)
}

/// Save the current page's HTML to disk for debugging
#[cfg(feature = "xdg")]
pub async fn save_page_html<D: Driver>(driver: &D, run_id: &str) -> Result<PathBuf> {
	let html_dir = xdg_state_dir!("persist_htmls").join(run_id);
	fs::create_dir_all(&html_dir).map_err(|e| eyre!("Failed to create HTML dir: {}", e))?;

	let url = driver.current_url().await.unwrap_or_default();
	let label = url.replace("https://", "").replace("http://", "");
	let html = driver.page_source().await.map_err(|e| eyre!("Failed to get page HTML: {}", e))?;

	let timestamp = Local::now().format("%Y%m%d_%H%M%S");
	let safe_label: String = label.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
	let filepath = html_dir.join(format!("{timestamp}_{safe_label}.html"));

	fs::write(&filepath, html).map_err(|e| eyre!("Failed to write HTML file: {}", e))?;
	log!("Saved page HTML to: {}", filepath.display());
	Ok(filepath)
}

/// Keeps everything in memory; used by the scenario tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
	pub lectures: std::sync::Mutex<Vec<(LecturePath, Vec<Subtitle>)>>,
	pub sections: std::sync::Mutex<Vec<usize>>,
	pub summaries: std::sync::Mutex<usize>,
}

#[cfg(test)]
impl TranscriptSink for MemorySink {
	fn write_lecture(&self, at: &LecturePath, cues: &[Subtitle]) -> Result<()> {
		self.lectures.lock().unwrap().push((at.clone(), cues.to_vec()));
		Ok(())
	}

	fn write_section(&self, _course: &Course, section: &Section) -> Result<()> {
		self.sections.lock().unwrap().push(section.index);
		Ok(())
	}

	fn write_summary(&self, _course: &Course, _progress: &ScrapingProgress) -> Result<()> {
		*self.summaries.lock().unwrap() += 1;
		Ok(())
	}
}
