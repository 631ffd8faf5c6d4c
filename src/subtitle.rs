//! Cue timing helpers: clock parsing/formatting, offset normalization and WebVTT reading

use std::sync::LazyLock;

use regex::Regex;

use crate::Subtitle;

/// `[01:02]`, `[1:02:03]`, `[00:05.250]` at the very start of a cue's text; bare clocks are left alone
static LEADING_CLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[(\d{1,2}(?::\d{1,2}){1,2}(?:[.,]\d+)?)\]\s*").unwrap());
static VTT_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// `HH:MM:SS`, truncating fractions. Negative and non-finite input renders as zero.
pub fn format_timestamp(seconds: f64) -> String {
	let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
	format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Accepts plain seconds (`83.5`), `MM:SS` and `HH:MM:SS`, each with an optional `.mmm`/`,mmm` fraction.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
	let raw = raw.trim().trim_start_matches('[').trim_end_matches(']');
	if raw.is_empty() {
		return None;
	}
	let normalized = raw.replace(',', ".");
	let parts: Vec<&str> = normalized.split(':').collect();
	if parts.len() > 3 {
		return None;
	}

	let mut total = 0.0;
	for (i, part) in parts.iter().enumerate() {
		let last = i == parts.len() - 1;
		let value: f64 = if last {
			part.parse().ok()?
		} else {
			part.parse::<u32>().ok()? as f64
		};
		if value < 0.0 || (i > 0 && value >= 60.0) {
			return None;
		}
		total = total * 60.0 + value;
	}
	total.is_finite().then_some(total)
}

/// Splits a bracketed leading clock off a cue's text, if there is one.
pub fn split_leading_clock(text: &str) -> (Option<f64>, &str) {
	match LEADING_CLOCK.captures(text) {
		Some(caps) => {
			let offset = caps.get(1).and_then(|m| parse_timestamp(m.as_str()));
			match (offset, caps.get(0)) {
				(Some(offset), Some(whole)) => (Some(offset), text[whole.end()..].trim()),
				_ => (None, text),
			}
		}
		None => (None, text),
	}
}

/// Turns raw `(offset, text)` pairs in document order into finished cues.
///
/// Cues without an offset inherit the previous one (the first defaults to 0), so document order survives the sort.
/// Nothing is dropped but blank text; each cue ends where the next begins.
pub fn finalize_cues(raw: Vec<(Option<f64>, String)>) -> Vec<Subtitle> {
	let mut last = 0.0;
	let mut cues: Vec<Subtitle> = raw
		.into_iter()
		.filter_map(|(offset, text)| {
			let text = text.trim().to_string();
			if text.is_empty() {
				return None;
			}
			let start = offset.unwrap_or(last);
			last = start;
			Some(Subtitle::new(text, start))
		})
		.collect();

	cues.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

	for i in 0..cues.len() {
		cues[i].end_seconds = match cues.get(i + 1) {
			Some(next) => next.start_seconds,
			None => cues[i].start_seconds,
		};
	}
	cues
}

/// Reads the cue blocks of a WebVTT document. Cue settings, identifiers, NOTE/STYLE blocks and inline tags are dropped.
pub fn parse_vtt(input: &str) -> Vec<Subtitle> {
	let mut cues = Vec::new();
	let normalized = input.replace("\r\n", "\n");

	for block in normalized.split("\n\n") {
		let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty()).skip_while(|l| !l.contains("-->"));
		let Some(timing) = lines.next() else {
			continue;
		};
		let Some((start_raw, rest)) = timing.split_once("-->") else {
			continue;
		};
		let end_raw = rest.split_whitespace().next().unwrap_or_default();
		let (Some(start), Some(end)) = (parse_timestamp(start_raw), parse_timestamp(end_raw)) else {
			tracing::debug!("skipping VTT cue with unreadable timing: {timing}");
			continue;
		};

		let text = lines.map(|l| VTT_TAG.replace_all(l, "").into_owned()).collect::<Vec<_>>().join(" ");
		let text = text.trim();
		if text.is_empty() {
			continue;
		}
		let mut cue = Subtitle::new(text, start);
		cue.end_seconds = end.max(start);
		cues.push(cue);
	}

	cues.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));
	cues
}
