//! Resolves logical targets to live elements. Failing to find something is an ordinary answer (`None`/empty), never an error.

use crate::{
	driver::{Ctx, Driver, Selector},
	selectors::Target,
};

pub struct Locator<'a, D: Driver> {
	ctx: Ctx<'a, D>,
}

impl<'a, D: Driver> Locator<'a, D> {
	pub fn new(ctx: Ctx<'a, D>) -> Self {
		Self { ctx }
	}

	/// First element, across the target's selectors in order, that passes the target's visibility/enabled requirements
	pub async fn find(&self, target: Target) -> Option<D::Handle> {
		self.find_in(None, target, None).await
	}

	pub async fn find_within(&self, scope: &D::Handle, target: Target) -> Option<D::Handle> {
		self.find_in(Some(scope), target, None).await
	}

	/// Like [Self::find], filling `{index}`/`{ordinal}` templates with `index`
	pub async fn find_indexed(&self, target: Target, index: usize) -> Option<D::Handle> {
		self.find_in(None, target, Some(index)).await
	}

	/// All matches of the first selector that yields anything. Visibility is not checked.
	pub async fn find_all(&self, target: Target) -> Vec<D::Handle> {
		self.find_all_in(None, target).await
	}

	pub async fn find_all_within(&self, scope: &D::Handle, target: Target) -> Vec<D::Handle> {
		self.find_all_in(Some(scope), target).await
	}

	/// True if any selector of the target has a displayed match
	pub async fn is_present(&self, target: Target) -> bool {
		for selector in self.ctx.selectors.get(target) {
			for el in self.query(None, selector).await {
				if self.ctx.driver.is_displayed(&el).await.unwrap_or(false) {
					return true;
				}
			}
		}
		false
	}

	/// Trimmed text of the first match under `scope` whose text is longer than `min_len` characters
	pub async fn text_within(&self, scope: &D::Handle, target: Target, min_len: usize) -> Option<String> {
		for selector in self.ctx.selectors.get(target) {
			for el in self.query(Some(scope), selector).await {
				let Ok(text) = self.ctx.driver.text(&el).await else {
					continue;
				};
				let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
				if text.chars().count() > min_len {
					return Some(text);
				}
			}
		}
		None
	}

	pub async fn section_panel(&self, section: usize) -> Option<D::Handle> {
		self.find_indexed(Target::SectionPanel, section).await
	}

	/// Lecture rows of a panel, looked up inside its content region when one is found
	pub async fn lecture_rows_in(&self, panel: &D::Handle) -> Vec<D::Handle> {
		if let Some(content) = self.find_within(panel, Target::SectionContent).await {
			let rows = self.find_all_within(&content, Target::LectureRow).await;
			if !rows.is_empty() {
				return rows;
			}
		}
		self.find_all_within(panel, Target::LectureRow).await
	}

	/// Freshly queried rows of a section; empty when the panel is gone or collapsed
	pub async fn lecture_rows(&self, section: usize) -> Vec<D::Handle> {
		match self.section_panel(section).await {
			Some(panel) => self.lecture_rows_in(&panel).await,
			None => Vec::new(),
		}
	}

	pub async fn lecture_row(&self, section: usize, lecture: usize) -> Option<D::Handle> {
		self.lecture_rows(section).await.into_iter().nth(lecture)
	}

	/// The row's own link/button when it has a usable one, otherwise the row
	pub async fn row_click_target(&self, row: &D::Handle) -> D::Handle {
		self.find_within(row, Target::LectureClickable).await.unwrap_or_else(|| row.clone())
	}

	async fn find_in(&self, scope: Option<&D::Handle>, target: Target, index: Option<usize>) -> Option<D::Handle> {
		for selector in self.ctx.selectors.get(target) {
			let selector = match (index, selector.is_template()) {
				(Some(i), true) => selector.render(i),
				(None, true) => continue,
				_ => selector.clone(),
			};
			for el in self.query(scope, &selector).await {
				if self.usable(&el, target).await {
					tracing::trace!("{target} resolved via {selector}");
					return Some(el);
				}
			}
		}
		tracing::debug!("{target} not found");
		None
	}

	async fn find_all_in(&self, scope: Option<&D::Handle>, target: Target) -> Vec<D::Handle> {
		for selector in self.ctx.selectors.get(target) {
			if selector.is_template() {
				continue;
			}
			let found = self.query(scope, selector).await;
			if !found.is_empty() {
				tracing::trace!("{target}: {} match(es) via {selector}", found.len());
				return found;
			}
		}
		Vec::new()
	}

	async fn usable(&self, el: &D::Handle, target: Target) -> bool {
		let driver = self.ctx.driver;
		if !target.accepts_hidden() && !driver.is_displayed(el).await.unwrap_or(false) {
			return false;
		}
		if target.requires_enabled() && !driver.is_enabled(el).await.unwrap_or(false) {
			return false;
		}
		true
	}

	async fn query(&self, scope: Option<&D::Handle>, selector: &Selector) -> Vec<D::Handle> {
		match self.ctx.driver.query_all(scope, selector).await {
			Ok(found) => found,
			Err(e) => {
				tracing::trace!("selector {selector} failed: {e}");
				Vec::new()
			}
		}
	}
}
