//! Clicks and keystrokes with an escalating fallback chain. Failures end up as `false`/`None` here and go no further.

use std::{fmt, future::Future, time::Duration};

use color_eyre::Result;
use rand::distr::{Distribution, Uniform};

use crate::{
	driver::{Ctx, Driver},
	waiter::wait_until,
};

/// How a click was delivered, from most to least faithful to a real user
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClickPath {
	/// Pointer moved onto the element first, so hover-revealed controls stay rendered
	Pointer,
	Direct,
	/// `element.click()` from inside the page, ignoring overlays
	Script,
}

impl ClickPath {
	const ESCALATION: [ClickPath; 3] = [ClickPath::Pointer, ClickPath::Direct, ClickPath::Script];
}

impl fmt::Display for ClickPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ClickPath::Pointer => "pointer",
			ClickPath::Direct => "direct",
			ClickPath::Script => "script",
		};
		write!(f, "{s}")
	}
}

pub struct Executor<'a, D: Driver> {
	ctx: Ctx<'a, D>,
}

impl<'a, D: Driver> Executor<'a, D> {
	pub fn new(ctx: Ctx<'a, D>) -> Self {
		Self { ctx }
	}

	/// First click path that goes through without an error.
	/// For clicks that can silently do nothing, use [Self::click_until].
	pub async fn click(&self, el: &D::Handle) -> Option<ClickPath> {
		self.bring_into_view(el).await;
		for path in ClickPath::ESCALATION {
			match self.deliver(el, path).await {
				Ok(()) => {
					self.ctx.pause(self.ctx.timing.after_click).await;
					return Some(path);
				}
				Err(e) => tracing::debug!("{path} click failed: {e}"),
			}
		}
		None
	}

	/// Escalates through the click paths until `effect` observes that the click landed.
	///
	/// A path that errors or whose effect does not show within a short settle window hands over to the next one.
	pub async fn click_until<F, Fut>(&self, el: &D::Handle, mut effect: F) -> Option<ClickPath>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = bool>, {
		let timing = self.ctx.timing;
		let settle = timing.after_click + timing.poll * 5;
		self.bring_into_view(el).await;

		for path in ClickPath::ESCALATION {
			if let Err(e) = self.deliver(el, path).await {
				tracing::debug!("{path} click failed: {e}");
				continue;
			}
			if wait_until(&mut effect, settle, timing.poll).await {
				tracing::trace!("click took effect via {path}");
				return Some(path);
			}
			tracing::debug!("{path} click had no visible effect");
		}
		None
	}

	pub async fn hover(&self, el: &D::Handle) -> bool {
		self.bring_into_view(el).await;
		match self.ctx.driver.hover(el).await {
			Ok(()) => {
				self.ctx.pause(self.ctx.timing.hover).await;
				true
			}
			Err(e) => {
				tracing::debug!("hover failed: {e}");
				false
			}
		}
	}

	/// Replaces the input's content with `text`, one keystroke at a time when human typing is on
	pub async fn type_text(&self, el: &D::Handle, text: &str) -> bool {
		match self.try_type(el, text).await {
			Ok(()) => true,
			Err(e) => {
				tracing::debug!("typing failed: {e}");
				false
			}
		}
	}

	pub async fn press_enter(&self, el: &D::Handle) -> bool {
		self.ctx.driver.press_enter(el).await.map_err(|e| tracing::debug!("enter failed: {e}")).is_ok()
	}

	async fn try_type(&self, el: &D::Handle, text: &str) -> Result<()> {
		let driver = self.ctx.driver;
		if driver.focus(el).await.is_err() {
			self.click(el).await;
		}
		driver.clear(el).await?;

		if !self.ctx.timing.human_typing {
			return driver.send_keys(el, text).await;
		}
		let mut buf = [0u8; 4];
		for ch in text.chars() {
			driver.send_keys(el, ch.encode_utf8(&mut buf)).await?;
			self.ctx.pause(keystroke_delay()).await;
		}
		Ok(())
	}

	async fn bring_into_view(&self, el: &D::Handle) {
		if let Err(e) = self.ctx.driver.scroll_into_view(el).await {
			tracing::trace!("scroll into view failed: {e}");
		}
	}

	async fn deliver(&self, el: &D::Handle, path: ClickPath) -> Result<()> {
		let driver = self.ctx.driver;
		match path {
			ClickPath::Pointer => driver.pointer_click(el).await,
			ClickPath::Direct => driver.click(el).await,
			ClickPath::Script => driver.script_click(el).await,
		}
	}
}

/// 50..=150ms, like a quick typist
fn keystroke_delay() -> Duration {
	let mut rng = rand::rng();
	let ms = Uniform::new_inclusive(50u64, 150).map(|d| d.sample(&mut rng)).unwrap_or(100);
	Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		config::Timing,
		driver::{
			Selector,
			fake::{FakeLecture, FakeSection, FakeSite, Page, Quirks},
		},
		locator::Locator,
		orchestrator::NullObserver,
		selectors::{SelectorTable, Target},
	};

	fn one_section() -> FakeSite {
		FakeSite::course(vec![FakeSection::new("Intro", vec![FakeLecture::video("Hello", &["hi"])])])
	}

	async fn toggle_and_click(site: &FakeSite) -> Option<ClickPath> {
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let ctx = Ctx::new(site, &table, &timing, &NullObserver);
		let panel = Locator::new(ctx).section_panel(0).await.unwrap();
		let toggle = Locator::new(ctx).find_within(&panel, Target::SectionToggle).await.unwrap();
		Executor::new(ctx).click_until(&toggle, move || async move { site.expanded(0) }).await
	}

	#[tokio::test(start_paused = true)]
	async fn pointer_click_is_tried_first() {
		let site = one_section();
		assert_eq!(toggle_and_click(&site).await, Some(ClickPath::Pointer));
		assert_eq!(site.stats().strategies, vec!["pointer"]);
	}

	#[tokio::test(start_paused = true)]
	async fn erroring_pointer_falls_back_to_direct() {
		let site = one_section().with_quirks(Quirks {
			pointer_click_fails: true,
			..Default::default()
		});
		assert_eq!(toggle_and_click(&site).await, Some(ClickPath::Direct));
		assert_eq!(site.stats().section_clicks, vec![0]);
	}

	#[tokio::test(start_paused = true)]
	async fn inert_direct_click_escalates_to_script() {
		let site = one_section().with_quirks(Quirks {
			pointer_click_fails: true,
			direct_click_inert: true,
			..Default::default()
		});
		assert_eq!(toggle_and_click(&site).await, Some(ClickPath::Script));
		assert_eq!(site.stats().strategies, vec!["direct-inert", "script"]);
		assert!(site.expanded(0));
	}

	#[tokio::test(start_paused = true)]
	async fn stale_handle_fails_every_path() {
		let site = one_section();
		site.open_section(0);
		let (table, timing) = (SelectorTable::default(), Timing::fast());
		let ctx = Ctx::new(&site, &table, &timing, &NullObserver);
		let row = Locator::new(ctx).lecture_row(0, 0).await.unwrap();
		site.enter_lecture(0, 0);

		assert_eq!(Executor::new(ctx).click(&row).await, None);
		assert!(site.stats().strategies.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn typing_replaces_content() {
		let site = FakeSite::static_page(Page::new("https://www.udemy.com/", "Home", r#"<input data-k="q" type="text">"#));
		let table = SelectorTable::default();
		let timing = Timing { human_typing: true, ..Timing::fast() };
		let ctx = Ctx::new(&site, &table, &timing, &NullObserver);
		let input = site.query_all(None, &Selector::parse("input")).await.unwrap().remove(0);

		let exec = Executor::new(ctx);
		assert!(exec.type_text(&input, "rust").await);
		assert!(exec.type_text(&input, "rust async").await);
		assert_eq!(site.stats().typed.get("q").map(String::as_str), Some("rust async"));
		assert!(exec.press_enter(&input).await);
		assert_eq!(site.stats().enter_presses, 1);
	}

	#[test]
	fn keystroke_delay_in_range() {
		for _ in 0..100 {
			let d = keystroke_delay();
			assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(150));
		}
	}
}
