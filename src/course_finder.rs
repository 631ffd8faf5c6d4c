//! Finding an enrolled course by (approximate) name on the "My learning" page.

use std::collections::HashSet;

use crate::{
	Course,
	driver::{Ctx, Driver},
	executor::Executor,
	locator::Locator,
	selectors::Target,
	waiter::Waiter,
};

/// Minimum [match_score] for a card to be opened
pub const MATCH_THRESHOLD: f64 = 0.3;

pub fn my_learning_url(base_url: &str) -> String {
	format!("{}/home/my-courses/learning/", base_url.trim_end_matches('/'))
}

fn on_my_learning(url: &str) -> bool {
	url.contains("my-courses") || url.contains("my-learning")
}

fn on_course_page(url: &str) -> bool {
	url.contains("/course/")
}

/// How well a course card title matches the query, case-insensitive, in `0.0..=1.0`.
///
/// Exact match 1.0, title containing the query 0.8, query containing the title 0.7, else the Jaccard overlap of their words.
pub fn match_score(title: &str, query: &str) -> f64 {
	let (title, query) = (title.trim().to_lowercase(), query.trim().to_lowercase());
	if title.is_empty() || query.is_empty() {
		return 0.0;
	}
	if title == query {
		return 1.0;
	}
	if title.contains(&query) {
		return 0.8;
	}
	if query.contains(&title) {
		return 0.7;
	}
	let a: HashSet<&str> = title.split_whitespace().collect();
	let b: HashSet<&str> = query.split_whitespace().collect();
	let union = a.union(&b).count();
	if union == 0 {
		return 0.0;
	}
	a.intersection(&b).count() as f64 / union as f64
}

pub struct CourseFinder<'a, D: Driver> {
	ctx: Ctx<'a, D>,
	my_learning_url: String,
}

impl<'a, D: Driver> CourseFinder<'a, D> {
	pub fn new(ctx: Ctx<'a, D>, base_url: &str) -> Self {
		Self {
			ctx,
			my_learning_url: my_learning_url(base_url),
		}
	}

	/// Link in the header first, direct navigation if that does not get us there
	pub async fn go_to_my_learning(&self) -> bool {
		let ctx = self.ctx;
		let timing = ctx.timing;
		let waiter = Waiter::new(ctx);
		if on_my_learning(&ctx.url().await) {
			return true;
		}

		if let Some(link) = Locator::new(ctx).find(Target::MyLearningLink).await {
			ctx.log("Opening My learning");
			if Executor::new(ctx).click(&link).await.is_some() && waiter.for_url(on_my_learning, timing.next_lecture).await {
				return true;
			}
			tracing::debug!("my learning link did not navigate, going to {} directly", self.my_learning_url);
		}

		if let Err(e) = ctx.driver.goto(&self.my_learning_url).await {
			ctx.log(format!("Failed to open {}: {e}", self.my_learning_url));
			return false;
		}
		waiter.for_url(on_my_learning, timing.next_lecture).await
	}

	/// Searches the enrolled courses for `name` and opens the best-scoring card
	pub async fn search_and_select(&self, name: &str) -> Option<Course> {
		let ctx = self.ctx;
		let timing = ctx.timing;
		let (locator, executor, waiter) = (Locator::new(ctx), Executor::new(ctx), Waiter::new(ctx));

		match locator.find(Target::SearchInput).await {
			Some(input) => {
				ctx.log(format!("Searching my courses for \"{name}\""));
				if executor.type_text(&input, name).await {
					let clicked = match locator.find(Target::SearchButton).await {
						Some(button) => executor.click(&button).await.is_some(),
						None => false,
					};
					if !clicked {
						if let Some(input) = locator.find(Target::SearchInput).await {
							executor.press_enter(&input).await;
						}
					}
					ctx.pause(timing.page_load).await;
					waiter.for_absent(Target::Loader, timing.next_lecture).await;
				} else {
					ctx.log("Could not type into the search box, looking at the listed courses");
				}
			}
			None => tracing::debug!("no search box, scoring the cards already on the page"),
		}

		let (position, title, score) = self.best_card(name).await?;
		if score < MATCH_THRESHOLD {
			ctx.log(format!("Closest course is \"{title}\" (score {score:.2}), not close enough"));
			return None;
		}
		ctx.log(format!("Opening \"{title}\" (score {score:.2})"));

		let card = locator.find_all(Target::CourseCard).await.into_iter().nth(position)?;
		let target = locator.find_within(&card, Target::CourseLink).await.unwrap_or(card);
		if executor.click_until(&target, move || async move { on_course_page(&ctx.url().await) }).await.is_none()
			&& !waiter.for_url(on_course_page, timing.next_lecture).await
		{
			ctx.log(format!("Clicking \"{title}\" did not open the course"));
			return None;
		}

		let mut course = Course::new(title);
		course.url = Some(ctx.url().await);
		Some(course)
	}

	/// Position, title and score of the card that matches `name` best
	async fn best_card(&self, name: &str) -> Option<(usize, String, f64)> {
		let locator = Locator::new(self.ctx);
		let mut best: Option<(usize, String, f64)> = None;
		for (i, card) in locator.find_all(Target::CourseCard).await.iter().enumerate() {
			let Some(title) = locator.text_within(card, Target::CourseTitle, 0).await else {
				continue;
			};
			let score = match_score(&title, name);
			tracing::trace!("card {i} \"{title}\" scores {score:.2}");
			if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
				best = Some((i, title, score));
			}
		}
		if best.is_none() {
			self.ctx.log("No course cards on the page");
		}
		best
	}
}
