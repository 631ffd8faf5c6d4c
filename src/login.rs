//! Saved-cookie sessions and the semi-automatic login: the email is typed for the user, the 2FA step is theirs.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use serde_json::Value;
use v_utils::{elog, log};

use crate::{
	config::{AppConfig, Timing},
	driver::{Ctx, Driver},
	executor::Executor,
	locator::Locator,
	orchestrator::NullObserver,
	selectors::{SelectorTable, Target},
	waiter::Waiter,
};

/// How often the remaining login time is announced
const NARRATION_INTERVAL: Duration = Duration::from_secs(30);

/// Cookie snapshot kept as a JSON array of the browser's cookie objects
#[derive(Clone, Debug)]
pub struct SessionStore {
	path: PathBuf,
}

impl SessionStore {
	pub fn new(path: impl AsRef<Path>) -> Self {
		Self { path: path.as_ref().to_path_buf() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// No file means no cookies; a file that is not a JSON array is an error
	pub fn load(&self) -> Result<Vec<Value>> {
		if !self.path.exists() {
			return Ok(Vec::new());
		}
		let raw = std::fs::read_to_string(&self.path).map_err(|e| eyre!("Failed to read session file {}: {}", self.path.display(), e))?;
		serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse session file {}: {}", self.path.display(), e))
	}

	pub fn save(&self, cookies: &[Value]) -> Result<()> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			std::fs::create_dir_all(parent).map_err(|e| eyre!("Failed to create {}: {}", parent.display(), e))?;
		}
		let json = serde_json::to_string_pretty(cookies).map_err(|e| eyre!("Failed to serialize cookies: {}", e))?;
		std::fs::write(&self.path, json).map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))
	}

	/// Injects every saved cookie that is still valid. Returns `(applied, skipped)`.
	pub async fn restore<D: Driver>(&self, driver: &D) -> Result<(usize, usize)> {
		let now = chrono::Utc::now().timestamp() as f64;
		let (mut applied, mut skipped) = (0, 0);
		for cookie in self.load()? {
			if is_expired(&cookie, now) {
				skipped += 1;
				continue;
			}
			match driver.set_cookie(&cookie).await {
				Ok(()) => applied += 1,
				Err(e) => {
					tracing::debug!("skipping cookie: {e}");
					skipped += 1;
				}
			}
		}
		Ok((applied, skipped))
	}
}

/// Session cookies carry no (or a negative) expiry and never count as expired
fn is_expired(cookie: &Value, now: f64) -> bool {
	matches!(cookie.get("expires").and_then(Value::as_f64), Some(expires) if expires > 0.0 && expires < now)
}

async fn logged_in<D: Driver>(ctx: Ctx<'_, D>) -> bool {
	Locator::new(ctx).is_present(Target::LoginIndicator).await && !ctx.url().await.contains("/join/")
}

/// Makes sure the browser is logged in, from the saved session if possible, otherwise with the user's help.
/// Saves the cookies after a fresh login.
pub async fn ensure_logged_in<D: Driver>(driver: &D, selectors: &SelectorTable, timing: &Timing, config: &AppConfig, store: &SessionStore) -> Result<()> {
	let ctx = Ctx::new(driver, selectors, timing, &NullObserver);
	driver.goto(&config.base_url).await.map_err(|e| eyre!("Failed to open {}: {}", config.base_url, e))?;

	match store.restore(driver).await {
		Ok((0, skipped)) => tracing::debug!("no usable saved cookies ({skipped} skipped)"),
		Ok((applied, skipped)) => {
			log!("Restored {} cookies from {} ({} skipped)", applied, store.path().display(), skipped);
			driver.goto(&config.base_url).await.map_err(|e| eyre!("Failed to reload {}: {}", config.base_url, e))?;
			ctx.pause(timing.page_load).await;
		}
		Err(e) => elog!("Ignoring saved session: {}", e),
	}
	if logged_in(ctx).await {
		log!("Already logged in");
		return Ok(());
	}

	log!("Not logged in, starting login");
	let (locator, executor, waiter) = (Locator::new(ctx), Executor::new(ctx), Waiter::new(ctx));
	let opened = match locator.find(Target::LoginButton).await {
		Some(button) => executor.click(&button).await.is_some(),
		None => false,
	};
	if !opened {
		let url = config.login_url();
		driver.goto(&url).await.map_err(|e| eyre!("Failed to open login page {}: {}", url, e))?;
	}
	ctx.pause(timing.page_load).await;

	match &config.email {
		Some(email) =>
			if waiter.for_present(Target::EmailInput, timing.next_lecture).await {
				let typed = match locator.find(Target::EmailInput).await {
					Some(input) => executor.type_text(&input, email).await,
					None => false,
				};
				let submitted = match locator.find(Target::EmailSubmit).await {
					Some(submit) => executor.click(&submit).await.is_some(),
					None => false,
				};
				if typed && submitted {
					log!("Email submitted, finish the verification in the browser window");
				} else {
					elog!("Could not fill in the login form, finish the login in the browser window");
				}
			} else {
				elog!("Email field not found, finish the login in the browser window");
			},
		None => log!("No email configured, log in manually in the browser window"),
	}

	let budget = Duration::from_secs(config.login_timeout_secs);
	let started = tokio::time::Instant::now();
	loop {
		let remaining = budget.saturating_sub(started.elapsed());
		if remaining.is_zero() {
			bail!("Login was not completed within {}s", config.login_timeout_secs);
		}
		log!("Waiting for login ({}s left)", remaining.as_secs());
		if waiter.until(move || async move { logged_in(ctx).await }, remaining.min(NARRATION_INTERVAL)).await {
			break;
		}
	}
	log!("Login detected");

	let cookies = driver.cookies().await.map_err(|e| eyre!("Failed to read cookies: {}", e))?;
	store.save(&cookies)?;
	log!("Saved {} cookies to {}", cookies.len(), store.path().display());
	Ok(())
}
