//! [Driver] over a live Chromium tab.

use std::sync::{
	Arc,
	atomic::{AtomicU64, Ordering},
};

use chromiumoxide::{
	Page,
	cdp::browser_protocol::network::CookieParam,
	element::Element,
};
use color_eyre::{Result, eyre::eyre};
use serde_json::Value;

use super::{Driver, ScrollMetrics, Selector};

/// Attribute used to pin a scope element so a relative XPath can be rewritten into an absolute one
const SCOPE_ATTR: &str = "data-ct-scope";

const DISPLAYED_JS: &str = "function() { \
	const r = this.getBoundingClientRect(); const s = window.getComputedStyle(this); \
	return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden'; }";
const ENABLED_JS: &str = "function() { return !this.disabled && this.getAttribute('aria-disabled') !== 'true'; }";
const SCRIPT_CLICK_JS: &str = "function() { this.click(); }";
const CLEAR_JS: &str = "function() { \
	if ('value' in this) { this.value = ''; } else { this.textContent = ''; } \
	this.dispatchEvent(new Event('input', { bubbles: true })); }";
const SCROLL_METRICS_JS: &str = "function() { \
	return JSON.stringify({ top: this.scrollTop, client_height: this.clientHeight, scroll_height: this.scrollHeight }); }";

pub struct ChromiumDriver {
	page: Page,
	scopes: AtomicU64,
}

impl ChromiumDriver {
	pub fn new(page: Page) -> Self {
		Self { page, scopes: AtomicU64::new(0) }
	}

	async fn call(&self, el: &Element, function: &str) -> Result<Option<Value>> {
		let returned = el.call_js_fn(function, false).await.map_err(|e| eyre!("Failed to run script on element: {}", e))?;
		Ok(returned.result.value)
	}

	async fn call_bool(&self, el: &Element, function: &str) -> Result<bool> {
		Ok(self.call(el, function).await?.and_then(|v| v.as_bool()).unwrap_or(false))
	}

	/// XPath below `scope`: tags the scope element, then anchors the expression on that tag
	async fn scoped_xpath(&self, scope: &Element, xpath: &str) -> Result<Vec<Element>> {
		let id = self.scopes.fetch_add(1, Ordering::Relaxed).to_string();
		self.call(scope, &format!("function() {{ this.setAttribute('{SCOPE_ATTR}', '{id}'); }}")).await?;
		let anchor = format!("//*[@{SCOPE_ATTR}='{id}']");
		let absolute = match xpath.strip_prefix('.') {
			Some(rest) => format!("{anchor}{rest}"),
			None => xpath.to_string(),
		};
		let found = self.page.find_xpaths(absolute.as_str()).await;
		let _ = self.call(scope, &format!("function() {{ this.removeAttribute('{SCOPE_ATTR}'); }}")).await;
		found.map_err(|e| eyre!("Failed to evaluate XPath {}: {}", xpath, e))
	}
}

fn wrap(elements: Vec<Element>) -> Vec<Arc<Element>> {
	elements.into_iter().map(Arc::new).collect()
}

/// Saved cookies carry read-only fields (`size`, `session`, ...) that `setCookie` does not accept
fn cookie_param(cookie: &Value) -> Result<CookieParam> {
	const SETTABLE: [&str; 9] = ["name", "value", "url", "domain", "path", "secure", "httpOnly", "sameSite", "expires"];
	let Some(object) = cookie.as_object() else {
		return Err(eyre!("Cookie is not a JSON object: {}", cookie));
	};
	let settable: serde_json::Map<String, Value> = object.iter().filter(|(k, _)| SETTABLE.contains(&k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect();
	serde_json::from_value(Value::Object(settable)).map_err(|e| eyre!("Failed to parse cookie: {}", e))
}

impl Driver for ChromiumDriver {
	type Handle = Arc<Element>;

	async fn goto(&self, url: &str) -> Result<()> {
		self.page.goto(url).await.map_err(|e| eyre!("Failed to navigate to {}: {}", url, e))?;
		Ok(())
	}

	async fn current_url(&self) -> Result<String> {
		let url = self.page.url().await.map_err(|e| eyre!("Failed to read URL: {}", e))?;
		Ok(url.unwrap_or_default())
	}

	async fn title(&self) -> Result<String> {
		let title = self.page.get_title().await.map_err(|e| eyre!("Failed to read title: {}", e))?;
		Ok(title.unwrap_or_default())
	}

	async fn query_all(&self, scope: Option<&Arc<Element>>, selector: &Selector) -> Result<Vec<Arc<Element>>> {
		let found = match (scope, selector) {
			(None, Selector::Css(css)) => self.page.find_elements(css.as_str()).await,
			(None, Selector::XPath(xpath)) => self.page.find_xpaths(xpath.as_str()).await,
			(Some(scope), Selector::Css(css)) => scope.find_elements(css.as_str()).await,
			(Some(scope), Selector::XPath(xpath)) => return self.scoped_xpath(scope, xpath).await.map(wrap),
		};
		// no match is an empty result, not a failure
		Ok(found.map(wrap).unwrap_or_default())
	}

	async fn evaluate(&self, script: &str) -> Result<Value> {
		let result = self.page.evaluate(script).await.map_err(|e| eyre!("Failed to evaluate script: {}", e))?;
		Ok(result.value().cloned().unwrap_or(Value::Null))
	}

	async fn page_source(&self) -> Result<String> {
		self.page.content().await.map_err(|e| eyre!("Failed to get page HTML: {}", e))
	}

	async fn fetch_text(&self, url: &str) -> Result<String> {
		let quoted = serde_json::to_string(url).map_err(|e| eyre!("Failed to quote URL {}: {}", url, e))?;
		let script = format!("fetch({quoted}, {{ credentials: 'include' }}).then(r => r.ok ? r.text() : Promise.reject(new Error('HTTP ' + r.status)))");
		let result = self.page.evaluate_expression(script).await.map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
		result.value().and_then(Value::as_str).map(str::to_owned).ok_or_else(|| eyre!("Fetching {} returned no text", url))
	}

	async fn is_displayed(&self, el: &Arc<Element>) -> Result<bool> {
		self.call_bool(el, DISPLAYED_JS).await
	}

	async fn is_enabled(&self, el: &Arc<Element>) -> Result<bool> {
		self.call_bool(el, ENABLED_JS).await
	}

	async fn attribute(&self, el: &Arc<Element>, name: &str) -> Result<Option<String>> {
		el.attribute(name).await.map_err(|e| eyre!("Failed to read attribute {}: {}", name, e))
	}

	async fn text(&self, el: &Arc<Element>) -> Result<String> {
		let text = el.inner_text().await.map_err(|e| eyre!("Failed to read element text: {}", e))?;
		Ok(text.unwrap_or_default())
	}

	async fn scroll_into_view(&self, el: &Arc<Element>) -> Result<()> {
		el.scroll_into_view().await.map_err(|e| eyre!("Failed to scroll element into view: {}", e))?;
		Ok(())
	}

	async fn hover(&self, el: &Arc<Element>) -> Result<()> {
		el.hover().await.map_err(|e| eyre!("Failed to hover element: {}", e))?;
		Ok(())
	}

	async fn pointer_click(&self, el: &Arc<Element>) -> Result<()> {
		el.scroll_into_view().await.map_err(|e| eyre!("Failed to scroll element into view: {}", e))?;
		let point = el.clickable_point().await.map_err(|e| eyre!("Element has no clickable point: {}", e))?;
		self.page.move_mouse(point).await.map_err(|e| eyre!("Failed to move pointer: {}", e))?;
		self.page.click(point).await.map_err(|e| eyre!("Failed to click at {:?}: {}", point, e))?;
		Ok(())
	}

	async fn click(&self, el: &Arc<Element>) -> Result<()> {
		el.click().await.map_err(|e| eyre!("Failed to click element: {}", e))?;
		Ok(())
	}

	async fn script_click(&self, el: &Arc<Element>) -> Result<()> {
		self.call(el, SCRIPT_CLICK_JS).await?;
		Ok(())
	}

	async fn focus(&self, el: &Arc<Element>) -> Result<()> {
		el.focus().await.map_err(|e| eyre!("Failed to focus element: {}", e))?;
		Ok(())
	}

	async fn clear(&self, el: &Arc<Element>) -> Result<()> {
		self.call(el, CLEAR_JS).await?;
		Ok(())
	}

	async fn send_keys(&self, el: &Arc<Element>, text: &str) -> Result<()> {
		el.type_str(text).await.map_err(|e| eyre!("Failed to type into element: {}", e))?;
		Ok(())
	}

	async fn press_enter(&self, el: &Arc<Element>) -> Result<()> {
		el.press_key("Enter").await.map_err(|e| eyre!("Failed to press Enter: {}", e))?;
		Ok(())
	}

	async fn scroll_metrics(&self, el: &Arc<Element>) -> Result<ScrollMetrics> {
		let raw = self.call(el, SCROLL_METRICS_JS).await?;
		let json = raw.as_ref().and_then(Value::as_str).ok_or_else(|| eyre!("Element returned no scroll metrics"))?;
		serde_json::from_str(json).map_err(|e| eyre!("Failed to parse scroll metrics: {}", e))
	}

	async fn scroll_to(&self, el: &Arc<Element>, top: f64) -> Result<()> {
		self.call(el, &format!("function() {{ this.scrollTop = {top}; }}")).await?;
		Ok(())
	}

	async fn cookies(&self) -> Result<Vec<Value>> {
		let cookies = self.page.get_cookies().await.map_err(|e| eyre!("Failed to get cookies: {}", e))?;
		cookies.iter().map(|c| serde_json::to_value(c).map_err(|e| eyre!("Failed to serialize cookie: {}", e))).collect()
	}

	async fn set_cookie(&self, cookie: &Value) -> Result<()> {
		let param = cookie_param(cookie)?;
		self.page.set_cookie(param).await.map_err(|e| eyre!("Failed to set cookie: {}", e))?;
		Ok(())
	}
}
