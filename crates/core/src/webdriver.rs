//! Minimal WebDriver client for script-driven sessions.
//!
//! Only the calls the script runner needs; anything fancier belongs in a
//! real automation library. Calls go through the same [`RestClient`] seam
//! as the provider REST API, so script sessions are testable with the same
//! scripted transport.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbt_protocol::{CapabilityBag, NavigateRequest, NewSessionReply, NewSessionRequest, ScriptRequest, ValueReply};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::rest::{ApiResponse, Credentials, Method, RestClient};

/// Client bound to one remote hub.
#[derive(Clone)]
pub struct WebDriverClient {
	rest: Arc<dyn RestClient>,
	hub: String,
	creds: Credentials,
}

impl WebDriverClient {
	pub fn new(rest: Arc<dyn RestClient>, hub: impl Into<String>, creds: Credentials) -> Self {
		Self {
			rest,
			hub: hub.into(),
			creds,
		}
	}

	/// Opens a live session with the given (native) capability set.
	pub async fn new_session(&self, caps: &CapabilityBag) -> Result<WebDriverSession> {
		let body = serde_json::to_value(NewSessionRequest::new(caps.clone()))?;
		let response = self
			.rest
			.request(Method::Post, &format!("{}/session", self.hub), Some(&self.creds), Some(&body))
			.await?
			.ensure_success("webdriver")?;
		let reply: NewSessionReply = serde_json::from_value(response.body)?;
		let id = reply
			.session_id()
			.ok_or_else(|| Error::WebDriver("no session id in hub response".into()))?
			.to_string();
		debug!(target = "cbt", session = %id, "webdriver session created");

		Ok(WebDriverSession {
			rest: self.rest.clone(),
			creds: self.creds.clone(),
			base: format!("{}/session/{}", self.hub, id),
			id,
		})
	}
}

/// A live protocol session against a remote browser.
pub struct WebDriverSession {
	rest: Arc<dyn RestClient>,
	creds: Credentials,
	base: String,
	id: String,
}

impl WebDriverSession {
	pub fn id(&self) -> &str {
		&self.id
	}

	async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
		let url = if path.is_empty() {
			self.base.clone()
		} else {
			format!("{}/{}", self.base, path)
		};
		self.rest
			.request(method, &url, Some(&self.creds), body)
			.await?
			.ensure_success("webdriver")
	}

	pub async fn navigate(&self, url: &str) -> Result<()> {
		let body = serde_json::to_value(NavigateRequest { url: url.into() })?;
		self.call(Method::Post, "url", Some(&body)).await?;
		Ok(())
	}

	/// Runs a script in the page and returns its value.
	pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
		let body = serde_json::to_value(ScriptRequest {
			script: script.into(),
			args,
		})?;
		let response = self.call(Method::Post, "execute/sync", Some(&body)).await?;
		let reply: ValueReply<Value> = serde_json::from_value(response.body)?;
		Ok(reply.value)
	}

	/// Captures a screenshot as PNG bytes.
	pub async fn screenshot(&self) -> Result<Vec<u8>> {
		let response = self.call(Method::Get, "screenshot", None).await?;
		let reply: ValueReply<String> = serde_json::from_value(response.body)?;
		BASE64
			.decode(reply.value.as_bytes())
			.map_err(|e| Error::WebDriver(format!("screenshot payload is not base64: {e}")))
	}

	/// Ends the session. A hub that already dropped it counts as success.
	pub async fn quit(&self) -> Result<()> {
		let response = self
			.rest
			.request(Method::Delete, &self.base, Some(&self.creds), None)
			.await?;
		if response.is_success() || response.status == 404 {
			return Ok(());
		}
		let text = response.body_text().to_lowercase();
		if text.contains("invalid session") || text.contains("not found") {
			return Ok(());
		}
		Err(Error::Api {
			provider: "webdriver",
			status: response.status,
			body: response.body_text(),
		})
	}
}
