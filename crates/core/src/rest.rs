//! REST seam to provider APIs.
//!
//! Every provider call goes through the [`RestClient`] trait so tests can
//! substitute a scripted transport. The production implementation is a thin
//! wrapper over `reqwest` with basic auth.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// HTTP method subset used by provider APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
	Get,
	Post,
	Put,
	Delete,
}

/// Basic-auth credentials for a provider account.
#[derive(Debug, Clone)]
pub struct Credentials {
	pub username: String,
	pub access_key: String,
}

impl Credentials {
	pub fn new(username: impl Into<String>, access_key: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			access_key: access_key.into(),
		}
	}

	/// Reads credentials from a pair of environment variables.
	pub fn from_env(user_env: &'static str, key_env: &'static str) -> Result<Self> {
		match (std::env::var(user_env), std::env::var(key_env)) {
			(Ok(user), Ok(key)) if !user.is_empty() && !key.is_empty() => Ok(Self::new(user, key)),
			_ => Err(Error::MissingCredentials { user_env, key_env }),
		}
	}
}

/// Response envelope from a provider call.
///
/// The body is parsed as JSON when possible and carried as a raw string
/// value otherwise; callers pick fields out with JSON pointers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
	pub status: u16,
	pub body: Value,
}

impl ApiResponse {
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Converts a non-success response into an API error.
	pub fn ensure_success(self, provider: &'static str) -> Result<ApiResponse> {
		if self.is_success() {
			Ok(self)
		} else {
			Err(Error::Api {
				provider,
				status: self.status,
				body: self.body_text(),
			})
		}
	}

	/// Body rendered for error messages and substring checks.
	pub fn body_text(&self) -> String {
		match &self.body {
			Value::String(s) => s.clone(),
			Value::Null => String::new(),
			other => other.to_string(),
		}
	}
}

/// Transport over which provider calls are issued.
#[async_trait]
pub trait RestClient: Send + Sync {
	async fn request(
		&self,
		method: Method,
		url: &str,
		auth: Option<&Credentials>,
		body: Option<&Value>,
	) -> Result<ApiResponse>;
}

/// `reqwest`-backed client used in production.
pub struct HttpClient {
	inner: reqwest::Client,
}

impl HttpClient {
	pub fn new() -> Self {
		Self {
			inner: reqwest::Client::new(),
		}
	}
}

impl Default for HttpClient {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RestClient for HttpClient {
	async fn request(
		&self,
		method: Method,
		url: &str,
		auth: Option<&Credentials>,
		body: Option<&Value>,
	) -> Result<ApiResponse> {
		let method = match method {
			Method::Get => reqwest::Method::GET,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
			Method::Delete => reqwest::Method::DELETE,
		};
		let mut request = self.inner.request(method, url);
		if let Some(creds) = auth {
			request = request.basic_auth(&creds.username, Some(&creds.access_key));
		}
		if let Some(body) = body {
			request = request.json(body);
		}

		let response = request.send().await?;
		let status = response.status().as_u16();
		let text = response.text().await?;
		let body = if text.is_empty() {
			Value::Null
		} else {
			serde_json::from_str(&text).unwrap_or(Value::String(text))
		};
		Ok(ApiResponse { status, body })
	}
}
