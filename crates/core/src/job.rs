//! Remote test sessions driven through a provider's REST API.
//!
//! A [`Job`] is one remote browser session. Creation submits the native
//! capability payload; afterwards the job's provider-assigned id and
//! endpoint are fixed and status/stop/screenshot act on that endpoint.

use std::sync::Arc;
use std::time::Duration;

use cbt_protocol::{CapabilityBag, JobStatus, ScreenshotReply};
use futures::future::join_all;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::provider::ProviderSpec;
use crate::rest::{ApiResponse, Credentials, Method, RestClient};
use crate::retry::{RetryPolicy, retry, wait_until};

/// Per-operation retry policies.
#[derive(Debug, Clone, Copy)]
pub struct JobPolicies {
	/// Polling for a queued job to get a worker before termination.
	pub dequeue: RetryPolicy,
	/// Polling for the job to report stopped after termination.
	pub confirm_stop: RetryPolicy,
	/// Screenshot attempts.
	pub screenshot: RetryPolicy,
}

impl Default for JobPolicies {
	fn default() -> Self {
		Self {
			dequeue: RetryPolicy::fixed(30, Duration::from_secs(1)),
			confirm_stop: RetryPolicy::fixed(30, Duration::from_secs(2)),
			screenshot: RetryPolicy::exponential(5, Duration::from_millis(500)),
		}
	}
}

/// Shared pieces every job of one platform instance uses.
#[derive(Clone)]
pub struct JobContext {
	pub spec: &'static ProviderSpec,
	pub rest: Arc<dyn RestClient>,
	pub creds: Credentials,
	pub policies: JobPolicies,
}

/// One remote browser test session.
pub struct Job {
	ctx: JobContext,
	/// Generated sub-identifier; pairs with the run id for native-runner
	/// correlation.
	test_id: String,
	/// Native payload submitted at creation, kept for late inspection.
	settings: CapabilityBag,
	/// Provider-assigned session id.
	id: String,
	/// Per-job REST endpoint derived from the id.
	endpoint: String,
}

impl Job {
	/// Creates one remote session.
	///
	/// With `is_native` set the page URL is decorated with correlation query
	/// parameters so in-browser instrumentation can report results against
	/// this job.
	pub async fn create(
		ctx: &JobContext,
		url: &str,
		browser: &CapabilityBag,
		capabilities: &CapabilityBag,
		run_id: &str,
		is_native: bool,
	) -> Result<Job> {
		let test_id = Uuid::new_v4().to_string();

		let mut settings = capabilities.clone();
		for (key, value) in browser {
			settings.insert(key.clone(), value.clone());
		}
		let target = if is_native {
			decorate_url(url, run_id, &test_id)
		} else {
			url.to_string()
		};
		settings.insert("url".into(), Value::String(target));

		let response = ctx
			.rest
			.request(
				Method::Post,
				ctx.spec.worker_url,
				Some(&ctx.creds),
				Some(&Value::Object(settings.clone())),
			)
			.await?
			.ensure_success(ctx.spec.name)?;

		let id = match response.body.pointer(ctx.spec.id_pointer) {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Number(n)) => n.to_string(),
			_ => {
				return Err(Error::Api {
					provider: ctx.spec.name,
					status: response.status,
					body: format!("no session id in creation response: {}", response.body),
				});
			}
		};
		let endpoint = format!("{}/{}", ctx.spec.worker_url, id);
		debug!(target = "cbt", provider = ctx.spec.name, id, "job created");

		Ok(Job {
			ctx: ctx.clone(),
			test_id,
			settings,
			id,
			endpoint,
		})
	}

	/// Creates one session per browser spec, concurrently.
	///
	/// The result preserves the input order; completion order across the
	/// concurrent creations is unspecified.
	pub async fn create_multiple(
		ctx: &JobContext,
		url: &str,
		specs: &[(CapabilityBag, CapabilityBag)],
		run_id: &str,
		is_native: bool,
	) -> Result<Vec<Job>> {
		let creations = specs
			.iter()
			.map(|(browser, caps)| Job::create(ctx, url, browser, caps, run_id, is_native));
		join_all(creations).await.into_iter().collect()
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn test_id(&self) -> &str {
		&self.test_id
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Native payload this job was created with.
	pub fn settings(&self) -> &CapabilityBag {
		&self.settings
	}

	/// Polls the provider for this session's status.
	pub async fn status(&self) -> Result<JobStatus> {
		let response = self
			.ctx
			.rest
			.request(Method::Get, &self.endpoint, Some(&self.ctx.creds), None)
			.await?;
		if response.status == 404 {
			// The provider forgot the session entirely.
			return Ok(JobStatus::Stopped);
		}
		let response = response.ensure_success(self.ctx.spec.name)?;
		let raw = response
			.body
			.pointer(self.ctx.spec.status_pointer)
			.and_then(Value::as_str);
		Ok(JobStatus::from_provider(raw))
	}

	/// Terminates this session.
	///
	/// Waits for the job to leave the provider queue first (terminating a
	/// queued job is rejected by some providers), then issues the terminate
	/// call and polls until the provider reports it stopped. A session that
	/// is already gone counts as stopped.
	pub async fn stop(&self) -> Result<()> {
		wait_until("job dequeue", self.ctx.policies.dequeue, || async move {
			Ok(self.status().await? != JobStatus::Queue)
		})
		.await?;

		let response = self
			.ctx
			.rest
			.request(Method::Delete, &self.endpoint, Some(&self.ctx.creds), None)
			.await?;
		if !response.is_success() && !already_stopped(&response) {
			return Err(Error::Api {
				provider: self.ctx.spec.name,
				status: response.status,
				body: response.body_text(),
			});
		}

		wait_until("job stop confirmation", self.ctx.policies.confirm_stop, || async move {
			Ok(self.status().await?.is_stopped())
		})
		.await
	}

	/// Fetches a screenshot of the live session.
	///
	/// Providers render screenshots asynchronously, so this retries until a
	/// URL is available. A "worker not found" reply is terminal: the session
	/// is gone and no retry will bring it back.
	pub async fn screenshot(&self) -> Result<String> {
		let url = format!("{}/{}", self.endpoint, self.ctx.spec.screenshot_path);
		let url = url.as_str();
		retry("job screenshot", self.ctx.policies.screenshot, || async move {
			let response = self
				.ctx
				.rest
				.request(Method::Get, url, Some(&self.ctx.creds), None)
				.await?;
			if worker_gone(&response) {
				return Err(Error::WorkerGone);
			}
			let response = response.ensure_success(self.ctx.spec.name)?;
			let reply: ScreenshotReply = serde_json::from_value(response.body.clone())?;
			reply.url.ok_or_else(|| Error::Api {
				provider: self.ctx.spec.name,
				status: response.status,
				body: "screenshot not ready".into(),
			})
		})
		.await
	}
}

/// Appends the native-runner correlation parameters, inserting `?` if the
/// URL has no query string yet and `&` otherwise.
fn decorate_url(url: &str, run_id: &str, test_id: &str) -> String {
	let sep = if url.contains('?') { '&' } else { '?' };
	format!("{url}{sep}cbtr_run={run_id}&cbtr_test={test_id}")
}

fn already_stopped(response: &ApiResponse) -> bool {
	if response.status == 404 {
		return true;
	}
	let text = response.body_text().to_lowercase();
	text.contains("already stopped") || text.contains("not found")
}

fn worker_gone(response: &ApiResponse) -> bool {
	response.body_text().to_lowercase().contains("worker not found")
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::provider::ProviderKind;
	use crate::testing::FakeRest;

	fn quick_policies() -> JobPolicies {
		JobPolicies {
			dequeue: RetryPolicy::fixed(5, Duration::from_millis(1)),
			confirm_stop: RetryPolicy::fixed(5, Duration::from_millis(1)),
			screenshot: RetryPolicy::fixed(3, Duration::from_millis(1)),
		}
	}

	fn ctx(rest: Arc<FakeRest>) -> JobContext {
		JobContext {
			spec: ProviderKind::BrowserStack.spec(),
			rest,
			creds: Credentials::new("user", "key"),
			policies: quick_policies(),
		}
	}

	fn browser() -> CapabilityBag {
		json!({ "os": "Windows", "os_version": "10", "browser": "firefox" })
			.as_object()
			.unwrap()
			.clone()
	}

	#[tokio::test]
	async fn create_assigns_id_and_endpoint() {
		let rest = FakeRest::with_replies(vec![(200, json!({ "id": 4242 }))]);
		let job = Job::create(&ctx(rest.clone()), "http://localhost:8080/t", &browser(), &CapabilityBag::new(), "run-1", false)
			.await
			.unwrap();
		assert_eq!(job.id(), "4242");
		assert!(job.endpoint().ends_with("/worker/4242"));

		let (method, url, body) = rest.recorded()[0].clone();
		assert_eq!(method, Method::Post);
		assert!(url.ends_with("/worker"));
		let body = body.unwrap();
		assert_eq!(body["url"], json!("http://localhost:8080/t"));
		assert_eq!(body["browser"], json!("firefox"));
	}

	#[tokio::test]
	async fn native_runner_urls_carry_correlation_parameters() {
		let rest = FakeRest::with_replies(vec![(200, json!({ "id": 1 }))]);
		let job = Job::create(&ctx(rest.clone()), "http://localhost/t", &browser(), &CapabilityBag::new(), "run-9", true)
			.await
			.unwrap();
		let (_, _, body) = rest.recorded()[0].clone();
		let url = body.unwrap()["url"].as_str().unwrap().to_string();
		assert!(url.starts_with("http://localhost/t?cbtr_run=run-9&cbtr_test="));
		assert!(url.ends_with(job.test_id()));
	}

	#[tokio::test]
	async fn native_runner_appends_to_existing_query() {
		let rest = FakeRest::with_replies(vec![(200, json!({ "id": 1 }))]);
		Job::create(&ctx(rest.clone()), "http://localhost/t?a=1", &browser(), &CapabilityBag::new(), "r", true)
			.await
			.unwrap();
		let (_, _, body) = rest.recorded()[0].clone();
		let url = body.unwrap()["url"].as_str().unwrap().to_string();
		assert!(url.starts_with("http://localhost/t?a=1&cbtr_run=r&cbtr_test="));
	}

	#[tokio::test]
	async fn create_multiple_preserves_order() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": "a" })),
			(200, json!({ "id": "b" })),
			(200, json!({ "id": "c" })),
		]);
		let specs: Vec<_> = (0..3).map(|_| (browser(), CapabilityBag::new())).collect();
		let jobs = Job::create_multiple(&ctx(rest), "http://localhost/t", &specs, "r", false)
			.await
			.unwrap();
		let ids: Vec<_> = jobs.iter().map(|j| j.id().to_string()).collect();
		assert_eq!(ids, ["a", "b", "c"]);
	}

	#[tokio::test]
	async fn status_maps_provider_vocabulary() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": 7 })),
			(200, json!({ "status": "running" })),
			(200, json!({ "status": "queue" })),
			(200, json!({ "other": 1 })),
			(404, json!({ "message": "worker not found" })),
		]);
		let job = Job::create(&ctx(rest), "http://localhost/t", &browser(), &CapabilityBag::new(), "r", false)
			.await
			.unwrap();
		assert_eq!(job.status().await.unwrap(), JobStatus::Running);
		assert_eq!(job.status().await.unwrap(), JobStatus::Queue);
		assert_eq!(job.status().await.unwrap(), JobStatus::Stopped);
		assert_eq!(job.status().await.unwrap(), JobStatus::Stopped);
	}

	#[tokio::test]
	async fn stop_waits_out_the_queue_then_confirms() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": 7 })),
			// dequeue wait: queued twice, then running
			(200, json!({ "status": "queue" })),
			(200, json!({ "status": "queue" })),
			(200, json!({ "status": "running" })),
			// terminate
			(200, json!({})),
			// confirm: still running once, then stopped
			(200, json!({ "status": "running" })),
			(200, json!({ "status": "stopped" })),
		]);
		let job = Job::create(&ctx(rest.clone()), "http://localhost/t", &browser(), &CapabilityBag::new(), "r", false)
			.await
			.unwrap();
		job.stop().await.unwrap();
		let methods: Vec<_> = rest.recorded().iter().map(|(m, _, _)| *m).collect();
		assert_eq!(
			methods,
			[
				Method::Post,
				Method::Get,
				Method::Get,
				Method::Get,
				Method::Delete,
				Method::Get,
				Method::Get
			]
		);
	}

	#[tokio::test]
	async fn stop_tolerates_a_session_that_is_already_gone() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": 7 })),
			(200, json!({ "status": "running" })),
			(404, json!({ "message": "session not found" })),
			(404, json!({})),
		]);
		let job = Job::create(&ctx(rest), "http://localhost/t", &browser(), &CapabilityBag::new(), "r", false)
			.await
			.unwrap();
		job.stop().await.unwrap();
	}

	#[tokio::test]
	async fn screenshot_retries_until_a_url_appears() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": 7 })),
			(200, json!({})),
			(200, json!({ "url": "https://shots.example/1.png" })),
		]);
		let job = Job::create(&ctx(rest), "http://localhost/t", &browser(), &CapabilityBag::new(), "r", false)
			.await
			.unwrap();
		assert_eq!(job.screenshot().await.unwrap(), "https://shots.example/1.png");
	}

	#[tokio::test]
	async fn screenshot_of_a_gone_worker_is_terminal() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": 7 })),
			(200, json!({ "message": "Worker not found" })),
		]);
		let job = Job::create(&ctx(rest.clone()), "http://localhost/t", &browser(), &CapabilityBag::new(), "r", false)
			.await
			.unwrap();
		assert!(matches!(job.screenshot().await.unwrap_err(), Error::WorkerGone));
		// One creation call plus exactly one screenshot attempt: no retries.
		assert_eq!(rest.recorded().len(), 2);
	}

	#[tokio::test]
	async fn exhausted_dequeue_wait_is_distinct() {
		let rest = FakeRest::with_replies(vec![
			(200, json!({ "id": 7 })),
			(200, json!({ "status": "queue" })),
			(200, json!({ "status": "queue" })),
			(200, json!({ "status": "queue" })),
			(200, json!({ "status": "queue" })),
			(200, json!({ "status": "queue" })),
		]);
		let job = Job::create(&ctx(rest), "http://localhost/t", &browser(), &CapabilityBag::new(), "r", false)
			.await
			.unwrap();
		assert!(matches!(
			job.stop().await.unwrap_err(),
			Error::RetriesExhausted { op: "job dequeue", .. }
		));
	}
}
