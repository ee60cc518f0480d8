//! Script-driven sessions.
//!
//! A [`ScriptJob`] owns a live protocol session instead of relying on a
//! reporting webhook: the caller supplies a script that drives the browser,
//! and a decider that classifies the outcome. A deferred runner executes
//! the script shortly after session creation, swallowing per-step failures
//! so one broken script cannot take down sibling jobs in the same run.

use std::sync::Arc;
use std::time::Duration;

use cbt_protocol::{CapabilityBag, JobStatus, ScriptVerdict, StatusReport};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::JobContext;
use crate::rest::Method;
use crate::webdriver::{WebDriverClient, WebDriverSession};

/// Script driving a live session. Receives the session handle and returns
/// whatever value the caller cares about.
pub type ScriptFn = Arc<dyn Fn(Arc<WebDriverSession>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Pass/fail decider consulted after the script ran.
pub type DeciderFn = Arc<dyn Fn(Arc<WebDriverSession>) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Delay between session creation and deferred script execution.
pub(crate) const SCRIPT_START_DELAY: Duration = Duration::from_millis(200);

/// One script-driven remote session.
pub struct ScriptJob {
	ctx: JobContext,
	client: WebDriverClient,
	url: String,
	/// Native session capabilities (browser identity merged with options).
	caps: CapabilityBag,
	test_id: String,
	run_id: String,
	session: Mutex<Option<Arc<WebDriverSession>>>,
}

impl ScriptJob {
	pub fn new(ctx: &JobContext, url: impl Into<String>, caps: CapabilityBag, run_id: &str) -> Self {
		let client = WebDriverClient::new(ctx.rest.clone(), ctx.spec.hub_url, ctx.creds.clone());
		Self {
			ctx: ctx.clone(),
			client,
			url: url.into(),
			caps,
			test_id: Uuid::new_v4().to_string(),
			run_id: run_id.to_string(),
			session: Mutex::new(None),
		}
	}

	pub fn test_id(&self) -> &str {
		&self.test_id
	}

	pub fn run_id(&self) -> &str {
		&self.run_id
	}

	fn session(&self) -> Option<Arc<WebDriverSession>> {
		self.session.lock().clone()
	}

	/// Opens the protocol session. The job is unusable until this resolves.
	pub async fn create(&self) -> Result<()> {
		let session = self.client.new_session(&self.caps).await?;
		*self.session.lock() = Some(Arc::new(session));
		Ok(())
	}

	/// Navigates to the job URL and hands the live session to the script.
	pub async fn run(&self, script: &ScriptFn) -> Result<Value> {
		let session = self.session().ok_or(Error::SessionNotCreated)?;
		session.navigate(&self.url).await?;
		script(session).await
	}

	/// Classifies the session with `decider` (pass when none is given) and
	/// reports the verdict to the provider's status endpoint. A decider that
	/// errors or declines classifies as failed.
	pub async fn mark_status(&self, decider: Option<&DeciderFn>) -> Result<()> {
		let verdict = match (self.session(), decider) {
			(Some(session), Some(decider)) => match decider(session).await {
				Ok(true) => ScriptVerdict::Passed,
				Ok(false) => ScriptVerdict::Failed,
				Err(e) => {
					debug!(target = "cbt", error = %e, "decider failed; marking failed");
					ScriptVerdict::Failed
				}
			},
			(Some(_), None) => ScriptVerdict::Passed,
			(None, _) => ScriptVerdict::Failed,
		};

		let session_ref = self
			.session()
			.map(|s| s.id().to_string())
			.unwrap_or_else(|| self.test_id.clone());
		let url = format!("{}/{}", self.ctx.spec.status_url, session_ref);
		let body = serde_json::to_value(StatusReport { status: verdict })?;
		self.ctx
			.rest
			.request(Method::Put, &url, Some(&self.ctx.creds), Some(&body))
			.await?
			.ensure_success(self.ctx.spec.name)?;
		Ok(())
	}

	/// Whether the capability bag asked for debug screenshots.
	pub fn wants_debug_screenshot(&self) -> bool {
		self.caps
			.get(self.ctx.spec.debug_key)
			.and_then(Value::as_bool)
			.unwrap_or(false)
	}

	pub async fn screenshot(&self) -> Result<Vec<u8>> {
		let session = self.session().ok_or(Error::SessionNotCreated)?;
		session.screenshot().await
	}

	/// Ends the session. Succeeds silently when no session was ever created.
	pub async fn stop(&self) -> Result<()> {
		let session = self.session.lock().take();
		match session {
			None => Ok(()),
			Some(session) => session.quit().await,
		}
	}

	/// Running while the protocol session is held, stopped otherwise. The
	/// hub has no queue phase.
	pub fn status(&self) -> JobStatus {
		if self.session.lock().is_some() {
			JobStatus::Running
		} else {
			JobStatus::Stopped
		}
	}
}

/// Arms the deferred runner for a freshly created job: run the script, take
/// a debug screenshot if asked for, report the verdict, end the session.
///
/// Every step logs and swallows its own failure; sibling jobs in the run
/// must not be affected by this one going wrong.
pub(crate) fn arm_script_runner(
	job: Arc<ScriptJob>,
	script: ScriptFn,
	decider: Option<DeciderFn>,
	delay: Duration,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		tokio::time::sleep(delay).await;

		if let Err(e) = job.run(&script).await {
			warn!(target = "cbt", test = %job.test_id, error = %e, "script failed");
		}
		if job.wants_debug_screenshot() {
			if let Err(e) = job.screenshot().await {
				warn!(target = "cbt", test = %job.test_id, error = %e, "debug screenshot failed");
			}
		}
		if let Err(e) = job.mark_status(decider.as_ref()).await {
			warn!(target = "cbt", test = %job.test_id, error = %e, "status report failed");
		}
		if let Err(e) = job.stop().await {
			warn!(target = "cbt", test = %job.test_id, error = %e, "session stop failed");
		}
	})
}
