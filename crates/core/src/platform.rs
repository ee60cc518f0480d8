//! Top-level orchestrator.
//!
//! A [`Platform`] owns the run registry, the shared tunnel pool, and the
//! recurring tunnel monitor for one provider. Callers hand it neutral
//! browser/capability bags; it validates them, acquires tunnels for local
//! testing, creates jobs, and answers status queries for as long as the
//! process lives - stopped runs are retained, never deleted.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cbt_protocol::{CapabilityBag, JobStatus, RunReport, RunStatus, TunnelState};
use cbt_runtime::{Tunnel, TunnelConfig};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::CapabilityValidator;
use crate::error::{Error, Result};
use crate::job::{Job, JobContext, JobPolicies};
use crate::provider::ProviderKind;
use crate::rest::{Credentials, HttpClient, RestClient};
use crate::retry::{RetryPolicy, wait_until};
use crate::script::{DeciderFn, SCRIPT_START_DELAY, ScriptFn, ScriptJob, arm_script_runner};

/// Tunnel interface as the platform sees it. The production implementation
/// is [`cbt_runtime::Tunnel`]; tests substitute their own.
#[async_trait]
pub trait TunnelHandle: Send + Sync {
	async fn start(&self) -> cbt_runtime::Result<()>;
	async fn stop(&self) -> cbt_runtime::Result<()>;
	async fn state(&self) -> TunnelState;
	fn pid(&self) -> Option<u32>;
	fn is_stopping(&self) -> bool;
	fn identifier(&self) -> Option<&str>;
	fn command_pattern(&self) -> String;
}

#[async_trait]
impl TunnelHandle for Tunnel {
	async fn start(&self) -> cbt_runtime::Result<()> {
		Tunnel::start(self).await
	}

	async fn stop(&self) -> cbt_runtime::Result<()> {
		Tunnel::stop(self).await
	}

	async fn state(&self) -> TunnelState {
		Tunnel::status(self).await
	}

	fn pid(&self) -> Option<u32> {
		Tunnel::pid(self)
	}

	fn is_stopping(&self) -> bool {
		Tunnel::is_stopping(self)
	}

	fn identifier(&self) -> Option<&str> {
		Tunnel::identifier(self)
	}

	fn command_pattern(&self) -> String {
		Tunnel::command_pattern(self)
	}
}

/// Builds tunnels for the pool.
pub trait TunnelLauncher: Send + Sync {
	fn launch(&self, identifier: Option<&str>) -> Arc<dyn TunnelHandle>;
}

/// Launches the provider's tunnel binary from a configured path.
pub struct BinaryTunnelLauncher {
	binary: PathBuf,
	access_key: String,
	settle: Duration,
}

impl BinaryTunnelLauncher {
	pub fn new(binary: PathBuf, access_key: String, settle: Duration) -> Self {
		Self {
			binary,
			access_key,
			settle,
		}
	}
}

impl TunnelLauncher for BinaryTunnelLauncher {
	fn launch(&self, identifier: Option<&str>) -> Arc<dyn TunnelHandle> {
		let mut args = vec!["--key".to_string(), self.access_key.clone()];
		if let Some(id) = identifier {
			args.push("--local-identifier".to_string());
			args.push(id.to_string());
		}
		let config = TunnelConfig::new(&self.binary, args)
			.with_identifier(identifier.map(String::from))
			.with_settle(self.settle);
		Arc::new(Tunnel::new(config))
	}
}

/// Process-table liveness check used by the monitor.
#[async_trait]
pub trait ProcessProbe: Send + Sync {
	async fn alive(&self, pid: u32, pattern: &str) -> bool;
}

/// Probe backed by the OS process table.
pub struct OsProcessProbe;

#[async_trait]
impl ProcessProbe for OsProcessProbe {
	async fn alive(&self, pid: u32, pattern: &str) -> bool {
		match cbt_runtime::process::find(pid, pattern).await {
			Ok(alive) => alive,
			Err(e) => {
				// A broken lookup must not trigger restarts.
				warn!(target = "cbt", error = %e, "process lookup failed; assuming alive");
				true
			}
		}
	}
}

/// Platform-level tuning knobs.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
	/// Path to the provider's tunnel binary.
	pub tunnel_binary: PathBuf,
	/// Interval between tunnel monitor passes.
	pub monitor_interval: Duration,
	/// Delay between script-session creation and script execution.
	pub script_start_delay: Duration,
	/// Startup settle time for tunnel processes.
	pub tunnel_settle: Duration,
	/// Bounded wait for a dying tunnel's `stopping` flag to clear before the
	/// monitor restarts it.
	pub stopping_wait: RetryPolicy,
	pub job_policies: JobPolicies,
}

impl Default for PlatformConfig {
	fn default() -> Self {
		Self {
			tunnel_binary: PathBuf::from("tunnel"),
			monitor_interval: Duration::from_secs(30),
			script_start_delay: SCRIPT_START_DELAY,
			tunnel_settle: Duration::from_millis(100),
			stopping_wait: RetryPolicy::fixed(20, Duration::from_millis(250)),
			job_policies: JobPolicies::default(),
		}
	}
}

/// Handle returned from the run-creating calls.
#[derive(Debug, Clone, Serialize)]
pub struct RunHandle {
	pub id: String,
}

/// Platform directives read from the neutral capability bag before parsing.
struct Directives {
	local: bool,
	identifier: Option<String>,
	native_runner: bool,
}

impl Directives {
	fn from(caps: &CapabilityBag) -> Self {
		Self {
			local: caps.get("local").and_then(Value::as_bool).unwrap_or(false),
			identifier: caps
				.get("localIdentifier")
				.and_then(Value::as_str)
				.map(String::from),
			native_runner: caps
				.get("nativeRunner")
				.and_then(Value::as_bool)
				.unwrap_or(false),
		}
	}
}

/// One registered run: its jobs and the tunnel it shares, if any.
struct Run {
	jobs: Vec<Arc<Job>>,
	script_jobs: Vec<Arc<ScriptJob>>,
	tunnel: Option<Arc<dyn TunnelHandle>>,
}

/// Orchestrator for one provider.
pub struct Platform {
	ctx: JobContext,
	validator: CapabilityValidator,
	config: PlatformConfig,
	launcher: Arc<dyn TunnelLauncher>,
	probe: Arc<dyn ProcessProbe>,
	/// Live runs by run id.
	runs: DashMap<String, Run>,
	/// Stopped runs, retained for late status queries.
	done: DashMap<String, Run>,
	/// Shared tunnel pool, keyed by identifier. The lock makes the
	/// exists-or-create decision atomic.
	tunnels: Mutex<Vec<Arc<dyn TunnelHandle>>>,
	stop_monitoring: AtomicBool,
}

impl Platform {
	/// Builds a platform with production transports and credentials from the
	/// provider's environment variables.
	pub fn new(kind: ProviderKind, config: PlatformConfig) -> Result<Self> {
		let spec = kind.spec();
		let creds = spec.credentials_from_env()?;
		let launcher = Arc::new(BinaryTunnelLauncher::new(
			config.tunnel_binary.clone(),
			creds.access_key.clone(),
			config.tunnel_settle,
		));
		Self::with_parts(kind, Arc::new(HttpClient::new()), creds, config, launcher, Arc::new(OsProcessProbe))
	}

	/// Fully-injected constructor; the seam the tests use.
	pub fn with_parts(
		kind: ProviderKind,
		rest: Arc<dyn RestClient>,
		creds: Credentials,
		config: PlatformConfig,
		launcher: Arc<dyn TunnelLauncher>,
		probe: Arc<dyn ProcessProbe>,
	) -> Result<Self> {
		let spec = kind.spec();
		let validator = CapabilityValidator::new(spec)?;
		let ctx = JobContext {
			spec,
			rest,
			creds,
			policies: config.job_policies,
		};
		Ok(Self {
			ctx,
			validator,
			config,
			launcher,
			probe,
			runs: DashMap::new(),
			done: DashMap::new(),
			tunnels: Mutex::new(Vec::new()),
			stop_monitoring: AtomicBool::new(false),
		})
	}

	/// The provider's browser catalog, for enumerating valid combinations.
	pub fn browsers(&self) -> &Value {
		self.validator.catalog()
	}

	/// Pre-acquires tunnels for every capability set that requests local
	/// testing. Completion means all acquisitions have settled.
	pub async fn open(&self, capabilities_list: &[CapabilityBag]) -> Result<()> {
		for caps in capabilities_list {
			let directives = Directives::from(caps);
			if directives.local {
				self.acquire_tunnel(directives.identifier.as_deref()).await?;
			}
		}
		Ok(())
	}

	/// Creates one remote session and registers a run around it.
	pub async fn run(
		&self,
		url: &str,
		browser: &CapabilityBag,
		capabilities: &CapabilityBag,
	) -> Result<RunHandle> {
		check_url(url)?;
		let (native_browser, native_caps) = self.validator.parse(browser, capabilities)?;
		let directives = Directives::from(capabilities);
		let run_id = new_run_id();

		let tunnel = self.tunnel_for(&directives).await?;
		let job = Job::create(&self.ctx, url, &native_browser, &native_caps, &run_id, directives.native_runner).await?;

		self.runs.insert(
			run_id.clone(),
			Run {
				jobs: vec![Arc::new(job)],
				script_jobs: Vec::new(),
				tunnel,
			},
		);
		info!(target = "cbt", run = %run_id, "run registered");
		Ok(RunHandle { id: run_id })
	}

	/// Creates one session per browser and registers them as a single run.
	/// Job order in the run matches the input order.
	pub async fn run_multiple(
		&self,
		url: &str,
		browsers: &[CapabilityBag],
		capabilities: &CapabilityBag,
	) -> Result<RunHandle> {
		check_url(url)?;
		let specs = browsers
			.iter()
			.map(|browser| self.validator.parse(browser, capabilities))
			.collect::<Result<Vec<_>>>()?;
		let directives = Directives::from(capabilities);
		let run_id = new_run_id();

		let tunnel = self.tunnel_for(&directives).await?;
		let jobs = Job::create_multiple(&self.ctx, url, &specs, &run_id, directives.native_runner).await?;

		self.runs.insert(
			run_id.clone(),
			Run {
				jobs: jobs.into_iter().map(Arc::new).collect(),
				script_jobs: Vec::new(),
				tunnel,
			},
		);
		info!(target = "cbt", run = %run_id, "multi-job run registered");
		Ok(RunHandle { id: run_id })
	}

	/// Creates a script-driven session, arms the deferred runner, and
	/// registers the run.
	pub async fn run_script(
		&self,
		url: &str,
		browser: &CapabilityBag,
		capabilities: &CapabilityBag,
		script: ScriptFn,
		decider: Option<DeciderFn>,
	) -> Result<RunHandle> {
		self.run_script_multiple(url, std::slice::from_ref(browser), capabilities, script, decider)
			.await
	}

	/// Script-driven variant of [`Platform::run_multiple`].
	pub async fn run_script_multiple(
		&self,
		url: &str,
		browsers: &[CapabilityBag],
		capabilities: &CapabilityBag,
		script: ScriptFn,
		decider: Option<DeciderFn>,
	) -> Result<RunHandle> {
		check_url(url)?;
		let directives = Directives::from(capabilities);
		let run_id = new_run_id();

		let mut script_jobs = Vec::with_capacity(browsers.len());
		for browser in browsers {
			let (native_browser, native_caps) = self.validator.parse(browser, capabilities)?;
			let mut session_caps = native_caps;
			for (key, value) in &native_browser {
				session_caps.insert(key.clone(), value.clone());
			}
			script_jobs.push(Arc::new(ScriptJob::new(&self.ctx, url, session_caps, &run_id)));
		}

		let tunnel = self.tunnel_for(&directives).await?;
		join_all(script_jobs.iter().map(|job| job.create()))
			.await
			.into_iter()
			.collect::<Result<Vec<_>>>()?;

		for job in &script_jobs {
			arm_script_runner(
				job.clone(),
				script.clone(),
				decider.clone(),
				self.config.script_start_delay,
			);
		}

		self.runs.insert(
			run_id.clone(),
			Run {
				jobs: Vec::new(),
				script_jobs,
				tunnel,
			},
		);
		info!(target = "cbt", run = %run_id, "script run registered");
		Ok(RunHandle { id: run_id })
	}

	/// Stops every job in a run and moves it to the done registry.
	///
	/// Unknown run ids fail with a not-found condition; stopping a run that
	/// already stopped is a no-op. Screenshot failures are logged, not
	/// propagated; stop failures surface after the run has been retired.
	pub async fn stop(&self, run_id: &str, take_screenshot: bool) -> Result<()> {
		let Some((id, run)) = self.runs.remove(run_id) else {
			if self.done.contains_key(run_id) {
				return Ok(());
			}
			return Err(Error::UnknownRun(run_id.to_string()));
		};

		if take_screenshot {
			for job in &run.jobs {
				if let Err(e) = job.screenshot().await {
					warn!(target = "cbt", run = %id, error = %e, "job screenshot failed");
				}
			}
			for job in &run.script_jobs {
				if let Err(e) = job.screenshot().await {
					warn!(target = "cbt", run = %id, error = %e, "script screenshot failed");
				}
			}
		}

		let job_results = join_all(run.jobs.iter().map(|job| job.stop())).await;
		// Script sessions may already be gone (the deferred runner stops
		// them); that is fine.
		let script_results = join_all(run.script_jobs.iter().map(|job| job.stop())).await;

		self.done.insert(id.clone(), run);
		info!(target = "cbt", run = %id, "run stopped");

		for result in job_results.into_iter().chain(script_results) {
			result?;
		}
		Ok(())
	}

	/// Aggregate status of a run, live or done.
	///
	/// `stopped` when every sub-session stopped; `messy` when the tunnel is
	/// down while sub-sessions still run; `running` otherwise.
	pub async fn status(&self, run_id: &str) -> Result<RunReport> {
		let (jobs, script_jobs, tunnel) = self
			.snapshot(run_id)
			.ok_or_else(|| Error::UnknownRun(run_id.to_string()))?;

		let mut statuses: Vec<JobStatus> = join_all(jobs.iter().map(|job| job.status()))
			.await
			.into_iter()
			.collect::<Result<Vec<_>>>()?;
		statuses.extend(script_jobs.iter().map(|job| job.status()));

		let tunnel_state = match &tunnel {
			None => None,
			Some(tunnel) => Some(tunnel.state().await),
		};

		let all_stopped = statuses.iter().all(|s| s.is_stopped());
		let status = if all_stopped {
			RunStatus::Stopped
		} else if tunnel_state == Some(TunnelState::Stopped) {
			// Sessions claim to run without their tunnel: inconsistent
			// external state, not plain "running".
			RunStatus::Messy
		} else {
			RunStatus::Running
		};

		Ok(RunReport {
			status,
			jobs: statuses,
			tunnel: tunnel_state
				.map(|s| s.to_string())
				.unwrap_or_else(|| "none".into()),
		})
	}

	/// Stops monitoring, every live run, and every pooled tunnel.
	pub async fn close(&self, take_screenshot: bool) -> Result<()> {
		self.stop_monitoring.store(true, Ordering::SeqCst);

		let ids: Vec<String> = self.runs.iter().map(|entry| entry.key().clone()).collect();
		for id in ids {
			match self.stop(&id, take_screenshot).await {
				// A run stopped concurrently is fine.
				Ok(()) | Err(Error::UnknownRun(_)) => {}
				Err(e) => return Err(e),
			}
		}

		let mut pool = self.tunnels.lock().await;
		for tunnel in pool.drain(..) {
			// Stop is idempotent; an already-stopped tunnel resolves Ok.
			if let Err(e) = tunnel.stop().await {
				warn!(target = "cbt", error = %e, "tunnel stop failed during close");
			}
		}
		Ok(())
	}

	/// Spawns the recurring tunnel monitor.
	///
	/// Each pass probes every pooled tunnel's process and restarts the dead
	/// ones. The loop reschedules itself unconditionally - an error in one
	/// pass is logged and the next tick happens anyway.
	pub fn start_monitor(self: &Arc<Self>) -> JoinHandle<()> {
		let platform = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticks = tokio::time::interval(platform.config.monitor_interval);
			ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first tick of a tokio interval fires immediately.
			ticks.tick().await;
			loop {
				ticks.tick().await;
				if platform.stop_monitoring.load(Ordering::SeqCst) {
					debug!(target = "cbt", "tunnel monitor stopping");
					break;
				}
				if let Err(e) = platform.monitor_pass().await {
					warn!(target = "cbt", error = %e, "tunnel monitor pass failed");
				}
			}
		})
	}

	/// One monitor pass over the tunnel pool.
	pub(crate) async fn monitor_pass(&self) -> Result<()> {
		let tunnels: Vec<Arc<dyn TunnelHandle>> = self.tunnels.lock().await.clone();
		for tunnel in tunnels {
			let died = match tunnel.pid() {
				Some(pid) => !self.probe.alive(pid, &tunnel.command_pattern()).await,
				None => true,
			};
			if !died {
				continue;
			}

			warn!(target = "cbt", identifier = ?tunnel.identifier(), "tunnel died; restarting");
			// A user-initiated stop may be in flight; let it finish instead
			// of racing it.
			{
				let tunnel = tunnel.clone();
				wait_until("tunnel stop clearance", self.config.stopping_wait, move || {
					let tunnel = tunnel.clone();
					async move { Ok(!tunnel.is_stopping()) }
				})
				.await?;
			}

			match tunnel.start().await {
				Ok(()) => info!(target = "cbt", identifier = ?tunnel.identifier(), "tunnel restarted"),
				Err(cbt_runtime::Error::ArgumentConflict(msg)) => {
					// A sibling tunnel already holds these arguments; the
					// coverage it provides is equivalent.
					debug!(target = "cbt", msg, "tunnel restart skipped");
				}
				Err(e) => {
					warn!(target = "cbt", error = %e, "tunnel restart failed");
				}
			}
		}
		Ok(())
	}

	/// Clones a run's contents out of whichever registry holds it, so no
	/// registry lock is held across awaits.
	#[allow(clippy::type_complexity)]
	fn snapshot(
		&self,
		run_id: &str,
	) -> Option<(Vec<Arc<Job>>, Vec<Arc<ScriptJob>>, Option<Arc<dyn TunnelHandle>>)> {
		let from = |run: &Run| (run.jobs.clone(), run.script_jobs.clone(), run.tunnel.clone());
		self.runs
			.get(run_id)
			.map(|entry| from(entry.value()))
			.or_else(|| self.done.get(run_id).map(|entry| from(entry.value())))
	}

	async fn tunnel_for(&self, directives: &Directives) -> Result<Option<Arc<dyn TunnelHandle>>> {
		if !directives.local {
			return Ok(None);
		}
		self.acquire_tunnel(directives.identifier.as_deref())
			.await
			.map(Some)
	}

	/// Acquires or reuses the tunnel for an identifier.
	///
	/// The pool lock is held across the whole exists-or-create decision, so
	/// two concurrent first requests for one identifier cannot race into
	/// duplicate tunnels.
	async fn acquire_tunnel(&self, identifier: Option<&str>) -> Result<Arc<dyn TunnelHandle>> {
		let mut pool = self.tunnels.lock().await;
		if let Some(existing) = pool.iter().find(|t| t.identifier() == identifier) {
			debug!(target = "cbt", ?identifier, "reusing pooled tunnel");
			return Ok(existing.clone());
		}

		let tunnel = self.launcher.launch(identifier);
		tunnel.start().await?;

		// Dedup by process id: a launcher handing back a shared instance
		// must not land in the pool twice.
		let pid = tunnel.pid();
		if pid.is_some() && pool.iter().any(|t| t.pid() == pid) {
			return Ok(tunnel);
		}
		pool.push(tunnel.clone());
		info!(target = "cbt", ?identifier, pid = ?tunnel.pid(), "tunnel pooled");
		Ok(tunnel)
	}
}

fn new_run_id() -> String {
	Uuid::new_v4().to_string()
}

fn check_url(url: &str) -> Result<()> {
	url::Url::parse(url).map_err(|e| Error::InvalidUrl {
		url: url.to_string(),
		reason: e.to_string(),
	})?;
	Ok(())
}
