//! Local tunnel process lifecycle.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use cbt_protocol::TunnelState;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for launching a tunnel binary.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
	/// Path to the tunnel executable.
	pub binary: PathBuf,
	/// Full argument list, including credentials and any identifier flags.
	/// The caller builds these; the tunnel does not interpret them.
	pub args: Vec<String>,
	/// Identifier under which this tunnel is shared between runs. `None`
	/// means "the unnamed tunnel".
	pub identifier: Option<String>,
	/// How long to let the process settle before declaring it up.
	pub settle: Duration,
}

impl TunnelConfig {
	pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
		Self {
			binary: binary.into(),
			args,
			identifier: None,
			settle: Duration::from_millis(100),
		}
	}

	pub fn with_identifier(mut self, identifier: Option<String>) -> Self {
		self.identifier = identifier;
		self
	}

	pub fn with_settle(mut self, settle: Duration) -> Self {
		self.settle = settle;
		self
	}
}

/// A local tunnel process.
///
/// One instance may be shared by several runs that requested the same
/// identifier, and is probed concurrently by the platform monitor, so all
/// state sits behind interior mutability.
pub struct Tunnel {
	config: TunnelConfig,
	child: Mutex<Option<Child>>,
	/// Pid of the live process; 0 when not running.
	pid: AtomicU32,
	/// Set for the duration of a user-initiated stop so the monitor does not
	/// race it with a restart.
	stopping: AtomicBool,
}

impl Tunnel {
	pub fn new(config: TunnelConfig) -> Self {
		Self {
			config,
			child: Mutex::new(None),
			pid: AtomicU32::new(0),
			stopping: AtomicBool::new(false),
		}
	}

	pub fn identifier(&self) -> Option<&str> {
		self.config.identifier.as_deref()
	}

	/// Pid of the running process, if any. This is the tunnel's identity for
	/// pool deduplication and monitor probing.
	pub fn pid(&self) -> Option<u32> {
		match self.pid.load(Ordering::SeqCst) {
			0 => None,
			p => Some(p),
		}
	}

	/// Whether a user-initiated stop is currently in flight.
	pub fn is_stopping(&self) -> bool {
		self.stopping.load(Ordering::SeqCst)
	}

	/// Substring the tunnel's command line is expected to contain in the OS
	/// process table. A recycled pid whose command no longer matches counts
	/// as dead.
	pub fn command_pattern(&self) -> String {
		self.config
			.binary
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| self.config.binary.to_string_lossy().into_owned())
	}

	/// Launch the tunnel process and wait for it to come up.
	///
	/// Restarting a handle whose previous process has died is allowed; the
	/// stale child is reaped first.
	///
	/// # Errors
	///
	/// [`Error::AlreadyRunning`] if the process is still alive,
	/// [`Error::BinaryNotFound`] if the configured binary is missing,
	/// [`Error::ArgumentConflict`] if the binary refused to start because a
	/// sibling instance holds the same arguments, and
	/// [`Error::EarlyExit`] for any other startup death.
	pub async fn start(&self) -> Result<()> {
		let mut slot = self.child.lock().await;

		if let Some(child) = slot.as_mut() {
			match child.try_wait()? {
				None => {
					return Err(Error::AlreadyRunning(self.pid.load(Ordering::SeqCst)));
				}
				Some(status) => {
					debug!(target = "cbt", %status, "reaping dead tunnel before restart");
					slot.take();
					self.pid.store(0, Ordering::SeqCst);
				}
			}
		}

		if !self.config.binary.exists() {
			return Err(Error::BinaryNotFound(self.config.binary.clone()));
		}

		let mut cmd = Command::new(&self.config.binary);
		cmd.args(&self.config.args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("failed to spawn {}: {e}", self.config.binary.display())))?;

		tokio::time::sleep(self.config.settle).await;

		match child.try_wait() {
			Ok(Some(status)) => {
				let stderr = drain_stderr(&mut child).await;
				return Err(classify_startup_death(status.to_string(), stderr));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!("failed to check tunnel process: {e}")));
			}
		}

		let pid = child.id().unwrap_or(0);
		self.pid.store(pid, Ordering::SeqCst);
		*slot = Some(child);
		debug!(target = "cbt", pid, identifier = ?self.config.identifier, "tunnel up");
		Ok(())
	}

	/// Stop the tunnel process.
	///
	/// Idempotent: stopping an already-stopped tunnel resolves successfully.
	pub async fn stop(&self) -> Result<()> {
		self.stopping.store(true, Ordering::SeqCst);
		let result = self.stop_inner().await;
		self.stopping.store(false, Ordering::SeqCst);
		result
	}

	async fn stop_inner(&self) -> Result<()> {
		let mut slot = self.child.lock().await;
		let Some(mut child) = slot.take() else {
			return Ok(());
		};

		if let Err(e) = child.kill().await {
			// Process already gone; reap below.
			debug!(target = "cbt", error = %e, "tunnel kill failed");
		}
		let _ = child.wait().await;
		self.pid.store(0, Ordering::SeqCst);
		Ok(())
	}

	/// Current liveness as seen from the child handle.
	pub async fn status(&self) -> TunnelState {
		let mut slot = self.child.lock().await;
		match slot.as_mut() {
			None => TunnelState::Stopped,
			Some(child) => match child.try_wait() {
				Ok(None) => TunnelState::Running,
				Ok(Some(status)) => {
					warn!(target = "cbt", %status, "tunnel process has exited");
					TunnelState::Stopped
				}
				Err(e) => {
					warn!(target = "cbt", error = %e, "tunnel status check failed");
					TunnelState::Stopped
				}
			},
		}
	}
}

async fn drain_stderr(child: &mut Child) -> String {
	let mut out = String::new();
	if let Some(mut stderr) = child.stderr.take() {
		let _ = stderr.read_to_string(&mut out).await;
	}
	out
}

fn classify_startup_death(status: String, stderr: String) -> Error {
	let detail = if stderr.trim().is_empty() {
		format!("status {status}")
	} else {
		format!("status {status}: {}", stderr.trim())
	};
	let lowered = stderr.to_lowercase();
	if lowered.contains("already running") || lowered.contains("local-identifier") {
		Error::ArgumentConflict(detail)
	} else {
		Error::EarlyExit(detail)
	}
}
