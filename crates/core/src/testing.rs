//! Test doubles for the external seams.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use cbt_protocol::TunnelState;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;
use crate::platform::{ProcessProbe, TunnelHandle, TunnelLauncher};
use crate::rest::{ApiResponse, Credentials, Method, RestClient};

/// Scripted REST transport: hands out canned replies in order and records
/// every request it saw.
pub struct FakeRest {
	replies: Mutex<VecDeque<ApiResponse>>,
	recorded: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl FakeRest {
	pub fn with_replies(replies: Vec<(u16, Value)>) -> Arc<Self> {
		Arc::new(Self {
			replies: Mutex::new(
				replies
					.into_iter()
					.map(|(status, body)| ApiResponse { status, body })
					.collect(),
			),
			recorded: Mutex::new(Vec::new()),
		})
	}

	pub fn push_reply(&self, status: u16, body: Value) {
		self.replies.lock().push_back(ApiResponse { status, body });
	}

	pub fn recorded(&self) -> Vec<(Method, String, Option<Value>)> {
		self.recorded.lock().clone()
	}
}

#[async_trait]
impl RestClient for FakeRest {
	async fn request(
		&self,
		method: Method,
		url: &str,
		_auth: Option<&Credentials>,
		body: Option<&Value>,
	) -> Result<ApiResponse> {
		self.recorded
			.lock()
			.push((method, url.to_string(), body.cloned()));
		match self.replies.lock().pop_front() {
			Some(reply) => Ok(reply),
			None => panic!("FakeRest ran out of replies at {method:?} {url}"),
		}
	}
}

/// In-memory tunnel double with controllable liveness.
pub struct FakeTunnel {
	identifier: Option<String>,
	pid: u32,
	/// Whether the handle believes it owns a process (what `pid()` reports).
	has_pid: AtomicBool,
	/// Whether the backing "process" is actually alive (what the probe sees).
	running: AtomicBool,
	stopping: AtomicBool,
	pub starts: AtomicU32,
	pub stops: AtomicU32,
	/// Error the next `start` call should fail with.
	pub fail_start: Mutex<Option<cbt_runtime::Error>>,
}

impl FakeTunnel {
	pub fn new(identifier: Option<&str>, pid: u32) -> Arc<Self> {
		Arc::new(Self {
			identifier: identifier.map(String::from),
			pid,
			has_pid: AtomicBool::new(false),
			running: AtomicBool::new(false),
			stopping: AtomicBool::new(false),
			starts: AtomicU32::new(0),
			stops: AtomicU32::new(0),
			fail_start: Mutex::new(None),
		})
	}

	/// Simulates the backing process dying behind our back.
	pub fn kill_process(&self) {
		self.running.store(false, Ordering::SeqCst);
	}

	pub fn set_stopping(&self, stopping: bool) {
		self.stopping.store(stopping, Ordering::SeqCst);
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl TunnelHandle for FakeTunnel {
	async fn start(&self) -> cbt_runtime::Result<()> {
		self.starts.fetch_add(1, Ordering::SeqCst);
		if let Some(err) = self.fail_start.lock().take() {
			return Err(err);
		}
		self.running.store(true, Ordering::SeqCst);
		self.has_pid.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn stop(&self) -> cbt_runtime::Result<()> {
		self.stops.fetch_add(1, Ordering::SeqCst);
		self.running.store(false, Ordering::SeqCst);
		self.has_pid.store(false, Ordering::SeqCst);
		Ok(())
	}

	async fn state(&self) -> TunnelState {
		if self.is_running() {
			TunnelState::Running
		} else {
			TunnelState::Stopped
		}
	}

	fn pid(&self) -> Option<u32> {
		self.has_pid.load(Ordering::SeqCst).then_some(self.pid)
	}

	fn is_stopping(&self) -> bool {
		self.stopping.load(Ordering::SeqCst)
	}

	fn identifier(&self) -> Option<&str> {
		self.identifier.as_deref()
	}

	fn command_pattern(&self) -> String {
		"fake-tunnel".into()
	}
}

/// Launcher handing out pre-built [`FakeTunnel`]s, one per `launch` call.
pub struct FakeLauncher {
	tunnels: Mutex<VecDeque<Arc<FakeTunnel>>>,
	pub launches: AtomicU32,
}

impl FakeLauncher {
	pub fn with_tunnels(tunnels: Vec<Arc<FakeTunnel>>) -> Arc<Self> {
		Arc::new(Self {
			tunnels: Mutex::new(tunnels.into_iter().collect()),
			launches: AtomicU32::new(0),
		})
	}
}

impl TunnelLauncher for FakeLauncher {
	fn launch(&self, _identifier: Option<&str>) -> Arc<dyn TunnelHandle> {
		self.launches.fetch_add(1, Ordering::SeqCst);
		self.tunnels
			.lock()
			.pop_front()
			.expect("FakeLauncher ran out of tunnels")
	}
}

/// Probe that reports liveness from the fake tunnels' own state.
pub struct FakeProbe {
	tunnels: Vec<Arc<FakeTunnel>>,
}

impl FakeProbe {
	pub fn watching(tunnels: Vec<Arc<FakeTunnel>>) -> Arc<Self> {
		Arc::new(Self { tunnels })
	}
}

#[async_trait]
impl ProcessProbe for FakeProbe {
	async fn alive(&self, pid: u32, _pattern: &str) -> bool {
		self.tunnels
			.iter()
			.any(|t| t.pid == pid && t.is_running())
	}
}
