//! Error types for tunnel process management.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing a tunnel process.
#[derive(Debug, Error)]
pub enum Error {
	/// Tunnel binary does not exist at the configured path.
	#[error("tunnel binary not found at {0}")]
	BinaryNotFound(PathBuf),

	/// Failed to spawn the tunnel process.
	#[error("failed to launch tunnel: {0}")]
	LaunchFailed(String),

	/// Tunnel process exited during startup.
	#[error("tunnel exited during startup: {0}")]
	EarlyExit(String),

	/// Startup was rejected because another tunnel instance holds the
	/// arguments this one needs (shared port, missing unique identifier).
	/// The platform monitor treats this as "a tunnel is already up".
	#[error("tunnel argument conflict: {0}")]
	ArgumentConflict(String),

	/// A tunnel is already running under this handle.
	#[error("tunnel already running with pid {0}")]
	AlreadyRunning(u32),

	/// Process-table lookup could not be executed.
	#[error("process table lookup failed: {0}")]
	ProcessLookup(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
