//! OS process-table probing.
//!
//! The platform monitor periodically checks that each tunnel's pid is still
//! alive *and* still runs the tunnel command. Checking the command guards
//! against pid recycling: a pid taken over by an unrelated process counts as
//! dead.

use tokio::process::Command;

use crate::error::{Error, Result};

/// Returns whether `pid` is alive and its command line contains `pattern`.
#[cfg(unix)]
pub async fn find(pid: u32, pattern: &str) -> Result<bool> {
	let output = Command::new("ps")
		.args(["-p", &pid.to_string(), "-o", "command="])
		.output()
		.await
		.map_err(|e| Error::ProcessLookup(format!("ps failed to run: {e}")))?;

	if !output.status.success() {
		// ps exits nonzero when the pid does not exist.
		return Ok(false);
	}

	let command = String::from_utf8_lossy(&output.stdout);
	Ok(command.contains(pattern))
}

/// Returns whether `pid` is alive and its image name contains `pattern`.
#[cfg(windows)]
pub async fn find(pid: u32, pattern: &str) -> Result<bool> {
	let output = Command::new("tasklist")
		.args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
		.output()
		.await
		.map_err(|e| Error::ProcessLookup(format!("tasklist failed to run: {e}")))?;

	let listing = String::from_utf8_lossy(&output.stdout);
	if listing.contains("No tasks are running") {
		return Ok(false);
	}

	// First CSV field of the matching row is the image name.
	let image = listing
		.lines()
		.next()
		.and_then(|line| line.split(',').next())
		.map(|field| field.trim_matches('"'))
		.unwrap_or("");
	Ok(image.contains(pattern))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[cfg(unix)]
	#[tokio::test]
	async fn finds_own_process() {
		let pid = std::process::id();
		// Our own command line always exists; the empty pattern matches it.
		assert!(find(pid, "").await.unwrap());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn rejects_pattern_mismatch() {
		let pid = std::process::id();
		assert!(!find(pid, "definitely-not-this-command-name").await.unwrap());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn dead_pid_is_not_found() {
		// Pids this large are never allocated on the platforms we run tests on.
		assert!(!find(4_000_000, "").await.unwrap());
	}
}
