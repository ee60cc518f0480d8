//! Neutral status vocabulary.
//!
//! Every provider reports session state with its own strings; the
//! orchestration layer reduces them to these enums before anything else
//! looks at them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of one remote browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a free worker on the provider side.
    Queue,
    /// Browser session is live.
    Running,
    /// Session finished or was terminated.
    Stopped,
}

impl JobStatus {
    /// Maps a provider's raw status field to the neutral vocabulary.
    ///
    /// An absent field means the provider no longer tracks the session, which
    /// is reported as [`JobStatus::Stopped`].
    pub fn from_provider(raw: Option<&str>) -> Self {
        match raw {
            Some("running") | Some("in progress") => Self::Running,
            Some("queue") | Some("queued") | Some("new") => Self::Queue,
            _ => Self::Stopped,
        }
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queue => "queue",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Aggregate status of a run (a group of sessions plus an optional tunnel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// At least one session is still live or queued.
    Running,
    /// Every session has stopped.
    Stopped,
    /// The tunnel is down while sessions still report running. External
    /// state is inconsistent and worth surfacing distinctly.
    Messy,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Messy => "messy",
        };
        f.write_str(s)
    }
}

/// Status report for one run: the aggregate, the per-session statuses in
/// registration order, and the tunnel state (`"none"` when the run has no
/// tunnel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub jobs: Vec<JobStatus>,
    pub tunnel: String,
}

/// Observed state of a tunnel process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Running,
    Stopped,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}
