//! Provider REST payloads shared by every supported cloud.

use serde::{Deserialize, Serialize};

/// Pass/fail classification of a script-driven session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptVerdict {
    Passed,
    Failed,
}

impl ScriptVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

/// Body reported to a provider's status endpoint when a script job finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ScriptVerdict,
}

/// Body of a provider screenshot response.
///
/// Providers render the screenshot out-of-band and hand back a URL once the
/// worker has produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotReply {
    pub url: Option<String>,
}
