//! WebDriver wire bodies used by script-driven sessions.
//!
//! Only the handful of calls the script runner needs: session creation,
//! navigation, synchronous script execution, screenshot, and quit. Remote
//! hubs of both generations are supported by sending the W3C and the legacy
//! capability shape side by side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CapabilityBag;

/// `POST /session` body.
#[derive(Debug, Clone, Serialize)]
pub struct NewSessionRequest {
    pub capabilities: W3cCapabilities,
    #[serde(rename = "desiredCapabilities")]
    pub desired_capabilities: CapabilityBag,
}

impl NewSessionRequest {
    pub fn new(caps: CapabilityBag) -> Self {
        Self {
            capabilities: W3cCapabilities {
                always_match: caps.clone(),
            },
            desired_capabilities: caps,
        }
    }
}

/// W3C capability envelope.
#[derive(Debug, Clone, Serialize)]
pub struct W3cCapabilities {
    #[serde(rename = "alwaysMatch")]
    pub always_match: CapabilityBag,
}

/// `POST /session` response. W3C hubs nest the session id under `value`;
/// legacy hubs put it at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSessionReply {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub value: Option<NewSessionValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSessionValue {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl NewSessionReply {
    /// The session id wherever the hub put it.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or_else(|| self.value.as_ref().and_then(|v| v.session_id.as_deref()))
    }
}

/// `POST /session/{id}/url` body.
#[derive(Debug, Clone, Serialize)]
pub struct NavigateRequest {
    pub url: String,
}

/// `POST /session/{id}/execute/sync` body.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptRequest {
    pub script: String,
    pub args: Vec<Value>,
}

/// Generic `{"value": ...}` response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueReply<T> {
    pub value: T,
}
