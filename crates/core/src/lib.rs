//! cbt: remote browser test orchestration for cross-browser testing clouds.
//!
//! This crate coordinates remote browser sessions ("jobs") against
//! cross-browser testing providers, manages the shared tunnels that expose
//! locally hosted pages to those clouds, and validates untyped caller input
//! against per-provider rule tables before any remote call is made.
//!
//! # Example
//!
//! ```ignore
//! use cbt::{Platform, PlatformConfig, ProviderKind};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = std::sync::Arc::new(Platform::new(
//!         ProviderKind::BrowserStack,
//!         PlatformConfig::default(),
//!     )?);
//!     platform.start_monitor();
//!
//!     let browser = json!({
//!         "os": "Windows",
//!         "osVersion": "10",
//!         "browser": "Firefox",
//!         "browserVersion": "43.0"
//!     });
//!     let handle = platform
//!         .run(
//!             "http://localhost:8080/tests/index.html",
//!             browser.as_object().unwrap(),
//!             &serde_json::Map::new(),
//!         )
//!         .await?;
//!
//!     let report = platform.status(&handle.id).await?;
//!     println!("run {} is {}", handle.id, report.status);
//!
//!     platform.stop(&handle.id, false).await?;
//!     platform.close(false).await?;
//!     Ok(())
//! }
//! ```

mod capabilities;
mod error;
mod job;
mod logging;
mod platform;
mod provider;
mod rest;
mod retry;
mod rules;
mod script;
#[cfg(test)]
mod testing;
mod webdriver;

pub use capabilities::CapabilityValidator;
pub use cbt_protocol::{CapabilityBag, JobStatus, RunReport, RunStatus, TunnelState};
pub use error::{Error, ErrorKind, Result};
pub use job::{Job, JobContext, JobPolicies};
pub use logging::init_logging;
pub use platform::{
	BinaryTunnelLauncher, OsProcessProbe, Platform, PlatformConfig, ProcessProbe, RunHandle,
	TunnelHandle, TunnelLauncher,
};
pub use provider::{CapabilityTable, DefaultValue, KeySpec, ProviderKind, ProviderSpec};
pub use rest::{ApiResponse, Credentials, HttpClient, Method, RestClient};
pub use retry::{Backoff, RetryPolicy};
pub use rules::RuleEngine;
pub use script::{DeciderFn, ScriptFn, ScriptJob};
pub use webdriver::{WebDriverClient, WebDriverSession};
