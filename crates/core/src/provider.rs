//! Provider registry.
//!
//! Each supported testing cloud is described by a static [`ProviderSpec`]:
//! endpoints, credential sources, the capability table, and the embedded
//! rule/catalog documents. Jobs and the validator dispatch on the spec
//! struct; there is no per-provider type hierarchy.

use cbt_protocol::CapabilityBag;
use serde_json::Value;

use crate::error::Result;
use crate::rest::Credentials;

/// Supported cross-browser testing clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
	BrowserStack,
	SauceLabs,
}

impl ProviderKind {
	pub fn spec(self) -> &'static ProviderSpec {
		match self {
			Self::BrowserStack => &BROWSERSTACK,
			Self::SauceLabs => &SAUCELABS,
		}
	}
}

/// How one neutral capability maps to a provider-native parameter.
///
/// Keys with `native: None` are directives consumed by the orchestrator
/// (local testing, native-runner correlation) and are never submitted to the
/// provider.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
	pub neutral: &'static str,
	pub native: Option<&'static str>,
}

const fn key(neutral: &'static str, native: &'static str) -> KeySpec {
	KeySpec { neutral, native: Some(native) }
}

const fn directive(neutral: &'static str) -> KeySpec {
	KeySpec { neutral, native: None }
}

/// Default applied when the caller omits a capability.
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
	Bool(bool),
	Int(i64),
	Str(&'static str),
}

impl DefaultValue {
	pub fn to_value(self) -> Value {
		match self {
			Self::Bool(b) => Value::Bool(b),
			Self::Int(n) => Value::Number(n.into()),
			Self::Str(s) => Value::String(s.into()),
		}
	}
}

/// Static validation table for one provider.
pub struct CapabilityTable {
	/// Browser-identity keys the caller must supply.
	pub browser_required: &'static [&'static str],
	/// Full browser-identity vocabulary with native names.
	pub browser_keys: &'static [KeySpec],
	/// Session-option keys the caller must supply.
	pub caps_required: &'static [&'static str],
	/// Full session-option vocabulary with native names.
	pub caps_keys: &'static [KeySpec],
	/// Filled in for keys absent from input.
	pub caps_defaults: &'static [(&'static str, DefaultValue)],
	/// Session-option keys additionally constrained by `parameters` rules.
	pub rule_checked: &'static [&'static str],
}

/// Everything the orchestrator needs to talk to one provider.
pub struct ProviderSpec {
	pub kind: ProviderKind,
	pub name: &'static str,
	/// Session-creation endpoint; per-job endpoints hang off it.
	pub worker_url: &'static str,
	/// WebDriver hub for script-driven sessions.
	pub hub_url: &'static str,
	/// Base endpoint for reporting a script session's pass/fail verdict.
	pub status_url: &'static str,
	/// JSON pointer to the session id in a creation response.
	pub id_pointer: &'static str,
	/// JSON pointer to the status field in a status response.
	pub status_pointer: &'static str,
	/// Screenshot sub-resource appended to a job endpoint.
	pub screenshot_path: &'static str,
	/// Native capability that turns on debug screenshots.
	pub debug_key: &'static str,
	pub user_env: &'static str,
	pub key_env: &'static str,
	/// Embedded rule file (`parameters` + `conversions`).
	pub rules_json: &'static str,
	/// Embedded browser catalog (os → version → browser → version → devices).
	pub catalog_json: &'static str,
	pub table: CapabilityTable,
	/// Provider quirks applied after generic native-name conversion.
	pub finalize: Option<fn(&mut CapabilityBag, &mut CapabilityBag)>,
}

impl ProviderSpec {
	/// Reads this provider's credentials from its environment variables.
	pub fn credentials_from_env(&self) -> Result<Credentials> {
		Credentials::from_env(self.user_env, self.key_env)
	}
}

static BROWSERSTACK: ProviderSpec = ProviderSpec {
	kind: ProviderKind::BrowserStack,
	name: "browserstack",
	worker_url: "https://api.browserstack.com/5/worker",
	hub_url: "https://hub-cloud.browserstack.com/wd/hub",
	status_url: "https://api.browserstack.com/automate/sessions",
	id_pointer: "/id",
	status_pointer: "/status",
	screenshot_path: "screenshot.json",
	debug_key: "browserstack.debug",
	user_env: "BROWSERSTACK_USERNAME",
	key_env: "BROWSERSTACK_ACCESS_KEY",
	rules_json: include_str!("../config/browserstack.json"),
	catalog_json: include_str!("../config/browserstack-browsers.json"),
	table: CapabilityTable {
		browser_required: &["os", "osVersion", "browser", "browserVersion"],
		browser_keys: &[
			key("os", "os"),
			key("osVersion", "os_version"),
			key("browser", "browser"),
			key("browserVersion", "browser_version"),
			key("device", "device"),
		],
		caps_required: &[],
		caps_keys: &[
			key("timeout", "timeout"),
			key("project", "project"),
			key("test", "name"),
			key("build", "build"),
			key("local", "browserstack.local"),
			key("localIdentifier", "browserstack.localIdentifier"),
			key("screenshots", "browserstack.debug"),
			key("video", "browserstack.video"),
			key("resolution", "resolution"),
			key("timezone", "timezone"),
			key("orientation", "deviceOrientation"),
			directive("nativeRunner"),
		],
		caps_defaults: &[
			("timeout", DefaultValue::Int(60)),
			("local", DefaultValue::Bool(false)),
		],
		rule_checked: &["resolution", "timeout", "video", "orientation", "localIdentifier", "timezone"],
	},
	finalize: None,
};

static SAUCELABS: ProviderSpec = ProviderSpec {
	kind: ProviderKind::SauceLabs,
	name: "saucelabs",
	worker_url: "https://saucelabs.com/rest/v1/jobs",
	hub_url: "https://ondemand.saucelabs.com/wd/hub",
	status_url: "https://saucelabs.com/rest/v1/jobs",
	id_pointer: "/id",
	status_pointer: "/status",
	screenshot_path: "screenshot.json",
	debug_key: "recordScreenshots",
	user_env: "SAUCE_USERNAME",
	key_env: "SAUCE_ACCESS_KEY",
	rules_json: include_str!("../config/saucelabs.json"),
	catalog_json: include_str!("../config/saucelabs-browsers.json"),
	table: CapabilityTable {
		browser_required: &["os", "osVersion", "browser", "browserVersion"],
		browser_keys: &[
			key("os", "os"),
			key("osVersion", "os_version"),
			key("browser", "browserName"),
			key("browserVersion", "version"),
			key("device", "deviceName"),
		],
		caps_required: &[],
		caps_keys: &[
			key("timeout", "maxDuration"),
			key("project", "tags"),
			key("test", "name"),
			key("build", "build"),
			key("local", "tunneled"),
			key("localIdentifier", "tunnelIdentifier"),
			key("screenshots", "recordScreenshots"),
			key("video", "recordVideo"),
			key("resolution", "screenResolution"),
			key("timezone", "timeZone"),
			directive("nativeRunner"),
		],
		caps_defaults: &[
			("timeout", DefaultValue::Int(90)),
			("local", DefaultValue::Bool(false)),
		],
		rule_checked: &["resolution", "timeout", "video", "localIdentifier"],
	},
	finalize: Some(saucelabs_finalize),
};

/// Sauce Labs takes a combined `platform` string instead of separate os and
/// version parameters.
fn saucelabs_finalize(browser: &mut CapabilityBag, _caps: &mut CapabilityBag) {
	let os = browser.remove("os");
	let version = browser.remove("os_version");
	if let Some(Value::String(os)) = os {
		let platform = match version {
			Some(Value::String(v)) => format!("{os} {v}"),
			Some(other) => format!("{os} {other}"),
			None => os,
		};
		browser.insert("platform".into(), Value::String(platform));
	}
}
