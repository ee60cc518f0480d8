//! Capability validation and native-name conversion.
//!
//! Callers speak a neutral vocabulary (`os`, `browser`, `timeout`, ...);
//! each provider wants its own parameter names and enforces its own value
//! constraints. The validator checks the input against the provider's static
//! table and browser catalog, applies defaults, runs the rule-constrained
//! keys through the [`RuleEngine`], and renames everything to native form.

use cbt_protocol::CapabilityBag;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{KeySpec, ProviderSpec};
use crate::rules::RuleEngine;

/// Neutral browser-identity fields converted through the `conversions`
/// section of the rule file.
const CONVERTED_FIELDS: &[(&str, &str)] = &[
	("browser", "conversions.browser"),
	("os", "conversions.os"),
	("osVersion", "conversions.osVersion"),
];

/// Levels of the browser catalog, in nesting order.
const CATALOG_LEVELS: &[&str] = &["os", "osVersion", "browser", "browserVersion"];

/// Per-provider validator over the neutral capability vocabulary.
pub struct CapabilityValidator {
	spec: &'static ProviderSpec,
	rules: RuleEngine,
	catalog: Value,
}

impl CapabilityValidator {
	pub fn new(spec: &'static ProviderSpec) -> Result<Self> {
		let rules = RuleEngine::from_json(spec.rules_json)?;
		let catalog: Value = serde_json::from_str(spec.catalog_json)?;
		if !catalog.is_object() {
			return Err(Error::Config(format!("{} browser catalog is not an object", spec.name)));
		}
		Ok(Self { spec, rules, catalog })
	}

	/// The provider's browser catalog (os → os version → browser → browser
	/// version → devices), for callers that enumerate valid combinations.
	pub fn catalog(&self) -> &Value {
		&self.catalog
	}

	/// Validates and converts a neutral browser/capability pair into the
	/// provider's native parameter names.
	///
	/// Missing required keys and unknown keys are input errors. Optional
	/// keys that fail their rule are silently dropped, not errors. The same
	/// raw input always produces identical output.
	pub fn parse(
		&self,
		browser: &CapabilityBag,
		capabilities: &CapabilityBag,
	) -> Result<(CapabilityBag, CapabilityBag)> {
		let table = &self.spec.table;
		check_required(table.browser_required, browser)?;
		check_required(table.caps_required, capabilities)?;
		check_known(table.browser_keys, browser)?;
		check_known(table.caps_keys, capabilities)?;

		let mut browser = browser.clone();
		let mut caps = capabilities.clone();
		for (key, default) in table.caps_defaults {
			caps.entry((*key).to_string()).or_insert_with(|| default.to_value());
		}

		self.check_catalog(&browser)?;

		// Optional constrained keys: failing the rule drops the key from the
		// outgoing bag. This is intentional, not an error.
		let context = merged_context(&browser, &caps);
		for key in table.rule_checked {
			if !caps.contains_key(*key) {
				continue;
			}
			if !self.rules.validate("parameters", key, &context)? {
				debug!(target = "cbt", provider = self.spec.name, key, "capability failed its rule; dropping");
				caps.remove(*key);
			}
		}

		// Identity conversions, falling through to the original value when
		// the conversions tree has no entry.
		for (field, section) in CONVERTED_FIELDS {
			let Some(current) = browser.get(*field).and_then(Value::as_str).map(String::from) else {
				continue;
			};
			if let Some(converted) = self.rules.get(section, &current, &context)? {
				browser.insert((*field).to_string(), converted);
			}
		}

		let mut native_browser = rename(table.browser_keys, &browser);
		let mut native_caps = rename(table.caps_keys, &caps);
		if let Some(finalize) = self.spec.finalize {
			finalize(&mut native_browser, &mut native_caps);
		}
		Ok((native_browser, native_caps))
	}

	/// Nested existence check of the browser identity against the catalog.
	/// Each level's failure names the valid alternatives at that level.
	fn check_catalog(&self, browser: &CapabilityBag) -> Result<()> {
		let mut node = &self.catalog;
		for key in CATALOG_LEVELS {
			let value = browser
				.get(*key)
				.map(text_of)
				.ok_or_else(|| Error::MissingRequired((*key).to_string()))?;
			node = node.get(&value).ok_or_else(|| Error::InvalidValue {
				key: (*key).to_string(),
				value,
				allowed: alternatives(node),
			})?;
		}

		if let Some(device) = browser.get("device") {
			let device = text_of(device);
			let known = node
				.as_array()
				.map(|devices| devices.iter().any(|d| text_of(d) == device))
				.unwrap_or(false);
			if !known {
				return Err(Error::InvalidValue {
					key: "device".into(),
					value: device,
					allowed: node
						.as_array()
						.map(|devices| {
							devices.iter().map(text_of).collect::<Vec<_>>().join(", ")
						})
						.unwrap_or_else(|| "none".into()),
				});
			}
		}
		Ok(())
	}
}

fn check_required(required: &[&str], bag: &CapabilityBag) -> Result<()> {
	for key in required {
		if !bag.contains_key(*key) {
			return Err(Error::MissingRequired((*key).to_string()));
		}
	}
	Ok(())
}

fn check_known(keys: &[KeySpec], bag: &CapabilityBag) -> Result<()> {
	for key in bag.keys() {
		if !keys.iter().any(|spec| spec.neutral == key) {
			return Err(Error::UnknownKey(key.clone()));
		}
	}
	Ok(())
}

/// Rule context: browser identity and session options in one flat object,
/// under their neutral names.
fn merged_context(browser: &CapabilityBag, caps: &CapabilityBag) -> Value {
	let mut merged = browser.clone();
	for (key, value) in caps {
		merged.insert(key.clone(), value.clone());
	}
	Value::Object(merged)
}

fn rename(keys: &[KeySpec], bag: &CapabilityBag) -> CapabilityBag {
	let mut out = CapabilityBag::new();
	for (key, value) in bag {
		match keys.iter().find(|spec| spec.neutral == key) {
			Some(KeySpec { native: Some(native), .. }) => {
				out.insert((*native).to_string(), value.clone());
			}
			// Platform directives are consumed locally, never submitted.
			Some(KeySpec { native: None, .. }) | None => {}
		}
	}
	out
}

fn text_of(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn alternatives(node: &Value) -> String {
	node.as_object()
		.map(|map| map.keys().cloned().collect::<Vec<_>>().join(", "))
		.unwrap_or_else(|| "none".into())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::provider::ProviderKind;

	fn bag(value: Value) -> CapabilityBag {
		value.as_object().expect("test bag must be an object").clone()
	}

	fn validator(kind: ProviderKind) -> CapabilityValidator {
		CapabilityValidator::new(kind.spec()).expect("embedded config must parse")
	}

	fn windows_firefox() -> CapabilityBag {
		bag(json!({
			"os": "Windows",
			"osVersion": "10",
			"browser": "Firefox",
			"browserVersion": "43.0"
		}))
	}

	#[test]
	fn happy_path_converts_and_defaults() {
		let v = validator(ProviderKind::BrowserStack);
		let (browser, caps) = v.parse(&windows_firefox(), &bag(json!({}))).unwrap();

		assert_eq!(browser.get("os"), Some(&json!("Windows")));
		assert_eq!(browser.get("os_version"), Some(&json!("10")));
		assert_eq!(browser.get("browser"), Some(&json!("firefox")));
		assert_eq!(browser.get("browser_version"), Some(&json!("43.0")));

		assert_eq!(caps.get("timeout"), Some(&json!(60)));
		assert_eq!(caps.get("browserstack.local"), Some(&json!(false)));
	}

	#[test]
	fn missing_required_key_is_an_input_error() {
		let v = validator(ProviderKind::BrowserStack);
		let mut browser = windows_firefox();
		browser.remove("osVersion");
		let err = v.parse(&browser, &bag(json!({}))).unwrap_err();
		assert!(matches!(err, Error::MissingRequired(ref k) if k == "osVersion"));
	}

	#[test]
	fn unknown_key_is_an_input_error() {
		let v = validator(ProviderKind::BrowserStack);
		let err = v
			.parse(&windows_firefox(), &bag(json!({ "frobnicate": 1 })))
			.unwrap_err();
		assert!(matches!(err, Error::UnknownKey(ref k) if k == "frobnicate"));
	}

	#[test]
	fn catalog_failures_name_the_alternatives() {
		let v = validator(ProviderKind::BrowserStack);

		let mut browser = windows_firefox();
		browser.insert("os".into(), json!("Solaris"));
		match v.parse(&browser, &bag(json!({}))).unwrap_err() {
			Error::InvalidValue { key, allowed, .. } => {
				assert_eq!(key, "os");
				assert!(allowed.contains("Windows"), "allowed was: {allowed}");
				assert!(allowed.contains("OS X"));
			}
			other => panic!("expected InvalidValue, got {other:?}"),
		}

		let mut browser = windows_firefox();
		browser.insert("browserVersion".into(), json!("1.0"));
		match v.parse(&browser, &bag(json!({}))).unwrap_err() {
			Error::InvalidValue { key, allowed, .. } => {
				assert_eq!(key, "browserVersion");
				assert!(allowed.contains("43.0"));
			}
			other => panic!("expected InvalidValue, got {other:?}"),
		}
	}

	#[test]
	fn device_is_checked_against_the_leaf() {
		let v = validator(ProviderKind::BrowserStack);
		let ios = bag(json!({
			"os": "ios",
			"osVersion": "9.0",
			"browser": "Mobile Safari",
			"browserVersion": "9.0",
			"device": "iPhone 6S"
		}));
		v.parse(&ios, &bag(json!({}))).unwrap();

		let mut bad = ios.clone();
		bad.insert("device".into(), json!("Nokia 3310"));
		let err = v.parse(&bad, &bag(json!({}))).unwrap_err();
		assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "device"));
	}

	#[test]
	fn failing_rule_drops_the_key_silently() {
		let v = validator(ProviderKind::BrowserStack);
		let (_, caps) = v
			.parse(&windows_firefox(), &bag(json!({ "resolution": "640x480" })))
			.unwrap();
		assert!(!caps.contains_key("resolution"));

		let (_, caps) = v
			.parse(&windows_firefox(), &bag(json!({ "resolution": "1024x768" })))
			.unwrap();
		assert_eq!(caps.get("resolution"), Some(&json!("1024x768")));
	}

	#[test]
	fn local_identifier_requires_local() {
		let v = validator(ProviderKind::BrowserStack);
		let (_, caps) = v
			.parse(&windows_firefox(), &bag(json!({ "localIdentifier": "my-tunnel" })))
			.unwrap();
		assert!(!caps.contains_key("browserstack.localIdentifier"));

		let (_, caps) = v
			.parse(
				&windows_firefox(),
				&bag(json!({ "local": true, "localIdentifier": "my-tunnel" })),
			)
			.unwrap();
		assert_eq!(caps.get("browserstack.localIdentifier"), Some(&json!("my-tunnel")));
	}

	#[test]
	fn directives_are_not_submitted() {
		let v = validator(ProviderKind::BrowserStack);
		let (_, caps) = v
			.parse(&windows_firefox(), &bag(json!({ "nativeRunner": true })))
			.unwrap();
		assert!(!caps.contains_key("nativeRunner"));
	}

	#[test]
	fn conversion_aliases_follow_their_target() {
		let v = validator(ProviderKind::BrowserStack);
		let mut browser = windows_firefox();
		browser.insert("browser".into(), json!("Internet Explorer"));
		browser.insert("browserVersion".into(), json!("11.0"));
		// "Internet Explorer" is not in the catalog under that spelling.
		let err = v.parse(&browser, &bag(json!({}))).unwrap_err();
		assert!(matches!(err, Error::InvalidValue { .. }));

		let mut browser = windows_firefox();
		browser.insert("browser".into(), json!("IE"));
		browser.insert("browserVersion".into(), json!("11.0"));
		let (native, _) = v.parse(&browser, &bag(json!({}))).unwrap();
		assert_eq!(native.get("browser"), Some(&json!("ie")));
	}

	#[test]
	fn parse_is_deterministic() {
		let v = validator(ProviderKind::BrowserStack);
		let caps = bag(json!({ "timeout": 120, "resolution": "1024x768", "local": true }));
		let first = v.parse(&windows_firefox(), &caps).unwrap();
		let second = v.parse(&windows_firefox(), &caps).unwrap();
		assert_eq!(first, second);
		assert_eq!(
			serde_json::to_string(&first.1).unwrap(),
			serde_json::to_string(&second.1).unwrap()
		);
	}

	#[test]
	fn saucelabs_combines_platform() {
		let v = validator(ProviderKind::SauceLabs);
		let browser = bag(json!({
			"os": "Windows",
			"osVersion": "10",
			"browser": "Chrome",
			"browserVersion": "46.0"
		}));
		let (native, caps) = v.parse(&browser, &bag(json!({}))).unwrap();
		assert_eq!(native.get("platform"), Some(&json!("Windows 10")));
		assert_eq!(native.get("browserName"), Some(&json!("chrome")));
		assert_eq!(native.get("version"), Some(&json!("46.0")));
		assert!(!native.contains_key("os"));
		assert_eq!(caps.get("maxDuration"), Some(&json!(90)));
	}

	#[test]
	fn saucelabs_converts_os_name() {
		let v = validator(ProviderKind::SauceLabs);
		let browser = bag(json!({
			"os": "OS X",
			"osVersion": "El Capitan",
			"browser": "Safari",
			"browserVersion": "9.0"
		}));
		let (native, _) = v.parse(&browser, &bag(json!({}))).unwrap();
		assert_eq!(native.get("platform"), Some(&json!("Mac El Capitan")));
	}
}
