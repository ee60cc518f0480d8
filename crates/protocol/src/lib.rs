//! Wire types for cross-browser testing cloud providers.
//!
//! This crate contains the serde-serializable types used when talking to a
//! provider's session REST API and to a remote WebDriver hub. These types
//! represent the "protocol layer" - the shapes of data as they appear on the
//! wire, plus the neutral status vocabulary every provider response is mapped
//! into.
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Provider-neutral**: Provider-specific field locations are configured
//!   by the orchestration layer, not encoded here
//!
//! The orchestration APIs are built on top of these types in `cbt-rs`.

pub mod session;
pub mod status;
pub mod webdriver;

pub use session::*;
pub use status::*;
pub use webdriver::*;

/// Flat capability mapping, both in its neutral (caller-supplied) and its
/// native (provider-submitted) form.
pub type CapabilityBag = serde_json::Map<String, serde_json::Value>;
