//! Error types for session orchestration.
//!
//! Three classes matter to callers: **input** errors (the user handed us a
//! bad capability bag or an unknown run id, maps to a client-error status),
//! **config** errors (a malformed rule tree or missing credentials, fatal
//! and raised immediately), and **operational** errors (a remote API or
//! process misbehaved). [`Error::kind`] is how an HTTP layer tells them
//! apart.

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`] for callers that map errors to
/// response statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Caller-supplied input was wrong.
	Input,
	/// Rule tree or platform configuration is malformed.
	Config,
	/// A remote call or local process failed.
	Operational,
}

/// Errors that can occur while orchestrating remote browser sessions.
#[derive(Debug, Error)]
pub enum Error {
	/// A required capability was not supplied.
	#[error("missing required capability: {0}")]
	MissingRequired(String),

	/// A capability outside the platform's vocabulary was supplied.
	#[error("unknown capability: {0}")]
	UnknownKey(String),

	/// An enumerated capability value is not in the valid set.
	#[error("invalid value '{value}' for {key}; valid values: {allowed}")]
	InvalidValue {
		key: String,
		value: String,
		allowed: String,
	},

	/// The supplied test page URL does not parse.
	#[error("invalid url '{url}': {reason}")]
	InvalidUrl { url: String, reason: String },

	/// The run id is not known to the platform, live or done.
	#[error("unknown run id: {0}")]
	UnknownRun(String),

	/// A script was run against a job whose session was never created.
	#[error("session not created yet")]
	SessionNotCreated,

	/// Provider credentials were not configured.
	#[error("credentials not set; export {user_env} and {key_env}")]
	MissingCredentials {
		user_env: &'static str,
		key_env: &'static str,
	},

	/// A dotted rule path crossed a non-object or empty segment.
	#[error("malformed rule path '{path}': {reason}")]
	BadRulePath { path: String, reason: String },

	/// The rule tree node that should be an object is not.
	#[error("expected an object at '{0}' in the rule tree")]
	NotAnObject(String),

	/// A condition referenced an input field the caller did not supply.
	#[error("missing context key '{0}'")]
	MissingContextKey(String),

	/// A condition statement was not a single-key object.
	#[error("malformed condition statement: expected a single-key object, got {0}")]
	BadStatement(String),

	/// A `&&`/`||` combinator operand was not a sequence of statements.
	#[error("malformed operand for '{0}': expected an array of statements")]
	BadCombinator(String),

	/// An alias appeared where a conditional value is required.
	#[error("alias '#{0}' is not allowed as a conditional value")]
	AliasInCondition(String),

	/// A comparison expression fell outside the restricted grammar.
	#[error("unsupported comparison expression: {0}")]
	BadExpression(String),

	/// Catch-all for structurally malformed rule configuration.
	#[error("malformed rule configuration: {0}")]
	Config(String),

	/// The provider API answered with a non-success status.
	#[error("{provider} API error: status {status}: {body}")]
	Api {
		provider: &'static str,
		status: u16,
		body: String,
	},

	/// A bounded-retry operation ran out of attempts. Distinct from the
	/// underlying transient error, which is carried as the source.
	#[error("{op} did not complete after {attempts} attempts: {source}")]
	RetriesExhausted {
		op: &'static str,
		attempts: u32,
		#[source]
		source: Box<Error>,
	},

	/// A polled condition never became true. Usually seen as the source of
	/// [`Error::RetriesExhausted`].
	#[error("condition not met: {0}")]
	ConditionNotMet(&'static str),

	/// The provider no longer has the worker; screenshot retries are
	/// pointless.
	#[error("worker not found")]
	WorkerGone,

	/// Remote WebDriver hub rejected a call.
	#[error("webdriver error: {0}")]
	WebDriver(String),

	/// Tunnel process failure.
	#[error(transparent)]
	Tunnel(#[from] cbt_runtime::Error),

	/// HTTP transport failure.
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),

	/// JSON serialization/deserialization error.
	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::MissingRequired(_)
			| Self::UnknownKey(_)
			| Self::InvalidValue { .. }
			| Self::InvalidUrl { .. }
			| Self::UnknownRun(_)
			| Self::SessionNotCreated => ErrorKind::Input,
			Self::MissingCredentials { .. }
			| Self::BadRulePath { .. }
			| Self::NotAnObject(_)
			| Self::MissingContextKey(_)
			| Self::BadStatement(_)
			| Self::BadCombinator(_)
			| Self::AliasInCondition(_)
			| Self::BadExpression(_)
			| Self::Config(_) => ErrorKind::Config,
			_ => ErrorKind::Operational,
		}
	}

	/// Whether retrying the failed operation can possibly help.
	pub(crate) fn is_terminal(&self) -> bool {
		matches!(self, Self::WorkerGone) || self.kind() != ErrorKind::Operational
	}
}
