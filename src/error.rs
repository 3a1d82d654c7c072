//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;
// crates.io
use tokio_util::codec::LinesCodecError;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the authorization cache crate.
///
/// Cloneable so a single refresh outcome can be handed to every caller that waited on it.
#[allow(missing_docs)]
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(Arc<std::io::Error>),

	#[error("Failed to connect to roster source at {endpoint}: {reason}")]
	Connection { endpoint: String, reason: String },
	#[error("Roster session broken: {0}")]
	SessionBroken(String),
	#[error("Roster source rejected command (id {id}): {message}")]
	Query { id: u32, message: String },
	#[error("Roster call '{operation}' timed out after {after:?}.")]
	Timeout { operation: &'static str, after: std::time::Duration },
	#[error("Refresh cancelled because the cache is shutting down.")]
	Cancelled,
	#[error("Lifecycle error: {0}")]
	Lifecycle(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether this error means the provider session can no longer be trusted.
	///
	/// Command-level rejections leave the session usable; everything transport-related forces a
	/// reconnect on the next refresh cycle.
	pub fn is_session_fatal(&self) -> bool {
		matches!(
			self,
			Error::Io(_) | Error::Connection { .. } | Error::SessionBroken(_) | Error::Timeout { .. }
		)
	}
}
impl From<std::io::Error> for Error {
	fn from(value: std::io::Error) -> Self {
		Self::Io(Arc::new(value))
	}
}
impl From<LinesCodecError> for Error {
	fn from(value: LinesCodecError) -> Self {
		match value {
			LinesCodecError::Io(err) => Self::from(err),
			LinesCodecError::MaxLineLengthExceeded =>
				Self::SessionBroken("Response line exceeded the maximum length.".into()),
		}
	}
}
