pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Invalid filter: {message}")]
	InvalidFilter { message: String },
	#[error("Unknown {kind} {value:?}.")]
	UnknownValue { kind: &'static str, value: String },
	#[error("Unsupported: {message}")]
	Unsupported { message: String },
}
impl Error {
	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidFilter { message: message.into() }
	}

	pub(crate) fn unsupported(message: impl Into<String>) -> Self {
		Self::Unsupported { message: message.into() }
	}
}
