pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Unsupported: {message}")]
	Unsupported { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Collaborator error: {message}")]
	Collaborator { message: String },
	#[error("Worker error: {message}")]
	Worker { message: String },
}
impl Error {
	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}

	pub(crate) fn unsupported(message: impl Into<String>) -> Self {
		Self::Unsupported { message: message.into() }
	}
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<jagg_storage::Error> for Error {
	fn from(err: jagg_storage::Error) -> Self {
		match err {
			jagg_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			jagg_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			jagg_storage::Error::Render(message) => Self::Storage { message },
			err @ jagg_storage::Error::UnsupportedColumn { .. } =>
				Self::Storage { message: err.to_string() },
		}
	}
}

impl From<jagg_domain::Error> for Error {
	fn from(err: jagg_domain::Error) -> Self {
		match err {
			jagg_domain::Error::InvalidFilter { message } => Self::InvalidRequest { message },
			err @ jagg_domain::Error::UnknownValue { .. } =>
				Self::InvalidRequest { message: err.to_string() },
			jagg_domain::Error::Unsupported { message } => Self::Unsupported { message },
		}
	}
}
