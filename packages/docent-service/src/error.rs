pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Failed to initialize {resource}: {message}")]
	ResourceInit { resource: &'static str, message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Retrieval error: {message}")]
	Retrieval { message: String },
	#[error("Synthesis error: {message}")]
	Synthesis { message: String },
	#[error("Session store error: {message}")]
	Session { message: String },
	#[error("Invalid turn state: {message}")]
	InvalidState { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<docent_storage::Error> for Error {
	fn from(err: docent_storage::Error) -> Self {
		match err {
			docent_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			docent_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			docent_storage::Error::NotFound(message) => Self::NotFound { message },
			docent_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}

impl From<docent_providers::Error> for Error {
	fn from(err: docent_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant { message: err.to_string() }
	}
}
