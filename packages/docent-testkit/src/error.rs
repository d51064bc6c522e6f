pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Test fixture setup failed: {0}")]
	Fixture(String),
	#[error("Test database error: {0}")]
	Sqlx(#[from] sqlx::Error),
	#[error("Test collection error: {0}")]
	Qdrant(#[from] Box<qdrant_client::QdrantError>),
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}
