use qdrant_client::{
	Qdrant,
	qdrant::{CreateCollectionBuilder, Distance, VectorParamsBuilder},
};

use crate::Result;

pub struct QdrantStore {
	pub client: Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &docent_config::Qdrant) -> Result<Self> {
		let mut builder = Qdrant::from_url(&cfg.url);

		if let Some(api_key) = cfg.api_key.as_ref() {
			builder = builder.api_key(api_key.clone());
		}

		let client = builder.build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Creates the collection with cosine distance when it does not exist yet.
	///
	/// Returns `true` when this call created it. A concurrent creator winning the race is not an
	/// error.
	pub async fn ensure_collection(&self) -> Result<bool> {
		if self.client.collection_exists(self.collection.as_str()).await? {
			return Ok(false);
		}

		let builder = CreateCollectionBuilder::new(self.collection.clone()).vectors_config(
			VectorParamsBuilder::new(u64::from(self.vector_dim), Distance::Cosine),
		);

		match self.client.create_collection(builder).await {
			Ok(_) => {
				tracing::info!(
					collection = %self.collection,
					vector_dim = self.vector_dim,
					"Created passage collection."
				);

				Ok(true)
			},
			Err(err) => {
				if self.client.collection_exists(self.collection.as_str()).await? {
					return Ok(false);
				}

				Err(err.into())
			},
		}
	}
}
