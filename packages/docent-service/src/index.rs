use std::{collections::HashMap, sync::Arc};

use qdrant_client::qdrant::{
	CountPointsBuilder, DeletePointsBuilder, PointId, Query, QueryPointsBuilder,
	ScrollPointsBuilder, Value as QdrantValue, point_id::PointIdOptions, value::Kind,
};
use serde_json::{Map, Number, Value};

use docent_config::Config;
use docent_storage::qdrant::QdrantStore;

use crate::{
	BoxFuture, EmbeddingProvider, Error, Providers, Result, cache::ResourceFactory,
	filter::TenantFilter,
};

/// A stored chunk of a source document. Read-only from this service's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
	pub id: String,
	pub text: String,
	/// Full payload, including the tenant fingerprint field.
	pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
	pub passage: Passage,
	pub score: f32,
}

/// A passage returned by similarity search for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
	pub passage: Passage,
	pub similarity: f32,
	/// 1-based position in the similarity ordering.
	pub rank: u32,
}

pub trait PassageIndex
where
	Self: Send + Sync,
{
	fn collection(&self) -> &str;

	/// Nearest neighbours of `vector` restricted by `filter`, best first, at most `limit`.
	fn query<'a>(
		&'a self,
		vector: Vec<f32>,
		filter: &'a TenantFilter,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ScoredPassage>>>;

	fn count<'a>(&'a self, filter: Option<&'a TenantFilter>) -> BoxFuture<'a, Result<u64>>;

	fn peek<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<Passage>>>;

	fn delete<'a>(&'a self, filter: &'a TenantFilter) -> BoxFuture<'a, Result<()>>;
}

/// The cached vector index handle: the query encoder bound to a passage index.
pub struct IndexHandle {
	cfg: Arc<Config>,
	embedding: Arc<dyn EmbeddingProvider>,
	index: Arc<dyn PassageIndex>,
}
impl IndexHandle {
	pub fn new(
		cfg: Arc<Config>,
		embedding: Arc<dyn EmbeddingProvider>,
		index: Arc<dyn PassageIndex>,
	) -> Self {
		Self { cfg, embedding, index }
	}

	pub fn index(&self) -> &dyn PassageIndex {
		self.index.as_ref()
	}

	pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let texts = vec![query.to_string()];
		let mut vectors = self.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

		if vectors.len() != 1 {
			return Err(Error::Provider {
				message: format!("Embedding provider returned {} vectors for 1 input.", vectors.len()),
			});
		}

		let vector = vectors.remove(0);

		if vector.len() != self.cfg.storage.qdrant.vector_dim as usize {
			return Err(Error::Provider { message: "Embedding vector dimension mismatch.".to_string() });
		}

		Ok(vector)
	}

	/// Top-`k` candidates for `query` that belong to the filter's tenant.
	///
	/// Passages whose payload fingerprint does not match are dropped even if the store returned
	/// them.
	pub async fn search(&self, query: &str, filter: &TenantFilter, k: u32) -> Result<Vec<Candidate>> {
		let vector = self.embed_query(query).await?;
		let scored = self.index.query(vector, filter, k).await?;
		let returned = scored.len();
		let candidates: Vec<Candidate> = scored
			.into_iter()
			.filter(|hit| filter.admits(&hit.passage.metadata))
			.take(k as usize)
			.enumerate()
			.map(|(idx, hit)| Candidate {
				passage: hit.passage,
				similarity: hit.score,
				rank: idx as u32 + 1,
			})
			.collect();
		let dropped = returned.saturating_sub(candidates.len());

		if dropped > 0 {
			tracing::warn!(
				collection = self.index.collection(),
				dropped,
				"Dropped passages that failed the tenant fingerprint check."
			);
		}

		Ok(candidates)
	}
}

pub struct QdrantPassageIndex {
	store: QdrantStore,
	text_field: String,
}
impl QdrantPassageIndex {
	pub fn new(store: QdrantStore, text_field: impl Into<String>) -> Self {
		Self { store, text_field: text_field.into() }
	}

	fn to_passage(&self, id: Option<&PointId>, payload: &HashMap<String, QdrantValue>) -> Option<Passage> {
		let metadata: Map<String, Value> =
			payload.iter().map(|(key, value)| (key.clone(), payload_to_json(value))).collect();
		let id = point_id_string(id);
		let Some(text) = metadata.get(&self.text_field).and_then(Value::as_str) else {
			tracing::warn!(
				collection = %self.store.collection,
				point_id = %id,
				text_field = %self.text_field,
				"Skipping point without passage text."
			);

			return None;
		};

		Some(Passage { id, text: text.to_string(), metadata })
	}
}
impl PassageIndex for QdrantPassageIndex {
	fn collection(&self) -> &str {
		self.store.collection.as_str()
	}

	fn query<'a>(
		&'a self,
		vector: Vec<f32>,
		filter: &'a TenantFilter,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ScoredPassage>>> {
		Box::pin(async move {
			let search = QueryPointsBuilder::new(self.store.collection.clone())
				.query(Query::new_nearest(vector))
				.filter(filter.to_qdrant())
				.limit(u64::from(limit))
				.with_payload(true);
			let response = self.store.client.query(search).await?;

			Ok(response
				.result
				.iter()
				.filter_map(|point| {
					self.to_passage(point.id.as_ref(), &point.payload)
						.map(|passage| ScoredPassage { passage, score: point.score })
				})
				.collect())
		})
	}

	fn count<'a>(&'a self, filter: Option<&'a TenantFilter>) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut request = CountPointsBuilder::new(self.store.collection.clone()).exact(true);

			if let Some(filter) = filter {
				request = request.filter(filter.to_qdrant());
			}

			let response = self.store.client.count(request).await?;

			Ok(response.result.map(|result| result.count).unwrap_or_default())
		})
	}

	fn peek<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<Passage>>> {
		Box::pin(async move {
			let request = ScrollPointsBuilder::new(self.store.collection.clone())
				.limit(limit)
				.with_payload(true);
			let response = self.store.client.scroll(request).await?;

			Ok(response
				.result
				.iter()
				.filter_map(|point| self.to_passage(point.id.as_ref(), &point.payload))
				.collect())
		})
	}

	fn delete<'a>(&'a self, filter: &'a TenantFilter) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let request = DeletePointsBuilder::new(self.store.collection.clone())
				.points(filter.to_qdrant())
				.wait(true);

			self.store.client.delete_points(request).await?;

			Ok(())
		})
	}
}

/// Connects to Qdrant and makes sure the configured collection exists.
pub struct QdrantIndexFactory {
	cfg: Arc<Config>,
	providers: Providers,
}
impl QdrantIndexFactory {
	pub fn new(cfg: Arc<Config>, providers: Providers) -> Self {
		Self { cfg, providers }
	}
}
impl ResourceFactory<IndexHandle> for QdrantIndexFactory {
	fn build<'a>(&'a self) -> BoxFuture<'a, Result<IndexHandle>> {
		Box::pin(async move {
			let init_err = |err: docent_storage::Error| Error::ResourceInit {
				resource: "passage index",
				message: err.to_string(),
			};
			let store = QdrantStore::new(&self.cfg.storage.qdrant).map_err(init_err)?;

			store.ensure_collection().await.map_err(init_err)?;

			let index = QdrantPassageIndex::new(store, self.cfg.retrieval.text_field.clone());

			Ok(IndexHandle::new(self.cfg.clone(), self.providers.embedding.clone(), Arc::new(index)))
		})
	}
}

pub(crate) fn point_id_string(id: Option<&PointId>) -> String {
	match id.and_then(|id| id.point_id_options.as_ref()) {
		Some(PointIdOptions::Num(num)) => num.to_string(),
		Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
		None => String::new(),
	}
}

fn payload_to_json(value: &QdrantValue) -> Value {
	match &value.kind {
		None | Some(Kind::NullValue(_)) => Value::Null,
		Some(Kind::BoolValue(flag)) => Value::Bool(*flag),
		Some(Kind::IntegerValue(number)) => Value::from(*number),
		Some(Kind::DoubleValue(number)) =>
			Number::from_f64(*number).map(Value::Number).unwrap_or(Value::Null),
		Some(Kind::StringValue(text)) => Value::String(text.clone()),
		Some(Kind::ListValue(list)) => Value::Array(list.values.iter().map(payload_to_json).collect()),
		Some(Kind::StructValue(object)) => Value::Object(
			object.fields.iter().map(|(key, value)| (key.clone(), payload_to_json(value))).collect(),
		),
	}
}
