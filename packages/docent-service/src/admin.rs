use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	DocentService, Error, Result,
	filter::TenantFilter,
	retrieval::ConversationContext,
	session::{Checkpoint, Message},
	text_digest,
};

const PREVIEW_CHARS: usize = 150;
const MAX_PEEK: u32 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionSummary {
	pub collection: String,
	pub point_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeekedPassage {
	pub id: String,
	pub fingerprint: Option<String>,
	pub preview: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteReport {
	pub fingerprint: String,
	pub deleted: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalPassage {
	pub id: String,
	pub rank: u32,
	pub similarity: f32,
	pub rerank_score: f32,
	pub preview: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalReport {
	pub fingerprint: String,
	pub candidate_count: usize,
	pub passages: Vec<RetrievalPassage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
	pub thread_id: String,
	pub messages: Vec<Message>,
	pub checkpoint: Option<Checkpoint>,
}

impl DocentService {
	pub async fn collection_summary(&self) -> Result<CollectionSummary> {
		let index = self.tool.index().await?;
		let point_count = index.index().count(None).await?;

		Ok(CollectionSummary { collection: index.index().collection().to_string(), point_count })
	}

	pub async fn peek(&self, limit: u32) -> Result<Vec<PeekedPassage>> {
		if limit == 0 || limit > MAX_PEEK {
			return Err(Error::InvalidRequest {
				message: format!("limit must be between 1 and {MAX_PEEK}."),
			});
		}

		let index = self.tool.index().await?;
		let passages = index.index().peek(limit).await?;
		let field = self.cfg.retrieval.fingerprint_field.as_str();

		Ok(passages
			.into_iter()
			.map(|passage| PeekedPassage {
				fingerprint: passage.metadata.get(field).and_then(Value::as_str).map(str::to_string),
				preview: preview(&passage.text),
				id: passage.id,
			})
			.collect())
	}

	pub async fn count_by_fingerprint(&self, fingerprint: &str) -> Result<u64> {
		let filter = self.tenant_filter(fingerprint)?;
		let index = self.tool.index().await?;

		index.index().count(Some(&filter)).await
	}

	/// Removes every stored passage of one tenant.
	pub async fn delete_by_fingerprint(&self, fingerprint: &str) -> Result<DeleteReport> {
		let filter = self.tenant_filter(fingerprint)?;
		let index = self.tool.index().await?;
		let deleted = index.index().count(Some(&filter)).await?;

		if deleted > 0 {
			index.index().delete(&filter).await?;
		}

		tracing::info!(
			collection = index.index().collection(),
			fingerprint,
			deleted,
			"Deleted tenant passages."
		);

		Ok(DeleteReport { fingerprint: fingerprint.to_string(), deleted })
	}

	/// Ranked passages for a query without synthesis.
	pub async fn inspect_retrieval(
		&self,
		query: &str,
		fingerprint: &str,
	) -> Result<RetrievalReport> {
		let ctx = ConversationContext::new(fingerprint)?;
		let retrieval = self.tool.retrieve(query, &ctx).await?;

		tracing::debug!(
			query_digest = %text_digest(query),
			fingerprint,
			candidate_count = retrieval.candidate_count,
			"Retrieval check finished."
		);

		Ok(RetrievalReport {
			fingerprint: fingerprint.to_string(),
			candidate_count: retrieval.candidate_count,
			passages: retrieval
				.passages
				.into_iter()
				.map(|item| RetrievalPassage {
					preview: preview(&item.candidate.passage.text),
					id: item.candidate.passage.id,
					rank: item.candidate.rank,
					similarity: item.candidate.similarity,
					rerank_score: item.rerank_score,
				})
				.collect(),
		})
	}

	pub async fn session(&self, thread_id: &str) -> Result<SessionView> {
		let session = self.sessions.load(thread_id).await?.ok_or_else(|| Error::NotFound {
			message: format!("No session for thread {thread_id:?}."),
		})?;

		Ok(SessionView {
			thread_id: session.thread_id,
			messages: session.messages,
			checkpoint: session.checkpoint,
		})
	}

	fn tenant_filter(&self, fingerprint: &str) -> Result<TenantFilter> {
		let ctx = ConversationContext::new(fingerprint)?;

		Ok(TenantFilter::for_context(&self.cfg.retrieval.fingerprint_field, &ctx))
	}
}

fn preview(text: &str) -> String {
	text.chars().take(PREVIEW_CHARS).collect()
}
