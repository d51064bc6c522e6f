//! The `search_vdb` tool: tenant-scoped retrieval, reranking and grounded synthesis.
//!
//! [`RetrievalTool::search`] never fails. Every error on the way is logged and the model sees
//! [`FAILURE_SENTINEL`] instead, so it cannot mistake a fault for an answer.

use std::{sync::Arc, time::Instant};

use docent_config::Config;
use docent_providers::chat::ToolSpec;
use serde::{Deserialize, Serialize};

use crate::{
	Error, Providers, Result,
	cache::{ResourceCell, ResourceFactory},
	filter::TenantFilter,
	index::IndexHandle,
	rerank::{self, RankedCandidate},
	synthesis::Synthesizer,
	text_digest,
};

pub const TOOL_NAME: &str = "search_vdb";
pub const FAILURE_SENTINEL: &str = "System Instruction: Tool calling failed";

/// Per-request context supplied by the caller. Holds the tenant fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
	fingerprint: String,
}
impl ConversationContext {
	pub fn new(fingerprint: impl Into<String>) -> Result<Self> {
		let fingerprint = fingerprint.into();

		if fingerprint.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "doc_content_hash must be a non-empty string.".to_string(),
			});
		}

		Ok(Self { fingerprint })
	}

	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultKind {
	Answer,
	NoContext,
	Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
	pub kind: ToolResultKind,
	pub text: String,
}
impl ToolResult {
	pub fn failed() -> Self {
		Self { kind: ToolResultKind::Failed, text: FAILURE_SENTINEL.to_string() }
	}
}

/// Ranked passages for one query, before synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
	/// Candidates that survived the tenant check, before reranking.
	pub candidate_count: usize,
	pub passages: Vec<RankedCandidate>,
}

pub struct RetrievalTool {
	cfg: Arc<Config>,
	providers: Providers,
	index: ResourceCell<IndexHandle>,
	index_factory: Arc<dyn ResourceFactory<IndexHandle>>,
	synthesizer: ResourceCell<Synthesizer>,
	synthesizer_factory: Arc<dyn ResourceFactory<Synthesizer>>,
}
impl RetrievalTool {
	pub fn new(
		cfg: Arc<Config>,
		providers: Providers,
		index_factory: Arc<dyn ResourceFactory<IndexHandle>>,
		synthesizer_factory: Arc<dyn ResourceFactory<Synthesizer>>,
	) -> Self {
		Self {
			cfg,
			providers,
			index: ResourceCell::new("passage index"),
			index_factory,
			synthesizer: ResourceCell::new("response synthesizer"),
			synthesizer_factory,
		}
	}

	pub fn spec() -> ToolSpec {
		ToolSpec {
			name: TOOL_NAME.to_string(),
			description: "Search the user's document for passages relevant to the query and return \
				an answer grounded in them."
				.to_string(),
			parameters: serde_json::json!({
				"type": "object",
				"properties": {
					"query": {
						"type": "string",
						"description": "The original user query, verbatim.",
					},
				},
				"required": ["query"],
			}),
		}
	}

	pub async fn index(&self) -> Result<Arc<IndexHandle>> {
		self.index.get_or_build(self.index_factory.as_ref()).await
	}

	pub async fn synthesizer(&self) -> Result<Arc<Synthesizer>> {
		self.synthesizer.get_or_build(self.synthesizer_factory.as_ref()).await
	}

	/// Runs the tool. Always returns a non-empty result.
	pub async fn search(&self, query: &str, ctx: &ConversationContext) -> ToolResult {
		let started = Instant::now();
		let query_digest = text_digest(query);

		match self.try_search(query, ctx).await {
			Ok((result, retrieval)) => {
				tracing::debug!(
					query_digest = %query_digest,
					fingerprint = %ctx.fingerprint(),
					candidate_count = retrieval.candidate_count,
					selected = retrieval.passages.len(),
					elapsed_ms = started.elapsed().as_millis() as u64,
					"Retrieval tool finished."
				);

				result
			},
			Err(err) => {
				tracing::error!(
					error = %err,
					query_digest = %query_digest,
					fingerprint = %ctx.fingerprint(),
					"Retrieval tool failed."
				);

				ToolResult::failed()
			},
		}
	}

	/// Tenant-scoped top-K retrieval followed by reranking down to top-N.
	pub async fn retrieve(&self, query: &str, ctx: &ConversationContext) -> Result<Retrieval> {
		let index = self.index().await?;

		self.retrieve_from(&index, query, ctx).await
	}

	async fn try_search(
		&self,
		query: &str,
		ctx: &ConversationContext,
	) -> Result<(ToolResult, Retrieval)> {
		let index = self.index().await?;
		let synthesizer = self.synthesizer().await?;
		let retrieval = self.retrieve_from(&index, query, ctx).await?;
		let text = synthesizer.synthesize(query, &retrieval.passages).await?;
		let kind = if retrieval.passages.is_empty() {
			ToolResultKind::NoContext
		} else {
			ToolResultKind::Answer
		};

		Ok((ToolResult { kind, text }, retrieval))
	}

	async fn retrieve_from(
		&self,
		index: &IndexHandle,
		query: &str,
		ctx: &ConversationContext,
	) -> Result<Retrieval> {
		if query.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "Tool query must not be empty.".to_string() });
		}

		let retrieval_cfg = &self.cfg.retrieval;
		let filter = TenantFilter::for_context(&retrieval_cfg.fingerprint_field, ctx);
		let candidates = index.search(query, &filter, retrieval_cfg.candidate_k).await?;
		let candidate_count = candidates.len();
		let passages = rerank::rerank_candidates(
			self.providers.rerank.as_ref(),
			&self.cfg.providers.rerank,
			query,
			candidates,
			retrieval_cfg.top_n,
		)
		.await?;

		Ok(Retrieval { candidate_count, passages })
	}
}
