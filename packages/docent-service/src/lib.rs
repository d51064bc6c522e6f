pub mod admin;
pub mod cache;
pub mod filter;
pub mod index;
pub mod orchestrator;
pub mod rerank;
pub mod retrieval;
pub mod session;
pub mod synthesis;

mod error;

pub use error::{Error, Result};

use std::{future::Future, pin::Pin, sync::Arc};

use docent_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use docent_providers::{
	chat::{self, ChatCompletion, ChatEventStream, ChatMessage, ToolSpec},
	embedding, rerank as rerank_api,
};
use docent_storage::db::Db;

pub use admin::{
	CollectionSummary, DeleteReport, PeekedPassage, RetrievalPassage, RetrievalReport, SessionView,
};
pub use cache::{ResourceCell, ResourceFactory};
pub use filter::TenantFilter;
pub use index::{
	Candidate, IndexHandle, Passage, PassageIndex, QdrantIndexFactory, QdrantPassageIndex,
	ScoredPassage,
};
pub use orchestrator::{
	ChatReply, ChatRequest, Orchestrator, TurnEvent, TurnStream,
	state::{Step, TurnState},
};
pub use rerank::RankedCandidate;
pub use retrieval::{
	ConversationContext, FAILURE_SENTINEL, Retrieval, RetrievalTool, TOOL_NAME, ToolResult,
	ToolResultKind,
};
pub use session::{
	Checkpoint, MemorySessionStore, Message, MessagePayload, MessageRole, NewMessage,
	PgSessionStore, Session, SessionStore,
};
pub use synthesis::{DefaultSynthesizerFactory, NO_CONTEXT_ANSWER, Synthesizer};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	/// Returns one entry per document. `None` marks documents outside the service's top-N.
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, Result<Vec<Option<f32>>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		tools: &'a [ToolSpec],
	) -> BoxFuture<'a, Result<ChatCompletion>>;

	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		tools: &'a [ToolSpec],
	) -> BoxFuture<'a, Result<ChatEventStream>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, rerank, chat }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), chat: provider }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts).await?) })
	}
}
impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, Result<Vec<Option<f32>>>> {
		Box::pin(async move { Ok(rerank_api::rerank(cfg, query, docs, top_n).await?) })
	}
}
impl ChatProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		tools: &'a [ToolSpec],
	) -> BoxFuture<'a, Result<ChatCompletion>> {
		Box::pin(async move { Ok(chat::complete(cfg, messages, tools).await?) })
	}

	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		tools: &'a [ToolSpec],
	) -> BoxFuture<'a, Result<ChatEventStream>> {
		Box::pin(async move { Ok(chat::stream(cfg, messages, tools).await?) })
	}
}

/// Wires the retrieval tool, the orchestrator, and the session store around one config.
pub struct DocentService {
	pub cfg: Arc<Config>,
	pub providers: Providers,
	pub tool: Arc<RetrievalTool>,
	pub orchestrator: Orchestrator,
	pub sessions: Arc<dyn SessionStore>,
}
impl DocentService {
	/// Production wiring: HTTP providers, Qdrant-backed index, Postgres-backed sessions.
	pub fn new(cfg: Config, db: Db) -> Self {
		let cfg = Arc::new(cfg);
		let providers = Providers::default();
		let index_factory = Arc::new(QdrantIndexFactory::new(cfg.clone(), providers.clone()));
		let synthesizer_factory =
			Arc::new(DefaultSynthesizerFactory::new(cfg.clone(), providers.clone()));
		let sessions = Arc::new(PgSessionStore::new(db.pool));

		Self::with_parts(cfg, providers, index_factory, synthesizer_factory, sessions)
	}

	pub fn with_parts(
		cfg: Arc<Config>,
		providers: Providers,
		index_factory: Arc<dyn ResourceFactory<IndexHandle>>,
		synthesizer_factory: Arc<dyn ResourceFactory<Synthesizer>>,
		sessions: Arc<dyn SessionStore>,
	) -> Self {
		let tool = Arc::new(RetrievalTool::new(
			cfg.clone(),
			providers.clone(),
			index_factory,
			synthesizer_factory,
		));
		let orchestrator =
			Orchestrator::new(cfg.clone(), providers.chat.clone(), tool.clone(), sessions.clone());

		Self { cfg, providers, tool, orchestrator, sessions }
	}

	pub async fn chat(&self, req: ChatRequest) -> Result<ChatReply> {
		self.orchestrator.chat(req).await
	}

	pub async fn chat_stream(&self, req: ChatRequest) -> Result<TurnStream> {
		self.orchestrator.chat_stream(req).await
	}
}

/// Short, stable digest of user text for log lines. Query text itself is never logged.
pub(crate) fn text_digest(text: &str) -> String {
	let hash = blake3::hash(text.as_bytes());

	hash.to_hex().as_str()[..12].to_string()
}
