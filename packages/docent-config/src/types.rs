use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub agent: Agent,
	#[serde(default)]
	pub security: Security,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
	/// Optional. Forwarded as the Qdrant API key when the server requires one.
	pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	/// Model that drives the conversation and decides on tool calls.
	pub agent: LlmProviderConfig,
	/// Model that composes grounded answers from retrieved passages.
	pub synthesis: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	/// Fan-out of the similarity search (K).
	pub candidate_k: u32,
	/// Passages kept after reranking and handed to synthesis (N).
	pub top_n: u32,
	/// Payload key holding the tenant fingerprint of each stored passage.
	pub fingerprint_field: String,
	/// Payload key holding the raw passage text.
	pub text_field: String,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			candidate_k: 10,
			top_n: 4,
			fingerprint_field: "doc_content_hash".to_string(),
			text_field: "text".to_string(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Agent {
	/// Upper bound on decide/tool rounds within one turn.
	pub max_tool_rounds: u32,
	/// Most recent history messages sent to the model on each step.
	pub history_limit: u32,
	/// Optional. Replaces the built-in system policy.
	pub system_prompt: Option<String>,
}
impl Default for Agent {
	fn default() -> Self {
		Self { max_tool_rounds: 4, history_limit: 64, system_prompt: None }
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
	pub admin_auth_token: Option<String>,
}

fn default_log_level() -> String {
	"info".to_string()
}
