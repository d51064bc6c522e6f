use std::sync::Arc;

use docent_config::Config;
use docent_providers::chat::ChatMessage;

use crate::{
	BoxFuture, ChatProvider, Error, Providers, Result, cache::ResourceFactory,
	rerank::RankedCandidate,
};

pub const NO_CONTEXT_ANSWER: &str = "No relevant context found for this query.";

const INSTRUCTIONS: &str = "\
Answer the question using only the numbered context passages below. \
Do not use prior knowledge. \
If the passages do not contain the answer, say that the context does not cover it.";

/// Composes a grounded answer from ranked passages with one chat completion.
pub struct Synthesizer {
	cfg: Arc<Config>,
	chat: Arc<dyn ChatProvider>,
}
impl Synthesizer {
	pub fn new(cfg: Arc<Config>, chat: Arc<dyn ChatProvider>) -> Self {
		Self { cfg, chat }
	}

	pub async fn synthesize(&self, query: &str, passages: &[RankedCandidate]) -> Result<String> {
		if passages.is_empty() {
			return Ok(NO_CONTEXT_ANSWER.to_string());
		}

		let messages = vec![ChatMessage::system(INSTRUCTIONS), ChatMessage::user(render_prompt(query, passages))];
		let completion = self
			.chat
			.complete(&self.cfg.providers.synthesis, &messages, &[])
			.await
			.map_err(|err| Error::Synthesis { message: err.to_string() })?;
		let answer = completion.content.trim();

		if answer.is_empty() {
			return Err(Error::Synthesis { message: "Synthesis model returned an empty answer.".to_string() });
		}

		Ok(answer.to_string())
	}
}

pub struct DefaultSynthesizerFactory {
	cfg: Arc<Config>,
	providers: Providers,
}
impl DefaultSynthesizerFactory {
	pub fn new(cfg: Arc<Config>, providers: Providers) -> Self {
		Self { cfg, providers }
	}
}
impl ResourceFactory<Synthesizer> for DefaultSynthesizerFactory {
	fn build<'a>(&'a self) -> BoxFuture<'a, Result<Synthesizer>> {
		Box::pin(async move { Ok(Synthesizer::new(self.cfg.clone(), self.providers.chat.clone())) })
	}
}

fn render_prompt(query: &str, passages: &[RankedCandidate]) -> String {
	let context: String = passages
		.iter()
		.enumerate()
		.map(|(idx, item)| format!("[{}] {}\n", idx + 1, item.candidate.passage.text.trim()))
		.collect();

	format!("Context:\n{context}\nQuestion: {query}")
}
