use std::cmp::Ordering;

use docent_config::ProviderConfig;

use crate::{Error, RerankProvider, Result, index::Candidate};

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
	pub candidate: Candidate,
	pub rerank_score: f32,
}

/// Scores `candidates` against `query` and keeps the best `top_n` by relevance.
///
/// Never calls the provider for an empty candidate list.
pub async fn rerank_candidates(
	provider: &dyn RerankProvider,
	cfg: &ProviderConfig,
	query: &str,
	candidates: Vec<Candidate>,
	top_n: u32,
) -> Result<Vec<RankedCandidate>> {
	if candidates.is_empty() {
		return Ok(Vec::new());
	}

	let docs: Vec<String> =
		candidates.iter().map(|candidate| candidate.passage.text.clone()).collect();
	let scores = provider.rerank(cfg, query, &docs, top_n as usize).await?;

	if scores.len() != candidates.len() {
		return Err(Error::Provider {
			message: format!(
				"Rerank provider returned {} scores for {} documents.",
				scores.len(),
				candidates.len()
			),
		});
	}

	Ok(select_top_n(candidates, &scores, top_n as usize))
}

/// Orders by rerank score descending, breaking ties by the original similarity rank.
///
/// Candidates without a score are dropped.
pub fn select_top_n(
	candidates: Vec<Candidate>,
	scores: &[Option<f32>],
	top_n: usize,
) -> Vec<RankedCandidate> {
	let mut ranked: Vec<RankedCandidate> = candidates
		.into_iter()
		.zip(scores.iter().copied())
		.filter_map(|(candidate, score)| {
			score.map(|rerank_score| RankedCandidate { candidate, rerank_score })
		})
		.collect();

	ranked.sort_by(|a, b| {
		cmp_f32_desc(a.rerank_score, b.rerank_score)
			.then_with(|| a.candidate.rank.cmp(&b.candidate.rank))
	});
	ranked.truncate(top_n);

	ranked
}

pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}
