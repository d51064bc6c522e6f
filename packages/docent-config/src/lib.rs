mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Agent, Config, EmbeddingProviderConfig, LlmProviderConfig, Postgres, ProviderConfig, Providers,
	Qdrant, Retrieval, Security, Service, Storage,
};

use std::{env, fs, path::Path};

const ENV_PREFIX: &str = "env:";

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg)?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in
		[("service.http_bind", &cfg.service.http_bind), ("service.admin_bind", &cfg.service.admin_bind)]
	{
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.collection must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if cfg.retrieval.candidate_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.candidate_k must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.top_n == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_n must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.top_n >= cfg.retrieval.candidate_k {
		return Err(Error::Validation {
			message: "retrieval.top_n must be less than retrieval.candidate_k.".to_string(),
		});
	}

	for (label, value) in [
		("retrieval.fingerprint_field", &cfg.retrieval.fingerprint_field),
		("retrieval.text_field", &cfg.retrieval.text_field),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.agent.max_tool_rounds == 0 {
		return Err(Error::Validation {
			message: "agent.max_tool_rounds must be greater than zero.".to_string(),
		});
	}
	if cfg.agent.history_limit == 0 {
		return Err(Error::Validation {
			message: "agent.history_limit must be greater than zero.".to_string(),
		});
	}

	for (label, temperature) in [
		("providers.agent.temperature", cfg.providers.agent.temperature),
		("providers.synthesis.temperature", cfg.providers.synthesis.temperature),
	] {
		if !temperature.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(0.0..=2.0).contains(&temperature) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-2.0."),
			});
		}
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("rerank", &cfg.providers.rerank.api_key),
		("agent", &cfg.providers.agent.api_key),
		("synthesis", &cfg.providers.synthesis.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	if cfg.security.bind_localhost_only && !is_loopback_bind(&cfg.service.admin_bind) {
		return Err(Error::Validation {
			message: "service.admin_bind must be a loopback address when security.bind_localhost_only is true."
				.to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) -> Result<()> {
	resolve_env("providers.embedding.api_key", &mut cfg.providers.embedding.api_key)?;
	resolve_env("providers.rerank.api_key", &mut cfg.providers.rerank.api_key)?;
	resolve_env("providers.agent.api_key", &mut cfg.providers.agent.api_key)?;
	resolve_env("providers.synthesis.api_key", &mut cfg.providers.synthesis.api_key)?;
	resolve_env("storage.postgres.dsn", &mut cfg.storage.postgres.dsn)?;

	clear_blank(&mut cfg.storage.qdrant.api_key);
	clear_blank(&mut cfg.agent.system_prompt);
	clear_blank(&mut cfg.security.api_auth_token);
	clear_blank(&mut cfg.security.admin_auth_token);

	Ok(())
}

fn resolve_env(field: &str, value: &mut String) -> Result<()> {
	let Some(name) = value.trim().strip_prefix(ENV_PREFIX) else {
		return Ok(());
	};
	let name = name.trim().to_string();

	*value = env::var(&name)
		.map_err(|_| Error::MissingEnv { field: field.to_string(), name: name.clone() })?;

	Ok(())
}

fn clear_blank(value: &mut Option<String>) {
	if value.as_deref().map(|inner| inner.trim().is_empty()).unwrap_or(false) {
		*value = None;
	}
}

fn is_loopback_bind(bind: &str) -> bool {
	let host = match bind.rsplit_once(':') {
		Some((host, _)) => host,
		None => bind,
	};
	let host = host.trim_start_matches('[').trim_end_matches(']');

	matches!(host, "localhost" | "127.0.0.1" | "::1") || host.starts_with("127.")
}
