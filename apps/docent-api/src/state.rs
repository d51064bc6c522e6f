use std::sync::Arc;

use docent_config::Config;
use docent_service::DocentService;
use docent_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<DocentService>,
}
impl AppState {
	pub fn new(service: DocentService) -> Self {
		Self { service: Arc::new(service) }
	}

	/// Connects Postgres, applies the schema, and wires the production service.
	///
	/// The vector index and the synthesizer are built lazily on the first retrieval.
	pub async fn connect(config: Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		Ok(Self::new(DocentService::new(config, db)))
	}

	pub fn api_token(&self) -> Option<&str> {
		self.service.cfg.security.api_auth_token.as_deref()
	}

	pub fn admin_token(&self) -> Option<&str> {
		self.service.cfg.security.admin_auth_token.as_deref()
	}
}
