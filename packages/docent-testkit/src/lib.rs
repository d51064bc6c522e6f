//! Throwaway Postgres databases and Qdrant collections for tests that need real backends.
//!
//! Everything here is gated on `DOCENT_PG_DSN` / `DOCENT_QDRANT_URL`. Tests call
//! [`pg_dsn_or_skip`] or [`qdrant_url_or_skip`] and return early when the backend is absent.

mod error;

pub use error::{Error, Result};

use std::{env, str::FromStr, thread, time::Duration};

use qdrant_client::Qdrant;
use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::{runtime::Builder, time};
use uuid::Uuid;

pub const PG_DSN_ENV: &str = "DOCENT_PG_DSN";
pub const QDRANT_URL_ENV: &str = "DOCENT_QDRANT_URL";

const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];

/// A freshly created database, dropped on [`TestDatabase::cleanup`] or, failing that, on drop.
pub struct TestDatabase {
	name: String,
	dsn: String,
	admin_options: PgConnectOptions,
	cleaned: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base_options = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Fixture(format!("Failed to parse {PG_DSN_ENV}: {err}.")))?;
		let (admin_options, mut admin_conn) = connect_admin(&base_options).await?;
		let name = format!("docent_test_{}", Uuid::new_v4().simple());

		admin_conn
			.execute(format!(r#"CREATE DATABASE "{name}""#).as_str())
			.await
			.map_err(|err| Error::Fixture(format!("Failed to create test database: {err}.")))?;

		let dsn = base_options.database(&name).to_url_lossy().to_string();

		Ok(Self { name, dsn, admin_options, cleaned: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn cleanup(mut self) -> Result<()> {
		drop_database(&self.name, &self.admin_options).await?;

		self.cleaned = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		let name = self.name.clone();
		let admin_options = self.admin_options.clone();
		let cleanup = thread::spawn(move || {
			let runtime = match Builder::new_current_thread().enable_all().build() {
				Ok(runtime) => runtime,
				Err(err) => {
					eprintln!("Test database cleanup failed: {err}.");

					return;
				},
			};

			if let Err(err) = runtime.block_on(drop_database(&name, &admin_options)) {
				eprintln!("Test database cleanup failed: {err}.");
			}
		});
		let _ = cleanup.join();
	}
}

/// A uniquely named Qdrant collection that is deleted on cleanup.
pub struct TestCollection {
	pub client: Qdrant,
	pub name: String,
}
impl TestCollection {
	pub fn new(url: &str, prefix: &str) -> Result<Self> {
		let client = Qdrant::from_url(url).build()?;
		let name = format!("{prefix}_{}", Uuid::new_v4().simple());

		Ok(Self { client, name })
	}

	pub async fn cleanup(self) -> Result<()> {
		let mut backoff = Duration::from_millis(100);

		for attempt in 1..=4 {
			match time::timeout(Duration::from_secs(10), self.client.delete_collection(self.name.clone()))
				.await
			{
				Ok(Ok(_)) => return Ok(()),
				Ok(Err(err)) if attempt == 4 => return Err(err.into()),
				Err(_) if attempt == 4 =>
					return Err(Error::Fixture(format!(
						"Timed out deleting Qdrant collection {:?}.",
						self.name
					))),
				_ => {},
			}

			time::sleep(backoff).await;

			backoff = backoff.saturating_mul(2);
		}

		Ok(())
	}
}

pub fn env_dsn() -> Option<String> {
	env::var(PG_DSN_ENV).ok().filter(|value| !value.trim().is_empty())
}

pub fn env_qdrant_url() -> Option<String> {
	env::var(QDRANT_URL_ENV).ok().filter(|value| !value.trim().is_empty())
}

pub fn pg_dsn_or_skip(test: &str) -> Option<String> {
	let dsn = env_dsn();

	if dsn.is_none() {
		eprintln!("Skipping {test}; set {PG_DSN_ENV} to run this test.");
	}

	dsn
}

pub fn qdrant_url_or_skip(test: &str) -> Option<String> {
	let url = env_qdrant_url();

	if url.is_none() {
		eprintln!("Skipping {test}; set {QDRANT_URL_ENV} to run this test.");
	}

	url
}

async fn connect_admin(
	base_options: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut last_err = None;

	for database in ADMIN_DATABASES {
		let options = base_options.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => last_err = Some(err),
		}
	}

	Err(Error::Fixture(format!("Failed to connect to an admin database: {last_err:?}.")))
}

async fn drop_database(name: &str, admin_options: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(admin_options).await.map_err(|err| {
		Error::Fixture(format!("Failed to connect to admin database for cleanup: {err}."))
	})?;
	let _ = sqlx::query(
		"\
SELECT pg_terminate_backend(pid)
FROM pg_stat_activity
WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.fetch_all(&mut conn)
	.await;

	sqlx::query(format!(r#"DROP DATABASE IF EXISTS "{name}""#).as_str())
		.execute(&mut conn)
		.await
		.map_err(|err| Error::Fixture(format!("Failed to drop test database: {err}.")))?;

	Ok(())
}
