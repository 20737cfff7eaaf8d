//! Throwaway Postgres tenants for integration tests.
//!
//! Each [`TestDatabase`] owns a freshly created database plus the name of the tenant schema the
//! test bootstraps inside it. The database is dropped by [`TestDatabase::cleanup`], or on drop
//! when a test panics before reaching it.

pub mod fixtures;

mod error;

pub use error::{Error, Result};
pub use fixtures::IssueSeed;

use std::{env, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::runtime::Builder;
use uuid::Uuid;

use jagg_config::Postgres;

/// Environment variable naming the server the tests create their databases on.
pub const DSN_VAR: &str = "JAGG_PG_DSN";

const DATABASE_PREFIX: &str = "jagg_test_";
/// Databases tried, in order, for `CREATE DATABASE` and `DROP DATABASE`.
const MAINTENANCE_DATABASES: [&str; 2] = ["postgres", "template1"];

pub struct TestDatabase {
	name: String,
	dsn: String,
	schema: String,
	maintenance: PgConnectOptions,
	dropped: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse {DSN_VAR}: {err}.")))?;
		let (maintenance, mut conn) = connect_maintenance(&base).await?;
		let id = Uuid::new_v4().simple().to_string();
		let name = format!("{DATABASE_PREFIX}{id}");

		conn.execute(format!(r#"CREATE DATABASE "{name}""#).as_str())
			.await
			.map_err(|err| Error::Message(format!("Failed to create test database: {err}.")))?;

		let dsn = base.database(&name).to_url_lossy().to_string();

		Ok(Self { name, dsn, schema: format!("t_{id}"), maintenance, dropped: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	/// Tenant schema reserved for this test.
	pub fn schema(&self) -> String {
		self.schema.clone()
	}

	/// Storage settings that point at this database and its tenant schema.
	pub fn postgres(&self, pool_max_conns: u32) -> Postgres {
		Postgres { dsn: self.dsn.clone(), pool_max_conns, schema: self.schema.clone() }
	}

	pub async fn cleanup(mut self) -> Result<()> {
		drop_database(&self.name, &self.maintenance).await?;

		self.dropped = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.dropped {
			return;
		}

		let name = std::mem::take(&mut self.name);
		let maintenance = self.maintenance.clone();
		// The test's own runtime may be gone or busy; drop on a private one.
		let worker = thread::spawn(move || {
			let result = Builder::new_current_thread()
				.enable_all()
				.build()
				.map_err(|err| Error::Message(err.to_string()))
				.and_then(|runtime| runtime.block_on(drop_database(&name, &maintenance)));

			if let Err(err) = result {
				eprintln!("Failed to drop test database {name}: {err}");
			}
		});

		let _ = worker.join();
	}
}

pub fn env_dsn() -> Option<String> {
	env::var(DSN_VAR).ok()
}

async fn connect_maintenance(base: &PgConnectOptions) -> Result<(PgConnectOptions, PgConnection)> {
	let mut failures = Vec::new();

	for database in MAINTENANCE_DATABASES {
		let options = base.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => failures.push(format!("{database}: {err}")),
		}
	}

	Err(Error::Message(format!(
		"Failed to connect to a maintenance database ({}).",
		failures.join("; ")
	)))
}

async fn drop_database(name: &str, maintenance: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(maintenance).await?;

	// Pool connections of the test may still be open.
	sqlx::query(
		"SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> \
		 pg_backend_pid()",
	)
	.bind(name)
	.execute(&mut conn)
	.await?;
	conn.execute(format!(r#"DROP DATABASE IF EXISTS "{name}""#).as_str()).await?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	#[ignore = "Requires external Postgres. Set JAGG_PG_DSN to run."]
	async fn settings_point_at_the_private_database() {
		let Some(base_dsn) = env_dsn() else {
			eprintln!("Skipping settings_point_at_the_private_database; set JAGG_PG_DSN to run.");

			return;
		};
		let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
		let postgres = test_db.postgres(3);

		assert_eq!(postgres.dsn, test_db.dsn());
		assert_eq!(postgres.pool_max_conns, 3);
		assert!(postgres.schema.starts_with("t_"));
		assert!(test_db.dsn().contains(DATABASE_PREFIX));

		test_db.cleanup().await.expect("Failed to drop test database.");
	}
}
