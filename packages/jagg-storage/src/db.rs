use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Error, Result, schema};

pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &jagg_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	/// Creates the reference tables inside `schema` when they are missing.
	pub async fn ensure_schema(&self, schema: &str) -> Result<()> {
		if !jagg_config::is_plain_identifier(schema) {
			return Err(Error::InvalidArgument(format!("Schema {schema:?} is not a plain identifier.")));
		}

		let sql = schema::render_schema(schema);
		let lock_id: i64 = 7_120_115;
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(lock_id).execute(&mut *tx).await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}
}
