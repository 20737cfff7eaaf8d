//! Postgres-backed store and metadata lookups.

use ahash::AHashMap;
use sqlx::PgPool;

use jagg_storage::{
	db::Db,
	models::{DynamicRow, StatusCategory},
	queries,
	sql::BoundQuery,
};

use crate::{AggregationStore, BoxFuture, FieldCatalog, PriorityRanks, Result, StatusClassifier};

/// Executes compiled statements and metadata lookups against one tenant schema.
#[derive(Clone, Debug)]
pub struct PgStore {
	pool: PgPool,
	pub schema: String,
}
impl PgStore {
	pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
		Self { pool, schema: schema.into() }
	}

	pub fn from_db(db: &Db, schema: impl Into<String>) -> Self {
		Self::new(db.pool.clone(), schema)
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}
}

impl AggregationStore for PgStore {
	fn fetch_rows<'a>(&'a self, query: &'a BoundQuery) -> BoxFuture<'a, Result<Vec<DynamicRow>>> {
		Box::pin(async move { Ok(queries::fetch_rows(&self.pool, query).await?) })
	}
}

impl PriorityRanks for PgStore {
	fn ranks<'a>(&'a self, integration_ids: &'a [i64]) -> BoxFuture<'a, Result<AHashMap<String, i64>>> {
		Box::pin(async move {
			let ranks = queries::priority_ranks(&self.pool, &self.schema, integration_ids).await?;
			let mut out = AHashMap::with_capacity(ranks.len());

			// Rows arrive ordered by integration; the first integration to rank a priority wins.
			for rank in ranks {
				out.entry(rank.priority.to_uppercase()).or_insert(i64::from(rank.priority_order));
			}

			Ok(out)
		})
	}
}

impl FieldCatalog for PgStore {
	fn field_type<'a>(
		&'a self,
		field_key: &'a str,
		integration_ids: &'a [i64],
	) -> BoxFuture<'a, Result<Option<String>>> {
		Box::pin(async move {
			Ok(queries::custom_field_type(&self.pool, &self.schema, field_key, integration_ids).await?)
		})
	}
}

impl StatusClassifier for PgStore {
	fn categories<'a>(
		&'a self,
		integration_ids: &'a [i64],
	) -> BoxFuture<'a, Result<Vec<StatusCategory>>> {
		Box::pin(async move {
			Ok(queries::status_categories(&self.pool, &self.schema, integration_ids).await?)
		})
	}
}
