use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub aggregation: Aggregation,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	/// Schema holding the issue tables. One schema per tenant.
	pub schema: String,
}

/// Knobs for the aggregation pipeline.
///
/// Every field has a default so the whole `[aggregation]` table may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Aggregation {
	/// Width of the worker pool used by the stacked pass.
	pub stack_parallelism: usize,
	/// Page size used when a filter asks for paging without a size.
	pub default_page_size: u32,
	/// Idle threshold for the `idle` hygiene criterion when the filter carries none.
	pub default_idle_days: i64,
	/// Description-size threshold for the `poor_description` hygiene criterion.
	pub poor_description_size: i64,
	/// Row cap applied to non-paginated aggregations when the filter carries no limit.
	pub default_across_limit: Option<u32>,
}
impl Default for Aggregation {
	fn default() -> Self {
		Self {
			stack_parallelism: 2,
			default_page_size: 10,
			default_idle_days: 30,
			poor_description_size: 10,
			default_across_limit: None,
		}
	}
}
