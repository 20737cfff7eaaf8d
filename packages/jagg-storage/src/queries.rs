use sqlx::{PgPool, postgres::PgArguments, query::Query};

use crate::{
	Result,
	models::{self, DynamicRow, PriorityRank, StatusCategory},
	params::ParamValue,
	sql::BoundQuery,
};

/// Runs a compiled statement and decodes every row dynamically.
pub async fn fetch_rows(pool: &PgPool, query: &BoundQuery) -> Result<Vec<DynamicRow>> {
	let mut statement = sqlx::query(&query.sql);

	for value in &query.binds {
		statement = bind_value(statement, value);
	}

	let rows = statement.fetch_all(pool).await?;

	rows.iter().map(models::decode_row).collect()
}

/// Default-scheme priority order per integration.
pub async fn priority_ranks(
	pool: &PgPool,
	schema: &str,
	integration_ids: &[i64],
) -> Result<Vec<PriorityRank>> {
	let sql = format!(
		"\
SELECT DISTINCT integration_id, priority, priority_order
FROM {schema}.jira_issue_priorities
WHERE scheme = 'default'
	AND project = '_levelops_default_'
	AND integration_id = ANY($1)
ORDER BY integration_id, priority_order"
	);
	let ranks = sqlx::query_as::<_, PriorityRank>(&sql).bind(integration_ids).fetch_all(pool).await?;

	Ok(ranks)
}

/// Declared type of a custom field (`array`, `number`, `string`, ...).
pub async fn custom_field_type(
	pool: &PgPool,
	schema: &str,
	field_key: &str,
	integration_ids: &[i64],
) -> Result<Option<String>> {
	let sql = format!(
		"\
SELECT field_type
FROM {schema}.jira_fields
WHERE field_key = $1
	AND (cardinality($2::bigint[]) = 0 OR integration_id = ANY($2))
ORDER BY integration_id
LIMIT 1"
	);
	let field_type = sqlx::query_scalar::<_, String>(&sql)
		.bind(field_key)
		.bind(integration_ids)
		.fetch_optional(pool)
		.await?;

	Ok(field_type)
}

pub async fn status_categories(
	pool: &PgPool,
	schema: &str,
	integration_ids: &[i64],
) -> Result<Vec<StatusCategory>> {
	let sql = format!(
		"\
SELECT DISTINCT integration_id, status, status_category
FROM {schema}.jira_status_metadata
WHERE cardinality($1::bigint[]) = 0 OR integration_id = ANY($1)
ORDER BY integration_id, status"
	);
	let categories =
		sqlx::query_as::<_, StatusCategory>(&sql).bind(integration_ids).fetch_all(pool).await?;

	Ok(categories)
}

fn bind_value<'q>(
	statement: Query<'q, sqlx::Postgres, PgArguments>,
	value: &ParamValue,
) -> Query<'q, sqlx::Postgres, PgArguments> {
	match value {
		ParamValue::Bool(value) => statement.bind(*value),
		ParamValue::Int(value) => statement.bind(*value),
		ParamValue::Float(value) => statement.bind(*value),
		ParamValue::Text(value) => statement.bind(value.clone()),
		ParamValue::IntList(values) => statement.bind(values.clone()),
		ParamValue::TextList(values) => statement.bind(values.clone()),
	}
}
