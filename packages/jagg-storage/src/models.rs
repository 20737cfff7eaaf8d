use serde_json::{Map, Value};
use sqlx::{Column, Row, TypeInfo, postgres::PgRow};
use uuid::Uuid;

use crate::{Error, Result};

/// Column name to JSON value; the shape of every aggregation result row.
pub type DynamicRow = Map<String, Value>;

#[derive(Debug, sqlx::FromRow)]
pub struct PriorityRank {
	pub integration_id: i32,
	pub priority: String,
	pub priority_order: i32,
}

#[derive(Debug, sqlx::FromRow)]
pub struct StatusCategory {
	pub integration_id: i32,
	pub status: String,
	pub status_category: String,
}

/// Decodes a row of arbitrary shape by inspecting each column's Postgres type.
///
/// Numeric aggregates must be cast to `bigint` or `float8` in SQL; `NUMERIC` is rejected.
pub fn decode_row(row: &PgRow) -> Result<DynamicRow> {
	let mut out = Map::with_capacity(row.columns().len());

	for column in row.columns() {
		let idx = column.ordinal();
		let type_name = column.type_info().name();
		let value = match type_name {
			"INT8" => to_json(row.try_get::<Option<i64>, _>(idx)?),
			"INT4" => to_json(row.try_get::<Option<i32>, _>(idx)?),
			"INT2" => to_json(row.try_get::<Option<i16>, _>(idx)?),
			"FLOAT8" => to_json(row.try_get::<Option<f64>, _>(idx)?),
			"FLOAT4" => to_json(row.try_get::<Option<f32>, _>(idx)?),
			"BOOL" => to_json(row.try_get::<Option<bool>, _>(idx)?),
			"TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => to_json(row.try_get::<Option<String>, _>(idx)?),
			"UUID" => to_json(row.try_get::<Option<Uuid>, _>(idx)?.map(|id| id.to_string())),
			"JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?.unwrap_or(Value::Null),
			"TEXT[]" | "VARCHAR[]" => to_json(row.try_get::<Option<Vec<String>>, _>(idx)?),
			"INT8[]" => to_json(row.try_get::<Option<Vec<i64>>, _>(idx)?),
			"INT4[]" => to_json(row.try_get::<Option<Vec<i32>>, _>(idx)?),
			other =>
				return Err(Error::UnsupportedColumn {
					column: column.name().to_string(),
					type_name: other.to_string(),
				}),
		};

		out.insert(column.name().to_string(), value);
	}

	Ok(out)
}

fn to_json<T>(value: Option<T>) -> Value
where
	T: Into<Value>,
{
	value.map(Into::into).unwrap_or(Value::Null)
}
