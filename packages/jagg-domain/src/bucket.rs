use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One output row of an aggregation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AggregationBucket {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub additional_key: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stage: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub velocity_stage: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub count: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub min: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub median: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mean: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub p90: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub p95: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sum: Option<i64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub total_story_points: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mean_story_points: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub story_points_sum: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub unestimated_tickets_count: Option<i64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub assignees: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub priority: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub priority_order: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sprint_mappings: Option<Value>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub stacks: Option<Vec<AggregationBucket>>,
}
impl AggregationBucket {
	pub fn keyed(key: impl Into<String>) -> Self {
		Self { key: Some(key.into()), ..Default::default() }
	}
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AggregationPage {
	pub records: Vec<AggregationBucket>,
	pub total_count: usize,
}
impl AggregationPage {
	pub fn new(records: Vec<AggregationBucket>) -> Self {
		let total_count = records.len();

		Self { records, total_count }
	}
}
