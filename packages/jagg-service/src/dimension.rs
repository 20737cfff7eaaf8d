//! Grouping dimensions.
//!
//! Every [`Across`] maps to one [`Strategy`]; the strategy expands into a [`DimensionPlan`] that
//! the assembler splices into the layered query. Output columns are read from the row layer
//! (`finaltable`), so the expressions here are never qualified.

use jagg_domain::{AggInterval, Across, Calculation, IssueFilter};
use jagg_storage::params::Params;

use crate::{
	Error, Result,
	joins::{Derived, JoinNeeds, VersionField},
};

#[derive(Clone, Debug, Default)]
pub(crate) struct DimensionPlan {
	/// Extra columns of the filtered issue layer.
	pub(crate) base_columns: Vec<String>,
	/// Extra columns of the row layer, computed after the joins.
	pub(crate) row_columns: Vec<String>,
	pub(crate) select: Vec<String>,
	pub(crate) group_by: Vec<String>,
	pub(crate) key: Option<String>,
	pub(crate) additional_key: Option<String>,
	pub(crate) joins: JoinNeeds,
	/// Replaces the calculation's default order.
	pub(crate) default_order: Vec<String>,
	/// Appended after the calculation's default order.
	pub(crate) secondary_order: Vec<String>,
	/// Issue column that must be present for a row to be bucketed.
	pub(crate) not_null: Option<&'static str>,
	/// Issue-table predicates, qualified like the rest of the issue predicates.
	pub(crate) issue_conditions: Vec<String>,
	/// Keeps only the latest snapshot of an issue per bucket.
	pub(crate) ranked: bool,
	/// Predicates over the row layer, applied next to the post-aggregate partition.
	pub(crate) final_conditions: Vec<String>,
	pub(crate) interval: Option<AggInterval>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
	None,
	Column { column: &'static str },
	User { id: &'static str, name: &'static str },
	Array { column: &'static str, output: &'static str },
	Version(VersionField),
	Sprint,
	SprintMapping,
	Stage,
	VelocityStage,
	TicketCategory,
	CustomField,
	Time { column: &'static str },
	/// Buckets labelled by their distance from the reference time, nearest first.
	RelativeTime { column: &'static str },
}

fn strategy(across: Across) -> Strategy {
	match across {
		Across::None => Strategy::None,
		Across::Project => Strategy::Column { column: "project" },
		Across::Priority => Strategy::Column { column: "priority" },
		Across::Resolution => Strategy::Column { column: "resolution" },
		Across::IssueType => Strategy::Column { column: "issue_type" },
		Across::Status => Strategy::Column { column: "status" },
		Across::StatusCategory => Strategy::Column { column: "status_category" },
		Across::Epic => Strategy::Column { column: "epic" },
		Across::Parent => Strategy::Column { column: "parent_key" },
		Across::Assignee => Strategy::User { id: "assignee_id", name: "assignee" },
		Across::Reporter => Strategy::User { id: "reporter_id", name: "reporter" },
		Across::FirstAssignee => Strategy::User { id: "first_assignee_id", name: "first_assignee" },
		Across::Component => Strategy::Array { column: "components", output: "component" },
		Across::Label => Strategy::Array { column: "labels", output: "label" },
		Across::Version => Strategy::Version(VersionField::Version),
		Across::FixVersion => Strategy::Version(VersionField::FixVersion),
		Across::Sprint => Strategy::Sprint,
		Across::SprintMapping => Strategy::SprintMapping,
		Across::Stage => Strategy::Stage,
		Across::VelocityStage => Strategy::VelocityStage,
		Across::TicketCategory => Strategy::TicketCategory,
		Across::CustomField => Strategy::CustomField,
		Across::Trend => Strategy::Time { column: "ingested_at" },
		Across::IssueCreated => Strategy::Time { column: "issue_created_at" },
		Across::IssueUpdated => Strategy::Time { column: "issue_updated_at" },
		Across::IssueDue => Strategy::Time { column: "issue_due_at" },
		Across::IssueDueRelative => Strategy::RelativeTime { column: "issue_due_at" },
		Across::IssueResolved => Strategy::Time { column: "issue_resolved_at" },
	}
}

/// Dimensions the link bypass can group on without its joins.
pub(crate) fn bypass_safe(across: Across, stacking: bool) -> bool {
	match across {
		Across::Component
		| Across::Label
		| Across::FirstAssignee
		| Across::Status
		| Across::Assignee
		| Across::Reporter
		| Across::Project
		| Across::Priority
		| Across::Resolution => true,
		Across::IssueType => stacking,
		_ => false,
	}
}

pub(crate) fn resolve(
	across: Across,
	filter: &IssueFilter,
	derived: &Derived,
	now: &str,
	params: &mut Params,
) -> Result<DimensionPlan> {
	let mut plan = DimensionPlan { not_null: across.requires_non_null(), ..Default::default() };

	match strategy(across) {
		Strategy::None => {},
		Strategy::Column { column } => {
			plan.select.push(column.to_string());
			plan.group_by.push(column.to_string());
			plan.key = Some(column.to_string());
		},
		Strategy::User { id, name } => {
			plan.select.push(format!("{id}::text AS {id}"));
			plan.select.push(name.to_string());
			plan.group_by.push(id.to_string());
			plan.group_by.push(name.to_string());
			plan.key = Some(id.to_string());
			plan.additional_key = Some(name.to_string());
		},
		Strategy::Array { column, output } => {
			plan.row_columns.push(format!("{} AS {output}", unnest(column, filter, params)));
			plan.select.push(output.to_string());
			plan.group_by.push(output.to_string());
			plan.key = Some(output.to_string());
		},
		Strategy::Version(field) => {
			let name = field.alias();

			plan.joins.version = Some(field);
			plan.select.push(name.to_string());
			plan.select.push(format!("{name}_end_date"));
			plan.group_by.push(name.to_string());
			plan.group_by.push(format!("{name}_end_date"));
			plan.key = Some(name.to_string());
			plan.secondary_order.push(format!("{name}_end_date DESC NULLS LAST"));
		},
		Strategy::Sprint => {
			plan.joins.sprints = true;
			plan.select.extend(["sprint".to_string(), "sprint_creation_date".to_string()]);
			plan.group_by.extend(["sprint".to_string(), "sprint_creation_date".to_string()]);
			plan.key = Some("sprint".to_string());
			plan.default_order.push("sprint_creation_date DESC NULLS LAST".to_string());
		},
		Strategy::SprintMapping => {
			let columns = [
				"sprint_mapping_integration_id",
				"sprint_mapping_sprint_id",
				"sprint_mapping_name",
				"sprint_mapping_start_date",
				"sprint_mapping_completed_at",
			];

			plan.joins.sprint_mappings = true;
			plan.select.extend(columns.map(str::to_string));
			plan.group_by.extend(columns.map(str::to_string));
			plan.key = Some("sprint_mapping_sprint_id".to_string());
			plan.additional_key = Some("sprint_mapping_name".to_string());
			plan.default_order.push("sprint_mapping_completed_at DESC NULLS LAST".to_string());
		},
		Strategy::Stage if filter.calculation == Calculation::StageBounceReport => {
			plan.joins.stage_bounces = true;
			plan.select.push("bounce_stage AS stage".to_string());
			plan.group_by.push("bounce_stage".to_string());
			plan.key = Some("stage".to_string());
		},
		Strategy::Stage => {
			plan.joins.statuses = true;
			plan.select.push("state AS stage".to_string());
			plan.group_by.push("state".to_string());
			plan.key = Some("stage".to_string());
		},
		Strategy::VelocityStage => {
			plan.joins.statuses = true;
			plan.joins.velocity_stage = true;
			plan.select.push("velocity_stage".to_string());
			plan.group_by.push("velocity_stage".to_string());
			plan.key = Some("velocity_stage".to_string());
		},
		Strategy::TicketCategory => {
			plan.joins.ticket_category = true;
			plan.select.push("ticket_category".to_string());
			plan.group_by.push("ticket_category".to_string());
			plan.key = Some("ticket_category".to_string());
		},
		Strategy::CustomField => {
			let Some(key) = filter.custom_across.as_deref() else {
				return Err(Error::invalid("custom_across must be present with custom_field across."));
			};

			jagg_domain::filter::validate_custom_field_key(key)?;

			let value = if derived.custom_field_type.as_deref() == Some("array") {
				format!(
					"jsonb_array_elements_text(CASE WHEN jsonb_typeof(custom_fields->'{key}') = \
					 'array' THEN custom_fields->'{key}' ELSE '[]'::jsonb END)"
				)
			} else {
				format!("custom_fields->>'{key}'")
			};

			plan.row_columns.push(format!("{value} AS custom_field"));
			plan.select.push("custom_field".to_string());
			plan.group_by.push("custom_field".to_string());
			plan.key = Some("custom_field".to_string());
			plan.issue_conditions.push(format!("custom_fields ? '{key}'"));
		},
		Strategy::Time { column } => time(across, column, filter, None, &mut plan),
		Strategy::RelativeTime { column } => time(across, column, filter, Some(now), &mut plan),
	}

	Ok(plan)
}

/// Calendar bucket of an epoch-seconds column, as a UTC timestamp.
pub(crate) fn bucket_expression(column: &str, interval: AggInterval) -> String {
	let at = format!("(to_timestamp({column}) AT TIME ZONE 'UTC')");

	match interval {
		// Two-week windows anchored on Monday 1970-01-05.
		AggInterval::Biweekly => format!(
			"(to_timestamp(floor(({column} - 345600) / 1209600.0) * 1209600 + 345600) AT TIME \
			 ZONE 'UTC')"
		),
		AggInterval::DayOfWeek => format!("trim(to_char({at}, 'Day'))"),
		AggInterval::Day
		| AggInterval::Week
		| AggInterval::Month
		| AggInterval::Quarter
		| AggInterval::Year => format!("date_trunc('{}', {at})", interval.as_str()),
	}
}

fn label_expression(bucket: &str, interval: AggInterval) -> Option<String> {
	let format = match interval {
		AggInterval::Day => "DD-MM-YYYY",
		AggInterval::Week | AggInterval::Biweekly => "IW-IYYY",
		AggInterval::Month => "MM-YYYY",
		AggInterval::Quarter => return Some(format!("'Q' || to_char({bucket}, 'Q-YYYY')")),
		AggInterval::Year => "YYYY",
		AggInterval::DayOfWeek => return None,
	};

	Some(format!("to_char({bucket}, '{format}')"))
}

/// Whole intervals between `bucket` and the bucket holding `now`; `0` is the current one.
fn relative_label_expression(bucket: &str, now: &str, interval: AggInterval) -> Option<String> {
	let current = bucket_expression(now, interval);
	let part_diff =
		|part: &str| format!("(EXTRACT({part} FROM {bucket}) - EXTRACT({part} FROM {current}))");
	let offset = match interval {
		AggInterval::Day => format!("EXTRACT(EPOCH FROM {bucket} - {current}) / 86400"),
		AggInterval::Week => format!("EXTRACT(EPOCH FROM {bucket} - {current}) / 604800"),
		AggInterval::Biweekly => format!("EXTRACT(EPOCH FROM {bucket} - {current}) / 1209600"),
		AggInterval::Month => format!("{} * 12 + {}", part_diff("YEAR"), part_diff("MONTH")),
		AggInterval::Quarter => format!("{} * 4 + {}", part_diff("YEAR"), part_diff("QUARTER")),
		AggInterval::Year => part_diff("YEAR"),
		AggInterval::DayOfWeek => return None,
	};

	Some(format!("({offset})::bigint"))
}

/// `relative_to` is the reference timestamp placeholder of relative dimensions.
fn time(
	across: Across,
	column: &str,
	filter: &IssueFilter,
	relative_to: Option<&str>,
	plan: &mut DimensionPlan,
) {
	let interval = filter.interval();
	let name = across.as_str();
	let bucket = format!("{name}_interval");
	let expression = bucket_expression(column, interval);

	plan.base_columns.push(format!("{expression} AS {bucket}"));

	if across == Across::Trend && filter.calculation != Calculation::Age {
		plan.base_columns.push(format!(
			"ROW_NUMBER() OVER (PARTITION BY {expression}, integration_id, key ORDER BY \
			 ingested_at DESC) AS rank"
		));
		plan.ranked = true;
	}
	if across == Across::Trend && filter.calculation == Calculation::Age {
		// Ages are read from the snapshot taken on the bucket's first day only.
		plan.final_conditions
			.push(format!("(to_timestamp(ingested_at) AT TIME ZONE 'UTC')::date = {bucket}::date"));
	}

	if interval == AggInterval::DayOfWeek {
		plan.select.push(format!("{bucket} AS {name}"));
	} else {
		plan.select.push(format!("EXTRACT(EPOCH FROM {bucket})::bigint AS {name}"));
	}

	let label = match relative_to {
		Some(now) => relative_label_expression(&bucket, now, interval),
		None => label_expression(&bucket, interval),
	};

	if let Some(label) = label {
		plan.select.push(format!("{label} AS {name}_label"));
		plan.additional_key = Some(format!("{name}_label"));
	}

	let direction = if relative_to.is_some() { "ASC" } else { "DESC" };

	plan.group_by.push(bucket.clone());
	plan.key = Some(name.to_string());
	plan.default_order.push(format!("{bucket} {direction} NULLS LAST"));
	plan.interval = Some(interval);
}

/// `UNNEST` of an array column, narrowed to the caller's own values when requested.
fn unnest(column: &str, filter: &IssueFilter, params: &mut Params) -> String {
	let (values, partial) = match column {
		"components" => (&filter.components, filter.partial_match.get("components")),
		_ => (&filter.labels, filter.partial_match.get("labels")),
	};
	let patterns = partial.map(|partial| partial.patterns()).unwrap_or_default();

	if !filter.filter_across_values || (values.is_empty() && patterns.is_empty()) {
		return format!("UNNEST({column})");
	}

	let values = params.bind("across_values", values.clone());
	let patterns = params.bind("across_patterns", patterns);

	format!(
		"UNNEST(ARRAY(SELECT v FROM UNNEST({column}) AS v WHERE v = ANY({values}) OR v LIKE \
		 ANY({patterns})))"
	)
}

#[cfg(test)]
mod tests {
	use jagg_domain::PartialMatch;

	use super::*;

	fn resolved(across: Across, filter: &IssueFilter) -> (DimensionPlan, Params) {
		let mut params = Params::new();
		let plan = resolve(across, filter, &Derived::default(), ":now", &mut params)
			.expect("Dimension must resolve.");

		(plan, params)
	}

	#[test]
	fn user_dimensions_key_on_ids() {
		let (plan, _) = resolved(Across::Reporter, &IssueFilter::default());

		assert_eq!(plan.key.as_deref(), Some("reporter_id"));
		assert_eq!(plan.additional_key.as_deref(), Some("reporter"));
		assert_eq!(plan.select, vec!["reporter_id::text AS reporter_id", "reporter"]);
	}

	#[test]
	fn array_dimensions_unnest_in_the_row_layer() {
		let (plan, params) = resolved(Across::Label, &IssueFilter::default());

		assert_eq!(plan.row_columns, vec!["UNNEST(labels) AS label"]);
		assert_eq!(plan.group_by, vec!["label"]);
		assert!(params.is_empty());
	}

	#[test]
	fn across_values_narrow_the_unnest() {
		let mut filter = IssueFilter {
			components: vec!["api".to_string()],
			filter_across_values: true,
			..Default::default()
		};

		filter.partial_match.insert(
			"components".to_string(),
			PartialMatch { begins: Some("web".to_string()), ..Default::default() },
		);

		let (plan, params) = resolved(Across::Component, &filter);

		assert_eq!(
			plan.row_columns[0],
			"UNNEST(ARRAY(SELECT v FROM UNNEST(components) AS v WHERE v = ANY(:across_values) OR \
			 v LIKE ANY(:across_patterns))) AS component"
		);
		assert!(params.contains("across_patterns"));
	}

	#[test]
	fn trend_ranks_snapshots_except_for_age() {
		let filter = IssueFilter {
			agg_interval: Some("week".to_string()),
			..Default::default()
		};
		let (trend, _) = resolved(Across::Trend, &filter);

		assert!(trend.ranked);
		assert_eq!(trend.base_columns.len(), 2);
		assert_eq!(
			trend.base_columns[0],
			"date_trunc('week', (to_timestamp(ingested_at) AT TIME ZONE 'UTC')) AS trend_interval"
		);
		assert_eq!(trend.default_order, vec!["trend_interval DESC NULLS LAST"]);

		let filter = IssueFilter { calculation: Calculation::Age, ..filter };
		let (age, _) = resolved(Across::Trend, &filter);

		assert!(!age.ranked);
		assert_eq!(age.base_columns.len(), 1);
		assert_eq!(age.final_conditions, vec![
			"(to_timestamp(ingested_at) AT TIME ZONE 'UTC')::date = trend_interval::date"
		]);
		assert!(trend.final_conditions.is_empty());
	}

	#[test]
	fn due_dimensions_drop_undated_issues() {
		let (plan, _) = resolved(Across::IssueDueRelative, &IssueFilter::default());

		assert_eq!(plan.not_null, Some("issue_due_at"));
		assert_eq!(plan.key.as_deref(), Some("issue_due_relative"));
		assert_eq!(plan.additional_key.as_deref(), Some("issue_due_relative_label"));
	}

	#[test]
	fn relative_due_buckets_count_from_now_nearest_first() {
		let filter = IssueFilter { agg_interval: Some("week".to_string()), ..Default::default() };
		let (relative, _) = resolved(Across::IssueDueRelative, &filter);

		assert_eq!(relative.default_order, vec!["issue_due_relative_interval ASC NULLS LAST"]);
		assert_eq!(
			relative.select[1],
			"(EXTRACT(EPOCH FROM issue_due_relative_interval - date_trunc('week', \
			 (to_timestamp(:now) AT TIME ZONE 'UTC'))) / 604800)::bigint AS \
			 issue_due_relative_label"
		);

		let (absolute, _) = resolved(Across::IssueDue, &filter);

		assert_eq!(absolute.default_order, vec!["issue_due_interval DESC NULLS LAST"]);
		assert_eq!(absolute.select[1], "to_char(issue_due_interval, 'IW-IYYY') AS issue_due_label");

		let filter = IssueFilter { agg_interval: Some("quarter".to_string()), ..Default::default() };
		let (quarterly, _) = resolved(Across::IssueDueRelative, &filter);

		assert!(quarterly.select[1].ends_with(" * 4 + (EXTRACT(QUARTER FROM issue_due_relative_interval) - EXTRACT(QUARTER FROM date_trunc('quarter', (to_timestamp(:now) AT TIME ZONE 'UTC')))))::bigint AS issue_due_relative_label"));
	}

	#[test]
	fn custom_field_reads_arrays_by_element() {
		let filter = IssueFilter {
			custom_across: Some("customfield_10020".to_string()),
			..Default::default()
		};
		let derived = Derived { custom_field_type: Some("array".to_string()), ..Default::default() };
		let mut params = Params::new();
		let plan = resolve(Across::CustomField, &filter, &derived, ":now", &mut params)
			.expect("Dimension must resolve.");

		assert!(plan.row_columns[0].starts_with("jsonb_array_elements_text("));
		assert_eq!(plan.issue_conditions, vec!["custom_fields ? 'customfield_10020'"]);
	}

	#[test]
	fn day_of_week_buckets_have_no_label() {
		let filter = IssueFilter { agg_interval: Some("day_of_week".to_string()), ..Default::default() };
		let (plan, _) = resolved(Across::IssueCreated, &filter);

		assert_eq!(plan.select, vec!["issue_created_interval AS issue_created"]);
		assert_eq!(plan.additional_key, None);
	}
}
