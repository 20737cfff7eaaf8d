//! ORDER BY resolution for a calculation and dimension pair.

use jagg_domain::{Across, Calculation, IssueFilter, SortOrder};

use crate::{
	Error, Result,
	calculation::CalculationPlan,
	dimension::{self, DimensionPlan},
	joins::JoinNeeds,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SortPlan {
	pub(crate) order_by: Vec<String>,
	pub(crate) joins: JoinNeeds,
	/// The caller asked for a sort.
	pub(crate) explicit: bool,
}

pub(crate) fn resolve(
	filter: &IssueFilter,
	across: Across,
	calculation: &CalculationPlan,
	dimension: &DimensionPlan,
	values_only: bool,
) -> Result<SortPlan> {
	let mut plan = SortPlan::default();
	let tie_break = dimension.key.as_ref().map(|key| format!("{key} ASC NULLS LAST"));

	if values_only {
		plan.order_by.extend(tie_break);

		return Ok(plan);
	}

	let Some(entry) = filter.first_sort() else {
		if dimension.default_order.is_empty() {
			plan.order_by.extend(calculation.default_order.iter().cloned());
		} else {
			plan.order_by.extend(dimension.default_order.iter().cloned());
		}

		plan.order_by.extend(dimension.secondary_order.iter().cloned());
		plan.order_by.extend(tie_break);
		plan.order_by.dedup();

		return Ok(plan);
	};
	let id = entry.id.as_str();
	let direction = entry.order.as_sql();

	plan.explicit = true;

	if across == Across::SprintMapping {
		let column = match id {
			"start_date" => "sprint_mapping_start_date",
			"end_date" => "sprint_mapping_completed_at",
			_ => return Err(unsupported_sort(id, filter.calculation, across)),
		};

		plan.order_by.push(format!("{column} {direction} NULLS LAST"));
		plan.order_by.extend(tie_break);

		return Ok(plan);
	}

	if id == filter.calculation.as_str() {
		let column = own_output(filter, calculation)?;

		plan.order_by.push(format!("{column} {direction} NULLS LAST"));
		plan.order_by.extend(dimension.secondary_order.iter().cloned());
	} else if id == across.as_str() || dimension.key.as_deref() == Some(id) {
		plan.order_by.extend(key_sort(filter, across, dimension, entry.order, &mut plan.joins)?);
	} else if calculation.select.iter().any(|column| column.ends_with(&format!(" AS {id}"))) {
		plan.order_by.push(format!("{id} {direction} NULLS LAST"));
		plan.order_by.extend(dimension.secondary_order.iter().cloned());
	} else {
		return Err(unsupported_sort(id, filter.calculation, across));
	}

	plan.order_by.extend(tie_break);
	plan.order_by.dedup();

	Ok(plan)
}

fn own_output(filter: &IssueFilter, calculation: &CalculationPlan) -> Result<&'static str> {
	if filter.calculation == Calculation::ResolutionTime
		&& let Some(metric) = filter.metric.as_deref()
	{
		return match metric {
			"median_resolution_time" => Ok("median"),
			"average_resolution_time" => Ok("mean"),
			"90th_percentile_resolution_time" => Ok("p90"),
			"number_of_tickets_closed" => Ok("ct"),
			other => Err(Error::invalid(format!("Unknown resolution_time metric {other:?}."))),
		};
	}

	calculation
		.own_output
		.ok_or_else(|| unsupported_sort(filter.calculation.as_str(), filter.calculation, Across::None))
}

fn key_sort(
	filter: &IssueFilter,
	across: Across,
	dimension: &DimensionPlan,
	order: SortOrder,
	joins: &mut JoinNeeds,
) -> Result<Vec<String>> {
	let direction = order.as_sql();
	let Some(group) = dimension.group_by.first() else {
		return Err(unsupported_sort(across.as_str(), filter.calculation, across));
	};

	let order_by = match across {
		Across::CustomField => vec![
			format!(
				"CASE WHEN custom_field ~ '^-?[0-9]+(\\.[0-9]+)?$' THEN custom_field::float8 END \
				 {direction} NULLS LAST"
			),
			format!("LOWER(custom_field) {direction} NULLS LAST"),
		],
		Across::Priority => {
			joins.priority_order = true;

			vec![format!("MIN(priority_order) {} NULLS LAST", order.inverted().as_sql())]
		},
		Across::Version | Across::FixVersion => {
			let Some(end_date) = dimension.group_by.get(1) else {
				return Err(unsupported_sort(across.as_str(), filter.calculation, across));
			};

			vec![format!("{end_date} {direction} NULLS LAST")]
		},
		Across::Status if filter.calculation == Calculation::StageTimesReport =>
			vec![format!("LOWER(state) {direction} NULLS LAST")],
		_ if across.is_time_based() => vec![format!("{group} {direction} NULLS LAST")],
		_ if across.is_user() => {
			let name = dimension.additional_key.as_deref().unwrap_or(group);

			vec![format!("LOWER({name}) {direction} NULLS LAST")]
		},
		_ => vec![format!("LOWER({group}::text) {direction} NULLS LAST")],
	};

	Ok(order_by)
}

/// Issue columns a listing may sort on.
const LIST_SORTABLE: [&str; 16] = [
	"bounces",
	"desc_size",
	"epic",
	"first_assigned_at",
	"hops",
	"issue_created_at",
	"issue_due_at",
	"issue_resolved_at",
	"issue_type",
	"issue_updated_at",
	"key",
	"num_attachments",
	"priority",
	"project",
	"status",
	"story_points",
];

/// ORDER BY for a listing. Unknown columns fall back to `issue_created_at`; newest first unless
/// the caller picked an order.
pub(crate) fn list_order(filter: &IssueFilter) -> Vec<String> {
	let (column, order) = match filter.first_sort() {
		Some(entry) if LIST_SORTABLE.contains(&entry.id.as_str()) => (entry.id.as_str(), entry.order),
		Some(entry) => ("issue_created_at", entry.order),
		None => ("issue_created_at", SortOrder::Desc),
	};
	let mut order_by = vec![format!("{column} {} NULLS LAST", order.as_sql())];

	if column != "key" {
		order_by.push("key ASC".to_string());
	}

	order_by
}

fn unsupported_sort(id: &str, calculation: Calculation, across: Across) -> Error {
	Error::invalid(format!("Sort by {id:?} is not supported for {calculation} across {across}."))
}

/// Whether the link bypass may serve this sort.
pub(crate) fn bypass_safe(plan: &SortPlan, across: Across, stacking: bool) -> bool {
	plan.joins.is_empty() && dimension::bypass_safe(across, stacking)
}
