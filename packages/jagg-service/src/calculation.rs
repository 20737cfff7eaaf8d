//! Aggregate statistics per bucket.
//!
//! Aggregates are always cast to `bigint` or `float8` so rows decode without `NUMERIC`.

use jagg_domain::{Across, Calculation, IssueFilter};

use crate::{Error, Result, joins::JoinNeeds};

#[derive(Clone, Debug, Default)]
pub(crate) struct CalculationPlan {
	pub(crate) select: Vec<String>,
	pub(crate) group_by: Vec<String>,
	pub(crate) joins: JoinNeeds,
	pub(crate) default_order: Vec<String>,
	/// Output sorted on when the caller sorts by the calculation itself.
	pub(crate) own_output: Option<&'static str>,
	/// Unqualified issue-table predicates the calculation only makes sense under.
	pub(crate) issue_conditions: Vec<String>,
}

/// Statistics emitted for a per-row value.
#[derive(Clone, Copy)]
struct Stats {
	min_max: bool,
	median: bool,
	p90: bool,
	p95: bool,
	mean: bool,
}
impl Stats {
	const DURATION: Self = Self { min_max: true, median: true, p90: false, p95: false, mean: false };
	const SPREAD: Self = Self { min_max: true, median: true, p90: true, p95: false, mean: true };

	fn columns(self, value: &str) -> Vec<String> {
		let mut out = Vec::new();

		if self.min_max {
			out.push(format!("MIN({value})::bigint AS mn"));
			out.push(format!("MAX({value})::bigint AS mx"));
		}
		if self.median {
			out.push(format!("PERCENTILE_DISC(0.5) WITHIN GROUP (ORDER BY {value})::bigint AS median"));
		}
		if self.p90 {
			out.push(format!("PERCENTILE_CONT(0.9) WITHIN GROUP (ORDER BY {value})::float8 AS p90"));
		}
		if self.p95 {
			out.push(format!("PERCENTILE_CONT(0.95) WITHIN GROUP (ORDER BY {value})::float8 AS p95"));
		}
		if self.mean {
			out.push(format!("AVG({value})::float8 AS mean"));
		}

		out
	}
}

/// Full summary over a per-issue value.
pub(crate) fn summary_columns(value: &str) -> Vec<String> {
	Stats { min_max: true, median: true, p90: true, p95: true, mean: true }.columns(value)
}

const COUNT: &str = "COUNT(DISTINCT id)::bigint AS ct";

/// `now` is the placeholder of the reference timestamp.
pub(crate) fn resolve(
	calculation: Calculation,
	across: Across,
	filter: &IssueFilter,
	now: &str,
) -> Result<CalculationPlan> {
	let mut plan = CalculationPlan::default();
	let duration = |plan: &mut CalculationPlan, value: &str, stats: Stats| {
		plan.select.extend(stats.columns(value));
		plan.select.push(COUNT.to_string());
		plan.default_order.push("mx DESC NULLS LAST".to_string());
		plan.own_output = Some("median");
	};

	match calculation {
		Calculation::TicketCount => {
			plan.select.extend([
				COUNT.to_string(),
				"COALESCE(SUM(story_points), 0)::bigint AS total_story_points".to_string(),
				"AVG(COALESCE(story_points, 0))::float8 AS mean_story_points".to_string(),
			]);
			plan.default_order.push("ct DESC NULLS LAST".to_string());
			plan.own_output = Some("ct");
		},
		Calculation::StoryPoints => {
			plan.select.extend([
				"COALESCE(SUM(story_points), 0)::bigint AS story_points_sum".to_string(),
				"(COUNT(DISTINCT id) FILTER (WHERE story_points IS NULL OR story_points = \
				 0))::bigint AS unestimated_tickets_count"
					.to_string(),
				COUNT.to_string(),
			]);
			plan.default_order.push("story_points_sum DESC NULLS LAST".to_string());
			plan.own_output = Some("story_points_sum");
		},
		Calculation::Assignees => {
			let column = if filter.assignees_date_range.is_some() { "assignee_item" } else { "assignee" };

			plan.select.push(format!("array_remove(array_agg(DISTINCT {column}), NULL) AS assignees"));
			plan.select.push(COUNT.to_string());
			plan.default_order.push("ct DESC NULLS LAST".to_string());
			plan.own_output = Some("assignees");
		},
		Calculation::Priority => {
			plan.joins.priority_order = true;
			plan.select.extend([
				"priority".to_string(),
				"MIN(priority_order)::bigint AS priority_order".to_string(),
				COUNT.to_string(),
			]);
			plan.group_by.push("priority".to_string());
			plan.default_order.push("priority_order ASC NULLS LAST".to_string());
			plan.own_output = Some("priority_order");
		},
		Calculation::Hops => duration(&mut plan, "hops", Stats::DURATION),
		Calculation::Bounces => duration(&mut plan, "bounces", Stats::DURATION),
		Calculation::Age =>
			duration(&mut plan, "((ingested_at - issue_created_at) / 86400)", Stats::SPREAD),
		Calculation::ResolutionTime => duration(
			&mut plan,
			&format!("GREATEST(COALESCE(issue_resolved_at, {now}) - issue_created_at, 0)"),
			Stats::SPREAD,
		),
		Calculation::ResponseTime => duration(
			&mut plan,
			&format!("GREATEST(COALESCE(first_comment_at, {now}) - issue_created_at, 0)"),
			Stats::DURATION,
		),
		Calculation::AssignToResolve => {
			plan.issue_conditions.push("first_assigned_at IS NOT NULL".to_string());

			duration(
				&mut plan,
				&format!("GREATEST(COALESCE(issue_resolved_at, {now}) - first_assigned_at, 0)"),
				Stats::DURATION,
			);
		},
		Calculation::StateTransitionTime => {
			plan.joins.transitions = true;

			duration(&mut plan, "state_transition_time", Stats::DURATION);
		},
		Calculation::StageTimesReport => {
			plan.joins.statuses = true;
			plan.select.push("state AS stage".to_string());
			plan.select.extend(
				Stats { min_max: false, median: true, p90: true, p95: true, mean: true }
					.columns("time_spent"),
			);
			plan.select.push(COUNT.to_string());
			plan.group_by.push("state".to_string());
			plan.default_order.push("mean DESC NULLS LAST".to_string());
			plan.own_output = Some("mean");
		},
		Calculation::StageBounceReport => {
			plan.joins.stage_bounces = true;

			if across != Across::Stage {
				plan.select.push("bounce_stage AS stage".to_string());
				plan.group_by.push("bounce_stage".to_string());
			}

			plan.select.extend([
				"AVG(stage_bounces)::float8 AS mean".to_string(),
				"PERCENTILE_DISC(0.5) WITHIN GROUP (ORDER BY stage_bounces)::bigint AS median"
					.to_string(),
				COUNT.to_string(),
			]);
			plan.default_order.push("ct DESC NULLS LAST".to_string());
			plan.own_output = Some("mean");
		},
		Calculation::VelocityStageTimesReport =>
			return Err(Error::unsupported(
				"velocity_stage_times_report is computed by the velocity report only.",
			)),
		Calculation::SprintMapping => {
			plan.joins.sprint_mappings = true;
			plan.select.push(
				"jsonb_agg(jsonb_build_object('issue_key', key, 'issue_type', issue_type, \
				 'story_points', story_points, 'sprint_mapping', sprint_mapping_json)) AS \
				 sprint_mappings"
					.to_string(),
			);
			plan.select.push(COUNT.to_string());
		},
		Calculation::SprintMappingCount => {
			plan.joins.sprint_mappings = true;
			plan.select.push(
				"COUNT(DISTINCT (sprint_mapping_integration_id, sprint_mapping_sprint_id))::bigint \
				 AS ct"
					.to_string(),
			);
			plan.default_order.push("ct DESC NULLS LAST".to_string());
			plan.own_output = Some("ct");
		},
	}

	Ok(plan)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn resolved(calculation: Calculation) -> CalculationPlan {
		resolve(calculation, Across::Assignee, &IssueFilter::default(), ":now")
			.expect("Calculation must resolve.")
	}

	#[test]
	fn resolution_time_reports_spread_and_sorts_on_max() {
		let plan = resolved(Calculation::ResolutionTime);

		assert_eq!(
			plan.select[0],
			"MIN(GREATEST(COALESCE(issue_resolved_at, :now) - issue_created_at, 0))::bigint AS mn"
		);
		assert!(plan.select.iter().any(|column| column.ends_with(" AS p90")));
		assert!(plan.select.iter().any(|column| column.ends_with(" AS mean")));
		assert_eq!(plan.default_order, vec!["mx DESC NULLS LAST"]);
	}

	#[test]
	fn assign_to_resolve_skips_unassigned_issues() {
		let plan = resolved(Calculation::AssignToResolve);

		assert_eq!(plan.issue_conditions, vec!["first_assigned_at IS NOT NULL"]);
		assert!(resolved(Calculation::ResolutionTime).issue_conditions.is_empty());
	}

	#[test]
	fn response_time_omits_percentiles() {
		let plan = resolved(Calculation::ResponseTime);

		assert_eq!(plan.select.len(), 4);
		assert!(!plan.select.iter().any(|column| column.ends_with(" AS p90")));
	}

	#[test]
	fn assignees_read_history_when_windowed() {
		let filter = IssueFilter {
			assignees_date_range: Some(jagg_domain::Range::new(Some(1), None)),
			..Default::default()
		};
		let plan = resolve(Calculation::Assignees, Across::Project, &filter, ":now")
			.expect("Calculation must resolve.");

		assert_eq!(plan.select[0], "array_remove(array_agg(DISTINCT assignee_item), NULL) AS assignees");
	}

	#[test]
	fn stage_bounce_groups_by_stage_unless_already_grouped() {
		let plan = resolved(Calculation::StageBounceReport);

		assert_eq!(plan.group_by, vec!["bounce_stage"]);
		assert!(plan.joins.stage_bounces && !plan.joins.statuses);

		let plan = resolve(Calculation::StageBounceReport, Across::Stage, &IssueFilter::default(), ":now")
			.expect("Calculation must resolve.");

		assert!(plan.group_by.is_empty());
	}

	#[test]
	fn unestimated_tickets_weigh_into_mean_story_points() {
		let plan = resolved(Calculation::TicketCount);

		assert_eq!(plan.select[2], "AVG(COALESCE(story_points, 0))::float8 AS mean_story_points");
	}

	#[test]
	fn stage_bounces_sort_on_ticket_count() {
		let plan = resolved(Calculation::StageBounceReport);

		assert_eq!(plan.default_order, vec!["ct DESC NULLS LAST"]);
		assert_eq!(plan.own_output, Some("mean"));
	}

	#[test]
	fn velocity_report_is_not_a_plain_calculation() {
		let err = resolve(
			Calculation::VelocityStageTimesReport,
			Across::VelocityStage,
			&IssueFilter::default(),
			":now",
		)
		.expect_err("Expected an unsupported error.");

		assert!(matches!(err, Error::Unsupported { .. }));
	}
}
