//! Join subqueries attached to the per-row layer of an aggregation.
//!
//! Each join subquery renames its columns so a `SELECT *` over the joined rows stays
//! unambiguous.

use jagg_domain::{Hygiene, IssueFilter, ReleasePreference, SprintMappingFilter};
use jagg_storage::{
	params::Params,
	sql::{Join, Select, Source},
};

use crate::{
	categorize::RELEASE_STATE,
	conditions::{ALL_STAGES, Conditions, Partition},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VersionField {
	Version,
	FixVersion,
}
impl VersionField {
	pub(crate) fn alias(self) -> &'static str {
		match self {
			Self::Version => "version",
			Self::FixVersion => "fix_version",
		}
	}

	fn column(self) -> &'static str {
		match self {
			Self::Version => "versions",
			Self::FixVersion => "fix_versions",
		}
	}
}

/// Joins and derived columns a query needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct JoinNeeds {
	pub(crate) users: bool,
	pub(crate) statuses: bool,
	pub(crate) sprints: bool,
	pub(crate) version: Option<VersionField>,
	pub(crate) assignees: bool,
	pub(crate) priority_order: bool,
	pub(crate) sprint_mappings: bool,
	pub(crate) sla: bool,
	pub(crate) parent_story_points: bool,
	pub(crate) transitions: bool,
	pub(crate) stage_bounces: bool,
	pub(crate) velocity_stage: bool,
	pub(crate) ticket_category: bool,
}
impl JoinNeeds {
	/// Joins the filter's own predicates depend on.
	pub(crate) fn from_filter(filter: &IssueFilter) -> Self {
		let mut needs = Self::default();

		for f in std::iter::once(filter).chain(filter.or_filter.as_deref()) {
			let x = &f.exclude;

			needs.users |= f.extra_criteria.contains(&Hygiene::InactiveAssignees);
			needs.sla |= f.extra_criteria.contains(&Hygiene::MissedResponseTime)
				|| f.extra_criteria.contains(&Hygiene::MissedResolutionTime);
			needs.statuses |= !f.stages.is_empty() || !x.stages.is_empty();
			needs.sprints |= !f.sprint_names.is_empty()
				|| !f.sprint_full_names.is_empty()
				|| !f.sprint_states.is_empty()
				|| !x.sprint_names.is_empty()
				|| !x.sprint_full_names.is_empty()
				|| !x.sprint_states.is_empty()
				|| f.sprint_count.is_some_and(|count| count > 0);
			needs.assignees |= f.assignees_date_range.is_some();
			needs.parent_story_points |= f.parent_story_points.is_some();
		}

		let velocity = (!filter.velocity_stages.is_empty()
			&& !filter.velocity_stages.iter().any(|stage| stage == ALL_STAGES))
			|| !filter.exclude.velocity_stages.is_empty();

		needs.velocity_stage |= velocity;
		needs.statuses |= velocity;
		needs.ticket_category |=
			!filter.ticket_categories.is_empty() || !filter.exclude.ticket_categories.is_empty();

		needs
	}

	pub(crate) fn union(self, other: Self) -> Self {
		Self {
			users: self.users || other.users,
			statuses: self.statuses || other.statuses,
			sprints: self.sprints || other.sprints,
			version: self.version.or(other.version),
			assignees: self.assignees || other.assignees,
			priority_order: self.priority_order || other.priority_order,
			sprint_mappings: self.sprint_mappings || other.sprint_mappings,
			sla: self.sla || other.sla,
			parent_story_points: self.parent_story_points || other.parent_story_points,
			transitions: self.transitions || other.transitions,
			stage_bounces: self.stage_bounces || other.stage_bounces,
			velocity_stage: self.velocity_stage || other.velocity_stage,
			ticket_category: self.ticket_category || other.ticket_category,
		}
	}

	pub(crate) fn is_empty(&self) -> bool {
		*self == Self::default()
	}
}

/// Collaborator-supplied expressions for derived columns.
#[derive(Clone, Debug, Default)]
pub(crate) struct Derived {
	pub(crate) custom_field_type: Option<String>,
	pub(crate) ticket_category: Option<String>,
	pub(crate) velocity_stage: Option<String>,
	pub(crate) release: Option<Release>,
	/// Values bound by the collaborators while rendering their expressions.
	pub(crate) params: Params,
}

/// Extra status rows measuring the time from the stage before release to the fix version date.
#[derive(Clone, Debug)]
pub(crate) struct Release {
	pub(crate) from_statuses: Vec<String>,
	pub(crate) preference: ReleasePreference,
}

pub(crate) struct JoinContext<'a> {
	pub(crate) schema: &'a str,
	/// Relation name of the issue rows the joins attach to.
	pub(crate) alias: &'a str,
	pub(crate) conditions: &'a Conditions,
	pub(crate) filter: &'a IssueFilter,
	pub(crate) derived: &'a Derived,
}

pub(crate) fn build(needs: &JoinNeeds, ctx: &JoinContext<'_>, params: &mut Params) -> Vec<Join> {
	let JoinContext { schema, alias, conditions, .. } = *ctx;
	let on = |left: &str, right: &str| format!("{left} = {alias}.{right}");
	let mut joins = Vec::new();

	if needs.users {
		let users = Select::from(Source::table(format!("{schema}.jira_users")))
			.columns(["display_name", "active", "integ_id"])
			.filters(conditions.get(Partition::Users).iter().cloned());

		joins.push(Join::inner(
			Source::subquery(users, "u"),
			vec![on("u.display_name", "assignee"), on("u.integ_id", "integration_id")],
		));
	}
	if needs.statuses {
		joins.push(Join::inner(
			Source::subquery(status_rows(needs, ctx, params), "statuses"),
			vec![
				on("statuses.status_issue_key", "key"),
				on("statuses.status_integration_id", "integration_id"),
			],
		));
	}
	if needs.sprints {
		let sprints = Select::from(Source::table(format!("{schema}.jira_issue_sprints")))
			.columns([
				"sprint_id",
				"integration_id AS sprint_integration_id",
				"name AS sprint",
				"start_date AS sprint_creation_date",
			])
			.filters(conditions.get(Partition::Sprints).iter().cloned());

		joins.push(Join::inner(
			Source::subquery(sprints, "sprints"),
			vec![
				format!("sprints.sprint_id = ANY({alias}.sprint_ids)"),
				on("sprints.sprint_integration_id", "integration_id"),
			],
		));
	}
	if let Some(field) = needs.version {
		let name = field.alias();
		let relation = format!("{name}_join");
		let versions = Select::from(Source::table(format!("{schema}.jira_issue_versions")))
			.columns([
				format!("name AS {name}"),
				format!("integration_id AS {name}_integration_id"),
				format!("EXTRACT(EPOCH FROM end_date)::bigint AS {name}_end_date"),
			])
			.filters(conditions.get(Partition::Versions).iter().cloned());

		joins.push(Join::inner(
			Source::subquery(versions, relation.clone()),
			vec![
				format!("{relation}.{name} = ANY({alias}.{})", field.column()),
				on(&format!("{relation}.{name}_integration_id"), "integration_id"),
			],
		));
	}
	if needs.assignees {
		let assignees = Select::from(Source::table(format!("{schema}.jira_issue_assignees")))
			.columns([
				"issue_key AS iaj_issue_key",
				"integration_id AS iaj_integration_id",
				"assignee AS assignee_item",
			])
			.filters(conditions.get(Partition::Assignees).iter().cloned());

		joins.push(Join::inner(
			Source::subquery(assignees, "iaj"),
			vec![on("iaj.iaj_issue_key", "key"), on("iaj.iaj_integration_id", "integration_id")],
		));
	}
	if needs.priority_order {
		let mut priorities = Select::from(Source::table(format!("{schema}.jira_issue_priorities")))
			.columns([
				"priority AS priority_name",
				"priority_order",
				"integration_id AS priority_integration_id",
			])
			.filters(["scheme = 'default'", "project = '_levelops_default_'"]);

		priorities.distinct = jagg_storage::sql::Distinct::Rows;

		joins.push(Join::left(
			Source::subquery(priorities, "prio_order"),
			vec![
				format!("UPPER(prio_order.priority_name) = UPPER({alias}.priority)"),
				on("prio_order.priority_integration_id", "integration_id"),
			],
		));
	}
	if needs.sprint_mappings {
		joins.push(Join::inner(
			Source::subquery(sprint_mapping_rows(ctx, params), "sm"),
			vec![
				on("sm.sprint_mapping_issue_key", "key"),
				on("sm.sprint_mapping_integration_id", "integration_id"),
			],
		));
	}
	if needs.sla {
		let sla = Select::from(Source::table(format!("{schema}.jira_issue_priorities_sla")))
			.columns([
				"solve_sla",
				"resp_sla",
				"project AS proj",
				"task_type AS ttype",
				"priority AS prio",
				"integration_id AS integid",
			]);

		joins.push(Join::left(
			Source::subquery(sla, "p"),
			vec![
				on("p.proj", "project"),
				on("p.prio", "priority"),
				on("p.integid", "integration_id"),
				on("p.ttype", "issue_type"),
			],
		));
	}
	if needs.parent_story_points {
		let parents = Select::from(Source::table(format!("{schema}.jira_issues"))).columns([
			"key AS parent_sp_key",
			"integration_id AS parent_sp_integration_id",
			"ingested_at AS parent_sp_ingested_at",
			"story_points AS parent_story_points",
		]);

		joins.push(Join::left(
			Source::subquery(parents, "parent_sp"),
			vec![
				on("parent_sp.parent_sp_key", "epic"),
				on("parent_sp.parent_sp_integration_id", "integration_id"),
				on("parent_sp.parent_sp_ingested_at", "ingested_at"),
			],
		));
	}
	if needs.transitions {
		let from = params.bind(
			"transition_from",
			ctx.filter.from_state.as_deref().unwrap_or_default().to_uppercase(),
		);
		let to = params
			.bind("transition_to", ctx.filter.to_state.as_deref().unwrap_or_default().to_uppercase());
		let mut transitions = Select::from(Source::table(format!("{schema}.jira_issue_statuses")))
			.columns([
				"issue_key AS transition_issue_key".to_string(),
				"integration_id AS transition_integration_id".to_string(),
				format!(
					"(MIN(start_time) FILTER (WHERE UPPER(status) = {to}) - MIN(start_time) FILTER \
					 (WHERE UPPER(status) = {from}))::bigint AS state_transition_time"
				),
			]);

		transitions.group_by = vec!["issue_key".to_string(), "integration_id".to_string()];

		joins.push(Join::inner(
			Source::subquery(transitions, "transitions"),
			vec![
				on("transitions.transition_issue_key", "key"),
				on("transitions.transition_integration_id", "integration_id"),
				"transitions.state_transition_time >= 0".to_string(),
			],
		));
	}
	if needs.stage_bounces {
		let mut bounces = Select::from(Source::table(format!("{schema}.jira_issue_statuses")))
			.columns([
				"issue_key AS bounce_issue_key",
				"integration_id AS bounce_integration_id",
				"status AS bounce_stage",
				"COUNT(*)::bigint AS stage_bounces",
			])
			.filters(conditions.get(Partition::Statuses).iter().cloned());

		bounces.group_by =
			vec!["issue_key".to_string(), "integration_id".to_string(), "status".to_string()];

		joins.push(Join::inner(
			Source::subquery(bounces, "bounce_rows"),
			vec![
				on("bounce_rows.bounce_issue_key", "key"),
				on("bounce_rows.bounce_integration_id", "integration_id"),
			],
		));
	}

	joins
}

/// Per-row derived columns computed over the joined rows.
pub(crate) fn aux_columns(needs: &JoinNeeds, derived: &Derived, now: &str) -> Vec<String> {
	let mut columns = Vec::new();

	if needs.sla {
		columns.push(format!("(COALESCE(first_comment_at, {now}) - issue_created_at) AS resp_time"));
		columns.push(format!(
			"GREATEST(COALESCE(issue_resolved_at, {now}) - issue_created_at, 0) AS solve_time"
		));
	}
	if needs.velocity_stage
		&& let Some(expression) = &derived.velocity_stage
	{
		columns.push(format!("({expression}) AS velocity_stage"));
	}
	if needs.ticket_category
		&& let Some(expression) = &derived.ticket_category
	{
		columns.push(format!("({expression}) AS ticket_category"));
	}

	columns
}

/// Time spent per issue and status, plus the release rows when a release stage is configured.
fn status_rows(needs: &JoinNeeds, ctx: &JoinContext<'_>, params: &mut Params) -> Select {
	let schema = ctx.schema;
	let mut statuses = Select::from(Source::table(format!("{schema}.jira_issue_statuses")))
		.columns([
			"integration_id AS status_integration_id",
			"issue_key AS status_issue_key",
			"status AS state",
			"SUM(GREATEST(end_time - start_time, 0))::bigint AS time_spent",
		])
		.filters(ctx.conditions.get(Partition::Statuses).iter().cloned());

	statuses.group_by =
		vec!["integration_id".to_string(), "issue_key".to_string(), "status".to_string()];

	if needs.velocity_stage
		&& let Some(release) = &ctx.derived.release
		&& !release.from_statuses.is_empty()
	{
		let from = params.bind("release_from_statuses", release.from_statuses.clone());
		let preference = release.preference.as_sql();
		let mut rows = Select::from(Source::aliased(format!("{schema}.jira_issue_statuses"), "st"))
			.columns([
				"st.integration_id AS status_integration_id".to_string(),
				"st.issue_key AS status_issue_key".to_string(),
				format!("'{RELEASE_STATE}' AS state"),
				format!(
					"GREATEST(EXTRACT(EPOCH FROM {preference}(rv.end_date)) - MAX(st.start_time), \
					 0)::bigint AS time_spent"
				),
			])
			.join(Join::inner(
				Source::aliased(format!("{schema}.jira_issues"), "ri"),
				vec![
					"ri.key = st.issue_key".to_string(),
					"ri.integration_id = st.integration_id".to_string(),
				],
			))
			.join(Join::inner(
				Source::aliased(format!("{schema}.jira_issue_versions"), "rv"),
				vec![
					"rv.name = ANY(ri.fix_versions)".to_string(),
					"rv.integration_id = ri.integration_id".to_string(),
				],
			))
			.filters([format!("UPPER(st.status) = ANY({from})"), "rv.end_date IS NOT NULL".to_string()]);

		rows.group_by = vec!["st.integration_id".to_string(), "st.issue_key".to_string()];

		statuses.unions.push(rows);
	}

	statuses
}

fn sprint_mapping_rows(ctx: &JoinContext<'_>, params: &mut Params) -> Select {
	let schema = ctx.schema;
	let mut rows = Select::from(Source::aliased(format!("{schema}.jira_issue_sprint_mappings"), "m"))
		.columns([
			"m.integration_id AS sprint_mapping_integration_id",
			"m.sprint_id AS sprint_mapping_sprint_id",
			"m.issue_key AS sprint_mapping_issue_key",
			"spr.name AS sprint_mapping_name",
			"spr.start_date AS sprint_mapping_start_date",
			"spr.completed_at AS sprint_mapping_completed_at",
			"row_to_json(m)::jsonb AS sprint_mapping_json",
		])
		.join(Join::inner(
			Source::aliased(format!("{schema}.jira_issue_sprints"), "spr"),
			vec![
				"spr.sprint_id = m.sprint_id".to_string(),
				"spr.integration_id = m.integration_id".to_string(),
			],
		));

	if !ctx.filter.integration_ids.is_empty() {
		let ids = params.bind("sm_integration_ids", ctx.filter.integration_ids.clone());

		rows.filters.push(format!("m.integration_id = ANY({ids})"));
	}
	if let Some(filter) = &ctx.filter.sprint_mapping {
		rows.filters.extend(sprint_mapping_conditions(schema, filter, params));
	}

	rows
}

fn sprint_mapping_conditions(
	schema: &str,
	filter: &SprintMappingFilter,
	params: &mut Params,
) -> Vec<String> {
	let mut out = Vec::new();

	if let Some(ignorable) = filter.ignorable_issue_type {
		let value = params.bind("sm_ignorable_issue_type", ignorable);

		out.push(format!("m.ignorable_issue_type = {value}"));
	}
	if !filter.sprint_ids.is_empty() {
		let ids = params.bind("sm_sprint_ids", filter.sprint_ids.clone());

		out.push(format!("m.sprint_id = ANY({ids})"));
	}
	if !filter.sprint_names.is_empty() {
		let names = params.bind("sm_sprint_names", filter.sprint_names.clone());

		out.push(format!("spr.name = ANY({names})"));
	}
	if !filter.exclude_sprint_names.is_empty() {
		let names = params.bind("sm_not_sprint_names", filter.exclude_sprint_names.clone());

		out.push(format!("spr.name <> ALL({names})"));
	}

	for (name, pattern) in [
		("sm_name_starts", filter.name_starts_with.as_ref().map(|value| format!("{value}%"))),
		("sm_name_ends", filter.name_ends_with.as_ref().map(|value| format!("%{value}"))),
		("sm_name_contains", filter.name_contains.as_ref().map(|value| format!("%{value}%"))),
	] {
		if let Some(pattern) = pattern {
			let pattern = params.bind(name, pattern);

			out.push(format!("spr.name LIKE {pattern}"));
		}
	}

	if let Some(state) = &filter.state {
		let state = params.bind("sm_state", state.to_uppercase());

		out.push(format!("UPPER(spr.state) = {state}"));
	}

	for (name, column, range) in [
		("sm_completed", "spr.completed_at", filter.completed_at),
		("sm_started", "spr.start_date", filter.started_at),
	] {
		let Some(range) = range else {
			continue;
		};

		if let Some(gt) = range.gt {
			let gt = params.bind(format!("{name}_gt"), gt);

			out.push(format!("{column} > {gt}"));
		}
		if let Some(lt) = range.lt {
			let lt = params.bind(format!("{name}_lt"), lt);

			out.push(format!("{column} < {lt}"));
		}
	}

	if let Some(count) = filter.sprint_count.filter(|count| *count > 0) {
		let count = params.bind("sm_sprint_count", i64::from(count));

		out.push(format!(
			"(spr.integration_id, spr.sprint_id) IN (SELECT recent.integration_id, recent.sprint_id \
			 FROM {schema}.jira_issue_sprints AS recent WHERE recent.completed_at IS NOT NULL ORDER \
			 BY recent.completed_at DESC LIMIT {count})"
		));
	}

	out
}
