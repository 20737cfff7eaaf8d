//! Filter-to-predicate compilation.
//!
//! Every predicate lands in the [`Partition`] of the join scope it is evaluated in. Issue-table
//! predicates may carry a qualifier (`I.` on the link bypass path); predicates for joined
//! tables are written against the unqualified columns of their join subquery.

mod custom;

use jagg_config::Aggregation;
use jagg_domain::{Across, Hygiene, IssueFilter, Range, UNASSIGNED};
use jagg_storage::params::{ParamValue, Params};

use crate::{OrgUnitField, OrgUnitResolver, Result};

/// Velocity-stage value that disables the stage narrowing.
pub(crate) const ALL_STAGES: &str = "$$ALL_STAGES$$";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Partition {
	Issues,
	Users,
	Final,
	Statuses,
	Sprints,
	Assignees,
	Versions,
	Links,
}
impl Partition {
	pub(crate) const ALL: [Self; 8] = [
		Self::Issues,
		Self::Users,
		Self::Final,
		Self::Statuses,
		Self::Sprints,
		Self::Assignees,
		Self::Versions,
		Self::Links,
	];
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Conditions {
	parts: [Vec<String>; 8],
}
impl Conditions {
	pub(crate) fn get(&self, partition: Partition) -> &[String] {
		&self.parts[partition as usize]
	}

	pub(crate) fn push(&mut self, partition: Partition, predicate: impl Into<String>) {
		self.parts[partition as usize].push(predicate.into());
	}

	pub(crate) fn is_empty(&self, partition: Partition) -> bool {
		self.parts[partition as usize].is_empty()
	}

	/// Appends each non-empty partition of `alternatives` as one OR-joined fragment.
	fn merge_or(&mut self, alternatives: Conditions) {
		for partition in Partition::ALL {
			let fragments = alternatives.get(partition);

			if !fragments.is_empty() {
				self.push(partition, format!("({})", fragments.join(" OR ")));
			}
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
	Main,
	Or,
}

#[derive(Clone)]
pub(crate) struct ConditionBuilder<'a> {
	pub(crate) settings: &'a Aggregation,
	pub(crate) schema: &'a str,
	pub(crate) now: i64,
	pub(crate) prefix: String,
	pub(crate) issue_qualifier: &'a str,
	pub(crate) link_qualifier: &'a str,
	pub(crate) org_unit: Option<&'a dyn OrgUnitResolver>,
}
impl<'a> ConditionBuilder<'a> {
	pub(crate) fn new(settings: &'a Aggregation, schema: &'a str, now: i64) -> Self {
		Self {
			settings,
			schema,
			now,
			prefix: String::new(),
			issue_qualifier: "",
			link_qualifier: "",
			org_unit: None,
		}
	}

	pub(crate) fn prefixed(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = prefix.into();

		self
	}

	pub(crate) fn qualified(mut self, issue_qualifier: &'a str, link_qualifier: &'a str) -> Self {
		self.issue_qualifier = issue_qualifier;
		self.link_qualifier = link_qualifier;

		self
	}

	pub(crate) fn scoped_to(mut self, org_unit: Option<&'a dyn OrgUnitResolver>) -> Self {
		self.org_unit = org_unit;

		self
	}

	pub(crate) fn build(&self, filter: &IssueFilter, params: &mut Params) -> Result<Conditions> {
		let mut out = Conditions::default();

		self.snapshot(filter, params, &mut out);

		let mut emit =
			Emit { params: &mut *params, prefix: &self.prefix, q: self.issue_qualifier, out: &mut out };

		self.fields(filter, Scope::Main, &mut emit)?;

		if let Some(or_filter) = &filter.or_filter {
			let mut alternatives = Conditions::default();
			let prefix = format!("or_{}", self.prefix);
			let mut emit = Emit {
				params: &mut *params,
				prefix: &prefix,
				q: self.issue_qualifier,
				out: &mut alternatives,
			};

			self.fields(or_filter, Scope::Or, &mut emit)?;

			out.merge_or(alternatives);
		}

		Ok(out)
	}

	/// Snapshot pin only; used for the linked side of a correlation.
	pub(crate) fn snapshot_only(&self, filter: &IssueFilter, params: &mut Params) -> Vec<String> {
		let mut out = Conditions::default();

		self.snapshot(filter, params, &mut out);

		std::mem::take(&mut out.parts[Partition::Issues as usize])
	}

	fn snapshot(&self, filter: &IssueFilter, params: &mut Params, out: &mut Conditions) {
		if filter.snapshot_range.is_some() || filter.across == Some(Across::Trend) {
			return;
		}

		let q = self.issue_qualifier;

		if !filter.ingested_at_by_integration.is_empty() {
			let pins = filter
				.ingested_at_by_integration
				.iter()
				.enumerate()
				.map(|(idx, (integration_id, ingested_at))| {
					let id = params
						.bind(format!("{}snapshot_integration_{idx}", self.prefix), *integration_id);
					let at = params.bind(format!("{}snapshot_at_{idx}", self.prefix), *ingested_at);

					format!("({q}integration_id = {id} AND {q}ingested_at = {at})")
				})
				.collect::<Vec<_>>();

			out.push(Partition::Issues, format!("({})", pins.join(" OR ")));
		} else if let Some(ingested_at) = filter.ingested_at {
			let at = params.bind(format!("{}ingested_at", self.prefix), ingested_at);

			out.push(Partition::Issues, format!("{q}ingested_at = {at}"));
		}
	}

	fn fields(&self, f: &IssueFilter, scope: Scope, e: &mut Emit<'_>) -> Result<()> {
		use Partition::*;

		let main = scope == Scope::Main;
		let q = e.q;
		let lq = self.link_qualifier;

		if main {
			if !f.integration_ids.is_empty() {
				let ids = e.param("integration_ids", f.integration_ids.clone());

				e.out.push(Issues, format!("{q}integration_id = ANY({ids})"));
				e.out.push(Sprints, format!("integration_id = ANY({ids})"));
				e.out.push(Versions, format!("integration_id = ANY({ids})"));
				e.out.push(Links, format!("{lq}integration_id = ANY({ids})"));
			}
			if !f.exclude.integration_ids.is_empty() {
				let ids = e.param("not_integration_ids", f.exclude.integration_ids.clone());

				e.out.push(Issues, format!("{q}integration_id <> ALL({ids})"));
			}

			let active = e.param("is_active", f.is_active.unwrap_or(true));

			e.out.push(Issues, format!("({q}is_active = {active} OR {q}is_active IS NULL)"));
		}

		e.any(Issues, &format!("{q}key"), "keys", &f.keys);
		e.any(Issues, &format!("{q}priority"), "priorities", &f.priorities);
		e.any(Issues, &format!("{q}status"), "statuses", &f.statuses);
		e.any(Issues, &format!("{q}issue_type"), "issue_types", &f.issue_types);
		e.any(Issues, &format!("{q}project"), "projects", &f.projects);
		e.any(Issues, &format!("{q}epic"), "epics", &f.epics);
		e.any(Issues, &format!("{q}parent_key"), "parent_keys", &f.parent_keys);
		e.any(Issues, &format!("{q}parent_issue_type"), "parent_issue_types", &f.parent_issue_types);
		e.any(Issues, &format!("{q}resolution"), "resolutions", &f.resolutions);
		e.any(Issues, &format!("{q}status_category"), "status_categories", &f.status_categories);
		e.any(Issues, &format!("{q}assignee"), "assignee_display_names", &f.assignee_display_names);

		self.users(f, main, e);

		e.any(Links, &format!("{lq}relation"), "links", &f.links);

		if !f.stages.is_empty() {
			let stages = f.stages.iter().map(|stage| stage.to_uppercase()).collect::<Vec<_>>();
			let stages = e.param("stages", stages);

			e.out.push(Statuses, format!("UPPER(status) = ANY({stages})"));
		}

		e.overlap(Issues, &format!("{q}labels"), "labels", &f.labels);
		e.overlap(Issues, &format!("{q}components"), "components", &f.components);

		if !f.versions.is_empty() {
			e.overlap(Issues, &format!("{q}versions"), "versions", &f.versions);
			e.any(Versions, "name", "version_names", &f.versions);
		}
		if !f.fix_versions.is_empty() {
			e.overlap(Issues, &format!("{q}fix_versions"), "fix_versions", &f.fix_versions);
			e.any(Versions, "name", "fix_version_names", &f.fix_versions);
		}
		if !f.sprint_ids.is_empty() {
			let ids = e.param("sprint_ids", f.sprint_ids.clone());

			e.out.push(Issues, format!("{q}sprint_ids && {ids}::int[]"));
			e.out.push(Sprints, format!("sprint_id = ANY({ids})"));
		}

		e.any(Sprints, "name", "sprint_names", &f.sprint_names);
		e.any(Sprints, "name", "sprint_full_names", &f.sprint_full_names);

		if !f.sprint_states.is_empty() {
			let states = f.sprint_states.iter().map(|state| state.to_uppercase()).collect::<Vec<_>>();

			e.any(Sprints, "UPPER(state)", "sprint_states", &states);
		}
		if f.sprint_count.is_some_and(|count| count > 0) {
			e.out.push(Sprints, "end_date IS NOT NULL");
		}
		if f.filter_by_last_sprint {
			self.last_sprint(f, e);
		}

		e.range(Issues, &format!("{q}issue_created_at"), "issue_created", f.issue_created_range);
		e.range(Issues, &format!("{q}issue_updated_at"), "issue_updated", f.issue_updated_range);
		e.range(Issues, &format!("{q}issue_due_at"), "issue_due", f.issue_due_range);
		e.range(Issues, &format!("{q}issue_resolved_at"), "issue_resolved", f.issue_resolution_range);
		e.range(
			Issues,
			&format!("({q}ingested_at - {q}issue_created_at) / 86400"),
			"age",
			f.age,
		);
		e.range(Issues, &format!("{q}story_points"), "story_points", f.story_points);
		e.range(Final, "parent_story_points", "parent_story_points", f.parent_story_points);

		if let Some(range) = f.issue_released_range {
			if let Some(gt) = range.gt {
				let gt = e.param("released_gt", gt);

				e.out.push(Versions, format!("end_date >= to_timestamp({gt})"));
			}
			if let Some(lt) = range.lt {
				let lt = e.param("released_lt", lt);

				e.out.push(Versions, format!("end_date <= to_timestamp({lt})"));
			}
		}
		if let Some(range) = f.assignees_date_range {
			if let Some(gt) = range.gt {
				let gt = e.param("assignees_start", gt);

				e.out.push(Assignees, format!("(start_time >= {gt} OR end_time > {gt})"));
			}
			if let Some(lt) = range.lt {
				let lt = e.param("assignees_end", lt);

				e.out.push(Assignees, format!("(start_time < {lt} OR end_time <= {lt})"));
			}
		}
		if let Some(summary) = f.summary.as_deref().filter(|summary| !summary.is_empty()) {
			let pattern = e.param("summary", format!("%{summary}%"));

			e.out.push(Issues, format!("{q}summary LIKE {pattern}"));
		}

		custom::partial_matches(f, e)?;
		custom::custom_fields(&f.custom_fields, "custom_fields", false, e);
		custom::missing_fields(f, e)?;

		self.hygiene(f, e);

		if main {
			self.main_only(f, e);
		}

		Ok(())
	}

	/// Fields the OR-filter never carries: exclusions and post-aggregate narrowing.
	fn main_only(&self, f: &IssueFilter, e: &mut Emit<'_>) {
		use Partition::*;

		let q = e.q;
		let lq = self.link_qualifier;
		let x = &f.exclude;

		if let Some(range) = f.snapshot_range {
			e.range(Issues, &format!("{q}ingested_at"), "snapshot", Some(range));
		}

		if !f.velocity_stages.iter().any(|stage| stage == ALL_STAGES) {
			e.any(Final, "velocity_stage", "velocity_stages", &f.velocity_stages);
		}

		e.any(Final, "ticket_category", "ticket_categories", &f.ticket_categories);
		e.any(Issues, &format!("{q}first_assignee_id::text"), "first_assignees", &f.first_assignees);
		e.overlap(Issues, &format!("{q}parent_labels"), "parent_labels", &f.parent_labels);

		e.none_of(Issues, &format!("{q}key"), "not_keys", &x.keys);
		e.none_of(Issues, &format!("{q}priority"), "not_priorities", &x.priorities);
		e.none_of(Issues, &format!("{q}status"), "not_statuses", &x.statuses);
		e.none_of(Issues, &format!("{q}assignee_id::text"), "not_assignees", &x.assignees);
		e.none_of(Issues, &format!("{q}reporter_id::text"), "not_reporters", &x.reporters);
		e.none_of(Issues, &format!("{q}issue_type"), "not_issue_types", &x.issue_types);
		e.none_of(Issues, &format!("{q}project"), "not_projects", &x.projects);
		e.none_of(Issues, &format!("{q}epic"), "not_epics", &x.epics);
		e.none_of(Issues, &format!("{q}parent_key"), "not_parent_keys", &x.parent_keys);
		e.none_of(
			Issues,
			&format!("{q}parent_issue_type"),
			"not_parent_issue_types",
			&x.parent_issue_types,
		);
		e.none_of(Issues, &format!("{q}resolution"), "not_resolutions", &x.resolutions);
		e.none_of(
			Issues,
			&format!("{q}status_category"),
			"not_status_categories",
			&x.status_categories,
		);
		e.none_of(
			Issues,
			&format!("{q}first_assignee_id::text"),
			"not_first_assignees",
			&x.first_assignees,
		);
		e.none_of(Links, &format!("{lq}relation"), "not_links", &x.links);

		if !x.stages.is_empty() {
			let stages = x.stages.iter().map(|stage| stage.to_uppercase()).collect::<Vec<_>>();

			e.none_of(Statuses, "UPPER(status)", "not_stages", &stages);
		}

		e.none_of(Final, "velocity_stage", "not_velocity_stages", &x.velocity_stages);
		e.none_of(Final, "ticket_category", "not_ticket_categories", &x.ticket_categories);
		e.disjoint(Issues, &format!("{q}labels"), "not_labels", &x.labels);

		if !f.extra_criteria.contains(&Hygiene::NoComponents) {
			e.disjoint(Issues, &format!("{q}components"), "not_components", &x.components);
		}
		if !x.versions.is_empty() {
			e.disjoint(Issues, &format!("{q}versions"), "not_versions", &x.versions);
			e.none_of(Versions, "name", "not_version_names", &x.versions);
		}
		if !x.fix_versions.is_empty() {
			e.disjoint(Issues, &format!("{q}fix_versions"), "not_fix_versions", &x.fix_versions);
			e.none_of(Versions, "name", "not_fix_version_names", &x.fix_versions);
		}

		e.disjoint(Issues, &format!("{q}parent_labels"), "not_parent_labels", &x.parent_labels);

		if !x.sprint_ids.is_empty() {
			let ids = e.param("not_sprint_ids", x.sprint_ids.clone());

			e.out.push(Issues, format!("NOT {q}sprint_ids && {ids}::int[]"));
			e.out.push(Sprints, format!("sprint_id <> ALL({ids})"));
		}

		e.none_of(Sprints, "name", "not_sprint_names", &x.sprint_names);
		e.none_of(Sprints, "name", "not_sprint_full_names", &x.sprint_full_names);

		if !x.sprint_states.is_empty() {
			let states = x.sprint_states.iter().map(|state| state.to_uppercase()).collect::<Vec<_>>();

			e.none_of(Sprints, "UPPER(state)", "not_sprint_states", &states);
		}

		custom::custom_fields(&x.custom_fields, "not_custom_fields", true, e);
	}

	fn users(&self, f: &IssueFilter, main: bool, e: &mut Emit<'_>) {
		let q = e.q;
		let ou = if main && !f.ignore_ou { self.org_unit } else { None };
		let assignee_column = format!("{q}assignee_id");
		let assignee_ou =
			ou.and_then(|ou| ou.user_condition(OrgUnitField::Assignee, &assignee_column, e.params));

		match (assignee_ou, f.assignees.is_empty(), f.unassigned) {
			(Some(predicate), _, _) => e.out.push(Partition::Issues, predicate),
			(None, false, true) => {
				let ids = e.param("assignees", f.assignees.clone());

				e.out.push(
					Partition::Issues,
					format!("({q}assignee_id::text = ANY({ids}) OR {q}assignee_id IS NULL)"),
				);
			},
			(None, false, false) =>
				e.any(Partition::Issues, &format!("{q}assignee_id::text"), "assignees", &f.assignees),
			(None, true, true) => e.out.push(Partition::Issues, format!("{q}assignee_id IS NULL")),
			(None, true, false) => {},
		}

		let reporter_column = format!("{q}reporter_id");
		let reporter_ou =
			ou.and_then(|ou| ou.user_condition(OrgUnitField::Reporter, &reporter_column, e.params));

		match reporter_ou {
			Some(predicate) => e.out.push(Partition::Issues, predicate),
			None =>
				e.any(Partition::Issues, &format!("{q}reporter_id::text"), "reporters", &f.reporters),
		}
	}

	/// Keeps issues whose most recent sprint is one of the requested sprints.
	fn last_sprint(&self, f: &IssueFilter, e: &mut Emit<'_>) {
		let q = e.q;
		let latest = |column: &str| {
			format!(
				"(SELECT spr.{column} FROM {}.jira_issue_sprints AS spr WHERE spr.sprint_id = \
				 ANY({q}sprint_ids) AND spr.integration_id = {q}integration_id ORDER BY \
				 spr.start_date DESC NULLS LAST LIMIT 1)",
				self.schema
			)
		};

		if !f.sprint_ids.is_empty() {
			let ids = e.param("last_sprint_ids", f.sprint_ids.clone());

			e.out.push(Partition::Issues, format!("{} = ANY({ids})", latest("sprint_id")));
		}
		if !f.sprint_names.is_empty() {
			let names = e.param("last_sprint_names", f.sprint_names.clone());

			e.out.push(Partition::Issues, format!("{} = ANY({names})", latest("name")));
		}
	}

	fn hygiene(&self, f: &IssueFilter, e: &mut Emit<'_>) {
		let q = e.q;

		for criterion in &f.extra_criteria {
			match criterion {
				Hygiene::Idle => {
					let days =
						f.hygiene_criteria_specs.idle.unwrap_or(self.settings.default_idle_days);
					let cutoff = e.param(
						"idle_cutoff",
						self.now.saturating_sub(days.saturating_mul(86_400)),
					);

					e.out.push(Partition::Issues, format!("{q}issue_updated_at < {cutoff}"));
				},
				Hygiene::NoAssignee =>
					e.out.push(Partition::Issues, format!("{q}assignee = '{UNASSIGNED}'")),
				Hygiene::NoDueDate => e.out.push(Partition::Issues, format!("{q}issue_due_at IS NULL")),
				Hygiene::PoorDescription => {
					let size = f
						.hygiene_criteria_specs
						.poor_description
						.unwrap_or(self.settings.poor_description_size);
					let size = e.param("poor_description_size", size);

					e.out.push(Partition::Issues, format!("{q}desc_size < {size}"));
				},
				Hygiene::NoComponents => e.out.push(Partition::Issues, format!("{q}components = '{{}}'")),
				Hygiene::MissedResponseTime => e.out.push(Partition::Final, "resp_time > resp_sla"),
				Hygiene::MissedResolutionTime => e.out.push(Partition::Final, "solve_time > solve_sla"),
				Hygiene::InactiveAssignees => e.out.push(Partition::Users, "NOT active"),
			}
		}
	}
}

/// Predicate writer bound to one parameter prefix and issue qualifier.
struct Emit<'b> {
	params: &'b mut Params,
	prefix: &'b str,
	q: &'b str,
	out: &'b mut Conditions,
}
impl Emit<'_> {
	fn param(&mut self, name: &str, value: impl Into<ParamValue>) -> String {
		self.params.bind(format!("{}{name}", self.prefix), value)
	}

	fn any(&mut self, partition: Partition, column: &str, name: &str, values: &[String]) {
		if values.is_empty() {
			return;
		}

		let placeholder = self.param(name, values.to_vec());

		self.out.push(partition, format!("{column} = ANY({placeholder})"));
	}

	fn none_of(&mut self, partition: Partition, column: &str, name: &str, values: &[String]) {
		if values.is_empty() {
			return;
		}

		let placeholder = self.param(name, values.to_vec());

		self.out.push(partition, format!("{column} <> ALL({placeholder})"));
	}

	fn overlap(&mut self, partition: Partition, column: &str, name: &str, values: &[String]) {
		if values.is_empty() {
			return;
		}

		let placeholder = self.param(name, values.to_vec());

		self.out.push(partition, format!("{column} && {placeholder}::varchar[]"));
	}

	fn disjoint(&mut self, partition: Partition, column: &str, name: &str, values: &[String]) {
		if values.is_empty() {
			return;
		}

		let placeholder = self.param(name, values.to_vec());

		self.out.push(partition, format!("NOT {column} && {placeholder}::varchar[]"));
	}

	fn range(&mut self, partition: Partition, column: &str, name: &str, range: Option<Range>) {
		let Some(range) = range else {
			return;
		};

		if let Some(gt) = range.gt {
			let placeholder = self.param(&format!("{name}_gt"), gt);

			self.out.push(partition, format!("{column} > {placeholder}"));
		}
		if let Some(lt) = range.lt {
			let placeholder = self.param(&format!("{name}_lt"), lt);

			self.out.push(partition, format!("{column} < {placeholder}"));
		}
	}
}

#[cfg(test)]
mod tests {
	use jagg_domain::{Calculation, CustomFieldValue, PartialMatch};

	use super::*;

	fn settings() -> Aggregation {
		Aggregation::default()
	}

	fn filter() -> IssueFilter {
		IssueFilter {
			across: Some(Across::Status),
			calculation: Calculation::TicketCount,
			..Default::default()
		}
	}

	fn build(filter: &IssueFilter) -> (Conditions, Params) {
		let settings = settings();
		let mut params = Params::new();
		let conditions = ConditionBuilder::new(&settings, "acme", 1_700_000_000)
			.build(filter, &mut params)
			.expect("Conditions must build.");

		(conditions, params)
	}

	#[test]
	fn list_fields_become_any_predicates() {
		let mut request = filter();

		request.priorities = vec!["HIGH".to_string()];
		request.exclude.projects = vec!["OPS".to_string()];

		let (conditions, params) = build(&request);
		let issues = conditions.get(Partition::Issues);

		assert!(issues.contains(&"priority = ANY(:priorities)".to_string()));
		assert!(issues.contains(&"project <> ALL(:not_projects)".to_string()));
		assert!(issues.contains(&"(is_active = :is_active OR is_active IS NULL)".to_string()));
		assert_eq!(params.get("is_active"), Some(&ParamValue::Bool(true)));
	}

	#[test]
	fn integration_ids_scope_every_joined_table() {
		let mut request = filter();

		request.integration_ids = vec![1, 2];

		let (conditions, _) = build(&request);

		for partition in [Partition::Issues, Partition::Sprints, Partition::Versions, Partition::Links]
		{
			assert!(
				conditions.get(partition).iter().any(|p| p.contains("integration_id = ANY(:integration_ids)")),
				"Missing integration scope in {partition:?}."
			);
		}
	}

	#[test]
	fn per_integration_snapshot_pins_are_or_joined() {
		let mut request = filter();

		request.ingested_at = Some(10);
		request.ingested_at_by_integration.insert(1, 100);
		request.ingested_at_by_integration.insert(2, 200);

		let (conditions, params) = build(&request);

		assert_eq!(
			conditions.get(Partition::Issues)[0],
			"((integration_id = :snapshot_integration_0 AND ingested_at = :snapshot_at_0) OR \
			 (integration_id = :snapshot_integration_1 AND ingested_at = :snapshot_at_1))"
		);
		assert_eq!(params.get("snapshot_at_1"), Some(&ParamValue::Int(200)));
		assert!(!params.contains("ingested_at"));
	}

	#[test]
	fn trend_across_drops_the_snapshot_pin() {
		let mut request = filter();

		request.across = Some(Across::Trend);
		request.ingested_at = Some(10);

		let (conditions, _) = build(&request);

		assert!(!conditions.get(Partition::Issues).iter().any(|p| p.starts_with("ingested_at =")));
	}

	#[test]
	fn or_filter_is_joined_per_partition() {
		let mut request = filter();

		request.or_filter = Some(Box::new(IssueFilter {
			priorities: vec!["HIGH".to_string()],
			labels: vec!["infra".to_string()],
			sprint_names: vec!["S1".to_string()],
			..Default::default()
		}));

		let (conditions, params) = build(&request);

		assert!(conditions.get(Partition::Issues).contains(
			&"(priority = ANY(:or_priorities) OR labels && :or_labels::varchar[])".to_string()
		));
		assert_eq!(conditions.get(Partition::Sprints), ["(name = ANY(:or_sprint_names))"]);
		assert!(params.contains("or_labels"));
	}

	#[test]
	fn stages_and_post_aggregate_fields_land_in_their_partitions() {
		let mut request = filter();

		request.stages = vec!["In Review".to_string()];
		request.exclude.stages = vec!["Done".to_string()];
		request.velocity_stages = vec!["Dev".to_string()];
		request.ticket_categories = vec!["Bugs".to_string()];
		request.parent_story_points = Some(Range::new(Some(3), None));

		let (conditions, params) = build(&request);

		assert_eq!(
			conditions.get(Partition::Statuses),
			["UPPER(status) = ANY(:stages)", "UPPER(status) <> ALL(:not_stages)"]
		);
		assert_eq!(
			conditions.get(Partition::Final),
			[
				"parent_story_points > :parent_story_points_gt",
				"velocity_stage = ANY(:velocity_stages)",
				"ticket_category = ANY(:ticket_categories)",
			]
		);
		assert_eq!(params.get("stages"), Some(&ParamValue::TextList(vec!["IN REVIEW".to_string()])));
	}

	#[test]
	fn all_stages_marker_skips_velocity_narrowing() {
		let mut request = filter();

		request.velocity_stages = vec![ALL_STAGES.to_string()];

		let (conditions, _) = build(&request);

		assert!(conditions.is_empty(Partition::Final));
	}

	#[test]
	fn hygiene_uses_reference_time_and_defaults() {
		let mut request = filter();

		request.extra_criteria =
			vec![Hygiene::Idle, Hygiene::PoorDescription, Hygiene::InactiveAssignees];

		let (conditions, params) = build(&request);

		assert_eq!(params.get("idle_cutoff"), Some(&ParamValue::Int(1_700_000_000 - 30 * 86_400)));
		assert_eq!(params.get("poor_description_size"), Some(&ParamValue::Int(10)));
		assert_eq!(conditions.get(Partition::Users), ["NOT active"]);
	}

	#[test]
	fn huge_idle_windows_clamp_the_cutoff() {
		let mut request = filter();

		request.extra_criteria = vec![Hygiene::Idle];
		request.hygiene_criteria_specs.idle = Some(i64::MAX);

		let (_, params) = build(&request);

		assert_eq!(params.get("idle_cutoff"), Some(&ParamValue::Int(1_700_000_000 - i64::MAX)));
	}

	#[test]
	fn qualifiers_apply_to_issue_and_link_predicates() {
		let settings = settings();
		let mut request = filter();
		let mut params = Params::new();

		request.projects = vec!["LEV".to_string()];
		request.links = vec!["blocks".to_string()];

		let conditions = ConditionBuilder::new(&settings, "acme", 0)
			.qualified("I.", "L.")
			.build(&request, &mut params)
			.expect("Conditions must build.");

		assert!(conditions.get(Partition::Issues).contains(&"I.project = ANY(:projects)".to_string()));
		assert_eq!(conditions.get(Partition::Links), ["L.relation = ANY(:links)"]);
	}

	#[test]
	fn unassigned_combines_with_assignee_ids() {
		let mut request = filter();

		request.assignees = vec!["u1".to_string()];
		request.unassigned = true;

		let (conditions, _) = build(&request);

		assert!(conditions.get(Partition::Issues).contains(
			&"(assignee_id::text = ANY(:assignees) OR assignee_id IS NULL)".to_string()
		));
	}

	#[test]
	fn custom_fields_and_partial_matches_compile() {
		let mut request = filter();

		request
			.custom_fields
			.insert("customfield_10".to_string(), CustomFieldValue::Values(vec!["a".to_string()]));
		request.partial_match.insert(
			"summary".to_string(),
			PartialMatch { begins: Some("Fix".to_string()), ..Default::default() },
		);

		let (conditions, params) = build(&request);
		let issues = conditions.get(Partition::Issues);

		assert!(issues.contains(&"summary LIKE ALL(:partial_0)".to_string()));
		assert!(issues.contains(
			&"(custom_fields->>'customfield_10' = ANY(:custom_fields_0) OR \
			  custom_fields->'customfield_10' ?| :custom_fields_0)"
				.to_string()
		));
		assert_eq!(params.get("partial_0"), Some(&ParamValue::TextList(vec!["Fix%".to_string()])));
	}
}
