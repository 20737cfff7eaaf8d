//! Composes conditions, dimension, calculation and sort into one layered statement.
//!
//! Every shape renders as `WITH issues AS (<filtered issues>) SELECT <outputs> FROM (<row
//! layer>) AS finaltable ...`, where the row layer carries the joins and derived columns. Linked
//! aggregations swap the row layer for the issues reachable through `jira_issue_links`, either
//! through a correlated key set or, for the proven-safe combinations, an inline join.

use serde_json::Value;

use jagg_config::Aggregation;
use jagg_domain::{
	AggregationBucket, Across, Calculation, IssueFilter, velocity::IGNORE_TERMINAL_STAGE,
};
use jagg_storage::{
	models::DynamicRow,
	params::Params,
	sql::{self, BoundQuery, Distinct, Join, Limit, Query, Select, Source},
};

use crate::{
	Error, OrgUnitResolver, Result, TicketCategorizer,
	calculation::{self, CalculationPlan},
	categorize::SINGLE_STATE,
	conditions::{ConditionBuilder, Conditions, Partition},
	dimension::{self, DimensionPlan},
	joins::{self, Derived, JoinContext, JoinNeeds},
	sort,
};

/// How result rows map back onto buckets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Shape {
	pub(crate) key: Option<String>,
	pub(crate) additional_key: Option<String>,
	pub(crate) explicit_sort: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledQuery {
	pub(crate) query: Query,
	pub(crate) params: Params,
	pub(crate) shape: Shape,
}
impl CompiledQuery {
	pub(crate) fn sql(&self) -> String {
		self.query.render()
	}

	pub(crate) fn bind(&self) -> Result<BoundQuery> {
		Ok(sql::bind(&self.sql(), &self.params)?)
	}
}

#[derive(Clone, Debug)]
pub(crate) struct ListPlan {
	pub(crate) rows: CompiledQuery,
	pub(crate) count: CompiledQuery,
}

pub(crate) struct Compiler<'a> {
	pub(crate) settings: &'a Aggregation,
	pub(crate) schema: &'a str,
	pub(crate) now: i64,
	pub(crate) org_unit: Option<&'a dyn OrgUnitResolver>,
	pub(crate) categorizer: &'a dyn TicketCategorizer,
	pub(crate) derived: &'a Derived,
	/// Compiling the per-bucket pass of a stacked aggregation.
	pub(crate) stacking: bool,
}
impl Compiler<'_> {
	pub(crate) fn compile(&self, filter: &IssueFilter, values_only: bool) -> Result<CompiledQuery> {
		self.compile_layers(filter, None, values_only)
	}

	/// Linked aggregation over `base`'s issues, grouped and narrowed on the linked side by
	/// `narrowed`.
	pub(crate) fn compile_stacked(
		&self,
		base: &IssueFilter,
		narrowed: &IssueFilter,
	) -> Result<CompiledQuery> {
		self.compile_layers(base, Some(narrowed), false)
	}

	/// Per-stage time summary over status history, optionally with the single-state total.
	pub(crate) fn compile_velocity(&self, filter: &IssueFilter) -> Result<CompiledQuery> {
		let across = filter.across()?;

		if !matches!(across, Across::VelocityStage | Across::None) {
			return Err(Error::unsupported(format!(
				"velocity_stage_times_report is not available across {across}."
			)));
		}
		if filter.requires_links() {
			return Err(Error::unsupported(
				"velocity_stage_times_report is not available over linked issues.",
			));
		}

		let mut params = self.derived.params.clone();
		let conditions = self.builder("", "").build(filter, &mut params)?;
		let needs = JoinNeeds::from_filter(filter).union(JoinNeeds {
			statuses: true,
			velocity_stage: true,
			..Default::default()
		});
		let derived = self.derive(filter, &needs, &mut params)?;
		let now = params.bind("now", self.now);
		let base = self.base(&conditions, "issues", filter);
		let ctx = JoinContext {
			schema: self.schema,
			alias: "issues",
			conditions: &conditions,
			filter,
			derived: &derived,
		};
		let row = with_columns(
			Select::from(Source::table("issues")),
			joins::aux_columns(&needs, &derived, &now),
		);
		let row = Select { joins: joins::build(&needs, &ctx, &mut params), ..row };
		let mut per_issue = Select::from(Source::subquery(row, "finaltable"))
			.columns(["velocity_stage", "id", "SUM(time_spent)::bigint AS stage_time"])
			.filters(conditions.get(Partition::Final).iter().cloned());

		per_issue.group_by = vec!["velocity_stage".to_string(), "id".to_string()];

		let summary = |label: String| {
			std::iter::once(label)
				.chain(calculation::summary_columns("stage_time"))
				.chain(std::iter::once("COUNT(DISTINCT id)::bigint AS ct".to_string()))
				.collect::<Vec<_>>()
		};
		let mut stages = Select::from(Source::table("stage_times"))
			.columns(summary("velocity_stage".to_string()));

		stages.group_by = vec!["velocity_stage".to_string()];

		if filter.calculate_single_state {
			let mut totals = Select::from(Source::table("stage_times"))
				.columns(["id", "SUM(stage_time)::bigint AS stage_time"])
				.filter(format!("velocity_stage <> '{IGNORE_TERMINAL_STAGE}'"));

			totals.group_by = vec!["id".to_string()];

			stages.unions.push(
				Select::from(Source::subquery(totals, "totals"))
					.columns(summary(format!("'{SINGLE_STATE}' AS velocity_stage"))),
			);
		}

		let query = Query::new(stages).with("issues", base).with("stage_times", per_issue);

		Ok(CompiledQuery {
			query,
			params,
			shape: Shape { key: Some("velocity_stage".to_string()), ..Default::default() },
		})
	}

	/// One page of filtered issues plus the statement counting every match.
	pub(crate) fn compile_list(
		&self,
		filter: &IssueFilter,
		page: u32,
		page_size: u32,
	) -> Result<ListPlan> {
		if filter.requires_links() {
			return Err(Error::unsupported("Listing linked issues is not supported."));
		}

		let mut params = self.derived.params.clone();
		let conditions = self.builder("", "").build(filter, &mut params)?;
		let needs = JoinNeeds::from_filter(filter);
		let base = self.base(&conditions, "issues", filter);
		let final_filters = conditions.get(Partition::Final);
		let mut body = Select::from(Source::table("issues")).column("issues.*");

		if !needs.is_empty() || !final_filters.is_empty() {
			let derived = self.derive(filter, &needs, &mut params)?;
			let now = params.bind("now", self.now);
			let ctx = JoinContext {
				schema: self.schema,
				alias: "issues",
				conditions: &conditions,
				filter,
				derived: &derived,
			};
			let row = with_columns(
				Select::from(Source::table("issues")),
				joins::aux_columns(&needs, &derived, &now),
			);
			let row = Select { joins: joins::build(&needs, &ctx, &mut params), ..row };
			let matching = Select::from(Source::subquery(row, "finaltable"))
				.column("id")
				.filters(final_filters.iter().cloned());

			body = body.filter(format!("issues.id IN ({})", matching.render()));
		}

		let count = Select { columns: vec!["COUNT(*)::bigint AS ct".to_string()], ..body.clone() };

		params.bind("list_offset", i64::from(page) * i64::from(page_size));
		params.bind("list_limit", i64::from(page_size));
		body.order_by = sort::list_order(filter);
		body.limit =
			Some(Limit::Page { offset: "list_offset".to_string(), limit: "list_limit".to_string() });

		Ok(ListPlan {
			rows: CompiledQuery {
				query: Query::new(body).with("issues", base.clone()),
				params: params.clone(),
				shape: Shape::default(),
			},
			count: CompiledQuery {
				query: Query::new(count).with("issues", base),
				params,
				shape: Shape { key: Some("ct".to_string()), ..Default::default() },
			},
		})
	}

	fn compile_layers(
		&self,
		filter: &IssueFilter,
		narrowed: Option<&IssueFilter>,
		values_only: bool,
	) -> Result<CompiledQuery> {
		let grouping = narrowed.unwrap_or(filter);
		let across = grouping.across()?;

		if values_only && across == Across::None {
			return Err(Error::invalid("values_only requires a grouping dimension."));
		}

		let mut params = self.derived.params.clone();
		let now = params.bind("now", self.now);
		let dimension = dimension::resolve(across, grouping, self.derived, &now, &mut params)?;
		let calculation = if values_only {
			CalculationPlan::default()
		} else {
			calculation::resolve(grouping.calculation, across, grouping, &now)?
		};
		let sort = sort::resolve(grouping, across, &calculation, &dimension, values_only)?;
		let condition_needs = JoinNeeds::from_filter(filter);
		let row_needs = dimension.joins.union(calculation.joins).union(sort.joins);
		let linked = filter.requires_links();
		let narrowed_needs = narrowed.map(JoinNeeds::from_filter).unwrap_or_default();
		let bypass = linked
			&& self.bypass_eligible(filter, &condition_needs)
			&& narrowed_needs.is_empty()
			&& sort::bypass_safe(&sort, across, self.stacking);
		let (issue_qualifier, link_qualifier) = if bypass { ("I.", "L.") } else { ("", "") };
		let conditions = self.builder(issue_qualifier, link_qualifier).build(filter, &mut params)?;
		let narrowed_conditions = match narrowed {
			Some(narrowed) => Some(
				self.builder(issue_qualifier, link_qualifier)
					.prefixed("stk_")
					.build(narrowed, &mut params)?,
			),
			None => None,
		};
		let layers = Layers {
			grouping,
			dimension: &dimension,
			calculation: &calculation,
			conditions: &conditions,
			now: &now,
		};
		let (base, row, mut final_filters) = if bypass {
			self.bypass(filter, narrowed_conditions.as_ref(), &layers, &mut params)
		} else if linked {
			let narrowed = narrowed.zip(narrowed_conditions.as_ref());

			self.linked(filter, narrowed, &layers, condition_needs, row_needs, &mut params)?
		} else {
			self.plain(filter, &layers, condition_needs.union(row_needs), &mut params)?
		};

		if dimension.ranked {
			final_filters.push("rank = 1".to_string());
		}

		final_filters.extend(dimension.final_conditions.iter().cloned());

		let mut body = Select::from(Source::subquery(row, "finaltable")).filters(final_filters);

		if values_only {
			body.distinct = Distinct::Rows;
			body.columns = dimension.select.clone();
		} else {
			body.columns = dedup(dimension.select.iter().chain(&calculation.select));
			body.group_by = dedup(dimension.group_by.iter().chain(&calculation.group_by));
		}

		body.order_by = sort.order_by.clone();
		body.limit = self.limit(grouping, across, &mut params);

		Ok(CompiledQuery {
			query: Query::new(body).with("issues", base),
			params,
			shape: Shape {
				key: dimension.key.clone(),
				additional_key: dimension.additional_key.clone(),
				explicit_sort: sort.explicit,
			},
		})
	}

	fn builder(&self, issue_qualifier: &'static str, link_qualifier: &'static str) -> ConditionBuilder<'_> {
		ConditionBuilder::new(self.settings, self.schema, self.now)
			.scoped_to(self.org_unit)
			.qualified(issue_qualifier, link_qualifier)
	}

	/// Derived-column expressions the joins need, with the ticket category rendered on demand.
	fn derive(&self, filter: &IssueFilter, needs: &JoinNeeds, params: &mut Params) -> Result<Derived> {
		let mut derived = self.derived.clone();

		if needs.ticket_category && derived.ticket_category.is_none() {
			derived.ticket_category =
				Some(self.categorizer.category_expression(filter, self.now, params)?);
		}
		if needs.velocity_stage && derived.velocity_stage.is_none() {
			return Err(Error::invalid("Velocity stages require a velocity configuration."));
		}

		Ok(derived)
	}

	fn bypass_eligible(&self, filter: &IssueFilter, condition_needs: &JoinNeeds) -> bool {
		filter.calculation == Calculation::TicketCount
			&& filter.parent_story_points.is_none()
			&& filter.sprint_ids.is_empty()
			&& filter.sprint_names.is_empty()
			&& condition_needs.is_empty()
	}

	/// Filtered issue layer. `alias` names the table inside the CTE.
	fn base(&self, conditions: &Conditions, alias: &str, filter: &IssueFilter) -> Select {
		let mut base = Select::from(Source::aliased(format!("{}.jira_issues", self.schema), alias))
			.filters(conditions.get(Partition::Issues).iter().cloned());

		if filter.issue_released_range.is_some_and(|range| !range.is_empty()) {
			let mut predicates = vec![
				format!("name = ANY({alias}.fix_versions)"),
				format!("integration_id = {alias}.integration_id"),
			];

			predicates.extend(
				conditions
					.get(Partition::Versions)
					.iter()
					.filter(|predicate| predicate.starts_with("end_date"))
					.cloned(),
			);
			base.filters.push(format!(
				"EXISTS (SELECT 1 FROM {}.jira_issue_versions WHERE {})",
				self.schema,
				predicates.join(" AND ")
			));
		}

		base
	}

	fn plain(
		&self,
		filter: &IssueFilter,
		layers: &Layers<'_>,
		needs: JoinNeeds,
		params: &mut Params,
	) -> Result<(Select, Select, Vec<String>)> {
		let Layers { grouping, dimension, calculation, conditions, now } = *layers;
		let mut base = with_columns(
			self.base(conditions, "issues", filter),
			dimension.base_columns.clone(),
		);

		base.filters.extend(not_null(dimension, ""));
		base.filters.extend(dimension.issue_conditions.iter().cloned());
		base.filters.extend(calculation.issue_conditions.iter().cloned());

		let derived = self.derive(grouping, &needs, params)?;
		let ctx = JoinContext {
			schema: self.schema,
			alias: "issues",
			conditions,
			filter: grouping,
			derived: &derived,
		};
		let row = with_columns(
			Select::from(Source::table("issues")),
			joins::aux_columns(&needs, &derived, now)
				.into_iter()
				.chain(dimension.row_columns.iter().cloned())
				.collect(),
		);
		let row = Select { joins: joins::build(&needs, &ctx, params), ..row };

		Ok((base, row, conditions.get(Partition::Final).to_vec()))
	}

	/// Issues reachable from the filtered issues, grouped on the linked side.
	fn linked(
		&self,
		filter: &IssueFilter,
		narrowed: Option<(&IssueFilter, &Conditions)>,
		layers: &Layers<'_>,
		condition_needs: JoinNeeds,
		row_needs: JoinNeeds,
		params: &mut Params,
	) -> Result<(Select, Select, Vec<String>)> {
		let Layers { grouping, dimension, calculation, conditions, now } = *layers;
		let schema = self.schema;
		let base = self.base(conditions, "issues", filter);
		let links = Select::from(Source::table(format!("{schema}.jira_issue_links")))
			.columns([
				"from_issue_key",
				"to_issue_key",
				"integration_id AS link_integration_id",
				"relation",
			])
			.filters(conditions.get(Partition::Links).iter().cloned());
		let primary_derived = self.derive(filter, &condition_needs, params)?;
		let primary_ctx = JoinContext {
			schema,
			alias: "issues",
			conditions,
			filter,
			derived: &primary_derived,
		};
		let primary = with_columns(
			Select::from(Source::table("issues")),
			joins::aux_columns(&condition_needs, &primary_derived, now),
		)
		.join(Join::inner(
			Source::subquery(links, "links"),
			vec![
				"links.from_issue_key = issues.key".to_string(),
				"links.link_integration_id = issues.integration_id".to_string(),
			],
		));
		let primary = Select {
			joins: [primary.joins, joins::build(&condition_needs, &primary_ctx, params)].concat(),
			..primary
		};
		let reachable = Select::from(Source::subquery(primary, "finaltable"))
			.columns(["link_integration_id", "to_issue_key"])
			.filters(conditions.get(Partition::Final).iter().cloned());
		let mut linked_where = vec![format!(
			"(integration_id, key) IN (SELECT link_integration_id, to_issue_key FROM ({}) AS li)",
			reachable.render()
		)];

		if !grouping.integration_ids.is_empty() {
			let ids = params.bind("lnk_integration_ids", grouping.integration_ids.clone());

			linked_where.push(format!("integration_id = ANY({ids})"));
		}

		linked_where.extend(self.builder("", "").prefixed("lnk_").snapshot_only(grouping, params));
		linked_where.extend(not_null(dimension, ""));
		linked_where.extend(dimension.issue_conditions.iter().cloned());
		linked_where.extend(calculation.issue_conditions.iter().cloned());

		let empty = Conditions::default();
		let (linked_conditions, linked_needs) = match narrowed {
			Some((narrowed, narrowed_conditions)) => {
				linked_where.extend(narrowed_conditions.get(Partition::Issues).iter().cloned());

				(narrowed_conditions, row_needs.union(JoinNeeds::from_filter(narrowed)))
			},
			None => (&empty, row_needs),
		};
		let linked_set = with_columns(
			Select::from(Source::aliased(format!("{schema}.jira_issues"), "linked_issues")),
			dimension.base_columns.clone(),
		)
		.filters(linked_where);
		let derived = self.derive(grouping, &linked_needs, params)?;
		let ctx = JoinContext {
			schema,
			alias: "linked_issues",
			conditions: linked_conditions,
			filter: grouping,
			derived: &derived,
		};
		let row = with_columns(
			Select::from(Source::subquery(linked_set, "linked_issues")),
			joins::aux_columns(&linked_needs, &derived, now)
				.into_iter()
				.chain(dimension.row_columns.iter().cloned())
				.collect(),
		);
		let row = Select { joins: joins::build(&linked_needs, &ctx, params), ..row };

		Ok((base, row, linked_conditions.get(Partition::Final).to_vec()))
	}

	/// Inline link join; only for combinations that need no other join. A stacked pass narrows
	/// the linked side with `narrowed`'s issue predicates.
	fn bypass(
		&self,
		filter: &IssueFilter,
		narrowed: Option<&Conditions>,
		layers: &Layers<'_>,
		params: &mut Params,
	) -> (Select, Select, Vec<String>) {
		let Layers { grouping, dimension, conditions, .. } = *layers;
		let schema = self.schema;
		let base = self.base(conditions, "I", filter);
		let mut linked_on = vec![
			"I.key = L.to_issue_key".to_string(),
			"I.integration_id = L.integration_id".to_string(),
		];

		linked_on.extend(self.builder("I.", "L.").prefixed("lnk_").snapshot_only(grouping, params));
		linked_on.extend(not_null(dimension, "I."));

		if let Some(narrowed) = narrowed {
			linked_on.extend(narrowed.get(Partition::Issues).iter().cloned());
		}

		let reachable = Select {
			distinct: Distinct::On(vec!["I.id".to_string()]),
			columns: vec!["I.*".to_string()],
			..Select::from(Source::aliased(format!("{schema}.jira_issue_links"), "L"))
		}
		.join(Join::inner(
			Source::table("issues"),
			vec![
				"issues.key = L.from_issue_key".to_string(),
				"issues.integration_id = L.integration_id".to_string(),
			],
		))
		.join(Join::inner(Source::aliased(format!("{schema}.jira_issues"), "I"), linked_on))
		.filters(conditions.get(Partition::Links).iter().cloned());
		let row = with_columns(
			Select::from(Source::subquery(reachable, "I")),
			dimension.row_columns.clone(),
		);

		(base, row, conditions.get(Partition::Final).to_vec())
	}

	fn limit(&self, filter: &IssueFilter, across: Across, params: &mut Params) -> Option<Limit> {
		if across == Across::SprintMapping {
			let size = filter.page_size.unwrap_or(self.settings.default_page_size);
			let page = filter.page.unwrap_or(0);

			params.bind("page_offset", i64::from(page) * i64::from(size));
			params.bind("page_size", i64::from(size));

			return Some(Limit::Page { offset: "page_offset".to_string(), limit: "page_size".to_string() });
		}

		let limit = filter.across_limit.or(self.settings.default_across_limit)?;

		params.bind("across_limit", i64::from(limit));

		Some(Limit::Rows { limit: "across_limit".to_string() })
	}
}

#[derive(Clone, Copy)]
struct Layers<'a> {
	grouping: &'a IssueFilter,
	dimension: &'a DimensionPlan,
	calculation: &'a CalculationPlan,
	conditions: &'a Conditions,
	now: &'a str,
}

/// `SELECT *, extra...` when extra columns are present.
fn with_columns(select: Select, extra: Vec<String>) -> Select {
	if extra.is_empty() {
		return select;
	}

	select.column("*").columns(extra)
}

fn not_null(dimension: &DimensionPlan, qualifier: &str) -> Option<String> {
	dimension.not_null.map(|column| format!("{qualifier}{column} IS NOT NULL"))
}

fn dedup<'a>(columns: impl Iterator<Item = &'a String>) -> Vec<String> {
	let mut out: Vec<String> = Vec::new();

	for column in columns {
		if !out.contains(column) {
			out.push(column.clone());
		}
	}

	out
}

/// Maps one result row onto a bucket.
pub(crate) fn to_bucket(row: &DynamicRow, shape: &Shape) -> AggregationBucket {
	let text = |name: &str| row.get(name).and_then(stringify);
	let int = |name: &str| row.get(name).and_then(Value::as_i64);
	let float = |name: &str| row.get(name).and_then(Value::as_f64);

	AggregationBucket {
		key: shape.key.as_deref().and_then(text),
		additional_key: shape.additional_key.as_deref().and_then(text),
		stage: text("stage"),
		velocity_stage: text("velocity_stage"),
		count: int("ct"),
		min: int("mn"),
		max: int("mx"),
		median: int("median"),
		mean: float("mean"),
		p90: float("p90"),
		p95: float("p95"),
		sum: int("sum"),
		total_story_points: int("total_story_points"),
		mean_story_points: float("mean_story_points"),
		story_points_sum: int("story_points_sum"),
		unestimated_tickets_count: int("unestimated_tickets_count"),
		assignees: row.get("assignees").and_then(Value::as_array).map(|values| {
			values.iter().filter_map(|value| value.as_str().map(str::to_string)).collect()
		}),
		priority: text("priority"),
		priority_order: int("priority_order"),
		sprint_mappings: row.get("sprint_mappings").filter(|value| !value.is_null()).cloned(),
		stacks: None,
	}
}

fn stringify(value: &Value) -> Option<String> {
	match value {
		Value::Null => None,
		Value::String(value) => Some(value.clone()),
		other => Some(other.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use jagg_domain::{Hygiene, SortEntry, SortOrder};

	use super::*;

	struct NoCategories;
	impl TicketCategorizer for NoCategories {
		fn category_expression(
			&self,
			_: &IssueFilter,
			_: i64,
			_: &mut Params,
		) -> Result<String> {
			Ok("'Other'".to_string())
		}
	}

	fn compile_with(filter: &IssueFilter, derived: &Derived, stacking: bool) -> Result<CompiledQuery> {
		let settings = Aggregation::default();
		let compiler = Compiler {
			settings: &settings,
			schema: "acme",
			now: 1_700_000_000,
			org_unit: None,
			categorizer: &NoCategories,
			derived,
			stacking,
		};

		compiler.compile(filter, false)
	}

	fn compile(filter: &IssueFilter) -> CompiledQuery {
		compile_with(filter, &Derived::default(), false).expect("Filter must compile.")
	}

	fn filter(across: Across, calculation: Calculation) -> IssueFilter {
		IssueFilter {
			across: Some(across),
			calculation,
			integration_ids: vec![1],
			..Default::default()
		}
	}

	#[test]
	fn plain_count_renders_the_layered_shape() {
		let compiled = compile(&filter(Across::Status, Calculation::TicketCount));

		assert_eq!(
			compiled.sql(),
			"WITH issues AS (SELECT * FROM acme.jira_issues AS issues WHERE integration_id = \
			 ANY(:integration_ids) AND (is_active = :is_active OR is_active IS NULL)) SELECT \
			 status, COUNT(DISTINCT id)::bigint AS ct, COALESCE(SUM(story_points), 0)::bigint AS \
			 total_story_points, AVG(COALESCE(story_points, 0))::float8 AS mean_story_points FROM (SELECT * \
			 FROM issues) AS finaltable GROUP BY status ORDER BY ct DESC NULLS LAST, status ASC \
			 NULLS LAST"
		);
		assert_eq!(compiled.shape.key.as_deref(), Some("status"));

		let bound = compiled.bind().expect("Query must bind.");

		assert_eq!(bound.binds.len(), 2);
	}

	#[test]
	fn array_dimension_unnests_after_the_joins() {
		let compiled = compile(&filter(Across::Component, Calculation::TicketCount));

		assert!(
			compiled.sql().contains("FROM (SELECT *, UNNEST(components) AS component FROM issues) AS finaltable GROUP BY component"),
			"Unexpected SQL: {}",
			compiled.sql()
		);
	}

	#[test]
	fn trend_keeps_the_latest_snapshot_per_bucket() {
		let sql = compile(&filter(Across::Trend, Calculation::TicketCount)).sql();

		assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY date_trunc('day'"));
		assert!(sql.contains("WHERE rank = 1 GROUP BY trend_interval"));
	}

	#[test]
	fn trend_ages_read_the_bucket_day_snapshot() {
		let sql = compile(&filter(Across::Trend, Calculation::Age)).sql();

		assert!(!sql.contains("ROW_NUMBER()"));
		assert!(
			sql.contains(
				"AS finaltable WHERE (to_timestamp(ingested_at) AT TIME ZONE 'UTC')::date = \
				 trend_interval::date GROUP BY trend_interval"
			),
			"Unexpected SQL: {sql}"
		);
	}

	#[test]
	fn assign_to_resolve_counts_assigned_issues_only() {
		let sql = compile(&filter(Across::Project, Calculation::AssignToResolve)).sql();

		assert!(sql.contains("AND first_assigned_at IS NOT NULL) SELECT"), "Unexpected SQL: {sql}");

		let mut request = filter(Across::Project, Calculation::AssignToResolve);

		request.links = vec!["blocks".to_string()];

		let sql = compile(&request).sql();

		assert!(
			sql.contains("AS li) AND integration_id = ANY(:lnk_integration_ids)"),
			"Unexpected SQL: {sql}"
		);
		assert!(sql.contains("AND first_assigned_at IS NOT NULL) AS linked_issues"), "Unexpected SQL: {sql}");
	}

	#[test]
	fn epic_dimension_drops_issues_without_epics() {
		let sql = compile(&filter(Across::Epic, Calculation::Hops)).sql();

		assert!(sql.contains("AND epic IS NOT NULL)"), "Unexpected SQL: {sql}");
	}

	#[test]
	fn inactive_assignee_hygiene_joins_users() {
		let mut request = filter(Across::Project, Calculation::TicketCount);

		request.extra_criteria = vec![Hygiene::InactiveAssignees];

		let sql = compile(&request).sql();

		assert!(sql.contains(
			"INNER JOIN (SELECT display_name, active, integ_id FROM acme.jira_users WHERE NOT \
			 active) AS u ON u.display_name = issues.assignee"
		));
	}

	#[test]
	fn links_use_the_bypass_for_safe_dimensions() {
		let mut request = filter(Across::Component, Calculation::TicketCount);

		request.links = vec!["blocks".to_string()];

		let sql = compile(&request).sql();

		assert!(sql.starts_with("WITH issues AS (SELECT * FROM acme.jira_issues AS I WHERE I.integration_id"));
		assert!(sql.contains("SELECT DISTINCT ON (I.id) I.* FROM acme.jira_issue_links AS L"));
		assert!(sql.contains("WHERE L.integration_id = ANY(:integration_ids) AND L.relation = ANY(:links)"));
	}

	#[test]
	fn links_fall_back_to_the_key_set_otherwise() {
		let mut request = filter(Across::Component, Calculation::ResolutionTime);

		request.links = vec!["blocks".to_string()];

		let sql = compile(&request).sql();

		assert!(sql.contains("(integration_id, key) IN (SELECT link_integration_id, to_issue_key FROM"));
		assert!(sql.contains("AS links ON links.from_issue_key = issues.key"));
		assert!(sql.contains("FROM acme.jira_issues AS linked_issues WHERE"));
		assert!(!sql.contains("DISTINCT ON"));
	}

	#[test]
	fn issue_type_bypasses_only_while_stacking() {
		let mut request = filter(Across::IssueType, Calculation::TicketCount);

		request.links = vec!["blocks".to_string()];

		let plain = compile_with(&request, &Derived::default(), false).expect("Filter must compile.");
		let stacked = compile_with(&request, &Derived::default(), true).expect("Filter must compile.");

		assert!(!plain.sql().contains("DISTINCT ON"));
		assert!(stacked.sql().contains("DISTINCT ON"));
	}

	#[test]
	fn stacked_linked_pass_narrows_the_inline_join() {
		let settings = Aggregation::default();
		let derived = Derived::default();
		let compiler = Compiler {
			settings: &settings,
			schema: "acme",
			now: 1_700_000_000,
			org_unit: None,
			categorizer: &NoCategories,
			derived: &derived,
			stacking: true,
		};
		let mut outer = filter(Across::Project, Calculation::TicketCount);

		outer.links = vec!["blocks".to_string()];
		outer.projects = vec!["LEV".to_string(), "OPS".to_string()];

		let mut narrowed = outer.clone();

		narrowed.across = Some(Across::IssueType);
		narrowed.projects = vec!["LEV".to_string()];

		let sql = compiler.compile_stacked(&outer, &narrowed).expect("Pass must compile.").sql();

		assert!(sql.contains("SELECT DISTINCT ON (I.id) I.* FROM acme.jira_issue_links AS L"));
		assert!(sql.contains("AND I.project = ANY(:stk_projects)"), "Unexpected SQL: {sql}");
		assert!(sql.contains("GROUP BY issue_type"));

		narrowed.sprint_names = vec!["Sprint 4".to_string()];

		let sql = compiler.compile_stacked(&outer, &narrowed).expect("Pass must compile.").sql();

		assert!(!sql.contains("DISTINCT ON"));
	}

	#[test]
	fn sprint_mapping_pages_with_defaults() {
		let mut request = filter(Across::SprintMapping, Calculation::SprintMapping);

		request.page = Some(2);

		let compiled = compile(&request);

		assert!(compiled.sql().ends_with("OFFSET :page_offset LIMIT :page_size"));
		assert_eq!(
			compiled.params.get("page_offset"),
			Some(&jagg_storage::params::ParamValue::Int(20))
		);
	}

	#[test]
	fn across_limit_caps_rows() {
		let mut request = filter(Across::Priority, Calculation::TicketCount);

		request.across_limit = Some(5);
		request.sort = vec![SortEntry::new("priority", SortOrder::Asc)];

		let compiled = compile(&request);

		assert!(compiled.sql().ends_with("ORDER BY MIN(priority_order) DESC NULLS LAST, priority ASC NULLS LAST LIMIT :across_limit"));
		assert!(compiled.sql().contains("AS prio_order ON"));
		assert!(compiled.shape.explicit_sort);
	}

	#[test]
	fn velocity_filters_need_a_configuration() {
		let mut request = filter(Across::Project, Calculation::TicketCount);

		request.velocity_stages = vec!["Dev".to_string()];

		let err = compile_with(&request, &Derived::default(), false)
			.expect_err("Expected a missing configuration error.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}

	#[test]
	fn velocity_report_sums_per_issue_then_summarizes() {
		let settings = Aggregation::default();
		let derived = Derived { velocity_stage: Some("'Dev'".to_string()), ..Default::default() };
		let compiler = Compiler {
			settings: &settings,
			schema: "acme",
			now: 1_700_000_000,
			org_unit: None,
			categorizer: &NoCategories,
			derived: &derived,
			stacking: false,
		};
		let mut request = filter(Across::VelocityStage, Calculation::VelocityStageTimesReport);

		request.calculate_single_state = true;

		let sql = compiler.compile_velocity(&request).expect("Report must compile.").sql();

		assert!(sql.contains(
			"stage_times AS (SELECT velocity_stage, id, SUM(time_spent)::bigint AS stage_time FROM"
		));
		assert!(sql.contains("UNION SELECT 'SingleState' AS velocity_stage"));
		assert!(sql.contains("WHERE velocity_stage <> 'Ignore_Terminal_Stage' GROUP BY id"));

		request.across = Some(Across::Project);

		assert!(matches!(compiler.compile_velocity(&request), Err(Error::Unsupported { .. })));
	}

	#[test]
	fn rows_map_onto_buckets() {
		let row = serde_json::json!({
			"assignee_id": "9f1c",
			"assignee": "Ada",
			"ct": 3,
			"mn": 86400,
			"mx": 432000,
			"median": 259200,
			"mean": 259200.0,
			"assignees": ["Ada", null],
		});
		let Value::Object(row) = row else {
			panic!("Expected an object.");
		};
		let shape = Shape {
			key: Some("assignee_id".to_string()),
			additional_key: Some("assignee".to_string()),
			explicit_sort: false,
		};
		let bucket = to_bucket(&row, &shape);

		assert_eq!(bucket.key.as_deref(), Some("9f1c"));
		assert_eq!(bucket.additional_key.as_deref(), Some("Ada"));
		assert_eq!((bucket.count, bucket.min, bucket.max, bucket.median), (
			Some(3),
			Some(86_400),
			Some(432_000),
			Some(259_200)
		));
		assert_eq!(bucket.assignees, Some(vec!["Ada".to_string()]));
	}

	#[test]
	fn listing_pages_the_filtered_issues() {
		let settings = Aggregation::default();
		let derived = Derived::default();
		let compiler = Compiler {
			settings: &settings,
			schema: "acme",
			now: 1_700_000_000,
			org_unit: None,
			categorizer: &NoCategories,
			derived: &derived,
			stacking: false,
		};
		let mut request = IssueFilter { integration_ids: vec![1], ..Default::default() };
		let plan = compiler.compile_list(&request, 1, 25).expect("Listing must compile.");

		assert_eq!(
			plan.rows.sql(),
			"WITH issues AS (SELECT * FROM acme.jira_issues AS issues WHERE integration_id = \
			 ANY(:integration_ids) AND (is_active = :is_active OR is_active IS NULL)) SELECT \
			 issues.* FROM issues ORDER BY issue_created_at DESC NULLS LAST, key ASC OFFSET \
			 :list_offset LIMIT :list_limit"
		);
		assert!(plan.count.sql().ends_with("SELECT COUNT(*)::bigint AS ct FROM issues"));
		assert_eq!(
			plan.rows.params.get("list_offset"),
			Some(&jagg_storage::params::ParamValue::Int(25))
		);

		request.sprint_names = vec!["Sprint 4".to_string()];

		let plan = compiler.compile_list(&request, 0, 25).expect("Listing must compile.");

		assert!(plan.rows.sql().contains("WHERE issues.id IN (SELECT id FROM (SELECT "));
		assert!(plan.count.sql().contains("WHERE issues.id IN (SELECT id FROM (SELECT "));

		request.links = vec!["blocks".to_string()];

		assert!(matches!(compiler.compile_list(&request, 0, 25), Err(Error::Unsupported { .. })));
	}
}
