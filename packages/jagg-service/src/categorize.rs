//! Rule-based evaluators for the derived `ticket_category` and `velocity_stage` columns.

use std::sync::Arc;

use ahash::AHashSet;

use jagg_config::Aggregation;
use jagg_domain::{IssueFilter, VelocityConfig, velocity::IGNORE_TERMINAL_STAGE};
use jagg_storage::{models::StatusCategory, params::Params};

use crate::{
	BoxFuture, Error, Result, StageExpression, StatusClassifier, TicketCategorizer,
	VelocityStageEvaluator,
	conditions::{ConditionBuilder, Partition},
};

/// Category of issues no rule claims, and stage of statuses no stage claims.
pub const OTHER: &str = "Other";
/// Row emitted by the velocity report with the total across every stage.
pub const SINGLE_STATE: &str = "SingleState";
/// Synthetic status-history state covering the wait between the last stage and the release.
pub(crate) const RELEASE_STATE: &str = "__release__";

const DONE_CATEGORY: &str = "DONE";

/// Evaluates `ticket_categorization` rules in order; the first matching rule names the category.
///
/// Rules are evaluated against the issue columns only.
pub struct RuleTicketCategorizer {
	settings: Aggregation,
	schema: String,
}
impl RuleTicketCategorizer {
	pub fn new(settings: Aggregation, schema: impl Into<String>) -> Self {
		Self { settings, schema: schema.into() }
	}
}
impl TicketCategorizer for RuleTicketCategorizer {
	fn category_expression(
		&self,
		filter: &IssueFilter,
		now: i64,
		params: &mut Params,
	) -> Result<String> {
		let mut arms = Vec::with_capacity(filter.ticket_categorization.len());

		for (idx, rule) in filter.ticket_categorization.iter().enumerate() {
			let mut rule_filter = rule.filter.clone();

			// Scope is inherited from the outer filter.
			rule_filter.integration_ids.clear();
			rule_filter.is_active = filter.is_active;
			rule_filter.ingested_at = None;
			rule_filter.ingested_at_by_integration.clear();

			let conditions = ConditionBuilder::new(&self.settings, &self.schema, now)
				.prefixed(format!("tc{idx}_"))
				.build(&rule_filter, params)?;

			if let Some(partition) =
				Partition::ALL.into_iter().find(|p| *p != Partition::Issues && !conditions.is_empty(*p))
			{
				return Err(Error::unsupported(format!(
					"Ticket category {:?} narrows {partition:?} rows; only issue fields are supported.",
					rule.name
				)));
			}

			let predicate = match conditions.get(Partition::Issues) {
				[] => "TRUE".to_string(),
				predicates => predicates.join(" AND "),
			};
			let name = params.bind(format!("tc{idx}_name"), rule.name.clone());

			arms.push(format!("WHEN {predicate} THEN {name}"));
		}

		if arms.is_empty() {
			return Ok(format!("'{OTHER}'"));
		}

		Ok(format!("CASE {} ELSE '{OTHER}' END", arms.join(" ")))
	}
}

/// Maps status-history states onto configured velocity stages.
///
/// A stage claims its listed statuses plus every status whose category it lists. Statuses in
/// the done category that no stage claims fall into [`IGNORE_TERMINAL_STAGE`].
pub struct StatusStageEvaluator {
	statuses: Arc<dyn StatusClassifier>,
}
impl StatusStageEvaluator {
	pub fn new(statuses: Arc<dyn StatusClassifier>) -> Self {
		Self { statuses }
	}
}
impl VelocityStageEvaluator for StatusStageEvaluator {
	fn stage_expression<'a>(
		&'a self,
		config: &'a VelocityConfig,
		integration_ids: &'a [i64],
		params: &'a mut Params,
	) -> BoxFuture<'a, Result<StageExpression>> {
		Box::pin(async move {
			config.validate()?;

			let categories = self.statuses.categories(integration_ids).await?;

			Ok::<_, Error>(render_stages(config, &categories, params))
		})
	}
}

pub(crate) fn render_stages(
	config: &VelocityConfig,
	categories: &[StatusCategory],
	params: &mut Params,
) -> StageExpression {
	let mut claimed = AHashSet::new();
	let mut arms = Vec::new();
	let mut release_from_statuses = Vec::new();
	let before_release = config.stage_before_release().map(|stage| stage.name.as_str());

	for (idx, stage) in config.ordered().into_iter().enumerate() {
		let name = params.bind(format!("velocity_stage_name_{idx}"), stage.name.clone());

		if stage.release {
			arms.push(format!("WHEN state = '{RELEASE_STATE}' THEN {name}"));

			continue;
		}

		let statuses = stage_statuses(&stage.statuses, &stage.status_categories, categories)
			.into_iter()
			.filter(|status| claimed.insert(status.clone()))
			.collect::<Vec<_>>();

		if Some(stage.name.as_str()) == before_release {
			release_from_statuses = statuses.clone();
		}
		if statuses.is_empty() {
			continue;
		}

		let statuses = params.bind(format!("velocity_stage_statuses_{idx}"), statuses);

		arms.push(format!("WHEN UPPER(state) = ANY({statuses}) THEN {name}"));
	}

	let terminal = categories
		.iter()
		.filter(|category| category.status_category.eq_ignore_ascii_case(DONE_CATEGORY))
		.map(|category| category.status.to_uppercase())
		.filter(|status| !claimed.contains(status))
		.collect::<AHashSet<_>>();

	if !terminal.is_empty() {
		let mut terminal = terminal.into_iter().collect::<Vec<_>>();

		terminal.sort();

		let terminal = params.bind("velocity_terminal_statuses", terminal);

		arms.push(format!("WHEN UPPER(state) = ANY({terminal}) THEN '{IGNORE_TERMINAL_STAGE}'"));
	}

	let expression = if arms.is_empty() {
		format!("'{OTHER}'")
	} else {
		format!("CASE {} ELSE '{OTHER}' END", arms.join(" "))
	};

	StageExpression {
		expression,
		release_from_statuses,
		release_stage: config.release_stage().map(|stage| stage.name.clone()),
	}
}

/// Upper-cased, de-duplicated statuses of one stage, in a stable order.
fn stage_statuses(
	statuses: &[String],
	status_categories: &[String],
	categories: &[StatusCategory],
) -> Vec<String> {
	let mut out = statuses.iter().map(|status| status.to_uppercase()).collect::<Vec<_>>();

	for category in categories {
		if status_categories.iter().any(|wanted| wanted.eq_ignore_ascii_case(&category.status_category))
		{
			out.push(category.status.to_uppercase());
		}
	}

	out.sort();
	out.dedup();

	out
}

#[cfg(test)]
mod tests {
	use jagg_domain::{Calculation, ReleasePreference, TicketCategoryRule, VelocityStage};
	use jagg_storage::params::ParamValue;

	use super::*;

	fn category(status: &str, status_category: &str) -> StatusCategory {
		StatusCategory {
			integration_id: 1,
			status: status.to_string(),
			status_category: status_category.to_string(),
		}
	}

	fn stage(name: &str, order: i32, statuses: &[&str], categories: &[&str]) -> VelocityStage {
		VelocityStage {
			name: name.to_string(),
			order,
			statuses: statuses.iter().map(|status| status.to_string()).collect(),
			status_categories: categories.iter().map(|category| category.to_string()).collect(),
			release: false,
		}
	}

	#[test]
	fn rules_become_ordered_case_arms() {
		let categorizer = RuleTicketCategorizer::new(Aggregation::default(), "acme");
		let filter = IssueFilter {
			calculation: Calculation::TicketCount,
			ticket_categorization: vec![
				TicketCategoryRule {
					name: "Bugs".to_string(),
					filter: IssueFilter { issue_types: vec!["BUG".to_string()], ..Default::default() },
				},
				TicketCategoryRule {
					name: "Infra".to_string(),
					filter: IssueFilter { labels: vec!["infra".to_string()], ..Default::default() },
				},
			],
			..Default::default()
		};
		let mut params = Params::new();
		let expression = categorizer
			.category_expression(&filter, 0, &mut params)
			.expect("Expression must render.");

		assert!(expression.starts_with("CASE WHEN (is_active = :tc0_is_active OR is_active IS NULL) AND issue_type = ANY(:tc0_issue_types) THEN :tc0_name WHEN"));
		assert!(expression.ends_with("ELSE 'Other' END"));
		assert_eq!(params.get("tc1_name"), Some(&ParamValue::Text("Infra".to_string())));
	}

	#[test]
	fn rules_over_joined_rows_are_rejected() {
		let categorizer = RuleTicketCategorizer::new(Aggregation::default(), "acme");
		let filter = IssueFilter {
			ticket_categorization: vec![TicketCategoryRule {
				name: "Sprinted".to_string(),
				filter: IssueFilter { sprint_names: vec!["S1".to_string()], ..Default::default() },
			}],
			..Default::default()
		};
		let err = categorizer
			.category_expression(&filter, 0, &mut Params::new())
			.expect_err("Expected an unsupported rule.");

		assert!(matches!(err, Error::Unsupported { .. }));
	}

	#[test]
	fn stages_claim_statuses_and_categories_once() {
		let config = VelocityConfig {
			stages: vec![
				stage("Dev", 1, &["In Progress"], &[]),
				stage("Review", 2, &["in progress", "In Review"], &["Review"]),
			],
			prefer_release: ReleasePreference::Min,
		};
		let categories =
			[category("Peer Check", "Review"), category("Done", "Done"), category("Closed", "DONE")];
		let mut params = Params::new();
		let rendered = render_stages(&config, &categories, &mut params);

		assert_eq!(
			rendered.expression,
			"CASE WHEN UPPER(state) = ANY(:velocity_stage_statuses_0) THEN :velocity_stage_name_0 \
			 WHEN UPPER(state) = ANY(:velocity_stage_statuses_1) THEN :velocity_stage_name_1 WHEN \
			 UPPER(state) = ANY(:velocity_terminal_statuses) THEN 'Ignore_Terminal_Stage' ELSE \
			 'Other' END"
		);
		assert_eq!(
			params.get("velocity_stage_statuses_1"),
			Some(&ParamValue::TextList(vec!["IN REVIEW".to_string(), "PEER CHECK".to_string()]))
		);
		assert_eq!(
			params.get("velocity_terminal_statuses"),
			Some(&ParamValue::TextList(vec!["CLOSED".to_string(), "DONE".to_string()]))
		);
		assert!(rendered.release_stage.is_none());
	}

	#[test]
	fn release_stage_measures_from_the_previous_stage() {
		let mut release = stage("Release", 3, &[], &[]);

		release.release = true;

		let config = VelocityConfig {
			stages: vec![stage("Dev", 1, &["In Progress"], &[]), stage("QA", 2, &["Testing"], &[]), release],
			prefer_release: ReleasePreference::Max,
		};
		let rendered = render_stages(&config, &[], &mut Params::new());

		assert_eq!(rendered.release_from_statuses, vec!["TESTING"]);
		assert_eq!(rendered.release_stage.as_deref(), Some("Release"));
		assert!(rendered.expression.contains("WHEN state = '__release__' THEN :velocity_stage_name_2"));
	}
}
