//! Declarative request model for an aggregation.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AggInterval, Across, Calculation, Error, Result};

static CUSTOM_FIELD_KEY: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^customfield_\d+$").expect("Custom field pattern must compile."));

/// Exclusive bounds over an epoch-seconds or numeric column.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Range {
	#[serde(rename = "$gt", default, skip_serializing_if = "Option::is_none")]
	pub gt: Option<i64>,
	#[serde(rename = "$lt", default, skip_serializing_if = "Option::is_none")]
	pub lt: Option<i64>,
}
impl Range {
	pub fn new(gt: Option<i64>, lt: Option<i64>) -> Self {
		Self { gt, lt }
	}

	pub fn is_empty(&self) -> bool {
		self.gt.is_none() && self.lt.is_none()
	}
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PartialMatch {
	#[serde(rename = "$begins", default, skip_serializing_if = "Option::is_none")]
	pub begins: Option<String>,
	#[serde(rename = "$ends", default, skip_serializing_if = "Option::is_none")]
	pub ends: Option<String>,
	#[serde(rename = "$contains", default, skip_serializing_if = "Option::is_none")]
	pub contains: Option<String>,
}
impl PartialMatch {
	/// `LIKE` patterns for every populated operator.
	pub fn patterns(&self) -> Vec<String> {
		let mut patterns = Vec::new();

		if let Some(begins) = &self.begins {
			patterns.push(format!("{begins}%"));
		}
		if let Some(ends) = &self.ends {
			patterns.push(format!("%{ends}"));
		}
		if let Some(contains) = &self.contains {
			patterns.push(format!("%{contains}%"));
		}

		patterns
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CustomFieldValue {
	Values(Vec<String>),
	Range(Range),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hygiene {
	Idle,
	NoAssignee,
	NoDueDate,
	PoorDescription,
	NoComponents,
	MissedResponseTime,
	MissedResolutionTime,
	InactiveAssignees,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HygieneSpecs {
	/// Days without an update before an issue counts as idle.
	pub idle: Option<i64>,
	/// Description size below which a description counts as poor.
	pub poor_description: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	Asc,
	#[default]
	Desc,
}
impl SortOrder {
	pub fn as_sql(self) -> &'static str {
		match self {
			Self::Asc => "ASC",
			Self::Desc => "DESC",
		}
	}

	pub fn inverted(self) -> Self {
		match self {
			Self::Asc => Self::Desc,
			Self::Desc => Self::Asc,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SortEntry {
	pub id: String,
	#[serde(default)]
	pub order: SortOrder,
}
impl SortEntry {
	pub fn new(id: impl Into<String>, order: SortOrder) -> Self {
		Self { id: id.into(), order }
	}
}

/// Narrowing of the historical sprint-mapping rows joined by the sprint mapping calculations.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SprintMappingFilter {
	pub ignorable_issue_type: Option<bool>,
	pub sprint_ids: Vec<i64>,
	pub sprint_names: Vec<String>,
	pub exclude_sprint_names: Vec<String>,
	pub name_starts_with: Option<String>,
	pub name_ends_with: Option<String>,
	pub name_contains: Option<String>,
	pub state: Option<String>,
	pub completed_at: Option<Range>,
	pub started_at: Option<Range>,
	/// Number of most recently completed sprints to keep.
	pub sprint_count: Option<u32>,
}

/// Named rule whose filter classifies an issue into a ticket category.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TicketCategoryRule {
	pub name: String,
	#[serde(default)]
	pub filter: IssueFilter,
}

/// Negated twins of the list fields of [`IssueFilter`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Exclusions {
	pub integration_ids: Vec<i64>,
	pub keys: Vec<String>,
	pub priorities: Vec<String>,
	pub statuses: Vec<String>,
	pub assignees: Vec<String>,
	pub reporters: Vec<String>,
	pub issue_types: Vec<String>,
	pub projects: Vec<String>,
	pub epics: Vec<String>,
	pub parent_keys: Vec<String>,
	pub parent_issue_types: Vec<String>,
	pub resolutions: Vec<String>,
	pub status_categories: Vec<String>,
	pub first_assignees: Vec<String>,
	pub links: Vec<String>,
	pub stages: Vec<String>,
	pub velocity_stages: Vec<String>,
	pub ticket_categories: Vec<String>,
	pub labels: Vec<String>,
	pub components: Vec<String>,
	pub versions: Vec<String>,
	pub fix_versions: Vec<String>,
	pub parent_labels: Vec<String>,
	pub sprint_ids: Vec<i64>,
	pub sprint_names: Vec<String>,
	pub sprint_full_names: Vec<String>,
	pub sprint_states: Vec<String>,
	pub custom_fields: BTreeMap<String, CustomFieldValue>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct IssueFilter {
	pub across: Option<Across>,
	pub calculation: Calculation,

	pub integration_ids: Vec<i64>,
	pub keys: Vec<String>,
	/// Snapshot pin shared by every integration.
	pub ingested_at: Option<i64>,
	/// Snapshot pin per integration id; wins over `ingested_at` when non-empty.
	pub ingested_at_by_integration: BTreeMap<i64, i64>,
	/// `None` keeps active issues only.
	pub is_active: Option<bool>,

	pub priorities: Vec<String>,
	pub statuses: Vec<String>,
	pub assignees: Vec<String>,
	pub assignee_display_names: Vec<String>,
	pub reporters: Vec<String>,
	pub issue_types: Vec<String>,
	pub projects: Vec<String>,
	pub epics: Vec<String>,
	pub parent_keys: Vec<String>,
	pub parent_issue_types: Vec<String>,
	pub resolutions: Vec<String>,
	pub status_categories: Vec<String>,
	pub first_assignees: Vec<String>,
	pub links: Vec<String>,
	pub stages: Vec<String>,
	pub velocity_stages: Vec<String>,
	pub ticket_categories: Vec<String>,

	pub labels: Vec<String>,
	pub components: Vec<String>,
	pub versions: Vec<String>,
	pub fix_versions: Vec<String>,
	pub parent_labels: Vec<String>,
	pub sprint_ids: Vec<i64>,
	pub sprint_names: Vec<String>,
	pub sprint_full_names: Vec<String>,
	pub sprint_states: Vec<String>,

	pub issue_created_range: Option<Range>,
	pub issue_updated_range: Option<Range>,
	pub issue_due_range: Option<Range>,
	pub issue_resolution_range: Option<Range>,
	pub issue_released_range: Option<Range>,
	pub snapshot_range: Option<Range>,
	pub age: Option<Range>,
	pub assignees_date_range: Option<Range>,
	pub story_points: Option<Range>,
	pub parent_story_points: Option<Range>,

	pub summary: Option<String>,
	pub partial_match: BTreeMap<String, PartialMatch>,
	pub custom_fields: BTreeMap<String, CustomFieldValue>,
	pub missing_fields: BTreeMap<String, bool>,

	pub extra_criteria: Vec<Hygiene>,
	pub hygiene_criteria_specs: HygieneSpecs,

	pub unassigned: bool,
	pub ignore_ou: bool,
	pub sprint_count: Option<u32>,
	pub filter_by_last_sprint: bool,
	pub filter_across_values: bool,

	pub custom_stacks: Vec<String>,
	pub custom_across: Option<String>,
	pub agg_interval: Option<String>,
	pub across_limit: Option<u32>,

	pub from_state: Option<String>,
	pub to_state: Option<String>,
	pub sprint_mapping: Option<SprintMappingFilter>,
	pub calculate_single_state: bool,
	pub ticket_categorization: Vec<TicketCategoryRule>,
	/// Statistic used when sorting `resolution_time` by its own output.
	pub metric: Option<String>,

	/// Only the first entry is significant.
	pub sort: Vec<SortEntry>,
	pub page: Option<u32>,
	pub page_size: Option<u32>,

	pub or_filter: Option<Box<IssueFilter>>,
	pub exclude: Exclusions,
}
impl IssueFilter {
	pub fn across(&self) -> Result<Across> {
		self.across.ok_or_else(|| Error::invalid("across must be present."))
	}

	pub fn interval(&self) -> AggInterval {
		AggInterval::parse_lenient(self.agg_interval.as_deref())
	}

	pub fn first_sort(&self) -> Option<&SortEntry> {
		self.sort.first()
	}

	pub fn is_active_only(&self) -> bool {
		self.is_active != Some(false)
	}

	/// Whether the aggregation must be computed over linked issues.
	pub fn requires_links(&self) -> bool {
		!self.links.is_empty() || !self.exclude.links.is_empty()
	}

	/// Whether anything narrows the issue rows beyond integration ids and status categories.
	pub fn narrows_issues(&self) -> bool {
		let exclude = &self.exclude;

		!(self.keys.is_empty()
			&& self.priorities.is_empty()
			&& self.statuses.is_empty()
			&& self.assignees.is_empty()
			&& self.assignee_display_names.is_empty()
			&& self.reporters.is_empty()
			&& self.issue_types.is_empty()
			&& self.projects.is_empty()
			&& self.epics.is_empty()
			&& self.parent_keys.is_empty()
			&& self.parent_issue_types.is_empty()
			&& self.resolutions.is_empty()
			&& self.first_assignees.is_empty()
			&& self.links.is_empty()
			&& self.stages.is_empty()
			&& self.velocity_stages.is_empty()
			&& self.ticket_categories.is_empty()
			&& self.labels.is_empty()
			&& self.components.is_empty()
			&& self.versions.is_empty()
			&& self.fix_versions.is_empty()
			&& self.parent_labels.is_empty()
			&& self.sprint_ids.is_empty()
			&& self.sprint_names.is_empty()
			&& self.sprint_full_names.is_empty()
			&& self.sprint_states.is_empty()
			&& self.issue_created_range.is_none()
			&& self.issue_updated_range.is_none()
			&& self.issue_due_range.is_none()
			&& self.issue_resolution_range.is_none()
			&& self.issue_released_range.is_none()
			&& self.age.is_none()
			&& self.story_points.is_none()
			&& self.parent_story_points.is_none()
			&& self.summary.is_none()
			&& self.partial_match.is_empty()
			&& self.custom_fields.is_empty()
			&& self.missing_fields.is_empty()
			&& self.extra_criteria.is_empty()
			&& !self.unassigned
			&& self.or_filter.is_none()
			&& exclude.keys.is_empty()
			&& exclude.priorities.is_empty()
			&& exclude.statuses.is_empty()
			&& exclude.assignees.is_empty()
			&& exclude.reporters.is_empty()
			&& exclude.issue_types.is_empty()
			&& exclude.projects.is_empty()
			&& exclude.epics.is_empty()
			&& exclude.parent_keys.is_empty()
			&& exclude.resolutions.is_empty()
			&& exclude.links.is_empty()
			&& exclude.labels.is_empty()
			&& exclude.components.is_empty()
			&& exclude.versions.is_empty()
			&& exclude.fix_versions.is_empty()
			&& exclude.sprint_ids.is_empty()
			&& exclude.sprint_names.is_empty()
			&& exclude.custom_fields.is_empty())
	}

	/// Structural validation that must pass before any SQL is built.
	pub fn validate(&self) -> Result<()> {
		let across = self.across()?;

		if across == Across::CustomField {
			let Some(key) = self.custom_across.as_deref() else {
				return Err(Error::invalid("custom_across must be present with custom_field across."));
			};

			validate_custom_field_key(key)?;
		}

		match self.calculation {
			Calculation::StateTransitionTime => {
				if is_blank(self.from_state.as_deref()) || is_blank(self.to_state.as_deref()) {
					return Err(Error::invalid(
						"state_transition_time requires both from_state and to_state.",
					));
				}
			},
			Calculation::StageBounceReport =>
				if self.stages.is_empty() {
					return Err(Error::invalid("stage_bounce_report requires a non-empty stages list."));
				},
			Calculation::SprintMapping =>
				if across != Across::SprintMapping {
					return Err(Error::unsupported("sprint_mapping calculation requires sprint_mapping across."));
				},
			Calculation::SprintMappingCount =>
				if across != Across::None {
					return Err(Error::unsupported("sprint_mapping_count calculation requires none across."));
				},
			_ => {},
		}

		if across == Across::SprintMapping && self.calculation != Calculation::SprintMapping {
			return Err(Error::unsupported("sprint_mapping across requires sprint_mapping calculation."));
		}

		self.validate_fields()?;

		for rule in &self.ticket_categorization {
			if rule.name.trim().is_empty() {
				return Err(Error::invalid("ticket_categorization rule names must be non-empty."));
			}

			rule.filter.validate_fields()?;
		}

		Ok(())
	}

	/// Field-level checks shared by the main filter, its OR-filter and category rules.
	pub fn validate_fields(&self) -> Result<()> {
		for key in self.custom_fields.keys().chain(self.exclude.custom_fields.keys()) {
			validate_custom_field_key(key)?;
		}
		for key in &self.custom_stacks {
			validate_custom_field_key(key)?;
		}
		for field in self.missing_fields.keys() {
			if field.starts_with("customfield_") {
				validate_custom_field_key(field)?;
			}
		}
		for field in self.partial_match.keys() {
			if field.starts_with("customfield_") {
				validate_custom_field_key(field)?;
			}
		}
		for (name, range) in [
			("issue_created_range", self.issue_created_range),
			("issue_updated_range", self.issue_updated_range),
			("issue_due_range", self.issue_due_range),
			("issue_resolution_range", self.issue_resolution_range),
			("issue_released_range", self.issue_released_range),
			("snapshot_range", self.snapshot_range),
		] {
			if let Some(Range { gt: Some(gt), lt: Some(lt) }) = range
				&& gt >= lt
			{
				return Err(Error::invalid(format!("{name} lower bound must be below its upper bound.")));
			}
		}

		if let Some(or_filter) = &self.or_filter {
			if or_filter.or_filter.is_some() {
				return Err(Error::invalid("or_filter cannot be nested."));
			}

			or_filter.validate_fields()?;
		}

		Ok(())
	}
}

pub fn validate_custom_field_key(key: &str) -> Result<()> {
	if CUSTOM_FIELD_KEY.is_match(key) {
		Ok(())
	} else {
		Err(Error::invalid(format!("Invalid custom field key {key:?}.")))
	}
}

pub fn is_custom_field_key(key: &str) -> bool {
	CUSTOM_FIELD_KEY.is_match(key)
}

fn is_blank(value: Option<&str>) -> bool {
	value.map(|value| value.trim().is_empty()).unwrap_or(true)
}
