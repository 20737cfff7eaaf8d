//! Custom-field, partial-match and missing-field predicates.
//!
//! Custom field keys are validated as `customfield_<digits>` before compilation, so they are
//! inlined as literals.

use std::collections::BTreeMap;

use jagg_domain::{CustomFieldValue, IssueFilter, filter};

use super::{Emit, Partition};
use crate::{Error, Result};

const ARRAY_COLUMNS: [(&str, &str); 8] = [
	("component", "components"),
	("components", "components"),
	("label", "labels"),
	("labels", "labels"),
	("version", "versions"),
	("versions", "versions"),
	("fix_version", "fix_versions"),
	("fix_versions", "fix_versions"),
];

pub(super) fn custom_fields(
	fields: &BTreeMap<String, CustomFieldValue>,
	name: &str,
	negate: bool,
	e: &mut Emit<'_>,
) {
	let q = e.q;

	for (idx, (key, value)) in fields.iter().enumerate() {
		let predicate = match value {
			CustomFieldValue::Values(values) if values.is_empty() => continue,
			CustomFieldValue::Values(values) => {
				let values = e.param(&format!("{name}_{idx}"), values.clone());

				format!(
					"({q}custom_fields->>'{key}' = ANY({values}) OR {q}custom_fields->'{key}' ?| \
					 {values})"
				)
			},
			CustomFieldValue::Range(range) => {
				let mut bounds = Vec::new();

				if let Some(gt) = range.gt {
					let gt = e.param(&format!("{name}_{idx}_gt"), gt);

					bounds.push(format!("({q}custom_fields->>'{key}')::float8 > {gt}"));
				}
				if let Some(lt) = range.lt {
					let lt = e.param(&format!("{name}_{idx}_lt"), lt);

					bounds.push(format!("({q}custom_fields->>'{key}')::float8 < {lt}"));
				}
				if bounds.is_empty() {
					continue;
				}

				format!("({})", bounds.join(" AND "))
			},
		};

		if negate {
			e.out.push(Partition::Issues, format!("NOT COALESCE({predicate}, FALSE)"));
		} else {
			e.out.push(Partition::Issues, predicate);
		}
	}
}

pub(super) fn partial_matches(f: &IssueFilter, e: &mut Emit<'_>) -> Result<()> {
	let q = e.q;

	for (idx, (field, matcher)) in f.partial_match.iter().enumerate() {
		let patterns = matcher.patterns();

		if patterns.is_empty() {
			continue;
		}

		let target = if filter::is_custom_field_key(field) {
			Target::Scalar(format!("{q}custom_fields->>'{field}'"))
		} else if let Some((_, column)) = ARRAY_COLUMNS.iter().find(|(name, _)| *name == field.as_str()) {
			Target::Array(format!("{q}{column}"))
		} else {
			Target::Scalar(format!("{q}{}", scalar_column(field)?))
		};
		let patterns = e.param(&format!("partial_{idx}"), patterns);
		let predicate = match target {
			Target::Scalar(column) => format!("{column} LIKE ALL({patterns})"),
			Target::Array(column) => format!(
				"EXISTS (SELECT 1 FROM UNNEST({column}) AS partial_value WHERE partial_value LIKE \
				 ALL({patterns}))"
			),
		};

		e.out.push(Partition::Issues, predicate);
	}

	Ok(())
}

pub(super) fn missing_fields(f: &IssueFilter, e: &mut Emit<'_>) -> Result<()> {
	let q = e.q;

	for (field, should_be_missing) in &f.missing_fields {
		let predicate = if filter::is_custom_field_key(field) {
			if *should_be_missing {
				format!("NOT ({q}custom_fields ? '{field}')")
			} else {
				format!("{q}custom_fields ? '{field}'")
			}
		} else if let Some((_, column)) = ARRAY_COLUMNS.iter().find(|(name, _)| *name == field.as_str()) {
			let op = if *should_be_missing { "=" } else { ">" };

			format!("cardinality({q}{column}) {op} 0")
		} else {
			let column = missing_column(field)?;
			let op = if *should_be_missing { "IS NULL" } else { "IS NOT NULL" };

			format!("{q}{column} {op}")
		};

		e.out.push(Partition::Issues, predicate);
	}

	Ok(())
}

enum Target {
	Scalar(String),
	Array(String),
}

fn scalar_column(field: &str) -> Result<&'static str> {
	let column = match field {
		"key" => "key",
		"summary" => "summary",
		"project" => "project",
		"status" => "status",
		"priority" => "priority",
		"issue_type" => "issue_type",
		"assignee" => "assignee",
		"reporter" => "reporter",
		"epic" => "epic",
		"parent_key" => "parent_key",
		"resolution" => "resolution",
		"status_category" => "status_category",
		"first_assignee" => "first_assignee",
		_ => return Err(Error::invalid(format!("Partial match is not supported on {field:?}."))),
	};

	Ok(column)
}

fn missing_column(field: &str) -> Result<&'static str> {
	let column = match field {
		"priority" => "priority",
		"status" => "status",
		"resolution" => "resolution",
		"epic" => "epic",
		"parent" | "parent_key" => "parent_key",
		"assignee" => "assignee_id",
		"reporter" => "reporter_id",
		"first_assignee" => "first_assignee_id",
		"issue_due" | "due_date" => "issue_due_at",
		"issue_resolved" | "resolution_date" => "issue_resolved_at",
		"first_comment" => "first_comment_at",
		"story_points" => "story_points",
		_ => return Err(Error::invalid(format!("Missing-field check is not supported on {field:?}."))),
	};

	Ok(column)
}
