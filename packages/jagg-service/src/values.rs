//! Distinct grouping values without aggregates.

use std::collections::BTreeSet;

use jagg_domain::{AggregationBucket, AggregationPage, Across, IssueFilter};

use crate::{AggService, AggregationRequest, Result};

impl AggService {
	/// Distinct values of the grouping dimension among the filtered issues.
	///
	/// Statuses of an otherwise unfiltered request come from the status metadata instead of the
	/// issue rows.
	pub async fn values(&self, request: &AggregationRequest) -> Result<AggregationPage> {
		let filter = &request.filter;

		filter.validate()?;

		if serves_from_metadata(filter) {
			let categories = self.collaborators.statuses.categories(&filter.integration_ids).await?;
			let statuses = categories
				.into_iter()
				.filter(|category| {
					matches_any(&filter.status_categories, &category.status_category, true)
						&& !matches_any(&filter.exclude.status_categories, &category.status_category, false)
						&& !filter.exclude.integration_ids.contains(&i64::from(category.integration_id))
				})
				.map(|category| category.status)
				.collect::<BTreeSet<_>>();

			tracing::debug!(company = %self.schema, values = statuses.len(), "Status values read from metadata.");

			return Ok(AggregationPage::new(statuses.into_iter().map(AggregationBucket::keyed).collect()));
		}

		let values_only = AggregationRequest { values_only: true, ..request.clone() };
		let buckets = self.run(&values_only, filter, None, false).await?;

		Ok(AggregationPage::new(buckets))
	}
}

fn serves_from_metadata(filter: &IssueFilter) -> bool {
	filter.across == Some(Across::Status)
		&& !filter.narrows_issues()
		&& filter.ingested_at.is_none()
		&& filter.ingested_at_by_integration.is_empty()
		&& filter.snapshot_range.is_none()
}

/// Case-insensitive membership; an empty list matches `when_empty`.
fn matches_any(values: &[String], value: &str, when_empty: bool) -> bool {
	if values.is_empty() {
		return when_empty;
	}

	values.iter().any(|candidate| candidate.eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_bare_status_requests_use_metadata() {
		let mut filter = IssueFilter {
			across: Some(Across::Status),
			integration_ids: vec![1],
			status_categories: vec!["Done".to_string()],
			..Default::default()
		};

		assert!(serves_from_metadata(&filter));

		filter.ingested_at = Some(10);

		assert!(!serves_from_metadata(&filter));

		filter.ingested_at = None;
		filter.projects = vec!["LEV".to_string()];

		assert!(!serves_from_metadata(&filter));

		filter.projects.clear();
		filter.across = Some(Across::Priority);

		assert!(!serves_from_metadata(&filter));
	}

	#[test]
	fn category_lists_match_case_insensitively() {
		assert!(matches_any(&[], "DONE", true));
		assert!(!matches_any(&[], "DONE", false));
		assert!(matches_any(&["done".to_string()], "DONE", false));
		assert!(!matches_any(&["To Do".to_string()], "DONE", true));
	}
}
