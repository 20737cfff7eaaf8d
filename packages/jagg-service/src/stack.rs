//! Second-level breakdown of every first-pass bucket.
//!
//! Each bucket re-runs the pipeline with a filter pinned to the bucket's key and grouped by the
//! stack dimension. Workers run on a `JoinSet` gated by a semaphore; results land in the slot of
//! their bucket so the outer order never depends on completion order.

use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};

use jagg_domain::{
	AggregationBucket, AggregationPage, Across, Calculation, CustomFieldValue, IssueFilter, Range,
	SortEntry, SortOrder,
};

use crate::{AggService, AggregationRequest, Error, Result};

/// Filter for one bucket plus whether it still has to be computed over linked issues.
#[derive(Clone, Debug)]
pub(crate) struct Narrowing {
	pub(crate) filter: IssueFilter,
	pub(crate) linked: bool,
}

impl AggService {
	/// Runs the aggregation, then breaks every bucket down by the first of `stacks`.
	///
	/// Stack dimensions that cannot be stacked leave the first pass as is.
	pub async fn stacked_group_by(
		&self,
		request: &AggregationRequest,
		stacks: &[Across],
	) -> Result<AggregationPage> {
		let page = self.group_by_and_calculate(request).await?;
		let Some(&stack) = stacks.first() else {
			return Ok(page);
		};

		if !stack.is_stackable() {
			tracing::warn!(company = %self.schema, stack = %stack, "Stack dimension is not supported.");

			return Ok(page);
		}

		let filter = &request.filter;
		let across = filter.across()?;
		let custom_stack = match stack {
			Across::CustomField => Some(filter.custom_stacks.first().cloned().ok_or_else(|| {
				Error::invalid("custom_stacks must be present with custom_field as stack.")
			})?),
			_ => None,
		};

		tracing::info!(
			company = %self.schema,
			across = %across,
			stack = %stack,
			buckets = page.records.len(),
			"Stacked aggregation started."
		);

		let mut narrowings = Vec::with_capacity(page.records.len());

		for bucket in &page.records {
			narrowings.push(narrow(filter, across, stack, custom_stack.as_deref(), bucket)?);
		}

		let stacked = self.run_stacks(request, narrowings).await?;
		let records = page
			.records
			.into_iter()
			.zip(stacked)
			.map(|(mut bucket, stacks)| {
				bucket.stacks = Some(stacks);

				bucket
			})
			.collect::<Vec<_>>();

		tracing::info!(
			company = %self.schema,
			across = %across,
			stack = %stack,
			buckets = records.len(),
			"Stacked aggregation finished."
		);

		Ok(AggregationPage::new(records))
	}

	/// Computes every narrowing with bounded parallelism, preserving input order.
	///
	/// The first failure aborts the remaining workers and is returned unchanged.
	pub(crate) async fn run_stacks(
		&self,
		request: &AggregationRequest,
		narrowings: Vec<Narrowing>,
	) -> Result<Vec<Vec<AggregationBucket>>> {
		let semaphore = Arc::new(Semaphore::new(self.settings.stack_parallelism.max(1)));
		let mut slots: Vec<Option<Vec<AggregationBucket>>> = vec![None; narrowings.len()];
		let mut tasks = JoinSet::new();

		for (idx, narrowing) in narrowings.into_iter().enumerate() {
			let service = self.clone();
			let request = request.clone();
			let semaphore = semaphore.clone();

			tasks.spawn(async move {
				let _permit = semaphore
					.acquire_owned()
					.await
					.map_err(|err| Error::Worker { message: err.to_string() })?;
				let buckets = service.run_narrowed(&request, &narrowing).await?;

				Ok::<_, Error>((idx, buckets))
			});
		}

		while let Some(joined) = tasks.join_next().await {
			let outcome = joined.unwrap_or_else(|err| Err(Error::Worker { message: err.to_string() }));

			match outcome {
				Ok((idx, buckets)) => slots[idx] = Some(buckets),
				Err(err) => {
					tasks.abort_all();
					tracing::error!(error = %err, company = %self.schema, "Stacked aggregation failed.");

					return Err(err);
				},
			}
		}

		slots
			.into_iter()
			.map(|slot| {
				slot.ok_or_else(|| Error::Worker { message: "Stack worker produced no result.".to_string() })
			})
			.collect()
	}

	async fn run_narrowed(
		&self,
		request: &AggregationRequest,
		narrowing: &Narrowing,
	) -> Result<Vec<AggregationBucket>> {
		narrowing.filter.validate()?;

		if narrowing.linked {
			self.run(request, &request.filter, Some(&narrowing.filter), true).await
		} else {
			self.run(request, &narrowing.filter, None, true).await
		}
	}
}

/// Pins `across` to the bucket's key and switches the grouping to `stack`.
pub(crate) fn narrow(
	filter: &IssueFilter,
	across: Across,
	stack: Across,
	custom_stack: Option<&str>,
	bucket: &AggregationBucket,
) -> Result<Narrowing> {
	let mut narrowed = filter.clone();
	let key = bucket.key.clone();
	let pinned = |values: &mut Vec<String>| {
		let outer_empty = values.is_empty();

		if let Some(key) = &key {
			*values = vec![key.clone()];
		}

		outer_empty
	};
	// Correlation stays only when the caller already narrowed the pinned field.
	let redundant = match across {
		Across::Assignee => {
			let outer_empty = filter.assignees.is_empty() && !filter.unassigned;

			match &key {
				Some(key) => narrowed.assignees = vec![key.clone()],
				None => narrowed.unassigned = true,
			}

			narrowed.ignore_ou = true;

			outer_empty
		},
		Across::Reporter => {
			narrowed.ignore_ou = true;

			pinned(&mut narrowed.reporters)
		},
		Across::IssueType => pinned(&mut narrowed.issue_types),
		Across::Component => pinned(&mut narrowed.components),
		Across::FixVersion => pinned(&mut narrowed.fix_versions),
		Across::Version => pinned(&mut narrowed.versions),
		Across::Label => pinned(&mut narrowed.labels),
		Across::Priority => pinned(&mut narrowed.priorities),
		Across::Project => pinned(&mut narrowed.projects),
		Across::Status => pinned(&mut narrowed.statuses),
		Across::Epic => pinned(&mut narrowed.epics),
		Across::Parent => pinned(&mut narrowed.parent_keys),
		Across::FirstAssignee => pinned(&mut narrowed.first_assignees),
		Across::Resolution => pinned(&mut narrowed.resolutions),
		Across::StatusCategory => pinned(&mut narrowed.status_categories),
		Across::TicketCategory => pinned(&mut narrowed.ticket_categories),
		Across::Sprint => pinned(&mut narrowed.sprint_names),
		Across::CustomField => {
			let Some(field) = filter.custom_across.clone() else {
				return Err(Error::invalid("custom_across must be present with custom_field across."));
			};
			let outer_empty = filter.custom_fields.is_empty();

			narrowed
				.custom_fields
				.insert(field, CustomFieldValue::Values(key.clone().into_iter().collect()));

			outer_empty
		},
		Across::IssueCreated
		| Across::IssueUpdated
		| Across::IssueDue
		| Across::IssueDueRelative
		| Across::IssueResolved
		| Across::Trend => {
			pin_window(&mut narrowed, across, key.as_deref())?;

			filter.agg_interval.is_none()
		},
		other =>
			return Err(Error::unsupported(format!("Stacks are not available across {other}."))),
	};

	if filter.calculation == Calculation::StageBounceReport {
		narrowed.stages = bucket.stage.clone().into_iter().collect();
	}

	narrowed.across = Some(stack);
	narrowed.across_limit = None;
	narrowed.sort = vec![SortEntry::new(stack.as_str(), SortOrder::Asc)];

	if let Some(custom_stack) = custom_stack {
		narrowed.custom_across = Some(custom_stack.to_string());
	}

	let linked = filter.requires_links() && !redundant;

	if !linked {
		narrowed.links.clear();
		narrowed.exclude.links.clear();
	}

	Ok(Narrowing { filter: narrowed, linked })
}

/// Pins a time dimension to the bucket window `[key, key + interval)`.
fn pin_window(filter: &mut IssueFilter, across: Across, key: Option<&str>) -> Result<()> {
	let Some(key) = key else {
		return Err(Error::invalid(format!("A {across} bucket without a key cannot be stacked.")));
	};
	let start = key
		.parse::<i64>()
		.map_err(|_| Error::invalid(format!("Bucket key {key:?} is not an epoch timestamp.")))?;

	if across == Across::Trend {
		filter.ingested_at = Some(start);
		filter.ingested_at_by_integration.clear();
		filter.snapshot_range = None;

		return Ok(());
	}

	let end = filter.interval().window_end(start)?;
	let window = Some(Range::new(Some(start - 1), Some(end)));

	match across {
		Across::IssueCreated => filter.issue_created_range = window,
		Across::IssueUpdated => filter.issue_updated_range = window,
		Across::IssueDue | Across::IssueDueRelative => filter.issue_due_range = window,
		_ => filter.issue_resolution_range = window,
	}

	Ok(())
}
