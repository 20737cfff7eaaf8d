use time::OffsetDateTime;

use jagg_domain::{
	AggregationBucket, AggregationPage, Across, Calculation, IssueFilter,
	velocity::IGNORE_TERMINAL_STAGE,
};
use jagg_storage::models::DynamicRow;

use crate::{
	AggService, AggregationRequest, Result,
	assembler::{self, CompiledQuery, Compiler},
	joins::{Derived, JoinNeeds, Release},
	postprocess,
};

impl AggService {
	/// Groups the filtered issues by `across` and computes the requested calculation per bucket.
	pub async fn group_by_and_calculate(&self, request: &AggregationRequest) -> Result<AggregationPage> {
		request.filter.validate()?;

		if request.values_only {
			return self.values(request).await;
		}

		let buckets = self.run(request, &request.filter, None, false).await?;

		tracing::info!(
			company = %self.schema,
			across = %request.filter.across()?,
			calculation = %request.filter.calculation,
			buckets = buckets.len(),
			"Aggregation finished."
		);

		Ok(AggregationPage::new(buckets))
	}

	/// Compiles, executes and post-processes one pass.
	///
	/// `narrowed` carries the per-bucket filter of a stacked pass over linked issues; the
	/// grouping then comes from it while `filter` still selects the primary issues.
	pub(crate) async fn run(
		&self,
		request: &AggregationRequest,
		filter: &IssueFilter,
		narrowed: Option<&IssueFilter>,
		stacking: bool,
	) -> Result<Vec<AggregationBucket>> {
		let grouping = narrowed.unwrap_or(filter);
		let across = grouping.across()?;
		let velocity_report = grouping.calculation == Calculation::VelocityStageTimesReport;
		let report_filter;
		let filter = if velocity_report {
			let mut excluded = filter.clone();

			excluded.exclude.velocity_stages.push(IGNORE_TERMINAL_STAGE.to_string());
			report_filter = excluded;

			&report_filter
		} else {
			filter
		};
		let derived = self.derive(request, filter, narrowed).await?;
		let compiler = Compiler {
			settings: &self.settings,
			schema: &self.schema,
			now: OffsetDateTime::now_utc().unix_timestamp(),
			org_unit: request.org_unit.as_deref(),
			categorizer: self.collaborators.categorizer.as_ref(),
			derived: &derived,
			stacking,
		};
		let compiled = if velocity_report {
			compiler.compile_velocity(filter)?
		} else if let Some(narrowed) = narrowed {
			compiler.compile_stacked(filter, narrowed)?
		} else {
			compiler.compile(filter, request.values_only)?
		};
		let rows = self.execute(&compiled).await?;
		let mut buckets =
			rows.iter().map(|row| assembler::to_bucket(row, &compiled.shape)).collect::<Vec<_>>();

		if across == Across::Priority && !request.values_only && !buckets.is_empty() {
			let ranks = self.collaborators.priorities.ranks(&grouping.integration_ids).await?;

			postprocess::rank_priorities(&mut buckets, &ranks, compiled.shape.explicit_sort);
		}
		if velocity_report && let Some(config) = &request.velocity {
			postprocess::order_velocity_stages(&mut buckets, config);
		}

		Ok(buckets)
	}

	/// Collaborator lookups the compiled query depends on.
	async fn derive(
		&self,
		request: &AggregationRequest,
		filter: &IssueFilter,
		narrowed: Option<&IssueFilter>,
	) -> Result<Derived> {
		let grouping = narrowed.unwrap_or(filter);
		let mut derived = Derived::default();

		if grouping.across()? == Across::CustomField
			&& let Some(key) = grouping.custom_across.as_deref()
		{
			derived.custom_field_type =
				self.collaborators.fields.field_type(key, &grouping.integration_ids).await?;
		}

		let needs_stages = grouping.calculation == Calculation::VelocityStageTimesReport
			|| grouping.across()? == Across::VelocityStage
			|| JoinNeeds::from_filter(filter).velocity_stage
			|| narrowed.is_some_and(|narrowed| JoinNeeds::from_filter(narrowed).velocity_stage);

		if needs_stages && let Some(config) = &request.velocity {
			let stages = self
				.collaborators
				.velocity
				.stage_expression(config, &filter.integration_ids, &mut derived.params)
				.await?;

			if stages.release_stage.is_some() && !stages.release_from_statuses.is_empty() {
				derived.release = Some(Release {
					from_statuses: stages.release_from_statuses,
					preference: config.prefer_release,
				});
			}

			derived.velocity_stage = Some(stages.expression);
		}

		Ok(derived)
	}

	pub(crate) async fn execute(&self, compiled: &CompiledQuery) -> Result<Vec<DynamicRow>> {
		let bound = compiled.bind()?;
		let fingerprint = bound.fingerprint();

		tracing::debug!(
			company = %self.schema,
			fingerprint = %fingerprint,
			sql = %bound.sql,
			"Executing aggregation query."
		);

		match self.store.fetch_rows(&bound).await {
			Ok(rows) => Ok(rows),
			Err(err) => {
				tracing::error!(
					error = %err,
					company = %self.schema,
					fingerprint = %fingerprint,
					sql = %bound.sql,
					params = ?compiled.params,
					"Aggregation query failed."
				);

				Err(err)
			},
		}
	}
}
