//! Non-aggregated listing: one page of filtered issues with their status and assignee history.

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use jagg_domain::IssueFilter;
use jagg_storage::{models::DynamicRow, params::Params, sql};

use crate::{
	AggService, Error, OrgUnitResolver, Result,
	assembler::Compiler,
	joins::Derived,
};

#[derive(Clone, Default)]
pub struct ListRequest {
	pub filter: IssueFilter,
	/// Zero-based.
	pub page: u32,
	/// Falls back to the configured default page size.
	pub page_size: Option<u32>,
	pub org_unit: Option<Arc<dyn OrgUnitResolver>>,
}
impl ListRequest {
	pub fn new(filter: IssueFilter) -> Self {
		Self { filter, ..Default::default() }
	}
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StatusSpan {
	pub status: String,
	pub start_time: i64,
	pub end_time: i64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AssigneeSpan {
	pub assignee: String,
	pub start_time: i64,
	pub end_time: i64,
}

/// An issue row as stored, plus its history newest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IssueRecord {
	#[serde(flatten)]
	pub issue: DynamicRow,
	pub status_history: Vec<StatusSpan>,
	pub assignee_history: Vec<AssigneeSpan>,
}
impl IssueRecord {
	pub fn key(&self) -> Option<&str> {
		self.issue.get("key").and_then(Value::as_str)
	}

	pub fn integration_id(&self) -> Option<i64> {
		self.issue.get("integration_id").and_then(Value::as_i64)
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IssuePage {
	pub records: Vec<IssueRecord>,
	pub total_count: usize,
}

/// Identifies one issue across integrations.
type IssueRef = (i64, String);

impl AggService {
	/// Lists the filtered issues page by page with their history attached.
	///
	/// Statuses named in `exclude.stages` are left out of the status history.
	pub async fn list(&self, request: &ListRequest) -> Result<IssuePage> {
		let filter = &request.filter;

		filter.validate_fields()?;

		let page_size = request.page_size.unwrap_or(self.settings.default_page_size).max(1);
		let derived = Derived::default();
		let compiler = Compiler {
			settings: &self.settings,
			schema: &self.schema,
			now: OffsetDateTime::now_utc().unix_timestamp(),
			org_unit: request.org_unit.as_deref(),
			categorizer: self.collaborators.categorizer.as_ref(),
			derived: &derived,
			stacking: false,
		};
		let plan = compiler.compile_list(filter, request.page, page_size)?;
		let rows = self.execute(&plan.rows).await?;
		let total_count = self
			.execute(&plan.count)
			.await?
			.first()
			.and_then(|row| row.get("ct"))
			.and_then(Value::as_u64)
			.unwrap_or_default() as usize;
		let mut records = rows
			.into_iter()
			.map(|issue| IssueRecord { issue, ..Default::default() })
			.collect::<Vec<_>>();

		self.attach_history(&mut records, &filter.exclude.stages).await?;

		tracing::info!(
			company = %self.schema,
			page = request.page,
			records = records.len(),
			total_count,
			"Issue listing finished."
		);

		Ok(IssuePage { records, total_count })
	}

	async fn attach_history(&self, records: &mut [IssueRecord], excluded_statuses: &[String]) -> Result<()> {
		let Some((keys, integration_ids)) = page_refs(records) else {
			return Ok(());
		};
		let mut params = Params::new();
		let issue_keys = params.bind("issue_keys", keys);
		let ids = params.bind("integration_ids", integration_ids);
		let mut status_sql = format!(
			"SELECT integration_id, issue_key, status, start_time, end_time FROM \
			 {}.jira_issue_statuses WHERE issue_key = ANY({issue_keys}) AND integration_id = \
			 ANY({ids})",
			self.schema
		);

		if !excluded_statuses.is_empty() {
			let excluded = params.bind(
				"excluded_statuses",
				excluded_statuses.iter().map(|status| status.to_uppercase()).collect::<Vec<_>>(),
			);

			status_sql.push_str(&format!(" AND UPPER(status) <> ALL({excluded})"));
		}

		status_sql.push_str(" ORDER BY start_time DESC");

		let assignee_sql = format!(
			"SELECT integration_id, issue_key, assignee, start_time, end_time FROM \
			 {}.jira_issue_assignees WHERE issue_key = ANY({issue_keys}) AND integration_id = \
			 ANY({ids}) ORDER BY start_time DESC",
			self.schema
		);
		let statuses = self.store.fetch_rows(&sql::bind(&status_sql, &params)?).await?;
		let assignees = self.store.fetch_rows(&sql::bind(&assignee_sql, &params)?).await?;
		let mut statuses = group_spans::<StatusSpan>(statuses)?;
		let mut assignees = group_spans::<AssigneeSpan>(assignees)?;

		for record in records.iter_mut() {
			let (Some(integration_id), Some(key)) = (record.integration_id(), record.key()) else {
				continue;
			};
			let issue: IssueRef = (integration_id, key.to_string());

			record.status_history = statuses.remove(&issue).unwrap_or_default();
			record.assignee_history = assignees.remove(&issue).unwrap_or_default();
		}

		Ok(())
	}
}

/// Distinct issue keys and integration ids of a page, or `None` for an empty page.
fn page_refs(records: &[IssueRecord]) -> Option<(Vec<String>, Vec<i64>)> {
	let mut keys = records.iter().filter_map(IssueRecord::key).map(str::to_string).collect::<Vec<_>>();
	let mut integration_ids = records.iter().filter_map(IssueRecord::integration_id).collect::<Vec<_>>();

	if keys.is_empty() {
		return None;
	}

	keys.sort();
	keys.dedup();
	integration_ids.sort_unstable();
	integration_ids.dedup();

	Some((keys, integration_ids))
}

/// Groups history rows by issue, keeping the row order.
fn group_spans<T>(rows: Vec<DynamicRow>) -> Result<AHashMap<IssueRef, Vec<T>>>
where
	T: for<'de> Deserialize<'de>,
{
	let mut grouped: AHashMap<IssueRef, Vec<T>> = AHashMap::new();

	for row in rows {
		let integration_id = row.get("integration_id").and_then(Value::as_i64);
		let issue_key = row.get("issue_key").and_then(Value::as_str).map(str::to_string);
		let (Some(integration_id), Some(issue_key)) = (integration_id, issue_key) else {
			continue;
		};
		let span = serde_json::from_value::<T>(Value::Object(row))
			.map_err(|err| Error::Storage { message: format!("Malformed history row: {err}.") })?;

		grouped.entry((integration_id, issue_key)).or_default().push(span);
	}

	Ok(grouped)
}
