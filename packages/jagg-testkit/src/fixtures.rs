//! Row seeding helpers for the reference issue schema.

use sqlx::PgPool;
use uuid::Uuid;

use crate::Result;

/// One `jira_issues` snapshot row. Unset columns take the table defaults.
#[derive(Clone, Debug)]
pub struct IssueSeed {
	pub key: String,
	pub integration_id: i32,
	pub project: String,
	pub status: String,
	pub status_category: Option<String>,
	pub priority: Option<String>,
	pub issue_type: Option<String>,
	pub assignee: Option<String>,
	pub assignee_id: Option<Uuid>,
	pub labels: Vec<String>,
	pub components: Vec<String>,
	pub story_points: Option<i32>,
	pub issue_created_at: i64,
	pub issue_resolved_at: Option<i64>,
	pub issue_due_at: Option<i64>,
	pub first_assigned_at: Option<i64>,
	pub first_assignee: Option<String>,
	pub ingested_at: i64,
}
impl IssueSeed {
	pub fn new(key: &str, status: &str, ingested_at: i64) -> Self {
		Self {
			key: key.to_string(),
			integration_id: 1,
			project: "LEV".to_string(),
			status: status.to_string(),
			status_category: None,
			priority: None,
			issue_type: Some("TASK".to_string()),
			assignee: None,
			assignee_id: None,
			labels: Vec::new(),
			components: Vec::new(),
			story_points: None,
			issue_created_at: ingested_at - 86_400 * 30,
			issue_resolved_at: None,
			issue_due_at: None,
			first_assigned_at: None,
			first_assignee: None,
			ingested_at,
		}
	}

	pub fn assigned(mut self, name: &str, id: Uuid) -> Self {
		self.assignee = Some(name.to_string());
		self.assignee_id = Some(id);

		self
	}

	/// Marks the first assignment `seconds` after creation, by the current assignee when set.
	pub fn assigned_after(mut self, seconds: i64) -> Self {
		self.first_assigned_at = Some(self.issue_created_at + seconds);
		self.first_assignee = self.assignee.clone();

		self
	}

	pub fn due_at(mut self, due_at: i64) -> Self {
		self.issue_due_at = Some(due_at);

		self
	}

	pub fn estimated(mut self, story_points: i32) -> Self {
		self.story_points = Some(story_points);

		self
	}

	pub fn labelled(mut self, labels: &[&str]) -> Self {
		self.labels = labels.iter().map(|label| label.to_string()).collect();

		self
	}

	pub fn prioritized(mut self, priority: &str) -> Self {
		self.priority = Some(priority.to_string());

		self
	}

	pub fn resolved_after(mut self, seconds: i64) -> Self {
		self.issue_resolved_at = Some(self.issue_created_at + seconds);

		self
	}
}

pub async fn insert_issues(pool: &PgPool, schema: &str, seeds: &[IssueSeed]) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO {schema}.jira_issues (
	key, integration_id, project, status, status_category, priority, issue_type, assignee,
	assignee_id, labels, components, story_points, issue_created_at, issue_resolved_at,
	issue_due_at, first_assigned_at, first_assignee, ingested_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
	);

	for seed in seeds {
		sqlx::query(&sql)
			.bind(&seed.key)
			.bind(seed.integration_id)
			.bind(&seed.project)
			.bind(&seed.status)
			.bind(seed.status_category.as_deref())
			.bind(seed.priority.as_deref())
			.bind(seed.issue_type.as_deref())
			.bind(seed.assignee.as_deref())
			.bind(seed.assignee_id)
			.bind(&seed.labels)
			.bind(&seed.components)
			.bind(seed.story_points)
			.bind(seed.issue_created_at)
			.bind(seed.issue_resolved_at)
			.bind(seed.issue_due_at)
			.bind(seed.first_assigned_at)
			.bind(seed.first_assignee.as_deref())
			.bind(seed.ingested_at)
			.execute(pool)
			.await?;
	}

	Ok(())
}

pub async fn insert_priority(
	pool: &PgPool,
	schema: &str,
	integration_id: i32,
	priority: &str,
	priority_order: i32,
) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO {schema}.jira_issue_priorities (integration_id, priority, priority_order)
VALUES ($1, $2, $3)"
	);

	sqlx::query(&sql)
		.bind(integration_id)
		.bind(priority)
		.bind(priority_order)
		.execute(pool)
		.await?;

	Ok(())
}

pub async fn insert_status_category(
	pool: &PgPool,
	schema: &str,
	integration_id: i32,
	status: &str,
	status_category: &str,
) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO {schema}.jira_status_metadata (integration_id, status_id, status, status_category)
VALUES ($1, $2, $3, $4)"
	);

	sqlx::query(&sql)
		.bind(integration_id)
		.bind(status.to_lowercase())
		.bind(status)
		.bind(status_category)
		.execute(pool)
		.await?;

	Ok(())
}

/// One status-history span of an issue.
pub async fn insert_status_span(
	pool: &PgPool,
	schema: &str,
	seed: &IssueSeed,
	status: &str,
	start_time: i64,
	end_time: i64,
) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO {schema}.jira_issue_statuses (issue_key, integration_id, status, start_time, end_time)
VALUES ($1, $2, $3, $4, $5)"
	);

	sqlx::query(&sql)
		.bind(&seed.key)
		.bind(seed.integration_id)
		.bind(status)
		.bind(start_time)
		.bind(end_time)
		.execute(pool)
		.await?;

	Ok(())
}

/// One assignee-history span of an issue.
pub async fn insert_assignee_span(
	pool: &PgPool,
	schema: &str,
	seed: &IssueSeed,
	assignee: &str,
	start_time: i64,
	end_time: i64,
) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO {schema}.jira_issue_assignees (issue_key, integration_id, assignee, start_time, end_time)
VALUES ($1, $2, $3, $4, $5)"
	);

	sqlx::query(&sql)
		.bind(&seed.key)
		.bind(seed.integration_id)
		.bind(assignee)
		.bind(start_time)
		.bind(end_time)
		.execute(pool)
		.await?;

	Ok(())
}
