use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use ahash::AHashMap;
use serde_json::{Value, json};

use jagg_config::Aggregation;
use jagg_domain::{Across, Calculation, IssueFilter};
use jagg_service::{
	AggService, AggregationRequest, AggregationStore, BoxFuture, Collaborators, Error,
	FieldCatalog, ListRequest, PriorityRanks, Result, RuleTicketCategorizer, StatusClassifier,
	StatusStageEvaluator,
};
use jagg_storage::{
	models::{DynamicRow, StatusCategory},
	params::ParamValue,
	sql::BoundQuery,
};

type Responder = dyn Fn(&BoundQuery) -> Result<(Duration, Vec<DynamicRow>)> + Send + Sync;

/// Answers every statement through `respond`, optionally after a delay.
struct FakeStore {
	respond: Box<Responder>,
	calls: AtomicUsize,
}
impl FakeStore {
	fn new<F>(respond: F) -> Self
	where
		F: Fn(&BoundQuery) -> Result<(Duration, Vec<DynamicRow>)> + Send + Sync + 'static,
	{
		Self { respond: Box::new(respond), calls: AtomicUsize::new(0) }
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl AggregationStore for FakeStore {
	fn fetch_rows<'a>(&'a self, query: &'a BoundQuery) -> BoxFuture<'a, Result<Vec<DynamicRow>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let response = (self.respond)(query);

		Box::pin(async move {
			let (delay, rows) = response?;

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			Ok(rows)
		})
	}
}

struct FakeMetadata {
	ranks: AHashMap<String, i64>,
	categories: Vec<(&'static str, &'static str)>,
}
impl PriorityRanks for FakeMetadata {
	fn ranks<'a>(&'a self, _: &'a [i64]) -> BoxFuture<'a, Result<AHashMap<String, i64>>> {
		Box::pin(async move { Ok(self.ranks.clone()) })
	}
}
impl FieldCatalog for FakeMetadata {
	fn field_type<'a>(&'a self, _: &'a str, _: &'a [i64]) -> BoxFuture<'a, Result<Option<String>>> {
		Box::pin(async move { Ok(None) })
	}
}
impl StatusClassifier for FakeMetadata {
	fn categories<'a>(&'a self, _: &'a [i64]) -> BoxFuture<'a, Result<Vec<StatusCategory>>> {
		let categories = self
			.categories
			.iter()
			.map(|(status, category)| StatusCategory {
				integration_id: 1,
				status: status.to_string(),
				status_category: category.to_string(),
			})
			.collect();

		Box::pin(async move { Ok(categories) })
	}
}

fn metadata() -> FakeMetadata {
	FakeMetadata {
		ranks: AHashMap::from_iter([("P1".to_string(), 0), ("P2".to_string(), 1), ("P3".to_string(), 2)]),
		categories: vec![("Open", "To Do"), ("In Progress", "In Progress"), ("Closed", "Done")],
	}
}

fn service(store: Arc<FakeStore>, settings: Aggregation) -> AggService {
	let metadata = Arc::new(metadata());
	let statuses: Arc<dyn StatusClassifier> = metadata.clone();
	let collaborators = Collaborators {
		priorities: metadata.clone(),
		fields: metadata,
		statuses: statuses.clone(),
		categorizer: Arc::new(RuleTicketCategorizer::new(settings.clone(), "acme")),
		velocity: Arc::new(StatusStageEvaluator::new(statuses)),
	};

	AggService::new(settings, "acme", store, collaborators)
}

fn row(value: Value) -> DynamicRow {
	let Value::Object(row) = value else {
		panic!("Expected an object.");
	};

	row
}

/// The single-valued text list pinned by a stacked pass, if any.
fn pinned(query: &BoundQuery) -> Option<String> {
	query.binds.iter().find_map(|value| match value {
		ParamValue::TextList(values) if values.len() == 1 => Some(values[0].clone()),
		_ => None,
	})
}

fn request(across: Across) -> AggregationRequest {
	AggregationRequest::new(IssueFilter {
		across: Some(across),
		calculation: Calculation::TicketCount,
		integration_ids: vec![1],
		..Default::default()
	})
}

#[tokio::test]
async fn stacked_results_keep_first_pass_order() {
	let store = Arc::new(FakeStore::new(|query| match pinned(query).as_deref() {
		None => Ok((Duration::ZERO, vec![
			row(json!({ "project": "A", "ct": 3 })),
			row(json!({ "project": "B", "ct": 2 })),
			row(json!({ "project": "C", "ct": 1 })),
		])),
		// Earlier buckets finish last.
		Some(key) => {
			let delay = match key {
				"A" => 60,
				"B" => 30,
				_ => 0,
			};

			Ok((Duration::from_millis(delay), vec![row(json!({ "status": format!("OPEN-{key}"), "ct": 1 }))]))
		},
	}));
	let service = service(store.clone(), Aggregation { stack_parallelism: 3, ..Default::default() });
	let page = service
		.stacked_group_by(&request(Across::Project), &[Across::Status])
		.await
		.expect("Stacked aggregation must succeed.");
	let keys = page.records.iter().map(|bucket| bucket.key.as_deref()).collect::<Vec<_>>();

	assert_eq!(keys, vec![Some("A"), Some("B"), Some("C")]);

	for bucket in &page.records {
		let key = bucket.key.as_deref().unwrap_or_default();
		let stacks = bucket.stacks.as_ref().expect("Every bucket carries its stacks.");

		assert_eq!(stacks.len(), 1);
		assert_eq!(stacks[0].key.as_deref(), Some(format!("OPEN-{key}").as_str()));
	}

	assert_eq!(store.calls(), 4);
}

#[tokio::test]
async fn one_failed_bucket_fails_the_whole_call() {
	let store = Arc::new(FakeStore::new(|query| match pinned(query).as_deref() {
		None => Ok((Duration::ZERO, vec![
			row(json!({ "project": "A", "ct": 3 })),
			row(json!({ "project": "B", "ct": 2 })),
			row(json!({ "project": "C", "ct": 1 })),
		])),
		Some("B") => Err(Error::Storage { message: "bucket B exploded".to_string() }),
		Some(key) => Ok((Duration::from_millis(20), vec![row(json!({ "status": key, "ct": 1 }))])),
	}));
	let service = service(store, Aggregation::default());
	let err = service
		.stacked_group_by(&request(Across::Project), &[Across::Status])
		.await
		.expect_err("Expected the bucket failure.");

	assert!(
		matches!(&err, Error::Storage { message } if message == "bucket B exploded"),
		"Unexpected error: {err}"
	);
}

#[tokio::test]
async fn bucket_without_a_stage_fails_stage_bounce_stacks() {
	let store = Arc::new(FakeStore::new(|query| match pinned(query) {
		None => Ok((Duration::ZERO, vec![
			row(json!({ "project": "A", "stage": "IN REVIEW", "ct": 3 })),
			// No stage to pin; its narrowed pass has an empty stages list.
			row(json!({ "project": "B", "ct": 2 })),
		])),
		Some(_) => Ok((Duration::ZERO, vec![row(json!({ "status": "OPEN", "ct": 1 }))])),
	}));
	let service = service(store, Aggregation::default());
	let mut request = request(Across::Project);

	request.filter.calculation = Calculation::StageBounceReport;
	request.filter.stages = vec!["IN REVIEW".to_string(), "QA".to_string()];

	let err = service
		.stacked_group_by(&request, &[Across::Status])
		.await
		.expect_err("Expected the stageless bucket to fail validation.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn unsupported_stack_returns_the_first_pass() {
	let store = Arc::new(FakeStore::new(|_| {
		Ok((Duration::ZERO, vec![row(json!({ "project": "A", "ct": 3 }))]))
	}));
	let service = service(store.clone(), Aggregation::default());
	let page = service
		.stacked_group_by(&request(Across::Project), &[Across::Sprint])
		.await
		.expect("First pass must succeed.");

	assert_eq!(page.total_count, 1);
	assert!(page.records[0].stacks.is_none());
	assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn priorities_follow_the_configured_rank() {
	let store = Arc::new(FakeStore::new(|_| {
		Ok((Duration::ZERO, vec![
			row(json!({ "priority": "P3", "ct": 9 })),
			row(json!({ "priority": "Custom", "ct": 7 })),
			row(json!({ "priority": "p1", "ct": 1 })),
		]))
	}));
	let service = service(store, Aggregation::default());
	let page = service
		.group_by_and_calculate(&request(Across::Priority))
		.await
		.expect("Aggregation must succeed.");
	let ranked = page
		.records
		.iter()
		.map(|bucket| (bucket.key.as_deref().unwrap_or_default(), bucket.priority_order))
		.collect::<Vec<_>>();

	assert_eq!(ranked, vec![("p1", Some(0)), ("P3", Some(2)), ("Custom", None)]);
}

#[tokio::test]
async fn bare_status_values_come_from_metadata() {
	let store = Arc::new(FakeStore::new(|_| Ok((Duration::ZERO, Vec::new()))));
	let service = service(store.clone(), Aggregation::default());
	let mut request = request(Across::Status);

	request.values_only = true;
	request.filter.exclude.status_categories = vec!["done".to_string()];

	let page = service.values(&request).await.expect("Values must resolve.");
	let keys = page.records.iter().filter_map(|bucket| bucket.key.as_deref()).collect::<Vec<_>>();

	assert_eq!(keys, vec!["In Progress", "Open"]);
	assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn invalid_filters_never_reach_the_store() {
	let store = Arc::new(FakeStore::new(|_| Ok((Duration::ZERO, Vec::new()))));
	let service = service(store.clone(), Aggregation::default());
	let mut request = request(Across::Assignee);

	request.filter.calculation = Calculation::StageBounceReport;

	let err = service.group_by_and_calculate(&request).await.expect_err("Expected invalid filter.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn listing_attaches_history_per_issue() {
	let store = Arc::new(FakeStore::new(|query| {
		let rows = if query.sql.contains("COUNT(*)::bigint AS ct") {
			vec![row(json!({ "ct": 42 }))]
		} else if query.sql.contains("jira_issue_statuses") {
			vec![
				row(json!({ "integration_id": 1, "issue_key": "LEV-2", "status": "DONE", "start_time": 20, "end_time": 30 })),
				row(json!({ "integration_id": 1, "issue_key": "LEV-2", "status": "OPEN", "start_time": 10, "end_time": 20 })),
			]
		} else if query.sql.contains("jira_issue_assignees") {
			vec![row(json!({ "integration_id": 1, "issue_key": "LEV-1", "assignee": "Ada", "start_time": 5, "end_time": 50 }))]
		} else {
			vec![
				row(json!({ "key": "LEV-2", "integration_id": 1, "status": "DONE" })),
				row(json!({ "key": "LEV-1", "integration_id": 1, "status": "OPEN" })),
			]
		};

		Ok((Duration::ZERO, rows))
	}));
	let service = service(store.clone(), Aggregation::default());
	let page = service
		.list(&ListRequest::new(IssueFilter { integration_ids: vec![1], ..Default::default() }))
		.await
		.expect("Listing must succeed.");

	assert_eq!(page.total_count, 42);
	assert_eq!(page.records[0].key(), Some("LEV-2"));
	assert_eq!(page.records[0].status_history.len(), 2);
	assert_eq!(page.records[0].status_history[0].status, "DONE");
	assert!(page.records[0].assignee_history.is_empty());
	assert_eq!(page.records[1].assignee_history[0].assignee, "Ada");
	assert_eq!(store.calls(), 4);
}
