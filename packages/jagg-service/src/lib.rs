pub mod aggregate;
pub mod categorize;
pub mod list;
pub mod stack;
pub mod store;
pub mod values;

mod assembler;
mod calculation;
mod conditions;
mod dimension;
mod error;
mod joins;
mod postprocess;
mod sort;

use std::{future::Future, pin::Pin, sync::Arc};

use ahash::AHashMap;

use jagg_config::Aggregation;
use jagg_domain::{IssueFilter, VelocityConfig};
use jagg_storage::{
	models::{DynamicRow, StatusCategory},
	params::Params,
	sql::BoundQuery,
};

pub use categorize::{RuleTicketCategorizer, StatusStageEvaluator};
pub use error::{Error, Result};
pub use list::{AssigneeSpan, IssuePage, IssueRecord, ListRequest, StatusSpan};
pub use store::PgStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes compiled statements.
pub trait AggregationStore
where
	Self: Send + Sync,
{
	fn fetch_rows<'a>(&'a self, query: &'a BoundQuery) -> BoxFuture<'a, Result<Vec<DynamicRow>>>;
}

/// Default-scheme priority order, keyed by upper-cased priority name. Lower is more urgent.
pub trait PriorityRanks
where
	Self: Send + Sync,
{
	fn ranks<'a>(&'a self, integration_ids: &'a [i64]) -> BoxFuture<'a, Result<AHashMap<String, i64>>>;
}

pub trait FieldCatalog
where
	Self: Send + Sync,
{
	fn field_type<'a>(
		&'a self,
		field_key: &'a str,
		integration_ids: &'a [i64],
	) -> BoxFuture<'a, Result<Option<String>>>;
}

/// Maps raw statuses to their category per integration.
pub trait StatusClassifier
where
	Self: Send + Sync,
{
	fn categories<'a>(
		&'a self,
		integration_ids: &'a [i64],
	) -> BoxFuture<'a, Result<Vec<StatusCategory>>>;
}

/// Produces the SQL expression that yields `ticket_category` for an issue row.
pub trait TicketCategorizer
where
	Self: Send + Sync,
{
	fn category_expression(
		&self,
		filter: &IssueFilter,
		now: i64,
		params: &mut Params,
	) -> Result<String>;
}

/// Produces the SQL expression that yields `velocity_stage` for a status-history row.
pub trait VelocityStageEvaluator
where
	Self: Send + Sync,
{
	fn stage_expression<'a>(
		&'a self,
		config: &'a VelocityConfig,
		integration_ids: &'a [i64],
		params: &'a mut Params,
	) -> BoxFuture<'a, Result<StageExpression>>;
}

/// Org-unit membership, rendered as a predicate over a user column.
pub trait OrgUnitResolver
where
	Self: Send + Sync,
{
	/// `None` leaves the caller's own id list in effect.
	fn user_condition(
		&self,
		field: OrgUnitField,
		column: &str,
		params: &mut Params,
	) -> Option<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrgUnitField {
	Assignee,
	Reporter,
}

#[derive(Clone, Debug, Default)]
pub struct StageExpression {
	/// `CASE` expression over the `state` column of the status-history join.
	pub expression: String,
	/// Upper-cased statuses of the stage right before the release stage, when one is configured.
	pub release_from_statuses: Vec<String>,
	pub release_stage: Option<String>,
}

#[derive(Clone)]
pub struct Collaborators {
	pub priorities: Arc<dyn PriorityRanks>,
	pub fields: Arc<dyn FieldCatalog>,
	pub statuses: Arc<dyn StatusClassifier>,
	pub categorizer: Arc<dyn TicketCategorizer>,
	pub velocity: Arc<dyn VelocityStageEvaluator>,
}
impl Collaborators {
	/// Lookups served by `store`, with the rule-based evaluators on top.
	pub fn postgres(store: Arc<PgStore>, settings: &Aggregation) -> Self {
		let statuses: Arc<dyn StatusClassifier> = store.clone();
		let categorizer = RuleTicketCategorizer::new(settings.clone(), store.schema.clone());

		Self {
			priorities: store.clone(),
			fields: store,
			statuses: statuses.clone(),
			categorizer: Arc::new(categorizer),
			velocity: Arc::new(StatusStageEvaluator::new(statuses)),
		}
	}
}

#[derive(Clone, Default)]
pub struct AggregationRequest {
	pub filter: IssueFilter,
	/// Distinct grouping values only, no aggregates.
	pub values_only: bool,
	pub velocity: Option<VelocityConfig>,
	pub org_unit: Option<Arc<dyn OrgUnitResolver>>,
}
impl AggregationRequest {
	pub fn new(filter: IssueFilter) -> Self {
		Self { filter, ..Default::default() }
	}
}

#[derive(Clone)]
pub struct AggService {
	pub settings: Aggregation,
	/// Tenant schema holding the issue tables.
	pub schema: String,
	pub store: Arc<dyn AggregationStore>,
	pub collaborators: Collaborators,
}
impl AggService {
	pub fn new(
		settings: Aggregation,
		schema: impl Into<String>,
		store: Arc<dyn AggregationStore>,
		collaborators: Collaborators,
	) -> Self {
		Self { settings, schema: schema.into(), store, collaborators }
	}

	/// Service over a Postgres pool using the default collaborators.
	pub fn postgres(settings: Aggregation, store: PgStore) -> Self {
		let store = Arc::new(store);
		let collaborators = Collaborators::postgres(store.clone(), &settings);
		let schema = store.schema.clone();

		Self { settings, schema, store, collaborators }
	}
}
