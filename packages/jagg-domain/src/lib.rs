pub mod across;
pub mod bucket;
pub mod calculation;
pub mod filter;
pub mod interval;
pub mod velocity;

mod error;

pub use across::Across;
pub use bucket::{AggregationBucket, AggregationPage};
pub use calculation::Calculation;
pub use error::{Error, Result};
pub use filter::{
	CustomFieldValue, Exclusions, Hygiene, HygieneSpecs, IssueFilter, PartialMatch, Range,
	SortEntry, SortOrder, SprintMappingFilter, TicketCategoryRule,
};
pub use interval::AggInterval;
pub use velocity::{ReleasePreference, VelocityConfig, VelocityStage};

/// Assignee value stored for issues nobody owns.
pub const UNASSIGNED: &str = "_UNASSIGNED_";
