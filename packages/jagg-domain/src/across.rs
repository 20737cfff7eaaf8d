use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Grouping dimension of an aggregation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Across {
	None,
	Project,
	Priority,
	Resolution,
	IssueType,
	Status,
	StatusCategory,
	Epic,
	Parent,
	Assignee,
	Reporter,
	FirstAssignee,
	Component,
	Label,
	Version,
	FixVersion,
	Sprint,
	SprintMapping,
	Stage,
	VelocityStage,
	TicketCategory,
	CustomField,
	Trend,
	IssueCreated,
	IssueUpdated,
	IssueDue,
	IssueDueRelative,
	IssueResolved,
}
impl Across {
	pub const ALL: [Self; 28] = [
		Self::None,
		Self::Project,
		Self::Priority,
		Self::Resolution,
		Self::IssueType,
		Self::Status,
		Self::StatusCategory,
		Self::Epic,
		Self::Parent,
		Self::Assignee,
		Self::Reporter,
		Self::FirstAssignee,
		Self::Component,
		Self::Label,
		Self::Version,
		Self::FixVersion,
		Self::Sprint,
		Self::SprintMapping,
		Self::Stage,
		Self::VelocityStage,
		Self::TicketCategory,
		Self::CustomField,
		Self::Trend,
		Self::IssueCreated,
		Self::IssueUpdated,
		Self::IssueDue,
		Self::IssueDueRelative,
		Self::IssueResolved,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Project => "project",
			Self::Priority => "priority",
			Self::Resolution => "resolution",
			Self::IssueType => "issue_type",
			Self::Status => "status",
			Self::StatusCategory => "status_category",
			Self::Epic => "epic",
			Self::Parent => "parent",
			Self::Assignee => "assignee",
			Self::Reporter => "reporter",
			Self::FirstAssignee => "first_assignee",
			Self::Component => "component",
			Self::Label => "label",
			Self::Version => "version",
			Self::FixVersion => "fix_version",
			Self::Sprint => "sprint",
			Self::SprintMapping => "sprint_mapping",
			Self::Stage => "stage",
			Self::VelocityStage => "velocity_stage",
			Self::TicketCategory => "ticket_category",
			Self::CustomField => "custom_field",
			Self::Trend => "trend",
			Self::IssueCreated => "issue_created",
			Self::IssueUpdated => "issue_updated",
			Self::IssueDue => "issue_due",
			Self::IssueDueRelative => "issue_due_relative",
			Self::IssueResolved => "issue_resolved",
		}
	}

	/// Dimensions bucketed on a calendar interval of an epoch-seconds column.
	pub fn is_time_based(self) -> bool {
		matches!(
			self,
			Self::Trend
				| Self::IssueCreated
				| Self::IssueUpdated
				| Self::IssueDue
				| Self::IssueDueRelative
				| Self::IssueResolved
		)
	}

	/// Dimensions keyed on a user id with the display name as additional key.
	pub fn is_user(self) -> bool {
		matches!(self, Self::Assignee | Self::Reporter | Self::FirstAssignee)
	}

	/// Dimensions that may be requested as the second grouping of a stacked aggregation.
	pub fn is_stackable(self) -> bool {
		matches!(
			self,
			Self::FixVersion
				| Self::IssueType
				| Self::Component
				| Self::Assignee
				| Self::Reporter
				| Self::Priority
				| Self::Project
				| Self::Version
				| Self::Status
				| Self::Epic
				| Self::Parent
				| Self::Label
				| Self::CustomField
				| Self::FirstAssignee
				| Self::Resolution
				| Self::StatusCategory
				| Self::TicketCategory
				| Self::IssueCreated
				| Self::IssueResolved
				| Self::IssueUpdated
				| Self::Trend
		)
	}

	/// Dimensions whose rows lack the attribute must be dropped rather than bucketed as null.
	pub fn requires_non_null(self) -> Option<&'static str> {
		match self {
			Self::Epic => Some("epic"),
			Self::Parent => Some("parent_key"),
			Self::IssueDue | Self::IssueDueRelative => Some("issue_due_at"),
			Self::IssueResolved => Some("issue_resolved_at"),
			_ => None,
		}
	}
}
impl fmt::Display for Across {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Across {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let needle = value.trim().to_ascii_lowercase();

		Self::ALL
			.into_iter()
			.find(|across| across.as_str() == needle)
			.ok_or_else(|| Error::UnknownValue { kind: "across", value: value.to_string() })
	}
}
