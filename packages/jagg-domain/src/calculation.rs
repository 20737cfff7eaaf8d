use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Statistic computed per bucket.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Calculation {
	#[default]
	TicketCount,
	StoryPoints,
	Assignees,
	Priority,
	Hops,
	Bounces,
	Age,
	ResolutionTime,
	ResponseTime,
	AssignToResolve,
	StateTransitionTime,
	StageTimesReport,
	StageBounceReport,
	VelocityStageTimesReport,
	SprintMapping,
	SprintMappingCount,
}
impl Calculation {
	pub const ALL: [Self; 16] = [
		Self::TicketCount,
		Self::StoryPoints,
		Self::Assignees,
		Self::Priority,
		Self::Hops,
		Self::Bounces,
		Self::Age,
		Self::ResolutionTime,
		Self::ResponseTime,
		Self::AssignToResolve,
		Self::StateTransitionTime,
		Self::StageTimesReport,
		Self::StageBounceReport,
		Self::VelocityStageTimesReport,
		Self::SprintMapping,
		Self::SprintMappingCount,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::TicketCount => "ticket_count",
			Self::StoryPoints => "story_points",
			Self::Assignees => "assignees",
			Self::Priority => "priority",
			Self::Hops => "hops",
			Self::Bounces => "bounces",
			Self::Age => "age",
			Self::ResolutionTime => "resolution_time",
			Self::ResponseTime => "response_time",
			Self::AssignToResolve => "assign_to_resolve",
			Self::StateTransitionTime => "state_transition_time",
			Self::StageTimesReport => "stage_times_report",
			Self::StageBounceReport => "stage_bounce_report",
			Self::VelocityStageTimesReport => "velocity_stage_times_report",
			Self::SprintMapping => "sprint_mapping",
			Self::SprintMappingCount => "sprint_mapping_count",
		}
	}
}
impl fmt::Display for Calculation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Calculation {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let needle = value.trim().to_ascii_lowercase();

		Self::ALL
			.into_iter()
			.find(|calculation| calculation.as_str() == needle)
			.ok_or_else(|| Error::UnknownValue { kind: "calculation", value: value.to_string() })
	}
}
