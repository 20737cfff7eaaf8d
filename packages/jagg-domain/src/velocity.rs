use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Stage assigned to statuses that no configured stage claims once the issue is done.
pub const IGNORE_TERMINAL_STAGE: &str = "Ignore_Terminal_Stage";

/// Which fix version end date closes the release stage when an issue ships in several.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePreference {
	#[default]
	Min,
	Max,
}
impl ReleasePreference {
	pub fn as_sql(self) -> &'static str {
		match self {
			Self::Min => "MIN",
			Self::Max => "MAX",
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VelocityStage {
	pub name: String,
	pub order: i32,
	/// Raw statuses that belong to the stage.
	#[serde(default)]
	pub statuses: Vec<String>,
	/// Status categories whose statuses belong to the stage.
	#[serde(default)]
	pub status_categories: Vec<String>,
	/// Stage measured from the previous stage until the fix version ships.
	#[serde(default)]
	pub release: bool,
}

/// Ordered delivery pipeline used by the velocity report.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct VelocityConfig {
	pub stages: Vec<VelocityStage>,
	#[serde(default)]
	pub prefer_release: ReleasePreference,
}
impl VelocityConfig {
	pub fn validate(&self) -> Result<()> {
		if self.stages.is_empty() {
			return Err(Error::InvalidFilter {
				message: "velocity config must define at least one stage.".to_string(),
			});
		}

		for (idx, stage) in self.stages.iter().enumerate() {
			if stage.name.trim().is_empty() {
				return Err(Error::InvalidFilter {
					message: "velocity stage names must be non-empty.".to_string(),
				});
			}
			if self.stages[..idx].iter().any(|other| other.name == stage.name) {
				return Err(Error::InvalidFilter {
					message: format!("velocity stage {:?} is defined twice.", stage.name),
				});
			}
			if !stage.release && stage.statuses.is_empty() && stage.status_categories.is_empty() {
				return Err(Error::InvalidFilter {
					message: format!("velocity stage {:?} matches no status.", stage.name),
				});
			}
		}

		if self.stages.iter().filter(|stage| stage.release).count() > 1 {
			return Err(Error::InvalidFilter {
				message: "velocity config may define at most one release stage.".to_string(),
			});
		}

		Ok(())
	}

	/// Stages sorted by their configured order.
	pub fn ordered(&self) -> Vec<&VelocityStage> {
		let mut stages = self.stages.iter().collect::<Vec<_>>();

		stages.sort_by_key(|stage| stage.order);

		stages
	}

	pub fn release_stage(&self) -> Option<&VelocityStage> {
		self.stages.iter().find(|stage| stage.release)
	}

	/// The non-release stage immediately before the release stage.
	pub fn stage_before_release(&self) -> Option<&VelocityStage> {
		let release = self.release_stage()?;

		self.ordered()
			.into_iter()
			.rev()
			.find(|stage| !stage.release && stage.order < release.order)
	}

	pub fn order_of(&self, name: &str) -> Option<i32> {
		self.stages.iter().find(|stage| stage.name == name).map(|stage| stage.order)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn stage(name: &str, order: i32, statuses: &[&str]) -> VelocityStage {
		VelocityStage {
			name: name.to_string(),
			order,
			statuses: statuses.iter().map(|status| status.to_string()).collect(),
			status_categories: Vec::new(),
			release: false,
		}
	}

	#[test]
	fn release_stage_follows_previous_order() {
		let mut release = stage("Release", 3, &[]);

		release.release = true;

		let config = VelocityConfig {
			stages: vec![stage("Review", 2, &["IN REVIEW"]), release, stage("Dev", 1, &["IN PROGRESS"])],
			prefer_release: ReleasePreference::Min,
		};

		config.validate().expect("Config must be valid.");

		assert_eq!(
			config.ordered().iter().map(|stage| stage.name.as_str()).collect::<Vec<_>>(),
			vec!["Dev", "Review", "Release"]
		);
		assert_eq!(config.stage_before_release().map(|stage| stage.name.as_str()), Some("Review"));
	}

	#[test]
	fn duplicate_and_empty_stages_are_rejected() {
		let config =
			VelocityConfig { stages: vec![stage("Dev", 1, &["A"]), stage("Dev", 2, &["B"])], ..Default::default() };

		assert!(config.validate().is_err());

		let config = VelocityConfig { stages: vec![stage("Dev", 1, &[])], ..Default::default() };

		assert!(config.validate().is_err());
		assert!(VelocityConfig::default().validate().is_err());
	}
}
