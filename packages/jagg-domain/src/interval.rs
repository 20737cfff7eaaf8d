use serde::{Deserialize, Serialize};
use time::{Duration, Month, OffsetDateTime, util};

use crate::{Error, Result};

/// Calendar granularity for time-bucketed dimensions.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggInterval {
	#[default]
	Day,
	Week,
	Biweekly,
	Month,
	Quarter,
	Year,
	DayOfWeek,
}
impl AggInterval {
	/// Unknown or blank intervals fall back to `day`.
	pub fn parse_lenient(value: Option<&str>) -> Self {
		match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
			Some("week") => Self::Week,
			Some("biweekly") => Self::Biweekly,
			Some("month") => Self::Month,
			Some("quarter") => Self::Quarter,
			Some("year") => Self::Year,
			Some("day_of_week") => Self::DayOfWeek,
			_ => Self::Day,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Day => "day",
			Self::Week => "week",
			Self::Biweekly => "biweekly",
			Self::Month => "month",
			Self::Quarter => "quarter",
			Self::Year => "year",
			Self::DayOfWeek => "day_of_week",
		}
	}

	/// Exclusive end of the bucket window that starts at `start` (epoch seconds, UTC).
	///
	/// Months are added on the calendar with day-of-month clamping. `day_of_week` buckets are
	/// not contiguous windows and cannot be pinned.
	pub fn window_end(self, start: i64) -> Result<i64> {
		let start_at = OffsetDateTime::from_unix_timestamp(start)
			.map_err(|_| Error::invalid(format!("Bucket start {start} is out of range.")))?;
		let end_at = match self {
			Self::Day => start_at + Duration::days(1),
			Self::Week => start_at + Duration::days(7),
			Self::Biweekly => start_at + Duration::days(14),
			Self::Month => add_months(start_at, 1)?,
			Self::Quarter => add_months(start_at, 3)?,
			Self::Year => add_months(start_at, 12)?,
			Self::DayOfWeek =>
				return Err(Error::Unsupported {
					message: "day_of_week buckets cannot be pinned to a time window.".to_string(),
				}),
		};

		Ok(end_at.unix_timestamp())
	}
}

fn add_months(at: OffsetDateTime, months: u8) -> Result<OffsetDateTime> {
	let zero_based = at.month() as i32 - 1 + months as i32;
	let year = at.year() + zero_based.div_euclid(12);
	let month = Month::try_from((zero_based.rem_euclid(12) + 1) as u8)
		.map_err(|err| Error::invalid(err.to_string()))?;
	let day = at.day().min(util::days_in_year_month(year, month));

	at.replace_day(1)
		.and_then(|at| at.replace_year(year))
		.and_then(|at| at.replace_month(month))
		.and_then(|at| at.replace_day(day))
		.map_err(|err| Error::invalid(err.to_string()))
}
