//! Budget period arithmetic.
//!
//! A budget window always ends "today" (UTC) and starts at the beginning of
//! the current period, so budgets report spend-to-date rather than a sealed
//! historical window.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Rolling,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BudgetPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    fn step(self) -> Option<Step> {
        match self {
            Self::Rolling => None,
            Self::Weekly => Some(Step::Days(7)),
            Self::Biweekly => Some(Step::Days(14)),
            Self::Monthly => Some(Step::Months(1)),
            Self::Quarterly => Some(Step::Months(3)),
            Self::Yearly => Some(Step::Months(12)),
        }
    }
}

impl TryFrom<&str> for BudgetPeriod {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "rolling" => Ok(Self::Rolling),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(EngineError::Configuration(format!(
                "invalid budget period: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Days(i64),
    Months(i64),
}

/// How a budget's window is derived.
///
/// `rolling_days` is required for [`BudgetPeriod::Rolling`], `anchor_date`
/// for every fixed cadence. The other field is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub period: BudgetPeriod,
    pub rolling_days: Option<u32>,
    pub anchor_date: Option<NaiveDate>,
}

impl PeriodDefinition {
    pub fn rolling(days: u32) -> Self {
        Self {
            period: BudgetPeriod::Rolling,
            rolling_days: Some(days),
            anchor_date: None,
        }
    }

    pub fn anchored(period: BudgetPeriod, anchor_date: NaiveDate) -> Self {
        Self {
            period,
            rolling_days: None,
            anchor_date: Some(anchor_date),
        }
    }

    /// Checks that the fields required by `period` are present.
    pub fn validate(&self) -> ResultEngine<()> {
        match self.period {
            BudgetPeriod::Rolling => match self.rolling_days {
                Some(days) if days > 0 => Ok(()),
                Some(_) => Err(EngineError::Configuration(
                    "rolling period day count must be > 0".to_string(),
                )),
                None => Err(EngineError::Configuration(
                    "rolling period requires a day count".to_string(),
                )),
            },
            period => {
                if self.anchor_date.is_none() {
                    return Err(EngineError::Configuration(format!(
                        "{} period requires an anchor date",
                        period.as_str()
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Inclusive calendar date range `[start, end]` in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Resolves the current window of a budget period as of `now`.
///
/// Fixed cadences advance the anchor by the number of whole steps elapsed
/// until today. Month lengths differ, so the advanced anchor can overshoot
/// today near month ends; in that case the start moves back one period.
pub fn resolve_window(definition: &PeriodDefinition, now: DateTime<Utc>) -> ResultEngine<DateWindow> {
    definition.validate()?;
    let today = now.date_naive();

    let Some(step) = definition.period.step() else {
        let days = definition.rolling_days.unwrap_or_default();
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| EngineError::Configuration("rolling window out of range".to_string()))?;
        return Ok(DateWindow { start, end: today });
    };

    let anchor = definition
        .anchor_date
        .ok_or_else(|| EngineError::Configuration("missing anchor date".to_string()))?;

    let elapsed = match step {
        Step::Days(size) => (today - anchor).num_days().div_euclid(size),
        Step::Months(size) => months_between(anchor, today).div_euclid(size),
    };

    let mut start = advance(anchor, step, elapsed)?;
    if start > today {
        start = advance(anchor, step, elapsed - 1)?;
    }

    Ok(DateWindow { start, end: today })
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    use chrono::Datelike;

    (i64::from(to.year()) - i64::from(from.year())) * 12 + i64::from(to.month())
        - i64::from(from.month())
}

/// Moves `anchor` by `count` steps (negative moves backwards), always from
/// the anchor itself so that day-of-month clamping never accumulates.
fn advance(anchor: NaiveDate, step: Step, count: i64) -> ResultEngine<NaiveDate> {
    let out_of_range = || EngineError::Configuration("budget period out of range".to_string());

    match step {
        Step::Days(size) => {
            let days = size.checked_mul(count).ok_or_else(out_of_range)?;
            let magnitude = Days::new(days.unsigned_abs());
            if days >= 0 {
                anchor.checked_add_days(magnitude)
            } else {
                anchor.checked_sub_days(magnitude)
            }
        }
        Step::Months(size) => {
            let months = size.checked_mul(count).ok_or_else(out_of_range)?;
            let magnitude = Months::new(u32::try_from(months.unsigned_abs()).map_err(|_| out_of_range())?);
            if months >= 0 {
                anchor.checked_add_months(magnitude)
            } else {
                anchor.checked_sub_months(magnitude)
            }
        }
    }
    .ok_or_else(out_of_range)
}
