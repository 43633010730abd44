use chrono::Duration;
use serde::Deserialize;
use serde::Serialize;

use crate::query::Breakdown;
use crate::query::EventRef;
use crate::query::PropValueFilter;
use crate::query::QueryTime;
use crate::query::TimeIntervalUnit;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Funnel {
    pub time: QueryTime,
    pub steps: Vec<Step>,
    pub order: Order,
    pub time_window: TimeWindow,
    pub exclude: Option<Vec<Exclude>>,
    pub breakdown: Option<Breakdown>,
    pub filters: Option<Vec<PropValueFilter>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Step {
    pub events: Vec<Event>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub event: EventRef,
    pub filters: Option<Vec<PropValueFilter>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// steps must happen in order, other events may interleave
    Ordered,
    /// steps must happen in order with no other qualifying events in between
    Strict,
    /// steps may happen in any order
    Unordered,
}

/// Conversion window, counted from the first matched step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub n: usize,
    pub unit: TimeIntervalUnit,
}

impl TimeWindow {
    pub fn duration(&self) -> Duration {
        self.unit.duration(self.n as i64)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Exclude {
    pub event: Event,
    pub steps: Option<ExcludeSteps>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcludeSteps {
    All,
    Between(usize, usize),
}

impl ExcludeSteps {
    /// Resolves to a concrete `(from, to)` pair for a funnel of `steps_count` steps.
    pub fn range(&self, steps_count: usize) -> (usize, usize) {
        match self {
            ExcludeSteps::All => (0, steps_count.saturating_sub(1)),
            ExcludeSteps::Between(from, to) => (*from, *to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_steps_resolve() {
        assert_eq!(ExcludeSteps::All.range(4), (0, 3));
        assert_eq!(ExcludeSteps::All.range(1), (0, 0));
        assert_eq!(ExcludeSteps::Between(1, 2).range(4), (1, 2));
    }

    #[test]
    fn time_window_duration() {
        let window = TimeWindow {
            n: 2,
            unit: TimeIntervalUnit::Hour,
        };
        assert_eq!(window.duration(), Duration::hours(2));
    }
}
