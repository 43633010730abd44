use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use chronoutil::RelativeDuration;
use serde::Deserialize;
use serde::Serialize;

use crate::scalar::ScalarValue;

pub mod funnel;

#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq)]
pub enum PropertyRef {
    User(String),
    Event(String),
}

impl PropertyRef {
    pub fn name(&self) -> String {
        match self {
            PropertyRef::User(name) => name.clone(),
            PropertyRef::Event(name) => name.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum EventRef {
    RegularName(String),
    Regular(u64),
}

impl EventRef {
    pub fn name(&self) -> String {
        match self {
            EventRef::RegularName(name) => name.to_owned(),
            EventRef::Regular(id) => id.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum PropValueOperation {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    True,
    False,
    Exists,
    Empty,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum PropValueFilter {
    Property {
        property: PropertyRef,
        operation: PropValueOperation,
        value: Option<Vec<ScalarValue>>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Breakdown {
    Property(PropertyRef),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum QueryTime {
    Between {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    From(DateTime<Utc>),
    Last {
        last: i64,
        unit: TimeIntervalUnit,
    },
}

impl QueryTime {
    pub fn range(&self, cur_time: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            QueryTime::Between { from, to } => (*from, *to),
            QueryTime::From(from) => (*from, cur_time),
            QueryTime::Last { last, unit } => (cur_time - unit.relative_duration(*last), cur_time),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum TimeIntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeIntervalUnit {
    pub fn duration(&self, n: i64) -> Duration {
        match self {
            TimeIntervalUnit::Second => Duration::seconds(n),
            TimeIntervalUnit::Minute => Duration::minutes(n),
            TimeIntervalUnit::Hour => Duration::hours(n),
            TimeIntervalUnit::Day => Duration::days(n),
            TimeIntervalUnit::Week => Duration::weeks(n),
            TimeIntervalUnit::Month => Duration::days(n * 31),
            TimeIntervalUnit::Year => Duration::days(n * 31 * 12),
        }
    }

    pub fn relative_duration(&self, n: i64) -> RelativeDuration {
        match self {
            TimeIntervalUnit::Second => RelativeDuration::seconds(n),
            TimeIntervalUnit::Minute => RelativeDuration::minutes(n),
            TimeIntervalUnit::Hour => RelativeDuration::hours(n),
            TimeIntervalUnit::Day => RelativeDuration::days(n),
            TimeIntervalUnit::Week => RelativeDuration::weeks(n),
            TimeIntervalUnit::Month => RelativeDuration::months(n as i32),
            TimeIntervalUnit::Year => RelativeDuration::years(n as i32),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TimeIntervalUnit::Second => "second",
            TimeIntervalUnit::Minute => "minute",
            TimeIntervalUnit::Hour => "hour",
            TimeIntervalUnit::Day => "day",
            TimeIntervalUnit::Week => "week",
            TimeIntervalUnit::Month => "month",
            TimeIntervalUnit::Year => "year",
        }
    }
}
