use chrono::DateTime;
use chrono::Utc;
use common::query::funnel::Funnel;
use sha2::Digest;
use sha2::Sha256;

use crate::error::Result;

/// Cache key for a funnel request with its resolved time range. Relative
/// ranges hash by their resolved bounds, so "last 7 days" keys move as
/// time passes.
pub fn fingerprint(req: &Funnel, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(req)?);
    hasher.update(from.timestamp_millis().to_be_bytes());
    hasher.update(to.timestamp_millis().to_be_bytes());

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;
    use common::query::funnel::Funnel;
    use common::query::funnel::Order;
    use common::query::funnel::Step;
    use common::query::funnel::TimeWindow;
    use common::query::EventRef;
    use common::query::QueryTime;
    use common::query::TimeIntervalUnit;

    use super::*;

    fn req() -> Funnel {
        let from = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap();
        Funnel {
            time: QueryTime::Between { from, to },
            steps: vec![Step {
                events: vec![common::query::funnel::Event {
                    event: EventRef::RegularName("View".to_string()),
                    filters: None,
                }],
            }],
            order: Order::Ordered,
            time_window: TimeWindow {
                n: 1,
                unit: TimeIntervalUnit::Day,
            },
            exclude: None,
            breakdown: None,
            filters: None,
        }
    }

    #[test]
    fn stable_for_equal_requests() {
        let from = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            fingerprint(&req(), from, to).unwrap(),
            fingerprint(&req(), from, to).unwrap()
        );
    }

    #[test]
    fn changes_with_resolved_range() {
        let from = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap();
        assert_ne!(
            fingerprint(&req(), from, to).unwrap(),
            fingerprint(&req(), from, later).unwrap()
        );
    }
}
