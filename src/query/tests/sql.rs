use common::query::funnel::Event;
use common::query::funnel::Exclude;
use common::query::funnel::ExcludeSteps;
use common::query::funnel::Funnel;
use common::query::funnel::Order;
use common::query::funnel::Step;
use common::query::funnel::TimeWindow;
use common::query::Breakdown;
use common::query::EventRef;
use common::query::PropertyRef;
use common::query::QueryTime;
use common::query::TimeIntervalUnit;
use query::context::Context;
use query::queries;
use query::sql;
use query::test_util::dt;

fn step(name: &str) -> Step {
    Step {
        events: vec![Event {
            event: EventRef::RegularName(name.to_string()),
            filters: None,
        }],
    }
}

fn request(steps: Vec<&str>, order: Order) -> Funnel {
    Funnel {
        time: QueryTime::Between {
            from: dt("2023-01-01 00:00:00"),
            to: dt("2023-01-31 00:00:00"),
        },
        steps: steps.into_iter().map(step).collect(),
        order,
        time_window: TimeWindow {
            n: 1,
            unit: TimeIntervalUnit::Day,
        },
        exclude: None,
        breakdown: None,
        filters: None,
    }
}

fn ctx() -> Context {
    Context::new(dt("2023-02-01 00:00:00"))
}

#[test]
fn ordered_funnel_renders_window_chain() {
    let plan = queries::build(ctx(), request(vec!["A", "B", "C"], Order::Ordered)).unwrap();
    let sql = sql::render(&plan);

    assert!(sql.contains("toUnixTimestamp64Milli(ts) AS timestamp"));
    assert!(sql.contains("event = 'A' AS step_0"));
    assert!(sql.contains("ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW"));
    assert!(sql.contains("PARTITION BY actor_id ORDER BY timestamp DESC"));
    assert!(sql.contains("countIf(steps >= 2) AS count_2"));
    assert!(sql.contains("groupArrayIf(100)(DISTINCT actor_id, steps = 1) AS people_1"));
    assert!(sql.contains("GROUP BY actor_id"));
    assert!(sql.contains("WHERE step_0 = true"));
    assert!(sql.contains("ts >= toDateTime64('2023-01-01 00:00:00.000', 3)"));
}

#[test]
fn strict_funnel_renders_offset_frames() {
    let plan = queries::build(ctx(), request(vec!["A", "B", "C"], Order::Strict)).unwrap();
    let sql = sql::render(&plan);

    assert!(sql.contains("ROWS BETWEEN 1 PRECEDING AND 1 PRECEDING"));
    assert!(sql.contains("ROWS BETWEEN 2 PRECEDING AND 2 PRECEDING"));
    assert!(!sql.contains("UNION ALL"));
}

#[test]
fn unordered_funnel_renders_rotation_union() {
    let plan = queries::build(ctx(), request(vec!["A", "B"], Order::Unordered)).unwrap();
    let sql = sql::render(&plan);

    // one branch per rotation
    assert_eq!(sql.matches("UNION ALL").count(), 1);
    assert!(sql.contains("event = 'B' AS step_0"));
    assert!(sql.contains("arraySort(["));
    assert!(sql.contains("HAVING steps = max(max_steps)"));
}

#[test]
fn exclusion_renders_flag_and_predicate() {
    let mut req = request(vec!["A", "B"], Order::Ordered);
    req.exclude = Some(vec![Exclude {
        event: Event {
            event: EventRef::RegularName("X".to_string()),
            filters: None,
        },
        steps: Some(ExcludeSteps::Between(0, 1)),
    }]);
    let plan = queries::build(ctx(), req).unwrap();
    let sql = sql::render(&plan);

    assert!(sql.contains("event = 'X' AS exclusion_0"));
    assert!(sql.contains("AS exclusion"));
    assert!(sql.contains("exclusion = 0"));
}

#[test]
fn breakdown_renders_prop_column_and_grouping() {
    let mut req = request(vec!["A", "B"], Order::Ordered);
    req.breakdown = Some(Breakdown::Property(PropertyRef::User("country".to_string())));
    let plan = queries::build(ctx(), req).unwrap();
    let sql = sql::render(&plan);

    assert!(sql.contains("user_country AS prop"));
    assert!(sql.contains("PARTITION BY actor_id, prop"));
    assert!(sql.ends_with("GROUP BY prop"));
}

#[test]
fn string_values_are_escaped() {
    let mut req = request(vec!["A"], Order::Ordered);
    req.steps[0].events[0].event = EventRef::RegularName("it's a trap".to_string());
    let plan = queries::build(ctx(), req).unwrap();
    let sql = sql::render(&plan);

    assert!(sql.contains("event = 'it\\'s a trap'"));
}
