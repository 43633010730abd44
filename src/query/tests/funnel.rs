use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

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
use common::scalar::ScalarValue;
use query::context::Context;
use query::error::QueryError;
use query::funnel::FunnelProvider;
use query::queries;
use query::test_util::dt;
use query::test_util::event;
use query::test_util::event_with_props;
use query::test_util::BackendFailEngine;
use query::test_util::IdentityResolver;
use query::test_util::MapResolver;
use query::test_util::MemoryCache;
use query::test_util::MemoryEngine;
use query::test_util::TestEvent;
use query::test_util::TimeoutEngine;
use tracing_test::traced_test;

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

fn exclude(name: &str, steps: Option<ExcludeSteps>) -> Exclude {
    Exclude {
        event: Event {
            event: EventRef::RegularName(name.to_string()),
            filters: None,
        },
        steps,
    }
}

fn provider(events: Vec<TestEvent>) -> (FunnelProvider, Arc<MemoryEngine>) {
    let engine = Arc::new(MemoryEngine::new(events));
    let provider = FunnelProvider::new(
        engine.clone(),
        Arc::new(MemoryCache::new()),
        Arc::new(IdentityResolver),
    );
    (provider, engine)
}

fn ctx() -> Context {
    Context::new(dt("2023-02-01 00:00:00"))
}

#[tokio::test]
async fn single_step_counts_distinct_actors() {
    let (provider, _) = provider(vec![
        event("a1", "2023-01-02 10:00:00", "View"),
        event("a1", "2023-01-02 11:00:00", "View"),
        event("a2", "2023-01-02 12:00:00", "View"),
    ]);

    let resp = provider.funnel(ctx(), request(vec!["View"], Order::Ordered)).await.unwrap();

    assert_eq!(resp.funnels.len(), 1);
    let steps = &resp.funnels[0].steps;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].count, 2);
    assert_eq!(steps[0].average_conversion_time, None);
    assert!(steps[0].sample_actor_ids.contains(&"a1".to_string()));
    assert!(steps[0].sample_actor_ids.contains(&"a2".to_string()));
}

#[tokio::test]
async fn ordered_funnel_counts_dropoff() {
    let (provider, _) = provider(vec![
        event("a1", "2023-01-02 10:00:00", "Signup"),
        event("a1", "2023-01-02 10:10:00", "Activate"),
        event("a1", "2023-01-02 10:20:00", "Purchase"),
        event("a2", "2023-01-02 11:00:00", "Signup"),
        event("a2", "2023-01-02 11:30:00", "Activate"),
        event("a3", "2023-01-02 12:00:00", "Activate"),
    ]);

    let resp = provider
        .funnel(ctx(), request(vec!["Signup", "Activate", "Purchase"], Order::Ordered))
        .await
        .unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 2);
    assert_eq!(steps[1].count, 2);
    assert_eq!(steps[2].count, 1);
    assert_eq!(steps[1].average_conversion_time, Some(1200.0));
    assert_eq!(steps[2].average_conversion_time, Some(600.0));
    assert_eq!(steps[2].sample_actor_ids, vec!["a1".to_string()]);
    assert!(steps[0].sample_actor_ids.contains(&"a2".to_string()));
    assert!(!steps[0].sample_actor_ids.contains(&"a3".to_string()));
}

#[tokio::test]
async fn strict_order_breaks_on_interleaved_event() {
    let events = vec![
        event("a1", "2023-01-02 10:00:00", "A"),
        event("a1", "2023-01-02 10:05:00", "D"),
        event("a1", "2023-01-02 10:10:00", "B"),
        event("a1", "2023-01-02 10:15:00", "C"),
        event("a2", "2023-01-02 11:00:00", "A"),
        event("a2", "2023-01-02 11:05:00", "B"),
        event("a2", "2023-01-02 11:10:00", "C"),
    ];

    let (ordered, _) = provider(events.clone());
    let resp = ordered
        .funnel(ctx(), request(vec!["A", "B", "C"], Order::Ordered))
        .await
        .unwrap();
    assert_eq!(resp.funnels[0].steps[2].count, 2);

    let (strict, _) = provider(events);
    let resp = strict
        .funnel(ctx(), request(vec!["A", "B", "C"], Order::Strict))
        .await
        .unwrap();
    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 2);
    assert_eq!(steps[1].count, 1);
    assert_eq!(steps[2].count, 1);
    assert_eq!(steps[2].sample_actor_ids, vec!["a2".to_string()]);
}

#[tokio::test]
async fn exclusion_event_disqualifies_actor() {
    let events = vec![
        event("a1", "2023-01-02 10:00:00", "Signup"),
        event("a1", "2023-01-02 10:05:00", "Refund"),
        event("a1", "2023-01-02 10:10:00", "Purchase"),
        event("a2", "2023-01-02 11:00:00", "Signup"),
        event("a2", "2023-01-02 11:10:00", "Purchase"),
        // refund after the conversion completed, must not disqualify
        event("a3", "2023-01-02 12:00:00", "Signup"),
        event("a3", "2023-01-02 12:10:00", "Purchase"),
        event("a3", "2023-01-02 12:20:00", "Refund"),
    ];

    let (without_exclusion, _) = provider(events.clone());
    let resp = without_exclusion
        .funnel(ctx(), request(vec!["Signup", "Purchase"], Order::Ordered))
        .await
        .unwrap();
    assert_eq!(resp.funnels[0].steps[1].count, 3);

    let mut req = request(vec!["Signup", "Purchase"], Order::Ordered);
    req.exclude = Some(vec![exclude("Refund", Some(ExcludeSteps::Between(0, 1)))]);
    let (with_exclusion, _) = provider(events);
    let resp = with_exclusion.funnel(ctx(), req).await.unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 2);
    assert_eq!(steps[1].count, 2);
    assert!(!steps[0].sample_actor_ids.contains(&"a1".to_string()));
    assert!(steps[1].sample_actor_ids.contains(&"a3".to_string()));
}

#[tokio::test]
async fn conversion_times_average_across_actors() {
    let (provider, _) = provider(vec![
        event("a1", "2023-01-02 10:00:00", "A"),
        event("a1", "2023-01-02 10:00:30", "B"),
        event("a2", "2023-01-02 11:00:00", "A"),
        event("a2", "2023-01-02 11:01:30", "B"),
    ]);

    let resp = provider
        .funnel(ctx(), request(vec!["A", "B"], Order::Ordered))
        .await
        .unwrap();

    assert_eq!(resp.funnels[0].steps[1].average_conversion_time, Some(60.0));
}

#[tokio::test]
async fn conversion_window_cuts_off_late_steps() {
    let (provider, _) = provider(vec![
        event("a1", "2023-01-02 10:00:00", "A"),
        event("a1", "2023-01-04 10:00:00", "B"),
    ]);

    let resp = provider
        .funnel(ctx(), request(vec!["A", "B"], Order::Ordered))
        .await
        .unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 1);
    assert_eq!(steps[1].count, 0);
}

#[tokio::test]
async fn unordered_funnel_accepts_any_order() {
    let (provider, _) = provider(vec![
        event("a1", "2023-01-02 10:00:00", "B"),
        event("a1", "2023-01-02 10:05:00", "A"),
        event("a2", "2023-01-02 11:00:00", "A"),
    ]);

    let resp = provider
        .funnel(ctx(), request(vec!["A", "B"], Order::Unordered))
        .await
        .unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 2);
    assert_eq!(steps[1].count, 1);
}

#[tokio::test]
async fn unordered_three_steps_complete_in_reverse() {
    let (provider, _) = provider(vec![
        event("a1", "2023-01-02 09:00:00", "C"),
        event("a1", "2023-01-02 09:10:00", "A"),
        event("a1", "2023-01-02 09:20:00", "B"),
    ]);

    let resp = provider
        .funnel(ctx(), request(vec!["A", "B", "C"], Order::Unordered))
        .await
        .unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 1);
    assert_eq!(steps[1].count, 1);
    assert_eq!(steps[2].count, 1);
}

#[tokio::test]
async fn sampled_actor_list_is_truncated() {
    let events = (0..105)
        .map(|i| event(&format!("a{i}"), "2023-01-02 10:00:00", "View"))
        .collect();
    let (provider, _) = provider(events);

    let resp = provider
        .funnel(ctx(), request(vec!["View"], Order::Ordered))
        .await
        .unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 105);
    assert_eq!(steps[0].sample_actor_ids.len(), 100);
}

#[tokio::test]
async fn step_event_filters_are_applied() {
    let (provider, _) = provider(vec![
        event_with_props("a1", "2023-01-02 10:00:00", "Purchase", vec![(
            "product",
            ScalarValue::from("pro"),
        )]),
        event_with_props("a2", "2023-01-02 11:00:00", "Purchase", vec![(
            "product",
            ScalarValue::from("free"),
        )]),
    ]);

    let mut req = request(vec!["Purchase"], Order::Ordered);
    req.steps[0].events[0].filters = Some(vec![common::query::PropValueFilter::Property {
        property: PropertyRef::Event("product".to_string()),
        operation: common::query::PropValueOperation::Eq,
        value: Some(vec![ScalarValue::from("pro")]),
    }]);

    let resp = provider.funnel(ctx(), req).await.unwrap();

    let steps = &resp.funnels[0].steps;
    assert_eq!(steps[0].count, 1);
    assert_eq!(steps[0].sample_actor_ids, vec!["a1".to_string()]);
}

#[tokio::test]
#[traced_test]
async fn breakdown_groups_and_resolves_labels() {
    let events = vec![
        event_with_props("a1", "2023-01-02 10:00:00", "A", vec![(
            "country",
            ScalarValue::from("us"),
        )]),
        event_with_props("a1", "2023-01-02 10:05:00", "B", vec![(
            "country",
            ScalarValue::from("us"),
        )]),
        event_with_props("a2", "2023-01-02 11:00:00", "A", vec![(
            "country",
            ScalarValue::from("de"),
        )]),
    ];
    let engine = Arc::new(MemoryEngine::new(events));
    let provider = FunnelProvider::new(
        engine,
        Arc::new(MemoryCache::new()),
        Arc::new(MapResolver::new(vec![("us", "United States")])),
    );

    let mut req = request(vec!["A", "B"], Order::Ordered);
    req.breakdown = Some(Breakdown::Property(PropertyRef::User("country".to_string())));
    let resp = provider.funnel(ctx(), req).await.unwrap();

    assert_eq!(resp.funnels.len(), 2);
    let us = resp
        .funnels
        .iter()
        .find(|f| f.breakdown.as_deref() == Some("United States"))
        .unwrap();
    assert_eq!(us.steps[0].count, 1);
    assert_eq!(us.steps[1].count, 1);

    // label for "de" is unknown, so the raw value stays
    let de = resp
        .funnels
        .iter()
        .find(|f| f.breakdown.as_deref() == Some("de"))
        .unwrap();
    assert_eq!(de.steps[0].count, 1);
    assert_eq!(de.steps[1].count, 0);
    assert!(logs_contain("breakdown label resolution failed"));
}

#[tokio::test]
async fn cached_response_is_reused() {
    let (provider, engine) = provider(vec![event("a1", "2023-01-02 10:00:00", "View")]);
    let req = request(vec!["View"], Order::Ordered);

    let first = provider.funnel(ctx(), req.clone()).await.unwrap();
    let second = provider.funnel(ctx(), req.clone()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.executions.load(AtomicOrdering::SeqCst), 1);

    let mut bypass = ctx();
    bypass.bypass_cache = true;
    provider.funnel(bypass, req).await.unwrap();
    assert_eq!(engine.executions.load(AtomicOrdering::SeqCst), 2);
}

#[tokio::test]
async fn engine_timeout_maps_to_query_error() {
    let provider = FunnelProvider::new(
        Arc::new(TimeoutEngine),
        Arc::new(MemoryCache::new()),
        Arc::new(IdentityResolver),
    );

    let err = provider
        .funnel(ctx(), request(vec!["A"], Order::Ordered))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::ExecutionTimeout));
}

#[tokio::test]
async fn backend_failure_keeps_stage_and_message() {
    let provider = FunnelProvider::new(
        Arc::new(BackendFailEngine {
            stage: "step_counts".to_string(),
            message: "out of memory".to_string(),
        }),
        Arc::new(MemoryCache::new()),
        Arc::new(IdentityResolver),
    );

    let err = provider
        .funnel(ctx(), request(vec!["A"], Order::Ordered))
        .await
        .unwrap_err();
    match err {
        QueryError::Execution { stage, message } => {
            assert_eq!(stage, "step_counts");
            assert_eq!(message, "out of memory");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn same_request_compiles_to_same_plan() {
    let req = request(vec!["A", "B", "C"], Order::Ordered);
    let first = queries::build(ctx(), req.clone()).unwrap();
    let second = queries::build(ctx(), req).unwrap();
    assert_eq!(first, second);
}

#[test]
fn invalid_requests_are_rejected() {
    let cases = vec![
        request(vec![], Order::Ordered),
        request((0..21).map(|_| "A").collect(), Order::Ordered),
        {
            let mut req = request(vec!["A", "B"], Order::Ordered);
            req.steps[1].events.clear();
            req
        },
        {
            let mut req = request(vec!["A", "B"], Order::Ordered);
            req.time_window.n = 0;
            req
        },
        {
            let mut req = request(vec!["A", "B"], Order::Unordered);
            req.exclude = Some(vec![exclude("X", None)]);
            req
        },
        {
            let mut req = request(vec!["A", "B"], Order::Ordered);
            req.exclude = Some(vec![exclude("X", Some(ExcludeSteps::Between(1, 1)))]);
            req
        },
        {
            let mut req = request(vec!["A", "B"], Order::Ordered);
            req.exclude = Some(vec![exclude("X", Some(ExcludeSteps::Between(0, 5)))]);
            req
        },
        {
            // exclusion event may not double as a step inside its range
            let mut req = request(vec!["A", "B"], Order::Ordered);
            req.exclude = Some(vec![exclude("B", None)]);
            req
        },
    ];

    for req in cases {
        match queries::build(ctx(), req) {
            Err(QueryError::InvalidSpec(_)) => {}
            other => panic!("expected InvalidSpec, got {other:?}"),
        }
    }
}
