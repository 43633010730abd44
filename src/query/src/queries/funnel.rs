//! Ordered and strict funnels.
//!
//! Candidate rows carry one `latest_{i}` timestamp per step. A chain of
//! window stages reduces each `latest_{i}` to the earliest time step `i`
//! could still complete given the later steps seen so far, after which a
//! single nested conditional counts how deep every actor got.

use chrono::DateTime;
use chrono::Utc;
use common::query::funnel::Event;
use common::query::funnel::ExcludeSteps;
use common::query::funnel::Funnel;
use common::query::funnel::Order;
use common::scalar::ScalarValue;
use common::types::COLUMN_ACTOR_ID;
use common::types::COLUMN_PROP;
use common::types::COLUMN_TIMESTAMP;

use crate::error::Result;
use crate::logical_plan::expr::and;
use crate::logical_plan::expr::binary;
use crate::logical_plan::expr::col;
use crate::logical_plan::expr::lit;
use crate::logical_plan::expr::multi_and;
use crate::logical_plan::expr::multi_or;
use crate::logical_plan::expr::AggregateFunction;
use crate::logical_plan::expr::BinaryOp;
use crate::logical_plan::expr::Expr;
use crate::logical_plan::expr::WindowFrame;
use crate::logical_plan::expr::WindowFunction;
use crate::logical_plan::CandidateRequest;
use crate::logical_plan::NamedExpr;
use crate::logical_plan::QueryPlan;
use crate::logical_plan::SelectStage;
use crate::logical_plan::Stage;
use crate::queries::aggregate_stage;

pub(crate) struct ResolvedExclude {
    pub event: Event,
    pub from: usize,
    pub to: usize,
}

pub(crate) fn resolved_exclusions(req: &Funnel) -> Vec<ResolvedExclude> {
    match &req.exclude {
        Some(exclude) => exclude
            .iter()
            .map(|e| {
                let (from, to) = e
                    .steps
                    .unwrap_or(ExcludeSteps::All)
                    .range(req.steps.len());
                ResolvedExclude {
                    event: e.event.clone(),
                    from,
                    to,
                }
            })
            .collect(),
        None => Vec::new(),
    }
}

pub(crate) fn step_col(i: usize) -> String {
    format!("step_{i}")
}

pub(crate) fn latest_col(i: usize) -> String {
    format!("latest_{i}")
}

fn exclusion_flag_col(k: usize) -> String {
    format!("exclusion_{k}")
}

fn exclusion_latest_col(k: usize) -> String {
    format!("exclusion_latest_{k}")
}

fn null() -> Expr {
    Expr::Literal(ScalarValue::Null)
}

pub fn build(from: DateTime<Utc>, to: DateTime<Utc>, req: &Funnel) -> Result<QueryPlan> {
    let steps_count = req.steps.len();
    let has_breakdown = req.breakdown.is_some();
    let window = lit(req.time_window.duration().num_milliseconds());
    let exclusions = resolved_exclusions(req);

    let candidates = Stage::Candidates(CandidateRequest {
        from,
        to,
        steps: req.steps.clone(),
        exclusions: exclusions.iter().map(|e| e.event.clone()).collect(),
        filters: req.filters.clone(),
        breakdown: req.breakdown.clone(),
    });

    let events = events_stage(candidates, steps_count, exclusions.len(), has_breakdown);

    let windowed = match req.order {
        Order::Strict => strict_partition_stage(events, steps_count, &exclusions, has_breakdown),
        _ if steps_count >= 2 => {
            build_step_subquery(events, 2, steps_count, &exclusions, has_breakdown)
        }
        _ => events,
    };

    let steps = steps_stage(windowed, steps_count, &exclusions, &window, has_breakdown);
    let step_counts = step_counts_stage(steps, steps_count, has_breakdown);
    let root = aggregate_stage(step_counts, steps_count, has_breakdown);

    Ok(QueryPlan {
        root,
        steps_count,
        has_breakdown,
    })
}

/// Turns the Boolean step and exclusion flags of the candidate rows into
/// nullable `latest_{i}` timestamps.
pub(crate) fn events_stage(
    input: Stage,
    steps_count: usize,
    exclusions_count: usize,
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![
        NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID)),
        NamedExpr::new(COLUMN_TIMESTAMP, col(COLUMN_TIMESTAMP)),
    ];
    for i in 0..steps_count {
        columns.push(NamedExpr::new(step_col(i), col(step_col(i))));
        columns.push(NamedExpr::new(latest_col(i), Expr::If {
            cond: Box::new(col(step_col(i))),
            then: Box::new(col(COLUMN_TIMESTAMP)),
            otherwise: Box::new(null()),
        }));
    }
    for k in 0..exclusions_count {
        columns.push(NamedExpr::new(exclusion_latest_col(k), Expr::If {
            cond: Box::new(col(exclusion_flag_col(k))),
            then: Box::new(col(COLUMN_TIMESTAMP)),
            otherwise: Box::new(null()),
        }));
    }
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }

    Stage::Select(SelectStage {
        name: "events".to_string(),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by: Vec::new(),
        having: None,
    })
}

/// One reduction level per step. The base of the recursion windows every
/// step at once; each outer level then re-windows the steps at or above
/// `level` after the comparison stage has knocked out-of-order matches
/// back to null.
fn build_step_subquery(
    input: Stage,
    level: usize,
    steps_count: usize,
    exclusions: &[ResolvedExclude],
    has_breakdown: bool,
) -> Stage {
    if level >= steps_count {
        partition_stage(input, 1, steps_count, exclusions, has_breakdown)
    } else {
        let inner = build_step_subquery(input, level + 1, steps_count, exclusions, has_breakdown);
        let compared = comparison_stage(inner, level, steps_count, exclusions, has_breakdown);
        partition_stage(compared, level, steps_count, exclusions, has_breakdown)
    }
}

fn partition_by(has_breakdown: bool) -> Vec<Expr> {
    let mut keys = vec![col(COLUMN_ACTOR_ID)];
    if has_breakdown {
        keys.push(col(COLUMN_PROP));
    }
    keys
}

fn min_over(arg: Expr, frame: WindowFrame, has_breakdown: bool) -> Expr {
    Expr::WindowAgg {
        fun: WindowFunction::Min,
        arg: Box::new(arg),
        partition_by: partition_by(has_breakdown),
        order_desc_by: Some(Box::new(col(COLUMN_TIMESTAMP))),
        frame,
    }
}

pub(crate) fn partition_stage(
    input: Stage,
    level: usize,
    steps_count: usize,
    exclusions: &[ResolvedExclude],
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![
        NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID)),
        NamedExpr::new(COLUMN_TIMESTAMP, col(COLUMN_TIMESTAMP)),
    ];
    for i in 0..steps_count {
        columns.push(NamedExpr::new(step_col(i), col(step_col(i))));
        if i < level {
            columns.push(NamedExpr::new(latest_col(i), col(latest_col(i))));
            for (k, exclude) in exclusions.iter().enumerate() {
                if exclude.from + 1 == i {
                    columns.push(NamedExpr::new(
                        exclusion_latest_col(k),
                        col(exclusion_latest_col(k)),
                    ));
                }
            }
        } else {
            columns.push(NamedExpr::new(
                latest_col(i),
                min_over(
                    col(latest_col(i)),
                    WindowFrame::CumulativeToCurrent,
                    has_breakdown,
                ),
            ));
            for (k, exclude) in exclusions.iter().enumerate() {
                if exclude.from + 1 == i {
                    columns.push(NamedExpr::new(
                        exclusion_latest_col(k),
                        min_over(
                            col(exclusion_latest_col(k)),
                            WindowFrame::CumulativeToCurrent,
                            has_breakdown,
                        ),
                    ));
                }
            }
        }
    }
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }

    Stage::Select(SelectStage {
        name: format!("partition_{level}"),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by: Vec::new(),
        having: None,
    })
}

/// Nulls out `latest_{i}` wherever a step at or above `level` happened
/// before step `level - 1`, so the next partition pass can pick a later
/// occurrence instead.
fn comparison_stage(
    input: Stage,
    level: usize,
    steps_count: usize,
    exclusions: &[ResolvedExclude],
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![
        NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID)),
        NamedExpr::new(COLUMN_TIMESTAMP, col(COLUMN_TIMESTAMP)),
    ];
    for i in 0..steps_count {
        columns.push(NamedExpr::new(step_col(i), col(step_col(i))));
        if i < level {
            columns.push(NamedExpr::new(latest_col(i), col(latest_col(i))));
            for (k, exclude) in exclusions.iter().enumerate() {
                if exclude.from + 1 == i {
                    columns.push(NamedExpr::new(
                        exclusion_latest_col(k),
                        col(exclusion_latest_col(k)),
                    ));
                }
            }
        } else {
            let out_of_order = multi_or(
                (level..=i)
                    .map(|j| binary(col(latest_col(j)), BinaryOp::Lt, col(latest_col(level - 1))))
                    .collect(),
            );
            columns.push(NamedExpr::new(latest_col(i), Expr::If {
                cond: Box::new(out_of_order),
                then: Box::new(null()),
                otherwise: Box::new(col(latest_col(i))),
            }));
            for (k, exclude) in exclusions.iter().enumerate() {
                if exclude.from + 1 == i {
                    columns.push(NamedExpr::new(exclusion_latest_col(k), Expr::If {
                        cond: Box::new(binary(
                            col(exclusion_latest_col(k)),
                            BinaryOp::Lt,
                            col(latest_col(exclude.from)),
                        )),
                        then: Box::new(null()),
                        otherwise: Box::new(col(exclusion_latest_col(k))),
                    }));
                }
            }
        }
    }
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }

    Stage::Select(SelectStage {
        name: format!("comparison_{level}"),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by: Vec::new(),
        having: None,
    })
}

/// Strict funnels need no level reduction: `latest_{i}` must sit exactly
/// `i` rows before the current one, so a single pass of offset frames
/// settles every step.
fn strict_partition_stage(
    input: Stage,
    steps_count: usize,
    exclusions: &[ResolvedExclude],
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![
        NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID)),
        NamedExpr::new(COLUMN_TIMESTAMP, col(COLUMN_TIMESTAMP)),
    ];
    for i in 0..steps_count {
        columns.push(NamedExpr::new(step_col(i), col(step_col(i))));
        if i == 0 {
            columns.push(NamedExpr::new(latest_col(i), col(latest_col(i))));
        } else {
            columns.push(NamedExpr::new(
                latest_col(i),
                min_over(
                    col(latest_col(i)),
                    WindowFrame::OffsetPreceding(i),
                    has_breakdown,
                ),
            ));
        }
        for (k, exclude) in exclusions.iter().enumerate() {
            if exclude.from + 1 == i {
                columns.push(NamedExpr::new(
                    exclusion_latest_col(k),
                    min_over(
                        col(exclusion_latest_col(k)),
                        WindowFrame::CumulativeToCurrent,
                        has_breakdown,
                    ),
                ));
            }
        }
    }
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }

    Stage::Select(SelectStage {
        name: "partition_1".to_string(),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by: Vec::new(),
        having: None,
    })
}

fn steps_stage(
    input: Stage,
    steps_count: usize,
    exclusions: &[ResolvedExclude],
    window: &Expr,
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID))];
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }
    columns.push(NamedExpr::new("steps", sorting_condition(steps_count, window)));
    for i in 1..steps_count {
        columns.push(NamedExpr::new(
            format!("step_{i}_conversion_time"),
            step_time(i, window),
        ));
    }

    let mut predicate = binary(col(step_col(0)), BinaryOp::Eq, lit(true));
    if !exclusions.is_empty() {
        columns.push(NamedExpr::new(
            "exclusion",
            exclusion_expr(exclusions, window),
        ));
        predicate = and(
            predicate,
            binary(col("exclusion"), BinaryOp::Eq, lit(0i64)),
        );
    }

    Stage::Select(SelectStage {
        name: "steps".to_string(),
        input: Box::new(input),
        columns,
        predicate: Some(predicate),
        group_by: Vec::new(),
        having: None,
    })
}

/// Nested conditional that resolves to the highest `curr` whose first
/// `curr` steps happened in order and inside the conversion window.
fn sorting_condition(curr: usize, window: &Expr) -> Expr {
    if curr == 1 {
        return lit(1i64);
    }
    let mut conditions = Vec::new();
    for i in 1..curr {
        conditions.push(binary(
            col(latest_col(i - 1)),
            BinaryOp::Lt,
            col(latest_col(i)),
        ));
        conditions.push(binary(
            col(latest_col(i)),
            BinaryOp::LtEq,
            binary(col(latest_col(0)), BinaryOp::Plus, window.clone()),
        ));
    }

    Expr::If {
        cond: Box::new(multi_and(conditions)),
        then: Box::new(lit(curr as i64)),
        otherwise: Box::new(sorting_condition(curr - 1, window)),
    }
}

fn step_time(i: usize, window: &Expr) -> Expr {
    Expr::If {
        cond: Box::new(and(
            Expr::IsNotNull(Box::new(col(latest_col(i)))),
            binary(
                col(latest_col(i)),
                BinaryOp::LtEq,
                binary(col(latest_col(0)), BinaryOp::Plus, window.clone()),
            ),
        )),
        then: Box::new(Expr::SecondsBetween {
            from: Box::new(col(latest_col(i - 1))),
            to: Box::new(col(latest_col(i))),
        }),
        otherwise: Box::new(null()),
    }
}

/// Number of exclusion events that landed strictly between the matched
/// boundary steps. Any non-zero value disqualifies the actor.
fn exclusion_expr(exclusions: &[ResolvedExclude], window: &Expr) -> Expr {
    let terms = exclusions
        .iter()
        .enumerate()
        .map(|(k, exclude)| {
            let from_time = col(latest_col(exclude.from));
            let to_time = col(latest_col(exclude.to));
            let upper = Expr::If {
                cond: Box::new(Expr::IsNull(Box::new(to_time.clone()))),
                then: Box::new(binary(from_time.clone(), BinaryOp::Plus, window.clone())),
                otherwise: Box::new(to_time),
            };
            Expr::If {
                cond: Box::new(and(
                    binary(col(exclusion_latest_col(k)), BinaryOp::Gt, from_time),
                    binary(col(exclusion_latest_col(k)), BinaryOp::Lt, upper),
                )),
                then: Box::new(lit(1i64)),
                otherwise: Box::new(lit(0i64)),
            }
        })
        .collect::<Vec<_>>();

    let mut expr = terms[0].clone();
    for term in terms.iter().skip(1) {
        expr = binary(expr, BinaryOp::Plus, term.clone());
    }

    expr
}

pub(crate) fn step_counts_stage(
    input: Stage,
    steps_count: usize,
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID))];
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }
    columns.push(NamedExpr::new("steps", Expr::Aggregate {
        fun: AggregateFunction::Max,
        arg: Some(Box::new(col("steps"))),
        predicate: None,
    }));
    for i in 1..steps_count {
        columns.push(NamedExpr::new(
            format!("step_{i}_average_conversion_time"),
            Expr::Aggregate {
                fun: AggregateFunction::Avg,
                arg: Some(Box::new(col(format!("step_{i}_conversion_time")))),
                predicate: None,
            },
        ));
    }

    let mut group_by = vec![col(COLUMN_ACTOR_ID)];
    if has_breakdown {
        group_by.push(col(COLUMN_PROP));
    }

    Stage::Select(SelectStage {
        name: "step_counts".to_string(),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by,
        having: None,
    })
}
