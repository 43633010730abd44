//! Unordered funnels.
//!
//! An unordered funnel is evaluated as the best of N ordered-at-the-root
//! funnels: the step list is rotated so that each step takes the first
//! position once, every rotation is scored independently, and per actor
//! only the rotation with the deepest reach survives.

use chrono::DateTime;
use chrono::Utc;
use common::query::funnel::Funnel;
use common::types::COLUMN_ACTOR_ID;
use common::types::COLUMN_PROP;

use crate::error::Result;
use crate::logical_plan::expr::and;
use crate::logical_plan::expr::binary;
use crate::logical_plan::expr::col;
use crate::logical_plan::expr::lit;
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
use crate::queries::funnel::events_stage;
use crate::queries::funnel::latest_col;
use crate::queries::funnel::partition_stage;
use crate::queries::funnel::step_col;

pub fn build(from: DateTime<Utc>, to: DateTime<Utc>, req: &Funnel) -> Result<QueryPlan> {
    let steps_count = req.steps.len();
    let has_breakdown = req.breakdown.is_some();
    let window = lit(req.time_window.duration().num_milliseconds());

    let mut rotations = Vec::with_capacity(steps_count);
    for r in 0..steps_count {
        let mut steps = req.steps[r..].to_vec();
        steps.extend_from_slice(&req.steps[..r]);

        let candidates = Stage::Candidates(CandidateRequest {
            from,
            to,
            steps,
            exclusions: Vec::new(),
            filters: req.filters.clone(),
            breakdown: req.breakdown.clone(),
        });
        let events = events_stage(candidates, steps_count, 0, has_breakdown);
        let partitioned = partition_stage(events, 1, steps_count, &[], has_breakdown);
        rotations.push(steps_stage(partitioned, steps_count, &window, has_breakdown));
    }

    let union = Stage::UnionAll(rotations);
    let max_steps = max_steps_stage(union, steps_count, has_breakdown);
    let step_counts = step_counts_stage(max_steps, steps_count, has_breakdown);
    let root = aggregate_stage(step_counts, steps_count, has_breakdown);

    Ok(QueryPlan {
        root,
        steps_count,
        has_breakdown,
    })
}

/// Scores one rotation. The step count is one for the anchor step plus
/// one for every other step seen after it inside the conversion window;
/// order among the non-anchor steps does not matter.
fn steps_stage(
    input: Stage,
    steps_count: usize,
    window: &Expr,
    has_breakdown: bool,
) -> Stage {
    let mut columns = vec![NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID))];
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }

    let mut steps = lit(1i64);
    for i in 1..steps_count {
        let reached = Expr::If {
            cond: Box::new(and(
                binary(col(latest_col(0)), BinaryOp::Lt, col(latest_col(i))),
                binary(
                    col(latest_col(i)),
                    BinaryOp::LtEq,
                    binary(col(latest_col(0)), BinaryOp::Plus, window.clone()),
                ),
            )),
            then: Box::new(lit(1i64)),
            otherwise: Box::new(lit(0i64)),
        };
        steps = binary(steps, BinaryOp::Plus, reached);
    }
    columns.push(NamedExpr::new("steps", steps));

    columns.push(NamedExpr::new(
        "conversion_times",
        Expr::ArraySort((0..steps_count).map(|i| col(latest_col(i))).collect()),
    ));
    for i in 1..steps_count {
        let at = |index| Expr::ArrayAt {
            array: Box::new(col("conversion_times")),
            index,
        };
        columns.push(NamedExpr::new(
            format!("step_{i}_conversion_time"),
            Expr::If {
                cond: Box::new(Expr::IsNotNull(Box::new(at(i + 1)))),
                then: Box::new(Expr::SecondsBetween {
                    from: Box::new(at(i)),
                    to: Box::new(at(i + 1)),
                }),
                otherwise: Box::new(Expr::Literal(common::scalar::ScalarValue::Null)),
            },
        ));
    }

    Stage::Select(SelectStage {
        name: "steps".to_string(),
        input: Box::new(input),
        columns,
        predicate: Some(binary(col(step_col(0)), BinaryOp::Eq, lit(true))),
        group_by: Vec::new(),
        having: None,
    })
}

fn max_steps_stage(input: Stage, steps_count: usize, has_breakdown: bool) -> Stage {
    let mut columns = vec![NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID))];
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }
    columns.push(NamedExpr::new("steps", col("steps")));
    for i in 1..steps_count {
        columns.push(NamedExpr::new(
            format!("step_{i}_conversion_time"),
            col(format!("step_{i}_conversion_time")),
        ));
    }

    let mut partition_by = vec![col(COLUMN_ACTOR_ID)];
    if has_breakdown {
        partition_by.push(col(COLUMN_PROP));
    }
    columns.push(NamedExpr::new("max_steps", Expr::WindowAgg {
        fun: WindowFunction::Max,
        arg: Box::new(col("steps")),
        partition_by,
        order_desc_by: None,
        frame: WindowFrame::WholePartition,
    }));

    Stage::Select(SelectStage {
        name: "max_steps".to_string(),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by: Vec::new(),
        having: None,
    })
}

/// Keeps, per actor, only the rows of the best rotation and averages the
/// conversion times those rows carry.
fn step_counts_stage(input: Stage, steps_count: usize, has_breakdown: bool) -> Stage {
    let mut columns = vec![NamedExpr::new(COLUMN_ACTOR_ID, col(COLUMN_ACTOR_ID))];
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
    }
    columns.push(NamedExpr::new("steps", col("steps")));
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

    let mut group_by = vec![col(COLUMN_ACTOR_ID), col("steps")];
    if has_breakdown {
        group_by.push(col(COLUMN_PROP));
    }

    Stage::Select(SelectStage {
        name: "step_counts".to_string(),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by,
        having: Some(binary(
            col("steps"),
            BinaryOp::Eq,
            Expr::Aggregate {
                fun: AggregateFunction::Max,
                arg: Some(Box::new(col("max_steps"))),
                predicate: None,
            },
        )),
    })
}
