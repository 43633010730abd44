use common::query::funnel::Funnel;
use common::query::funnel::Order;
use common::types::COLUMN_ACTOR_ID;
use common::types::COLUMN_PROP;
use common::MAX_STEPS;
use common::STEP_PEOPLE_LIMIT;

use crate::context::Context;
use crate::error::QueryError;
use crate::error::Result;
use crate::logical_plan::expr::binary;
use crate::logical_plan::expr::col;
use crate::logical_plan::expr::lit;
use crate::logical_plan::expr::AggregateFunction;
use crate::logical_plan::expr::BinaryOp;
use crate::logical_plan::expr::Expr;
use crate::logical_plan::NamedExpr;
use crate::logical_plan::QueryPlan;
use crate::logical_plan::SelectStage;
use crate::logical_plan::Stage;

pub mod funnel;
pub mod funnel_unordered;

pub fn build(ctx: Context, req: Funnel) -> Result<QueryPlan> {
    validate(&req)?;

    let (from, to) = req.time.range(ctx.cur_time);
    match req.order {
        Order::Ordered | Order::Strict => funnel::build(from, to, &req),
        Order::Unordered => funnel_unordered::build(from, to, &req),
    }
}

fn validate(req: &Funnel) -> Result<()> {
    if req.steps.is_empty() {
        return Err(QueryError::InvalidSpec(
            "funnel must have at least one step".to_string(),
        ));
    }
    if req.steps.len() > MAX_STEPS {
        return Err(QueryError::InvalidSpec(format!(
            "funnel can't have more than {MAX_STEPS} steps"
        )));
    }
    for (idx, step) in req.steps.iter().enumerate() {
        if step.events.is_empty() {
            return Err(QueryError::InvalidSpec(format!(
                "step {idx} has no events"
            )));
        }
    }
    if req.time_window.n == 0 {
        return Err(QueryError::InvalidSpec(
            "conversion window must be positive".to_string(),
        ));
    }

    let exclude = match &req.exclude {
        Some(exclude) if !exclude.is_empty() => exclude,
        _ => return Ok(()),
    };

    if req.order == Order::Unordered {
        return Err(QueryError::InvalidSpec(
            "exclusion steps are not supported for unordered funnels".to_string(),
        ));
    }

    let steps_count = req.steps.len();
    for exclude in exclude {
        let (from, to) = exclude
            .steps
            .unwrap_or(common::query::funnel::ExcludeSteps::All)
            .range(steps_count);
        if from >= to {
            return Err(QueryError::InvalidSpec(format!(
                "exclusion range {from}..{to} is empty"
            )));
        }
        if to > steps_count - 1 {
            return Err(QueryError::InvalidSpec(format!(
                "exclusion range end {to} exceeds the last step"
            )));
        }
        for step in &req.steps[from..=to] {
            for event in &step.events {
                if event.event == exclude.event.event {
                    return Err(QueryError::InvalidSpec(format!(
                        "exclusion event \"{}\" also appears as a step within its range",
                        exclude.event.event.name()
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Final stage shared by every funnel shape: turn per-actor step counts
/// into per-step totals, sampled actor ids and averaged conversion times.
pub(crate) fn aggregate_stage(
    input: Stage,
    steps_count: usize,
    has_breakdown: bool,
) -> Stage {
    let mut columns = Vec::new();
    for i in 0..steps_count {
        columns.push(NamedExpr::new(
            format!("count_{}", i + 1),
            Expr::Aggregate {
                fun: AggregateFunction::CountIf,
                arg: None,
                predicate: Some(Box::new(binary(
                    col("steps"),
                    BinaryOp::GtEq,
                    lit((i + 1) as i64),
                ))),
            },
        ));
    }
    for i in 0..steps_count {
        columns.push(NamedExpr::new(
            format!("people_{}", i + 1),
            Expr::Aggregate {
                fun: AggregateFunction::GroupArrayIf {
                    limit: STEP_PEOPLE_LIMIT,
                    distinct: true,
                },
                arg: Some(Box::new(col(COLUMN_ACTOR_ID))),
                predicate: Some(Box::new(binary(
                    col("steps"),
                    BinaryOp::Eq,
                    lit((i + 1) as i64),
                ))),
            },
        ));
    }
    for i in 1..steps_count {
        columns.push(NamedExpr::new(
            format!("step_{i}_average_conversion_time_avg"),
            Expr::Aggregate {
                fun: AggregateFunction::Avg,
                arg: Some(Box::new(col(format!(
                    "step_{i}_average_conversion_time"
                )))),
                predicate: None,
            },
        ));
    }

    let mut group_by = Vec::new();
    if has_breakdown {
        columns.push(NamedExpr::new(COLUMN_PROP, col(COLUMN_PROP)));
        group_by.push(col(COLUMN_PROP));
    }

    Stage::Select(SelectStage {
        name: "funnel".to_string(),
        input: Box::new(input),
        columns,
        predicate: None,
        group_by,
        having: None,
    })
}
