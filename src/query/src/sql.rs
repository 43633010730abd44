//! ClickHouse rendering of query plans.
//!
//! Rendering is a pure function of the plan. Nothing in here influences
//! plan construction, so the IR can be inspected, compared and executed
//! by other engines without touching SQL.

use common::query::funnel::Event;
use common::query::funnel::Step;
use common::query::PropValueFilter;
use common::query::PropValueOperation;
use common::query::PropertyRef;
use common::scalar::ScalarValue;
use common::types::COLUMN_ACTOR_ID;
use common::types::COLUMN_PROP;
use common::types::COLUMN_TIMESTAMP;

use crate::logical_plan::expr::AggregateFunction;
use crate::logical_plan::expr::BinaryOp;
use crate::logical_plan::expr::Expr;
use crate::logical_plan::expr::WindowFrame;
use crate::logical_plan::expr::WindowFunction;
use crate::logical_plan::CandidateRequest;
use crate::logical_plan::QueryPlan;
use crate::logical_plan::SelectStage;
use crate::logical_plan::Stage;

const EVENTS_TABLE: &str = "events";
const SOURCE_TIME_COLUMN: &str = "ts";
const SOURCE_EVENT_COLUMN: &str = "event";

pub fn render(plan: &QueryPlan) -> String {
    render_stage(&plan.root)
}

fn render_stage(stage: &Stage) -> String {
    match stage {
        Stage::Candidates(req) => render_candidates(req),
        Stage::Select(select) => render_select(select),
        Stage::UnionAll(stages) => stages
            .iter()
            .map(render_stage)
            .collect::<Vec<_>>()
            .join(" UNION ALL "),
    }
}

fn render_select(select: &SelectStage) -> String {
    let columns = select
        .columns
        .iter()
        .map(|c| match &c.expr {
            Expr::Column(name) if *name == c.name => c.name.clone(),
            expr => format!("{} AS {}", render_expr(expr), c.name),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM ({})", columns, render_stage(&select.input));
    if let Some(predicate) = &select.predicate {
        sql += &format!(" WHERE {}", render_expr(predicate));
    }
    if !select.group_by.is_empty() {
        let keys = select
            .group_by
            .iter()
            .map(render_expr)
            .collect::<Vec<_>>()
            .join(", ");
        sql += &format!(" GROUP BY {keys}");
    }
    if let Some(having) = &select.having {
        sql += &format!(" HAVING {}", render_expr(having));
    }

    sql
}

fn render_candidates(req: &CandidateRequest) -> String {
    let mut columns = vec![
        COLUMN_ACTOR_ID.to_string(),
        format!("toUnixTimestamp64Milli({SOURCE_TIME_COLUMN}) AS {COLUMN_TIMESTAMP}"),
    ];
    for (i, step) in req.steps.iter().enumerate() {
        columns.push(format!("{} AS step_{i}", step_condition(step)));
    }
    for (k, event) in req.exclusions.iter().enumerate() {
        columns.push(format!("{} AS exclusion_{k}", event_condition(event)));
    }
    if let Some(breakdown) = &req.breakdown {
        let common::query::Breakdown::Property(property) = breakdown;
        columns.push(format!("{} AS {COLUMN_PROP}", property_column(property)));
    }

    let mut predicates = vec![
        format!(
            "{SOURCE_TIME_COLUMN} >= {}",
            datetime_literal(&req.from)
        ),
        format!("{SOURCE_TIME_COLUMN} <= {}", datetime_literal(&req.to)),
    ];
    if let Some(filters) = &req.filters {
        for filter in filters {
            predicates.push(render_filter(filter));
        }
    }

    format!(
        "SELECT {} FROM {EVENTS_TABLE} WHERE {}",
        columns.join(", "),
        predicates.join(" AND ")
    )
}

fn step_condition(step: &Step) -> String {
    let terms = step
        .events
        .iter()
        .map(event_condition)
        .collect::<Vec<_>>();
    if terms.len() == 1 {
        terms.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", terms.join(" OR "))
    }
}

fn event_condition(event: &Event) -> String {
    let mut terms = vec![format!(
        "{SOURCE_EVENT_COLUMN} = {}",
        string_literal(&event.event.name())
    )];
    if let Some(filters) = &event.filters {
        for filter in filters {
            terms.push(render_filter(filter));
        }
    }
    if terms.len() == 1 {
        terms.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", terms.join(" AND "))
    }
}

fn render_filter(filter: &PropValueFilter) -> String {
    let PropValueFilter::Property {
        property,
        operation,
        value,
    } = filter;
    let column = property_column(property);
    let values = value.as_deref().unwrap_or_default();

    match operation {
        PropValueOperation::Eq if values.len() > 1 => {
            format!("{column} IN ({})", scalar_list(values))
        }
        PropValueOperation::Eq => format!("{column} = {}", scalar_literal(values.first())),
        PropValueOperation::Neq if values.len() > 1 => {
            format!("{column} NOT IN ({})", scalar_list(values))
        }
        PropValueOperation::Neq => format!("{column} != {}", scalar_literal(values.first())),
        PropValueOperation::Gt => format!("{column} > {}", scalar_literal(values.first())),
        PropValueOperation::Gte => format!("{column} >= {}", scalar_literal(values.first())),
        PropValueOperation::Lt => format!("{column} < {}", scalar_literal(values.first())),
        PropValueOperation::Lte => format!("{column} <= {}", scalar_literal(values.first())),
        PropValueOperation::True => format!("{column} = true"),
        PropValueOperation::False => format!("{column} = false"),
        PropValueOperation::Exists => format!("isNotNull({column})"),
        PropValueOperation::Empty => format!("isNull({column})"),
    }
}

/// Backend naming convention: user properties live in `user_{name}`
/// columns, event properties in `event_{name}` columns.
fn property_column(property: &PropertyRef) -> String {
    match property {
        PropertyRef::User(name) => format!("user_{name}"),
        PropertyRef::Event(name) => format!("event_{name}"),
    }
}

fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::Literal(value) => scalar_literal(Some(value)),
        Expr::Binary { left, op, right } => format!(
            "{} {} {}",
            render_operand(left, *op),
            render_op(*op),
            render_operand(right, *op)
        ),
        Expr::IsNull(inner) => format!("isNull({})", render_expr(inner)),
        Expr::IsNotNull(inner) => format!("isNotNull({})", render_expr(inner)),
        Expr::If {
            cond,
            then,
            otherwise,
        } => format!(
            "if({}, {}, {})",
            render_expr(cond),
            render_expr(then),
            render_expr(otherwise)
        ),
        Expr::SecondsBetween { from, to } => format!(
            "intDiv({} - {}, 1000)",
            render_expr(to),
            render_expr(from)
        ),
        Expr::ArraySort(items) => format!(
            "arraySort([{}])",
            items.iter().map(render_expr).collect::<Vec<_>>().join(", ")
        ),
        Expr::ArrayAt { array, index } => format!("{}[{index}]", render_expr(array)),
        Expr::WindowAgg {
            fun,
            arg,
            partition_by,
            order_desc_by,
            frame,
        } => {
            let fun = match fun {
                WindowFunction::Min => "min",
                WindowFunction::Max => "max",
            };
            let keys = partition_by
                .iter()
                .map(render_expr)
                .collect::<Vec<_>>()
                .join(", ");
            let mut over = format!("PARTITION BY {keys}");
            if let Some(order) = order_desc_by {
                over += &format!(" ORDER BY {} DESC", render_expr(order));
            }
            match frame {
                WindowFrame::CumulativeToCurrent => {
                    over += " ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW";
                }
                WindowFrame::OffsetPreceding(n) => {
                    over += &format!(" ROWS BETWEEN {n} PRECEDING AND {n} PRECEDING");
                }
                WindowFrame::WholePartition => {}
            }
            format!("{fun}({}) OVER ({over})", render_expr(arg))
        }
        Expr::Aggregate {
            fun,
            arg,
            predicate,
        } => {
            let arg = arg.as_ref().map(|a| render_expr(a));
            let predicate = predicate.as_ref().map(|p| render_expr(p));
            match (fun, arg, predicate) {
                (AggregateFunction::CountIf, _, Some(predicate)) => {
                    format!("countIf({predicate})")
                }
                (AggregateFunction::CountIf, _, None) => "count()".to_string(),
                (
                    AggregateFunction::GroupArrayIf { limit, distinct },
                    Some(arg),
                    Some(predicate),
                ) => {
                    let distinct = if *distinct { "DISTINCT " } else { "" };
                    format!("groupArrayIf({limit})({distinct}{arg}, {predicate})")
                }
                (AggregateFunction::GroupArrayIf { limit, distinct }, Some(arg), None) => {
                    let distinct = if *distinct { "DISTINCT " } else { "" };
                    format!("groupArray({limit})({distinct}{arg})")
                }
                (fun, Some(arg), Some(predicate)) => {
                    format!("{}If({arg}, {predicate})", aggregate_name(fun))
                }
                (fun, Some(arg), None) => format!("{}({arg})", aggregate_name(fun)),
                (fun, None, _) => format!("{}()", aggregate_name(fun)),
            }
        }
    }
}

fn aggregate_name(fun: &AggregateFunction) -> &'static str {
    match fun {
        AggregateFunction::Min => "min",
        AggregateFunction::Max => "max",
        AggregateFunction::Avg => "avg",
        AggregateFunction::CountIf => "countIf",
        AggregateFunction::GroupArrayIf { .. } => "groupArray",
    }
}

fn render_operand(expr: &Expr, parent: BinaryOp) -> String {
    match expr {
        Expr::Binary { op, .. } if *op != parent => format!("({})", render_expr(expr)),
        _ => render_expr(expr),
    }
}

fn render_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Eq => "=",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        BinaryOp::Plus => "+",
        BinaryOp::Minus => "-",
    }
}

fn scalar_list(values: &[ScalarValue]) -> String {
    values
        .iter()
        .map(|v| scalar_literal(Some(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn scalar_literal(value: Option<&ScalarValue>) -> String {
    match value {
        Some(ScalarValue::Boolean(Some(v))) => v.to_string(),
        Some(ScalarValue::Int64(Some(v))) => v.to_string(),
        Some(ScalarValue::Float64(Some(v))) => v.to_string(),
        Some(ScalarValue::Utf8(Some(v))) => string_literal(v),
        Some(ScalarValue::TimestampMillisecond(Some(v))) => v.to_string(),
        Some(ScalarValue::List(Some(values))) => format!("[{}]", scalar_list(values)),
        _ => "NULL".to_string(),
    }
}

fn string_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

fn datetime_literal(value: &chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "toDateTime64('{}', 3)",
        value.format("%Y-%m-%d %H:%M:%S%.3f")
    )
}
