use chrono::DateTime;
use chrono::Utc;
use common::query::funnel::Event;
use common::query::funnel::Step;
use common::query::Breakdown;
use common::query::PropValueFilter;

use crate::logical_plan::expr::Expr;

pub mod expr;

#[derive(Clone, Debug, PartialEq)]
pub struct NamedExpr {
    pub name: String,
    pub expr: Expr,
}

impl NamedExpr {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        NamedExpr {
            name: name.into(),
            expr,
        }
    }
}

/// Leaf of every plan: the raw candidate rows the backend must produce.
///
/// Output columns, in order: `actor_id`, `timestamp` (epoch milliseconds),
/// one Boolean `step_{i}` flag per step, one Boolean `exclusion_{k}` flag
/// per exclusion event, and `prop` when a breakdown is set.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateRequest {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub steps: Vec<Step>,
    pub exclusions: Vec<Event>,
    pub filters: Option<Vec<PropValueFilter>>,
    pub breakdown: Option<Breakdown>,
}

/// A projection over a single input stage.
///
/// Column aliases are visible to later columns of the same stage and to
/// the predicate. With a non-empty `group_by` the columns are evaluated
/// per group; `having` then filters groups.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStage {
    pub name: String,
    pub input: Box<Stage>,
    pub columns: Vec<NamedExpr>,
    pub predicate: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    Candidates(CandidateRequest),
    Select(SelectStage),
    UnionAll(Vec<Stage>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    pub root: Stage,
    pub steps_count: usize,
    pub has_breakdown: bool,
}
