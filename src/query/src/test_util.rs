//! In-memory plan interpreter and other test doubles.
//!
//! `MemoryEngine` executes query plans over a vector of events with the
//! same null and window semantics the rendered SQL would have, which
//! lets the tests assert funnel results end to end without a database.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::result;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use common::query::Breakdown;
use common::query::PropValueFilter;
use common::query::PropValueOperation;
use common::scalar::ScalarValue;
use common::types::COLUMN_ACTOR_ID;
use common::types::COLUMN_PROP;
use common::types::COLUMN_TIMESTAMP;

use crate::context::Context;
use crate::funnel::FunnelResponse;
use crate::logical_plan::expr::AggregateFunction;
use crate::logical_plan::expr::BinaryOp;
use crate::logical_plan::expr::Expr;
use crate::logical_plan::expr::WindowFrame;
use crate::logical_plan::expr::WindowFunction;
use crate::logical_plan::CandidateRequest;
use crate::logical_plan::QueryPlan;
use crate::logical_plan::SelectStage;
use crate::logical_plan::Stage;
use crate::provider::BreakdownLabelResolver;
use crate::provider::BreakdownResolutionError;
use crate::provider::EngineError;
use crate::provider::ExecutionEngine;
use crate::provider::QueryCache;
use crate::provider::RawRow;

#[derive(Clone, Debug)]
pub struct TestEvent {
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub props: Vec<(String, ScalarValue)>,
}

pub fn dt(s: &str) -> DateTime<Utc> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
    Utc.from_utc_datetime(&naive)
}

pub fn event(actor_id: &str, timestamp: &str, name: &str) -> TestEvent {
    TestEvent {
        actor_id: actor_id.to_string(),
        timestamp: dt(timestamp),
        event: name.to_string(),
        props: Vec::new(),
    }
}

pub fn event_with_props(
    actor_id: &str,
    timestamp: &str,
    name: &str,
    props: Vec<(&str, ScalarValue)>,
) -> TestEvent {
    TestEvent {
        actor_id: actor_id.to_string(),
        timestamp: dt(timestamp),
        event: name.to_string(),
        props: props
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    }
}

pub struct MemoryEngine {
    events: Vec<TestEvent>,
    pub executions: AtomicUsize,
}

impl MemoryEngine {
    pub fn new(events: Vec<TestEvent>) -> Self {
        MemoryEngine {
            events,
            executions: AtomicUsize::new(0),
        }
    }

    pub fn run(&self, plan: &QueryPlan) -> Vec<RawRow> {
        self.eval_stage(&plan.root).rows.into_iter().map(RawRow).collect()
    }

    fn eval_stage(&self, stage: &Stage) -> Relation {
        match stage {
            Stage::Candidates(req) => self.eval_candidates(req),
            Stage::Select(select) => self.eval_select(select),
            Stage::UnionAll(stages) => {
                let mut relations = stages.iter().map(|s| self.eval_stage(s));
                let mut combined = match relations.next() {
                    Some(relation) => relation,
                    None => Relation {
                        columns: Vec::new(),
                        rows: Vec::new(),
                    },
                };
                for relation in relations {
                    combined.rows.extend(relation.rows);
                }
                combined
            }
        }
    }

    fn eval_candidates(&self, req: &CandidateRequest) -> Relation {
        let mut columns = vec![COLUMN_ACTOR_ID.to_string(), COLUMN_TIMESTAMP.to_string()];
        for i in 0..req.steps.len() {
            columns.push(format!("step_{i}"));
        }
        for k in 0..req.exclusions.len() {
            columns.push(format!("exclusion_{k}"));
        }
        if req.breakdown.is_some() {
            columns.push(COLUMN_PROP.to_string());
        }

        let mut rows = Vec::new();
        for ev in &self.events {
            if ev.timestamp < req.from || ev.timestamp > req.to {
                continue;
            }
            if let Some(filters) = &req.filters {
                if !filters.iter().all(|f| matches_filter(ev, f)) {
                    continue;
                }
            }

            let mut row = vec![
                ScalarValue::Utf8(Some(ev.actor_id.clone())),
                ScalarValue::TimestampMillisecond(Some(ev.timestamp.timestamp_millis())),
            ];
            for step in &req.steps {
                let hit = step.events.iter().any(|spec| matches_event(ev, spec));
                row.push(ScalarValue::Boolean(Some(hit)));
            }
            for exclusion in &req.exclusions {
                row.push(ScalarValue::Boolean(Some(matches_event(ev, exclusion))));
            }
            if let Some(Breakdown::Property(property)) = &req.breakdown {
                let value = ev
                    .props
                    .iter()
                    .find(|(name, _)| *name == property.name())
                    .map(|(_, value)| value.clone())
                    .unwrap_or(ScalarValue::Null);
                row.push(value);
            }
            rows.push(row);
        }

        Relation { columns, rows }
    }

    fn eval_select(&self, select: &SelectStage) -> Relation {
        let input = self.eval_stage(&select.input);
        let aggregate = !select.group_by.is_empty()
            || select.columns.iter().any(|c| contains_aggregate(&c.expr));
        if aggregate {
            eval_aggregate_select(select, input)
        } else {
            eval_scalar_select(select, input)
        }
    }
}

#[async_trait]
impl ExecutionEngine for MemoryEngine {
    async fn execute(
        &self,
        _ctx: &Context,
        plan: &QueryPlan,
    ) -> result::Result<Vec<RawRow>, EngineError> {
        self.executions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.run(plan))
    }
}

#[derive(Default)]
pub struct MemoryCache {
    store: Mutex<HashMap<String, FunnelResponse>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }
}

#[async_trait]
impl QueryCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<FunnelResponse> {
        self.store.lock().unwrap().get(key).cloned()
    }

    async fn set(&self, key: &str, response: &FunnelResponse, _ttl: Duration) {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), response.clone());
    }
}

pub struct TimeoutEngine;

#[async_trait]
impl ExecutionEngine for TimeoutEngine {
    async fn execute(
        &self,
        _ctx: &Context,
        _plan: &QueryPlan,
    ) -> result::Result<Vec<RawRow>, EngineError> {
        Err(EngineError::Timeout)
    }
}

pub struct BackendFailEngine {
    pub stage: String,
    pub message: String,
}

#[async_trait]
impl ExecutionEngine for BackendFailEngine {
    async fn execute(
        &self,
        _ctx: &Context,
        _plan: &QueryPlan,
    ) -> result::Result<Vec<RawRow>, EngineError> {
        Err(EngineError::Backend {
            stage: self.stage.clone(),
            message: self.message.clone(),
        })
    }
}

pub struct MapResolver {
    labels: HashMap<String, String>,
}

impl MapResolver {
    pub fn new(labels: Vec<(&str, &str)>) -> Self {
        MapResolver {
            labels: labels
                .into_iter()
                .map(|(value, label)| (value.to_string(), label.to_string()))
                .collect(),
        }
    }
}

impl BreakdownLabelResolver for MapResolver {
    fn resolve(&self, value: &ScalarValue) -> result::Result<String, BreakdownResolutionError> {
        let key = value.to_string();
        self.labels
            .get(&key)
            .cloned()
            .ok_or_else(|| BreakdownResolutionError(format!("no label for {key}")))
    }
}

pub struct IdentityResolver;

impl BreakdownLabelResolver for IdentityResolver {
    fn resolve(&self, value: &ScalarValue) -> result::Result<String, BreakdownResolutionError> {
        Ok(value.to_string())
    }
}

fn matches_event(ev: &TestEvent, spec: &common::query::funnel::Event) -> bool {
    if spec.event.name() != ev.event {
        return false;
    }
    match &spec.filters {
        Some(filters) => filters.iter().all(|f| matches_filter(ev, f)),
        None => true,
    }
}

fn matches_filter(ev: &TestEvent, filter: &PropValueFilter) -> bool {
    let PropValueFilter::Property {
        property,
        operation,
        value,
    } = filter;
    let prop = ev
        .props
        .iter()
        .find(|(name, _)| *name == property.name())
        .map(|(_, value)| value);
    let values: &[ScalarValue] = value.as_deref().unwrap_or(&[]);
    let cmp_first = |p: &ScalarValue| values.first().and_then(|v| cmp_scalars(p, v));

    match operation {
        PropValueOperation::Eq => prop
            .map(|p| values.iter().any(|v| cmp_scalars(p, v) == Some(Ordering::Equal)))
            .unwrap_or(false),
        PropValueOperation::Neq => prop
            .map(|p| !values.iter().any(|v| cmp_scalars(p, v) == Some(Ordering::Equal)))
            .unwrap_or(true),
        PropValueOperation::Gt => prop.map(|p| cmp_first(p) == Some(Ordering::Greater)).unwrap_or(false),
        PropValueOperation::Gte => prop
            .map(|p| matches!(cmp_first(p), Some(Ordering::Greater | Ordering::Equal)))
            .unwrap_or(false),
        PropValueOperation::Lt => prop.map(|p| cmp_first(p) == Some(Ordering::Less)).unwrap_or(false),
        PropValueOperation::Lte => prop
            .map(|p| matches!(cmp_first(p), Some(Ordering::Less | Ordering::Equal)))
            .unwrap_or(false),
        PropValueOperation::True => {
            prop == Some(&ScalarValue::Boolean(Some(true)))
        }
        PropValueOperation::False => {
            prop == Some(&ScalarValue::Boolean(Some(false)))
        }
        PropValueOperation::Exists => prop.map(|p| !p.is_null()).unwrap_or(false),
        PropValueOperation::Empty => prop.map(|p| p.is_null()).unwrap_or(true),
    }
}

struct Relation {
    columns: Vec<String>,
    rows: Vec<Vec<ScalarValue>>,
}

type Scope = Vec<(String, ScalarValue)>;

fn scope_rows(input: &Relation) -> Vec<Scope> {
    input
        .rows
        .iter()
        .map(|row| {
            input
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
        .collect()
}

fn lookup(scope: &Scope, name: &str) -> ScalarValue {
    scope
        .iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
        .unwrap_or(ScalarValue::Null)
}

fn eval_scalar_select(select: &SelectStage, input: Relation) -> Relation {
    let mut scopes = scope_rows(&input);
    let mut computed: Vec<Vec<ScalarValue>> = vec![Vec::new(); scopes.len()];

    for column in &select.columns {
        let values = match &column.expr {
            Expr::WindowAgg {
                fun,
                arg,
                partition_by,
                order_desc_by,
                frame,
            } => eval_window(
                &scopes,
                *fun,
                arg,
                partition_by,
                order_desc_by.as_deref(),
                *frame,
            ),
            expr => scopes.iter().map(|scope| eval_expr(expr, scope)).collect(),
        };
        for ((scope, row), value) in scopes.iter_mut().zip(computed.iter_mut()).zip(values) {
            scope.push((column.name.clone(), value.clone()));
            row.push(value);
        }
    }

    let mut rows = Vec::new();
    for (scope, row) in scopes.iter().zip(computed) {
        let keep = match &select.predicate {
            Some(predicate) => truthy(&eval_expr(predicate, scope)),
            None => true,
        };
        if keep {
            rows.push(row);
        }
    }

    Relation {
        columns: select.columns.iter().map(|c| c.name.clone()).collect(),
        rows,
    }
}

fn eval_window(
    scopes: &[Scope],
    fun: WindowFunction,
    arg: &Expr,
    partition_by: &[Expr],
    order_desc_by: Option<&Expr>,
    frame: WindowFrame,
) -> Vec<ScalarValue> {
    let mut partitions: Vec<(Vec<ScalarValue>, Vec<usize>)> = Vec::new();
    for (idx, scope) in scopes.iter().enumerate() {
        let key: Vec<ScalarValue> = partition_by.iter().map(|e| eval_expr(e, scope)).collect();
        match partitions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, indices)) => indices.push(idx),
            None => partitions.push((key, vec![idx])),
        }
    }

    let mut out = vec![ScalarValue::Null; scopes.len()];
    for (_, mut indices) in partitions {
        if let Some(order) = order_desc_by {
            indices.sort_by(|&a, &b| {
                let va = as_f64(&eval_expr(order, &scopes[a]));
                let vb = as_f64(&eval_expr(order, &scopes[b]));
                vb.partial_cmp(&va)
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            });
        }
        let args: Vec<ScalarValue> = indices
            .iter()
            .map(|&idx| eval_expr(arg, &scopes[idx]))
            .collect();
        for (pos, &idx) in indices.iter().enumerate() {
            let frame_args: Vec<&ScalarValue> = match frame {
                WindowFrame::CumulativeToCurrent => args[..=pos].iter().collect(),
                WindowFrame::OffsetPreceding(n) => {
                    if pos >= n {
                        vec![&args[pos - n]]
                    } else {
                        Vec::new()
                    }
                }
                WindowFrame::WholePartition => args.iter().collect(),
            };
            let mut best: Option<ScalarValue> = None;
            for value in frame_args {
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value.clone(),
                    Some(current) => {
                        let replace = matches!(
                            (fun, cmp_scalars(value, &current)),
                            (WindowFunction::Min, Some(Ordering::Less))
                                | (WindowFunction::Max, Some(Ordering::Greater))
                        );
                        if replace { value.clone() } else { current }
                    }
                });
            }
            out[idx] = best.unwrap_or(ScalarValue::Null);
        }
    }

    out
}

fn eval_aggregate_select(select: &SelectStage, input: Relation) -> Relation {
    let scopes = scope_rows(&input);

    let mut groups: Vec<(Vec<ScalarValue>, Vec<usize>)> = Vec::new();
    if select.group_by.is_empty() {
        groups.push((Vec::new(), (0..scopes.len()).collect()));
    } else {
        for (idx, scope) in scopes.iter().enumerate() {
            let key: Vec<ScalarValue> = select
                .group_by
                .iter()
                .map(|e| eval_expr(e, scope))
                .collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, indices)) => indices.push(idx),
                None => groups.push((key, vec![idx])),
            }
        }
    }

    let mut rows = Vec::new();
    for (_, indices) in groups {
        let group: Vec<&Scope> = indices.iter().map(|&idx| &scopes[idx]).collect();
        let row: Vec<ScalarValue> = select
            .columns
            .iter()
            .map(|c| eval_group_expr(&c.expr, &group))
            .collect();
        let keep = match &select.having {
            Some(having) => truthy(&eval_group_expr(having, &group)),
            None => true,
        };
        if keep {
            rows.push(row);
        }
    }

    Relation {
        columns: select.columns.iter().map(|c| c.name.clone()).collect(),
        rows,
    }
}

fn eval_group_expr(expr: &Expr, group: &[&Scope]) -> ScalarValue {
    match expr {
        Expr::Aggregate {
            fun,
            arg,
            predicate,
        } => eval_aggregate(fun, arg.as_deref(), predicate.as_deref(), group),
        Expr::Binary { left, op, right } => apply_binary(
            *op,
            eval_group_expr(left, group),
            eval_group_expr(right, group),
        ),
        expr => match group.first() {
            Some(scope) => eval_expr(expr, scope),
            None => ScalarValue::Null,
        },
    }
}

fn eval_aggregate(
    fun: &AggregateFunction,
    arg: Option<&Expr>,
    predicate: Option<&Expr>,
    group: &[&Scope],
) -> ScalarValue {
    let rows: Vec<&Scope> = match predicate {
        Some(predicate) => group
            .iter()
            .copied()
            .filter(|scope| truthy(&eval_expr(predicate, scope)))
            .collect(),
        None => group.to_vec(),
    };

    match fun {
        AggregateFunction::CountIf => ScalarValue::Int64(Some(rows.len() as i64)),
        AggregateFunction::Min | AggregateFunction::Max => {
            let arg = match arg {
                Some(arg) => arg,
                None => return ScalarValue::Null,
            };
            let mut best: Option<ScalarValue> = None;
            for scope in rows {
                let value = eval_expr(arg, scope);
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let replace = matches!(
                            (fun, cmp_scalars(&value, &current)),
                            (AggregateFunction::Min, Some(Ordering::Less))
                                | (AggregateFunction::Max, Some(Ordering::Greater))
                        );
                        if replace { value } else { current }
                    }
                });
            }
            best.unwrap_or(ScalarValue::Null)
        }
        AggregateFunction::Avg => {
            let arg = match arg {
                Some(arg) => arg,
                None => return ScalarValue::Float64(None),
            };
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|scope| as_f64(&eval_expr(arg, scope)))
                .collect();
            if values.is_empty() {
                ScalarValue::Float64(None)
            } else {
                ScalarValue::Float64(Some(values.iter().sum::<f64>() / values.len() as f64))
            }
        }
        AggregateFunction::GroupArrayIf { limit, distinct } => {
            let arg = match arg {
                Some(arg) => arg,
                None => return ScalarValue::List(Some(Vec::new())),
            };
            let mut values = Vec::new();
            for scope in rows {
                let value = eval_expr(arg, scope);
                if value.is_null() {
                    continue;
                }
                if !*distinct || !values.contains(&value) {
                    values.push(value);
                }
            }
            values.truncate(*limit);
            ScalarValue::List(Some(values))
        }
    }
}

fn eval_expr(expr: &Expr, scope: &Scope) -> ScalarValue {
    match expr {
        Expr::Column(name) => lookup(scope, name),
        Expr::Literal(value) => value.clone(),
        Expr::Binary { left, op, right } => {
            apply_binary(*op, eval_expr(left, scope), eval_expr(right, scope))
        }
        Expr::IsNull(inner) => ScalarValue::Boolean(Some(eval_expr(inner, scope).is_null())),
        Expr::IsNotNull(inner) => ScalarValue::Boolean(Some(!eval_expr(inner, scope).is_null())),
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            if truthy(&eval_expr(cond, scope)) {
                eval_expr(then, scope)
            } else {
                eval_expr(otherwise, scope)
            }
        }
        Expr::SecondsBetween { from, to } => {
            match (
                as_i64(&eval_expr(from, scope)),
                as_i64(&eval_expr(to, scope)),
            ) {
                (Some(from), Some(to)) => ScalarValue::Int64(Some((to - from) / 1000)),
                _ => ScalarValue::Null,
            }
        }
        Expr::ArraySort(items) => {
            let mut values: Vec<ScalarValue> =
                items.iter().map(|item| eval_expr(item, scope)).collect();
            values.sort_by(|a, b| match (a.is_null(), b.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => cmp_scalars(a, b).unwrap_or(Ordering::Equal),
            });
            ScalarValue::List(Some(values))
        }
        Expr::ArrayAt { array, index } => match eval_expr(array, scope) {
            ScalarValue::List(Some(values)) if *index >= 1 => {
                values.get(index - 1).cloned().unwrap_or(ScalarValue::Null)
            }
            _ => ScalarValue::Null,
        },
        Expr::WindowAgg { .. } | Expr::Aggregate { .. } => ScalarValue::Null,
    }
}

fn apply_binary(op: BinaryOp, left: ScalarValue, right: ScalarValue) -> ScalarValue {
    match op {
        BinaryOp::And => match (as_bool(&left), as_bool(&right)) {
            (Some(false), _) | (_, Some(false)) => ScalarValue::Boolean(Some(false)),
            (Some(true), Some(true)) => ScalarValue::Boolean(Some(true)),
            _ => ScalarValue::Null,
        },
        BinaryOp::Or => match (as_bool(&left), as_bool(&right)) {
            (Some(true), _) | (_, Some(true)) => ScalarValue::Boolean(Some(true)),
            (Some(false), Some(false)) => ScalarValue::Boolean(Some(false)),
            _ => ScalarValue::Null,
        },
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => {
            if left.is_null() || right.is_null() {
                return ScalarValue::Null;
            }
            match cmp_scalars(&left, &right) {
                Some(ord) => {
                    let result = match op {
                        BinaryOp::Eq => ord == Ordering::Equal,
                        BinaryOp::NotEq => ord != Ordering::Equal,
                        BinaryOp::Lt => ord == Ordering::Less,
                        BinaryOp::LtEq => ord != Ordering::Greater,
                        BinaryOp::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    };
                    ScalarValue::Boolean(Some(result))
                }
                None => ScalarValue::Null,
            }
        }
        BinaryOp::Plus | BinaryOp::Minus => {
            if left.is_null() || right.is_null() {
                return ScalarValue::Null;
            }
            let sign = if op == BinaryOp::Plus { 1 } else { -1 };
            match (&left, &right) {
                (ScalarValue::Int64(Some(a)), ScalarValue::Int64(Some(b))) => {
                    ScalarValue::Int64(Some(a + sign * b))
                }
                (ScalarValue::TimestampMillisecond(Some(a)), ScalarValue::Int64(Some(b))) => {
                    ScalarValue::TimestampMillisecond(Some(a + sign * b))
                }
                (ScalarValue::Int64(Some(a)), ScalarValue::TimestampMillisecond(Some(b))) => {
                    ScalarValue::TimestampMillisecond(Some(a + sign * b))
                }
                _ => match (as_f64(&left), as_f64(&right)) {
                    (Some(a), Some(b)) => ScalarValue::Float64(Some(a + sign as f64 * b)),
                    _ => ScalarValue::Null,
                },
            }
        }
    }
}

fn truthy(value: &ScalarValue) -> bool {
    matches!(value, ScalarValue::Boolean(Some(true)))
}

fn as_bool(value: &ScalarValue) -> Option<bool> {
    match value {
        ScalarValue::Boolean(Some(v)) => Some(*v),
        _ => None,
    }
}

fn as_i64(value: &ScalarValue) -> Option<i64> {
    match value {
        ScalarValue::Int64(Some(v)) => Some(*v),
        ScalarValue::TimestampMillisecond(Some(v)) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int64(Some(v)) => Some(*v as f64),
        ScalarValue::Float64(Some(v)) => Some(*v),
        ScalarValue::TimestampMillisecond(Some(v)) => Some(*v as f64),
        _ => None,
    }
}

fn cmp_scalars(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    match (left, right) {
        (ScalarValue::Utf8(Some(a)), ScalarValue::Utf8(Some(b))) => Some(a.cmp(b)),
        (ScalarValue::Boolean(Some(a)), ScalarValue::Boolean(Some(b))) => Some(a.cmp(b)),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate { .. } => true,
        Expr::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::If {
            cond,
            then,
            otherwise,
        } => contains_aggregate(cond) || contains_aggregate(then) || contains_aggregate(otherwise),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => contains_aggregate(inner),
        _ => false,
    }
}
