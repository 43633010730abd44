use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use common::query::funnel::Funnel;
use common::scalar::ScalarValue;
use common::STEP_PEOPLE_LIMIT;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::context::Context;
use crate::error::QueryError;
use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::logical_plan::QueryPlan;
use crate::provider::BreakdownLabelResolver;
use crate::provider::EngineError;
use crate::provider::ExecutionEngine;
use crate::provider::QueryCache;
use crate::provider::RawRow;
use crate::queries;

const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepSummary {
    pub step_index: usize,
    /// Actors that reached this step or any later one.
    pub count: i64,
    pub sample_actor_ids: Vec<String>,
    /// Average seconds from the previous step. None for the first step.
    pub average_conversion_time: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunnelResult {
    pub breakdown: Option<String>,
    pub steps: Vec<StepSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunnelResponse {
    pub funnels: Vec<FunnelResult>,
}

pub struct FunnelProvider {
    engine: Arc<dyn ExecutionEngine>,
    cache: Arc<dyn QueryCache>,
    resolver: Arc<dyn BreakdownLabelResolver>,
}

impl FunnelProvider {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        cache: Arc<dyn QueryCache>,
        resolver: Arc<dyn BreakdownLabelResolver>,
    ) -> Self {
        FunnelProvider {
            engine,
            cache,
            resolver,
        }
    }

    pub async fn funnel(&self, ctx: Context, req: Funnel) -> Result<FunnelResponse> {
        let start = Instant::now();
        let plan = queries::build(ctx.clone(), req.clone())?;
        let (from, to) = req.time.range(ctx.cur_time);
        let key = fingerprint(&req, from, to)?;

        if !ctx.bypass_cache {
            if let Some(response) = self.cache.get(&key).await {
                debug!("cache hit: {key}");
                return Ok(response);
            }
        }

        let rows = self
            .engine
            .execute(&ctx, &plan)
            .await
            .map_err(|err| match err {
                EngineError::Timeout => QueryError::ExecutionTimeout,
                EngineError::Backend { stage, message } => {
                    QueryError::Execution { stage, message }
                }
            })?;

        let response = format_results(&plan, rows, self.resolver.as_ref());
        self.cache.set(&key, &response, RESPONSE_CACHE_TTL).await;

        let duration = start.elapsed();
        debug!("elapsed: {:?}", duration);

        Ok(response)
    }
}

/// Result rows follow the root stage layout: `steps_count` cumulative
/// counts, `steps_count` sampled actor lists, `steps_count - 1` average
/// conversion times and, with a breakdown, the raw group value last.
fn format_results(
    plan: &QueryPlan,
    rows: Vec<RawRow>,
    resolver: &dyn BreakdownLabelResolver,
) -> FunnelResponse {
    let n = plan.steps_count;
    let mut funnels = Vec::with_capacity(rows.len());
    for row in rows {
        let breakdown = if plan.has_breakdown {
            let value = row_value(&row, 3 * n - 1);
            let label = match resolver.resolve(&value) {
                Ok(label) => label,
                Err(err) => {
                    warn!("breakdown label resolution failed: {err}");
                    value.to_string()
                }
            };
            Some(label)
        } else {
            None
        };

        // Samples at each step include everyone sampled at deeper steps,
        // so walk from the last step backwards.
        let mut steps = Vec::with_capacity(n);
        let mut sampled = Vec::new();
        for i in (0..n).rev() {
            for actor in scalar_strings(&row_value(&row, n + i)) {
                if !sampled.contains(&actor) {
                    sampled.push(actor);
                }
            }
            let mut sample_actor_ids = sampled.clone();
            sample_actor_ids.truncate(STEP_PEOPLE_LIMIT);
            let average_conversion_time = if i == 0 {
                None
            } else {
                scalar_f64(&row_value(&row, 2 * n + i - 1))
            };
            steps.push(StepSummary {
                step_index: i,
                count: scalar_i64(&row_value(&row, i)),
                sample_actor_ids,
                average_conversion_time,
            });
        }
        steps.reverse();

        funnels.push(FunnelResult { breakdown, steps });
    }

    FunnelResponse { funnels }
}

fn row_value(row: &RawRow, idx: usize) -> ScalarValue {
    row.0.get(idx).cloned().unwrap_or(ScalarValue::Null)
}

fn scalar_i64(value: &ScalarValue) -> i64 {
    match value {
        ScalarValue::Int64(Some(v)) => *v,
        _ => 0,
    }
}

fn scalar_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Float64(Some(v)) => Some(*v),
        ScalarValue::Int64(Some(v)) => Some(*v as f64),
        _ => None,
    }
}

fn scalar_strings(value: &ScalarValue) -> Vec<String> {
    match value {
        ScalarValue::List(Some(items)) => items
            .iter()
            .filter_map(|item| match item {
                ScalarValue::Utf8(Some(s)) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
