use std::result;
use std::time::Duration;

use async_trait::async_trait;
use common::scalar::ScalarValue;
use thiserror::Error;

use crate::context::Context;
use crate::funnel::FunnelResponse;
use crate::logical_plan::QueryPlan;

/// One result row, values in the column order of the plan's root stage.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRow(pub Vec<ScalarValue>);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("timeout")]
    Timeout,
    #[error("backend failure at {stage}: {message}")]
    Backend { stage: String, message: String },
}

/// Executes a query plan against some backend and returns the raw rows
/// of its root stage.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        ctx: &Context,
        plan: &QueryPlan,
    ) -> result::Result<Vec<RawRow>, EngineError>;
}

/// Response cache keyed by request fingerprint. Lookups and stores are
/// infallible: a broken cache must degrade to recomputation, never fail
/// the query.
#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<FunnelResponse>;
    async fn set(&self, key: &str, response: &FunnelResponse, ttl: Duration);
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct BreakdownResolutionError(pub String);

/// Maps raw breakdown values to display labels.
pub trait BreakdownLabelResolver: Send + Sync {
    fn resolve(&self, value: &ScalarValue) -> result::Result<String, BreakdownResolutionError>;
}
