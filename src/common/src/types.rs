pub const COLUMN_ACTOR_ID: &str = "actor_id";
pub const COLUMN_TIMESTAMP: &str = "timestamp";
pub const COLUMN_PROP: &str = "prop";

/// How many actor ids are sampled per funnel step.
pub const STEP_PEOPLE_LIMIT: usize = 100;
/// Upper bound on funnel steps. The step subquery is built by explicit
/// recursion, one level per step, so the depth must stay bounded.
pub const MAX_STEPS: usize = 20;
