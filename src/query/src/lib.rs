pub mod context;
pub mod error;
pub mod fingerprint;
pub mod funnel;
pub mod logical_plan;
pub mod provider;
pub mod queries;
pub mod sql;
pub mod test_util;

pub use context::Context;
pub use error::Result;
pub use funnel::FunnelProvider;
