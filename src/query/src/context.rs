use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

/// Per-request state threaded through compilation and execution.
#[derive(Clone, Debug)]
pub struct Context {
    pub request_id: Uuid,
    /// Anchor for relative time ranges such as "last 7 days".
    pub cur_time: DateTime<Utc>,
    pub bypass_cache: bool,
}

impl Context {
    pub fn new(cur_time: DateTime<Utc>) -> Self {
        Context {
            request_id: Uuid::new_v4(),
            cur_time,
            bypass_cache: false,
        }
    }
}
