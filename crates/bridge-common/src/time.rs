//! Small time helpers shared by the store and sender loops.

use chrono::Utc;

/// Current unix time in whole seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}
