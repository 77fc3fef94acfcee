//! Small shared helpers that don't belong to any one module.

use chrono::Utc;

pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
