use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, PoisonError};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initializes the snowflake id generator.
///
/// `machine_id`: machine identifier (0-31)
/// `node_id`: node identifier (0-31)
///
/// Only the first call takes effect; a replaced bucket would restart its
/// sequence and could repeat ids within the same millisecond.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
    if gen.is_none() {
        *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
    }
}

/// Returns a new snowflake id rendered as a decimal string.
///
/// Falls back to machine/node `(1, 1)` when [`init`] was never called.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
