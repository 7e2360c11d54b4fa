//! Server-side scripts for the Redis backend.
//!
//! Every state transition that touches more than one key runs as a single
//! script so concurrent workers never observe a half-applied move. Item
//! records live outside KEYS (their names are derived from an ARGV prefix),
//! which ties the backend to a single Redis node rather than a cluster.

use redis::Script;

/// Stamps the job's completion time once, when nothing is pending or processing.
const MARK_COMPLETED_IF_DRAINED: &str = r#"
local function mark_completed_if_drained(pending, processing, meta, now)
    if redis.call('LLEN', pending) == 0 and redis.call('ZCARD', processing) == 0 then
        redis.call('HSETNX', meta, 'completed_at', now)
    end
end
"#;

/// KEYS: pending, processing, meta
/// ARGV: item key prefix, visibility deadline (ms), now (rfc3339)
/// Returns the claimed item's record as a flat field/value array, or nil.
const POP: &str = r#"
local id = redis.call('LPOP', KEYS[1])
if not id then
    return false
end
local key = ARGV[1] .. id
redis.call('ZADD', KEYS[2], ARGV[2], id)
redis.call('HINCRBY', key, 'attempt', 1)
redis.call('HSET', key, 'status', 'processing')
redis.call('HSETNX', key, 'started_at', ARGV[3])
redis.call('HSETNX', KEYS[3], 'started_at', ARGV[3])
return redis.call('HGETALL', key)
"#;

/// KEYS: items, pending, processing, completed, meta
/// ARGV: item key, item id, now (rfc3339), result
/// Returns -1 for an unknown job, 0 for an item not in processing, 1 on success.
const ACK: &str = r#"
if redis.call('SCARD', KEYS[1]) == 0 then
    return -1
end
if redis.call('ZREM', KEYS[3], ARGV[2]) == 0 then
    return 0
end
redis.call('HSET', ARGV[1], 'status', 'completed', 'completed_at', ARGV[3], 'result', ARGV[4])
redis.call('SADD', KEYS[4], ARGV[2])
mark_completed_if_drained(KEYS[2], KEYS[3], KEYS[5], ARGV[3])
return 1
"#;

/// KEYS: items, pending, processing, failed, meta
/// ARGV: item key, item id, now (rfc3339), error
/// Returns -1 for an unknown job, 0 for an item not in processing,
/// 1 when the item was requeued and 2 when it failed permanently.
const NACK: &str = r#"
if redis.call('SCARD', KEYS[1]) == 0 then
    return -1
end
if redis.call('ZREM', KEYS[3], ARGV[2]) == 0 then
    return 0
end
local attempt = tonumber(redis.call('HGET', ARGV[1], 'attempt')) or 0
local max_attempts = tonumber(redis.call('HGET', ARGV[1], 'max_attempts')) or 1
redis.call('HSET', ARGV[1], 'error', ARGV[4])
if attempt < max_attempts then
    redis.call('HSET', ARGV[1], 'status', 'pending')
    redis.call('RPUSH', KEYS[2], ARGV[2])
    return 1
end
redis.call('HSET', ARGV[1], 'status', 'failed', 'completed_at', ARGV[3])
redis.call('SADD', KEYS[4], ARGV[2])
mark_completed_if_drained(KEYS[2], KEYS[3], KEYS[5], ARGV[3])
return 2
"#;

/// KEYS: pending, processing, failed, meta
/// ARGV: item key prefix, now (ms), now (rfc3339), timeout error message
/// Returns {requeued, exhausted}. Attempts are left untouched.
const REQUEUE_TIMED_OUT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[2])
local requeued = 0
local exhausted = 0
for _, id in ipairs(expired) do
    if redis.call('ZREM', KEYS[2], id) == 1 then
        local key = ARGV[1] .. id
        local attempt = tonumber(redis.call('HGET', key, 'attempt')) or 0
        local max_attempts = tonumber(redis.call('HGET', key, 'max_attempts')) or 1
        if attempt < max_attempts then
            redis.call('HSET', key, 'status', 'pending')
            redis.call('RPUSH', KEYS[1], id)
            requeued = requeued + 1
        else
            redis.call('HSET', key, 'status', 'failed', 'completed_at', ARGV[3], 'error', ARGV[4])
            redis.call('SADD', KEYS[3], id)
            exhausted = exhausted + 1
        end
    end
end
if exhausted > 0 then
    mark_completed_if_drained(KEYS[1], KEYS[2], KEYS[4], ARGV[3])
end
return {requeued, exhausted}
"#;

/// KEYS: jobs, pending, processing
/// ARGV: job id
/// Drops the job from the index only if nothing is pending or processing.
/// Returns 1 when retired, 0 when the job still has live work.
const RETIRE_IF_DRAINED: &str = r#"
if redis.call('LLEN', KEYS[2]) > 0 or redis.call('ZCARD', KEYS[3]) > 0 then
    return 0
end
redis.call('SREM', KEYS[1], ARGV[1])
return 1
"#;

/// Compiled scripts, loaded lazily by `invoke_async` on first use
pub(crate) struct Scripts {
    pub pop: Script,
    pub ack: Script,
    pub nack: Script,
    pub requeue_timed_out: Script,
    pub retire_if_drained: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            pop: Script::new(POP),
            ack: Script::new(&with_helpers(ACK)),
            nack: Script::new(&with_helpers(NACK)),
            requeue_timed_out: Script::new(&with_helpers(REQUEUE_TIMED_OUT)),
            retire_if_drained: Script::new(RETIRE_IF_DRAINED),
        }
    }
}

fn with_helpers(body: &str) -> String {
    format!("{}{}", MARK_COMPLETED_IF_DRAINED, body)
}
