//! A single process-wide monotonic epoch, used wherever spec.md calls for
//! "the sender's/client's monotonic clock" (packet timestamps, clock-sync
//! `t1`/`t2`/`t3`/`t4`). Nanoseconds elapsed since first use.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

pub fn monotonic_now_ns() -> i64 {
    EPOCH.elapsed().as_nanos() as i64
}
