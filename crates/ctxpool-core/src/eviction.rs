//! Pure eviction scoring (spec §4.2). No I/O, no locking — a function of a
//! context's observable state at a point in time, so it can be unit tested
//! without a pool, a driver, or a clock mock.

use std::time::Duration;

use ctxpool_types::{satisfies, PROTECTED_TAG};
use tokio::time::Instant;

use crate::context::Context;

/// Idle-seconds penalty weight.
const ALPHA: f64 = 0.01;
/// Consecutive-errors penalty weight.
const BETA: f64 = 0.5;

/// Higher is more valuable to keep; lower is preferred for eviction.
/// Contexts tagged `protected` never evict (score is `+infinity`).
pub fn score(ctx: &Context, now: Instant) -> f64 {
    if ctx.tags.contains(PROTECTED_TAG) {
        return f64::INFINITY;
    }

    let idle = now
        .saturating_duration_since(ctx.last_used)
        .as_secs_f64();
    let total_requests = ctx.total_requests as f64;

    (1.0 + total_requests).ln() - ALPHA * idle - BETA * (ctx.consecutive_errors as f64)
}

/// Picks the lowest-scoring, unprotected, non-busy context to evict to make
/// room for a new one (spec §4.5 step 3). Ties are broken by `created_at`:
/// the older context is evicted, the younger one kept (spec §4.2 reference
/// formula: "ties broken by newer `created_at` winning"). Returns `None` if
/// every context is protected or busy.
pub fn pick_eviction_candidate<'a>(
    contexts: impl IntoIterator<Item = &'a Context>,
    now: Instant,
) -> Option<&'a Context> {
    contexts
        .into_iter()
        .filter(|c| !c.busy() && !satisfies(&c.tags, &[PROTECTED_TAG.to_string()].into()))
        .fold(None, |best: Option<&Context>, candidate| match best {
            None => Some(candidate),
            Some(best_so_far) => {
                let candidate_score = score(candidate, now);
                let best_score = score(best_so_far, now);
                let more_evictable = candidate_score < best_score
                    || (candidate_score == best_score && candidate.created_at < best_so_far.created_at);
                if more_evictable {
                    Some(candidate)
                } else {
                    Some(best_so_far)
                }
            }
        })
}
