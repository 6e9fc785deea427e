//! Speculative apply / confirm / compensate.
//!
//! `apply` checks its preconditions and mutates the cache in one synchronous
//! step, returning whatever `compensate` needs to undo it. An `Err` from
//! `apply` aborts before the round trip is polled. Success leaves the
//! mutation in place (the node's next snapshot broadcast reconciles); failure
//! runs `compensate` and returns the original error.

use std::future::Future;

use crate::error::ChannelError;

pub async fn speculate<S, T, A, C, F>(
    apply: A,
    compensate: C,
    round_trip: F,
) -> Result<T, ChannelError>
where
    A: FnOnce() -> Result<S, ChannelError>,
    C: FnOnce(S),
    F: Future<Output = Result<T, ChannelError>>,
{
    let undo = apply()?;
    match round_trip.await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::debug!("speculative: compensating after {e}");
            compensate(undo);
            Err(e)
        }
    }
}
