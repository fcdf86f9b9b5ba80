//! Request sequencing: a newer resolution supersedes the one in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::PipelineError;
use crate::concurrency::{PooledToken, TokenPool};

/// One in-flight resolution: its sequence number and cancellation token.
///
/// The token is a child of a pooled token. Cancelling the pooled parent
/// reaches the request, but clones of the child (a caller's deadline, say)
/// cannot reach whichever later request reuses the parent.
#[derive(Debug)]
pub struct PendingRequest {
    seq: u64,
    pooled: PooledToken,
    token: CancellationToken,
}

impl PendingRequest {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Abort this request. Later checks report [`PipelineError::Cancelled`].
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Hands out sequenced requests and cancels the previous one on each new begin.
#[derive(Default)]
pub struct RequestTracker {
    pool: TokenPool,
    latest: AtomicU64,
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> PendingRequest {
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let pooled = self.pool.acquire();
        let token = pooled.token().child_token();
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((seq, token.clone()));
        if let Some((stale, stale_token)) = previous {
            debug!(stale, seq, "superseding in-flight request");
            stale_token.cancel();
        }
        PendingRequest { seq, pooled, token }
    }

    /// Return the request's token to the pool.
    pub fn finish(&self, request: PendingRequest) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(in_flight.as_ref(), Some((seq, _)) if *seq == request.seq) {
                in_flight.take();
            }
        }
        self.pool.release(request.pooled);
    }

    /// Staleness first, then cancellation.
    pub fn check(&self, request: &PendingRequest) -> Result<(), PipelineError> {
        let current = self.latest.load(Ordering::SeqCst);
        if request.seq != current {
            return Err(PipelineError::Superseded {
                seq: request.seq,
                current,
            });
        }
        if request.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    pub fn is_current(&self, request: &PendingRequest) -> bool {
        self.latest.load(Ordering::SeqCst) == request.seq
    }

    /// Cancel every active request.
    pub fn cancel_all(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.pool.cancel_all();
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }
}
