//! Bounded fan-out for service calls and a reusable cancellation-token pool.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::join_all;
use parcelwise_service::ServiceError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::PipelineError;

/// Runs independent fetches in slices of at most `limit`, one slice at a time.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    limit: usize,
}

impl BoundedExecutor {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `fetch` over `items`, awaiting each slice fully before starting the next.
    ///
    /// Results come back in input order. A failed item is captured in its slot
    /// and does not affect its siblings; cancellation (the token firing, or any
    /// item reporting it) aborts the whole run immediately.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> Result<Vec<Result<T, ServiceError>>, PipelineError>
    where
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut results = Vec::with_capacity(items.len());
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let slice: Vec<Fut> = items.by_ref().take(self.limit).map(&mut fetch).collect();
            debug!(size = slice.len(), "running fetch slice");

            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcomes = join_all(slice) => outcomes,
            };
            for outcome in outcomes {
                if matches!(&outcome, Err(err) if err.is_cancellation()) {
                    return Err(PipelineError::Cancelled);
                }
                results.push(outcome);
            }
        }
        Ok(results)
    }
}

/// A cancellation token checked out of a [`TokenPool`].
#[derive(Debug)]
pub struct PooledToken {
    id: u64,
    token: CancellationToken,
}

impl PooledToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<CancellationToken>,
    active: HashMap<u64, CancellationToken>,
}

/// Pool of cancellation tokens with bookkeeping of which are in use.
///
/// A cancelled token can never be reset, so only tokens released uncancelled
/// go back to the idle list.
#[derive(Default)]
pub struct TokenPool {
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl TokenPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check out an idle token, or a fresh one when none is idle.
    pub fn acquire(&self) -> PooledToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let token = state.idle.pop().unwrap_or_else(CancellationToken::new);
        state.active.insert(id, token.clone());
        PooledToken { id, token }
    }

    /// Return a token; it goes back to the idle list unless it was cancelled.
    pub fn release(&self, token: PooledToken) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active.remove(&token.id);
        if !token.token.is_cancelled() {
            state.idle.push(token.token);
        }
    }

    /// Cancel every checked-out token and forget all tokens. Idempotent.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for token in state.active.values() {
            token.cancel();
        }
        if !state.active.is_empty() {
            debug!(count = state.active.len(), "cancelled active tokens");
        }
        state.active.clear();
        state.idle.clear();
    }

    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .len()
    }

    pub fn idle_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .idle
            .len()
    }
}
