//! Fan-out dispatch for disjunctive queries.
//!
//! A DNF query with k AND-groups compiles to k independent native
//! sub-queries. They are dispatched concurrently; results concatenate in
//! input (OR-branch) order once every branch has completed. The first
//! failing branch aborts every other in-flight branch and is the one error
//! the caller sees — later failures, including the fallout of the abort
//! itself, are no-ops against the latch.
//!
//! No retries happen at this layer. A transport or parse failure is terminal
//! for its branch and therefore for the whole dispatch.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, trace};

use bibfed_error::{BibfedError, ErrorCode, ErrorContext, Result};

/// Terminal outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// The per-dispatch state machine: `Pending(outstanding) → Succeeded | Failed`.
///
/// Only the single-threaded aggregation loop touches it, so a plain struct is
/// enough — first failure wins by construction, not by synchronization.
#[derive(Debug)]
pub struct DispatchState {
    outstanding: usize,
    outcome: Option<Outcome>,
}

impl DispatchState {
    pub fn new(branches: usize) -> Self {
        DispatchState {
            outstanding: branches,
            outcome: None,
        }
    }

    /// Record one successful branch. Returns `true` when this completion is
    /// the one that settles the dispatch as succeeded.
    pub fn complete_one(&mut self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            self.outcome = Some(Outcome::Succeeded);
            true
        } else {
            false
        }
    }

    /// Record a branch failure. Returns `true` only for the first one — the
    /// latch that guarantees exactly one error delivery per dispatch.
    pub fn fail(&mut self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(Outcome::Failed);
        true
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug)]
struct CancelInner {
    handles: Vec<AbortHandle>,
    fired: AtomicBool,
}

/// Aggregate cancel handle for a dispatch.
///
/// Clone-able, safe to invoke any number of times in any dispatch state.
/// Cancellation is cooperative and best-effort: a branch whose response
/// already arrived is not retroactively undone — the dispatch latch is what
/// keeps a cancelled-but-settled dispatch consistent.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            trace!("cancel already issued; ignoring");
            return;
        }
        debug!(branches = self.inner.handles.len(), "cancelling dispatch");
        for handle in &self.inner.handles {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }
}

/// Concurrent fan-out over the sub-queries of one dispatch.
///
/// Must be created inside a tokio runtime; every branch runs as its own
/// task. Dropping the `FanOut` without joining aborts all branches.
#[derive(Debug)]
pub struct FanOut<T> {
    set: JoinSet<(usize, Result<Vec<T>>)>,
    cancel: CancelHandle,
    branches: usize,
}

impl<T: Send + 'static> FanOut<T> {
    /// Spawn one task per sub-query. Branch indexes are assigned in input
    /// order and decide the concatenation order of the results.
    pub fn spawn<F>(subqueries: Vec<F>) -> Self
    where
        F: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        let branches = subqueries.len();
        let mut set = JoinSet::new();
        let mut handles = Vec::with_capacity(branches);
        for (index, subquery) in subqueries.into_iter().enumerate() {
            handles.push(set.spawn(async move { (index, subquery.await) }));
        }
        FanOut {
            set,
            cancel: CancelHandle {
                inner: Arc::new(CancelInner {
                    handles,
                    fired: AtomicBool::new(false),
                }),
            },
            branches,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Await all branches and concatenate their results in input order.
    pub async fn join(mut self) -> Result<Vec<T>> {
        let mut slots: Vec<Option<Vec<T>>> = Vec::new();
        slots.resize_with(self.branches, || None);
        let mut state = DispatchState::new(self.branches);
        let mut first_error: Option<BibfedError> = None;

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((index, Ok(records))) => {
                    slots[index] = Some(records);
                    if state.complete_one() {
                        debug!(branches = self.branches, "dispatch complete");
                    }
                }
                Ok((index, Err(err))) => {
                    if state.fail() {
                        debug!(branch = index, error = %err, "branch failed, aborting dispatch");
                        let err = if err.context.is_none() {
                            err.with_context(ErrorContext::Dispatch {
                                branches: self.branches,
                                failed_branch: Some(index),
                            })
                        } else {
                            err
                        };
                        first_error = Some(err);
                        self.set.abort_all();
                    } else {
                        trace!(branch = index, error = %err, "late branch failure after dispatch settled");
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {
                    // Fallout of abort_all or of the caller's cancel handle.
                    if state.fail() {
                        first_error = Some(
                            BibfedError::new(ErrorCode::QueryCancelled, "query cancelled")
                                .with_context(ErrorContext::Dispatch {
                                    branches: self.branches,
                                    failed_branch: None,
                                }),
                        );
                        self.set.abort_all();
                    }
                }
                Err(join_err) => {
                    if state.fail() {
                        first_error = Some(BibfedError::new(
                            ErrorCode::Internal,
                            format!("dispatch task failed: {}", join_err),
                        ));
                        self.set.abort_all();
                    }
                }
            }
        }

        match state.outcome() {
            Some(Outcome::Failed) => Err(first_error.unwrap_or_else(|| {
                BibfedError::new(ErrorCode::Internal, "dispatch failed without an error")
            })),
            _ => Ok(slots.into_iter().flatten().flatten().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn transport_error(message: &str) -> BibfedError {
        BibfedError::new(ErrorCode::ConnectionFailed, message)
    }

    async fn ok_branch<T>(records: Vec<T>) -> Result<Vec<T>> {
        Ok(records)
    }

    #[test]
    fn test_state_machine_success_path() {
        let mut state = DispatchState::new(2);
        assert!(!state.is_terminal());
        assert!(!state.complete_one());
        assert!(state.complete_one());
        assert_eq!(state.outcome(), Some(Outcome::Succeeded));

        // terminal: late events are no-ops
        assert!(!state.fail());
        assert!(!state.complete_one());
        assert_eq!(state.outcome(), Some(Outcome::Succeeded));
    }

    #[test]
    fn test_state_machine_first_failure_wins() {
        let mut state = DispatchState::new(3);
        assert!(!state.complete_one());
        assert!(state.fail());
        assert!(!state.fail());
        assert!(!state.complete_one());
        assert_eq!(state.outcome(), Some(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_fan_out_aggregates_all_branches() {
        let fan_out = FanOut::spawn(vec![
            ok_branch(vec![1, 2]),
            ok_branch(vec![3]),
            ok_branch(vec![4, 5, 6]),
        ]);
        let merged = fan_out.join().await.expect("dispatch failed");
        assert_eq!(merged.len(), 6);
    }

    #[tokio::test]
    async fn test_fan_out_preserves_input_order() {
        // First branch finishes last; concatenation must still be in
        // OR-branch order, not completion order.
        let fan_out = FanOut::spawn(vec![
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec!["a1", "a2"])
            }) as std::pin::Pin<Box<dyn Future<Output = Result<Vec<&'static str>>> + Send>>,
            Box::pin(async { Ok(vec!["b1"]) }),
        ]);
        let merged = fan_out.join().await.expect("dispatch failed");
        assert_eq!(merged, vec!["a1", "a2", "b1"]);
    }

    #[tokio::test]
    async fn test_fan_out_empty_input() {
        let fan_out: FanOut<i32> =
            FanOut::spawn(Vec::<std::future::Ready<Result<Vec<i32>>>>::new());
        assert_eq!(fan_out.join().await.expect("dispatch failed"), Vec::<i32>::new());
    }

    #[tokio::test]
    async fn test_first_failure_aborts_other_branches() {
        let completed = Arc::new(AtomicUsize::new(0));
        let slow_completed = completed.clone();

        let fan_out = FanOut::spawn(vec![
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                slow_completed.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1])
            }) as std::pin::Pin<Box<dyn Future<Output = Result<Vec<i32>>> + Send>>,
            Box::pin(async { Err(transport_error("branch 1 is down")) }),
        ]);

        let err = fan_out.join().await.expect_err("dispatch should fail");
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
        assert!(err.message.contains("branch 1 is down"));
        match err.context {
            Some(ErrorContext::Dispatch { failed_branch, .. }) => {
                assert_eq!(failed_branch, Some(1));
            }
            other => panic!("unexpected context: {:?}", other),
        }

        // The slow branch was aborted, so it never gets to complete.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_error_surfaced_over_later_ones() {
        let fan_out = FanOut::spawn(vec![
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(transport_error("late failure"))
            }) as std::pin::Pin<Box<dyn Future<Output = Result<Vec<i32>>> + Send>>,
            Box::pin(async { Err(transport_error("immediate failure")) }),
        ]);

        let err = fan_out.join().await.expect_err("dispatch should fail");
        assert!(err.message.contains("immediate failure"));
    }

    #[tokio::test]
    async fn test_cancel_handle_is_idempotent() {
        let fan_out: FanOut<i32> = FanOut::spawn(vec![async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![1])
        }]);
        let cancel = fan_out.cancel_handle();

        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());

        let err = fan_out.join().await.expect_err("dispatch should fail");
        assert_eq!(err.code, ErrorCode::QueryCancelled);
    }

    #[tokio::test]
    async fn test_cancel_after_success_is_noop() {
        let fan_out = FanOut::spawn(vec![ok_branch(vec![7])]);
        let cancel = fan_out.cancel_handle();

        let merged = fan_out.join().await.expect("dispatch failed");
        assert_eq!(merged, vec![7]);

        // The dispatch already settled; cancelling now must not disturb anything.
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());
    }
}
