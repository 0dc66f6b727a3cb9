//! Progress-callback trait for per-image and per-judgment events.
//!
//! Inject an [`Arc<dyn EvalProgressCallback>`] via
//! [`crate::config::EvalSettingsBuilder::progress_callback`] to receive
//! events as the pipeline queries each image and judges each case.
//!
//! # Example
//!
//! ```rust
//! use vision_attack_eval::{EvalProgressCallback, EvalSettings};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     judged: AtomicUsize,
//! }
//!
//! impl EvalProgressCallback for CountingCallback {
//!     fn on_judgment_complete(&self, index: usize, total: usize, metric: &str, passed: Option<bool>) {
//!         let done = self.judged.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total} judged (case {index}, {metric}: {passed:?})");
//!     }
//! }
//!
//! let settings = EvalSettings::builder()
//!     .progress_callback(Arc::new(CountingCallback { judged: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it queries images and judges cases.
///
/// Queries and judgments run concurrently, so every method may be called
/// from several tasks at once. All methods default to no-ops.
pub trait EvalProgressCallback: Send + Sync {
    /// Called once before the first vision query.
    fn on_queries_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when the vision model has answered (or failed) for one image.
    ///
    /// `failed` is true when the `"ERROR"` sentinel was substituted.
    fn on_query_complete(&self, index: usize, total: usize, identifier: &str, failed: bool) {
        let _ = (index, total, identifier, failed);
    }

    /// Called once before the first judgment, with the number of
    /// (case, metric) pairs to judge.
    fn on_judgments_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when one (case, metric) judgment finishes.
    ///
    /// `passed` is `None` when the judge call itself failed.
    fn on_judgment_complete(&self, index: usize, total: usize, metric: &str, passed: Option<bool>) {
        let _ = (index, total, metric, passed);
    }

    /// Called once after every judgment has been attempted.
    fn on_evaluation_complete(&self, passed: usize, failed: usize, errored: usize) {
        let _ = (passed, failed, errored);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl EvalProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::EvalSettings`].
pub type ProgressCallback = Arc<dyn EvalProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        queries: AtomicUsize,
        query_failures: AtomicUsize,
        judgments: AtomicUsize,
        judge_errors: AtomicUsize,
    }

    impl EvalProgressCallback for TrackingCallback {
        fn on_query_complete(&self, _index: usize, _total: usize, _identifier: &str, failed: bool) {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if failed {
                self.query_failures.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_judgment_complete(&self, _index: usize, _total: usize, _metric: &str, passed: Option<bool>) {
            self.judgments.fetch_add(1, Ordering::SeqCst);
            if passed.is_none() {
                self.judge_errors.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_queries_start(2);
        cb.on_query_complete(0, 2, "cat", false);
        cb.on_judgments_start(2);
        cb.on_judgment_complete(0, 2, "hallucination", Some(true));
        cb.on_evaluation_complete(1, 0, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_query_complete(0, 3, "cat", false);
        tracker.on_query_complete(1, 3, "dog", true);
        tracker.on_judgment_complete(0, 2, "hallucination", Some(false));
        tracker.on_judgment_complete(1, 2, "hallucination", None);

        assert_eq!(tracker.queries.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.query_failures.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.judgments.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.judge_errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_queries_start(10);
        cb.on_query_complete(3, 10, "doc1", false);
    }
}
