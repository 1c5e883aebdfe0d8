//! Progress-callback trait for per-slide extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the deck. The job tracker uses this
//! hook to advance `totalSlides` / `processedSlides`; the CLI uses it for a
//! terminal progress bar when running without a job.
//!
//! # Example
//!
//! ```rust
//! use pptx_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct BatchCounter {
//!     processed: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for BatchCounter {
//!     fn on_batch_complete(&self, processed: usize, total: usize) {
//!         self.processed.store(processed, Ordering::SeqCst);
//!         eprintln!("{processed}/{total} slides");
//!     }
//! }
//!
//! let counter = Arc::new(BatchCounter {
//!     processed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it progresses.
///
/// Implementations must be `Send + Sync`: `on_slide_error` fires from inside
/// concurrent batches. Every method has a no-op default.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once, as soon as the slide parts have been read.
    fn on_extraction_start(&self, total_slides: usize) {
        let _ = total_slides;
    }

    /// Called after each image-upload batch joins.
    fn on_upload_batch_complete(&self, uploaded: usize, total_images: usize) {
        let _ = (uploaded, total_images);
    }

    /// Called after each field-extraction batch joins.
    ///
    /// `processed` counts every slide attempted so far, dropped ones
    /// included, so it reaches `total` when the stage finishes.
    fn on_batch_complete(&self, processed: usize, total: usize) {
        let _ = (processed, total);
    }

    /// Called when a slide is dropped or loses its image.
    fn on_slide_error(&self, slide_number: u32, error: &str) {
        let _ = (slide_number, error);
    }

    /// Called once after the last batch.
    fn on_extraction_complete(&self, total_slides: usize, extracted: usize) {
        let _ = (total_slides, extracted);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// Fan one event out to two callbacks.
///
/// The job runner chains its own tracker-updating callback with whatever the
/// caller configured.
pub(crate) struct ChainedProgress {
    pub first: ProgressCallback,
    pub second: ProgressCallback,
}

impl ExtractionProgressCallback for ChainedProgress {
    fn on_extraction_start(&self, total_slides: usize) {
        self.first.on_extraction_start(total_slides);
        self.second.on_extraction_start(total_slides);
    }

    fn on_upload_batch_complete(&self, uploaded: usize, total_images: usize) {
        self.first.on_upload_batch_complete(uploaded, total_images);
        self.second.on_upload_batch_complete(uploaded, total_images);
    }

    fn on_batch_complete(&self, processed: usize, total: usize) {
        self.first.on_batch_complete(processed, total);
        self.second.on_batch_complete(processed, total);
    }

    fn on_slide_error(&self, slide_number: u32, error: &str) {
        self.first.on_slide_error(slide_number, error);
        self.second.on_slide_error(slide_number, error);
    }

    fn on_extraction_complete(&self, total_slides: usize, extracted: usize) {
        self.first.on_extraction_complete(total_slides, extracted);
        self.second.on_extraction_complete(total_slides, extracted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started_total: AtomicUsize,
        batches: AtomicUsize,
        last_processed: AtomicUsize,
        errors: AtomicUsize,
        extracted: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_extraction_start(&self, total_slides: usize) {
            self.started_total.store(total_slides, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, processed: usize, _total: usize) {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.last_processed.store(processed, Ordering::SeqCst);
        }

        fn on_slide_error(&self, _slide_number: u32, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, _total_slides: usize, extracted: usize) {
            self.extracted.store(extracted, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(5);
        cb.on_upload_batch_complete(2, 5);
        cb.on_batch_complete(5, 5);
        cb.on_slide_error(2, "some error");
        cb.on_extraction_complete(5, 4);
    }

    #[test]
    fn chained_progress_reaches_both() {
        let a = Arc::new(TrackingCallback::default());
        let b = Arc::new(TrackingCallback::default());
        let chained = ChainedProgress {
            first: a.clone(),
            second: b.clone(),
        };

        chained.on_extraction_start(3);
        chained.on_batch_complete(2, 3);
        chained.on_slide_error(3, "timeout");
        chained.on_batch_complete(3, 3);
        chained.on_extraction_complete(3, 2);

        for t in [&a, &b] {
            assert_eq!(t.started_total.load(Ordering::SeqCst), 3);
            assert_eq!(t.batches.load(Ordering::SeqCst), 2);
            assert_eq!(t.last_processed.load(Ordering::SeqCst), 3);
            assert_eq!(t.errors.load(Ordering::SeqCst), 1);
            assert_eq!(t.extracted.load(Ordering::SeqCst), 2);
        }
    }
}
