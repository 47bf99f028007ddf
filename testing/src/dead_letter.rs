//! Dead-letter sink that keeps letters in memory.

use journey_relay_core::dead_letter::{DeadLetter, DeadLetterSink};
use journey_relay_core::store::StoreError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Records every dead letter; can be told to refuse writes.
#[derive(Clone, Debug, Default)]
pub struct RecordingDeadLetterSink {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Letters received so far.
    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl DeadLetterSink for RecordingDeadLetterSink {
    fn dead_letter(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Database("dead-letter store unavailable".to_string()));
            }
            self.letters.lock().await.push(letter);
            Ok(())
        })
    }
}
