use std::sync::Arc;
use tokio::sync::watch;

/// Shared "a listen/generate/speak cycle is active" flag. Reads are
/// synchronous, so event handlers always see the latest value.
#[derive(Debug, Clone)]
pub struct WorkingState {
    tx: Arc<watch::Sender<bool>>,
}

impl WorkingState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_working(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns the previous value
    pub fn set(&self, working: bool) -> bool {
        let previous = self.tx.send_replace(working);
        if previous != working {
            log::debug!("Working state: {} -> {}", previous, working);
        }
        previous
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the flag is false
    pub async fn wait_stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|working| !*working).await;
    }
}

impl Default for WorkingState {
    fn default() -> Self {
        Self::new()
    }
}
