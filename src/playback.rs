use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The video being watched: position readout plus pause/resume control
pub trait VideoPlayer: Send + Sync {
    /// Current playback position in seconds
    fn current_time(&self) -> f64;
    fn pause(&self);
    fn play(&self);
}

/// In-process playback position, advanced by a ticker or by explicit updates
#[derive(Debug, Default)]
pub struct PlaybackClock {
    seconds: AtomicU64,
    paused: AtomicBool,
}

impl PlaybackClock {
    pub fn new(start_seconds: f64) -> Arc<Self> {
        let clock = Self::default();
        clock.update_time(start_seconds);
        Arc::new(clock)
    }

    /// Progress callback from the player
    pub fn update_time(&self, seconds: f64) {
        self.seconds.store(seconds.max(0.0).to_bits(), Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Advance the clock once per second while playing, until `cancel` fires
    pub fn spawn_ticker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let clock = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if !clock.is_paused() {
                            clock.update_time(clock.current_time() + 1.0);
                        }
                    }
                }
            }
        })
    }
}

impl VideoPlayer for PlaybackClock {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Acquire))
    }

    fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            log::info!("⏸️ Video paused at {:.1}s", self.current_time());
        }
    }

    fn play(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            log::info!("▶️ Video resumed at {:.1}s", self.current_time());
        }
    }
}
