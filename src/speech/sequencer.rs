use crate::tts::Speaker;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started(String),
    Finished(String),
    Failed { sentence: String, error: String },
    /// Queue drained, nothing left to say
    Idle,
}

/// Outcome of one [`SpeechSequencer::drain_next`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    Spoke,
    Failed,
    Idle,
    Cancelled,
}

struct QueueState {
    queue: VecDeque<String>,
    processing: bool,
    /// Bumped by `stop()`; work started under an older epoch is discarded
    epoch: u64,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    speaker: Arc<dyn Speaker>,
    state: Mutex<QueueState>,
    in_flight: tokio::sync::Mutex<()>,
    processing_tx: watch::Sender<bool>,
    events: broadcast::Sender<SpeechEvent>,
}

/// FIFO of sentences waiting to be spoken. At most one sentence is handed
/// to the speaker at a time; enqueueing never blocks.
#[derive(Clone)]
pub struct SpeechSequencer {
    inner: Arc<Inner>,
}

impl SpeechSequencer {
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        let (processing_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                speaker,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    processing: false,
                    epoch: 0,
                    worker: None,
                }),
                in_flight: tokio::sync::Mutex::new(()),
                processing_tx,
                events,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a sentence and start draining if idle
    pub fn enqueue(&self, sentence: impl Into<String>) {
        let sentence = sentence.into();
        if sentence.trim().is_empty() {
            return;
        }

        let mut state = self.state();
        state.queue.push_back(sentence);
        log::debug!("Speech: queued sentence ({} pending)", state.queue.len());

        if !state.processing {
            state.processing = true;
            self.inner.processing_tx.send_replace(true);

            let epoch = state.epoch;
            let sequencer = self.clone();
            state.worker = Some(tokio::spawn(async move {
                sequencer.run(epoch).await;
            }));
        }
    }

    async fn run(&self, epoch: u64) {
        loop {
            match self.drain_step(epoch).await {
                DrainStep::Spoke | DrainStep::Failed => continue,
                DrainStep::Idle | DrainStep::Cancelled => break,
            }
        }
    }

    /// Speak the head of the queue. Marks the sequencer idle when the queue is empty.
    pub async fn drain_next(&self) -> DrainStep {
        let epoch = self.state().epoch;
        self.drain_step(epoch).await
    }

    async fn drain_step(&self, epoch: u64) -> DrainStep {
        let _in_flight = self.inner.in_flight.lock().await;

        let sentence = {
            let mut state = self.state();
            if state.epoch != epoch {
                return DrainStep::Cancelled;
            }
            match state.queue.pop_front() {
                Some(sentence) => sentence,
                None => {
                    state.processing = false;
                    self.inner.processing_tx.send_replace(false);
                    drop(state);

                    log::debug!("Speech: queue drained");
                    let _ = self.inner.events.send(SpeechEvent::Idle);
                    return DrainStep::Idle;
                }
            }
        };

        let _ = self.inner.events.send(SpeechEvent::Started(sentence.clone()));
        let result = self.inner.speaker.speak(&sentence).await;

        if self.state().epoch != epoch {
            return DrainStep::Cancelled;
        }

        match result {
            Ok(()) => {
                let _ = self.inner.events.send(SpeechEvent::Finished(sentence));
                DrainStep::Spoke
            }
            Err(e) if e.is_cancelled() => {
                // Session closed under us without a stop(); the queue stays live
                log::debug!("Speech: sentence cut off, moving on");
                DrainStep::Failed
            }
            Err(e) => {
                log::warn!("Speech: skipping sentence after synthesis error: {}", e);
                let _ = self.inner.events.send(SpeechEvent::Failed {
                    sentence,
                    error: e.to_string(),
                });
                DrainStep::Failed
            }
        }
    }

    /// Drop everything queued and cut off the sentence being spoken
    pub async fn stop(&self) {
        let worker = {
            let mut state = self.state();
            state.queue.clear();
            state.epoch += 1;
            state.processing = false;
            state.worker.take()
        };
        self.inner.processing_tx.send_replace(false);

        if let Some(worker) = worker {
            worker.abort();
        }

        if let Err(e) = self.inner.speaker.stop().await {
            log::warn!("Speech: failed to stop speaker: {}", e);
        }
        log::debug!("Speech: sequencer stopped");
    }

    /// Resolve once the queue is empty and nothing is being spoken
    pub async fn wait_idle(&self) {
        let mut processing = self.inner.processing_tx.subscribe();
        // The sender lives as long as `self`, so this only fails if it is dropped
        let _ = processing.wait_for(|busy| !*busy).await;
    }

    pub fn is_processing(&self) -> bool {
        self.state().processing
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.inner.events.subscribe()
    }
}
