use crate::error::{Result, TutorError};
use crate::response_handler::ResponseHandler;
use crate::stt::{CaptureEvent, STTError, VoiceCapture};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Listen → answer → listen again, until the input closes or shutdown is requested
pub struct TutorSession {
    capture: VoiceCapture,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    handler: Arc<ResponseHandler>,
}

impl TutorSession {
    pub fn new(
        capture: VoiceCapture,
        capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
        handler: Arc<ResponseHandler>,
    ) -> Self {
        Self {
            capture,
            capture_events,
            handler,
        }
    }

    pub fn handler(&self) -> &Arc<ResponseHandler> {
        &self.handler
    }

    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.capture.start().await?;

        let mut current_turn: Option<JoinHandle<()>> = None;
        let mut input_closed = false;
        let mut failure: Option<String> = None;

        loop {
            if input_closed && current_turn.is_none() {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("🛑 Shutting down tutor session");
                    self.stop().await;
                    if let Some(handle) = current_turn.take() {
                        let _ = handle.await;
                    }
                    break;
                }

                event = self.capture_events.recv(), if !input_closed => {
                    match event {
                        Some(CaptureEvent::Utterance(text)) => {
                            // The handler interrupts the previous turn itself
                            let handler = Arc::clone(&self.handler);
                            let handle = tokio::spawn(async move {
                                match handler.on_query(&text).await {
                                    Ok(Some(response)) => log::info!(
                                        "Turn complete ({} chars of notes)",
                                        response.notes.len()
                                    ),
                                    Ok(None) => {}
                                    Err(e) => log::error!("Failed to answer question: {}", e),
                                }
                            });
                            current_turn = Some(handle);
                        }
                        Some(CaptureEvent::Error(message)) => {
                            log::error!("Voice capture failed: {}", message);
                            failure = Some(message);
                            input_closed = true;
                        }
                        Some(CaptureEvent::Closed) | None => {
                            log::info!("Input closed, finishing current answer");
                            input_closed = true;
                        }
                    }
                }

                Some(result) = async {
                    if let Some(ref mut handle) = current_turn {
                        Some(handle.await)
                    } else {
                        None
                    }
                } => {
                    current_turn = None;
                    if let Err(e) = result {
                        if !e.is_cancelled() {
                            log::error!("Turn task failed: {}", e);
                        }
                    }

                    if !input_closed {
                        // The finished turn cleared the working flag
                        self.capture.start().await?;
                    }
                }
            }
        }

        self.capture.stop().await;

        match failure {
            Some(message) => Err(TutorError::STT(STTError::Canceled(message))),
            None => Ok(()),
        }
    }

    /// Halt listening and any answer in progress
    pub async fn stop(&self) {
        self.capture.stop().await;
        self.handler.stop().await;
    }
}
