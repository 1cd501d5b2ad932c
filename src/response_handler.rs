use crate::error::{Result, TutorError};
use crate::llm::{
    ConversationTemplates, DualStreamCoordinator, FinalResponse, GenerationEvent, SharedContext,
    SystemPrompts,
};
use crate::playback::VideoPlayer;
use crate::speech::{SentenceBuffer, SpeechEvent, SpeechMode, SpeechSequencer};
use crate::state::WorkingState;
use crate::tts::{Speaker, SpeechSynthesisAdapter};
use crate::video_context::{
    VideoContextProvider, VideoContextRequest, VideoContextResponse, VideoMetadata,
};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use strum::Display;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the UI layer gets to see of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    ResponseStarted(String),
    /// Full notes text so far
    NotesUpdated(String),
    /// Full spoken explanation text so far
    VoiceoverUpdated(String),
    SpeakingChanged(bool),
    Error(String),
    ResponseEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HandlerState {
    Idle,
    FetchingContext,
    Generating,
    Speaking,
}

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub video_id: String,
    pub speech_mode: SpeechMode,
    pub pause_video_while_answering: bool,
}

impl HandlerConfig {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            speech_mode: SpeechMode::default(),
            pause_video_while_answering: true,
        }
    }

    pub fn with_speech_mode(mut self, speech_mode: SpeechMode) -> Self {
        self.speech_mode = speech_mode;
        self
    }
}

/// Everything the handler talks to
pub struct Collaborators {
    pub context: SharedContext,
    pub coordinator: Arc<DualStreamCoordinator>,
    pub context_provider: Arc<dyn VideoContextProvider>,
    pub player: Arc<dyn VideoPlayer>,
    pub synthesizer: Arc<SpeechSynthesisAdapter>,
    pub working: WorkingState,
}

struct Turn {
    id: u64,
    cancel: CancellationToken,
}

/// Runs one query at a time through context lookup, dual generation and speech.
/// A new query interrupts the one in progress.
pub struct ResponseHandler {
    config: HandlerConfig,
    context: SharedContext,
    coordinator: Arc<DualStreamCoordinator>,
    context_provider: Arc<dyn VideoContextProvider>,
    player: Arc<dyn VideoPlayer>,
    synthesizer: Arc<SpeechSynthesisAdapter>,
    sequencer: SpeechSequencer,
    segmenter: Mutex<SentenceBuffer>,
    working: WorkingState,
    state: Mutex<HandlerState>,
    events: broadcast::Sender<ResponseEvent>,
    turn: Mutex<Option<Turn>>,
    next_turn: AtomicU64,
    relay: JoinHandle<()>,
}

impl ResponseHandler {
    pub fn new(config: HandlerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            context,
            coordinator,
            context_provider,
            player,
            synthesizer,
            working,
        } = collaborators;

        let (events, _) = broadcast::channel(256);
        let sequencer = SpeechSequencer::new(synthesizer.clone());
        let relay = spawn_speech_relay(&sequencer, &synthesizer, events.clone());

        log::info!(
            "Response handler ready (video {}, speech mode {})",
            config.video_id,
            config.speech_mode
        );

        Self {
            config,
            context,
            coordinator,
            context_provider,
            player,
            synthesizer,
            sequencer,
            segmenter: Mutex::new(SentenceBuffer::new()),
            working,
            state: Mutex::new(HandlerState::Idle),
            events,
            turn: Mutex::new(None),
            next_turn: AtomicU64::new(0),
            relay,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResponseEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> HandlerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_speaking(&self) -> bool {
        self.synthesizer.is_speaking()
    }

    pub fn sequencer(&self) -> &SpeechSequencer {
        &self.sequencer
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Answer one learner question. Returns `Ok(None)` for blank input or
    /// when the turn was interrupted.
    pub async fn on_query(&self, query: &str) -> Result<Option<FinalResponse>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }

        let (turn_id, cancel) = self.begin_turn().await;
        self.working.set(true);
        log::info!("❓ Turn {}: {}", turn_id, query);
        self.emit(ResponseEvent::ResponseStarted(query.to_string()));

        let mut working = self.working.subscribe();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TutorError::Cancelled),
            _ = working.wait_for(|working| !*working) => {
                cancel.cancel();
                Err(TutorError::Cancelled)
            }
            result = self.run_turn(query, &cancel) => result,
        };

        let outcome = match result {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.is_cancelled() => {
                log::info!("🛑 Turn {} interrupted", turn_id);
                if self.is_current(turn_id) {
                    self.silence().await;
                }
                Ok(None)
            }
            Err(e) => {
                log::error!("❌ Turn {} failed: {}", turn_id, e);
                self.emit(ResponseEvent::Error(ConversationTemplates::generation_failed(&e)));
                if self.is_current(turn_id) {
                    self.silence().await;
                }
                Err(e)
            }
        };

        self.finish_turn(turn_id).await;
        outcome
    }

    async fn run_turn(&self, query: &str, cancel: &CancellationToken) -> Result<FinalResponse> {
        self.set_state(HandlerState::FetchingContext);
        let current_time = self.player.current_time();
        if self.config.pause_video_while_answering {
            self.player.pause();
        }
        let metadata = self.fetch_metadata(query, current_time).await;

        let history = {
            let mut context = self.context.lock().await;
            context.add_personalised_system_message(SystemPrompts::personalised_session(&metadata));
            context.add_user_message(query);
            log::debug!("{}", context.summary());
            context.get_messages()
        };

        self.set_state(HandlerState::Generating);
        let mut stream = self
            .coordinator
            .generate(&history, &metadata, cancel.child_token());

        let mut response = None;
        while let Some(event) = stream.next().await {
            // Ready events can arrive in one poll, long after a stop
            if cancel.is_cancelled() {
                return Err(TutorError::Cancelled);
            }
            match event {
                GenerationEvent::NotesDelta(notes) => {
                    self.emit(ResponseEvent::NotesUpdated(notes));
                }
                GenerationEvent::VoiceoverDelta(voiceover) => {
                    if self.config.speech_mode == SpeechMode::Incremental {
                        self.feed_speech(&voiceover, cancel);
                    }
                    self.emit(ResponseEvent::VoiceoverUpdated(voiceover));
                }
                GenerationEvent::Complete(complete) => response = Some(complete),
                GenerationEvent::Error(e) => return Err(e.into()),
            }
        }
        let response = response.ok_or(TutorError::Cancelled)?;
        if cancel.is_cancelled() {
            return Err(TutorError::Cancelled);
        }

        self.context
            .lock()
            .await
            .add_assistant_message(ConversationTemplates::combined_answer(
                &response.notes,
                &response.voiceover,
            ));

        self.queue_remaining_speech(&response, cancel)?;

        self.set_state(HandlerState::Speaking);
        self.sequencer.wait_idle().await;
        Ok(response)
    }

    async fn fetch_metadata(&self, query: &str, current_time: f64) -> VideoMetadata {
        let request = VideoContextRequest::new(&self.config.video_id, query, current_time);
        let context = match self.context_provider.fetch_context(&request).await {
            Ok(context) => context,
            Err(e) => {
                log::warn!("⚠️ Video context unavailable, using fallback metadata: {}", e);
                VideoContextResponse::fallback(&self.config.video_id)
            }
        };
        VideoMetadata::from_context(context, current_time)
    }

    /// Queue the complete sentences of a voiceover update. The segmenter lock is
    /// held across the cancel check so `silence` cannot clear the queue in between.
    fn feed_speech(&self, voiceover: &str, cancel: &CancellationToken) {
        let mut segmenter = self.segmenter();
        if cancel.is_cancelled() {
            return;
        }
        // Errors are logged by the segmenter and leave its position unchanged
        if let Ok(sentences) = segmenter.absorb(voiceover) {
            for sentence in sentences {
                self.sequencer.enqueue(sentence);
            }
        }
    }

    fn queue_remaining_speech(
        &self,
        response: &FinalResponse,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut segmenter = self.segmenter();
        if cancel.is_cancelled() {
            return Err(TutorError::Cancelled);
        }
        match self.config.speech_mode {
            SpeechMode::Incremental => {
                if let Some(tail) = segmenter.flush() {
                    self.sequencer.enqueue(tail);
                }
            }
            SpeechMode::WholeResponse => self.sequencer.enqueue(response.voiceover.clone()),
        }
        Ok(())
    }

    /// Interrupt whatever is in progress and return to idle
    pub async fn stop(&self) {
        let turn = self.current_turn().take();
        if let Some(turn) = turn {
            log::info!("🛑 Stopping turn {}", turn.id);
            turn.cancel.cancel();
        }

        self.silence().await;
        self.working.set(false);
        self.set_state(HandlerState::Idle);
        if self.config.pause_video_while_answering {
            self.player.play();
        }
    }

    /// Forget the conversation, keeping the session system message
    pub async fn clear_context(&self) {
        self.context.lock().await.clear_context();
        log::info!("🧹 Conversation cleared");
    }

    async fn begin_turn(&self) -> (u64, CancellationToken) {
        let id = self.next_turn.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancellationToken::new();

        let previous = self.current_turn().replace(Turn {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            log::info!("Interrupting turn {} for turn {}", previous.id, id);
            previous.cancel.cancel();
            self.silence().await;
        }

        (id, cancel)
    }

    async fn finish_turn(&self, turn_id: u64) {
        if self.is_current(turn_id) {
            // The synthesis session lasts one working period
            if let Err(e) = self.synthesizer.stop().await {
                log::warn!("Failed to close synthesis session: {}", e);
            }
        }

        let was_current = {
            let mut turn = self.current_turn();
            if turn.as_ref().is_some_and(|turn| turn.id == turn_id) {
                *turn = None;
                true
            } else {
                false
            }
        };

        if was_current {
            self.set_state(HandlerState::Idle);
            self.working.set(false);
            if self.config.pause_video_while_answering {
                self.player.play();
            }
        }
        self.emit(ResponseEvent::ResponseEnded);
    }

    /// Drop queued speech, cut off the current utterance and forget partial sentences.
    ///
    /// Callers cancel the turn first. Resetting under the segmenter lock waits
    /// out any enqueue that already passed its cancel check.
    async fn silence(&self) {
        self.segmenter().reset();
        self.sequencer.stop().await;
    }

    fn is_current(&self, turn_id: u64) -> bool {
        self.current_turn()
            .as_ref()
            .is_some_and(|turn| turn.id == turn_id)
    }

    fn current_turn(&self) -> MutexGuard<'_, Option<Turn>> {
        self.turn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn segmenter(&self) -> MutexGuard<'_, SentenceBuffer> {
        self.segmenter.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: HandlerState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            log::debug!("Handler: {} -> {}", *current, state);
            *current = state;
        }
    }

    fn emit(&self, event: ResponseEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for ResponseHandler {
    fn drop(&mut self) {
        self.relay.abort();
        if let Some(turn) = self.current_turn().take() {
            turn.cancel.cancel();
        }
    }
}

/// Forward speaking-flag changes and per-sentence failures to UI events
fn spawn_speech_relay(
    sequencer: &SpeechSequencer,
    synthesizer: &SpeechSynthesisAdapter,
    events: broadcast::Sender<ResponseEvent>,
) -> JoinHandle<()> {
    let mut speech = sequencer.subscribe();
    let mut speaking = synthesizer.subscribe_speaking();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = speaking.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_speaking = *speaking.borrow_and_update();
                    let _ = events.send(ResponseEvent::SpeakingChanged(is_speaking));
                }
                event = speech.recv() => match event {
                    Ok(SpeechEvent::Failed { sentence, error }) => {
                        log::warn!("Speech failed for '{}': {}", sentence, error);
                        let _ = events.send(ResponseEvent::Error(
                            ConversationTemplates::speech_failed(&error),
                        ));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("Speech relay skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
