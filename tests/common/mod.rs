#![allow(dead_code)]

use futures_util::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tutor_overlay_rs::{
    llm::{
        ChatStreamer, ConversationContext, DualStreamCoordinator, LLMConfig, LLMError, Message,
        TokenStream, NOTES_AGENT,
    },
    playback::VideoPlayer,
    response_handler::{Collaborators, HandlerConfig, ResponseEvent, ResponseHandler},
    speech::SpeechMode,
    state::WorkingState,
    stt::{RecognitionEvent, STTError, SpeakerVerifier, SpeechRecognizer},
    tts::{SpeechEngine, SpeechSynthesisAdapter, SynthesisSession, TTSError},
    video_context::{
        ContextError, Transcript, VideoContextProvider, VideoContextRequest, VideoContextResponse,
    },
};

/// Chunks the scripted model emits for one stream
#[derive(Clone, Default)]
pub struct Script {
    pub chunks: Vec<String>,
    /// Error emitted after all chunks
    pub fail_with: Option<String>,
    pub chunk_delay: Duration,
}

impl Script {
    pub fn chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing(chunks: &[&str], message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::chunks(chunks)
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }
}

/// Model double: the notes or the voiceover script is picked by the
/// persona named in the leading system prompt
pub struct ScriptedLLM {
    pub notes: Script,
    pub voiceover: Script,
    pub requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLLM {
    pub fn new(notes: Script, voiceover: Script) -> Arc<Self> {
        Arc::new(Self {
            notes,
            voiceover,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatStreamer for ScriptedLLM {
    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        _config: &LLMConfig,
    ) -> Result<TokenStream, LLMError> {
        let is_notes = messages
            .first()
            .is_some_and(|m| m.is_system() && m.content().contains(NOTES_AGENT));
        self.requests.lock().unwrap().push(messages);

        let script = if is_notes {
            self.notes.clone()
        } else {
            self.voiceover.clone()
        };

        let delay = script.chunk_delay;
        let mut items: Vec<Result<String, LLMError>> =
            script.chunks.into_iter().map(Ok).collect();
        if let Some(message) = script.fail_with {
            items.push(Err(LLMError::Stream(message)));
        }

        let stream = stream::unfold(items.into_iter(), move |mut items| async move {
            let item = items.next()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((item, items))
        });
        Ok(Box::pin(stream))
    }
}

/// Records every utterance instead of playing it
#[derive(Default)]
pub struct RecordingEngine {
    pub spoken: Arc<Mutex<Vec<String>>>,
    pub sessions: Mutex<usize>,
    pub speak_delay: Duration,
    /// Sentences containing this text fail to synthesize
    pub fail_on: Option<String>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            speak_delay: delay,
            ..Self::default()
        })
    }

    pub fn failing_on(text: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(text.to_string()),
            ..Self::default()
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

struct RecordingSession {
    spoken: Arc<Mutex<Vec<String>>>,
    speak_delay: Duration,
    fail_on: Option<String>,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl SpeechEngine for RecordingEngine {
    async fn create_session(&self) -> Result<Arc<dyn SynthesisSession>, TTSError> {
        *self.sessions.lock().unwrap() += 1;
        Ok(Arc::new(RecordingSession {
            spoken: self.spoken.clone(),
            speak_delay: self.speak_delay,
            fail_on: self.fail_on.clone(),
            cancel: CancellationToken::new(),
        }))
    }
}

#[async_trait::async_trait]
impl SynthesisSession for RecordingSession {
    async fn speak(&self, text: &str) -> Result<(), TTSError> {
        if self.fail_on.as_deref().is_some_and(|f| text.contains(f)) {
            return Err(TTSError::AudioProcessing("synthesis rejected".to_string()));
        }
        if !self.speak_delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TTSError::Cancelled),
                _ = tokio::time::sleep(self.speak_delay) => {}
            }
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

/// Context service double
pub struct StaticContext {
    pub response: Option<VideoContextResponse>,
    pub requests: Mutex<Vec<VideoContextRequest>>,
}

impl StaticContext {
    pub fn physics() -> Arc<Self> {
        Arc::new(Self {
            response: Some(VideoContextResponse {
                video_id: "vid-1".to_string(),
                subject: "Physics".to_string(),
                exam: "JEE".to_string(),
                class: "11th".to_string(),
                topic_transcripts: Vec::new(),
                context_transcripts: vec![Transcript {
                    text: "Velocity is displacement per unit time".to_string(),
                    start: 40.0,
                    duration: 30.0,
                    topic: "Kinematics".to_string(),
                }],
            }),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<VideoContextRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl VideoContextProvider for StaticContext {
    async fn fetch_context(
        &self,
        request: &VideoContextRequest,
    ) -> Result<VideoContextResponse, ContextError> {
        self.requests.lock().unwrap().push(request.clone());
        self.response.clone().ok_or(ContextError::ApiError {
            status: 503,
            message: "service unavailable".to_string(),
        })
    }
}

/// Player double that remembers pause/play calls
#[derive(Default)]
pub struct FakePlayer {
    pub time: f64,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakePlayer {
    pub fn at(time: f64) -> Arc<Self> {
        Arc::new(Self {
            time,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl VideoPlayer for FakePlayer {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn pause(&self) {
        self.calls.lock().unwrap().push("pause");
    }

    fn play(&self) {
        self.calls.lock().unwrap().push("play");
    }
}

/// Recognizer driven by the test through the sender it was started with
#[derive(Default)]
pub struct ManualRecognizer {
    pub sender: Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
    pub starts: Mutex<usize>,
    pub stops: Mutex<usize>,
    pub fail_start: bool,
}

impl ManualRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail_start: true,
            ..Self::default()
        })
    }

    /// Push an event into the most recent recognition session
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    pub fn say(&self, text: &str) -> bool {
        self.emit(RecognitionEvent::Recognized(text.to_string()))
    }

    pub fn starts(&self) -> usize {
        *self.starts.lock().unwrap()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for ManualRecognizer {
    async fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<(), STTError> {
        if self.fail_start {
            return Err(STTError::Recognizer("no microphone".to_string()));
        }
        *self.starts.lock().unwrap() += 1;
        *self.sender.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop(&self) -> Result<(), STTError> {
        *self.stops.lock().unwrap() += 1;
        self.sender.lock().unwrap().take();
        Ok(())
    }
}

/// Verifier with a fixed list of answers, then accepting everything
pub struct ScriptedVerifier {
    answers: Mutex<VecDeque<Result<bool, STTError>>>,
    pub delay: Duration,
}

impl ScriptedVerifier {
    pub fn new(answers: Vec<Result<bool, STTError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(VecDeque::new()),
            delay,
        })
    }
}

#[async_trait::async_trait]
impl SpeakerVerifier for ScriptedVerifier {
    async fn verify(&self, _utterance: &str) -> Result<bool, STTError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answers.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
}

pub struct Harness {
    pub handler: Arc<ResponseHandler>,
    pub llm: Arc<ScriptedLLM>,
    pub engine: Arc<RecordingEngine>,
    pub synthesizer: Arc<SpeechSynthesisAdapter>,
    pub context_provider: Arc<StaticContext>,
    pub player: Arc<FakePlayer>,
    pub working: WorkingState,
}

pub fn harness(
    llm: Arc<ScriptedLLM>,
    engine: Arc<RecordingEngine>,
    context_provider: Arc<StaticContext>,
    speech_mode: SpeechMode,
) -> Harness {
    let player = FakePlayer::at(55.0);
    let working = WorkingState::new();
    let synthesizer = Arc::new(SpeechSynthesisAdapter::new(engine.clone()));
    let handler = Arc::new(ResponseHandler::new(
        HandlerConfig::new("vid-1").with_speech_mode(speech_mode),
        Collaborators {
            context: ConversationContext::with_defaults().shared(),
            coordinator: Arc::new(DualStreamCoordinator::new(llm.clone(), LLMConfig::default())),
            context_provider: context_provider.clone(),
            player: player.clone(),
            synthesizer: synthesizer.clone(),
            working: working.clone(),
        },
    ));

    Harness {
        handler,
        llm,
        engine,
        synthesizer,
        context_provider,
        player,
        working,
    }
}

/// Everything buffered on an event receiver right now
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<ResponseEvent>) -> Vec<ResponseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned tasks run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}
