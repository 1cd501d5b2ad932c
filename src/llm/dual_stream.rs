use super::client::{ChatStreamer, LLMConfig, LLMError, Message};
use super::prompts::SystemPrompts;
use crate::video_context::VideoMetadata;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StreamKind {
    #[strum(serialize = "notes")]
    Notes,
    #[strum(serialize = "voiceover")]
    Voiceover,
}

impl StreamKind {
    fn update(self, cumulative: String) -> GenerationEvent {
        match self {
            StreamKind::Notes => GenerationEvent::NotesDelta(cumulative),
            StreamKind::Voiceover => GenerationEvent::VoiceoverDelta(cumulative),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalResponse {
    pub notes: String,
    pub voiceover: String,
}

/// Progress of one dual generation. Delta events carry the full cumulative
/// text of their stream, not just the newest chunk.
#[derive(Debug)]
pub enum GenerationEvent {
    NotesDelta(String),
    VoiceoverDelta(String),
    Complete(FinalResponse),
    Error(LLMError),
}

/// Event sequence of a running generation. Dropping it cancels the generation.
pub struct GenerationStream {
    events: UnboundedReceiverStream<GenerationEvent>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl GenerationStream {
    /// Stop both streams at their next chunk boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for GenerationStream {
    type Item = GenerationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs the notes writer and the spoken explainer as two concurrent
/// completions over the same history.
pub struct DualStreamCoordinator {
    llm: Arc<dyn ChatStreamer>,
    config: LLMConfig,
}

impl DualStreamCoordinator {
    pub fn new(llm: Arc<dyn ChatStreamer>, config: LLMConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    /// Start both generations. `cancel` is checked between chunk reads.
    pub fn generate(
        &self,
        history: &[Message],
        metadata: &VideoMetadata,
        cancel: CancellationToken,
    ) -> GenerationStream {
        let (tx, rx) = mpsc::unbounded_channel();

        let notes_messages = with_system_prompt(SystemPrompts::notes_writer(metadata), history);
        let voiceover_messages = with_system_prompt(SystemPrompts::explainer(metadata), history);

        let llm = self.llm.clone();
        let config = self.config.clone();
        let token = cancel.clone();

        log::info!(
            "🧠 Starting dual generation ({} history messages, model {})",
            history.len(),
            config.model
        );

        let task = tokio::spawn(async move {
            let notes = drain_stream(
                llm.as_ref(),
                notes_messages,
                &config,
                StreamKind::Notes,
                &tx,
                &token,
            );
            let voiceover = drain_stream(
                llm.as_ref(),
                voiceover_messages,
                &config,
                StreamKind::Voiceover,
                &tx,
                &token,
            );

            match tokio::try_join!(notes, voiceover) {
                Ok((notes, voiceover)) => {
                    log::info!(
                        "✅ Dual generation complete (notes: {} chars, voiceover: {} chars)",
                        notes.len(),
                        voiceover.len()
                    );
                    let _ = tx.send(GenerationEvent::Complete(FinalResponse { notes, voiceover }));
                }
                Err(LLMError::Cancelled) => {
                    log::info!("🛑 Dual generation cancelled");
                }
                Err(e) => {
                    log::error!("❌ Dual generation failed: {}", e);
                    let _ = tx.send(GenerationEvent::Error(e));
                }
            }
        });

        GenerationStream {
            events: UnboundedReceiverStream::new(rx),
            task,
            cancel,
        }
    }

    /// Callback form of [`generate`](Self::generate). Resolves once the
    /// generation completed or failed.
    pub async fn generate_with_handlers(
        &self,
        history: &[Message],
        mut handlers: StreamHandlers,
        metadata: &VideoMetadata,
    ) {
        let mut stream = self.generate(history, metadata, CancellationToken::new());

        while let Some(event) = stream.next().await {
            match event {
                GenerationEvent::NotesDelta(notes) => {
                    if let Some(on_notes) = handlers.on_notes_update.as_mut() {
                        on_notes(&notes);
                    }
                }
                GenerationEvent::VoiceoverDelta(voiceover) => {
                    if let Some(on_voiceover) = handlers.on_voiceover_update.as_mut() {
                        on_voiceover(&voiceover);
                    }
                }
                GenerationEvent::Complete(response) => {
                    if let Some(on_complete) = handlers.on_complete.take() {
                        on_complete(response);
                    }
                }
                GenerationEvent::Error(error) => {
                    if let Some(on_error) = handlers.on_error.take() {
                        on_error(error);
                    }
                }
            }
        }
    }
}

fn with_system_prompt(prompt: String, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(prompt));
    messages.extend_from_slice(history);
    messages
}

async fn drain_stream(
    llm: &dyn ChatStreamer,
    messages: Vec<Message>,
    config: &LLMConfig,
    kind: StreamKind,
    tx: &mpsc::UnboundedSender<GenerationEvent>,
    cancel: &CancellationToken,
) -> Result<String, LLMError> {
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LLMError::Cancelled),
        result = llm.stream_chat(messages, config) => result.map_err(|e| {
            log::error!("Failed to open {} stream: {}", kind, e);
            e
        })?,
    };

    let mut accumulated = String::new();
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LLMError::Cancelled),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(delta)) => {
                chunks += 1;
                accumulated.push_str(&delta);
                if tx.send(kind.update(accumulated.clone())).is_err() {
                    // Nobody is listening anymore
                    return Err(LLMError::Cancelled);
                }
            }
            Some(Err(e)) => {
                log::error!("Error in {} stream after {} chunks: {}", kind, chunks, e);
                return Err(e);
            }
            None => break,
        }
    }

    log::debug!("{} stream finished after {} chunks", kind, chunks);
    Ok(accumulated)
}

type TextCallback = Box<dyn FnMut(&str) + Send>;

/// Optional callbacks for [`DualStreamCoordinator::generate_with_handlers`]
#[derive(Default)]
pub struct StreamHandlers {
    pub on_notes_update: Option<TextCallback>,
    pub on_voiceover_update: Option<TextCallback>,
    pub on_complete: Option<Box<dyn FnOnce(FinalResponse) + Send>>,
    pub on_error: Option<Box<dyn FnOnce(LLMError) + Send>>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_notes_update(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_notes_update = Some(Box::new(f));
        self
    }

    pub fn on_voiceover_update(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_voiceover_update = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(FinalResponse) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(LLMError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::TokenStream;

    struct EchoStreamer;

    #[async_trait::async_trait]
    impl ChatStreamer for EchoStreamer {
        async fn stream_chat(
            &self,
            messages: Vec<Message>,
            _config: &LLMConfig,
        ) -> Result<TokenStream, LLMError> {
            let label = if messages[0].content().contains(crate::llm::prompts::NOTES_AGENT) {
                "notes"
            } else {
                "voice"
            };
            let chunks: Vec<Result<String, LLMError>> =
                vec![Ok(format!("{} ", label)), Ok(messages.len().to_string())];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    #[test]
    fn test_system_prompt_prepended() {
        let history = vec![Message::system("session"), Message::user("q")];
        let messages = with_system_prompt("agent".to_string(), &history);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content(), "agent");
        assert_eq!(messages[1].content(), "session");
    }

    #[tokio::test]
    async fn test_deltas_are_cumulative() {
        let coordinator = DualStreamCoordinator::new(Arc::new(EchoStreamer), LLMConfig::default());
        let history = vec![Message::user("What is work?")];
        let mut stream = coordinator.generate(
            &history,
            &VideoMetadata::default(),
            CancellationToken::new(),
        );

        let mut notes_updates = Vec::new();
        let mut complete = None;
        while let Some(event) = stream.next().await {
            match event {
                GenerationEvent::NotesDelta(notes) => notes_updates.push(notes),
                GenerationEvent::Complete(response) => complete = Some(response),
                _ => {}
            }
        }

        assert_eq!(notes_updates, vec!["notes ".to_string(), "notes 2".to_string()]);
        let complete = complete.expect("generation should complete");
        assert_eq!(complete.notes, "notes 2");
        assert_eq!(complete.voiceover, "voice 2");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_emits_nothing() {
        let coordinator = DualStreamCoordinator::new(Arc::new(EchoStreamer), LLMConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let stream = coordinator.generate(&[], &VideoMetadata::default(), token);
        let events: Vec<GenerationEvent> = stream.collect().await;
        assert!(events.is_empty());
    }
}
