use crate::audio_sink::{AudioError, AudioSink};
use futures_util::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum TTSError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),
    #[error("Audio output error: {0}")]
    Audio(#[from] AudioError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Synthesis was cancelled")]
    Cancelled,
}

impl TTSError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TTSError::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct TTSConfig {
    pub region: String,
    pub voice_name: String,
    pub language: String,
    pub output_format: String,
    /// Bytes handed to the sink per write (3200 = 100ms of 16kHz mono PCM)
    pub chunk_bytes: usize,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            region: "eastus".to_string(),
            voice_name: "hi-IN-MadhurNeural".to_string(), // Hinglish neural voice
            language: "hi-IN".to_string(),
            output_format: "raw-16khz-16bit-mono-pcm".to_string(),
            chunk_bytes: 3200,
        }
    }
}

/// Anything that can say a piece of text out loud
#[async_trait::async_trait]
pub trait Speaker: Send + Sync {
    /// Resolves when the audio for `text` has finished playing
    async fn speak(&self, text: &str) -> Result<(), TTSError>;

    /// Cut off any ongoing speech
    async fn stop(&self) -> Result<(), TTSError>;
}

/// One live connection to a synthesis engine
#[async_trait::async_trait]
pub trait SynthesisSession: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), TTSError>;

    /// Abort in-flight synthesis and release the session. Safe to call twice.
    async fn close(&self);
}

#[async_trait::async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn SynthesisSession>, TTSError>;
}

struct AzureInner {
    client: Client,
    api_key: String,
    config: TTSConfig,
    sink: Arc<dyn AudioSink>,
}

/// Azure neural text-to-speech over the REST endpoint, streaming PCM into an [`AudioSink`]
#[derive(Clone)]
pub struct AzureTTS {
    inner: Arc<AzureInner>,
}

impl AzureTTS {
    pub fn new(
        api_key: String,
        config: TTSConfig,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, TTSError> {
        if config.region.trim().is_empty() {
            return Err(TTSError::Config("Azure speech region is empty".to_string()));
        }
        if config.chunk_bytes < 2 || config.chunk_bytes % 2 != 0 {
            return Err(TTSError::Config(format!(
                "chunk_bytes must be a positive even number, got {}",
                config.chunk_bytes
            )));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            inner: Arc::new(AzureInner {
                client,
                api_key,
                config,
                sink,
            }),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.inner.config.region
        )
    }

    pub fn config(&self) -> &TTSConfig {
        &self.inner.config
    }

    async fn synthesize_to_sink(&self, text: &str, cancel: &CancellationToken) -> Result<(), TTSError> {
        let ssml = build_ssml(text, &self.inner.config);
        log::debug!("TTS: Synthesizing {} chars with {}", text.len(), self.inner.config.voice_name);

        let request = self
            .inner
            .client
            .post(self.endpoint())
            .header("Ocp-Apim-Subscription-Key", &self.inner.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.inner.config.output_format)
            .header("User-Agent", "tutor-overlay-rs")
            .body(ssml)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TTSError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TTSError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let sink = &self.inner.sink;
        let chunk_bytes = self.inner.config.chunk_bytes;
        let mut body = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::with_capacity(chunk_bytes * 2);
        let mut total = 0usize;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(TTSError::Cancelled),
                next = body.next() => next,
            };

            match next {
                Some(chunk) => {
                    pending.extend_from_slice(&chunk?);
                    while pending.len() >= chunk_bytes {
                        let block: Vec<u8> = pending.drain(..chunk_bytes).collect();
                        sink.write(&block).await?;
                        total += block.len();
                    }
                }
                None => break,
            }
        }

        let tail = take_whole_samples(&mut pending);
        if !tail.is_empty() {
            sink.write(&tail).await?;
            total += tail.len();
        }
        if !pending.is_empty() {
            log::warn!("TTS: Dropping {} trailing byte(s) of a partial sample", pending.len());
        }

        log::debug!("TTS: Received {} bytes of audio", total);

        tokio::select! {
            _ = cancel.cancelled() => Err(TTSError::Cancelled),
            finished = sink.finish() => finished.map_err(TTSError::from),
        }
    }
}

#[async_trait::async_trait]
impl SpeechEngine for AzureTTS {
    async fn create_session(&self) -> Result<Arc<dyn SynthesisSession>, TTSError> {
        log::debug!("TTS: Opening Azure synthesis session ({})", self.inner.config.region);
        Ok(Arc::new(AzureSession {
            tts: self.clone(),
            cancel: CancellationToken::new(),
        }))
    }
}

struct AzureSession {
    tts: AzureTTS,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl SynthesisSession for AzureSession {
    async fn speak(&self, text: &str) -> Result<(), TTSError> {
        if self.cancel.is_cancelled() {
            return Err(TTSError::Cancelled);
        }
        self.tts.synthesize_to_sink(text, &self.cancel).await
    }

    async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.tts.inner.sink.clear().await {
            log::warn!("TTS: Failed to clear audio output: {}", e);
        }
        log::debug!("TTS: Azure synthesis session closed");
    }
}

/// Split off the longest prefix made of whole 16-bit samples
fn take_whole_samples(pending: &mut Vec<u8>) -> Vec<u8> {
    let whole = pending.len() - pending.len() % 2;
    pending.drain(..whole).collect()
}

/// SSML document for the configured voice
pub fn build_ssml(text: &str, config: &TTSConfig) -> String {
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'>{text}</voice></speak>",
        lang = escape_xml(&config.language),
        voice = escape_xml(&config.voice_name),
        text = escape_xml(text)
    )
}

/// Safe for both text content and single-quoted attributes
fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Engine that speaks into the void, for muted runs
#[derive(Debug, Default)]
pub struct SilentEngine;

struct SilentSession;

#[async_trait::async_trait]
impl SpeechEngine for SilentEngine {
    async fn create_session(&self) -> Result<Arc<dyn SynthesisSession>, TTSError> {
        Ok(Arc::new(SilentSession))
    }
}

#[async_trait::async_trait]
impl SynthesisSession for SilentSession {
    async fn speak(&self, text: &str) -> Result<(), TTSError> {
        log::info!("🔇 (muted) {}", text);
        Ok(())
    }

    async fn close(&self) {}
}

/// Owns at most one synthesis session, created on first use and dropped on stop.
pub struct SpeechSynthesisAdapter {
    engine: Arc<dyn SpeechEngine>,
    session: Mutex<Option<Arc<dyn SynthesisSession>>>,
    speaking: watch::Sender<bool>,
}

impl SpeechSynthesisAdapter {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            engine,
            session: Mutex::new(None),
            speaking,
        }
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn session(&self) -> Result<Arc<dyn SynthesisSession>, TTSError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let session = self.engine.create_session().await?;
        *slot = Some(session.clone());
        log::debug!("TTS: Synthesis session created");
        Ok(session)
    }
}

#[async_trait::async_trait]
impl Speaker for SpeechSynthesisAdapter {
    async fn speak(&self, text: &str) -> Result<(), TTSError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let session = self.session().await?;

        log::info!("🗣️ Speaking: {}", text);
        self.speaking.send_replace(true);
        let result = session.speak(text).await;
        self.speaking.send_replace(false);

        if let Err(e) = &result {
            if !e.is_cancelled() {
                log::error!("TTS: Synthesis failed: {}", e);
            }
        }
        result
    }

    async fn stop(&self) -> Result<(), TTSError> {
        let session = self.session.lock().await.take();
        self.speaking.send_replace(false);

        match session {
            Some(session) => {
                session.close().await;
                log::debug!("TTS: Synthesis session stopped");
            }
            None => log::debug!("TTS: Stop requested with no active session"),
        }
        Ok(())
    }
}
