use crate::state::WorkingState;
use reqwest::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Error, Debug)]
pub enum STTError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Recognizer error: {0}")]
    Recognizer(String),
    #[error("Speaker verification error: {0}")]
    Verification(String),
    #[error("Recognition canceled: {0}")]
    Canceled(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// One completed utterance
    Recognized(String),
    /// The recognizer gave up, e.g. lost its audio source
    Canceled { reason: String },
    /// No more input will ever arrive
    EndOfStream,
}

/// Continuous speech recognition
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<(), STTError>;
    async fn stop(&self) -> Result<(), STTError>;
}

/// Decides whether an utterance came from the enrolled learner
#[async_trait::async_trait]
pub trait SpeakerVerifier: Send + Sync {
    async fn verify(&self, utterance: &str) -> Result<bool, STTError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllSpeakers;

#[async_trait::async_trait]
impl SpeakerVerifier for AcceptAllSpeakers {
    async fn verify(&self, _utterance: &str) -> Result<bool, STTError> {
        Ok(true)
    }
}

/// Background recognition loop and its cancel handle
#[derive(Default)]
struct RecognitionTask(std::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>);

impl RecognitionTask {
    /// Spawn `run` unless an earlier loop is still going
    fn start<Fut>(&self, name: &str, run: impl FnOnce(CancellationToken) -> Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, handle)) = task.as_ref() {
            if !handle.is_finished() {
                log::warn!("STT: {} already running, ignoring start", name);
                return;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        *task = Some((cancel, handle));
        log::debug!("STT: {} started", name);
    }

    async fn stop(&self) -> Result<(), STTError> {
        let running = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            handle
                .await
                .map_err(|e| STTError::Recognizer(format!("recognition task failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Treats every non-empty line of a text source as a recognized utterance.
/// The line reader survives restarts, so buffered input is not lost.
pub struct LineRecognizer<R> {
    lines: Arc<Mutex<Lines<R>>>,
    task: RecognitionTask,
}

impl<R> LineRecognizer<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: Arc::new(Mutex::new(reader.lines())),
            task: RecognitionTask::default(),
        }
    }
}

impl LineRecognizer<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait::async_trait]
impl<R> SpeechRecognizer for LineRecognizer<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<(), STTError> {
        let lines = self.lines.clone();

        self.task.start("Line recognizer", |token| async move {
            loop {
                let mut reader = lines.lock().await;
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = reader.next_line() => next,
                };
                drop(reader);

                let event = match next {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => RecognitionEvent::Recognized(line),
                    Ok(None) => RecognitionEvent::EndOfStream,
                    Err(e) => RecognitionEvent::Canceled {
                        reason: e.to_string(),
                    },
                };

                let finished = !matches!(event, RecognitionEvent::Recognized(_));
                if events.send(event).is_err() || finished {
                    break;
                }
            }
            log::debug!("STT: Line recognizer stopped");
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), STTError> {
        self.task.stop().await
    }
}

/// Spoken utterances waiting to be transcribed, one WAV buffer each
#[async_trait::async_trait]
pub trait UtteranceSource: Send + Sync {
    /// `None` once the source is exhausted
    async fn next_utterance(&self) -> Result<Option<Vec<u8>>, STTError>;
}

/// Replays the `.wav` files of a directory in file-name order
pub struct WavDirectory {
    pending: std::sync::Mutex<VecDeque<PathBuf>>,
}

impl WavDirectory {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, STTError> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            {
                files.push(path);
            }
        }
        files.sort();

        log::info!("STT: {} utterance file(s) in {}", files.len(), dir.display());
        Ok(Self {
            pending: std::sync::Mutex::new(files.into()),
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl UtteranceSource for WavDirectory {
    async fn next_utterance(&self) -> Result<Option<Vec<u8>>, STTError> {
        let next = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(path) => {
                log::debug!("STT: Reading utterance {}", path.display());
                Ok(Some(tokio::fs::read(&path).await?))
            }
            None => Ok(None),
        }
    }
}

const RECOGNITION_PATH: &str = "/speech/recognition/conversation/cognitiveservices/v1";

#[derive(Debug, Clone)]
pub struct STTConfig {
    pub region: String,
    /// Recognition locale; `hi-IN` also transcribes the English words of Hinglish
    pub language: String,
    pub server_timeout: Duration,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            region: "eastus".to_string(),
            language: "hi-IN".to_string(),
            server_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShortAudioResult {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
}

/// Text of one short-audio recognition result; `None` when nothing was said
pub fn parse_recognition(body: &str) -> Result<Option<String>, STTError> {
    let result: ShortAudioResult = serde_json::from_str(body)
        .map_err(|e| STTError::Recognizer(format!("Invalid recognition result: {}", e)))?;

    match result.recognition_status.as_str() {
        "Success" => {
            let text = result.display_text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Ok(None),
        status => Err(STTError::Recognizer(format!(
            "Azure recognition failed with status {}",
            status
        ))),
    }
}

struct AzureSTTInner {
    client: Client,
    api_key: String,
    endpoint: Url,
}

impl AzureSTTInner {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<Option<String>, STTError> {
        log::debug!("STT: Sending {} bytes for recognition", wav.len());

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "audio/wav; codecs=audio/pcm; samplerate=16000")
            .header("Accept", "application/json")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(STTError::Recognizer(format!(
                "Azure returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        parse_recognition(&body)
    }
}

/// Azure speech recognition over the short-audio REST endpoint, one request
/// per utterance pulled from an [`UtteranceSource`]
pub struct AzureSTT {
    inner: Arc<AzureSTTInner>,
    source: Arc<dyn UtteranceSource>,
    task: RecognitionTask,
}

impl AzureSTT {
    pub fn new(
        api_key: String,
        config: STTConfig,
        source: Arc<dyn UtteranceSource>,
    ) -> Result<Self, STTError> {
        if config.region.trim().is_empty() {
            return Err(STTError::Config("Azure speech region is empty".to_string()));
        }
        let base_url = format!("https://{}.stt.speech.microsoft.com", config.region);
        Self::with_base_url(api_key, &base_url, config, source)
    }

    /// Recognize against another host, e.g. a private endpoint
    pub fn with_base_url(
        api_key: String,
        base_url: &str,
        config: STTConfig,
        source: Arc<dyn UtteranceSource>,
    ) -> Result<Self, STTError> {
        let endpoint = Url::parse_with_params(
            &format!("{}{}", base_url.trim_end_matches('/'), RECOGNITION_PATH),
            &[("language", config.language.as_str()), ("format", "simple")],
        )
        .map_err(|e| STTError::Config(format!("Invalid recognition endpoint: {}", e)))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.server_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(AzureSTTInner {
                client,
                api_key,
                endpoint,
            }),
            source,
            task: RecognitionTask::default(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for AzureSTT {
    async fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<(), STTError> {
        let inner = self.inner.clone();
        let source = self.source.clone();

        self.task.start("Azure recognizer", |token| async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = source.next_utterance() => next,
                };

                let event = match next {
                    Ok(Some(wav)) => {
                        let result = tokio::select! {
                            _ = token.cancelled() => break,
                            result = inner.transcribe(wav) => result,
                        };
                        match result {
                            Ok(Some(text)) => RecognitionEvent::Recognized(text),
                            Ok(None) => {
                                log::debug!("STT: No speech in utterance");
                                continue;
                            }
                            Err(e) => RecognitionEvent::Canceled {
                                reason: e.to_string(),
                            },
                        }
                    }
                    Ok(None) => RecognitionEvent::EndOfStream,
                    Err(e) => RecognitionEvent::Canceled {
                        reason: e.to_string(),
                    },
                };

                let finished = !matches!(event, RecognitionEvent::Recognized(_));
                if events.send(event).is_err() || finished {
                    break;
                }
            }
            log::debug!("STT: Azure recognizer stopped");
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), STTError> {
        self.task.stop().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Utterance(String),
    Error(String),
    Closed,
}

struct CaptureSession {
    forwarder: JoinHandle<()>,
}

/// Start/stop lifecycle around a [`SpeechRecognizer`], gated on the shared
/// working flag.
pub struct VoiceCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
    verifier: Arc<dyn SpeakerVerifier>,
    working: WorkingState,
    out: mpsc::UnboundedSender<CaptureEvent>,
    active: Mutex<Option<CaptureSession>>,
}

impl VoiceCapture {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        verifier: Arc<dyn SpeakerVerifier>,
        working: WorkingState,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (out, rx) = mpsc::unbounded_channel();
        (
            Self {
                recognizer,
                verifier,
                working,
                out,
                active: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn working(&self) -> &WorkingState {
        &self.working
    }

    pub async fn is_listening(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| !session.forwarder.is_finished())
    }

    /// Begin listening. A session left over from an earlier cycle is torn
    /// down first; an already running one is left alone.
    pub async fn start(&self) -> Result<(), STTError> {
        let mut active = self.active.lock().await;

        if let Some(session) = active.take() {
            if self.working.is_working() && !session.forwarder.is_finished() {
                log::debug!("STT: Already listening");
                *active = Some(session);
                return Ok(());
            }
            self.teardown(session).await;
        }

        self.working.set(true);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.recognizer.start(tx).await {
            log::error!("STT: Could not start recognition: {}", e);
            self.working.set(false);
            return Err(e);
        }

        let forwarder = tokio::spawn(forward_recognitions(
            rx,
            self.verifier.clone(),
            self.working.clone(),
            self.out.clone(),
        ));
        *active = Some(CaptureSession { forwarder });

        log::info!("🎤 Listening...");
        Ok(())
    }

    /// Stop listening. Recognitions still in flight are discarded.
    pub async fn stop(&self) {
        self.working.set(false);

        let mut active = self.active.lock().await;
        match active.take() {
            Some(session) => self.teardown(session).await,
            None => log::debug!("STT: Stop requested while not listening"),
        }
    }

    async fn teardown(&self, session: CaptureSession) {
        session.forwarder.abort();
        if let Err(e) = self.recognizer.stop().await {
            log::warn!("STT: Error stopping recognizer: {}", e);
        }
        log::debug!("STT: Capture session torn down");
    }
}

async fn forward_recognitions(
    mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
    verifier: Arc<dyn SpeakerVerifier>,
    working: WorkingState,
    out: mpsc::UnboundedSender<CaptureEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RecognitionEvent::Recognized(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if !working.is_working() {
                    log::debug!("STT: Dropping recognition after stop: {}", text);
                    continue;
                }

                match verifier.verify(&text).await {
                    Ok(true) => {}
                    Ok(false) => {
                        log::warn!("STT: Unverified speaker, dropping utterance");
                        continue;
                    }
                    Err(e) => {
                        log::warn!("STT: Speaker verification failed, forwarding anyway: {}", e);
                    }
                }

                // Verification is async; stop may have happened meanwhile
                if !working.is_working() {
                    log::debug!("STT: Dropping recognition after stop: {}", text);
                    continue;
                }

                log::info!("📝 Recognized: {}", text);
                if out.send(CaptureEvent::Utterance(text)).is_err() {
                    break;
                }
            }
            RecognitionEvent::Canceled { reason } => {
                log::error!("STT: Speech canceled: {}", reason);
                working.set(false);
                let _ = out.send(CaptureEvent::Error(format!("Speech canceled: {}", reason)));
            }
            RecognitionEvent::EndOfStream => {
                log::info!("STT: Input closed");
                let _ = out.send(CaptureEvent::Closed);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_line_recognizer_emits_lines_then_end() {
        let input: &[u8] = b"What is velocity?\n\n   \nAnd speed?\n";
        let recognizer = LineRecognizer::new(input);
        let (tx, mut rx) = mpsc::unbounded_channel();

        recognizer.start(tx).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Recognized("What is velocity?".to_string()))
        );
        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Recognized("And speed?".to_string()))
        );
        assert_eq!(rx.recv().await, Some(RecognitionEvent::EndOfStream));
        assert_eq!(rx.recv().await, None);

        recognizer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_line_recognizer_resumes_after_restart() {
        let (client, server) = tokio::io::duplex(64);
        let recognizer = LineRecognizer::new(BufReader::new(server));
        let mut client = client;

        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.start(tx).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"first\n")
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Recognized("first".to_string()))
        );

        recognizer.stop().await.unwrap();
        // Double stop is a no-op
        recognizer.stop().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.start(tx).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"second\n")
            .await
            .unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(next, Some(RecognitionEvent::Recognized("second".to_string())));
        recognizer.stop().await.unwrap();
    }

    #[test]
    fn test_parse_recognition() {
        let success = r#"{"RecognitionStatus":"Success","DisplayText":"Velocity kya hai?","Offset":100,"Duration":200}"#;
        assert_eq!(
            parse_recognition(success).unwrap(),
            Some("Velocity kya hai?".to_string())
        );

        let silence = r#"{"RecognitionStatus":"InitialSilenceTimeout","Offset":0,"Duration":0}"#;
        assert_eq!(parse_recognition(silence).unwrap(), None);
        assert_eq!(
            parse_recognition(r#"{"RecognitionStatus":"NoMatch"}"#).unwrap(),
            None
        );

        assert!(matches!(
            parse_recognition(r#"{"RecognitionStatus":"Error"}"#),
            Err(STTError::Recognizer(_))
        ));
        assert!(parse_recognition("not json").is_err());
    }

    #[test]
    fn test_azure_endpoint_carries_language() {
        let source = Arc::new(WavDirectory {
            pending: std::sync::Mutex::new(VecDeque::new()),
        });
        let stt = AzureSTT::new("key".to_string(), STTConfig::default(), source.clone()).unwrap();
        assert_eq!(
            stt.endpoint().as_str(),
            "https://eastus.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language=hi-IN&format=simple"
        );

        let blank = STTConfig {
            region: " ".to_string(),
            ..STTConfig::default()
        };
        assert!(matches!(
            AzureSTT::new("key".to_string(), blank, source),
            Err(STTError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_wav_directory_replays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("02.wav"), b"second").unwrap();
        std::fs::write(dir.path().join("01.WAV"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skipped").unwrap();

        let source = WavDirectory::open(dir.path()).unwrap();
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.next_utterance().await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(source.next_utterance().await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(source.next_utterance().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_accept_all_speakers() {
        assert!(AcceptAllSpeakers.verify("anything").await.unwrap());
    }
}
