use thiserror::Error;

pub type Result<T> = std::result::Result<T, TutorError>;

#[derive(Error, Debug)]
pub enum TutorError {
    #[error("LLM error: {0}")]
    LLM(#[from] crate::llm::LLMError),

    #[error("TTS error: {0}")]
    TTS(#[from] crate::tts::TTSError),

    #[error("STT error: {0}")]
    STT(#[from] crate::stt::STTError),

    #[error("Audio error: {0}")]
    Audio(#[from] crate::audio_sink::AudioError),

    #[error("Video context error: {0}")]
    VideoContext(#[from] crate::video_context::ContextError),

    #[error("Segmentation error: {0}")]
    Segmentation(#[from] crate::speech::SegmentationError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl TutorError {
    /// True when the error only reports that the work was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TutorError::Cancelled
                | TutorError::LLM(crate::llm::LLMError::Cancelled)
                | TutorError::TTS(crate::tts::TTSError::Cancelled)
        )
    }
}
