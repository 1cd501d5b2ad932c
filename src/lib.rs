pub mod audio_sink;
pub mod config;
pub mod error;
pub mod llm;
pub mod playback;
pub mod response_handler;
pub mod session;
pub mod speech;
pub mod state;
pub mod stt;
pub mod tts;
pub mod video_context;

pub use error::{Result, TutorError};
