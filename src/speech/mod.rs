pub mod segmenter;
pub mod sequencer;

use clap::ValueEnum;
use strum::{Display, EnumString};

pub use segmenter::{SegmentationError, SentenceBuffer};
pub use sequencer::{DrainStep, SpeechEvent, SpeechSequencer};

/// When explainer text reaches the speech queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, ValueEnum)]
#[strum(ascii_case_insensitive)]
pub enum SpeechMode {
    /// Speak each sentence as soon as generation completes it
    #[default]
    #[strum(serialize = "incremental")]
    #[value(name = "incremental")]
    Incremental,
    /// Speak the whole explanation once both streams have finished
    #[strum(serialize = "whole-response")]
    #[value(name = "whole-response")]
    WholeResponse,
}
