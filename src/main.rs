use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tutor_overlay_rs::{
    audio_sink::{AudioSink, NullSink, WavFileSink},
    config::{load_config, TutorConfig},
    llm::{ConversationContext, DualStreamCoordinator, OpenAiLLM},
    playback::PlaybackClock,
    response_handler::{Collaborators, HandlerConfig, ResponseEvent, ResponseHandler},
    session::TutorSession,
    speech::SpeechMode,
    state::WorkingState,
    stt::{AcceptAllSpeakers, AzureSTT, LineRecognizer, SpeechRecognizer, VoiceCapture, WavDirectory},
    tts::{AzureTTS, SilentEngine, SpeechEngine, SpeechSynthesisAdapter},
    video_context::HttpVideoContextClient,
};

/// Ask questions about an educational video; answers arrive as written notes and a spoken explanation
#[derive(Parser, Debug)]
#[command(name = "tutor-overlay", version)]
struct Args {
    /// Video the questions are about
    #[arg(long, default_value = "demo-video")]
    video_id: String,

    /// Playback position to start from, in seconds
    #[arg(long, default_value_t = 0.0)]
    start_time: f64,

    /// When to start speaking the explanation
    #[arg(long, value_enum)]
    speech_mode: Option<SpeechMode>,

    /// Number of user/assistant messages kept in the conversation
    #[arg(long)]
    max_history: Option<usize>,

    /// Save spoken answers as WAV files instead of playing them
    #[arg(long)]
    wav_dir: Option<PathBuf>,

    /// Do not synthesize speech at all
    #[arg(long)]
    mute: bool,

    /// Transcribe the spoken questions in this directory of WAV files with
    /// Azure instead of reading typed ones
    #[arg(long)]
    audio_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::info!("🚀 Initializing tutor-overlay-rs");

    let api_config = load_config().context("failed to load API configuration")?;
    let mut tutor_config = TutorConfig::from_env().context("invalid tutor configuration")?;
    if let Some(speech_mode) = args.speech_mode {
        tutor_config.speech_mode = speech_mode;
    }
    if let Some(max_history) = args.max_history {
        tutor_config.max_history = max_history.max(1);
    }

    let llm = OpenAiLLM::with_config(
        api_config.openai_key().to_string(),
        tutor_config.openai_base_url.as_str(),
        tutor_config.llm_config(),
    )
    .context("failed to create LLM client")?;
    let coordinator = Arc::new(DualStreamCoordinator::new(
        Arc::new(llm),
        tutor_config.llm_config(),
    ));
    log::info!("🤖 LLM client initialized ({})", tutor_config.model);

    let engine: Arc<dyn SpeechEngine> = match (args.mute, api_config.azure_speech_key()) {
        (false, Some(key)) => {
            let sink = audio_output(args.wav_dir.as_ref())?;
            Arc::new(
                AzureTTS::new(key.to_string(), tutor_config.tts_config(), sink)
                    .context("failed to create Azure TTS client")?,
            )
        }
        _ => Arc::new(SilentEngine),
    };
    let synthesizer = Arc::new(SpeechSynthesisAdapter::new(engine));
    log::info!("🔊 Speech synthesis initialized");

    let context_provider = Arc::new(
        HttpVideoContextClient::new(&tutor_config.video_context_url)
            .context("invalid VIDEO_CONTEXT_URL")?,
    );

    let shutdown = CancellationToken::new();
    let clock = PlaybackClock::new(args.start_time);
    let _ticker = clock.spawn_ticker(shutdown.clone());

    let working = WorkingState::new();
    let handler = Arc::new(ResponseHandler::new(
        HandlerConfig::new(&args.video_id).with_speech_mode(tutor_config.speech_mode),
        Collaborators {
            context: ConversationContext::new(tutor_config.max_history).shared(),
            coordinator,
            context_provider,
            player: clock,
            synthesizer,
            working: working.clone(),
        },
    ));

    let printer = tokio::spawn(print_events(handler.subscribe()));

    let recognizer: Arc<dyn SpeechRecognizer> = match &args.audio_dir {
        Some(dir) => {
            let key = api_config
                .azure_speech_key()
                .context("--audio-dir needs AZURE_SPEECH_KEY for recognition")?;
            let source = WavDirectory::open(dir).context("failed to read the audio directory")?;
            Arc::new(
                AzureSTT::new(key.to_string(), tutor_config.stt_config(), Arc::new(source))
                    .context("failed to create Azure STT client")?,
            )
        }
        None => Arc::new(LineRecognizer::stdin()),
    };
    log::info!("🎤 Speech recognition initialized");

    let (capture, capture_events) = VoiceCapture::new(
        recognizer,
        Arc::new(AcceptAllSpeakers),
        working,
    );
    let mut session = TutorSession::new(capture, capture_events, handler);

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("🛑 Received Ctrl+C, shutting down...");
            ctrl_c.cancel();
        }
    });

    println!("🎓 Tutor ready for video '{}'", args.video_id);
    if args.audio_dir.is_some() {
        println!("   Answering the recorded questions (Ctrl+C to exit)");
    } else {
        println!("   Type a question and press Enter (Ctrl+D or Ctrl+C to exit)");
    }

    let result = session.run(shutdown.clone()).await;
    shutdown.cancel();
    drop(session);
    printer.abort();

    result.context("tutor session ended with an error")?;
    log::info!("👋 Goodbye");
    Ok(())
}

fn audio_output(wav_dir: Option<&PathBuf>) -> anyhow::Result<Arc<dyn AudioSink>> {
    if let Some(dir) = wav_dir {
        let sink = WavFileSink::new(dir).context("failed to prepare WAV output directory")?;
        return Ok(Arc::new(sink));
    }

    #[cfg(feature = "speaker")]
    {
        match tutor_overlay_rs::audio_sink::CpalSink::new() {
            Ok(sink) => return Ok(Arc::new(sink)),
            Err(e) => log::warn!("No audio output available, speech will be discarded: {}", e),
        }
    }

    #[cfg(not(feature = "speaker"))]
    log::warn!("Built without the `speaker` feature, speech will be discarded (use --wav-dir to keep it)");

    Ok(Arc::new(NullSink::new()))
}

async fn print_events(mut events: broadcast::Receiver<ResponseEvent>) {
    let mut printed = 0usize;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Printer skipped {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ResponseEvent::ResponseStarted(query) => {
                printed = 0;
                println!("\n💭 {}\n", query);
            }
            ResponseEvent::NotesUpdated(notes) => {
                if let Some(new_text) = notes.get(printed..) {
                    print!("{}", new_text);
                    let _ = std::io::stdout().flush();
                    printed = notes.len();
                }
            }
            ResponseEvent::VoiceoverUpdated(_) => {}
            ResponseEvent::SpeakingChanged(speaking) => {
                log::debug!("Speaking: {}", speaking);
            }
            ResponseEvent::Error(message) => eprintln!("\n❌ {}", message),
            ResponseEvent::ResponseEnded => println!("\n"),
        }
    }
}
