//! Live tests against the OpenAI API. Run with `--features test-api`.
#![cfg(feature = "test-api")]

use futures_util::StreamExt;
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tutor_overlay_rs::config::{ApiConfig, TutorConfig};
use tutor_overlay_rs::llm::{
    ConversationContext, DualStreamCoordinator, GenerationEvent, OpenAiLLM, SystemPrompts,
};
use tutor_overlay_rs::video_context::VideoMetadata;

fn coordinator() -> Option<DualStreamCoordinator> {
    if env::var("OPENAI_API_KEY").is_err() {
        println!("OPENAI_API_KEY not set, skipping integration test");
        return None;
    }

    let api = ApiConfig::load().expect("Failed to load config");
    let tutor = TutorConfig::from_env().expect("Failed to load tutor config");
    let llm = OpenAiLLM::with_config(
        api.openai_key().to_string(),
        tutor.openai_base_url.as_str(),
        tutor.llm_config(),
    )
    .expect("Failed to create client");
    Some(DualStreamCoordinator::new(Arc::new(llm), tutor.llm_config()))
}

#[tokio::test]
async fn test_live_dual_generation() {
    let Some(coordinator) = coordinator() else {
        return;
    };

    let metadata = VideoMetadata::default();
    let mut context = ConversationContext::with_defaults();
    context.add_personalised_system_message(SystemPrompts::personalised_session(&metadata));
    context.add_user_message("What is Newton's first law? Answer briefly.");

    let mut stream = coordinator.generate(
        &context.get_messages(),
        &metadata,
        CancellationToken::new(),
    );

    let mut notes_updates = 0;
    let mut final_response = None;
    while let Some(event) = stream.next().await {
        match event {
            GenerationEvent::NotesDelta(_) => notes_updates += 1,
            GenerationEvent::VoiceoverDelta(_) => {}
            GenerationEvent::Complete(response) => final_response = Some(response),
            GenerationEvent::Error(e) => panic!("Generation failed: {}", e),
        }
    }

    let response = final_response.expect("generation should complete");
    println!("Notes:\n{}\n\nVoiceover:\n{}", response.notes, response.voiceover);
    assert!(notes_updates > 0);
    assert!(!response.notes.trim().is_empty());
    assert!(!response.voiceover.trim().is_empty());
}

#[tokio::test]
async fn test_live_generation_can_be_cancelled() {
    let Some(coordinator) = coordinator() else {
        return;
    };

    let mut history = ConversationContext::with_defaults();
    history.add_user_message("Write a long explanation of photosynthesis.");

    let cancel = CancellationToken::new();
    let mut stream = coordinator.generate(
        &history.get_messages(),
        &VideoMetadata::default(),
        cancel.clone(),
    );

    // Cancel as soon as the first tokens arrive
    if stream.next().await.is_some() {
        cancel.cancel();
    }

    while let Some(event) = stream.next().await {
        assert!(
            !matches!(event, GenerationEvent::Complete(_)),
            "cancelled generation must not complete"
        );
    }
}
