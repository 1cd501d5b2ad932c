//! Playback tests on a real output device. Run with `--features test-audio`.

#![cfg(feature = "test-audio")]

use std::f32::consts::PI;
use std::time::Duration;
use tutor_overlay_rs::audio_sink::{AudioSink, CpalSink, SAMPLE_RATE};

/// 16-bit little-endian PCM sine tone
fn sine_wave(frequency: f32, duration_ms: u32) -> Vec<u8> {
    let num_samples = (SAMPLE_RATE as f32 * (duration_ms as f32 / 1000.0)) as usize;
    let mut bytes = Vec::with_capacity(num_samples * 2);

    for i in 0..num_samples {
        let t = i as f32 / SAMPLE_RATE as f32;
        let sample = ((2.0 * PI * frequency * t).sin() * 0.3 * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    bytes
}

fn open_sink() -> Option<CpalSink> {
    let _ = env_logger::builder().is_test(true).try_init();
    match CpalSink::new() {
        Ok(sink) => Some(sink),
        Err(e) => {
            println!("Audio device not available, skipping: {}", e);
            None
        }
    }
}

#[tokio::test]
async fn test_tone_plays_to_completion() {
    let Some(sink) = open_sink() else {
        return;
    };

    // Uneven chunk sizes, as they arrive from the network
    let tone = sine_wave(440.0, 500);
    for chunk in tone.chunks(3201) {
        sink.write(chunk).await.expect("write");
    }

    tokio::time::timeout(Duration::from_secs(3), sink.finish())
        .await
        .expect("finish should resolve once the tone has played")
        .expect("finish");
}

#[tokio::test]
async fn test_clear_cuts_playback_short() {
    let Some(sink) = open_sink() else {
        return;
    };

    sink.write(&sine_wave(330.0, 5000)).await.expect("write");
    tokio::time::sleep(Duration::from_millis(200)).await;
    sink.clear().await.expect("clear");

    tokio::time::timeout(Duration::from_millis(500), sink.finish())
        .await
        .expect("nothing should be left to play after clear")
        .expect("finish");
}
