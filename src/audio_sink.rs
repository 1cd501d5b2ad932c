use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Sample rate of every PCM buffer handed to a sink
pub const SAMPLE_RATE: u32 = 16000;

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Failed to write audio data: {0}")]
    WriteError(String),

    #[error("Failed to stop audio playback: {0}")]
    StopError(String),

    #[error("Failed to create WAV file: {0}")]
    WavCreationError(String),

    #[error("Audio device error: {0}")]
    DeviceError(String),
}

/// Core trait for audio output handling
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Write audio data to the sink. The data is expected to be
    /// 16-bit PCM at 16kHz mono.
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError>;

    /// Wait until everything written for the current utterance has been played
    async fn finish(&self) -> Result<(), AudioError>;

    /// Stop audio playback and clear any buffered data
    async fn clear(&self) -> Result<(), AudioError>;
}

fn pcm_to_samples(audio_data: &[u8]) -> impl Iterator<Item = i16> + '_ {
    audio_data
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
}

/// Discards all audio. Used when speech output is muted or no output is configured.
#[derive(Debug, Default)]
pub struct NullSink {
    bytes_written: AtomicUsize,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
        self.bytes_written
            .fetch_add(audio_data.len(), Ordering::AcqRel);
        Ok(())
    }

    async fn finish(&self) -> Result<(), AudioError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Writes every finished utterance to its own `utterance-NNNN.wav` file
pub struct WavFileSink {
    dir: PathBuf,
    samples: Mutex<Vec<i16>>,
    counter: AtomicUsize,
}

impl WavFileSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, AudioError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| AudioError::WavCreationError(format!("{}: {}", dir.display(), e)))?;

        log::debug!("AudioSink: Writing utterances to {}", dir.display());
        Ok(Self {
            dir,
            samples: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of WAV files written so far
    pub fn utterances_written(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    fn take_samples(&self) -> Vec<i16> {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *samples)
    }
}

#[async_trait::async_trait]
impl AudioSink for WavFileSink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.extend(pcm_to_samples(audio_data));
        Ok(())
    }

    async fn finish(&self) -> Result<(), AudioError> {
        let samples = self.take_samples();
        if samples.is_empty() {
            return Ok(());
        }

        let index = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        let path = self.dir.join(format!("utterance-{:04}.wav", index));
        let sample_count = samples.len();

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), hound::Error> {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: SAMPLE_RATE,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&target, spec)?;
            for sample in samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()
        })
        .await
        .map_err(|e| AudioError::WavCreationError(e.to_string()))?
        .map_err(|e| AudioError::WavCreationError(e.to_string()))?;

        log::info!(
            "💾 Saved utterance to {} ({} samples)",
            path.display(),
            sample_count
        );
        Ok(())
    }

    async fn clear(&self) -> Result<(), AudioError> {
        let dropped = self.take_samples().len();
        if dropped > 0 {
            log::debug!("AudioSink: Discarded {} unsaved samples", dropped);
        }
        Ok(())
    }
}

#[cfg(feature = "speaker")]
pub use speaker::CpalSink;

#[cfg(feature = "speaker")]
mod speaker {
    use super::{pcm_to_samples, AudioError, AudioSink, SAMPLE_RATE};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::mpsc::{channel, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

    /// Plays audio on the default output device. The cpal stream lives on
    /// its own thread; writes go straight into the shared sample queue.
    pub struct CpalSink {
        queue: SampleQueue,
        shutdown: Sender<()>,
        audio_thread: Option<thread::JoinHandle<()>>,
    }

    impl CpalSink {
        pub fn new() -> Result<Self, AudioError> {
            log::debug!("AudioSink: Creating new CpalSink");

            let host = cpal::default_host();
            let device = host.default_output_device().ok_or_else(|| {
                log::error!("AudioSink: No output device found!");
                AudioError::DeviceError("No output device found".to_string())
            })?;

            let supported_config = device
                .default_output_config()
                .map_err(|e| AudioError::DeviceError(e.to_string()))?;
            log::debug!("AudioSink: Using output config: {:?}", supported_config);

            let output_sample_rate = supported_config.sample_rate().0;
            let output_channels = supported_config.channels() as usize;

            let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
            let playback_queue = Arc::clone(&queue);
            let (shutdown, shutdown_rx) = channel::<()>();
            let (ready_tx, ready_rx) = channel::<Result<(), AudioError>>();

            let audio_thread = thread::spawn(move || {
                let step = SAMPLE_RATE as f32 / output_sample_rate as f32;
                let mut position: f32 = 0.0;

                let stream = device.build_output_stream(
                    &supported_config.config(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = playback_queue.lock().unwrap_or_else(|e| e.into_inner());

                        for frame in data.chunks_mut(output_channels) {
                            // Linear interpolation from 16kHz to the device rate
                            let idx = position.floor() as usize;
                            let fract = position.fract();
                            let current = queue.get(idx).copied().unwrap_or(0.0);
                            let next = queue.get(idx + 1).copied().unwrap_or(0.0);
                            let sample = if queue.is_empty() {
                                0.0
                            } else {
                                current * (1.0 - fract) + next * fract
                            };

                            for channel in frame.iter_mut() {
                                *channel = sample;
                            }
                            position += step;
                        }

                        let consumed = (position.floor() as usize).min(queue.len());
                        queue.drain(..consumed);
                        position = if queue.is_empty() { 0.0 } else { position.fract() };
                    },
                    move |err| {
                        log::error!("AudioSink: Stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::DeviceError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::DeviceError(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                // Keep the stream alive until shutdown or the sink is dropped
                let _ = shutdown_rx.recv();
                log::debug!("AudioSink: Audio thread exiting");
            });

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(AudioError::DeviceError(e.to_string())),
            }

            log::debug!("AudioSink: Successfully created CpalSink");
            Ok(Self {
                queue,
                shutdown,
                audio_thread: Some(audio_thread),
            })
        }

        fn queued(&self) -> usize {
            self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            let _ = self.shutdown.send(());
            if let Some(thread) = self.audio_thread.take() {
                if let Err(e) = thread.join() {
                    log::error!("Failed to join audio thread: {:?}", e);
                }
            }
        }
    }

    #[async_trait::async_trait]
    impl AudioSink for CpalSink {
        async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(pcm_to_samples(audio_data).map(|s| s as f32 / i16::MAX as f32));
            Ok(())
        }

        async fn finish(&self) -> Result<(), AudioError> {
            while self.queued() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(())
        }

        async fn clear(&self) -> Result<(), AudioError> {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            log::debug!("AudioSink: Clearing {} queued samples", queue.len());
            queue.clear();
            Ok(())
        }
    }

}

/// Shared sink handle
pub type SharedSink = Arc<dyn AudioSink>;
