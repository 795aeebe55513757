//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::backend::AudioSink;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Completion poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays MP3 audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
    /// Stop flag of the clip currently playing
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl std::fmt::Debug for AudioPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayback")
            .field("channels", &self.config.channels)
            .field("sample_rate", &self.config.sample_rate.0)
            .finish_non_exhaustive()
    }
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if no output device or suitable config
    /// exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Unsupported("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Unsupported(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Unsupported("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            current: Mutex::new(None),
        })
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&self, audio: Vec<u8>, volume: f32) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.lock_current().replace(Arc::clone(&stop)) {
            previous.store(true, Ordering::SeqCst);
        }

        let config = self.config.clone();
        let flag = Arc::clone(&stop);
        let result = tokio::task::spawn_blocking(move || {
            let samples = decode_mp3(&audio)?;
            play_samples_blocking(&config, samples, volume, &flag)
        })
        .await
        .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?;

        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &stop)) {
            *current = None;
        }

        result
    }

    fn stop(&self) {
        if let Some(current) = self.lock_current().take() {
            current.store(true, Ordering::SeqCst);
        }
    }
}

/// Play samples until finished or `stop` is raised
fn play_samples_blocking(
    config: &StreamConfig,
    samples: Vec<f32>,
    volume: f32,
    stop: &AtomicBool,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device".to_string()))?;

    let channels = config.channels as usize;
    let sample_count = samples.len();
    let gain = volume.clamp(0.0, 1.0);

    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(AtomicBool::new(false));
    let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let position_clone = Arc::clone(&position);
    let finished_clone = Arc::clone(&finished);
    let failure_clone = Arc::clone(&failure);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position_clone
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        samples[*pos] * gain
                    } else {
                        finished_clone.store(true, Ordering::SeqCst);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    if *pos < samples.len() {
                        *pos += 1;
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                *failure_clone
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        if let Some(err) = failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            return Err(Error::Playback(err));
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    tracing::debug!(
        samples = sample_count,
        stopped = stop.load(Ordering::SeqCst),
        "playback complete"
    );

    Ok(())
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    // Stereo: average channels
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() && !mp3_data.is_empty() {
        return Err(Error::Playback("no audio frames in response".to_string()));
    }

    Ok(samples)
}
