//! Microphone capture into a PCMU sample track.

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample as _, SampleFormat, SizedSample};
use rubato::{FftFixedIn, Resampler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{Error, Result};
use crate::media::{LocalTrack, MediaSource};

const PCMU_RATE: u32 = 8000;
const MICROPHONE_TRACK_ID: &str = "microphone";
/// 20 ms resampler chunks.
const CHUNKS_PER_SECOND: u32 = 50;

/// G.711 mu-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0
    };
    value = value.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

fn f32_to_ulaw(sample: f32) -> u8 {
    linear_to_ulaw((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
}

/// Downmixes interleaved capture frames to mono and band-limits them to 8 kHz.
struct PcmuEncoder {
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl PcmuEncoder {
    fn new(channels: u16, input_rate: u32) -> std::result::Result<Self, String> {
        let resampler = if input_rate == PCMU_RATE {
            None
        } else {
            let chunk_size = (input_rate / CHUNKS_PER_SECOND).max(1) as usize;
            let resampler = FftFixedIn::new(
                input_rate as usize,
                PCMU_RATE as usize,
                chunk_size,
                2, // Sub-chunks
                1, // Mono
            )
            .map_err(|e| format!("Failed to create resampler: {}", e))?;
            Some(resampler)
        };
        Ok(Self {
            channels: channels.max(1) as usize,
            resampler,
            pending: Vec::new(),
        })
    }

    /// Mono 8 kHz output for every complete resampler chunk. Leftover input
    /// waits for the next call.
    fn resample(&mut self, interleaved: &[f32]) -> Vec<f32> {
        let channels = self.channels;
        let mono = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32);

        let Some(resampler) = self.resampler.as_mut() else {
            return mono.collect();
        };
        self.pending.extend(mono);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let input = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            match resampler.process(&input, None) {
                Ok(mut result) => {
                    if let Some(channel) = result.pop() {
                        output.extend(channel);
                    }
                }
                Err(e) => warn!("Resample error: {}", e),
            }
        }
        output
    }

    fn encode(&mut self, interleaved: &[f32], out: &mut Vec<u8>) {
        out.extend(self.resample(interleaved).into_iter().map(f32_to_ulaw));
    }
}

struct Capture {
    track: LocalTrack,
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Default input device of the default cpal host.
pub struct MicrophoneSource {
    capture: Option<Capture>,
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self { capture: None }
    }
}

#[async_trait]
impl MediaSource for MicrophoneSource {
    async fn acquire(&mut self) -> Result<Vec<LocalTrack>> {
        if let Some(capture) = &self.capture {
            return Ok(vec![capture.track.clone()]);
        }
        let local = LocalTrack::pcmu_audio(MICROPHONE_TRACK_ID);

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let track = local.sample_track();
        let thread_stop = Arc::clone(&stop);

        // cpal streams are not Send; the stream lives and dies on this thread.
        let thread = thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || run_capture(track, thread_stop, ready_tx))
            .map_err(|e| Error::MediaAcquisitionDenied(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.capture = Some(Capture {
                    track: local.clone(),
                    stop,
                    thread,
                });
                Ok(vec![local])
            }
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(Error::MediaAcquisitionDenied(reason))
            }
            Err(_) => Err(Error::MediaAcquisitionDenied(
                "capture thread exited before starting".to_string(),
            )),
        }
    }

    async fn release(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop.store(true, Ordering::SeqCst);
            let joined = tokio::task::spawn_blocking(move || capture.thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Microphone capture thread did not shut down cleanly");
            }
            info!("Microphone capture stopped");
        }
    }
}

fn run_capture(
    track: Arc<TrackLocalStaticSample>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<std::result::Result<(), String>>,
) {
    let (chunk_tx, chunk_rx) = std_mpsc::channel::<Vec<f32>>();

    let (stream, channels, rate) = match open_input_stream(chunk_tx) {
        Ok(opened) => opened,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    let mut encoder = match PcmuEncoder::new(channels, rate) {
        Ok(encoder) => encoder,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    info!("Microphone capture started: {} channel(s) at {} Hz", channels, rate);
    let _ = ready.send(Ok(()));

    let mut encoded = Vec::new();
    while !stop.load(Ordering::SeqCst) {
        let chunk = match chunk_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => chunk,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };
        encoded.clear();
        encoder.encode(&chunk, &mut encoded);
        if encoded.is_empty() {
            continue;
        }
        let sample = Sample {
            data: Bytes::copy_from_slice(&encoded),
            duration: Duration::from_secs_f64(encoded.len() as f64 / PCMU_RATE as f64),
            ..Default::default()
        };
        if let Err(e) = futures::executor::block_on(track.write_sample(&sample)) {
            debug!("Failed to write audio sample: {}", e);
        }
    }
    drop(stream);
}

fn open_input_stream(
    chunk_tx: std_mpsc::Sender<Vec<f32>>,
) -> std::result::Result<(cpal::Stream, u16, u32), String> {
    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .ok_or_else(|| "No input device available".to_string())?;

    let config = input_device
        .default_input_config()
        .map_err(|e| e.to_string())?;
    debug!("Input config: {:?}", config);
    let channels = config.channels();
    let rate = config.sample_rate().0;

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&input_device, &config.into(), chunk_tx),
        SampleFormat::I16 => build_input_stream::<i16>(&input_device, &config.into(), chunk_tx),
        SampleFormat::U16 => build_input_stream::<u16>(&input_device, &config.into(), chunk_tx),
        sample_format => return Err(format!("Unsupported sample format: {:?}", sample_format)),
    }?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, channels, rate))
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chunk_tx: std_mpsc::Sender<Vec<f32>>,
) -> std::result::Result<cpal::Stream, String>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let err_fn = |err| warn!("An error occurred on the input audio stream: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                let _ = chunk_tx.send(samples);
            },
            err_fn,
            None,
        )
        .map_err(|e| e.to_string())
}
