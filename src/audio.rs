//! `cpal` adapters implementing the `Capture`/`Sink` traits (spec.md §9),
//! generalizing the teacher's `build_input_stream`/`build_output_stream`
//! (byte-buffer-into-a-pool / f32-channel) into the fixed 48 kHz/stereo/
//! s16le framing this system requires, decoupled from the synchronization
//! core behind `types::Capture`/`types::Sink`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tokio::sync::mpsc;

use crate::config::{CHANNELS, FRAME_BYTES, SAMPLE_RATE};
use crate::types::{Capture, Sink};

/// Enumerate available input and output devices.
pub fn list_devices() -> Result<(Vec<Device>, Vec<Device>)> {
    let host = cpal::default_host();
    let inputs: Vec<_> = host.input_devices().context("input_devices")?.collect();
    let outputs: Vec<_> = host.output_devices().context("output_devices")?.collect();
    Ok((inputs, outputs))
}

/// Best-effort device name (fallback to "<unknown>").
pub fn device_name(dev: &Device) -> String {
    dev.name().unwrap_or_else(|_| "<unknown>".into())
}

fn fixed_config() -> StreamConfig {
    StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Accumulate converted s16le bytes and emit fixed `FRAME_BYTES` frames on
/// `tx`, dropping whole frames (not samples) if the core can't keep up —
/// capture must never block on back-pressure.
fn push_samples(
    acc: &mut Vec<u8>,
    samples: impl Iterator<Item = i16>,
    tx: &mpsc::Sender<[u8; FRAME_BYTES]>,
    dropped: &AtomicU32,
) {
    for sample in samples {
        acc.extend_from_slice(&sample.to_le_bytes());
    }
    while acc.len() >= FRAME_BYTES {
        let mut frame = [0u8; FRAME_BYTES];
        frame.copy_from_slice(&acc[..FRAME_BYTES]);
        acc.drain(..FRAME_BYTES);
        if tx.try_send(frame).is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// f32 sample → i16, per spec.md §6: `clamp(f·32767, −32768, 32767)`.
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// A `Capture` backed by a live `cpal` input stream. The stream is kept
/// alive for the lifetime of this value; dropping it stops capture.
pub struct CpalCapture {
    _stream: cpal::Stream,
    rx: mpsc::Receiver<[u8; FRAME_BYTES]>,
    dropped_frames: Arc<AtomicU32>,
}

impl CpalCapture {
    /// Total frames dropped because the core fell behind the capture
    /// callback (channel full).
    pub fn dropped_frames(&self) -> u32 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Capture for CpalCapture {
    async fn next_frame(&mut self) -> Option<[u8; FRAME_BYTES]> {
        self.rx.recv().await
    }
}

/// Start capturing from `device` at the fixed 48 kHz/stereo/s16le format.
pub fn build_capture(device: &Device) -> Result<CpalCapture> {
    let cfg = device.default_input_config().context("default_input_config")?;
    let sample_format = cfg.sample_format();
    let config = fixed_config();
    let (tx, rx) = mpsc::channel(64);
    let dropped = Arc::new(AtomicU32::new(0));

    let err_fn = |e| eprintln!("[AUDIO][ERR] capture stream: {e}");

    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut acc = Vec::with_capacity(FRAME_BYTES * 2);
            let dropped_cb = dropped.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    push_samples(&mut acc, data.iter().map(|&s| f32_to_i16(s)), &tx, &dropped_cb);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let mut acc = Vec::with_capacity(FRAME_BYTES * 2);
            let dropped_cb = dropped.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    push_samples(&mut acc, data.iter().copied(), &tx, &dropped_cb);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let mut acc = Vec::with_capacity(FRAME_BYTES * 2);
            let dropped_cb = dropped.clone();
            device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let samples = data
                        .iter()
                        .map(|&s| (s as i32 - i16::MAX as i32 - 1) as i16);
                    push_samples(&mut acc, samples, &tx, &dropped_cb);
                },
                err_fn,
                None,
            )?
        }
        other => anyhow::bail!("unsupported input sample format: {other:?}"),
    };
    stream.play()?;
    println!(
        "[AUDIO] capture started: {} Hz, {} ch, s16le (device native format {:?})",
        SAMPLE_RATE, CHANNELS, sample_format
    );

    Ok(CpalCapture {
        _stream: stream,
        rx,
        dropped_frames: dropped,
    })
}

/// A `Sink` backed by a live `cpal` output stream. Frames are pushed to a
/// bounded channel the render callback drains; gain is an atomic in
/// millionths so `set_gain` never blocks the callback.
pub struct CpalSink {
    _stream: cpal::Stream,
    tx: mpsc::Sender<Vec<i16>>,
    gain_millionths: Arc<AtomicU32>,
}

impl Sink for CpalSink {
    fn write_frame(&mut self, pcm: &[i16]) {
        let _ = self.tx.try_send(pcm.to_vec());
    }

    fn set_gain(&mut self, gain: f32) {
        let clamped = gain.clamp(0.0, 1.0);
        self.gain_millionths
            .store((clamped * 1_000_000.0) as u32, Ordering::Relaxed);
    }
}

/// Start rendering to `device`. Input frames are stereo s16le at
/// `FRAME_BYTES`; output channel count/sample rate follow the device, with
/// a naive repeat/drop to the device's own buffer size per callback.
pub fn build_sink(device: &Device) -> Result<CpalSink> {
    let cfg = device.default_output_config().context("default_output_config")?;
    let config: StreamConfig = cfg.clone().into();
    let out_channels = config.channels.max(1) as usize;

    let (tx, mut rx) = mpsc::channel::<Vec<i16>>(64);
    let gain_millionths = Arc::new(AtomicU32::new(1_000_000));
    let gain_for_callback = gain_millionths.clone();
    let mut leftover: Vec<i16> = Vec::new();

    let stream = device.build_output_stream(
        &config,
        move |out: &mut [f32], _| {
            let gain = gain_for_callback.load(Ordering::Relaxed) as f32 / 1_000_000.0;
            let needed_frames = out.len() / out_channels;
            while leftover.len() / CHANNELS as usize < needed_frames {
                match rx.try_recv() {
                    Ok(mut frame) => leftover.append(&mut frame),
                    Err(_) => break,
                }
            }
            let mut produced = 0;
            for frame_index in 0..needed_frames {
                let base = frame_index * CHANNELS as usize;
                for ch in 0..out_channels {
                    let src_ch = (ch % CHANNELS as usize) + base;
                    let sample = leftover.get(src_ch).copied().unwrap_or(0);
                    out[produced] = (sample as f32 / 32768.0) * gain;
                    produced += 1;
                }
            }
            let consumed = needed_frames * CHANNELS as usize;
            if consumed <= leftover.len() {
                leftover.drain(..consumed);
            } else {
                leftover.clear();
            }
        },
        |e| eprintln!("[AUDIO][ERR] output stream: {e}"),
        None,
    )?;
    stream.play()?;
    println!("[AUDIO] sink started: {out_channels} device channels");

    Ok(CpalSink {
        _stream: stream,
        tx,
        gain_millionths,
    })
}
