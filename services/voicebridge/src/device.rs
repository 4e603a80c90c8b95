//! Capture and playback on the default audio devices.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread for as
//! long as its handle is held.

use crate::audio::AudioSink;
use anyhow::{Context, anyhow};
use bytes::Bytes;
use cpal::{
    SampleRate, Stream, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use ringbuf::{
    HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Seconds of agent audio buffered ahead of the speaker.
const PLAYBACK_BUFFER_SECS: usize = 30;

fn mono(sample_rate: u32) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let v = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| (i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0).clamp(-1.0, 1.0))
        .collect()
}

/// Starts capturing from the default input device. Capture stops once the
/// returned receiver is dropped.
pub fn spawn_microphone(sample_rate: u32) -> anyhow::Result<mpsc::Receiver<Bytes>> {
    let (tx, rx) = mpsc::channel(64);
    let (ready_tx, ready_rx) = std_mpsc::channel();

    thread::Builder::new()
        .name("microphone".to_string())
        .spawn(move || {
            let stream = match build_input_stream(sample_rate, tx.clone()) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            while !tx.is_closed() {
                thread::sleep(Duration::from_millis(200));
            }
            drop(stream);
            info!("Microphone capture stopped");
        })
        .context("Failed to spawn microphone thread")?;

    ready_rx
        .recv()
        .map_err(|_| anyhow!("Microphone thread exited before starting"))??;
    info!(sample_rate, "Capturing audio from the default input device");
    Ok(rx)
}

fn build_input_stream(sample_rate: u32, tx: mpsc::Sender<Bytes>) -> anyhow::Result<Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .context("No input device available")?;
    let stream = device.build_input_stream(
        &mono(sample_rate),
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Chunks are dropped when the sender falls behind.
            let _ = tx.try_send(Bytes::from(f32_to_pcm16(data)));
        },
        |e| error!(error = %e, "Microphone error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

/// Plays the agent's audio on the default output device.
pub struct DeviceSpeaker {
    producer: Mutex<HeapProd<f32>>,
    flush: Arc<AtomicBool>,
    // Dropping the sender ends the playback thread.
    _shutdown: std_mpsc::Sender<()>,
}

impl DeviceSpeaker {
    pub fn open(sample_rate: u32) -> anyhow::Result<Self> {
        let rb = HeapRb::<f32>::new(sample_rate as usize * PLAYBACK_BUFFER_SECS);
        let (producer, consumer) = rb.split();
        let flush = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let thread_flush = flush.clone();
        thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, consumer, thread_flush) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the speaker is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn speaker thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Speaker thread exited before starting"))??;
        info!(sample_rate, "Playing agent audio on the default output device");

        Ok(Self {
            producer: Mutex::new(producer),
            flush,
            _shutdown: shutdown_tx,
        })
    }
}

fn build_output_stream(
    sample_rate: u32,
    mut consumer: ringbuf::HeapCons<f32>,
    flush: Arc<AtomicBool>,
) -> anyhow::Result<Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .context("No output device available")?;
    let stream = device.build_output_stream(
        &mono(sample_rate),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if flush.swap(false, Ordering::AcqRel) {
                while consumer.try_pop().is_some() {}
            }
            for sample in data.iter_mut() {
                *sample = consumer.try_pop().unwrap_or(0.0);
            }
        },
        |e| error!(error = %e, "Speaker error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

impl AudioSink for DeviceSpeaker {
    fn play(&self, chunk: &[u8]) -> anyhow::Result<()> {
        let samples = pcm16_to_f32(chunk);
        let mut producer = self
            .producer
            .lock()
            .map_err(|_| anyhow!("Speaker buffer lock poisoned"))?;
        let pushed = producer.push_slice(&samples);
        if pushed < samples.len() {
            warn!(dropped = samples.len() - pushed, "Playback buffer full, dropping samples");
        }
        Ok(())
    }

    fn stop(&self) {
        self.flush.store(true, Ordering::Release);
    }
}
