//! Local audio endpoints.
//!
//! Sources produce raw 16-bit little-endian PCM chunks on a channel; sinks
//! play back (or record) the agent's audio and can be told to stop early when
//! the user barges in.

use anyhow::Context;
use bytes::Bytes;
use std::{
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::{debug, error, info};

/// Length of audio carried by each chunk read from a stream source.
pub const CHUNK_DURATION: Duration = Duration::from_millis(100);

/// Where microphone audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// No audio is sent; the session only exchanges control messages.
    None,
    Stdin,
    /// A raw PCM file, streamed in real time.
    File(PathBuf),
    /// The default capture device.
    Device,
}

/// Where the agent's audio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Discard,
    File(PathBuf),
    /// The default playback device.
    Device,
}

pub trait AudioSink: Send + Sync {
    /// Queues a chunk of raw PCM for playback.
    fn play(&self, chunk: &[u8]) -> anyhow::Result<()>;
    /// Drops whatever has been queued but not yet played.
    fn stop(&self);
}

/// Accepts and discards everything.
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, _chunk: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Appends the agent's audio to a raw PCM file.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create audio output file {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl AudioSink for FileSink {
    fn play(&self, chunk: &[u8]) -> anyhow::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("Audio output file lock poisoned"))?;
        file.write_all(chunk)
            .with_context(|| format!("Failed to write to {}", self.path.display()))
    }

    fn stop(&self) {
        // Written audio has already "played"; there is no queue to flush.
        debug!(path = %self.path.display(), "Stop requested for file output");
    }
}

/// Bytes of 16-bit mono PCM in one [`CHUNK_DURATION`] at `sample_rate`.
pub fn chunk_bytes(sample_rate: u32) -> usize {
    let samples = (sample_rate as u128 * CHUNK_DURATION.as_millis() / 1000).max(1) as usize;
    samples * 2
}

/// Streams `reader` as fixed-size chunks until EOF or until the receiver is
/// dropped. With `pace`, one chunk is released per tick. Read errors end the
/// stream and are logged.
pub fn spawn_reader<R>(mut reader: R, chunk_size: usize, pace: Option<Duration>) -> mpsc::Receiver<Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut ticker = pace.map(tokio::time::interval);
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }
            match read_chunk(&mut reader, &mut buf).await {
                Ok(0) => {
                    debug!("Audio input reached end of stream");
                    break;
                }
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Microphone error");
                    break;
                }
            }
        }
    });
    rx
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Starts the configured input. `Ok(None)` means no audio will be sent.
pub async fn open_source(
    input: &InputSource,
    sample_rate: u32,
) -> anyhow::Result<Option<mpsc::Receiver<Bytes>>> {
    let chunk_size = chunk_bytes(sample_rate);
    match input {
        InputSource::None => Ok(None),
        InputSource::Stdin => {
            info!(sample_rate, "Streaming microphone audio from stdin");
            Ok(Some(spawn_reader(tokio::io::stdin(), chunk_size, None)))
        }
        InputSource::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open audio input file {}", path.display()))?;
            info!(path = %path.display(), sample_rate, "Streaming microphone audio from file");
            Ok(Some(spawn_reader(file, chunk_size, Some(CHUNK_DURATION))))
        }
        InputSource::Device => open_device_source(sample_rate).map(Some),
    }
}

/// Builds the configured output.
pub fn open_sink(output: &OutputTarget, sample_rate: u32) -> anyhow::Result<Arc<dyn AudioSink>> {
    match output {
        OutputTarget::Discard => Ok(Arc::new(NullSink)),
        OutputTarget::File(path) => {
            info!(path = %path.display(), sample_rate, "Writing agent audio to file");
            Ok(Arc::new(FileSink::create(path)?))
        }
        OutputTarget::Device => open_device_sink(sample_rate),
    }
}

#[cfg(feature = "device-audio")]
fn open_device_source(sample_rate: u32) -> anyhow::Result<mpsc::Receiver<Bytes>> {
    crate::device::spawn_microphone(sample_rate)
}

#[cfg(not(feature = "device-audio"))]
fn open_device_source(_sample_rate: u32) -> anyhow::Result<mpsc::Receiver<Bytes>> {
    anyhow::bail!("Audio devices are unavailable: built without the `device-audio` feature")
}

#[cfg(feature = "device-audio")]
fn open_device_sink(sample_rate: u32) -> anyhow::Result<Arc<dyn AudioSink>> {
    Ok(Arc::new(crate::device::DeviceSpeaker::open(sample_rate)?))
}

#[cfg(not(feature = "device-audio"))]
fn open_device_sink(_sample_rate: u32) -> anyhow::Result<Arc<dyn AudioSink>> {
    anyhow::bail!("Audio devices are unavailable: built without the `device-audio` feature")
}
