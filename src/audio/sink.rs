//! # Audio Output Sinks
//!
//! The playback controller never talks to hardware directly. It hands a
//! buffer to an `AudioSink`, keeps the returned `OutputHandle` for as long as
//! the session is live, and learns about natural completion through a
//! `CompletionNotifier`.
//!
//! ## Available Sinks:
//! - **ClockSink**: Follows the buffer's duration on a tokio timer. Used on
//!   headless hosts where the browser renders the audio itself.
//! - **DeviceSink**: Plays through the default output device via cpal
//!   (cargo feature `device-output`).
//!
//! ## Contract for Implementors:
//! - `start` returns quickly; output proceeds in the background
//! - `start` must not call `CompletionNotifier::complete` before returning
//! - `OutputHandle::stop` halts output within bounded time and is idempotent
//! - Dropping an `OutputHandle` releases the output resource

use super::playback::SessionId;
use super::{AudioBuffer, AudioError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Something that can turn a buffer into sound.
pub trait AudioSink: Send + Sync {
    /// Begin output of `buffer`. Fails with `PlaybackUnavailable` when the
    /// output resource cannot be initialized.
    fn start(&self, buffer: AudioBuffer, done: CompletionNotifier) -> Result<Box<dyn OutputHandle>, AudioError>;

    /// Short name for logs and the health endpoint.
    fn name(&self) -> &'static str;
}

/// A live output started by an `AudioSink`.
pub trait OutputHandle: Send {
    /// Request an immediate halt of output. Calling it twice is harmless.
    fn stop(&mut self);
}

/// Reports natural completion of one specific session back to its controller.
///
/// Sending never blocks, so it is safe to call from an audio callback thread.
/// If the session was already superseded the controller ignores the report.
#[derive(Debug)]
pub struct CompletionNotifier {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<SessionId>,
}

impl CompletionNotifier {
    pub(crate) fn new(session_id: SessionId, tx: mpsc::UnboundedSender<SessionId>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Signal that every frame of the session's buffer has been consumed.
    pub fn complete(self) {
        // The controller may already be gone during shutdown
        if self.tx.send(self.session_id).is_err() {
            debug!(session_id = %self.session_id, "Completion dropped, controller no longer running");
        }
    }
}

/// Which sink the service plays through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Timer-driven sink, no sound device required
    Clock,
    /// Default output device of the host
    Device,
}

impl std::str::FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clock" | "headless" => Ok(OutputKind::Clock),
            "device" | "speaker" => Ok(OutputKind::Device),
            _ => Err(format!("Unknown playback output: {}", s)),
        }
    }
}

impl Default for OutputKind {
    fn default() -> Self {
        OutputKind::Clock
    }
}

/// Build the sink for the configured output kind.
pub fn create_sink(kind: OutputKind) -> Result<Arc<dyn AudioSink>, AudioError> {
    match kind {
        OutputKind::Clock => Ok(Arc::new(ClockSink)),
        #[cfg(feature = "device-output")]
        OutputKind::Device => Ok(Arc::new(device::DeviceSink)),
        #[cfg(not(feature = "device-output"))]
        OutputKind::Device => Err(AudioError::PlaybackUnavailable(
            "built without the `device-output` feature".to_string(),
        )),
    }
}

/// Sink that "plays" a buffer by waiting out its duration on the tokio clock.
///
/// Requires a running tokio runtime; without one `start` reports
/// `PlaybackUnavailable`.
#[derive(Debug, Default)]
pub struct ClockSink;

impl AudioSink for ClockSink {
    fn start(&self, buffer: AudioBuffer, done: CompletionNotifier) -> Result<Box<dyn OutputHandle>, AudioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::PlaybackUnavailable(format!("no async runtime: {}", e)))?;

        let duration = buffer.duration();
        debug!(session_id = %done.session_id(), duration_ms = duration.as_millis() as u64, "Clock output started");
        let task = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            // Buffer is held until the end of the clip like a real device would
            drop(buffer);
            done.complete();
        });

        Ok(Box::new(ClockOutput { task: Some(task) }))
    }

    fn name(&self) -> &'static str {
        "clock"
    }
}

struct ClockOutput {
    task: Option<JoinHandle<()>>,
}

impl OutputHandle for ClockOutput {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ClockOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "device-output")]
mod device {
    //! Output through the host's default sound device.
    //!
    //! A cpal stream is not `Send` on every platform, so each session owns a
    //! dedicated thread that builds the stream, parks until the clip finishes
    //! or a stop is requested, then drops the stream.

    use super::{CompletionNotifier, OutputHandle};
    use crate::audio::{AudioBuffer, AudioError, AudioSink};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Sample, Stream, StreamConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread::{self, JoinHandle, Thread};
    use tracing::{error, info};

    #[derive(Debug, Default)]
    pub struct DeviceSink;

    impl AudioSink for DeviceSink {
        fn start(&self, buffer: AudioBuffer, done: CompletionNotifier) -> Result<Box<dyn OutputHandle>, AudioError> {
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

            let thread = thread::Builder::new()
                .name(format!("audio-output-{}", done.session_id()))
                .spawn(move || run_output(buffer, done, thread_stop, ready_tx))
                .map_err(|e| AudioError::PlaybackUnavailable(format!("failed to spawn output thread: {}", e)))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Box::new(DeviceOutput {
                    stop,
                    thread: Some(thread),
                })),
                Ok(Err(msg)) => {
                    let _ = thread.join();
                    Err(AudioError::PlaybackUnavailable(msg))
                }
                Err(_) => Err(AudioError::PlaybackUnavailable(
                    "output thread exited during start-up".to_string(),
                )),
            }
        }

        fn name(&self) -> &'static str {
            "device"
        }
    }

    struct DeviceOutput {
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl OutputHandle for DeviceOutput {
        fn stop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(thread) = self.thread.take() {
                thread.thread().unpark();
                if thread.join().is_err() {
                    error!("Audio output thread panicked");
                }
            }
        }
    }

    impl Drop for DeviceOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn run_output(
        buffer: AudioBuffer,
        done: CompletionNotifier,
        stop: Arc<AtomicBool>,
        ready: mpsc::Sender<Result<(), String>>,
    ) {
        let finished = Arc::new(AtomicBool::new(false));

        let stream = match open_stream(&buffer, finished.clone(), thread::current()) {
            Ok(stream) => stream,
            Err(msg) => {
                let _ = ready.send(Err(msg));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if finished.load(Ordering::SeqCst) {
                done.complete();
                break;
            }
            thread::park();
        }

        drop(stream);
    }

    fn open_stream(buffer: &AudioBuffer, finished: Arc<AtomicBool>, waker: Thread) -> Result<Stream, String> {
        let host = cpal::default_host();

        let device = host.default_output_device().ok_or("No output device available")?;

        let config = device
            .default_output_config()
            .map_err(|e| format!("Failed to get default output config: {}", e))?;

        info!(
            device_rate = config.sample_rate().0,
            device_channels = config.channels(),
            clip_rate = buffer.sample_rate(),
            clip_channels = buffer.channels(),
            "Opening audio output"
        );

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), buffer, finished, waker)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), buffer, finished, waker)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), buffer, finished, waker)?,
            other => return Err(format!("Unsupported sample format: {:?}", other)),
        };

        stream.play().map_err(|e| format!("Failed to start stream: {}", e))?;

        Ok(stream)
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        buffer: &AudioBuffer,
        finished: Arc<AtomicBool>,
        waker: Thread,
    ) -> Result<Stream, String> {
        let clip = buffer.clone();
        let clip_rate = clip.sample_rate() as u64;
        let clip_channels = clip.channels() as usize;
        let clip_frames = clip.frames() as u64;
        let device_rate = config.sample_rate.0 as u64;
        let device_channels = config.channels as usize;
        let mut position: u64 = 0;

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(device_channels) {
                        // Nearest source frame for this device frame
                        let source = position * clip_rate / device_rate;
                        position += 1;

                        if source >= clip_frames {
                            for sample in frame.iter_mut() {
                                *sample = T::from_sample(0.0);
                            }
                            if !finished.swap(true, Ordering::SeqCst) {
                                waker.unpark();
                            }
                            continue;
                        }

                        let base = source as usize * clip_channels;
                        for (channel, sample) in frame.iter_mut().enumerate() {
                            let value = clip.samples()[base + channel % clip_channels];
                            *sample = T::from_sample(value);
                        }
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| format!("Failed to build output stream: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;
    use std::time::Duration;

    fn clip(frames: usize) -> AudioBuffer {
        AudioBuffer::from_samples(AudioFormat::default(), vec![0.2; frames]).unwrap()
    }

    #[test]
    fn test_output_kind_parsing() {
        assert_eq!("clock".parse::<OutputKind>().unwrap(), OutputKind::Clock);
        assert_eq!("Device".parse::<OutputKind>().unwrap(), OutputKind::Device);
        assert!("hdmi".parse::<OutputKind>().is_err());
        assert_eq!(OutputKind::default(), OutputKind::Clock);
    }

    #[test]
    fn test_clock_sink_needs_a_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = ClockSink.start(clip(10), CompletionNotifier::new(SessionId(1), tx));
        assert!(matches!(result, Err(AudioError::PlaybackUnavailable(_))));
    }

    #[cfg(not(feature = "device-output"))]
    #[test]
    fn test_device_sink_unavailable_without_feature() {
        assert!(matches!(
            create_sink(OutputKind::Device),
            Err(AudioError::PlaybackUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_clock_sink_completes_after_clip_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // 240 frames at 24kHz is 10ms
        let _output = ClockSink.start(clip(240), CompletionNotifier::new(SessionId(7), tx)).unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(completed, Some(SessionId(7)));
    }

    #[tokio::test]
    async fn test_clock_sink_stop_suppresses_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = ClockSink.start(clip(2_400), CompletionNotifier::new(SessionId(3), tx)).unwrap();

        output.stop();
        output.stop();

        // The aborted task drops its notifier, closing the channel without a send
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_clock_sink_empty_clip_completes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _output = ClockSink
            .start(AudioBuffer::empty(AudioFormat::default()), CompletionNotifier::new(SessionId(9), tx))
            .unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(completed, Some(SessionId(9)));
    }
}
