//! CPAL-backed playback context.
//!
//! `cpal::Stream` is neither `Send` nor `Sync`, so the stream lives on a
//! dedicated thread for its whole life and resume/close arrive as control
//! messages. The data callback owns the mixer outright and reports back
//! through shared atomics: the rendered-frame counter (the context clock)
//! and a first-callback flag that drives the suspended/running view. A
//! paused backend fires no callbacks, so "no frames yet" and "suspended"
//! coincide, which is exactly the semantics the engine polls for.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig};
use parking_lot::Mutex;
use rtrb::{Producer, RingBuffer};
use tracing::error;

use crate::context::{ContextState, PlaybackContext, TonePlan};
use crate::diag::{DiagCategory, DiagLevel, DiagLog};
use crate::engine::ContextProvider;
use crate::error::{AudioError, Result};
use crate::mixer::{Mixer, MixerCommand};
use crate::music::MusicBuffer;

/// Control-to-callback command slots. Commands arrive a few per user
/// action; this only bounds a runaway producer.
const COMMAND_QUEUE: usize = 256;

enum StreamCtl {
    Resume,
    Close,
}

/// Playback context over the default CPAL output stream.
pub struct CpalContext {
    ctl: Mutex<mpsc::Sender<StreamCtl>>,
    commands: Mutex<Producer<MixerCommand>>,
    /// Set by the first data callback; a paused stream never sets it.
    live: Arc<AtomicBool>,
    closed: AtomicBool,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalContext {
    /// Opens the default output device, builds the stream on its own
    /// thread and holds it paused until the first resume request.
    pub fn open(diag: Arc<DiagLog>) -> Result<Arc<Self>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::PlatformUnsupported)?;
        let config = device
            .default_output_config()
            .map_err(|_| AudioError::PlatformUnsupported)?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());
        Self::from_device(device, config, name, diag)
    }

    fn from_device(
        device: cpal::Device,
        config: SupportedStreamConfig,
        name: String,
        diag: Arc<DiagLog>,
    ) -> Result<Arc<Self>> {
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();

        let (commands, consumer) = RingBuffer::new(COMMAND_QUEUE);
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let live = Arc::new(AtomicBool::new(false));
        let mixer = Mixer::new(consumer, sample_rate, frames_rendered.clone());

        let (ctl_tx, ctl_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_diag = diag.clone();
        let thread_live = live.clone();

        // The stream must be created and dropped on one thread.
        std::thread::spawn(move || {
            let stream = match build_stream(
                &device,
                sample_format,
                &stream_config,
                channels,
                mixer,
                thread_live,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            // Hold the output suspended until a gesture-driven resume.
            // Backends that cannot pause simply start running, and the
            // state view reports that truthfully.
            let _ = stream.pause();
            let _ = ready_tx.send(Ok(()));

            while let Ok(msg) = ctl_rx.recv() {
                match msg {
                    StreamCtl::Resume => match stream.play() {
                        Ok(()) => thread_diag.record(
                            DiagLevel::Success,
                            DiagCategory::Context,
                            "resume request accepted",
                        ),
                        Err(e) => thread_diag.record_with_detail(
                            DiagLevel::Warn,
                            DiagCategory::Context,
                            "resume rejected by backend",
                            e.to_string(),
                        ),
                    },
                    StreamCtl::Close => break,
                }
            }
            // Dropping the stream here stops the output.
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(detail)) => {
                diag.record_with_detail(
                    DiagLevel::Error,
                    DiagCategory::Context,
                    "output stream construction failed",
                    detail,
                );
                return Err(AudioError::PlatformUnsupported);
            }
            Err(_) => return Err(AudioError::PlatformUnsupported),
        }

        diag.record_with_detail(
            DiagLevel::Success,
            DiagCategory::Context,
            "playback context created",
            format!("{name}, {sample_rate} Hz, {channels} ch"),
        );

        Ok(Arc::new(CpalContext {
            ctl: Mutex::new(ctl_tx),
            commands: Mutex::new(commands),
            live,
            closed: AtomicBool::new(false),
            frames_rendered,
            sample_rate,
        }))
    }

    fn push(&self, cmd: MixerCommand) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AudioError::ContextClosed);
        }
        self.commands
            .lock()
            .push(cmd)
            .map_err(|_| AudioError::Scheduling("mixer command queue full".into()))
    }
}

impl PlaybackContext for CpalContext {
    fn state(&self) -> ContextState {
        if self.closed.load(Ordering::Relaxed) {
            ContextState::Closed
        } else if self.live.load(Ordering::Relaxed) {
            ContextState::Running
        } else {
            ContextState::Suspended
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn request_resume(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AudioError::ContextClosed);
        }
        self.ctl
            .lock()
            .send(StreamCtl::Resume)
            .map_err(|_| AudioError::ResumeRejected("stream thread is gone".into()))
    }

    fn schedule_tone(&self, plan: TonePlan) -> Result<()> {
        self.push(MixerCommand::StartTone(plan))
    }

    fn start_music(&self, buffer: Arc<MusicBuffer>, volume: f32) -> Result<()> {
        self.push(MixerCommand::StartMusic { buffer, volume })
    }

    fn stop_music(&self) -> Result<()> {
        self.push(MixerCommand::StopMusic)
    }

    fn set_music_volume(&self, volume: f32) -> Result<()> {
        self.push(MixerCommand::SetMusicVolume(volume))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.ctl.lock().send(StreamCtl::Close);
        Ok(())
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    channels: usize,
    mut mixer: Mixer,
    live: Arc<AtomicBool>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| {
                live.store(true, Ordering::Relaxed);
                mixer.render(data, channels);
            },
            |err| error!("audio stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                stream_config,
                move |data: &mut [i16], _| {
                    live.store(true, Ordering::Relaxed);
                    scratch.clear();
                    scratch.resize(data.len(), 0.0);
                    mixer.render(&mut scratch, channels);
                    for (out, s) in data.iter_mut().zip(&scratch) {
                        *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                stream_config,
                move |data: &mut [u16], _| {
                    live.store(true, Ordering::Relaxed);
                    scratch.clear();
                    scratch.resize(data.len(), 0.0);
                    mixer.render(&mut scratch, channels);
                    for (out, s) in data.iter_mut().zip(&scratch) {
                        *out = ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16;
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

/// Opens [`CpalContext`] over the default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalProvider;

impl ContextProvider for CpalProvider {
    fn open(&self, diag: Arc<DiagLog>) -> Result<Arc<dyn PlaybackContext>> {
        let ctx: Arc<dyn PlaybackContext> = CpalContext::open(diag)?;
        Ok(ctx)
    }
}
