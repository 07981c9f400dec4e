//! Desktop audio output backed by cpal.
//!
//! The playback clock is the output callback's frame counter divided by the
//! device sample rate, so scheduled start times are sample-accurate on the
//! hardware timeline. The cpal `Stream` is `!Send` and lives on a dedicated
//! thread; everything else talks to it through shared state.

use crate::audio::AudioFormat;
use crate::error::{Result, StreamError};
use crate::scheduler::AudioOutput;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

struct Segment {
    start_frame: u64,
    samples: Vec<f32>,
}

struct Playout {
    segments: Vec<Segment>,
    head: u64,
    paused: bool,
    gain: f32,
    gain_target: f32,
    gain_step: f32,
}

struct Shared {
    state: Mutex<Playout>,
    shutdown: AtomicBool,
}

/// A cpal-backed [`AudioOutput`].
///
/// One instance owns one device stream; create it lazily once per controller
/// and drop it to tear the stream down.
pub struct DeviceOutput {
    shared: Arc<Shared>,
    sample_rate: u32,
}

impl DeviceOutput {
    /// Open the default output device at the session's sample rate.
    ///
    /// Fails if the device cannot run at that rate in `f32`; the scheduler's
    /// timing arithmetic assumes one shared rate, so no resampling is done.
    pub fn open(format: AudioFormat) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(Playout {
                segments: Vec::new(),
                head: 0,
                paused: false,
                gain: 1.0,
                gain_target: 1.0,
                gain_step: 0.0,
            }),
            shutdown: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_shared = shared.clone();
        let sample_rate = format.sample_rate;

        std::thread::Builder::new()
            .name("voicestream-audio".to_string())
            .spawn(move || run_stream(thread_shared, sample_rate, ready_tx))
            .map_err(|e| StreamError::audio(format!("Failed to spawn audio thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| StreamError::audio("Audio thread exited during setup"))??;

        Ok(Self { shared, sample_rate })
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}

impl AudioOutput for DeviceOutput {
    fn now(&self) -> f64 {
        let state = self.shared.state.lock();
        state.head as f64 / self.sample_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, start: f64) -> Result<()> {
        let start_frame = (start * self.sample_rate as f64).round() as u64;
        let mut state = self.shared.state.lock();
        state.segments.push(Segment { start_frame, samples });
        Ok(())
    }

    fn stop(&self) {
        self.shared.state.lock().segments.clear();
    }

    fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    fn resume(&self) {
        self.shared.state.lock().paused = false;
    }

    fn set_gain(&self, target: f32, ramp_secs: f32) {
        let mut state = self.shared.state.lock();
        state.gain_target = target;
        let ramp_frames = (ramp_secs * self.sample_rate as f32).max(1.0);
        state.gain_step = (target - state.gain) / ramp_frames;
    }
}

fn run_stream(shared: Arc<Shared>, sample_rate: u32, ready_tx: mpsc::Sender<Result<()>>) {
    let stream = match build_stream(&shared, sample_rate) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    if let Err(err) = stream.play() {
        tracing::warn!("Audio stream failed to start: {err}");
        return;
    }

    // The stream plays for as long as it is alive on this thread.
    while !shared.shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn build_stream(shared: &Arc<Shared>, sample_rate: u32) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| StreamError::audio("No default audio output device"))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| StreamError::audio(format!("Cannot query output configs: {e}")))?
        .filter(|cfg| cfg.sample_format() == cpal::SampleFormat::F32)
        .find(|cfg| {
            cfg.min_sample_rate().0 <= sample_rate && sample_rate <= cfg.max_sample_rate().0
        })
        .ok_or_else(|| {
            StreamError::audio(format!("Output device does not support {sample_rate} Hz f32"))
        })?
        .with_sample_rate(cpal::SampleRate(sample_rate));

    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();
    let callback_shared = shared.clone();

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill(&callback_shared, data, channels);
            },
            |err| tracing::warn!("Audio output error: {err}"),
            None,
        )
        .map_err(|e| StreamError::audio(format!("Failed to build output stream: {e}")))
}

/// Mix due segments into the device buffer, frame by frame.
///
/// While paused the frame counter holds still and silence is written, so the
/// clock suspends without losing scheduled state. Gain moves one step per
/// frame toward its target.
fn fill(shared: &Shared, data: &mut [f32], channels: usize) {
    let mut state = shared.state.lock();

    for frame in data.chunks_mut(channels) {
        if state.paused {
            frame.fill(0.0);
            continue;
        }

        let head = state.head;
        let mut value = 0.0f32;
        for segment in &state.segments {
            if head >= segment.start_frame {
                let index = (head - segment.start_frame) as usize;
                if index < segment.samples.len() {
                    value += segment.samples[index];
                }
            }
        }

        if state.gain_step != 0.0 {
            let next = state.gain + state.gain_step;
            let overshoot = (state.gain_step > 0.0 && next >= state.gain_target)
                || (state.gain_step < 0.0 && next <= state.gain_target);
            if overshoot {
                state.gain = state.gain_target;
                state.gain_step = 0.0;
            } else {
                state.gain = next;
            }
        }

        frame.fill(value * state.gain);
        state.head += 1;
    }

    let head = state.head;
    state
        .segments
        .retain(|s| s.start_frame + s.samples.len() as u64 > head);
}
