//! Audio chunk sequencing and gapless scheduling.
//!
//! Chunks arrive tagged with a sequence number and may be reordered by the
//! network. The scheduler buffers them by sequence, plays only the contiguous
//! prefix, and schedules each chunk to start exactly when the previous one
//! ends — against the output's audio clock, not wall-clock timers (timer-based
//! playback drifts and clicks; clock-based scheduling does not).

use crate::audio::{self, AudioFormat};
use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Gain ramp length used for mute/unmute. A step would click.
const MUTE_RAMP_SECS: f32 = 0.02;

/// Clock and sink for scheduled audio playback.
///
/// `now()` and `schedule()` share one timebase: the output's own sample
/// clock, in seconds. Tests drive a manual implementation; the
/// `desktop-audio` feature provides a cpal device implementation.
pub trait AudioOutput: Send + Sync {
    /// Current time on the audio clock, in seconds.
    fn now(&self) -> f64;

    /// Schedule mono `f32` samples to start playing at `start` on the clock.
    fn schedule(&self, samples: Vec<f32>, start: f64) -> Result<()>;

    /// Cancel every scheduled playback unit.
    fn stop(&self);

    /// Suspend the clock without losing scheduled state.
    fn pause(&self);

    /// Resume the clock exactly where it left off.
    fn resume(&self);

    /// Ramp output gain to `target` over `ramp_secs`.
    fn set_gain(&self, target: f32, ramp_secs: f32);
}

/// What to do with buffered chunks that never became contiguous.
///
/// A gap in the sequence must not hang playback indefinitely; this makes the
/// policy explicit instead of inheriting silent dropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Discard everything after the gap, with a diagnostic.
    #[default]
    Discard,
    /// Play the remaining chunks in sequence order, accepting an audible gap.
    PlayRemaining,
}

/// Snapshot of scheduler state for the caller's `audio_state()` surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Whether output gain is ramped to zero.
    pub muted: bool,
    /// Whether the clock is suspended.
    pub paused: bool,
    /// Next sequence number that will be played.
    pub next_sequence: u64,
    /// Chunks buffered waiting for an earlier sequence.
    pub pending_chunks: usize,
}

struct SchedulerInner {
    pending: BTreeMap<u64, Vec<u8>>,
    next_sequence: u64,
    next_start: Option<f64>,
}

/// Reassembles out-of-order PCM chunks into continuous, click-free playback.
pub struct AudioScheduler {
    output: Arc<dyn AudioOutput>,
    format: AudioFormat,
    gap_policy: GapPolicy,
    inner: Mutex<SchedulerInner>,
    muted: AtomicBool,
    paused: AtomicBool,
}

impl AudioScheduler {
    /// Create a scheduler over an audio output.
    pub fn new(output: Arc<dyn AudioOutput>, format: AudioFormat, gap_policy: GapPolicy) -> Self {
        Self {
            output,
            format,
            gap_policy,
            inner: Mutex::new(SchedulerInner {
                pending: BTreeMap::new(),
                next_sequence: 0,
                next_start: None,
            }),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Accept a base64 PCM chunk tagged with its sequence number, then drain.
    pub fn add_chunk(&self, sequence: u64, base64_pcm: &str) -> Result<()> {
        let pcm = audio::decode_base64_pcm(base64_pcm)?;
        self.add_chunk_bytes(sequence, pcm);
        Ok(())
    }

    /// Accept a raw PCM chunk tagged with its sequence number, then drain.
    ///
    /// Chunks whose sequence was already played are dropped: playback never
    /// rewinds and never duplicates.
    pub fn add_chunk_bytes(&self, sequence: u64, pcm: Vec<u8>) {
        let mut inner = self.inner.lock();
        if sequence < inner.next_sequence {
            tracing::warn!(
                sequence,
                next = inner.next_sequence,
                "Dropping duplicate/rewound audio chunk"
            );
            return;
        }
        if inner.pending.insert(sequence, pcm).is_some() {
            tracing::warn!(sequence, "Replacing already-buffered audio chunk");
        }
        self.drain(&mut inner);
    }

    /// Play every chunk in the contiguous prefix starting at `next_sequence`.
    ///
    /// A no-op when the next chunk has not arrived yet; chunks are consumed
    /// the moment they are scheduled.
    fn drain(&self, inner: &mut SchedulerInner) {
        while let Some(pcm) = inner.pending.remove(&inner.next_sequence) {
            let samples = audio::pcm16_to_f32(&pcm);
            let duration = self.format.duration_secs(samples.len());

            // First chunk, or the planned start already elapsed (decoder fell
            // behind real time): start now and accept the catch-up gap.
            // Otherwise start exactly where the previous chunk ends.
            let now = self.output.now();
            let start = match inner.next_start {
                Some(planned) if planned > now => planned,
                _ => now,
            };

            if let Err(err) = self.output.schedule(samples, start) {
                tracing::warn!(sequence = inner.next_sequence, "Audio schedule failed: {err}");
            }
            inner.next_start = Some(start + duration);
            inner.next_sequence += 1;
        }
    }

    /// Final drain at session completion; applies the gap policy to whatever
    /// never became contiguous.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock();
        self.drain(&mut inner);
        if inner.pending.is_empty() {
            return;
        }

        let orphaned: Vec<u64> = inner.pending.keys().copied().collect();
        match self.gap_policy {
            GapPolicy::Discard => {
                tracing::warn!(
                    expected = inner.next_sequence,
                    ?orphaned,
                    "Discarding audio chunks that never became contiguous"
                );
                inner.pending.clear();
            }
            GapPolicy::PlayRemaining => {
                tracing::warn!(
                    expected = inner.next_sequence,
                    ?orphaned,
                    "Sequence gap at finalize; playing remaining chunks in order"
                );
                loop {
                    let Some(next) = inner.pending.keys().next().copied() else { break };
                    inner.next_sequence = next;
                    self.drain(&mut inner);
                }
            }
        }
    }

    /// Cancel all playback and reset to a fresh session.
    ///
    /// Clears buffers, rewinds the sequence counter to zero and forgets the
    /// planned start time.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.output.stop();
        inner.pending.clear();
        inner.next_sequence = 0;
        inner.next_start = None;
    }

    /// Suspend the audio clock; scheduled state is retained.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.output.pause();
    }

    /// Resume the audio clock exactly where it left off.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.output.resume();
    }

    /// Mute or unmute via a short gain ramp.
    ///
    /// Scheduling continues while muted so timing stays correct for a later
    /// unmute.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        let target = if muted { 0.0 } else { 1.0 };
        self.output.set_gain(target, MUTE_RAMP_SECS);
    }

    /// Whether output is currently muted.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Snapshot of current playback state.
    pub fn playback_state(&self) -> PlaybackState {
        let inner = self.inner.lock();
        PlaybackState {
            muted: self.muted.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            next_sequence: inner.next_sequence,
            pending_chunks: inner.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::f32_to_pcm16;
    use parking_lot::Mutex as PlMutex;

    /// Manual output: a settable clock plus a log of scheduled segments.
    #[derive(Default)]
    pub(crate) struct ManualOutput {
        pub clock: PlMutex<f64>,
        pub scheduled: PlMutex<Vec<(f64, usize)>>, // (start, sample_count)
        pub stopped: AtomicBool,
        pub paused: AtomicBool,
        pub gain: PlMutex<(f32, f32)>, // (target, ramp_secs)
    }

    impl AudioOutput for ManualOutput {
        fn now(&self) -> f64 {
            *self.clock.lock()
        }
        fn schedule(&self, samples: Vec<f32>, start: f64) -> Result<()> {
            self.scheduled.lock().push((start, samples.len()));
            Ok(())
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
            self.scheduled.lock().clear();
        }
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
        fn set_gain(&self, target: f32, ramp_secs: f32) {
            *self.gain.lock() = (target, ramp_secs);
        }
    }

    fn chunk(samples: usize) -> Vec<u8> {
        f32_to_pcm16(&vec![0.25; samples])
    }

    fn scheduler() -> (Arc<ManualOutput>, AudioScheduler) {
        let output = Arc::new(ManualOutput::default());
        let sched = AudioScheduler::new(
            output.clone(),
            AudioFormat::pcm16_24khz(),
            GapPolicy::Discard,
        );
        (output, sched)
    }

    #[test]
    fn test_in_order_chunks_are_gapless() {
        let (output, sched) = scheduler();
        sched.add_chunk_bytes(0, chunk(24_000)); // 1.0s
        sched.add_chunk_bytes(1, chunk(12_000)); // 0.5s
        sched.add_chunk_bytes(2, chunk(6_000));

        let scheduled = output.scheduled.lock();
        assert_eq!(scheduled.len(), 3);
        assert_eq!(scheduled[0].0, 0.0);
        assert!((scheduled[1].0 - 1.0).abs() < 1e-9);
        assert!((scheduled[2].0 - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_order_chunk_waits_for_prefix() {
        let (output, sched) = scheduler();
        sched.add_chunk_bytes(1, chunk(1_000));
        assert!(output.scheduled.lock().is_empty());
        assert_eq!(sched.playback_state().pending_chunks, 1);

        sched.add_chunk_bytes(0, chunk(2_400)); // 0.1s
        let scheduled = output.scheduled.lock();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0], (0.0, 2_400));
        assert!((scheduled[1].0 - 0.1).abs() < 1e-9);
        assert_eq!(sched.playback_state().next_sequence, 2);
    }

    #[test]
    fn test_catch_up_when_clock_passed_planned_start() {
        let (output, sched) = scheduler();
        sched.add_chunk_bytes(0, chunk(2_400)); // ends at 0.1
        *output.clock.lock() = 5.0; // decoder fell far behind
        sched.add_chunk_bytes(1, chunk(2_400));

        let scheduled = output.scheduled.lock();
        assert_eq!(scheduled[1].0, 5.0);
        drop(scheduled);

        // And the next chunk chains off the caught-up time.
        sched.add_chunk_bytes(2, chunk(2_400));
        assert!((output.scheduled.lock()[2].0 - 5.1).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_and_rewound_chunks_dropped() {
        let (output, sched) = scheduler();
        sched.add_chunk_bytes(0, chunk(100));
        sched.add_chunk_bytes(0, chunk(100));
        assert_eq!(output.scheduled.lock().len(), 1);
        assert_eq!(sched.playback_state().next_sequence, 1);
    }

    #[test]
    fn test_finalize_discards_orphans() {
        let (output, sched) = scheduler();
        sched.add_chunk_bytes(0, chunk(100));
        sched.add_chunk_bytes(2, chunk(100)); // 1 never arrives
        sched.finalize();
        assert_eq!(output.scheduled.lock().len(), 1);
        assert_eq!(sched.playback_state().pending_chunks, 0);
    }

    #[test]
    fn test_finalize_play_remaining_plays_past_gap() {
        let output = Arc::new(ManualOutput::default());
        let sched = AudioScheduler::new(
            output.clone(),
            AudioFormat::pcm16_24khz(),
            GapPolicy::PlayRemaining,
        );
        sched.add_chunk_bytes(0, chunk(2_400));
        sched.add_chunk_bytes(2, chunk(2_400));
        sched.add_chunk_bytes(3, chunk(2_400));
        sched.finalize();

        let scheduled = output.scheduled.lock();
        assert_eq!(scheduled.len(), 3);
        // Chunks 2 and 3 still play back-to-back.
        assert!((scheduled[2].0 - (scheduled[1].0 + 0.1)).abs() < 1e-9);
        assert_eq!(sched.playback_state().pending_chunks, 0);
    }

    #[test]
    fn test_stop_resets_sequence_and_buffers() {
        let (output, sched) = scheduler();
        sched.add_chunk_bytes(0, chunk(100));
        sched.add_chunk_bytes(5, chunk(100));
        sched.stop();

        assert!(output.stopped.load(Ordering::SeqCst));
        let state = sched.playback_state();
        assert_eq!(state.next_sequence, 0);
        assert_eq!(state.pending_chunks, 0);

        // A fresh session starts at the clock again.
        sched.add_chunk_bytes(0, chunk(100));
        assert_eq!(output.scheduled.lock().last().unwrap().0, 0.0);
    }

    #[test]
    fn test_pause_resume_reflected_in_state() {
        let (output, sched) = scheduler();
        sched.pause();
        assert!(sched.playback_state().paused);
        assert!(output.paused.load(Ordering::SeqCst));
        sched.resume();
        assert!(!sched.playback_state().paused);
    }

    #[test]
    fn test_mute_ramps_gain_and_keeps_scheduling() {
        let (output, sched) = scheduler();
        sched.set_muted(true);
        assert_eq!(*output.gain.lock(), (0.0, MUTE_RAMP_SECS));
        assert!(sched.is_muted());

        // Muted chunks are still scheduled so timing survives unmute.
        sched.add_chunk_bytes(0, chunk(2_400));
        sched.add_chunk_bytes(1, chunk(2_400));
        assert_eq!(output.scheduled.lock().len(), 2);

        sched.set_muted(false);
        assert_eq!(*output.gain.lock(), (1.0, MUTE_RAMP_SECS));
    }

    #[test]
    fn test_invalid_base64_is_an_error() {
        let (_, sched) = scheduler();
        assert!(sched.add_chunk(0, "!!!not base64!!!").is_err());
    }
}
