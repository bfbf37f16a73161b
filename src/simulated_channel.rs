//! A software stand-in for a radio link, for exercising the whole measurement
//! chain without hardware.
//!
//! The channel delays the played clip by a fixed mouth-to-ear latency,
//! scales it, adds uniform noise and occasionally loses a trial's audio
//! altogether. Nothing gets through unless the [`SimulatedRadio`] was keyed
//! when playback started.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::audio::{Clip, Recording};
use crate::error::{AudioIoError, ConfigError};
use crate::hardware::{AudioIo, DeviceControl, PlaybackHandle};

/// Rate recordings are made at when nothing is playing.
const IDLE_SAMPLE_RATE: u32 = 48_000;

/// Impairments applied by a [`SimulatedChannel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Mouth-to-ear delay in seconds.
    pub latency: f64,
    /// Linear gain applied to the transmitted audio.
    pub gain: f32,
    /// Amplitude of the uniform noise added to every recording.
    pub noise: f32,
    /// Probability that a trial's audio never arrives.
    pub dropout: f64,
    /// Recordings that succeed before the device stops answering.
    pub fail_after: Option<usize>,
    /// Recordings that fail once the device stopped answering; it never
    /// recovers when unset.
    pub failures: Option<u32>,
    /// Seed for noise and drop-outs.
    pub seed: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            latency: 0.05,
            gain: 1.0,
            noise: 0.0,
            dropout: 0.0,
            fail_after: None,
            failures: None,
            seed: 0,
        }
    }
}

impl ChannelConfig {
    /// Checks that every impairment is a usable number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if !(self.latency.is_finite() && self.latency >= 0.0) {
            return invalid("channel latency must be a finite number of seconds, at least 0");
        }
        if !self.gain.is_finite() {
            return invalid("channel gain must be finite");
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return invalid("channel noise must be finite and at least 0");
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return invalid("channel dropout must be a probability within [0, 1]");
        }
        Ok(())
    }
}

struct Transmission {
    clip: Clip,
    keyed: bool,
}

/// The audio side of the simulated link.
pub struct SimulatedChannel {
    config: ChannelConfig,
    keyed: Arc<AtomicBool>,
    key_presses: Arc<AtomicUsize>,
    rng: StdRng,
    playing: Option<Transmission>,
    recordings: usize,
    failed: u32,
}

impl SimulatedChannel {
    /// Creates a link with the given impairments.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            keyed: Arc::new(AtomicBool::new(false)),
            key_presses: Arc::new(AtomicUsize::new(0)),
            playing: None,
            recordings: 0,
            failed: 0,
        }
    }

    /// The push-to-talk control of this link.
    pub fn radio(&self) -> SimulatedRadio {
        SimulatedRadio {
            keyed: Arc::clone(&self.keyed),
            presses: Arc::clone(&self.key_presses),
        }
    }

    /// Whether the radio is currently keyed.
    pub fn is_keyed(&self) -> bool {
        self.keyed.load(Ordering::SeqCst)
    }

    /// Times the radio has been keyed so far.
    pub fn key_presses(&self) -> usize {
        self.key_presses.load(Ordering::SeqCst)
    }

    /// Recordings delivered so far.
    pub fn recordings(&self) -> usize {
        self.recordings
    }

    fn device_failed(&mut self) -> bool {
        match self.config.fail_after {
            Some(after) if self.recordings >= after => match self.config.failures {
                Some(n) if self.failed >= n => false,
                _ => {
                    self.failed += 1;
                    true
                }
            },
            _ => false,
        }
    }
}

impl AudioIo for SimulatedChannel {
    type Playback = SimulatedPlayback;

    fn play(&mut self, clip: &Clip) -> Result<SimulatedPlayback, AudioIoError> {
        let keyed = self.is_keyed();
        if !keyed {
            warn!("Playing {} with the radio un-keyed", clip.name());
        }
        self.playing = Some(Transmission {
            clip: clip.clone(),
            keyed,
        });
        Ok(SimulatedPlayback {
            name: clip.name().to_string(),
        })
    }

    fn record(&mut self, duration: Duration) -> Result<Recording, AudioIoError> {
        if self.device_failed() {
            self.playing = None;
            return Err(AudioIoError::DeviceNotResponding(
                "simulated audio interface".to_string(),
            ));
        }

        let started_at = SystemTime::now();
        let transmission = self.playing.take();
        let sample_rate = transmission
            .as_ref()
            .map(|t| t.clip.sample_rate())
            .unwrap_or(IDLE_SAMPLE_RATE);
        let len = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        let mut samples = vec![0.0f32; len];

        if let Some(Transmission { clip, keyed: true }) = transmission {
            let dropout = if self.config.dropout.is_nan() {
                0.0
            } else {
                self.config.dropout.clamp(0.0, 1.0)
            };
            if self.rng.gen_bool(dropout) {
                debug!("Dropped {}", clip.name());
            } else {
                let delay = (self.config.latency.max(0.0) * sample_rate as f64).round() as usize;
                for (out, v) in samples.iter_mut().skip(delay).zip(clip.mono().iter()) {
                    *out = v * self.config.gain;
                }
            }
        }

        if self.config.noise > 0.0 && self.config.noise.is_finite() {
            let amplitude = self.config.noise;
            for v in samples.iter_mut() {
                *v += self.rng.gen_range(-amplitude..amplitude);
            }
        }

        self.recordings += 1;
        Ok(Recording::new(sample_rate, samples, started_at))
    }
}

/// Playback on the simulated link, which finishes instantly.
#[derive(Debug)]
pub struct SimulatedPlayback {
    name: String,
}

impl PlaybackHandle for SimulatedPlayback {
    fn wait(self) -> Result<(), AudioIoError> {
        Ok(())
    }

    fn stop(self) {
        debug!("Stopped playback of {}", self.name);
    }
}

/// Push-to-talk of the simulated link.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    keyed: Arc<AtomicBool>,
    presses: Arc<AtomicUsize>,
}

impl DeviceControl for SimulatedRadio {
    fn key(&mut self) -> Result<(), AudioIoError> {
        self.keyed.store(true, Ordering::SeqCst);
        self.presses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unkey(&mut self) -> Result<(), AudioIoError> {
        self.keyed.store(false, Ordering::SeqCst);
        Ok(())
    }
}
