//! The collaborators a trial drives: the audio interface that plays and
//! records, and the device control that keys the transmitting radio.
//!
//! Both live together in a [`Hardware`] value. Runners share it as
//! [`SharedHardware`], and whoever holds the lock owns the channel for the
//! whole key, play, record, un-key and gap sequence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::{Clip, Recording};
use crate::error::AudioIoError;

/// A playback started by [`AudioIo::play`].
pub trait PlaybackHandle {
    /// Blocks until the clip has been played out completely.
    fn wait(self) -> Result<(), AudioIoError>;

    /// Stops playback early. Errors are ignored, the trial is being thrown
    /// away anyway.
    fn stop(self);
}

/// Plays reference clips into the channel and records what comes out of it.
pub trait AudioIo {
    /// Handle returned for each playback.
    type Playback: PlaybackHandle;

    /// Starts playing `clip` and returns without waiting for it to finish.
    fn play(&mut self, clip: &Clip) -> Result<Self::Playback, AudioIoError>;

    /// Records about `duration` of channel output. Blocks until done. The
    /// recording is at the sample rate of the clip being played.
    fn record(&mut self, duration: Duration) -> Result<Recording, AudioIoError>;
}

/// Push-to-talk control of the transmitting radio.
pub trait DeviceControl {
    /// Keys the radio before playback.
    fn key(&mut self) -> Result<(), AudioIoError>;

    /// Releases the radio after recording.
    fn unkey(&mut self) -> Result<(), AudioIoError>;
}

/// The audio interface and radio control of one test setup.
#[derive(Debug)]
pub struct Hardware<A, D> {
    /// Audio interface
    pub audio: A,
    /// Radio control
    pub device: D,
}

/// [`Hardware`] behind the lock that serializes access to it.
pub type SharedHardware<A, D> = Arc<Mutex<Hardware<A, D>>>;

impl<A: AudioIo, D: DeviceControl> Hardware<A, D> {
    /// Pairs an audio interface with its radio control.
    pub fn new(audio: A, device: D) -> Self {
        Self { audio, device }
    }

    /// Wraps the hardware so that it can be handed to runners.
    pub fn shared(self) -> SharedHardware<A, D> {
        Arc::new(Mutex::new(self))
    }
}

/// Device control for setups without push-to-talk, e.g. a full duplex
/// channel or a loopback cable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceControl;

impl DeviceControl for NoDeviceControl {
    fn key(&mut self) -> Result<(), AudioIoError> {
        Ok(())
    }

    fn unkey(&mut self) -> Result<(), AudioIoError> {
        Ok(())
    }
}
