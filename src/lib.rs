//! abcmrt measures how intelligible speech is after it went through a radio
//! link, following the ABC-MRT (Aligning by Cross-correlation, Bark-scale
//! Modified Rhyme Test) procedure. Each trial keys the radio, plays one
//! recorded word of a six word rhyme set, records what comes out of the other
//! end, finds the clip in that recording, and asks which word of the set the
//! received audio resembles most. The share of trials where that is the word actually
//! played, with guessing removed, is the intelligibility of the link.
//!
//! The pieces, bottom up:
//!
//! - [`corpus`] and [`corpus_loader`] hold the word sets and their clips.
//! - [`aligner`] locates a clip inside a recording.
//! - [`scorer`] ranks the words of a set against an aligned segment, on top
//!   of the Bark band spectra of [`spectral`].
//! - [`hardware`] is the seam to the audio interface and push-to-talk
//!   control, with [`simulated_channel`] standing in for a real link.
//! - [`trial`] runs one trial, [`session`] runs a test plan and summarizes
//!   it with [`stats`], and [`sink`] stores the outcome.
//!   [`session::reprocess`] scores a stored session again from its saved
//!   recordings.

#![warn(missing_docs)]
pub mod aligner;
pub mod args;
pub mod audio;
pub mod clip_name;
pub mod component;
pub mod config;
pub mod corpus;
pub mod corpus_loader;
pub mod error;
pub mod hardware;
pub mod recording_store;
pub mod scorer;
pub mod session;
pub mod simulated_channel;
pub mod sink;
pub mod spectral;
pub mod stats;
pub mod trial;

#[cfg(test)]
pub(crate) mod test_support;
