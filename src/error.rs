//! Error types for every stage of a measurement. Alignment and scoring
//! failures only ever skip the trial they happened in, while
//! [`AudioIoError`]s come straight from the hardware collaborators and end the
//! session unless the caller asked for retries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons the [`Aligner`](crate::aligner::Aligner) refuses to locate a clip.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    /// The recording holds fewer samples than the clip it should contain.
    #[error("insufficient audio: recording has {recorded} samples, clip needs {required}")]
    InsufficientAudio {
        /// Samples in the recording
        recorded: usize,
        /// Samples in the reference clip
        required: usize,
    },

    /// The best lag correlated too weakly to be trusted.
    #[error("no reliable alignment: peak correlation {confidence:.3} below {threshold:.3}")]
    NoReliableAlignment {
        /// Peak envelope correlation that was found
        confidence: f64,
        /// Configured minimum
        threshold: f64,
    },

    /// Clip and recording were captured at different rates.
    #[error("sample rate mismatch: clip at {clip} Hz, recording at {recording} Hz")]
    SampleRateMismatch {
        /// Clip sample rate
        clip: u32,
        /// Recording sample rate
        recording: u32,
    },
}

/// Reasons the [`Scorer`](crate::scorer::Scorer) cannot rank a segment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// The segment is shorter than every candidate clip of the word set.
    #[error("segment too short: {segment} samples, shortest candidate has {shortest}")]
    SegmentTooShort {
        /// Samples in the aligned segment
        segment: usize,
        /// Samples in the shortest candidate
        shortest: usize,
    },

    /// The word set cannot be compared against (no candidates, mixed rates).
    #[error("malformed word set {word_set}: {reason}")]
    MalformedWordSet {
        /// Offending word set
        word_set: String,
        /// What is wrong with it
        reason: String,
    },

    /// The segment was captured at a different rate than the candidates.
    #[error("sample rate mismatch: word set at {word_set} Hz, segment at {segment} Hz")]
    SampleRateMismatch {
        /// Candidate sample rate
        word_set: u32,
        /// Segment sample rate
        segment: u32,
    },
}

/// Failures reported by the audio interface or the radio control hardware.
/// These are passed through as-is.
#[derive(Debug, Error)]
pub enum AudioIoError {
    /// The device stopped answering.
    #[error("device not responding: {0}")]
    DeviceNotResponding(String),

    /// The audio interface could not keep its buffers fed.
    #[error("buffer underrun after {0} samples")]
    BufferUnderrun(usize),

    /// Playback was stopped before it finished.
    #[error("playback interrupted")]
    Interrupted,

    /// Reading or writing WAV data failed.
    #[error("wav error: {0}")]
    Hound(#[from] hound::Error),

    /// Plain operating system I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while building the [`WordCorpus`](crate::corpus::WordCorpus).
#[derive(Debug, Error)]
pub enum CorpusError {
    /// The corpus directory or a clip could not be read.
    #[error("io error reading {path}: {source}")]
    Io {
        /// File or directory being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A clip is not a readable WAV file.
    #[error("wav error reading {path}: {source}")]
    Hound {
        /// File being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: hound::Error,
    },

    /// The keyword window manifest is not valid RON.
    #[error("keyword manifest {path}: {source}")]
    Manifest {
        /// Manifest file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: ron::error::SpannedError,
    },

    /// A word set is missing words or mixes formats.
    #[error("invalid word set {word_set}: {reason}")]
    InvalidWordSet {
        /// Offending word set
        word_set: String,
        /// What is wrong with it
        reason: String,
    },

    /// Two word sets share an id.
    #[error("duplicate word set id {0}")]
    DuplicateWordSet(String),

    /// Nothing usable was found.
    #[error("no word sets found in {0}")]
    Empty(PathBuf),
}

/// Failures while persisting a finalized session.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the output failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the session failed.
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),

    /// A stored session could not be parsed.
    #[error("ron parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// Failures while reading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid configuration.
    #[error("ron error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Reasons a session cannot start at all. Problems during the session never
/// show up here, they end up in the session's audit trail instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The plan names a word set the corpus does not have.
    #[error("unknown word set {0}")]
    UnknownWordSet(String),

    /// The plan names a word index past the end of its word set.
    #[error("word set {word_set} has no word at index {index}")]
    UnknownWord {
        /// Word set that was addressed
        word_set: String,
        /// Index that was requested
        index: usize,
    },

    /// The plan is empty or too long.
    #[error("invalid test plan: {0}")]
    InvalidPlan(String),

    /// The directory for saved audio could not be prepared.
    #[error("cannot store audio: {0}")]
    Storage(#[from] AudioIoError),
}

/// Machine readable reason attached to every skip, retry and abort in a
/// session's audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    /// [`AlignmentError::InsufficientAudio`]
    InsufficientAudio,
    /// [`AlignmentError::NoReliableAlignment`]
    NoReliableAlignment,
    /// [`AlignmentError::SampleRateMismatch`] or [`ScoringError::SampleRateMismatch`]
    SampleRateMismatch,
    /// [`ScoringError::SegmentTooShort`]
    SegmentTooShort,
    /// [`ScoringError::MalformedWordSet`]
    MalformedWordSet,
    /// Any [`AudioIoError`]
    AudioIo,
    /// The operator stopped the session.
    OperatorAbort,
}

impl AlignmentError {
    /// Audit trail code for this error.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::InsufficientAudio { .. } => ReasonCode::InsufficientAudio,
            Self::NoReliableAlignment { .. } => ReasonCode::NoReliableAlignment,
            Self::SampleRateMismatch { .. } => ReasonCode::SampleRateMismatch,
        }
    }
}

impl ScoringError {
    /// Audit trail code for this error.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::SegmentTooShort { .. } => ReasonCode::SegmentTooShort,
            Self::MalformedWordSet { .. } => ReasonCode::MalformedWordSet,
            Self::SampleRateMismatch { .. } => ReasonCode::SampleRateMismatch,
        }
    }
}
