//! One play, record, align and score cycle.
//!
//! A trial is split in two halves. [`TrialRunner::capture`] owns the
//! hardware: it keys the radio, plays the clip, records the channel and
//! releases the radio again. [`TrialProcessor::process`] turns the capture
//! into a [`TrialOutcome`] and needs nothing but the corpus, so captures can
//! be handed to worker threads while the next trial is already on the air.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::aligner::{Aligner, AlignmentResult};
use crate::audio::{Clip, Recording};
use crate::component::Component;
use crate::config::SessionConfig;
use crate::corpus::{WordCorpus, WordSetId};
use crate::error::{AudioIoError, ReasonCode, ScoringError, SessionError};
use crate::hardware::{AudioIo, DeviceControl, Hardware, PlaybackHandle, SharedHardware};
use crate::recording_store::RecordingStore;
use crate::scorer::{CandidateScore, Scorer};

/// Where a trial is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    /// Nothing has happened yet
    Idle,
    /// Radio keyed, clip playing
    Playing,
    /// Channel output being captured
    Recording,
    /// Locating the clip in the recording
    Aligning,
    /// Ranking the candidates
    Scoring,
    /// A result was produced
    Complete,
    /// The trial ended without a result
    Aborted,
}

impl TrialState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TrialState::*;
        match (self, next) {
            (s, Aborted) => !s.is_terminal(),
            (Idle, Playing)
            | (Playing, Recording)
            | (Recording, Aligning)
            | (Aligning, Scoring)
            | (Scoring, Complete) => true,
            _ => false,
        }
    }
}

/// The states one trial went through, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialProgress {
    index: usize,
    history: Vec<TrialState>,
}

impl TrialProgress {
    fn new(index: usize) -> Self {
        Self {
            index,
            history: vec![TrialState::Idle],
        }
    }

    /// Current state.
    pub fn state(&self) -> TrialState {
        self.history.last().copied().unwrap_or(TrialState::Idle)
    }

    /// Every state so far, starting with [`TrialState::Idle`].
    pub fn history(&self) -> &[TrialState] {
        &self.history
    }

    fn advance(&mut self, next: TrialState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "trial {} cannot go from {current:?} to {next:?}",
            self.index
        );
        debug!("Trial {}: {current:?} -> {next:?}", self.index);
        self.history.push(next);
    }
}

/// What to measure in one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSpec {
    /// Word set to play from
    pub word_set: WordSetId,
    /// Index of the word that is played
    pub target: usize,
    /// Test condition the trial counts towards
    pub condition: Option<String>,
}

/// A [`TrialSpec`] scheduled as trial `index` of a session, with its clip
/// already looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRequest {
    /// Position of the trial in the session, from 0
    pub index: usize,
    /// How many times this trial has been re-issued
    pub attempt: u32,
    /// What to measure
    pub spec: TrialSpec,
    /// Clip of the target word
    pub clip: Clip,
}

impl TrialRequest {
    /// Schedules `spec` as trial `index`, failing if the corpus has no clip
    /// for it.
    pub fn new(index: usize, spec: TrialSpec, corpus: &WordCorpus) -> Result<Self, SessionError> {
        let word_set = corpus
            .get(&spec.word_set)
            .ok_or_else(|| SessionError::UnknownWordSet(spec.word_set.to_string()))?;
        let clip = word_set
            .clip(spec.target)
            .cloned()
            .ok_or_else(|| SessionError::UnknownWord {
                word_set: spec.word_set.to_string(),
                index: spec.target,
            })?;
        Ok(Self {
            index,
            attempt: 0,
            spec,
            clip,
        })
    }

    /// The same trial, issued once more.
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Shared flag for stopping a session from another thread or a signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// A handle that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks everything watching this handle to stop.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`AbortHandle::abort`] was called.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Audio captured for one trial, ready to be processed.
#[derive(Debug)]
pub struct CapturedTrial {
    /// The trial that was run
    pub request: TrialRequest,
    /// What came back from the channel
    pub recording: Recording,
    /// States so far
    pub progress: TrialProgress,
}

impl CapturedTrial {
    /// Wraps a recording made outside a [`TrialRunner`], e.g. one read back
    /// from disk.
    pub fn new(request: TrialRequest, recording: Recording) -> Self {
        let mut progress = TrialProgress::new(request.index);
        progress.advance(TrialState::Playing);
        progress.advance(TrialState::Recording);
        Self {
            request,
            recording,
            progress,
        }
    }
}

/// A scored trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Position in the session
    pub index: usize,
    /// Test condition
    pub condition: Option<String>,
    /// Word set played from
    pub word_set: WordSetId,
    /// Index of the word that was played
    pub target_index: usize,
    /// The word that was played
    pub target_word: String,
    /// Index of the word the scorer picked
    pub predicted_index: usize,
    /// The word the scorer picked
    pub predicted_word: String,
    /// Whether the prediction matches the target
    pub correct: bool,
    /// Every candidate, closest first
    pub scores: Vec<CandidateScore>,
    /// Where the clip was found in the recording
    pub alignment: AlignmentResult,
    /// Name of the clip that was played
    pub clip_name: String,
    /// When the recording started
    pub timestamp: SystemTime,
}

/// A trial that produced no score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTrial {
    /// Position in the session
    pub index: usize,
    /// Re-issue count of the attempt that was skipped
    pub attempt: u32,
    /// What was measured
    pub spec: TrialSpec,
    /// Name of the clip that was played
    pub clip_name: String,
    /// Why no score was produced
    pub reason: ReasonCode,
    /// Human readable detail
    pub message: String,
    /// Alignment, if it succeeded before scoring failed
    pub alignment: Option<AlignmentResult>,
}

/// How a captured trial ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialOutcome {
    /// A word was picked
    Scored(TrialResult),
    /// Alignment or scoring refused the recording
    Skipped(SkippedTrial),
}

impl TrialOutcome {
    /// Position of the trial in the session.
    pub fn index(&self) -> usize {
        match self {
            Self::Scored(r) => r.index,
            Self::Skipped(s) => s.index,
        }
    }
}

/// Aligns and scores captured trials. Holds only configuration and the
/// shared corpus, so clones are cheap and can run on any thread.
#[derive(Debug, Clone)]
pub struct TrialProcessor {
    aligner: Aligner,
    scorer: Scorer,
    corpus: Arc<WordCorpus>,
    processed: usize,
}

impl TrialProcessor {
    /// Creates a processor over `corpus`.
    pub fn new(aligner: Aligner, scorer: Scorer, corpus: Arc<WordCorpus>) -> Self {
        Self {
            aligner,
            scorer,
            corpus,
            processed: 0,
        }
    }

    /// Aligns the recording against the played clip, cuts out the aligned
    /// segment and scores it against the clip's word set.
    pub fn process(&self, captured: CapturedTrial) -> TrialOutcome {
        let CapturedTrial {
            request,
            recording,
            mut progress,
        } = captured;
        let clip = &request.clip;

        let skip = |progress: &mut TrialProgress,
                    reason: ReasonCode,
                    message: String,
                    alignment: Option<AlignmentResult>| {
            progress.advance(TrialState::Aborted);
            warn!("Skipping trial {}: {message}", request.index);
            TrialOutcome::Skipped(SkippedTrial {
                index: request.index,
                attempt: request.attempt,
                spec: request.spec.clone(),
                clip_name: clip.name().to_string(),
                reason,
                message,
                alignment,
            })
        };

        progress.advance(TrialState::Aligning);
        let alignment = match self.aligner.align(clip, &recording) {
            Ok(alignment) => alignment,
            Err(e) => return skip(&mut progress, e.reason_code(), e.to_string(), None),
        };

        progress.advance(TrialState::Scoring);
        let Some(word_set) = self.corpus.get(&request.spec.word_set) else {
            let e = ScoringError::MalformedWordSet {
                word_set: request.spec.word_set.to_string(),
                reason: "not in the corpus".to_string(),
            };
            return skip(&mut progress, e.reason_code(), e.to_string(), Some(alignment));
        };
        let segment = recording.segment(alignment.offset, clip.frames());
        let report = match self.scorer.score(segment, recording.sample_rate(), word_set) {
            Ok(report) => report,
            Err(e) => return skip(&mut progress, e.reason_code(), e.to_string(), Some(alignment)),
        };

        progress.advance(TrialState::Complete);
        let best = report.best();
        let target_word = word_set
            .word(request.spec.target)
            .unwrap_or_default()
            .to_string();
        debug!(
            "Trial {}: played {target_word}, heard {} (distance {:.2})",
            request.index, best.word, best.distance
        );
        TrialOutcome::Scored(TrialResult {
            index: request.index,
            condition: request.spec.condition.clone(),
            word_set: request.spec.word_set.clone(),
            target_index: request.spec.target,
            correct: best.index == request.spec.target,
            target_word,
            predicted_index: best.index,
            predicted_word: best.word.clone(),
            scores: report.ranked().to_vec(),
            alignment,
            clip_name: clip.name().to_string(),
            timestamp: recording.started_at(),
        })
    }
}

impl fmt::Display for TrialProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrialProcessor")
    }
}

impl Component for TrialProcessor {
    type InData = CapturedTrial;
    type OutData = TrialOutcome;

    fn convert(&mut self, input: CapturedTrial) -> TrialOutcome {
        self.processed += 1;
        self.process(input)
    }

    fn finalize(&mut self) {
        debug!("{self} processed {} trials", self.processed);
    }
}

/// Runs the hardware half of trials.
pub struct TrialRunner<A, D> {
    hardware: SharedHardware<A, D>,
    timing: SessionConfig,
    store: Option<RecordingStore>,
}

impl<A: AudioIo, D: DeviceControl> TrialRunner<A, D> {
    /// Creates a runner. Runners built over clones of the same `hardware`
    /// take turns on it.
    pub fn new(hardware: SharedHardware<A, D>, timing: SessionConfig) -> Self {
        Self {
            hardware,
            timing,
            store: None,
        }
    }

    /// Keeps every recording in `store`.
    pub fn with_store(self, store: RecordingStore) -> Self {
        Self {
            store: Some(store),
            ..self
        }
    }

    /// Plays the request's clip over the channel and records the result.
    ///
    /// Returns `Ok(None)` when `abort` was triggered before or during the
    /// capture; whatever was recorded is discarded. The radio is un-keyed on
    /// every path once it was keyed.
    pub fn capture(
        &self,
        request: &TrialRequest,
        abort: &AbortHandle,
    ) -> Result<Option<CapturedTrial>, AudioIoError> {
        if abort.is_aborted() {
            return Ok(None);
        }

        let mut progress = TrialProgress::new(request.index);
        let mut hardware = self
            .hardware
            .lock()
            .map_err(|_| AudioIoError::DeviceNotResponding("hardware lock poisoned".to_string()))?;

        hardware.device.key()?;
        let on_air = self.on_air(&mut hardware, &request.clip, &mut progress, abort);
        let released = hardware.device.unkey();
        spin_sleep::sleep(self.timing.ptt_gap());
        drop(hardware);

        let recording = match (on_air, released) {
            (Ok(Some(recording)), Ok(())) => recording,
            (Ok(None), Ok(())) => {
                progress.advance(TrialState::Aborted);
                debug!("Trial {} discarded after abort", request.index);
                return Ok(None);
            }
            (Ok(_), Err(e)) => {
                progress.advance(TrialState::Aborted);
                return Err(e);
            }
            (Err(e), released) => {
                if let Err(unkey) = released {
                    warn!("Failed to un-key after error: {unkey}");
                }
                progress.advance(TrialState::Aborted);
                return Err(e);
            }
        };

        if let Some(store) = &self.store {
            store.save(request.index, &request.clip, &recording)?;
        }

        Ok(Some(CapturedTrial {
            request: request.clone(),
            recording,
            progress,
        }))
    }

    /// Everything between keying and un-keying.
    fn on_air(
        &self,
        hardware: &mut Hardware<A, D>,
        clip: &Clip,
        progress: &mut TrialProgress,
        abort: &AbortHandle,
    ) -> Result<Option<Recording>, AudioIoError> {
        spin_sleep::sleep(self.timing.ptt_wait());
        progress.advance(TrialState::Playing);
        let playback = hardware.audio.play(clip)?;

        progress.advance(TrialState::Recording);
        let recording = match hardware.audio.record(clip.duration() + self.timing.overplay()) {
            Ok(recording) => recording,
            Err(e) => {
                playback.stop();
                return Err(e);
            }
        };
        if abort.is_aborted() {
            playback.stop();
            return Ok(None);
        }
        playback.wait()?;
        Ok(Some(recording))
    }
}
