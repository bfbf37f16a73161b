//! Runs a test plan and turns its trials into a session score.
//!
//! The [`SessionAggregator`] captures trials one after the other on the
//! shared hardware. Captures are processed inline or, with
//! [`SessionConfig::workers`] above zero, on worker threads whose outcomes
//! come back over a channel. Either way only the aggregator's own thread
//! touches the [`SessionAccumulator`], and outcomes are put back in trial
//! order when the session is finalized.
//!
//! Alignment and scoring failures skip a trial. Audio I/O failures end the
//! session once `io_retries` are used up, as does the operator through an
//! [`AbortHandle`]; the trials completed until then are kept and the result
//! is marked incomplete.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::aligner::Aligner;
use crate::audio::{downmix, read_wav, Recording};
use crate::component::run_component;
use crate::config::{CiMethod, EngineConfig, SessionConfig};
use crate::corpus::WordCorpus;
use crate::error::{ReasonCode, SessionError};
use crate::hardware::{AudioIo, DeviceControl, SharedHardware};
use crate::recording_store::RecordingStore;
use crate::scorer::Scorer;
use crate::stats::{bootstrap_interval, guess_corrected, wilson_interval};
use crate::trial::{
    AbortHandle, CapturedTrial, SkippedTrial, TrialOutcome, TrialProcessor, TrialRequest,
    TrialResult, TrialRunner, TrialSpec,
};

/// The trials of a session, in the order they are run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    trials: Vec<TrialSpec>,
}

impl TestPlan {
    /// Most trials a randomized plan may have.
    pub const MAX_RANDOM_TRIALS: usize = 1200;

    /// Runs `specs` in order, the whole list `repetitions` times.
    pub fn new(specs: Vec<TrialSpec>, repetitions: usize) -> Self {
        let trials = std::iter::repeat(specs)
            .take(repetitions)
            .flatten()
            .collect();
        Self { trials }
    }

    /// Draws `trials` clips from the corpus in random order. The clips are
    /// dealt in shuffled passes over the whole corpus, so no clip repeats
    /// until every other clip was played, and a short plan can reach any
    /// word set.
    pub fn randomized<R: Rng + ?Sized>(
        corpus: &WordCorpus,
        trials: usize,
        condition: Option<String>,
        rng: &mut R,
    ) -> Result<Self, SessionError> {
        if !(1..=Self::MAX_RANDOM_TRIALS).contains(&trials) {
            return Err(SessionError::InvalidPlan(format!(
                "{trials} trials requested, expected 1 to {}",
                Self::MAX_RANDOM_TRIALS
            )));
        }
        let clips: Vec<TrialSpec> = corpus
            .word_sets()
            .iter()
            .flat_map(|set| {
                (0..set.len()).map(|target| TrialSpec {
                    word_set: set.id().clone(),
                    target,
                    condition: condition.clone(),
                })
            })
            .collect();
        if clips.is_empty() {
            return Err(SessionError::InvalidPlan("the corpus has no clips".to_string()));
        }

        let mut planned = Vec::with_capacity(trials);
        while planned.len() < trials {
            let mut pass = clips.clone();
            pass.shuffle(rng);
            pass.truncate(trials - planned.len());
            planned.extend(pass);
        }
        Ok(Self { trials: planned })
    }

    /// Trials in run order.
    pub fn trials(&self) -> &[TrialSpec] {
        &self.trials
    }

    /// Number of trials.
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Whether the plan has no trials.
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    fn requests(&self, corpus: &WordCorpus) -> Result<Vec<TrialRequest>, SessionError> {
        if self.trials.is_empty() {
            return Err(SessionError::InvalidPlan("no trials".to_string()));
        }
        self.trials
            .iter()
            .enumerate()
            .map(|(index, spec)| TrialRequest::new(index, spec.clone(), corpus))
            .collect()
    }
}

/// What happened to a trial besides being scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    /// The trial was given up on
    Skip,
    /// The trial was issued again
    Retry,
    /// The session was ended early
    Abort,
}

/// One line of a session's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Trial concerned
    pub trial: usize,
    /// Attempt of the trial that failed
    pub attempt: u32,
    /// What was done
    pub action: AuditAction,
    /// Why
    pub reason: ReasonCode,
    /// Detail from the underlying error
    pub message: String,
}

/// Accuracy of the trials sharing one condition label, or of all trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSummary {
    /// Condition label, `None` for unlabeled trials or the overall summary
    pub condition: Option<String>,
    /// Trials that finished, scored or skipped
    pub trials: usize,
    /// Trials that were scored
    pub scored: usize,
    /// Scored trials where the right word was picked
    pub correct: usize,
    /// Trials that were skipped
    pub skipped: usize,
    /// `correct / scored`, unset when nothing was scored
    pub accuracy: Option<f64>,
    /// Lower bound of the confidence interval
    pub ci_lower: Option<f64>,
    /// Upper bound of the confidence interval
    pub ci_upper: Option<f64>,
    /// Accuracy with chance guessing removed
    pub intelligibility: Option<f64>,
}

impl ConditionSummary {
    fn new(condition: Option<String>, results: &[&TrialResult], skipped: usize, config: &SessionConfig) -> Self {
        let scored = results.len();
        let correct = results.iter().filter(|r| r.correct).count();
        let accuracy = (scored > 0).then(|| correct as f64 / scored as f64);

        let ci = match config.ci {
            CiMethod::Wilson => wilson_interval(correct, scored, config.confidence_level),
            CiMethod::Bootstrap { resamples, seed } => {
                let outcomes: Vec<bool> = results.iter().map(|r| r.correct).collect();
                bootstrap_interval(&outcomes, config.confidence_level, resamples, seed)
            }
        };

        let guess = results
            .iter()
            .map(|r| 1.0 / r.scores.len().max(1) as f64)
            .sum::<f64>()
            / scored.max(1) as f64;

        Self {
            condition,
            trials: scored + skipped,
            scored,
            correct,
            skipped,
            accuracy,
            ci_lower: ci.map(|(lo, _)| lo),
            ci_upper: ci.map(|(_, hi)| hi),
            intelligibility: accuracy.map(|p| guess_corrected(p, guess)),
        }
    }
}

/// A finalized session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Trials in the plan
    pub planned: usize,
    /// Scored trials in trial order
    pub results: Vec<TrialResult>,
    /// Skipped trials in trial order
    pub skipped: Vec<SkippedTrial>,
    /// Every skip, retry and abort as it happened
    pub audit: Vec<AuditEntry>,
    /// One summary per condition label
    pub conditions: Vec<ConditionSummary>,
    /// Summary over all trials
    pub overall: ConditionSummary,
    /// Whether the session ended before running its whole plan
    pub incomplete: bool,
    /// Why the session ended early
    pub abort_reason: Option<ReasonCode>,
}

impl SessionResult {
    /// Summary of `condition`.
    pub fn condition(&self, condition: Option<&str>) -> Option<&ConditionSummary> {
        self.conditions
            .iter()
            .find(|c| c.condition.as_deref() == condition)
    }
}

/// Counts of a running session, handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    /// Trials in the plan
    pub planned: usize,
    /// Trials finished so far
    pub finished: usize,
    /// Of which scored
    pub scored: usize,
    /// Of which correct
    pub correct: usize,
    /// Of which skipped
    pub skipped: usize,
}

/// Collects outcomes while a session runs.
#[derive(Debug, Default)]
pub struct SessionAccumulator {
    planned: usize,
    results: Vec<TrialResult>,
    skipped: Vec<SkippedTrial>,
    audit: Vec<AuditEntry>,
}

impl SessionAccumulator {
    /// An empty accumulator for a plan of `planned` trials.
    pub fn new(planned: usize) -> Self {
        Self {
            planned,
            ..Self::default()
        }
    }

    /// Adds a scored trial.
    pub fn record(&mut self, result: TrialResult) {
        self.results.push(result);
    }

    /// Adds a trial that was given up on.
    pub fn skip(&mut self, skipped: SkippedTrial) {
        self.note(AuditEntry {
            trial: skipped.index,
            attempt: skipped.attempt,
            action: AuditAction::Skip,
            reason: skipped.reason,
            message: skipped.message.clone(),
        });
        self.skipped.push(skipped);
    }

    /// Appends to the audit trail.
    pub fn note(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
    }

    /// Counts so far.
    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            planned: self.planned,
            finished: self.results.len() + self.skipped.len(),
            scored: self.results.len(),
            correct: self.results.iter().filter(|r| r.correct).count(),
            skipped: self.skipped.len(),
        }
    }

    /// Orders the trials and computes the summaries.
    pub fn finalize(mut self, config: &SessionConfig, abort_reason: Option<ReasonCode>) -> SessionResult {
        self.results.sort_by_key(|r| r.index);
        self.skipped.sort_by_key(|s| s.index);

        let mut groups: BTreeMap<Option<String>, (Vec<&TrialResult>, usize)> = BTreeMap::new();
        for result in &self.results {
            groups.entry(result.condition.clone()).or_default().0.push(result);
        }
        for skipped in &self.skipped {
            groups.entry(skipped.spec.condition.clone()).or_default().1 += 1;
        }

        let conditions = groups
            .into_iter()
            .map(|(condition, (results, skipped))| {
                ConditionSummary::new(condition, &results, skipped, config)
            })
            .collect();
        let all: Vec<&TrialResult> = self.results.iter().collect();
        let overall = ConditionSummary::new(None, &all, self.skipped.len(), config);

        let finished = self.results.len() + self.skipped.len();
        SessionResult {
            planned: self.planned,
            incomplete: abort_reason.is_some() && finished < self.planned,
            abort_reason,
            conditions,
            overall,
            results: self.results,
            skipped: self.skipped,
            audit: self.audit,
        }
    }
}

/// Processing threads fed round robin over per-worker channels.
struct WorkerPool {
    inputs: Vec<Sender<CapturedTrial>>,
    output: Receiver<TrialOutcome>,
    handles: Vec<JoinHandle<()>>,
    turn: usize,
    in_flight: usize,
}

impl WorkerPool {
    fn spawn(workers: usize, processor: &TrialProcessor) -> Self {
        let (out_tx, output) = channel();
        let (inputs, handles) = (0..workers)
            .map(|_| {
                let (tx, rx) = channel();
                let handle = run_component(Box::new(processor.clone()), rx, out_tx.clone());
                (tx, handle)
            })
            .unzip();
        Self {
            inputs,
            output,
            handles,
            turn: 0,
            in_flight: 0,
        }
    }

    /// Hands a capture to the next worker, or gives it back if that worker
    /// is gone.
    fn submit(&mut self, captured: CapturedTrial) -> Result<(), CapturedTrial> {
        let worker = self.turn % self.inputs.len();
        self.turn += 1;
        self.inputs[worker].send(captured).map_err(|e| e.0)?;
        self.in_flight += 1;
        Ok(())
    }

    fn try_next(&mut self) -> Option<TrialOutcome> {
        let outcome = self.output.try_recv().ok()?;
        self.in_flight -= 1;
        Some(outcome)
    }

    /// Waits for the next outcome, if any is still expected.
    fn next(&mut self) -> Option<TrialOutcome> {
        if self.in_flight == 0 {
            return None;
        }
        let outcome = self.output.recv().ok()?;
        self.in_flight -= 1;
        Some(outcome)
    }

    /// Closes the inputs and collects everything still being processed.
    fn finish(mut self) -> Vec<TrialOutcome> {
        self.inputs.clear();
        let mut outcomes = Vec::with_capacity(self.in_flight);
        while let Some(outcome) = self.next() {
            outcomes.push(outcome);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("A processing worker panicked");
            }
        }
        outcomes
    }
}

/// Runs sessions over one set of hardware.
pub struct SessionAggregator<A, D> {
    runner: TrialRunner<A, D>,
    processor: TrialProcessor,
    corpus: Arc<WordCorpus>,
    config: SessionConfig,
}

impl<A: AudioIo, D: DeviceControl> SessionAggregator<A, D> {
    /// Sets up the trial pipeline described by `config`.
    pub fn new(
        hardware: SharedHardware<A, D>,
        corpus: Arc<WordCorpus>,
        config: &EngineConfig,
    ) -> Result<Self, SessionError> {
        let session = config.session.clone();
        let mut runner = TrialRunner::new(hardware, session.clone());
        if let Some(dir) = &session.save_audio_dir {
            runner = runner.with_store(RecordingStore::new(dir, session.save_tx_audio)?);
        }
        let processor = TrialProcessor::new(
            Aligner::new(config.aligner.clone()),
            Scorer::new(config.scorer.clone()),
            Arc::clone(&corpus),
        );
        Ok(Self {
            runner,
            processor,
            corpus,
            config: session,
        })
    }

    /// Runs every trial of `plan`.
    ///
    /// `progress` is called after every finished trial and stops the session
    /// by returning false. Errors are only returned for plans that cannot be
    /// run at all; anything going wrong during the session is reported in
    /// the result.
    pub fn run(
        &self,
        plan: &TestPlan,
        abort: &AbortHandle,
        mut progress: impl FnMut(&SessionProgress) -> bool,
    ) -> Result<SessionResult, SessionError> {
        let requests = plan.requests(&self.corpus)?;
        info!(
            "Starting session of {} trials over {} word sets",
            requests.len(),
            self.corpus.len()
        );

        let mut queue: VecDeque<TrialRequest> = requests.iter().cloned().collect();
        let mut acc = SessionAccumulator::new(requests.len());
        let mut io_failures: HashMap<usize, u32> = HashMap::new();
        let mut stop: Option<ReasonCode> = None;
        let mut pool = (self.config.workers > 0)
            .then(|| WorkerPool::spawn(self.config.workers, &self.processor));

        let mut settle = |outcome: TrialOutcome,
                          acc: &mut SessionAccumulator,
                          queue: &mut VecDeque<TrialRequest>,
                          stopping: bool| {
            match outcome {
                TrialOutcome::Scored(result) => acc.record(result),
                TrialOutcome::Skipped(skipped) if !stopping && skipped.attempt < self.config.skip_retries => {
                    warn!("Retrying trial {} after {:?}", skipped.index, skipped.reason);
                    acc.note(AuditEntry {
                        trial: skipped.index,
                        attempt: skipped.attempt,
                        action: AuditAction::Retry,
                        reason: skipped.reason,
                        message: skipped.message.clone(),
                    });
                    let retry = TrialRequest {
                        attempt: skipped.attempt + 1,
                        ..requests[skipped.index].clone()
                    };
                    queue.push_front(retry);
                }
                TrialOutcome::Skipped(skipped) => acc.skip(skipped),
            }
            if !progress(&acc.progress()) {
                abort.abort();
            }
        };

        loop {
            if let Some(pool) = pool.as_mut() {
                while let Some(outcome) = pool.try_next() {
                    settle(outcome, &mut acc, &mut queue, false);
                }
            }
            if stop.is_none() && abort.is_aborted() {
                stop = Some(ReasonCode::OperatorAbort);
            }
            if stop.is_some() {
                break;
            }

            let Some(request) = queue.pop_front() else {
                match pool.as_mut().and_then(WorkerPool::next) {
                    Some(outcome) => {
                        settle(outcome, &mut acc, &mut queue, false);
                        continue;
                    }
                    None => break,
                }
            };

            match self.runner.capture(&request, abort) {
                Ok(Some(captured)) => {
                    let inline = match pool.as_mut() {
                        Some(pool) => pool.submit(captured).err(),
                        None => Some(captured),
                    };
                    if let Some(captured) = inline {
                        settle(self.processor.process(captured), &mut acc, &mut queue, false);
                    }
                }
                Ok(None) => {
                    queue.push_front(request);
                    stop = Some(ReasonCode::OperatorAbort);
                }
                Err(e) => {
                    let failures = io_failures.entry(request.index).or_default();
                    *failures += 1;
                    let action = if *failures <= self.config.io_retries {
                        warn!("Audio I/O failed in trial {}, retrying: {e}", request.index);
                        queue.push_front(request.retry());
                        AuditAction::Retry
                    } else {
                        warn!("Audio I/O failed in trial {}, ending session: {e}", request.index);
                        queue.push_front(request.clone());
                        stop = Some(ReasonCode::AudioIo);
                        AuditAction::Abort
                    };
                    acc.note(AuditEntry {
                        trial: request.index,
                        attempt: request.attempt,
                        action,
                        reason: ReasonCode::AudioIo,
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(pool) = pool.take() {
            for outcome in pool.finish() {
                settle(outcome, &mut acc, &mut queue, true);
            }
        }

        if stop == Some(ReasonCode::OperatorAbort) {
            if let Some(next) = queue.front() {
                acc.note(AuditEntry {
                    trial: next.index,
                    attempt: next.attempt,
                    action: AuditAction::Abort,
                    reason: ReasonCode::OperatorAbort,
                    message: format!("stopped with {} trials left", queue.len()),
                });
            }
        }

        let result = acc.finalize(&self.config, stop.filter(|_| !queue.is_empty()));
        match result.overall.accuracy {
            Some(accuracy) => info!(
                "Session finished: {}/{} correct ({:.1}%), {} skipped{}",
                result.overall.correct,
                result.overall.scored,
                accuracy * 100.0,
                result.overall.skipped,
                if result.incomplete { ", incomplete" } else { "" }
            ),
            None => info!(
                "Session finished without scored trials, {} skipped{}",
                result.overall.skipped,
                if result.incomplete { ", incomplete" } else { "" }
            ),
        }
        Ok(result)
    }
}

/// Scores a stored session again from the recordings kept in `audio_dir`,
/// e.g. after changing the aligner or scorer settings.
///
/// Every trial that finished in `session` is rebuilt from its
/// `Rx<n>_<clip>.wav`. A missing or unreadable recording skips that trial
/// with [`ReasonCode::AudioIo`]. Trials the session never got to stay unrun,
/// and audit entries of the capture side (I/O failures, operator aborts) are
/// carried over.
pub fn reprocess(
    session: &SessionResult,
    audio_dir: &Path,
    corpus: Arc<WordCorpus>,
    config: &EngineConfig,
) -> Result<SessionResult, SessionError> {
    let processor = TrialProcessor::new(
        Aligner::new(config.aligner.clone()),
        Scorer::new(config.scorer.clone()),
        Arc::clone(&corpus),
    );

    let mut trials: Vec<(usize, TrialSpec, Option<SystemTime>)> = session
        .results
        .iter()
        .map(|r| {
            let spec = TrialSpec {
                word_set: r.word_set.clone(),
                target: r.target_index,
                condition: r.condition.clone(),
            };
            (r.index, spec, Some(r.timestamp))
        })
        .chain(session.skipped.iter().map(|s| (s.index, s.spec.clone(), None)))
        .collect();
    trials.sort_by_key(|(index, _, _)| *index);
    info!(
        "Reprocessing {} trials from {}",
        trials.len(),
        audio_dir.display()
    );

    let mut acc = SessionAccumulator::new(session.planned);
    for entry in session
        .audit
        .iter()
        .filter(|a| matches!(a.reason, ReasonCode::AudioIo | ReasonCode::OperatorAbort))
    {
        acc.note(entry.clone());
    }

    for (index, spec, timestamp) in trials {
        let request = TrialRequest::new(index, spec, &corpus)?;
        let path = RecordingStore::rx_path(audio_dir, index, request.clip.name());
        let (wav, samples) = match read_wav(&path) {
            Ok(wav) => wav,
            Err(e) => {
                warn!("Skipping trial {index}: cannot read {}: {e}", path.display());
                acc.skip(SkippedTrial {
                    index,
                    attempt: 0,
                    clip_name: request.clip.name().to_string(),
                    spec: request.spec,
                    reason: ReasonCode::AudioIo,
                    message: format!("cannot read {}: {e}", path.display()),
                    alignment: None,
                });
                continue;
            }
        };
        let started_at = timestamp
            .or_else(|| fs::metadata(&path).and_then(|m| m.modified()).ok())
            .unwrap_or_else(SystemTime::now);
        let recording = Recording::new(
            wav.sample_rate,
            downmix(&samples, usize::from(wav.channels)),
            started_at,
        );
        match processor.process(CapturedTrial::new(request, recording)) {
            TrialOutcome::Scored(result) => acc.record(result),
            TrialOutcome::Skipped(skipped) => acc.skip(skipped),
        }
    }

    Ok(acc.finalize(&config.session, session.abort_reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Clip, Recording};
    use crate::corpus::WordSetId;
    use crate::error::AudioIoError;
    use crate::hardware::{Hardware, NoDeviceControl, PlaybackHandle};
    use crate::simulated_channel::{ChannelConfig, SimulatedChannel, SimulatedRadio};
    use crate::sink::{read_session, ResultSink, RonSink};
    use crate::test_support::{corpus, corpus_of, padded_recording, word_clip, RATE, SET_ID};
    use std::collections::HashSet;
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::{Duration, SystemTime};

    #[derive(Debug, Clone, Copy)]
    enum Heard {
        Target,
        Word(usize),
        Nothing,
    }

    /// Returns whatever the script says the channel delivered.
    struct ScriptedAudio {
        script: VecDeque<Heard>,
        playing: Option<Clip>,
    }

    struct Done;

    impl PlaybackHandle for Done {
        fn wait(self) -> Result<(), AudioIoError> {
            Ok(())
        }
        fn stop(self) {}
    }

    impl AudioIo for ScriptedAudio {
        type Playback = Done;

        fn play(&mut self, clip: &Clip) -> Result<Done, AudioIoError> {
            self.playing = Some(clip.clone());
            Ok(Done)
        }

        fn record(&mut self, _duration: Duration) -> Result<Recording, AudioIoError> {
            let clip = self.playing.take().ok_or(AudioIoError::Interrupted)?;
            Ok(match self.script.pop_front().unwrap_or(Heard::Target) {
                Heard::Target => padded_recording(&clip, 200, 1000, 0.01),
                Heard::Word(i) => padded_recording(&word_clip(i), 200, 1000, 0.01),
                Heard::Nothing => Recording::new(RATE, vec![0.0; clip.frames() + 1200], SystemTime::now()),
            })
        }
    }

    fn engine(session: SessionConfig) -> EngineConfig {
        EngineConfig {
            session: SessionConfig {
                ptt_wait: 0.0,
                ptt_gap: 0.0,
                overplay: 0.1,
                ..session
            },
            ..EngineConfig::default()
        }
    }

    fn scripted(script: Vec<Heard>, session: SessionConfig) -> SessionAggregator<ScriptedAudio, NoDeviceControl> {
        let audio = ScriptedAudio {
            script: script.into(),
            playing: None,
        };
        SessionAggregator::new(
            Hardware::new(audio, NoDeviceControl).shared(),
            Arc::new(corpus()),
            &engine(session),
        )
        .unwrap()
    }

    fn simulated(channel: ChannelConfig, session: SessionConfig) -> SessionAggregator<SimulatedChannel, SimulatedRadio> {
        let channel = SimulatedChannel::new(channel);
        let radio = channel.radio();
        SessionAggregator::new(
            Hardware::new(channel, radio).shared(),
            Arc::new(corpus()),
            &engine(session),
        )
        .unwrap()
    }

    fn spec(target: usize, condition: Option<&str>) -> TrialSpec {
        TrialSpec {
            word_set: WordSetId::new(SET_ID),
            target,
            condition: condition.map(str::to_string),
        }
    }

    fn ten_trials(condition: impl Fn(usize) -> Option<&'static str>) -> TestPlan {
        TestPlan::new((0..10).map(|i| spec(i % 4, condition(i))).collect(), 1)
    }

    /// Trials 2 and 5 hear the wrong word, trial 8 hears nothing.
    fn seven_of_nine_script() -> Vec<Heard> {
        let mut script = vec![Heard::Target; 10];
        script[2] = Heard::Word(3);
        script[5] = Heard::Word(0);
        script[8] = Heard::Nothing;
        script
    }

    #[test]
    fn seven_correct_one_skipped() {
        let session = scripted(seven_of_nine_script(), SessionConfig::default());
        let result = session
            .run(&ten_trials(|_| None), &AbortHandle::new(), |_| true)
            .unwrap();

        assert!(!result.incomplete);
        assert_eq!(result.abort_reason, None);
        assert_eq!(result.overall.trials, 10);
        assert_eq!(result.overall.scored, 9);
        assert_eq!(result.overall.correct, 7);
        assert_eq!(result.overall.skipped, 1);
        assert_eq!(result.overall.accuracy, Some(7.0 / 9.0));
        let (lo, hi) = (result.overall.ci_lower.unwrap(), result.overall.ci_upper.unwrap());
        assert!((lo - 0.452589).abs() < 1e-5 && (hi - 0.936775).abs() < 1e-5);

        assert_eq!(result.skipped[0].index, 8);
        assert_eq!(result.skipped[0].reason, ReasonCode::NoReliableAlignment);
        assert_eq!(result.results[2].predicted_word, "tent");
        assert!(!result.results[2].correct);
        assert_eq!(result.audit.len(), 1);
        assert_eq!(result.audit[0].action, AuditAction::Skip);
    }

    #[test]
    fn workers_give_the_same_result_in_order() {
        let session = scripted(
            seven_of_nine_script(),
            SessionConfig {
                workers: 3,
                ..SessionConfig::default()
            },
        );
        let label = |i: usize| Some(if i % 2 == 0 { "near" } else { "far" });
        let result = session
            .run(&ten_trials(label), &AbortHandle::new(), |_| true)
            .unwrap();

        assert_eq!(result.overall.accuracy, Some(7.0 / 9.0));
        let indices: Vec<usize> = result.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4, 5, 6, 7, 9]);

        // even trials: 0 2 4 6 8, with 2 wrong and 8 skipped
        let near = result.condition(Some("near")).unwrap();
        assert_eq!((near.scored, near.correct, near.skipped), (4, 3, 1));
        let far = result.condition(Some("far")).unwrap();
        assert_eq!((far.scored, far.correct, far.skipped), (5, 4, 0));
        assert_eq!(result.conditions.len(), 2);
    }

    #[test]
    fn skipped_trial_is_retried() {
        let session = scripted(
            vec![Heard::Target, Heard::Nothing],
            SessionConfig {
                skip_retries: 1,
                ..SessionConfig::default()
            },
        );
        let plan = TestPlan::new(vec![spec(0, None), spec(1, None)], 2);
        let result = session.run(&plan, &AbortHandle::new(), |_| true).unwrap();

        assert_eq!(result.overall.scored, 4);
        assert_eq!(result.overall.skipped, 0);
        assert_eq!(result.audit[0].action, AuditAction::Retry);
        assert_eq!(result.audit[0].trial, 1);
        assert_eq!(result.results[1].index, 1);
    }

    #[test]
    fn operator_can_stop_between_retries() {
        let session = scripted(
            vec![Heard::Nothing; 10],
            SessionConfig {
                skip_retries: 5,
                ..SessionConfig::default()
            },
        );
        let plan = TestPlan::new(vec![spec(0, None)], 2);
        let mut calls = 0;
        let result = session
            .run(&plan, &AbortHandle::new(), |_| {
                calls += 1;
                false
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert!(result.incomplete);
        assert_eq!(result.abort_reason, Some(ReasonCode::OperatorAbort));
        let retries = result
            .audit
            .iter()
            .filter(|a| a.action == AuditAction::Retry)
            .count();
        assert_eq!(retries, 1);
        let last = result.audit.last().unwrap();
        assert_eq!((last.trial, last.attempt, last.action), (0, 1, AuditAction::Abort));
    }

    #[test]
    fn io_failure_ends_the_session() {
        let session = simulated(
            ChannelConfig {
                fail_after: Some(3),
                ..ChannelConfig::default()
            },
            SessionConfig::default(),
        );
        let plan = TestPlan::new(vec![spec(0, None), spec(1, None), spec(2, None)], 2);
        let result = session.run(&plan, &AbortHandle::new(), |_| true).unwrap();

        assert!(result.incomplete);
        assert_eq!(result.abort_reason, Some(ReasonCode::AudioIo));
        assert_eq!(result.results.len(), 3);
        assert!(result.results.iter().all(|r| r.correct));
        let last = result.audit.last().unwrap();
        assert_eq!((last.trial, last.action), (3, AuditAction::Abort));
    }

    #[test]
    fn io_failure_is_retried() {
        let session = simulated(
            ChannelConfig {
                fail_after: Some(2),
                failures: Some(1),
                ..ChannelConfig::default()
            },
            SessionConfig {
                io_retries: 1,
                ..SessionConfig::default()
            },
        );
        let plan = TestPlan::new(vec![spec(3, None)], 4);
        let result = session.run(&plan, &AbortHandle::new(), |_| true).unwrap();

        assert!(!result.incomplete);
        assert_eq!(result.results.len(), 4);
        assert_eq!(result.audit.len(), 1);
        assert_eq!(result.audit[0].action, AuditAction::Retry);
        assert_eq!(result.audit[0].reason, ReasonCode::AudioIo);
    }

    #[test]
    fn operator_abort_keeps_finished_trials() {
        let session = scripted(Vec::new(), SessionConfig::default());
        let result = session
            .run(&ten_trials(|_| None), &AbortHandle::new(), |p| p.finished < 2)
            .unwrap();

        assert!(result.incomplete);
        assert_eq!(result.abort_reason, Some(ReasonCode::OperatorAbort));
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.overall.accuracy, Some(1.0));
        assert_eq!(result.audit.last().unwrap().reason, ReasonCode::OperatorAbort);
    }

    #[test]
    fn abort_after_last_trial_is_complete() {
        let session = scripted(Vec::new(), SessionConfig::default());
        let plan = TestPlan::new(vec![spec(0, None)], 1);
        let result = session.run(&plan, &AbortHandle::new(), |_| false).unwrap();
        assert!(!result.incomplete);
        assert_eq!(result.abort_reason, None);
    }

    #[test]
    fn nothing_scored_has_no_accuracy() {
        let session = scripted(vec![Heard::Nothing; 3], SessionConfig::default());
        let plan = TestPlan::new(vec![spec(0, None)], 3);
        let result = session.run(&plan, &AbortHandle::new(), |_| true).unwrap();

        assert_eq!(result.overall.skipped, 3);
        assert_eq!(result.overall.accuracy, None);
        assert_eq!(result.overall.ci_lower, None);
        assert_eq!(result.overall.intelligibility, None);
        assert!(!result.incomplete);
    }

    #[test]
    fn dropouts_are_skipped() {
        let session = simulated(
            ChannelConfig {
                dropout: 1.0,
                ..ChannelConfig::default()
            },
            SessionConfig::default(),
        );
        let plan = TestPlan::new(vec![spec(0, None), spec(2, None)], 1);
        let result = session.run(&plan, &AbortHandle::new(), |_| true).unwrap();
        assert_eq!(result.overall.skipped, 2);
        assert!(result
            .skipped
            .iter()
            .all(|s| s.reason == ReasonCode::NoReliableAlignment));
    }

    #[test]
    fn bootstrap_interval_is_used_when_configured() {
        let session = scripted(
            seven_of_nine_script(),
            SessionConfig {
                ci: CiMethod::Bootstrap {
                    resamples: 500,
                    seed: 3,
                },
                ..SessionConfig::default()
            },
        );
        let result = session
            .run(&ten_trials(|_| None), &AbortHandle::new(), |_| true)
            .unwrap();
        let (lo, hi) = (result.overall.ci_lower.unwrap(), result.overall.ci_upper.unwrap());
        assert!(lo <= 7.0 / 9.0 && 7.0 / 9.0 <= hi);
        assert!(hi <= 1.0);
    }

    #[test]
    fn intelligibility_removes_guessing() {
        let session = scripted(seven_of_nine_script(), SessionConfig::default());
        let result = session
            .run(&ten_trials(|_| None), &AbortHandle::new(), |_| true)
            .unwrap();
        let expected = (7.0 / 9.0 - 0.25) / 0.75;
        assert!((result.overall.intelligibility.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn saves_audio_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let session = scripted(
            Vec::new(),
            SessionConfig {
                save_audio_dir: Some(dir.path().to_path_buf()),
                save_tx_audio: true,
                ..SessionConfig::default()
            },
        );
        let plan = TestPlan::new(vec![spec(1, None)], 2);
        session.run(&plan, &AbortHandle::new(), |_| true).unwrap();
        assert!(dir.path().join("Rx1_F1_b1_w2_sent.wav").exists());
        assert!(dir.path().join("Rx2_F1_b1_w2_sent.wav").exists());
        assert!(dir.path().join("Tx_F1_b1_w2_sent.wav").exists());
    }

    #[test]
    fn reprocessing_rescores_saved_audio() {
        let dir = tempfile::tempdir().unwrap();
        let session = scripted(
            seven_of_nine_script(),
            SessionConfig {
                save_audio_dir: Some(dir.path().to_path_buf()),
                ..SessionConfig::default()
            },
        );
        let label = |i: usize| Some(if i < 5 { "near" } else { "far" });
        let original = session
            .run(&ten_trials(label), &AbortHandle::new(), |_| true)
            .unwrap();
        let stored = dir.path().join("session.ron");
        RonSink::new(&stored).write_session(&original).unwrap();
        let stored = read_session(&stored).unwrap();

        let again = reprocess(&stored, dir.path(), Arc::new(corpus()), &engine(SessionConfig::default())).unwrap();
        assert_eq!(again.results, original.results);
        assert_eq!(again.skipped, original.skipped);
        assert_eq!(again.overall, original.overall);
        assert_eq!(again.conditions, original.conditions);
        assert!(!again.incomplete);

        // a threshold above any correlation refuses everything
        fs::remove_file(dir.path().join("Rx4_F1_b1_w4_tent.wav")).unwrap();
        let strict = EngineConfig {
            aligner: crate::config::AlignerConfig {
                min_confidence: 1.5,
                ..Default::default()
            },
            ..engine(SessionConfig::default())
        };
        let strict = reprocess(&stored, dir.path(), Arc::new(corpus()), &strict).unwrap();
        assert_eq!(strict.overall.scored, 0);
        assert_eq!(strict.overall.skipped, 10);
        assert_eq!(strict.skipped[3].reason, ReasonCode::AudioIo);
    }

    #[test]
    fn invalid_plans_are_rejected() {
        let session = scripted(Vec::new(), SessionConfig::default());
        assert!(matches!(
            session.run(&TestPlan::new(Vec::new(), 3), &AbortHandle::new(), |_| true),
            Err(SessionError::InvalidPlan(_))
        ));
        let unknown = TestPlan::new(
            vec![TrialSpec {
                word_set: WordSetId::new("M4_b9"),
                target: 0,
                condition: None,
            }],
            1,
        );
        assert!(matches!(
            session.run(&unknown, &AbortHandle::new(), |_| true),
            Err(SessionError::UnknownWordSet(_))
        ));
    }

    #[test]
    fn repetitions_repeat_the_whole_list() {
        let plan = TestPlan::new(vec![spec(0, None), spec(1, None)], 3);
        let targets: Vec<usize> = plan.trials().iter().map(|t| t.target).collect();
        assert_eq!(targets, [0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn randomized_plan_cycles_through_clips() {
        let corpus = corpus();
        let mut rng = StdRng::seed_from_u64(5);
        let plan = TestPlan::randomized(&corpus, 10, Some("sim".into()), &mut rng).unwrap();
        assert_eq!(plan.len(), 10);
        let mut counts = [0; 4];
        for trial in plan.trials() {
            counts[trial.target] += 1;
            assert_eq!(trial.condition.as_deref(), Some("sim"));
        }
        assert!(counts.iter().all(|&c| c == 2 || c == 3), "{counts:?}");

        assert!(TestPlan::randomized(&corpus, 0, None, &mut rng).is_err());
        assert!(TestPlan::randomized(&corpus, 1201, None, &mut rng).is_err());
    }

    const FOUR_SETS: [&str; 4] = ["F1_b1", "F1_b2", "M3_b1", "M3_b2"];

    #[test]
    fn short_randomized_plans_reach_every_set() {
        let corpus = corpus_of(&FOUR_SETS);
        let mut drawn = HashSet::new();
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = TestPlan::randomized(&corpus, 4, None, &mut rng).unwrap();
            drawn.extend(plan.trials().iter().map(|t| t.word_set.to_string()));
        }
        let expected: HashSet<String> = FOUR_SETS.iter().map(|s| s.to_string()).collect();
        assert_eq!(drawn, expected);
    }

    #[test]
    fn randomized_plan_uses_every_clip_before_repeating() {
        let corpus = corpus_of(&FOUR_SETS);
        let clips = corpus.clip_count();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = TestPlan::randomized(&corpus, clips + 4, None, &mut rng).unwrap();
            let first_pass: HashSet<(String, usize)> = plan.trials()[..clips]
                .iter()
                .map(|t| (t.word_set.to_string(), t.target))
                .collect();
            assert_eq!(first_pass.len(), clips);
        }
    }
}
