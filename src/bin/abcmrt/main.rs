//! Runs ABC-MRT measurements from the command line.
//!
//! ```text
//! abcmrt --audio clips simulate -n 120 --noise 0.05 --out run1.ron --csv run1.csv
//! abcmrt --audio clips score --word-set F1_b39 --word 4 --recording rx.wav
//! abcmrt --audio clips reprocess --session run1.ron --recordings audio --out run1b.ron
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use abcmrt::{
    aligner::Aligner,
    args::{AbcMrtArgs, CommandTask, ReprocessCommand, ScoreCommand, SimulateCommand},
    audio::{downmix, read_wav, Recording},
    config::EngineConfig,
    corpus::{WordCorpus, WordSetId},
    corpus_loader::DirectoryLoader,
    hardware::Hardware,
    scorer::Scorer,
    session::{reprocess, SessionAggregator, SessionResult, TestPlan},
    simulated_channel::SimulatedChannel,
    sink::{read_session, CsvSink, ResultSink, RonSink},
    trial::{AbortHandle, CapturedTrial, TrialOutcome, TrialProcessor, TrialRequest, TrialSpec},
};
use clap::Parser;
use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = AbcMrtArgs::parse();
    let config = args.engine_config()?;

    let loader = if args.talkers.is_empty() {
        DirectoryLoader::new()
    } else {
        DirectoryLoader::with_talkers(args.talkers.clone())
    };
    let corpus = Arc::new(WordCorpus::load(&loader, &args.corpus)?);
    info!(
        "Loaded {} word sets ({} clips) from {}",
        corpus.len(),
        corpus.clip_count(),
        args.corpus.display()
    );

    match &args.command {
        CommandTask::Simulate(sim) => simulate(sim, corpus, &config),
        CommandTask::Score(score) => score_recording(score, corpus, &config),
        CommandTask::Reprocess(cmd) => reprocess_session(cmd, corpus, &config),
    }
}

fn simulate(
    sim: &SimulateCommand,
    corpus: Arc<WordCorpus>,
    config: &EngineConfig,
) -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(sim.seed);
    let plan = TestPlan::randomized(&corpus, sim.trials, sim.condition.clone(), &mut rng)?;

    let channel = SimulatedChannel::new(sim.channel()?);
    let radio = channel.radio();
    let hardware = Hardware::new(channel, radio).shared();
    let aggregator = SessionAggregator::new(hardware, corpus, config)?;

    let result = aggregator.run(&plan, &AbortHandle::new(), |p| {
        info!(
            "{}/{} trials, {} correct of {} scored, {} skipped",
            p.finished, p.planned, p.correct, p.scored, p.skipped
        );
        true
    })?;

    report(&result, &sim.outfile, &sim.csv)
}

fn reprocess_session(
    cmd: &ReprocessCommand,
    corpus: Arc<WordCorpus>,
    config: &EngineConfig,
) -> Result<(), Box<dyn Error>> {
    let stored = read_session(&cmd.session)?;
    let result = reprocess(&stored, &cmd.recordings, corpus, config)?;
    let (before, after) = (stored.overall.correct, result.overall.correct);
    if before != after {
        info!("Correct trials changed from {before} to {after}");
    }
    report(&result, &cmd.outfile, &cmd.csv)
}

/// Prints the overall score and writes the requested outputs.
fn report(
    result: &SessionResult,
    outfile: &Option<PathBuf>,
    csv: &Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    if result.incomplete {
        warn!("Session ended early: {:?}", result.abort_reason);
    }
    let overall = &result.overall;
    match (overall.accuracy, overall.ci_lower, overall.ci_upper) {
        (Some(acc), Some(lo), Some(hi)) => println!(
            "{} of {} correct, accuracy {:.3} [{:.3}, {:.3}], intelligibility {:.3}",
            overall.correct,
            overall.scored,
            acc,
            lo,
            hi,
            overall.intelligibility.unwrap_or_default()
        ),
        _ => println!("No trial could be scored, {} skipped", overall.skipped),
    }

    if let Some(path) = outfile {
        RonSink::new(path).write_session(result)?;
        info!("Wrote {}", path.display());
    }
    if let Some(path) = csv {
        let mut sink = CsvSink::new(path);
        sink.write_session(result)?;
        info!("Wrote {} and {}", path.display(), sink.summary_path().display());
    }
    Ok(())
}

fn score_recording(
    score: &ScoreCommand,
    corpus: Arc<WordCorpus>,
    config: &EngineConfig,
) -> Result<(), Box<dyn Error>> {
    if score.word == 0 {
        return Err("words are numbered from 1".into());
    }
    let spec = TrialSpec {
        word_set: WordSetId::new(score.word_set.as_str()),
        target: score.word - 1,
        condition: None,
    };
    let request = TrialRequest::new(0, spec, &corpus)?;

    let (wav, samples) = read_wav(&score.recording)?;
    let samples = downmix(&samples, wav.channels as usize);
    let recording = Recording::new(wav.sample_rate, samples, SystemTime::now());

    let processor = TrialProcessor::new(
        Aligner::new(config.aligner.clone()),
        Scorer::new(config.scorer.clone()),
        corpus,
    );
    match processor.process(CapturedTrial::new(request, recording)) {
        TrialOutcome::Scored(result) => {
            println!(
                "heard \"{}\", played \"{}\" ({}), offset {} samples, confidence {:.3}",
                result.predicted_word,
                result.target_word,
                if result.correct { "correct" } else { "wrong" },
                result.alignment.offset,
                result.alignment.confidence
            );
            for candidate in &result.scores {
                println!(
                    "  {:<12} distance {:>8.3}  likelihood {:.3}",
                    candidate.word, candidate.distance, candidate.likelihood
                );
            }
        }
        TrialOutcome::Skipped(skipped) => {
            println!("not scored ({:?}): {}", skipped.reason, skipped.message);
        }
    }
    Ok(())
}
