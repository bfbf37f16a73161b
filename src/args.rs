// Commandline argument parser using clap for abcmrt

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::simulated_channel::ChannelConfig;

/// Arguments of the abcmrt binary
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct AbcMrtArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform, a simulated session or scoring a recording
    pub command: CommandTask,

    /// RON file with engine settings; anything left out keeps its default
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory of clips named <talker>_b<batch>_w<word>_<text>.wav
    #[arg(short = 'a', long = "audio", global = true, default_value = "clips")]
    pub corpus: PathBuf,

    /// Only load clips spoken by these talkers, e.g. F1 M3
    #[arg(short = 't', long = "talkers", global = true)]
    #[clap(num_args = 1..)]
    pub talkers: Vec<String>,
}

impl AbcMrtArgs {
    /// Reads the configuration file if one was given and applies the
    /// overrides of the chosen command.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_path(path)?,
            None => EngineConfig::default(),
        };
        if let CommandTask::Simulate(sim) = &self.command {
            let session = &mut config.session;
            if let Some(v) = sim.ptt_wait {
                session.ptt_wait = v;
            }
            if let Some(v) = sim.ptt_gap {
                session.ptt_gap = v;
            }
            if let Some(v) = sim.workers {
                session.workers = v;
            }
            if let Some(dir) = &sim.save_audio {
                session.save_audio_dir = Some(dir.clone());
            }
            session.save_tx_audio |= sim.save_tx;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Tasks abcmrt can run
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Run a session over a simulated radio channel
    #[command(about)]
    Simulate(SimulateCommand),

    /// Score a recording of one clip against its word set
    #[command(about)]
    Score(ScoreCommand),

    /// Score a stored session again from its saved recordings
    #[command(about)]
    Reprocess(ReprocessCommand),
}

/// Options of `abcmrt simulate`
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct SimulateCommand {
    /// Number of trials to run
    #[arg(short = 'n', long = "trials", default_value_t = 100)]
    pub trials: usize,

    /// Seed for trial order and channel impairments
    #[arg(short = 's', long = "seed", default_value_t = 0)]
    pub seed: u64,

    /// Condition label attached to every trial
    #[arg(long = "condition")]
    pub condition: Option<String>,

    /// Mouth-to-ear latency of the channel, in seconds
    #[arg(long = "latency", default_value_t = 0.05)]
    pub latency: f64,

    /// Linear gain of the channel
    #[arg(long = "gain", default_value_t = 1.0)]
    pub gain: f32,

    /// Amplitude of uniform noise added by the channel
    #[arg(long = "noise", default_value_t = 0.0)]
    pub noise: f32,

    /// Probability that a trial's audio is lost
    #[arg(long = "dropout", default_value_t = 0.0)]
    pub dropout: f64,

    /// Seconds between keying and playback
    #[arg(long = "ptt-wait")]
    pub ptt_wait: Option<f64>,

    /// Seconds to wait after un-keying
    #[arg(long = "ptt-gap")]
    pub ptt_gap: Option<f64>,

    /// Threads for alignment and scoring, 0 scores inline
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Keep received audio in this directory
    #[arg(long = "save-audio")]
    pub save_audio: Option<PathBuf>,

    /// Also keep the transmitted clips
    #[arg(long = "save-tx")]
    pub save_tx: bool,

    /// Write the session as RON here
    #[arg(short = 'o', long = "out")]
    pub outfile: Option<PathBuf>,

    /// Write per-trial and summary CSV files here
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,
}

impl SimulateCommand {
    /// Channel impairments requested on the command line.
    pub fn channel(&self) -> Result<ChannelConfig, ConfigError> {
        let channel = ChannelConfig {
            latency: self.latency,
            gain: self.gain,
            noise: self.noise,
            dropout: self.dropout,
            seed: self.seed,
            ..ChannelConfig::default()
        };
        channel.validate()?;
        Ok(channel)
    }
}

/// Options of `abcmrt score`
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ScoreCommand {
    /// Word set the clip belongs to, e.g. F1_b39
    #[arg(short = 'b', long = "word-set")]
    pub word_set: String,

    /// 1-based number of the word that was played
    #[arg(short = 'w', long = "word")]
    pub word: usize,

    /// WAV file holding the channel's output
    #[arg(short = 'r', long = "recording")]
    pub recording: PathBuf,
}

/// Options of `abcmrt reprocess`
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ReprocessCommand {
    /// Session written by `simulate --out`
    #[arg(short = 'i', long = "session")]
    pub session: PathBuf,

    /// Directory holding the session's Rx<n>_<clip>.wav files
    #[arg(short = 'r', long = "recordings")]
    pub recordings: PathBuf,

    /// Write the rescored session as RON here
    #[arg(short = 'o', long = "out")]
    pub outfile: Option<PathBuf>,

    /// Write per-trial and summary CSV files here
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,
}
