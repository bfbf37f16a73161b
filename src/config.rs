//! Engine configuration. Every knob has a default, and the whole thing can
//! be read from a RON file where any field may be left out:
//!
//! ```text
//! (
//!     aligner: (min_confidence: 0.4),
//!     session: (ptt_wait: 0.5, workers: 4, ci: Bootstrap(resamples: 2000, seed: 7)),
//! )
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings of the [`Aligner`](crate::aligner::Aligner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    /// Samples per energy envelope frame; this is the coarse resolution of
    /// the offset search.
    pub envelope_hop: usize,
    /// Minimum peak envelope correlation accepted as an alignment.
    pub min_confidence: f64,
    /// Correlations this close to the peak count as ties.
    pub tie_epsilon: f64,
    /// Refine the coarse offset to single samples with a waveform
    /// correlation around it.
    pub refine: bool,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            envelope_hop: 32,
            min_confidence: 0.3,
            tie_epsilon: 1e-6,
            refine: true,
        }
    }
}

/// Settings of the [`Scorer`](crate::scorer::Scorer). Shared by every
/// candidate of a word set so that spectra are compared frame for frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// FFT window length in samples.
    pub window_len: usize,
    /// Samples between analysis frames.
    pub hop_len: usize,
    /// Lowest frequency included in the Bark bands.
    pub min_frequency_hz: f64,
    /// Highest frequency included in the Bark bands, clamped to Nyquist.
    pub max_frequency_hz: f64,
    /// Band power floor applied before the logarithm.
    pub power_floor: f32,
    /// Smallest distance used when turning distances into likelihoods.
    pub distance_floor: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            window_len: 512,
            hop_len: 256,
            min_frequency_hz: 100.0,
            max_frequency_hz: 8000.0,
            power_floor: 1e-10,
            distance_floor: 1e-6,
        }
    }
}

/// How the session's confidence interval is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CiMethod {
    /// Wilson score interval for a binomial proportion.
    Wilson,
    /// Percentile bootstrap over trial outcomes.
    Bootstrap {
        /// Number of resamples
        resamples: usize,
        /// Seed for the resampling generator
        seed: u64,
    },
}

/// Settings of the [`SessionAggregator`](crate::session::SessionAggregator)
/// and the trial timing it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds between keying the radio and starting playback.
    pub ptt_wait: f64,
    /// Seconds to pause after un-keying, before the next trial.
    pub ptt_gap: f64,
    /// Extra seconds recorded after the clip to catch channel delay.
    pub overplay: f64,
    /// Threads for alignment and scoring; 0 processes inline.
    pub workers: usize,
    /// Times a trial is re-issued after an audio I/O error before the
    /// session is aborted.
    pub io_retries: u32,
    /// Times a trial is re-issued after it was skipped.
    pub skip_retries: u32,
    /// Confidence interval method.
    pub ci: CiMethod,
    /// Confidence level of the interval.
    pub confidence_level: f64,
    /// Where to keep recordings; they are discarded when unset.
    pub save_audio_dir: Option<PathBuf>,
    /// Also write the transmitted clips next to the recordings.
    pub save_tx_audio: bool,
}

impl SessionConfig {
    /// [`SessionConfig::ptt_wait`] as a duration.
    pub fn ptt_wait(&self) -> Duration {
        seconds(self.ptt_wait)
    }

    /// [`SessionConfig::ptt_gap`] as a duration.
    pub fn ptt_gap(&self) -> Duration {
        seconds(self.ptt_gap)
    }

    /// [`SessionConfig::overplay`] as a duration.
    pub fn overplay(&self) -> Duration {
        seconds(self.overplay)
    }
}

/// Converts validated seconds to a duration; values that cannot be one
/// become zero instead of panicking.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ptt_wait: 0.68,
            ptt_gap: 3.1,
            overplay: 1.0,
            workers: 1,
            io_retries: 0,
            skip_retries: 0,
            ci: CiMethod::Wilson,
            confidence_level: 0.95,
            save_audio_dir: None,
            save_tx_audio: false,
        }
    }
}

/// Everything the engine can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Alignment settings
    pub aligner: AlignerConfig,
    /// Scoring settings
    pub scorer: ScorerConfig,
    /// Session settings
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Reads and validates a RON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Parses and validates a RON configuration string.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.aligner.envelope_hop == 0 {
            return invalid("aligner.envelope_hop must be positive");
        }
        if !(-1.0..=1.0).contains(&self.aligner.min_confidence) {
            return invalid("aligner.min_confidence must be within [-1, 1]");
        }
        if self.scorer.window_len < 2 || self.scorer.hop_len == 0 {
            return invalid("scorer.window_len must be at least 2 and scorer.hop_len positive");
        }
        if self.scorer.min_frequency_hz >= self.scorer.max_frequency_hz {
            return invalid("scorer.min_frequency_hz must be below scorer.max_frequency_hz");
        }
        if self.scorer.power_floor <= 0.0 || self.scorer.distance_floor <= 0.0 {
            return invalid("scorer floors must be positive");
        }
        if !(self.session.confidence_level > 0.0 && self.session.confidence_level < 1.0) {
            return invalid("session.confidence_level must be within (0, 1)");
        }
        let timings = [
            ("session.ptt_wait", self.session.ptt_wait),
            ("session.ptt_gap", self.session.ptt_gap),
            ("session.overplay", self.session.overplay),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, v)| !(v.is_finite() && *v >= 0.0)) {
            return Err(ConfigError::Invalid(format!(
                "{name} must be a finite number of seconds, at least 0"
            )));
        }
        if let CiMethod::Bootstrap { resamples: 0, .. } = self.session.ci {
            return invalid("session.ci bootstrap needs at least one resample");
        }
        Ok(())
    }
}
