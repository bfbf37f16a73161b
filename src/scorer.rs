//! ABC_MRT scoring: decides which word of a [`WordSet`] an aligned
//! recording sounds most like.
//!
//! The segment and every candidate are turned into level-normalized Bark
//! spectrograms with the same [`BarkAnalyzer`]. For each candidate the RMS
//! band difference is taken frame by frame over the frames both cover (or
//! just the keyword window, when the set has one) and averaged into a single
//! distance. The closest candidate is the predicted word. Distances are
//! turned into likelihoods by normalizing their inverses.

use serde::{Deserialize, Serialize};

use crate::config::ScorerConfig;
use crate::corpus::WordSet;
use crate::error::ScoringError;
use crate::spectral::{BarkAnalyzer, BarkSpectrogram};

/// How one candidate compared against the segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Index of the candidate in its word set
    pub index: usize,
    /// The candidate word
    pub word: String,
    /// Mean per-frame Bark spectral distance, in dB
    pub distance: f64,
    /// Share of the inverse distances, all candidates sum to 1
    pub likelihood: f64,
}

/// Every candidate of a word set, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    ranked: Vec<CandidateScore>,
}

impl ScoreReport {
    /// The predicted word.
    pub fn best(&self) -> &CandidateScore {
        // a report is never built without candidates
        &self.ranked[0]
    }

    /// All candidates, closest first.
    pub fn ranked(&self) -> &[CandidateScore] {
        &self.ranked
    }

    /// Candidates in word set order.
    pub fn in_set_order(&self) -> Vec<CandidateScore> {
        let mut scores = self.ranked.clone();
        scores.sort_by_key(|s| s.index);
        scores
    }
}

/// Bark-scale spectral comparison scorer.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScorerConfig,
}

impl Scorer {
    /// Creates a scorer.
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Ranks every candidate of `word_set` against the aligned mono
    /// `segment`.
    pub fn score(
        &self,
        segment: &[f32],
        sample_rate: u32,
        word_set: &WordSet,
    ) -> Result<ScoreReport, ScoringError> {
        word_set.validate()?;
        if sample_rate != word_set.sample_rate() {
            return Err(ScoringError::SampleRateMismatch {
                word_set: word_set.sample_rate(),
                segment: sample_rate,
            });
        }

        let shortest = word_set.clips().iter().map(|c| c.frames()).min().unwrap_or(0);
        if segment.len() < shortest {
            return Err(ScoringError::SegmentTooShort {
                segment: segment.len(),
                shortest,
            });
        }

        let analyzer = BarkAnalyzer::new(&self.config, sample_rate);
        if analyzer.band_count() == 0 {
            return Err(ScoringError::MalformedWordSet {
                word_set: word_set.id().to_string(),
                reason: format!("no Bark bands at {sample_rate} Hz"),
            });
        }

        let keyword_frames = word_set
            .keyword_window()
            .map(|w| analyzer.frame_of(w.start)..analyzer.frame_of(w.end + analyzer.hop() - 1));
        let heard = analyzer.analyze(segment).level_normalized();

        let distances: Vec<f64> = word_set
            .clips()
            .iter()
            .map(|clip| {
                let candidate = analyzer.analyze(&clip.mono()).level_normalized();
                let common = heard.frames().min(candidate.frames());
                let frames = match &keyword_frames {
                    Some(k) if k.start.min(common) < k.end.min(common) => {
                        k.start.min(common)..k.end.min(common)
                    }
                    _ => 0..common,
                };
                spectral_distance(&heard, &candidate, frames)
            })
            .collect();

        let floor = self.config.distance_floor;
        let inverse: Vec<f64> = distances.iter().map(|d| 1.0 / d.max(floor)).collect();
        let total: f64 = inverse.iter().sum();

        let mut ranked: Vec<CandidateScore> = word_set
            .words()
            .iter()
            .zip(distances.iter().zip(&inverse))
            .enumerate()
            .map(|(index, (word, (&distance, &inv)))| CandidateScore {
                index,
                word: word.clone(),
                distance,
                likelihood: inv / total,
            })
            .collect();
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));

        Ok(ScoreReport { ranked })
    }
}

/// Mean over `frames` of the RMS band difference between two spectrograms.
fn spectral_distance(a: &BarkSpectrogram, b: &BarkSpectrogram, frames: std::ops::Range<usize>) -> f64 {
    let count = frames.len();
    if count == 0 {
        return f64::INFINITY;
    }
    let bands = a.bands() as f64;
    frames
        .map(|t| {
            let sq: f64 = a
                .frame(t)
                .iter()
                .zip(b.frame(t))
                .map(|(x, y)| {
                    let d = (*x - *y) as f64;
                    d * d
                })
                .sum();
            (sq / bands).sqrt()
        })
        .sum::<f64>()
        / count as f64
}
