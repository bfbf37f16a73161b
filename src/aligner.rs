//! Locates a played clip inside the audio recorded from the channel.
//!
//! Both signals are reduced to RMS envelopes over frames of
//! [`AlignerConfig::envelope_hop`] samples, and the clip's envelope is slid
//! over the recording's computing a Pearson correlation at every lag. The
//! peak gives the coarse offset and the confidence. The offset is then
//! optionally refined to the sample with a waveform correlation limited to
//! one frame either side of the coarse estimate. Clips shorter than a frame
//! skip the envelope and are correlated on the waveform alone.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::audio::{Clip, Recording};
use crate::config::AlignerConfig;
use crate::error::AlignmentError;

/// Where a clip starts inside a recording and how well it matched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// First sample of the clip's content in the recording
    pub offset: usize,
    /// Peak envelope correlation, within [-1, 1]
    pub confidence: f64,
}

/// Cross-correlation aligner. Holds nothing but its configuration, so one
/// instance can be shared freely between threads.
#[derive(Debug, Clone, Default)]
pub struct Aligner {
    config: AlignerConfig,
}

impl Aligner {
    /// Creates an aligner.
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    /// Finds `clip` in `recording`.
    pub fn align(&self, clip: &Clip, recording: &Recording) -> Result<AlignmentResult, AlignmentError> {
        if clip.sample_rate() != recording.sample_rate() {
            return Err(AlignmentError::SampleRateMismatch {
                clip: clip.sample_rate(),
                recording: recording.sample_rate(),
            });
        }

        let reference = clip.mono();
        let signal = recording.samples();
        if signal.len() < reference.len() || reference.is_empty() {
            return Err(AlignmentError::InsufficientAudio {
                recorded: signal.len(),
                required: reference.len().max(1),
            });
        }
        let hop = self.config.envelope_hop.max(1);
        if reference.len() < hop {
            return self.align_waveform(clip, &reference, signal);
        }

        let ref_env = envelope(&reference, hop);
        let sig_env = envelope(signal, hop);
        let correlations = correlate(&ref_env, &sig_env);
        let (lag, confidence) =
            earliest_peak(&correlations, self.config.tie_epsilon).unwrap_or((0, 0.0));

        if confidence < self.config.min_confidence {
            return Err(AlignmentError::NoReliableAlignment {
                confidence,
                threshold: self.config.min_confidence,
            });
        }

        let max_offset = signal.len() - reference.len();
        let coarse = (lag * hop).min(max_offset);
        let offset = if self.config.refine {
            self.refine(&reference, signal, coarse, hop, max_offset)
        } else {
            coarse
        };

        debug!("Aligned {} at sample {offset} (coarse {coarse}), confidence {confidence:.3}", clip.name());
        Ok(AlignmentResult { offset, confidence })
    }

    /// Clips shorter than one envelope frame are correlated sample by
    /// sample instead.
    fn align_waveform(
        &self,
        clip: &Clip,
        reference: &[f32],
        signal: &[f32],
    ) -> Result<AlignmentResult, AlignmentError> {
        let reference: Vec<f64> = reference.iter().map(|&v| v as f64).collect();
        let signal: Vec<f64> = signal.iter().map(|&v| v as f64).collect();
        let correlations = correlate(&reference, &signal);
        let (offset, confidence) =
            earliest_peak(&correlations, self.config.tie_epsilon).unwrap_or((0, 0.0));
        if confidence < self.config.min_confidence {
            return Err(AlignmentError::NoReliableAlignment {
                confidence,
                threshold: self.config.min_confidence,
            });
        }
        debug!("Aligned short clip {} at sample {offset}, confidence {confidence:.3}", clip.name());
        Ok(AlignmentResult { offset, confidence })
    }

    fn refine(&self, reference: &[f32], signal: &[f32], coarse: usize, hop: usize, max_offset: usize) -> usize {
        let lo = coarse.saturating_sub(hop);
        let hi = (coarse + hop).min(max_offset);
        let reference: Vec<f64> = reference.iter().map(|&v| v as f64).collect();
        let signal: Vec<f64> = signal[lo..hi + reference.len()].iter().map(|&v| v as f64).collect();
        let correlations = correlate(&reference, &signal);
        match earliest_peak(&correlations, self.config.tie_epsilon) {
            Some((lag, peak)) if peak > 0.0 => lo + lag,
            _ => coarse,
        }
    }
}

/// RMS of each complete `hop` sized frame.
fn envelope(samples: &[f32], hop: usize) -> Vec<f64> {
    samples
        .chunks_exact(hop)
        .map(|frame| (frame.iter().map(|&v| v as f64 * v as f64).sum::<f64>() / hop as f64).sqrt())
        .collect()
}

/// Pearson correlation of `reference` against every window of `signal`, one
/// value per lag from 0 to `signal.len() - reference.len()`. Windows or
/// references without variance correlate as 0.
fn correlate(reference: &[f64], signal: &[f64]) -> Vec<f64> {
    let m = reference.len();
    if m == 0 || signal.len() < m {
        return Vec::new();
    }

    let mean = reference.iter().sum::<f64>() / m as f64;
    let centered: Vec<f64> = reference.iter().map(|v| v - mean).collect();
    let ref_norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();

    let mut sum = vec![0.0; signal.len() + 1];
    let mut sum_sq = vec![0.0; signal.len() + 1];
    for (i, &v) in signal.iter().enumerate() {
        sum[i + 1] = sum[i] + v;
        sum_sq[i + 1] = sum_sq[i] + v * v;
    }

    (0..=signal.len() - m)
        .map(|lag| {
            let s = sum[lag + m] - sum[lag];
            let s2 = sum_sq[lag + m] - sum_sq[lag];
            let var = s2 - s * s / m as f64;
            if ref_norm == 0.0 || var <= s2 * 1e-12 || var <= 0.0 {
                return 0.0;
            }
            let num: f64 = centered
                .iter()
                .zip(&signal[lag..lag + m])
                .map(|(r, x)| r * x)
                .sum();
            (num / (ref_norm * var.sqrt())).clamp(-1.0, 1.0)
        })
        .collect()
}

/// The first lag whose correlation is within `epsilon` of the maximum.
fn earliest_peak(correlations: &[f64], epsilon: f64) -> Option<(usize, f64)> {
    let max = correlations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    correlations
        .iter()
        .position(|&c| c >= max - epsilon)
        .map(|lag| (lag, correlations[lag]))
}
