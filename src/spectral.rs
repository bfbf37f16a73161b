//! Short-time Bark-band spectra. Audio is cut into Hann windowed frames,
//! each frame's power spectrum is summed into critical bands on the Bark
//! scale, floored and compressed to decibels.

use std::ops::Range;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::config::ScorerConfig;

/// Converts a frequency to Bark using Traunmüller's approximation.
pub fn hz_to_bark(hz: f64) -> f64 {
    26.81 * hz / (1960.0 + hz) - 0.53
}

fn hann_window(n: usize) -> Vec<f32> {
    let n_f = n as f64;
    (0..n)
        .map(|i| (0.5 - 0.5 * ((2.0 * std::f64::consts::PI * i as f64) / n_f).cos()) as f32)
        .collect()
}

/// Groups FFT bins into contiguous runs that fall into the same integer Bark
/// band, keeping only bins between `min_hz` and `max_hz`.
fn bark_bands(fft_len: usize, sample_rate: u32, min_hz: f64, max_hz: f64) -> Vec<Range<usize>> {
    let bin_hz = sample_rate as f64 / fft_len as f64;
    let nyquist = sample_rate as f64 / 2.0;
    let max_hz = max_hz.min(nyquist);

    let mut bands: Vec<(i64, Range<usize>)> = Vec::new();
    for bin in 0..=fft_len / 2 {
        let hz = bin as f64 * bin_hz;
        if hz < min_hz || hz > max_hz {
            continue;
        }
        let band = hz_to_bark(hz).floor() as i64;
        match bands.last_mut() {
            Some((last, range)) if *last == band && range.end == bin => range.end = bin + 1,
            _ => bands.push((band, bin..bin + 1)),
        }
    }
    bands.into_iter().map(|(_, range)| range).collect()
}

/// A frames × bands matrix of band levels in dB, stored frame by frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BarkSpectrogram {
    bands: usize,
    data: Vec<f32>,
}

impl BarkSpectrogram {
    /// Number of frames.
    pub fn frames(&self) -> usize {
        if self.bands == 0 {
            0
        } else {
            self.data.len() / self.bands
        }
    }

    /// Number of Bark bands per frame.
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Band levels of frame `t`.
    pub fn frame(&self, t: usize) -> &[f32] {
        &self.data[t * self.bands..(t + 1) * self.bands]
    }

    /// Subtracts the mean level so that representations captured at
    /// different channel gains can be compared.
    pub fn level_normalized(mut self) -> Self {
        if self.data.is_empty() {
            return self;
        }
        let mean = self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64;
        for v in self.data.iter_mut() {
            *v = (*v as f64 - mean) as f32;
        }
        self
    }
}

/// Computes [`BarkSpectrogram`]s for one sample rate and analysis setup.
/// Every clip of a word set goes through the same analyzer so frames line
/// up between candidates.
pub struct BarkAnalyzer {
    window: Vec<f32>,
    hop: usize,
    floor: f32,
    bands: Vec<Range<usize>>,
    fft: Arc<dyn Fft<f32>>,
}

impl BarkAnalyzer {
    /// Plans the FFT and the band layout for `sample_rate`.
    pub fn new(config: &ScorerConfig, sample_rate: u32) -> Self {
        let window_len = config.window_len.max(2);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            window: hann_window(window_len),
            hop: config.hop_len.max(1),
            floor: config.power_floor,
            bands: bark_bands(
                window_len,
                sample_rate,
                config.min_frequency_hz,
                config.max_frequency_hz,
            ),
            fft: planner.plan_fft_forward(window_len),
        }
    }

    /// Number of Bark bands produced per frame.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Samples per analysis frame.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Samples between frame starts.
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Frames produced for `len` samples. Anything shorter than one window
    /// is zero padded to a single frame.
    pub fn frame_count(&self, len: usize) -> usize {
        if len <= self.window.len() {
            1
        } else {
            1 + (len - self.window.len()) / self.hop
        }
    }

    /// Frame index containing sample `sample`.
    pub fn frame_of(&self, sample: usize) -> usize {
        sample / self.hop
    }

    /// Analyzes mono `samples`.
    pub fn analyze(&self, samples: &[f32]) -> BarkSpectrogram {
        let n = self.window.len();
        let frames = self.frame_count(samples.len());
        let mut data = Vec::with_capacity(frames * self.bands.len());
        let mut buf = vec![Complex { re: 0.0f32, im: 0.0 }; n];
        let mut power = vec![0.0f32; n / 2 + 1];

        for t in 0..frames {
            let start = t * self.hop;
            for (i, (out, win)) in buf.iter_mut().zip(&self.window).enumerate() {
                out.re = samples.get(start + i).copied().unwrap_or(0.0) * win;
                out.im = 0.0;
            }

            self.fft.process(&mut buf);

            for (p, c) in power.iter_mut().zip(&buf) {
                *p = c.norm_sqr();
            }

            for band in &self.bands {
                let energy: f32 = power[band.clone()].iter().sum();
                data.push(10.0 * energy.max(self.floor).log10());
            }
        }

        BarkSpectrogram {
            bands: self.bands.len(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f32::consts::PI;

    fn config() -> ScorerConfig {
        ScorerConfig {
            window_len: 256,
            hop_len: 128,
            ..ScorerConfig::default()
        }
    }

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn bark_scale_reference_points() {
        assert!(hz_to_bark(0.0) < 0.0);
        assert!((hz_to_bark(1000.0) - 8.5).abs() < 0.1);
        assert!(hz_to_bark(4000.0) > hz_to_bark(2000.0));
    }

    #[test]
    fn bands_are_contiguous_and_ordered() {
        let bands = bark_bands(512, 16000, 100.0, 8000.0);
        assert!(!bands.is_empty());
        for pair in bands.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        // 100 Hz is bin 3.2, so bin 4 is the first one kept
        assert_eq!(bands[0].start, 4);
        assert_eq!(bands.last().unwrap().end, 257);
    }

    #[test]
    fn frame_count() {
        let analyzer = BarkAnalyzer::new(&config(), 16000);
        assert_eq!(analyzer.frame_count(0), 1);
        assert_eq!(analyzer.frame_count(256), 1);
        assert_eq!(analyzer.frame_count(384), 2);
        assert_eq!(analyzer.frame_count(1000), 6);
        assert_eq!(analyzer.analyze(&vec![0.0; 1000]).frames(), 6);
    }

    #[test]
    fn silence_is_floored() {
        let cfg = config();
        let analyzer = BarkAnalyzer::new(&cfg, 16000);
        let spec = analyzer.analyze(&vec![0.0; 512]);
        let floor_db = 10.0 * cfg.power_floor.log10();
        assert!(spec.frame(0).iter().all(|&v| v == floor_db));
    }

    #[test]
    fn tone_energy_lands_in_its_band() {
        let analyzer = BarkAnalyzer::new(&config(), 16000);
        let spec = analyzer.analyze(&tone(1000.0, 16000, 1024));
        let frame = spec.frame(1);
        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let band = &analyzer.bands[loudest];
        let lo = band.start as f64 * 16000.0 / 256.0;
        let hi = band.end as f64 * 16000.0 / 256.0;
        assert!(lo <= 1000.0 && 1000.0 <= hi, "{lo}..{hi}");
    }

    #[test]
    fn level_normalization_removes_gain() {
        let analyzer = BarkAnalyzer::new(&config(), 16000);
        let mut rng = StdRng::seed_from_u64(7);
        let quiet: Vec<f32> = (0..1024).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let loud: Vec<f32> = quiet.iter().map(|v| v * 4.0).collect();
        let a = analyzer.analyze(&quiet).level_normalized();
        let b = analyzer.analyze(&loud).level_normalized();
        for t in 0..a.frames() {
            for (x, y) in a.frame(t).iter().zip(b.frame(t)) {
                assert!((x - y).abs() < 1e-2, "{x} vs {y}");
            }
        }
    }
}
