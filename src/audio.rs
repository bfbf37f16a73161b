//! Audio buffers that flow through a trial: the reference [`Clip`]s that get
//! played and the [`Recording`]s that come back, plus the hound helpers used
//! to move them in and out of WAV files.

use std::borrow::Cow;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::corpus::WordSetId;

/// A rendered reference sentence for one word of a word set. Clips are loaded
/// once and shared; cloning one only bumps a reference count.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    name: String,
    sample_rate: u32,
    channels: u16,
    samples: Arc<[f32]>,
    word_set: WordSetId,
    word_index: usize,
}

impl Clip {
    /// Wraps interleaved `samples` as a clip of word `word_index` of
    /// `word_set`.
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        channels: u16,
        samples: Vec<f32>,
        word_set: WordSetId,
        word_index: usize,
    ) -> Self {
        Self {
            name: name.into(),
            sample_rate,
            channels: channels.max(1),
            samples: samples.into(),
            word_set,
            word_index,
        }
    }

    /// Reads a clip from a WAV file.
    pub fn from_wav(
        path: impl AsRef<Path>,
        word_set: WordSetId,
        word_index: usize,
    ) -> Result<Self, hound::Error> {
        let path = path.as_ref();
        let (spec, samples) = read_wav(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(
            name,
            spec.sample_rate,
            spec.channels,
            samples,
            word_set,
            word_index,
        ))
    }

    /// Clip name, usually the file stem it was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Samples per second.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Word set this clip belongs to.
    pub fn word_set(&self) -> &WordSetId {
        &self.word_set
    }

    /// Index of the spoken word within its word set.
    pub fn word_index(&self) -> usize {
        self.word_index
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// The clip as a single channel. Mono clips are borrowed, anything else
    /// is averaged across channels.
    pub fn mono(&self) -> Cow<'_, [f32]> {
        if self.channels == 1 {
            Cow::Borrowed(&self.samples)
        } else {
            Cow::Owned(downmix(&self.samples, self.channels as usize))
        }
    }
}

/// Audio captured from the channel under test during one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    sample_rate: u32,
    samples: Vec<f32>,
    started_at: SystemTime,
}

impl Recording {
    /// Creates a mono recording that nominally started at `started_at`.
    pub fn new(sample_rate: u32, samples: Vec<f32>, started_at: SystemTime) -> Self {
        Self {
            sample_rate,
            samples,
            started_at,
        }
    }

    /// Samples per second.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mono samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// When capture nominally started.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Up to `len` samples starting at `offset`, clamped to what was recorded.
    pub fn segment(&self, offset: usize, len: usize) -> &[f32] {
        let start = offset.min(self.samples.len());
        let end = offset.saturating_add(len).min(self.samples.len());
        &self.samples[start..end]
    }

    /// Writes the recording as a 32 bit float mono WAV file.
    pub fn to_wav(&self, path: impl AsRef<Path>) -> Result<(), hound::Error> {
        write_wav(path, self.sample_rate, 1, &self.samples)
    }
}

/// Averages interleaved `channels` down to one.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Opens a WAV file and returns its spec with samples scaled to [-1, 1].
pub fn read_wav(path: impl AsRef<Path>) -> Result<(WavSpec, Vec<f32>), hound::Error> {
    let reader: WavReader<BufReader<File>> = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<f32>, hound::Error>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<Vec<f32>, hound::Error>>()?
        }
    };
    Ok((spec, samples))
}

/// Writes interleaved samples as a 32 bit float WAV file.
pub fn write_wav(
    path: impl AsRef<Path>,
    sample_rate: u32,
    channels: u16,
    samples: &[f32],
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_set() -> WordSetId {
        WordSetId::new("F1_b1")
    }

    #[test]
    fn stereo_clip_downmixes() {
        let clip = Clip::new("c", 8000, 2, vec![1.0, 0.0, 0.5, 0.5], word_set(), 0);
        assert_eq!(clip.frames(), 2);
        assert_eq!(clip.mono().as_ref(), &[0.5, 0.5]);
    }

    #[test]
    fn mono_clip_is_borrowed() {
        let clip = Clip::new("c", 8000, 1, vec![0.25; 8000], word_set(), 0);
        assert!(matches!(clip.mono(), Cow::Borrowed(_)));
        assert_eq!(clip.duration(), Duration::from_secs(1));
    }

    #[test]
    fn segment_is_clamped() {
        let rec = Recording::new(8000, (0..10).map(|v| v as f32).collect(), SystemTime::now());
        assert_eq!(rec.segment(8, 5), &[8.0, 9.0]);
        assert!(rec.segment(20, 5).is_empty());
    }

    #[test]
    fn wav_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.wav");
        let samples: Vec<f32> = (0..100).map(|v| (v as f32 / 100.0).sin()).collect();
        let rec = Recording::new(16000, samples.clone(), SystemTime::now());
        rec.to_wav(&path).unwrap();

        let (spec, read) = read_wav(&path).unwrap();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(read, samples);
    }

    #[test]
    fn int_wav_is_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(i16::MIN).unwrap();
        writer.write_sample(16384_i16).unwrap();
        writer.finalize().unwrap();

        let clip = Clip::from_wav(&path, word_set(), 2).unwrap();
        assert_eq!(clip.name(), "int");
        assert_eq!(clip.samples(), &[-1.0, 0.5]);
        assert_eq!(clip.word_index(), 2);
    }
}
