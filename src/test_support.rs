//! Synthetic word sets for tests. Each "word" is a carrier burst shared by
//! the whole set followed by a keyword burst at a word specific pitch, which
//! is enough structure for both the envelope aligner and the Bark scorer.

use std::f32::consts::PI;
use std::time::SystemTime;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::audio::{Clip, Recording};
use crate::corpus::{WordCorpus, WordSet, WordSetId};

pub const RATE: u32 = 16_000;
pub const WORDS: [&str; 4] = ["went", "sent", "bent", "tent"];
pub const SET_ID: &str = "F1_b1";

const KEY_HZ: [f32; 4] = [700.0, 1500.0, 2600.0, 3800.0];
const BURST: usize = 2400;
const GAP: usize = 800;
const TAIL: usize = 400;

/// Samples in every synthetic word clip.
pub const CLIP_LEN: usize = BURST + GAP + BURST + TAIL;

fn burst(len: usize, partials: &[(f32, f32)]) -> impl Iterator<Item = f32> + '_ {
    (0..len).map(move |i| {
        let env = 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos();
        let t = i as f32 / RATE as f32;
        env * partials
            .iter()
            .map(|(hz, amp)| amp * (2.0 * PI * hz * t).sin())
            .sum::<f32>()
    })
}

pub fn word_audio(index: usize) -> Vec<f32> {
    let key = KEY_HZ[index];
    let mut samples: Vec<f32> = burst(BURST, &[(300.0, 0.4), (900.0, 0.2)]).collect();
    samples.extend(std::iter::repeat(0.0).take(GAP));
    samples.extend(burst(BURST, &[(key, 0.4), (key * 1.5, 0.15)]));
    samples.extend(std::iter::repeat(0.0).take(TAIL));
    samples
}

pub fn word_clip(index: usize) -> Clip {
    Clip::new(
        format!("{SET_ID}_w{}_{}", index + 1, WORDS[index]),
        RATE,
        1,
        word_audio(index),
        WordSetId::new(SET_ID),
        index,
    )
}

pub fn word_set() -> WordSet {
    WordSet::new(
        WordSetId::new(SET_ID),
        WORDS.iter().map(|w| w.to_string()).collect(),
        (0..WORDS.len()).map(word_clip).collect(),
    )
    .unwrap()
}

pub fn corpus() -> WordCorpus {
    WordCorpus::new(vec![word_set()]).unwrap()
}

/// One copy of the synthetic word set under each of `ids`.
pub fn corpus_of(ids: &[&str]) -> WordCorpus {
    let sets = ids
        .iter()
        .map(|id| {
            let clips = (0..WORDS.len())
                .map(|i| {
                    Clip::new(
                        format!("{id}_w{}_{}", i + 1, WORDS[i]),
                        RATE,
                        1,
                        word_audio(i),
                        WordSetId::new(*id),
                        i,
                    )
                })
                .collect();
            WordSet::new(
                WordSetId::new(*id),
                WORDS.iter().map(|w| w.to_string()).collect(),
                clips,
            )
            .unwrap()
        })
        .collect();
    WordCorpus::new(sets).unwrap()
}

pub fn noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            if amplitude > 0.0 {
                rng.gen_range(-amplitude..amplitude)
            } else {
                0.0
            }
        })
        .collect()
}

/// `pad` samples of silence, the clip, then `tail` samples of noise.
pub fn padded_recording(clip: &Clip, pad: usize, tail: usize, tail_noise: f32) -> Recording {
    let mut samples = vec![0.0; pad];
    samples.extend_from_slice(&clip.mono());
    samples.extend(noise(tail, tail_noise, 99));
    Recording::new(clip.sample_rate(), samples, SystemTime::now())
}
