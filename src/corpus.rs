//! The Modified Rhyme Test word corpus. A [`WordCorpus`] is built once at
//! startup, wrapped in an `Arc`, and only ever read afterwards, so every
//! trial and worker shares the same clip buffers without locking.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::Clip;
use crate::error::{CorpusError, ScoringError};

/// Identifier of a [`WordSet`], e.g. `F1_b39`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WordSetId(String);

impl WordSetId {
    /// Wraps a word set name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WordSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A group of rhyming words that only differ in one phoneme, each with its
/// own rendering in the same carrier sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct WordSet {
    id: WordSetId,
    words: Vec<String>,
    clips: Vec<Clip>,
    keyword_window: Option<Range<usize>>,
}

impl WordSet {
    /// Pairs each word with its clip. Candidates must all exist and share a
    /// sample rate.
    pub fn new(id: WordSetId, words: Vec<String>, clips: Vec<Clip>) -> Result<Self, CorpusError> {
        let invalid = |reason: String| CorpusError::InvalidWordSet {
            word_set: id.to_string(),
            reason,
        };
        if words.is_empty() {
            return Err(invalid("no candidate words".into()));
        }
        if words.len() != clips.len() {
            return Err(invalid(format!(
                "{} words but {} clips",
                words.len(),
                clips.len()
            )));
        }
        let rate = clips[0].sample_rate();
        if let Some(clip) = clips.iter().find(|c| c.sample_rate() != rate) {
            return Err(invalid(format!(
                "clip {} is at {} Hz, expected {} Hz",
                clip.name(),
                clip.sample_rate(),
                rate
            )));
        }
        Ok(Self {
            id,
            words,
            clips,
            keyword_window: None,
        })
    }

    /// Restricts scoring to the samples in `window`, where the rhyme word is
    /// spoken.
    pub fn with_keyword_window(self, window: Range<usize>) -> Self {
        Self {
            keyword_window: Some(window),
            ..self
        }
    }

    /// Identifier.
    pub fn id(&self) -> &WordSetId {
        &self.id
    }

    /// Candidate words in order.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Candidate clips, index aligned with [`WordSet::words`].
    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false for a constructed set, kept for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Word at `index`.
    pub fn word(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    /// Clip at `index`.
    pub fn clip(&self, index: usize) -> Option<&Clip> {
        self.clips.get(index)
    }

    /// Sample window holding the rhyme word, if known.
    pub fn keyword_window(&self) -> Option<&Range<usize>> {
        self.keyword_window.as_ref()
    }

    /// Sample rate shared by every candidate.
    pub fn sample_rate(&self) -> u32 {
        self.clips.first().map(Clip::sample_rate).unwrap_or_default()
    }

    /// Checks the invariants the scorer relies on. Sets built through
    /// [`WordSet::new`] always pass, but the scorer may be handed one that
    /// was assembled elsewhere.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let malformed = |reason: &str| ScoringError::MalformedWordSet {
            word_set: self.id.to_string(),
            reason: reason.to_string(),
        };
        if self.clips.is_empty() {
            return Err(malformed("no candidates"));
        }
        if self.clips.len() != self.words.len() {
            return Err(malformed("words and clips differ in number"));
        }
        let rate = self.sample_rate();
        if self.clips.iter().any(|c| c.sample_rate() != rate) {
            return Err(malformed("candidates have mismatched sample rates"));
        }
        Ok(())
    }
}

/// Read-only registry of every word set available to a session.
#[derive(Debug, Clone, Default)]
pub struct WordCorpus {
    sets: Vec<WordSet>,
    index: HashMap<WordSetId, usize>,
}

impl WordCorpus {
    /// Builds the registry, rejecting duplicate ids.
    pub fn new(sets: Vec<WordSet>) -> Result<Self, CorpusError> {
        let mut index = HashMap::with_capacity(sets.len());
        for (i, set) in sets.iter().enumerate() {
            if index.insert(set.id().clone(), i).is_some() {
                return Err(CorpusError::DuplicateWordSet(set.id().to_string()));
            }
        }
        Ok(Self { sets, index })
    }

    /// Loads every word set at `path` through `loader`.
    pub fn load(loader: &impl CorpusLoader, path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        Self::new(loader.load_word_sets(path.as_ref())?)
    }

    /// Looks a set up by id.
    pub fn get(&self, id: &WordSetId) -> Option<&WordSet> {
        self.index.get(id).map(|&i| &self.sets[i])
    }

    /// All sets in load order.
    pub fn word_sets(&self) -> &[WordSet] {
        &self.sets
    }

    /// Number of sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether the corpus has no sets.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Total number of clips across all sets.
    pub fn clip_count(&self) -> usize {
        self.sets.iter().map(WordSet::len).sum()
    }
}

/// Source of word sets, e.g. a directory of WAV files.
pub trait CorpusLoader {
    /// Reads every word set found at `path`.
    fn load_word_sets(&self, path: &Path) -> Result<Vec<WordSet>, CorpusError>;
}
