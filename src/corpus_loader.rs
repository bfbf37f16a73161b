//! Loads a [`WordCorpus`](crate::corpus::WordCorpus) from a directory of
//! WAV clips named per [`ClipName`]. An optional `keywords.ron` file in the
//! same directory maps word set ids to the sample window of their rhyme word:
//!
//! ```text
//! { "F1_b39": (52000, 78000), "M3_b2": (50500, 80000) }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::audio::Clip;
use crate::clip_name::ClipName;
use crate::corpus::{CorpusLoader, WordSet, WordSetId};
use crate::error::CorpusError;

/// Name of the optional keyword window manifest.
pub const KEYWORD_MANIFEST: &str = "keywords.ron";

/// A [`CorpusLoader`] for a flat directory of clips.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLoader {
    talkers: Option<Vec<String>>,
}

impl DirectoryLoader {
    /// Loads every talker found.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only loads clips spoken by one of `talkers`.
    pub fn with_talkers(talkers: Vec<String>) -> Self {
        Self {
            talkers: Some(talkers),
        }
    }

    fn wants(&self, name: &ClipName) -> bool {
        match &self.talkers {
            Some(talkers) => talkers.iter().any(|t| *t == name.talker),
            None => true,
        }
    }
}

fn read_keyword_manifest(dir: &Path) -> Result<HashMap<String, (usize, usize)>, CorpusError> {
    let path = dir.join(KEYWORD_MANIFEST);
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let text = fs::read_to_string(&path).map_err(|source| CorpusError::Io {
        path: path.clone(),
        source,
    })?;
    ron::de::from_str(&text).map_err(|source| CorpusError::Manifest { path, source })
}

fn build_word_set(
    id: WordSetId,
    mut entries: Vec<(ClipName, PathBuf)>,
) -> Result<WordSet, CorpusError> {
    entries.sort_by_key(|(name, _)| name.word);

    let mut words = Vec::with_capacity(entries.len());
    let mut clips = Vec::with_capacity(entries.len());
    for (expected, (name, path)) in entries.into_iter().enumerate() {
        if name.word_index() != Some(expected) {
            return Err(CorpusError::InvalidWordSet {
                word_set: id.to_string(),
                reason: format!("expected word {} but found word {}", expected + 1, name.word),
            });
        }
        let clip = Clip::from_wav(&path, id.clone(), expected)
            .map_err(|source| CorpusError::Hound { path, source })?;
        words.push(name.text);
        clips.push(clip);
    }

    WordSet::new(id, words, clips)
}

impl CorpusLoader for DirectoryLoader {
    fn load_word_sets(&self, path: &Path) -> Result<Vec<WordSet>, CorpusError> {
        let io_err = |source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut grouped: BTreeMap<WordSetId, Vec<(ClipName, PathBuf)>> = BTreeMap::new();
        for entry in fs::read_dir(path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name == KEYWORD_MANIFEST {
                continue;
            }
            match file_name.parse::<ClipName>() {
                Ok(name) if self.wants(&name) => {
                    grouped
                        .entry(name.word_set_id())
                        .or_default()
                        .push((name, entry.path()));
                }
                Ok(name) => debug!("Skipping clip from talker {}", name.talker),
                Err(_) => warn!("Ignoring {file_name}, not a corpus clip name"),
            }
        }

        if grouped.is_empty() {
            return Err(CorpusError::Empty(path.to_path_buf()));
        }

        let keywords = read_keyword_manifest(path)?;
        let sets = grouped
            .into_iter()
            .map(|(id, entries)| {
                let window = keywords.get(id.as_str()).copied();
                let set = build_word_set(id, entries)?;
                Ok(match window {
                    Some((start, end)) => set.with_keyword_window(start..end),
                    None => set,
                })
            })
            .collect::<Result<Vec<WordSet>, CorpusError>>()?;

        info!("Loaded {} word sets from {}", sets.len(), path.display());
        Ok(sets)
    }
}
