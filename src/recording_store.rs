//! Keeps the audio of a session on disk. Each received recording becomes
//! `Rx<n>_<clip>.wav`, numbered from 1 in trial order, and optionally every
//! transmitted clip is written once as `Tx_<clip>.wav`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::audio::{write_wav, Clip, Recording};
use crate::error::AudioIoError;

/// Writes recordings and transmitted clips into one directory.
#[derive(Debug)]
pub struct RecordingStore {
    dir: PathBuf,
    save_tx: bool,
    tx_written: Mutex<HashSet<String>>,
}

impl RecordingStore {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, save_tx: bool) -> Result<Self, AudioIoError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            save_tx,
            tx_written: Mutex::new(HashSet::new()),
        })
    }

    /// Directory files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the recording of trial `trial_index` (zero based) of clip
    /// `clip_name` is kept inside `dir`.
    pub fn rx_path(dir: &Path, trial_index: usize, clip_name: &str) -> PathBuf {
        dir.join(format!("Rx{}_{clip_name}.wav", trial_index + 1))
    }

    /// Stores what was received in trial `trial_index` (zero based) while
    /// `clip` was playing, plus the clip itself the first time it is seen if
    /// transmitted audio is kept.
    pub fn save(
        &self,
        trial_index: usize,
        clip: &Clip,
        recording: &Recording,
    ) -> Result<PathBuf, AudioIoError> {
        let rx_path = Self::rx_path(&self.dir, trial_index, clip.name());
        recording.to_wav(&rx_path)?;
        debug!("Wrote {}", rx_path.display());

        if self.save_tx {
            let first = self
                .tx_written
                .lock()
                .map(|mut seen| seen.insert(clip.name().to_string()))
                .unwrap_or(true);
            if first {
                let tx_path = self.dir.join(format!("Tx_{}.wav", clip.name()));
                write_wav(&tx_path, clip.sample_rate(), clip.channels(), clip.samples())?;
                debug!("Wrote {}", tx_path.display());
            }
        }

        Ok(rx_path)
    }
}
