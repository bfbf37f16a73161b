//! Destinations for finalized sessions.
//!
//! [`RonSink`] keeps the whole [`SessionResult`] as a RON document that can
//! be read back with [`read_session`]. [`CsvSink`] writes one row per trial
//! for spreadsheets, plus a `<name>_summary.csv` next to it with one row per
//! condition and a final `ALL` row.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ron::ser::PrettyConfig;

use crate::error::SinkError;
use crate::session::{ConditionSummary, SessionResult};

/// Accepts a finalized session.
pub trait ResultSink {
    /// Persists `session`.
    fn write_session(&mut self, session: &SessionResult) -> Result<(), SinkError>;
}

/// Writes the session as pretty printed RON.
#[derive(Debug, Clone)]
pub struct RonSink {
    path: PathBuf,
}

impl RonSink {
    /// Writes to `path`, replacing it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultSink for RonSink {
    fn write_session(&mut self, session: &SessionResult) -> Result<(), SinkError> {
        let text = ron::ser::to_string_pretty(session, PrettyConfig::default())?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// Reads a session written by [`RonSink`].
pub fn read_session(path: impl AsRef<Path>) -> Result<SessionResult, SinkError> {
    let text = fs::read_to_string(path)?;
    Ok(ron::de::from_str(&text)?)
}

/// Writes per-trial and per-condition CSV files.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    /// Trials go to `path`, summaries to `<stem>_summary.csv` beside it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Where the summary file is written.
    pub fn summary_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string());
        self.path.with_file_name(format!("{stem}_summary.csv"))
    }
}

const TRIAL_HEADER: &str =
    "trial,condition,word_set,clip,target,predicted,correct,offset,confidence,timestamp,skip_reason";
const SUMMARY_HEADER: &str =
    "condition,trials,scored,correct,skipped,accuracy,ci_lower,ci_upper,intelligibility";

/// Quotes a field if it would otherwise break the row.
fn field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn number(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

fn summary_row(out: &mut String, label: &str, summary: &ConditionSummary) {
    let _ = writeln!(
        out,
        "{},{},{},{},{},{},{},{},{}",
        field(label),
        summary.trials,
        summary.scored,
        summary.correct,
        summary.skipped,
        number(summary.accuracy),
        number(summary.ci_lower),
        number(summary.ci_upper),
        number(summary.intelligibility),
    );
}

impl ResultSink for CsvSink {
    fn write_session(&mut self, session: &SessionResult) -> Result<(), SinkError> {
        let mut rows: Vec<(usize, String)> = Vec::new();
        for r in &session.results {
            let timestamp = r
                .timestamp
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            rows.push((
                r.index,
                format!(
                    "{},{},{},{},{},{},{},{},{:.6},{:.3},",
                    r.index + 1,
                    field(r.condition.as_deref().unwrap_or_default()),
                    field(r.word_set.as_str()),
                    field(&r.clip_name),
                    field(&r.target_word),
                    field(&r.predicted_word),
                    r.correct,
                    r.alignment.offset,
                    r.alignment.confidence,
                    timestamp,
                ),
            ));
        }
        for s in &session.skipped {
            rows.push((
                s.index,
                format!(
                    "{},{},{},{},,,,,,,{:?}",
                    s.index + 1,
                    field(s.spec.condition.as_deref().unwrap_or_default()),
                    field(s.spec.word_set.as_str()),
                    field(&s.clip_name),
                    s.reason,
                ),
            ));
        }
        rows.sort_by_key(|(index, _)| *index);

        let mut trials = String::from(TRIAL_HEADER);
        trials.push('\n');
        for (_, row) in rows {
            trials.push_str(&row);
            trials.push('\n');
        }
        fs::write(&self.path, trials)?;

        let mut summary = String::from(SUMMARY_HEADER);
        summary.push('\n');
        for condition in &session.conditions {
            summary_row(&mut summary, condition.condition.as_deref().unwrap_or_default(), condition);
        }
        summary_row(&mut summary, "ALL", &session.overall);
        fs::write(self.summary_path(), summary)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::AlignmentResult;
    use crate::config::SessionConfig;
    use crate::corpus::WordSetId;
    use crate::error::ReasonCode;
    use crate::scorer::CandidateScore;
    use crate::session::SessionAccumulator;
    use crate::trial::{SkippedTrial, TrialResult, TrialSpec};
    use std::time::{Duration, SystemTime};

    fn session() -> SessionResult {
        let mut acc = SessionAccumulator::new(3);
        let spec = |condition: &str| TrialSpec {
            word_set: WordSetId::new("F1_b1"),
            target: 0,
            condition: Some(condition.to_string()),
        };
        acc.skip(SkippedTrial {
            index: 1,
            attempt: 0,
            spec: spec("quiet, indoors"),
            clip_name: "F1_b1_w1_went".into(),
            reason: ReasonCode::NoReliableAlignment,
            message: "no reliable alignment".into(),
            alignment: None,
        });
        for (index, correct) in [(0, true), (2, false)] {
            let predicted = if correct { "went" } else { "sent" };
            acc.record(TrialResult {
                index,
                condition: Some("quiet, indoors".into()),
                word_set: WordSetId::new("F1_b1"),
                target_index: 0,
                target_word: "went".into(),
                predicted_index: usize::from(!correct),
                predicted_word: predicted.into(),
                correct,
                scores: vec![CandidateScore {
                    index: 0,
                    word: "went".into(),
                    distance: 1.5,
                    likelihood: 1.0,
                }],
                alignment: AlignmentResult {
                    offset: 800,
                    confidence: 0.97,
                },
                clip_name: "F1_b1_w1_went".into(),
                timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(10),
            });
        }
        acc.finalize(&SessionConfig::default(), None)
    }

    #[test]
    fn ron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.ron");
        let session = session();
        RonSink::new(&path).write_session(&session).unwrap();
        assert_eq!(read_session(&path).unwrap(), session);
    }

    #[test]
    fn csv_rows_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("run1.csv"));
        sink.write_session(&session()).unwrap();

        let trials = fs::read_to_string(dir.path().join("run1.csv")).unwrap();
        let lines: Vec<&str> = trials.lines().collect();
        assert_eq!(lines[0], TRIAL_HEADER);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("1,\"quiet, indoors\",F1_b1,F1_b1_w1_went,went,went,true,800,"));
        assert!(lines[2].ends_with(",NoReliableAlignment"));
        assert!(lines[3].contains(",sent,false,"));

        let summary = fs::read_to_string(sink.summary_path()).unwrap();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], SUMMARY_HEADER);
        assert!(lines[1].starts_with("\"quiet, indoors\",3,2,1,1,0.500000,"));
        assert!(lines[2].starts_with("ALL,3,2,1,1,0.500000,"));
    }

    #[test]
    fn quoting() {
        assert_eq!(field("plain"), "plain");
        assert_eq!(field("a,b"), "\"a,b\"");
        assert_eq!(field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
