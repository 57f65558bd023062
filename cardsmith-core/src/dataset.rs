//! Recorded runs, used as evaluation examples for prompt search.
//!
//! Each run lives in its own subdirectory of the evaluation data directory
//! (`evaluation_data/20241101_120000/`). [`RunRecorder`] writes the files as
//! the CLI runs; [`load_examples`] reads them back. Every file is optional,
//! and a run only serves the roles whose inputs it has.

use crate::convergence::IterationRecord;
use crate::error::EngineError;
use crate::prompts::{FewShotDemo, PromptRole};
use crate::types::{
    AdaptiveUpdate, CritiqueReport, FlashcardSet, KnowledgeGapAnalysis, QualityReport,
    StudySession,
};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const INITIAL_FILE: &str = "flashcards_initial.json";
pub const REVISED_FILE: &str = "flashcards_revised.json";
pub const ADAPTED_FILE: &str = "flashcards_adapted.json";
pub const CRITIQUE_FILE: &str = "critique.json";
pub const HISTORY_FILE: &str = "improvement_history.json";
pub const SESSION_FILE: &str = "study_session.json";
pub const GAPS_FILE: &str = "knowledge_gaps.json";
pub const UPDATE_FILE: &str = "adaptive_update.json";
pub const SOURCE_FILE: &str = "source_text.txt";

/// Evaluation stage whose score ranks critique and revise demos.
const DECK_STAGE: &str = "revised";
/// Evaluation stage whose score ranks adaptation demos.
const ADAPTATION_STAGE: &str = "adaptation";

/// One recorded run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationExample {
    /// Run directory name.
    pub name: String,
    pub initial: Option<FlashcardSet>,
    pub revised: Option<FlashcardSet>,
    /// First critique of the initial deck.
    pub critique: Option<CritiqueReport>,
    pub session: Option<StudySession>,
    pub gaps: Option<KnowledgeGapAnalysis>,
    pub update: Option<AdaptiveUpdate>,
    pub source_text: Option<String>,
    /// Overall scores keyed by stage ("initial", "revised", "adaptation").
    pub reference_scores: BTreeMap<String, f64>,
}

impl EvaluationExample {
    /// Whether this run has the inputs fitness evaluation needs for `role`.
    pub fn supports(&self, role: PromptRole) -> bool {
        match role {
            PromptRole::Critique | PromptRole::Revise => {
                self.initial.as_ref().is_some_and(|set| !set.is_empty())
            }
            PromptRole::Adapt => {
                self.session.as_ref().is_some_and(|s| s.validate().is_ok())
                    && self
                        .gaps
                        .as_ref()
                        .is_some_and(|g| !g.targeted_areas(true).is_empty())
            }
        }
    }

    /// Recorded quality of this run's output for `role`.
    pub fn reference_score(&self, role: PromptRole) -> Option<f64> {
        let stage = match role {
            PromptRole::Critique | PromptRole::Revise => DECK_STAGE,
            PromptRole::Adapt => ADAPTATION_STAGE,
        };
        self.reference_scores.get(stage).copied()
    }

    pub fn source(&self) -> &str {
        self.source_text.as_deref().unwrap_or("")
    }

    /// An input/output pair showing what `role` produced in this run.
    pub fn demo_for(&self, role: PromptRole) -> Option<FewShotDemo> {
        match role {
            PromptRole::Critique => {
                let deck = self.initial.as_ref()?;
                let critique = self.critique.as_ref()?;
                let output = serde_json::to_string(critique).ok()?;
                Some(FewShotDemo::new(deck.render_numbered(), output))
            }
            PromptRole::Revise => {
                let deck = self.initial.as_ref()?;
                let revised = self.revised.as_ref()?;
                let mut input = deck.render_numbered();
                if let Some(critique) = &self.critique {
                    input.push_str(&format!("\n\nFeedback:\n{}", critique.feedback));
                }
                Some(FewShotDemo::new(input, serde_json::to_string(revised).ok()?))
            }
            PromptRole::Adapt => {
                let gaps = self.gaps.as_ref()?;
                let update = self.update.as_ref()?;
                if update.added.is_empty() {
                    return None;
                }
                let input = gaps
                    .targeted_areas(true)
                    .iter()
                    .map(|g| format!("- {g}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(FewShotDemo::new(input, serde_json::to_string(&update.added).ok()?))
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.initial.is_none() && self.session.is_none() && self.gaps.is_none()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EngineError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Overall score from an evaluation file, in either report layout.
fn read_score(path: &Path) -> Result<Option<f64>, EngineError> {
    let text = std::fs::read_to_string(path)?;
    if let Ok(report) = serde_json::from_str::<QualityReport>(&text) {
        return Ok(Some(report.overall_score()));
    }
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Ok(["overall_score", "overall_deck_score", "overall_personalization"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_f64())))
}

/// Load every readable run under `dir`, in name order.
pub fn load_examples(dir: &Path) -> Result<Vec<EvaluationExample>, EngineError> {
    if !dir.is_dir() {
        return Err(EngineError::incomplete(format!(
            "evaluation data directory {} does not exist",
            dir.display()
        )));
    }
    let mut runs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    runs.sort();

    let mut examples = Vec::new();
    for run in runs {
        match load_example(&run) {
            Ok(example) if example.is_empty() => {
                debug!(run = %run.display(), "Skipping run with no usable files");
            }
            Ok(example) => examples.push(example),
            Err(e) => warn!(run = %run.display(), error = %e, "Skipping unreadable run"),
        }
    }
    info!(dir = %dir.display(), count = examples.len(), "Loaded evaluation examples");
    Ok(examples)
}

/// Load one run directory.
pub fn load_example(run: &Path) -> Result<EvaluationExample, EngineError> {
    let name = run
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let source_path = run.join(SOURCE_FILE);
    let source_text = if source_path.exists() {
        Some(std::fs::read_to_string(&source_path)?)
    } else {
        None
    };

    let mut reference_scores = BTreeMap::new();
    for entry in std::fs::read_dir(run)?.filter_map(Result::ok) {
        let path = entry.path();
        let Some(stage) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("evaluation_"))
        else {
            continue;
        };
        if stage == "metadata" || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_score(&path) {
            Ok(Some(score)) => {
                reference_scores.insert(stage.to_string(), score);
            }
            Ok(None) => debug!(path = %path.display(), "Evaluation file has no overall score"),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable evaluation"),
        }
    }

    Ok(EvaluationExample {
        name,
        initial: read_json(&run.join(INITIAL_FILE))?,
        revised: read_json(&run.join(REVISED_FILE))?,
        critique: read_json(&run.join(CRITIQUE_FILE))?,
        session: read_json(&run.join(SESSION_FILE))?,
        gaps: read_json(&run.join(GAPS_FILE))?,
        update: read_json(&run.join(UPDATE_FILE))?,
        source_text,
        reference_scores,
    })
}

/// Writes the files of one run.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    dir: PathBuf,
}

impl RunRecorder {
    /// Start a new timestamped run under `root`.
    pub fn create(root: &Path) -> Result<Self, EngineError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut dir = root.join(&stamp);
        let mut n = 1;
        while dir.exists() {
            dir = root.join(format!("{stamp}_{n}"));
            n += 1;
        }
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Recording run");
        Ok(Self { dir })
    }

    /// Continue recording into an existing run directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<PathBuf, EngineError> {
        let path = self.dir.join(file);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        debug!(path = %path.display(), "Wrote run file");
        Ok(path)
    }

    pub fn record_source(&self, source: &str) -> Result<PathBuf, EngineError> {
        let path = self.dir.join(SOURCE_FILE);
        std::fs::write(&path, source)?;
        Ok(path)
    }

    pub fn record_initial(&self, set: &FlashcardSet) -> Result<PathBuf, EngineError> {
        self.write_json(INITIAL_FILE, set)
    }

    pub fn record_revised(&self, set: &FlashcardSet) -> Result<PathBuf, EngineError> {
        self.write_json(REVISED_FILE, set)
    }

    /// Write the loop history, plus the first critique on its own.
    pub fn record_history(&self, history: &[IterationRecord]) -> Result<PathBuf, EngineError> {
        if let Some(critique) = history.first().and_then(|r| r.critique.as_ref()) {
            self.write_json(CRITIQUE_FILE, critique)?;
        }
        self.write_json(HISTORY_FILE, history)
    }

    pub fn record_session(&self, session: &StudySession) -> Result<PathBuf, EngineError> {
        self.write_json(SESSION_FILE, session)
    }

    pub fn record_gaps(&self, gaps: &KnowledgeGapAnalysis) -> Result<PathBuf, EngineError> {
        self.write_json(GAPS_FILE, gaps)
    }

    /// Write the update, its gap analysis, and the adapted deck.
    pub fn record_update(&self, update: &AdaptiveUpdate) -> Result<PathBuf, EngineError> {
        self.record_gaps(&update.gaps)?;
        self.write_json(ADAPTED_FILE, &update.final_set)?;
        self.write_json(UPDATE_FILE, update)
    }

    /// Write `evaluation_<stage>.json`.
    pub fn record_evaluation(&self, stage: &str, report: &QualityReport) -> Result<PathBuf, EngineError> {
        self.write_json(&format!("evaluation_{stage}.json"), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{deck_report, personalization_report};
    use crate::types::Flashcard;
    use pretty_assertions::assert_eq;

    fn deck() -> FlashcardSet {
        FlashcardSet::new(vec![
            Flashcard::new("What is ownership?", "Each value has one owner"),
            Flashcard::new("What is borrowing?", "Referencing without owning"),
        ])
    }

    #[test]
    fn test_record_and_load_run() {
        let root = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::create(root.path()).unwrap();
        recorder.record_source("Rust ownership notes").unwrap();
        recorder.record_initial(&deck()).unwrap();
        recorder.record_revised(&deck()).unwrap();
        recorder.record_evaluation("revised", &deck_report(8.5)).unwrap();
        let session = StudySession::from_ratings(&deck(), &[1, 5]).unwrap();
        recorder.record_session(&session).unwrap();
        recorder
            .record_gaps(&KnowledgeGapAnalysis {
                critical_gaps: vec!["borrowing".into()],
                ..Default::default()
            })
            .unwrap();

        let examples = load_examples(root.path()).unwrap();
        assert_eq!(examples.len(), 1);
        let example = &examples[0];
        assert_eq!(example.source(), "Rust ownership notes");
        assert_eq!(example.initial.as_ref(), Some(&deck()));
        assert_eq!(example.reference_score(PromptRole::Revise), Some(8.5));
        assert_eq!(example.reference_score(PromptRole::Adapt), None);
        assert!(example.supports(PromptRole::Critique));
        assert!(example.supports(PromptRole::Adapt));
    }

    #[test]
    fn test_unreadable_run_skipped() {
        let root = tempfile::tempdir().unwrap();
        let good = RunRecorder::open(root.path().join("a_good")).unwrap();
        good.record_initial(&deck()).unwrap();
        let bad = root.path().join("b_bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(INITIAL_FILE), "{ broken").unwrap();
        std::fs::create_dir_all(root.path().join("c_empty")).unwrap();

        let examples = load_examples(root.path()).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].name, "a_good");
    }

    #[test]
    fn test_missing_directory_is_incomplete_input() {
        let err = load_examples(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, EngineError::IncompleteInput { .. }));
    }

    #[test]
    fn test_reads_foreign_evaluation_layout() {
        let root = tempfile::tempdir().unwrap();
        let run = RunRecorder::open(root.path().join("run")).unwrap();
        run.record_initial(&deck()).unwrap();
        std::fs::write(
            run.dir().join("evaluation_adaptation.json"),
            r#"{"overall_personalization": 6.4, "gap_evaluations": []}"#,
        )
        .unwrap();
        std::fs::write(run.dir().join("evaluation_metadata.json"), r#"{"model": "gpt-4o"}"#).unwrap();
        let example = load_example(run.dir()).unwrap();
        assert_eq!(example.reference_score(PromptRole::Adapt), Some(6.4));
        assert_eq!(example.reference_scores.len(), 1);
    }

    #[test]
    fn test_demo_for_roles() {
        let update = AdaptiveUpdate {
            original_set: deck(),
            removed: FlashcardSet::default(),
            added: FlashcardSet::new(vec![Flashcard::new("Why borrow?", "To avoid moves")]),
            final_set: deck(),
            gaps: KnowledgeGapAnalysis::default(),
        };
        let example = EvaluationExample {
            initial: Some(deck()),
            revised: Some(deck()),
            gaps: Some(KnowledgeGapAnalysis {
                critical_gaps: vec!["borrowing".into()],
                ..Default::default()
            }),
            update: Some(update),
            ..Default::default()
        };
        assert!(example.demo_for(PromptRole::Critique).is_none());
        let revise = example.demo_for(PromptRole::Revise).unwrap();
        assert!(revise.output.contains("flashcards"));
        let adapt = example.demo_for(PromptRole::Adapt).unwrap();
        assert_eq!(adapt.input, "- borrowing");
        assert!(adapt.output.contains("Why borrow?"));
        let _ = personalization_report(1.0);
    }
}
