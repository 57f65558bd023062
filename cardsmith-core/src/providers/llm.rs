//! Generator and Scorer backed by a language model.
//!
//! Every role is a single structured completion. The model returns JSON
//! matching a strict schema; anything that fails to parse into the typed
//! model becomes [`BackendError::MalformedOutput`]. The judge only returns
//! per-card and per-gap scores. Averages are computed here.

use crate::brain::{Generator, Scorer};
use crate::config::LlmConfig;
use crate::dataset::EvaluationExample;
use crate::error::BackendError;
use crate::optimizer::InstructionProposer;
use crate::personalization::excerpt;
use crate::prompts::PromptConfiguration;
use crate::providers::{ChatBackend, StructuredRequest, create_backend};
use crate::scoring;
use crate::types::{
    AdaptiveUpdate, CritiqueReport, FlashcardSet, KnowledgeGapAnalysis, QualityKind,
    QualityReport, StudySessionResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const GENERATE_SYSTEM: &str = "\
You are an expert at creating effective flashcards for spaced repetition learning.
Create flashcards that:
- focus on atomic concepts (one concept per card)
- use clear, concise questions
- avoid yes/no questions
- include context when needed
- test understanding, not just memorization";

const GAP_ANALYSIS_SYSTEM: &str = "\
You are an expert learning analyst. Analyze student performance on flashcards
to identify knowledge gaps and recommend improvements. Be specific and actionable.";

const DECK_JUDGE_SYSTEM: &str = "\
You are an expert educational evaluator of flashcards built for long-term
understanding and spaced repetition. Rate every card on four independent
criteria, each on a 1-10 scale:
1. atomicity: one clear concept, not several
2. clarity: unambiguous, precise, and complete
3. learning_value: promotes active recall and understanding over rote memorization
4. accuracy: factually correct

1-3 poor, 4-6 adequate, 7-8 good, 9-10 excellent. Explain each rating briefly.";

const ADAPTATION_JUDGE_SYSTEM: &str = "\
You are an expert educational evaluator assessing how well a deck was adapted
to one student. Judge personalization only, not general card quality:
1. For each identified knowledge gap, rate 1-10 how well the new cards fill it.
2. For each removed card, rate 1-10 whether removing it was appropriate given
   that the student rated it as known well.";

/// Build a strict object schema where every property is required.
fn object_schema(properties: Value) -> Value {
    let required: Vec<String> = properties
        .as_object()
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn string_array() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn flashcard_set_schema() -> Value {
    object_schema(json!({
        "flashcards": {
            "type": "array",
            "items": object_schema(json!({
                "question": {"type": "string"},
                "answer": {"type": "string"},
            })),
        }
    }))
}

fn critique_schema() -> Value {
    object_schema(json!({
        "is_acceptable": {"type": "boolean"},
        "feedback": {"type": "string"},
        "issues": string_array(),
    }))
}

fn knowledge_gaps_schema() -> Value {
    object_schema(json!({
        "strong_areas": string_array(),
        "weak_areas": string_array(),
        "critical_gaps": string_array(),
        "recommendations": string_array(),
        "gap_report": {"type": "string"},
    }))
}

fn deck_evaluation_schema() -> Value {
    object_schema(json!({
        "card_evaluations": {
            "type": "array",
            "items": object_schema(json!({
                "card_number": {"type": "integer"},
                "atomicity": {"type": "number"},
                "clarity": {"type": "number"},
                "learning_value": {"type": "number"},
                "accuracy": {"type": "number"},
                "feedback": {"type": "string"},
            })),
        },
        "overall_feedback": {"type": "string"},
    }))
}

fn adaptation_evaluation_schema() -> Value {
    let scored = |label: &str| {
        object_schema(json!({
            label: {"type": "string"},
            "personalization_score": {"type": "number"},
            "feedback": {"type": "string"},
        }))
    };
    object_schema(json!({
        "gap_evaluations": {"type": "array", "items": scored("gap")},
        "removal_evaluations": {"type": "array", "items": scored("question")},
        "overall_feedback": {"type": "string"},
    }))
}

fn parse<T: DeserializeOwned>(role: &str, text: &str) -> Result<T, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::malformed(role, e.to_string()))
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// [`Generator`] over a [`ChatBackend`].
pub struct LlmGenerator {
    backend: Arc<dyn ChatBackend>,
}

impl LlmGenerator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        role: &str,
        schema: Value,
        system: String,
        user: String,
    ) -> Result<T, BackendError> {
        debug!(role, model = self.backend.model_name(), "Calling generator role");
        let text = self
            .backend
            .complete_structured(StructuredRequest::new(role, schema, system, user))
            .await?;
        parse(role, &text)
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, source: &str) -> Result<FlashcardSet, BackendError> {
        let user = format!("Generate comprehensive flashcards from this material:\n\n{source}");
        let set: FlashcardSet = self
            .call("flashcard_set", flashcard_set_schema(), GENERATE_SYSTEM.to_string(), user)
            .await?;
        if set.is_empty() {
            return Err(BackendError::malformed("generate", "model returned no flashcards"));
        }
        Ok(set)
    }

    async fn critique(
        &self,
        set: &FlashcardSet,
        prompt: &PromptConfiguration,
    ) -> Result<CritiqueReport, BackendError> {
        let user = format!("Critique these flashcards:\n\n{}", set.render_numbered());
        self.call("critique", critique_schema(), prompt.render_system_prompt(), user)
            .await
    }

    async fn revise(
        &self,
        set: &FlashcardSet,
        critique: &CritiqueReport,
        prompt: &PromptConfiguration,
    ) -> Result<FlashcardSet, BackendError> {
        let issues: Vec<String> = critique.issues.iter().cloned().collect();
        let user = format!(
            "Revise these flashcards based on the feedback:\n\n\
             Original flashcards:\n{}\n\n\
             Feedback:\n{}\n\n\
             Issues to address:\n{}",
            set.render_numbered(),
            critique.feedback,
            bullet_list(&issues)
        );
        let revised: FlashcardSet = self
            .call("flashcard_set", flashcard_set_schema(), prompt.render_system_prompt(), user)
            .await?;
        if revised.is_empty() && !set.is_empty() {
            return Err(BackendError::malformed("revise", "revision dropped every card"));
        }
        Ok(revised)
    }

    async fn analyze_gaps(
        &self,
        session: &StudySessionResult,
    ) -> Result<KnowledgeGapAnalysis, BackendError> {
        let ratings = session
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                format!(
                    "Card {} (Difficulty: {}): Q: {} | A: {}",
                    i + 1,
                    entry.rating,
                    entry.card.question,
                    entry.card.answer
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Analyze these flashcard ratings (1 = know well, 5 = very difficult).\n\
             Rating distribution: {}\n\n{}\n\n\
             Identify:\n\
             1. Strong areas (concepts rated 1, already mastered)\n\
             2. Weak areas (concepts rated 2-3, need reinforcement)\n\
             3. Critical knowledge gaps (rated 4-5, misconceptions or missing prerequisites)\n\
             4. Recommendations for new flashcards, specific about concepts\n\
             Finish with a short human-readable gap report.",
            session.distribution(),
            ratings
        );
        self.call(
            "knowledge_gaps",
            knowledge_gaps_schema(),
            GAP_ANALYSIS_SYSTEM.to_string(),
            user,
        )
        .await
    }

    async fn generate_gap_cards(
        &self,
        areas: &[String],
        source_excerpt: &str,
        prompt: &PromptConfiguration,
    ) -> Result<FlashcardSet, BackendError> {
        let mut user = format!(
            "Generate flashcards that specifically address these knowledge gaps:\n\n{}",
            bullet_list(areas)
        );
        if !source_excerpt.is_empty() {
            user.push_str(&format!("\n\nSource material:\n{source_excerpt}"));
        }
        user.push_str("\n\nGenerate approximately 5-8 flashcards tailored to these gaps.");
        self.call("flashcard_set", flashcard_set_schema(), prompt.render_system_prompt(), user)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct CardEvaluation {
    atomicity: f64,
    clarity: f64,
    learning_value: f64,
    accuracy: f64,
}

#[derive(Debug, Deserialize)]
struct DeckEvaluation {
    card_evaluations: Vec<CardEvaluation>,
    #[serde(default)]
    overall_feedback: String,
}

#[derive(Debug, Deserialize)]
struct ScoredItem {
    personalization_score: f64,
}

#[derive(Debug, Deserialize)]
struct AdaptationEvaluation {
    #[serde(default)]
    gap_evaluations: Vec<ScoredItem>,
    #[serde(default)]
    removal_evaluations: Vec<ScoredItem>,
    #[serde(default)]
    overall_feedback: String,
}

/// LLM-as-judge [`Scorer`].
pub struct LlmScorer {
    backend: Arc<dyn ChatBackend>,
    source: Option<String>,
    source_excerpt_chars: usize,
}

impl LlmScorer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            source: None,
            source_excerpt_chars: 5000,
        }
    }

    /// Judge accuracy against this source text.
    pub fn with_source(mut self, source: impl Into<String>, excerpt_chars: usize) -> Self {
        self.source = Some(source.into());
        self.source_excerpt_chars = excerpt_chars;
        self
    }

    fn source_section(&self) -> String {
        match &self.source {
            Some(source) if !source.trim().is_empty() => format!(
                "SOURCE MATERIAL:\n{}\n\n",
                excerpt(source, self.source_excerpt_chars)
            ),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    async fn evaluate_deck(&self, set: &FlashcardSet) -> Result<QualityReport, BackendError> {
        if set.is_empty() {
            return Ok(QualityReport::from_sub_metrics(
                QualityKind::Deck,
                Vec::<(String, f64)>::new(),
                "empty deck",
            ));
        }
        let cards = set
            .iter()
            .enumerate()
            .map(|(i, c)| format!("Card {}:\nQ: {}\nA: {}\n", i + 1, c.question, c.answer))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Evaluate these flashcards for quality.\n\n{}Flashcards to evaluate:\n{}",
            self.source_section(),
            cards
        );
        let text = self
            .backend
            .complete_structured(StructuredRequest::new(
                "deck_evaluation",
                deck_evaluation_schema(),
                DECK_JUDGE_SYSTEM,
                user,
            ))
            .await?;
        let evaluation: DeckEvaluation = parse("deck_evaluation", &text)?;
        if evaluation.card_evaluations.is_empty() {
            return Err(BackendError::malformed(
                "deck_evaluation",
                "no per-card evaluations returned",
            ));
        }

        let rows: Vec<BTreeMap<String, f64>> = evaluation
            .card_evaluations
            .iter()
            .map(|card| {
                BTreeMap::from([
                    ("atomicity".to_string(), card.atomicity),
                    ("clarity".to_string(), card.clarity),
                    ("learning_value".to_string(), card.learning_value),
                    ("accuracy".to_string(), card.accuracy),
                ])
            })
            .collect();
        Ok(scoring::aggregate_rows(
            QualityKind::Deck,
            &rows,
            evaluation.overall_feedback,
        ))
    }

    async fn evaluate_adaptation(
        &self,
        update: &AdaptiveUpdate,
    ) -> Result<QualityReport, BackendError> {
        let gaps = update.gaps.targeted_areas(true);
        if gaps.is_empty() && update.removed.is_empty() {
            return Ok(QualityReport::from_sub_metrics(
                QualityKind::Personalization,
                Vec::<(String, f64)>::new(),
                "nothing was adapted",
            ));
        }

        let removed = update
            .removed
            .iter()
            .map(|c| {
                format!(
                    "Removed Card:\nQ: {}\nA: {}\nUser Rating: 1/5 (1=know well, 5=very difficult)\n",
                    c.question, c.answer
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Evaluate the adaptation effectiveness. The system identified knowledge gaps, \
             generated new cards to address them, and removed cards the student rated 1.\n\n\
             {}IDENTIFIED KNOWLEDGE GAPS:\n{}\n\n\
             NEW CARDS GENERATED TO ADDRESS GAPS:\n{}\n\n\
             REMOVED CARDS:\n{}",
            self.source_section(),
            bullet_list(&gaps),
            update.added.render_numbered(),
            removed
        );
        let text = self
            .backend
            .complete_structured(StructuredRequest::new(
                "adaptation_evaluation",
                adaptation_evaluation_schema(),
                ADAPTATION_JUDGE_SYSTEM,
                user,
            ))
            .await?;
        let evaluation: AdaptationEvaluation = parse("adaptation_evaluation", &text)?;

        let mut rows: Vec<BTreeMap<String, f64>> = Vec::new();
        if !gaps.is_empty() {
            rows.extend(evaluation.gap_evaluations.iter().map(|g| {
                BTreeMap::from([(
                    "gap_filling_effectiveness".to_string(),
                    g.personalization_score,
                )])
            }));
        }
        if !update.removed.is_empty() {
            rows.extend(evaluation.removal_evaluations.iter().map(|r| {
                BTreeMap::from([("removal_effectiveness".to_string(), r.personalization_score)])
            }));
        }
        Ok(scoring::aggregate_rows(
            QualityKind::Personalization,
            &rows,
            evaluation.overall_feedback,
        ))
    }
}

const PROPOSER_SYSTEM: &str = "\
You are an expert prompt engineer improving the instructions given to a
language model inside a flashcard pipeline. Propose alternative instructions
that keep the task and output format but differ in emphasis, structure, or
the criteria they stress. Each proposal must stand alone.";

/// Characters of each example input shown to the proposer.
const PROPOSER_SAMPLE_CHARS: usize = 600;

#[derive(Debug, Deserialize)]
struct Proposals {
    instructions: Vec<String>,
}

/// [`InstructionProposer`] that asks the model for instruction variants.
pub struct LlmInstructionProposer {
    backend: Arc<dyn ChatBackend>,
}

impl LlmInstructionProposer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl InstructionProposer for LlmInstructionProposer {
    async fn propose(
        &self,
        baseline: &PromptConfiguration,
        examples: &[&EvaluationExample],
        count: usize,
    ) -> Result<Vec<String>, BackendError> {
        let samples = examples
            .iter()
            .filter_map(|e| e.demo_for(baseline.role()))
            .take(3)
            .enumerate()
            .map(|(i, demo)| {
                format!(
                    "Sample input {}:\n{}",
                    i + 1,
                    excerpt(&demo.input, PROPOSER_SAMPLE_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut user = format!(
            "Role: {}\n\nCurrent instructions:\n{}\n\n",
            baseline.role(),
            baseline.instructions()
        );
        if !samples.is_empty() {
            user.push_str(&format!("Inputs this role receives:\n{samples}\n\n"));
        }
        user.push_str(&format!("Propose {count} alternative instructions."));

        debug!(role = %baseline.role(), count, "Requesting instruction proposals");
        let text = self
            .backend
            .complete_structured(StructuredRequest::new(
                "instruction_proposals",
                object_schema(json!({"instructions": string_array()})),
                PROPOSER_SYSTEM,
                user,
            ))
            .await?;
        let proposals: Proposals = parse("instruction_proposals", &text)?;
        if proposals.instructions.is_empty() {
            return Err(BackendError::malformed(
                "instruction_proposals",
                "no instructions proposed",
            ));
        }
        Ok(proposals.instructions.into_iter().take(count).collect())
    }
}

/// The model-backed roles, sharing one backend.
pub struct LlmRoles {
    pub generator: Arc<dyn Generator>,
    pub scorer: Arc<dyn Scorer>,
    pub proposer: Arc<dyn InstructionProposer>,
}

/// Build every model-backed role from configuration. When `source` is given
/// the scorer judges accuracy against its first `excerpt_chars` characters.
pub fn create_roles(
    config: &LlmConfig,
    source: Option<&str>,
    excerpt_chars: usize,
) -> Result<LlmRoles, BackendError> {
    let backend = create_backend(config)?;
    let mut scorer = LlmScorer::new(backend.clone());
    if let Some(source) = source {
        scorer = scorer.with_source(source, excerpt_chars);
    }
    Ok(LlmRoles {
        generator: Arc::new(LlmGenerator::new(backend.clone())),
        scorer: Arc::new(scorer),
        proposer: Arc::new(LlmInstructionProposer::new(backend)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChatBackend;
    use crate::prompts::{FewShotDemo, PromptRole};
    use crate::types::{DifficultyRating, Flashcard};
    use pretty_assertions::assert_eq;

    fn deck() -> FlashcardSet {
        FlashcardSet::new(vec![
            Flashcard::new("What does TCP guarantee?", "Ordered, reliable delivery"),
            Flashcard::new("What is a port?", "A 16-bit endpoint number"),
        ])
    }

    #[tokio::test]
    async fn test_critique_parses_and_uses_prompt() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(
            r#"{"is_acceptable": false, "feedback": "Too broad", "issues": ["Card 1 is vague", "Card 1 is vague"]}"#,
        );
        let generator = LlmGenerator::new(backend.clone());
        let prompt = PromptConfiguration::baseline(PromptRole::Critique)
            .derive(None, vec![FewShotDemo::new("1. Q: x | A: y", "{\"is_acceptable\": true}")]);

        let critique = generator.critique(&deck(), &prompt).await.unwrap();
        assert!(!critique.is_acceptable);
        assert_eq!(critique.issues.len(), 1);

        let requests = backend.requests();
        assert_eq!(requests[0].schema_name, "critique");
        assert!(requests[0].system.contains("Example input:"));
        assert!(requests[0].user.contains("1. Q: What does TCP guarantee?"));
    }

    #[tokio::test]
    async fn test_malformed_json_maps_to_malformed_output() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(r#"{"feedback": "missing verdict"}"#);
        let generator = LlmGenerator::new(backend);
        let prompt = PromptConfiguration::baseline(PromptRole::Critique);
        let err = generator.critique(&deck(), &prompt).await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_revise_rejects_empty_revision() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(r#"{"flashcards": []}"#);
        let generator = LlmGenerator::new(backend);
        let prompt = PromptConfiguration::baseline(PromptRole::Revise);
        let critique = CritiqueReport::rejected("Split card 1", ["Card 1 covers two ideas"]);
        let err = generator.revise(&deck(), &critique, &prompt).await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_analyze_gaps_prompt_lists_difficulty() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(
            r#"{"strong_areas": [], "weak_areas": ["ports"], "critical_gaps": ["TCP"], "recommendations": [], "gap_report": "Review TCP"}"#,
        );
        let generator = LlmGenerator::new(backend.clone());
        let session = StudySessionResult::from_pairs(vec![
            (deck().cards()[0].clone(), DifficultyRating::try_from(5).unwrap()),
            (deck().cards()[1].clone(), DifficultyRating::try_from(3).unwrap()),
        ]);
        let gaps = generator.analyze_gaps(&session).await.unwrap();
        assert_eq!(gaps.critical_gaps, vec!["TCP".to_string()]);
        let user = &backend.requests()[0].user;
        assert!(user.contains("Card 1 (Difficulty: 5/5)"));
        assert!(user.contains("Rating distribution: 1: 0, 2: 0, 3: 1, 4: 0, 5: 1"));
    }

    #[tokio::test]
    async fn test_deck_scores_averaged_locally() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(
            r#"{"card_evaluations": [
                {"card_number": 1, "atomicity": 9, "clarity": 8, "learning_value": 6, "accuracy": 10, "feedback": ""},
                {"card_number": 2, "atomicity": 7, "clarity": 6, "learning_value": 4, "accuracy": 8, "feedback": ""}
            ], "overall_feedback": "Solid"}"#,
        );
        let scorer = LlmScorer::new(backend.clone()).with_source("TCP notes", 5000);
        let report = scorer.evaluate_deck(&deck()).await.unwrap();
        assert_eq!(report.sub_metric("atomicity"), Some(8.0));
        assert_eq!(report.sub_metric("learning_value"), Some(5.0));
        assert!((report.overall_deck_score() - 7.25).abs() < 1e-9);
        assert!(backend.requests()[0].user.contains("SOURCE MATERIAL:\nTCP notes"));
    }

    #[tokio::test]
    async fn test_empty_deck_scored_without_call() {
        let backend = Arc::new(MockChatBackend::new());
        let scorer = LlmScorer::new(backend.clone());
        let report = scorer.evaluate_deck(&FlashcardSet::default()).await.unwrap();
        assert_eq!(report.overall_deck_score(), 0.0);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_adaptation_omits_metric_without_items() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(
            r#"{"gap_evaluations": [{"gap": "TCP", "personalization_score": 8, "feedback": ""}],
                "removal_evaluations": [{"question": "stray", "personalization_score": 1, "feedback": ""}],
                "overall_feedback": "Good targeting"}"#,
        );
        let scorer = LlmScorer::new(backend);
        let update = AdaptiveUpdate {
            original_set: deck(),
            removed: FlashcardSet::default(),
            added: FlashcardSet::new(vec![Flashcard::new("Why is TCP ordered?", "Sequence numbers")]),
            final_set: deck(),
            gaps: KnowledgeGapAnalysis {
                critical_gaps: vec!["TCP".into()],
                ..Default::default()
            },
        };
        let report = scorer.evaluate_adaptation(&update).await.unwrap();
        assert_eq!(report.sub_metric("removal_effectiveness"), None);
        assert_eq!(report.overall_personalization(), 8.0);
    }

    #[tokio::test]
    async fn test_proposer_caps_and_shows_samples() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(r#"{"instructions": ["Be strict.", "Be terse.", "Be kind."]}"#);
        let example = EvaluationExample {
            initial: Some(deck()),
            ..Default::default()
        };
        let proposer = LlmInstructionProposer::new(backend.clone());
        let baseline = PromptConfiguration::baseline(PromptRole::Critique);
        let proposals = proposer.propose(&baseline, &[&example], 2).await;
        // Critique demos need a recorded critique, so no samples are shown.
        assert_eq!(proposals.unwrap(), vec!["Be strict.".to_string(), "Be terse.".to_string()]);
        let request = &backend.requests()[0];
        assert_eq!(request.schema_name, "instruction_proposals");
        assert!(request.user.contains("Propose 2 alternative instructions."));
        assert!(!request.user.contains("Sample input"));
    }

    #[tokio::test]
    async fn test_proposer_rejects_empty_list() {
        let backend = Arc::new(MockChatBackend::new());
        backend.queue_json(r#"{"instructions": []}"#);
        let proposer = LlmInstructionProposer::new(backend);
        let baseline = PromptConfiguration::baseline(PromptRole::Adapt);
        let err = proposer.propose(&baseline, &[], 3).await.unwrap_err();
        assert!(err.is_malformed());
    }
}
