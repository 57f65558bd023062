//! Scripted Generator, Scorer, ChatBackend, and InstructionProposer implementations.
//!
//! Each role has a queue of canned results. When a queue is empty the mock
//! falls back to a closure, which defaults to something benign (accept the
//! deck, return it unchanged, score it 7). Call counts are kept per role so
//! tests can assert on how often the engine reached the backend.

use crate::brain::{Generator, Scorer};
use crate::dataset::EvaluationExample;
use crate::error::BackendError;
use crate::optimizer::InstructionProposer;
use crate::prompts::{PromptConfiguration, PromptRole};
use crate::providers::{ChatBackend, StructuredRequest};
use crate::types::{
    AdaptiveUpdate, CritiqueReport, DECK_METRICS, FlashcardSet, KnowledgeGapAnalysis,
    PERSONALIZATION_METRICS, QualityKind, QualityReport, StudySessionResult,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

type CritiqueFn =
    dyn Fn(&FlashcardSet, &PromptConfiguration) -> Result<CritiqueReport, BackendError> + Send + Sync;
type ReviseFn = dyn Fn(&FlashcardSet, &CritiqueReport, &PromptConfiguration) -> Result<FlashcardSet, BackendError>
    + Send
    + Sync;
type GapsFn = dyn Fn(&StudySessionResult) -> Result<KnowledgeGapAnalysis, BackendError> + Send + Sync;
type GapCardsFn =
    dyn Fn(&[String], &str, &PromptConfiguration) -> Result<FlashcardSet, BackendError> + Send + Sync;
type GenerateFn = dyn Fn(&str) -> Result<FlashcardSet, BackendError> + Send + Sync;
type DeckFn = dyn Fn(&FlashcardSet) -> Result<QualityReport, BackendError> + Send + Sync;
type AdaptationFn = dyn Fn(&AdaptiveUpdate) -> Result<QualityReport, BackendError> + Send + Sync;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queued results for one role plus the fallback used once they run out.
struct Script<T, F: ?Sized> {
    queue: Mutex<VecDeque<Result<T, BackendError>>>,
    fallback: Box<F>,
    calls: AtomicUsize,
}

impl<T, F: ?Sized> Script<T, F> {
    fn new(fallback: Box<F>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    fn push(&self, result: Result<T, BackendError>) {
        lock(&self.queue).push_back(result);
    }

    /// Count the call and pop the next queued result.
    fn next(&self) -> Option<Result<T, BackendError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.queue).pop_front()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A report with every deck metric set to `score`.
pub fn deck_report(score: f64) -> QualityReport {
    QualityReport::from_sub_metrics(
        QualityKind::Deck,
        DECK_METRICS.iter().map(|name| (*name, score)),
        "mock deck evaluation",
    )
}

/// A report with every personalization metric set to `score`.
pub fn personalization_report(score: f64) -> QualityReport {
    QualityReport::from_sub_metrics(
        QualityKind::Personalization,
        PERSONALIZATION_METRICS.iter().map(|name| (*name, score)),
        "mock adaptation evaluation",
    )
}

/// Scripted [`Generator`].
pub struct MockGenerator {
    generate: Script<FlashcardSet, GenerateFn>,
    critique: Script<CritiqueReport, CritiqueFn>,
    revise: Script<FlashcardSet, ReviseFn>,
    analyze_gaps: Script<KnowledgeGapAnalysis, GapsFn>,
    gap_cards: Script<FlashcardSet, GapCardsFn>,
    prompts_seen: Mutex<Vec<PromptConfiguration>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            generate: Script::new(Box::new(|_: &str| Ok(FlashcardSet::default()))),
            critique: Script::new(Box::new(|_: &FlashcardSet, _: &PromptConfiguration| {
                Ok(CritiqueReport::accepted("No issues found."))
            })),
            revise: Script::new(Box::new(
                |set: &FlashcardSet, _: &CritiqueReport, _: &PromptConfiguration| Ok(set.clone()),
            )),
            analyze_gaps: Script::new(Box::new(|_: &StudySessionResult| {
                Ok(KnowledgeGapAnalysis::default())
            })),
            gap_cards: Script::new(Box::new(|_: &[String], _: &str, _: &PromptConfiguration| {
                Ok(FlashcardSet::default())
            })),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_generate<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<FlashcardSet, BackendError> + Send + Sync + 'static,
    {
        self.generate.fallback = Box::new(f);
        self
    }

    pub fn with_critique<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlashcardSet, &PromptConfiguration) -> Result<CritiqueReport, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.critique.fallback = Box::new(f);
        self
    }

    pub fn with_revise<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlashcardSet, &CritiqueReport, &PromptConfiguration) -> Result<FlashcardSet, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.revise.fallback = Box::new(f);
        self
    }

    pub fn with_gaps<F>(mut self, f: F) -> Self
    where
        F: Fn(&StudySessionResult) -> Result<KnowledgeGapAnalysis, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.analyze_gaps.fallback = Box::new(f);
        self
    }

    pub fn with_gap_cards<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String], &str, &PromptConfiguration) -> Result<FlashcardSet, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.gap_cards.fallback = Box::new(f);
        self
    }

    pub fn queue_generate(&self, result: Result<FlashcardSet, BackendError>) {
        self.generate.push(result);
    }

    pub fn queue_critique(&self, result: Result<CritiqueReport, BackendError>) {
        self.critique.push(result);
    }

    pub fn queue_revision(&self, result: Result<FlashcardSet, BackendError>) {
        self.revise.push(result);
    }

    pub fn queue_gaps(&self, result: Result<KnowledgeGapAnalysis, BackendError>) {
        self.analyze_gaps.push(result);
    }

    pub fn queue_gap_cards(&self, result: Result<FlashcardSet, BackendError>) {
        self.gap_cards.push(result);
    }

    pub fn generate_calls(&self) -> usize {
        self.generate.calls()
    }

    pub fn critique_calls(&self) -> usize {
        self.critique.calls()
    }

    pub fn revise_calls(&self) -> usize {
        self.revise.calls()
    }

    pub fn analyze_gaps_calls(&self) -> usize {
        self.analyze_gaps.calls()
    }

    pub fn gap_card_calls(&self) -> usize {
        self.gap_cards.calls()
    }

    /// Instructions of every prompt passed for `role`, in call order.
    pub fn instructions_seen(&self, role: PromptRole) -> Vec<String> {
        lock(&self.prompts_seen)
            .iter()
            .filter(|p| p.role() == role)
            .map(|p| p.instructions().to_string())
            .collect()
    }

    fn record(&self, prompt: &PromptConfiguration) {
        lock(&self.prompts_seen).push(prompt.clone());
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, source: &str) -> Result<FlashcardSet, BackendError> {
        self.generate
            .next()
            .unwrap_or_else(|| (self.generate.fallback)(source))
    }

    async fn critique(
        &self,
        set: &FlashcardSet,
        prompt: &PromptConfiguration,
    ) -> Result<CritiqueReport, BackendError> {
        self.record(prompt);
        self.critique
            .next()
            .unwrap_or_else(|| (self.critique.fallback)(set, prompt))
    }

    async fn revise(
        &self,
        set: &FlashcardSet,
        critique: &CritiqueReport,
        prompt: &PromptConfiguration,
    ) -> Result<FlashcardSet, BackendError> {
        self.record(prompt);
        self.revise
            .next()
            .unwrap_or_else(|| (self.revise.fallback)(set, critique, prompt))
    }

    async fn analyze_gaps(
        &self,
        session: &StudySessionResult,
    ) -> Result<KnowledgeGapAnalysis, BackendError> {
        self.analyze_gaps
            .next()
            .unwrap_or_else(|| (self.analyze_gaps.fallback)(session))
    }

    async fn generate_gap_cards(
        &self,
        areas: &[String],
        source_excerpt: &str,
        prompt: &PromptConfiguration,
    ) -> Result<FlashcardSet, BackendError> {
        self.record(prompt);
        self.gap_cards
            .next()
            .unwrap_or_else(|| (self.gap_cards.fallback)(areas, source_excerpt, prompt))
    }
}

/// Scripted [`Scorer`].
pub struct MockScorer {
    deck: Script<QualityReport, DeckFn>,
    adaptation: Script<QualityReport, AdaptationFn>,
}

impl Default for MockScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScorer {
    /// Scores every deck and adaptation 7.0.
    pub fn new() -> Self {
        Self::with_score(7.0)
    }

    /// Scores every deck and adaptation `score`.
    pub fn with_score(score: f64) -> Self {
        Self {
            deck: Script::new(Box::new(move |_: &FlashcardSet| Ok(deck_report(score)))),
            adaptation: Script::new(Box::new(move |_: &AdaptiveUpdate| {
                Ok(personalization_report(score))
            })),
        }
    }

    pub fn with_deck<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlashcardSet) -> Result<QualityReport, BackendError> + Send + Sync + 'static,
    {
        self.deck.fallback = Box::new(f);
        self
    }

    pub fn with_adaptation<F>(mut self, f: F) -> Self
    where
        F: Fn(&AdaptiveUpdate) -> Result<QualityReport, BackendError> + Send + Sync + 'static,
    {
        self.adaptation.fallback = Box::new(f);
        self
    }

    pub fn queue_deck(&self, result: Result<QualityReport, BackendError>) {
        self.deck.push(result);
    }

    pub fn queue_adaptation(&self, result: Result<QualityReport, BackendError>) {
        self.adaptation.push(result);
    }

    pub fn deck_calls(&self) -> usize {
        self.deck.calls()
    }

    pub fn adaptation_calls(&self) -> usize {
        self.adaptation.calls()
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn evaluate_deck(&self, set: &FlashcardSet) -> Result<QualityReport, BackendError> {
        self.deck
            .next()
            .unwrap_or_else(|| (self.deck.fallback)(set))
    }

    async fn evaluate_adaptation(
        &self,
        update: &AdaptiveUpdate,
    ) -> Result<QualityReport, BackendError> {
        self.adaptation
            .next()
            .unwrap_or_else(|| (self.adaptation.fallback)(update))
    }
}

/// Scripted [`ChatBackend`] that records every request it receives.
pub struct MockChatBackend {
    model: String,
    responses: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<StructuredRequest>>,
}

impl Default for MockChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw JSON response body.
    pub fn queue_json(&self, json: impl Into<String>) {
        lock(&self.responses).push_back(Ok(json.into()));
    }

    pub fn queue_error(&self, error: BackendError) {
        lock(&self.responses).push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<StructuredRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn complete_structured(&self, request: StructuredRequest) -> Result<String, BackendError> {
        let schema = request.schema_name.clone();
        lock(&self.requests).push(request);
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Err(BackendError::Unavailable {
                message: format!("no queued mock response for '{schema}'"),
            })
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// [`InstructionProposer`] returning a fixed list, or always failing.
pub struct MockProposer {
    instructions: Option<Vec<String>>,
    calls: AtomicUsize,
}

impl MockProposer {
    pub fn new(instructions: Vec<String>) -> Self {
        Self {
            instructions: Some(instructions),
            calls: AtomicUsize::new(0),
        }
    }

    /// A proposer whose backend is down.
    pub fn failing() -> Self {
        Self {
            instructions: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstructionProposer for MockProposer {
    async fn propose(
        &self,
        _baseline: &PromptConfiguration,
        _examples: &[&EvaluationExample],
        count: usize,
    ) -> Result<Vec<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.instructions {
            Some(list) => Ok(list.iter().take(count).cloned().collect()),
            None => Err(BackendError::Unavailable {
                message: "proposer offline".into(),
            }),
        }
    }
}
