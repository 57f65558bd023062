//! Brain module: the model-facing roles the engine drives.
//!
//! [`Generator`] has one method per generative role and [`Scorer`] one per
//! judging role. The engine only ever talks to these traits, so a language
//! model backend, a rule-based scorer, or the mocks in [`crate::mock`] are
//! interchangeable.

use crate::error::BackendError;
use crate::prompts::PromptConfiguration;
use crate::types::{
    AdaptiveUpdate, CritiqueReport, FlashcardSet, KnowledgeGapAnalysis, QualityReport,
    StudySessionResult,
};
use async_trait::async_trait;
use std::future::Future;
use tracing::warn;

/// Generative roles: deck creation, critique, revision, gap analysis, and
/// gap-filling.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce an initial deck from source text.
    async fn generate(&self, source: &str) -> Result<FlashcardSet, BackendError>;

    /// Judge a deck against pedagogical principles.
    async fn critique(
        &self,
        set: &FlashcardSet,
        prompt: &PromptConfiguration,
    ) -> Result<CritiqueReport, BackendError>;

    /// Rewrite a deck so the critique's issues are addressed.
    async fn revise(
        &self,
        set: &FlashcardSet,
        critique: &CritiqueReport,
        prompt: &PromptConfiguration,
    ) -> Result<FlashcardSet, BackendError>;

    /// Summarize a learner's performance into strong, weak, and critical areas.
    async fn analyze_gaps(
        &self,
        session: &StudySessionResult,
    ) -> Result<KnowledgeGapAnalysis, BackendError>;

    /// Produce new cards targeting `areas`, grounded in `source_excerpt`.
    async fn generate_gap_cards(
        &self,
        areas: &[String],
        source_excerpt: &str,
        prompt: &PromptConfiguration,
    ) -> Result<FlashcardSet, BackendError>;
}

/// Judging roles. Both return reports whose overall score is the mean of
/// their sub-metrics.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score a deck on atomicity, clarity, learning value, and accuracy.
    async fn evaluate_deck(&self, set: &FlashcardSet) -> Result<QualityReport, BackendError>;

    /// Score how well an adaptation filled gaps and pruned mastered cards.
    async fn evaluate_adaptation(
        &self,
        update: &AdaptiveUpdate,
    ) -> Result<QualityReport, BackendError>;
}

/// Run `op`, and run it a second time if the first attempt fails.
pub async fn retry_once<T, F, Fut>(step: &str, mut op: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(
                step,
                malformed = first.is_malformed(),
                error = %first,
                "Backend call failed, retrying once"
            );
            op().await
        }
    }
}
