//! Per-example fitness of a candidate prompt configuration.
//!
//! Every fitness value lies in `[0, 1]`. Backend failures count as 0.0 and
//! are logged, never propagated, so one bad candidate cannot end a search.

use crate::brain::{Generator, Scorer};
use crate::config::PersonalizationConfig;
use crate::dataset::EvaluationExample;
use crate::error::EngineError;
use crate::personalization::{assemble_update, excerpt};
use crate::prompts::{PromptConfiguration, PromptRole, PromptSet};
use crate::scoring::MAX_SCORE;
use crate::types::{FlashcardSet, PerformanceBucket};
use std::sync::Arc;
use tracing::{debug, warn};

/// Deck score at which an accepted critique earns full fitness.
pub const ACCEPTANCE_THRESHOLD: f64 = 7.0;

/// Fitness of a critique that accepted a deck scoring `score`.
pub fn acceptance_fitness(score: f64) -> f64 {
    if score >= ACCEPTANCE_THRESHOLD { 1.0 } else { 0.5 }
}

/// Fitness of a revision that moved the deck score from `before` to `after`.
pub fn improvement_fitness(before: f64, after: f64) -> f64 {
    let delta = after - before;
    if delta > 0.0 {
        (0.5 + delta / 5.0).min(1.0)
    } else {
        (0.3 + delta / 5.0).max(0.0)
    }
}

/// Runs a candidate configuration against recorded examples.
pub struct FitnessEvaluator {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn Scorer>,
    baseline: PromptSet,
    personalization: PersonalizationConfig,
}

impl FitnessEvaluator {
    pub fn new(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn Scorer>,
        baseline: PromptSet,
        personalization: PersonalizationConfig,
    ) -> Self {
        Self {
            generator,
            scorer,
            baseline,
            personalization,
        }
    }

    /// Baseline configurations used for the roles not under search.
    pub fn baseline(&self) -> &PromptSet {
        &self.baseline
    }

    /// Fitness of `candidate` on `example`, 0.0 on any failure.
    pub async fn evaluate(&self, candidate: &PromptConfiguration, example: &EvaluationExample) -> f64 {
        match self.try_evaluate(candidate, example).await {
            Ok(fitness) => {
                debug!(
                    role = %candidate.role(),
                    example = %example.name,
                    fitness,
                    "Candidate evaluated"
                );
                fitness.clamp(0.0, 1.0)
            }
            Err(e) => {
                warn!(
                    role = %candidate.role(),
                    example = %example.name,
                    error = %e,
                    "Candidate evaluation failed, scoring 0"
                );
                0.0
            }
        }
    }

    async fn try_evaluate(
        &self,
        candidate: &PromptConfiguration,
        example: &EvaluationExample,
    ) -> Result<f64, EngineError> {
        match candidate.role() {
            PromptRole::Critique => self.critique_fitness(candidate, deck_of(example)?).await,
            PromptRole::Revise => self.revise_fitness(candidate, deck_of(example)?).await,
            PromptRole::Adapt => self.adapt_fitness(candidate, example).await,
        }
    }

    async fn critique_fitness(
        &self,
        candidate: &PromptConfiguration,
        deck: &FlashcardSet,
    ) -> Result<f64, EngineError> {
        let critique = self.generator.critique(deck, candidate).await?;
        let before = self.scorer.evaluate_deck(deck).await?.overall_deck_score();
        if critique.is_acceptable {
            return Ok(acceptance_fitness(before));
        }
        let revised = self
            .generator
            .revise(deck, &critique, &self.baseline.revise)
            .await?;
        let after = self.scorer.evaluate_deck(&revised).await?.overall_deck_score();
        Ok(improvement_fitness(before, after))
    }

    /// The candidate revises even when the baseline critique accepts, so
    /// every example exercises it.
    async fn revise_fitness(
        &self,
        candidate: &PromptConfiguration,
        deck: &FlashcardSet,
    ) -> Result<f64, EngineError> {
        let critique = self.generator.critique(deck, &self.baseline.critique).await?;
        let revised = self.generator.revise(deck, &critique, candidate).await?;
        let before = self.scorer.evaluate_deck(deck).await?.overall_deck_score();
        let after = self.scorer.evaluate_deck(&revised).await?.overall_deck_score();
        Ok(improvement_fitness(before, after))
    }

    async fn adapt_fitness(
        &self,
        candidate: &PromptConfiguration,
        example: &EvaluationExample,
    ) -> Result<f64, EngineError> {
        let (Some(session), Some(gaps)) = (&example.session, &example.gaps) else {
            return Err(EngineError::incomplete(format!(
                "example '{}' has no recorded session or gaps",
                example.name
            )));
        };
        let result = session.validate()?;
        let areas = gaps.targeted_areas(self.personalization.include_weak_areas);
        let source = excerpt(example.source(), self.personalization.source_excerpt_chars);
        let added = self
            .generator
            .generate_gap_cards(&areas, &source, candidate)
            .await?;
        if added.is_empty() {
            return Ok(0.0);
        }
        let update = assemble_update(
            &result.studied_set(),
            &result.cards_in(PerformanceBucket::Mastered),
            &added,
            gaps.clone(),
        );
        let report = self.scorer.evaluate_adaptation(&update).await?;
        Ok(report.overall_personalization() / MAX_SCORE)
    }
}

fn deck_of(example: &EvaluationExample) -> Result<&FlashcardSet, EngineError> {
    example
        .initial
        .as_ref()
        .filter(|set| !set.is_empty())
        .ok_or_else(|| EngineError::incomplete(format!("example '{}' has no deck", example.name)))
}
