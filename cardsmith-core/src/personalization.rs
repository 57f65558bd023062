//! Adapting a deck to one learner's study session.
//!
//! Cards rated 1 are removed. Gap analysis is delegated to the generator and
//! treated as opaque; its critical gaps (and weak areas, when configured)
//! drive generation of new cards. The final deck is
//! `(original − removed) ∪ added`, with a new card replacing any original
//! card it collides with.

use crate::brain::{Generator, Scorer, retry_once};
use crate::config::PersonalizationConfig;
use crate::error::EngineError;
use crate::prompts::PromptSet;
use crate::types::{
    AdaptiveUpdate, FlashcardSet, KnowledgeGapAnalysis, PerformanceBucket, QualityReport,
    RatingDistribution, StudySession, StudySessionResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cards of a session grouped by performance bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub mastered: FlashcardSet,
    pub weak: FlashcardSet,
    pub critical: FlashcardSet,
    pub distribution: RatingDistribution,
}

impl Classification {
    pub fn from_session(session: &StudySessionResult) -> Self {
        Self {
            mastered: session.cards_in(PerformanceBucket::Mastered),
            weak: session.cards_in(PerformanceBucket::Weak),
            critical: session.cards_in(PerformanceBucket::Critical),
            distribution: session.distribution(),
        }
    }
}

/// Result of [`PersonalizationEngine::adapt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationOutcome {
    pub update: AdaptiveUpdate,
    pub classification: Classification,
    /// `None` when the scorer failed twice.
    pub report: Option<QualityReport>,
}

/// At most `max_chars` characters of `source`, with "..." appended when cut.
pub fn excerpt(source: &str, max_chars: usize) -> String {
    match source.char_indices().nth(max_chars) {
        Some((cut, _)) if max_chars > 0 => format!("{}...", &source[..cut]),
        Some(_) => String::new(),
        None => source.to_string(),
    }
}

/// Combine an original deck, the cards to remove, and new gap cards.
pub fn assemble_update(
    original: &FlashcardSet,
    mastered: &FlashcardSet,
    added: &FlashcardSet,
    gaps: KnowledgeGapAnalysis,
) -> AdaptiveUpdate {
    let removed = mastered.dedup();
    let final_set = original.without(&removed.keys()).union(added);
    AdaptiveUpdate {
        original_set: original.clone(),
        removed,
        added: added.dedup(),
        final_set,
        gaps,
    }
}

/// Turns a rated study session into an [`AdaptiveUpdate`].
pub struct PersonalizationEngine {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn Scorer>,
    prompts: PromptSet,
    config: PersonalizationConfig,
}

impl PersonalizationEngine {
    pub fn new(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn Scorer>,
        prompts: PromptSet,
        config: PersonalizationConfig,
    ) -> Self {
        Self {
            generator,
            scorer,
            prompts,
            config,
        }
    }

    /// Validate `session` and adapt the studied deck.
    pub async fn adapt(
        &self,
        session: &StudySession,
        source: &str,
    ) -> Result<AdaptationOutcome, EngineError> {
        let result = session.validate()?;
        self.adapt_result(&result, source).await
    }

    /// Adapt the deck of an already validated session.
    pub async fn adapt_result(
        &self,
        session: &StudySessionResult,
        source: &str,
    ) -> Result<AdaptationOutcome, EngineError> {
        let original = session.studied_set();
        let classification = Classification::from_session(session);
        info!(
            cards = original.len(),
            mastered = classification.mastered.len(),
            weak = classification.weak.len(),
            critical = classification.critical.len(),
            "Classified study session"
        );

        let gaps = retry_once("analyze_gaps", || self.generator.analyze_gaps(session)).await?;
        let areas = gaps.targeted_areas(self.config.include_weak_areas);

        let added = if areas.is_empty() {
            info!("No gaps identified, skipping gap-card generation");
            FlashcardSet::default()
        } else {
            let source_excerpt = excerpt(source, self.config.source_excerpt_chars);
            debug!(areas = areas.len(), excerpt_chars = source_excerpt.len(), "Generating gap cards");
            retry_once("generate_gap_cards", || {
                self.generator
                    .generate_gap_cards(&areas, &source_excerpt, &self.prompts.adapt)
            })
            .await?
        };

        let update = assemble_update(&original, &classification.mastered, &added, gaps);
        debug_assert!(update.satisfies_invariant());
        info!(
            removed = update.removed.len(),
            added = update.added.len(),
            final_cards = update.final_set.len(),
            "Assembled adaptive update"
        );

        let report = match retry_once("evaluate_adaptation", || {
            self.scorer.evaluate_adaptation(&update)
        })
        .await
        {
            Ok(report) => {
                info!(
                    score = report.overall_personalization(),
                    "Adaptation scored"
                );
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Adaptation could not be scored");
                None
            }
        };

        Ok(AdaptationOutcome {
            update,
            classification,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::mock::{MockGenerator, MockScorer};
    use crate::types::Flashcard;
    use pretty_assertions::assert_eq;

    fn deck(n: usize) -> FlashcardSet {
        (1..=n)
            .map(|i| Flashcard::new(format!("Question {i}"), format!("Answer {i}")))
            .collect()
    }

    fn engine(generator: Arc<MockGenerator>, scorer: Arc<MockScorer>) -> PersonalizationEngine {
        PersonalizationEngine::new(
            generator,
            scorer,
            PromptSet::default(),
            PersonalizationConfig::default(),
        )
    }

    fn gaps(critical: &[&str], weak: &[&str]) -> KnowledgeGapAnalysis {
        KnowledgeGapAnalysis {
            critical_gaps: critical.iter().map(|s| s.to_string()).collect(),
            weak_areas: weak.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
        assert_eq!(excerpt("anything", 0), "");
    }

    #[test]
    fn test_assemble_update_gap_card_wins() {
        let original = deck(3);
        let mastered = FlashcardSet::new(vec![original.cards()[0].clone()]);
        let added = FlashcardSet::new(vec![
            Flashcard::new("question 2", "answer 2"),
            Flashcard::new("New", "Card"),
        ]);
        let update = assemble_update(&original, &mastered, &added, KnowledgeGapAnalysis::default());
        assert!(update.satisfies_invariant());
        assert_eq!(update.final_set.len(), 3);
        let texts: Vec<&str> = update.final_set.iter().map(|c| c.question.as_str()).collect();
        assert_eq!(texts, vec!["Question 3", "question 2", "New"]);
    }

    #[tokio::test]
    async fn test_incomplete_session_makes_no_calls() {
        let generator = Arc::new(MockGenerator::new());
        let scorer = Arc::new(MockScorer::new());
        let mut session = StudySession::from_ratings(&deck(3), &[1, 2, 3]).unwrap();
        session.ratings.pop();

        let err = engine(generator.clone(), scorer.clone())
            .adapt(&session, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompleteInput { .. }));
        assert_eq!(generator.analyze_gaps_calls(), 0);
        assert_eq!(scorer.adaptation_calls(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_ratings_for_same_card_rejected() {
        let generator = Arc::new(MockGenerator::new());
        let scorer = Arc::new(MockScorer::new());
        let studied = FlashcardSet::new(vec![
            Flashcard::new("What is a monad?", "A monoid"),
            Flashcard::new("what is a  monad?", "a monoid"),
            Flashcard::new("Other", "Card"),
        ]);
        let session = StudySession::from_ratings(&studied, &[1, 5, 3]).unwrap();

        let err = engine(generator.clone(), scorer.clone())
            .adapt(&session, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
        assert_eq!(generator.analyze_gaps_calls(), 0);
        assert_eq!(scorer.adaptation_calls(), 0);
    }

    #[tokio::test]
    async fn test_all_mastered_removes_everything() {
        let generator = Arc::new(MockGenerator::new());
        let session = StudySession::from_ratings(&deck(4), &[1, 1, 1, 1]).unwrap();
        let outcome = engine(generator.clone(), Arc::new(MockScorer::new()))
            .adapt(&session, "")
            .await
            .unwrap();
        assert!(outcome.update.removed.same_cards(&deck(4)));
        assert!(outcome.update.final_set.is_empty());
        assert_eq!(generator.gap_card_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_gaps_skips_generation() {
        let generator = Arc::new(MockGenerator::new());
        generator.queue_gaps(Ok(gaps(&[], &[])));
        let session = StudySession::from_ratings(&deck(3), &[3, 3, 3]).unwrap();
        let outcome = engine(generator.clone(), Arc::new(MockScorer::new()))
            .adapt(&session, "source")
            .await
            .unwrap();
        assert!(outcome.update.removed.is_empty());
        assert!(outcome.update.added.is_empty());
        assert_eq!(outcome.update.final_set, deck(3));
        assert_eq!(generator.gap_card_calls(), 0);
    }

    #[tokio::test]
    async fn test_weak_areas_excluded_when_disabled() {
        let generator = Arc::new(MockGenerator::new());
        generator.queue_gaps(Ok(gaps(&[], &["recursion"])));
        let session = StudySession::from_ratings(&deck(2), &[2, 3]).unwrap();
        let engine = PersonalizationEngine::new(
            generator.clone(),
            Arc::new(MockScorer::new()),
            PromptSet::default(),
            PersonalizationConfig {
                include_weak_areas: false,
                ..Default::default()
            },
        );
        engine.adapt(&session, "").await.unwrap();
        assert_eq!(generator.gap_card_calls(), 0);
    }

    #[tokio::test]
    async fn test_gap_cards_receive_areas_and_excerpt() {
        let generator = Arc::new(MockGenerator::new().with_gap_cards(|areas, excerpt, _| {
            assert_eq!(areas, ["pointers".to_string(), "recursion".to_string()]);
            assert!(excerpt.ends_with("..."));
            Ok(FlashcardSet::new(vec![Flashcard::new("What is a pointer?", "An address")]))
        }));
        generator.queue_gaps(Ok(gaps(&["pointers"], &["recursion"])));
        let session = StudySession::from_ratings(&deck(2), &[5, 2]).unwrap();
        let engine = PersonalizationEngine::new(
            generator.clone(),
            Arc::new(MockScorer::new()),
            PromptSet::default(),
            PersonalizationConfig {
                source_excerpt_chars: 10,
                ..Default::default()
            },
        );
        let outcome = engine.adapt(&session, &"x".repeat(50)).await.unwrap();
        assert_eq!(outcome.update.added.len(), 1);
        assert_eq!(outcome.update.final_set.len(), 3);
    }

    #[tokio::test]
    async fn test_analysis_failure_surfaces_after_retry() {
        let generator = Arc::new(MockGenerator::new());
        generator.queue_gaps(Err(BackendError::malformed("knowledge_gaps", "bad")));
        generator.queue_gaps(Err(BackendError::malformed("knowledge_gaps", "bad again")));
        let session = StudySession::from_ratings(&deck(2), &[4, 5]).unwrap();
        let err = engine(generator.clone(), Arc::new(MockScorer::new()))
            .adapt(&session, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
        assert_eq!(generator.analyze_gaps_calls(), 2);
    }

    #[tokio::test]
    async fn test_scorer_failure_yields_no_report() {
        let scorer = Arc::new(MockScorer::new().with_adaptation(|_| {
            Err(BackendError::Unavailable {
                message: "judge offline".into(),
            })
        }));
        let session = StudySession::from_ratings(&deck(2), &[1, 3]).unwrap();
        let outcome = engine(Arc::new(MockGenerator::new()), scorer.clone())
            .adapt(&session, "")
            .await
            .unwrap();
        assert!(outcome.report.is_none());
        assert_eq!(scorer.adaptation_calls(), 2);
        assert_eq!(outcome.update.removed.len(), 1);
    }
}
