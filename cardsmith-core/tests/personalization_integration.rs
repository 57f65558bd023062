//! Integration tests for adapting a deck to a study session.

use cardsmith_core::config::PersonalizationConfig;
use cardsmith_core::mock::{MockGenerator, MockScorer};
use cardsmith_core::personalization::PersonalizationEngine;
use cardsmith_core::prompts::PromptSet;
use cardsmith_core::types::{Flashcard, FlashcardSet, KnowledgeGapAnalysis, StudySession};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn deck(n: usize) -> FlashcardSet {
    (1..=n)
        .map(|i| Flashcard::new(format!("Concept {i}?"), format!("Explanation {i}")))
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

#[tokio::test]
async fn test_fifteen_card_session() {
    let original = deck(15);
    let ratings = [1, 1, 1, 2, 2, 3, 3, 4, 4, 4, 5, 5, 2, 3, 1];
    let session = StudySession::from_ratings(&original, &ratings).unwrap();

    let generator = Arc::new(MockGenerator::new());
    generator.queue_gaps(Ok(KnowledgeGapAnalysis {
        weak_areas: vec!["Concept 4 details".into()],
        critical_gaps: vec!["Concept 8 prerequisites".into(), "Concept 11 misconception".into()],
        gap_report: "Several prerequisites are missing.".into(),
        ..Default::default()
    }));
    generator.queue_gap_cards(Ok(FlashcardSet::new(vec![
        Flashcard::new("What does Concept 8 build on?", "Concept 7"),
        Flashcard::new("Why is Concept 11 not X?", "Because Y"),
        Flashcard::new("Detail of Concept 4?", "Z"),
    ])));
    let scorer = Arc::new(MockScorer::with_score(8.0));

    let outcome = engine(generator.clone(), scorer.clone())
        .adapt(&session, "Concept notes")
        .await
        .unwrap();
    let update = &outcome.update;

    let expected_removed: FlashcardSet = [0, 1, 2, 14]
        .iter()
        .map(|&i| original.cards()[i].clone())
        .collect();
    assert!(update.removed.same_cards(&expected_removed));
    assert!(!update.gaps.critical_gaps.is_empty());
    assert_eq!(update.final_set.len(), 15 - 4 + update.added.len());
    assert!(update.satisfies_invariant());
    assert_eq!(outcome.classification.critical.len(), 5);
    assert_eq!(outcome.classification.weak.len(), 6);
    assert_eq!(outcome.report.map(|r| r.overall_personalization()), Some(8.0));
    assert_eq!(generator.gap_card_calls(), 1);
    assert_eq!(scorer.adaptation_calls(), 1);
}

#[tokio::test]
async fn test_all_mastered() {
    let original = deck(6);
    let session = StudySession::from_ratings(&original, &[1; 6]).unwrap();
    let outcome = engine(Arc::new(MockGenerator::new()), Arc::new(MockScorer::new()))
        .adapt(&session, "")
        .await
        .unwrap();
    assert!(outcome.update.removed.same_cards(&original));
    assert!(outcome.update.final_set.is_empty());
}

#[tokio::test]
async fn test_nothing_mastered() {
    let original = deck(4);
    let session = StudySession::from_ratings(&original, &[2, 3, 4, 5]).unwrap();
    let outcome = engine(Arc::new(MockGenerator::new()), Arc::new(MockScorer::new()))
        .adapt(&session, "")
        .await
        .unwrap();
    assert!(outcome.update.removed.is_empty());
    assert_eq!(outcome.update.final_set, original);
}

#[tokio::test]
async fn test_session_survives_json_round_trip_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study_session.json");
    let session = StudySession::from_ratings(&deck(3), &[1, 4, 2]).unwrap();
    std::fs::write(&path, serde_json::to_string_pretty(&session).unwrap()).unwrap();

    let loaded: StudySession =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let outcome = engine(Arc::new(MockGenerator::new()), Arc::new(MockScorer::new()))
        .adapt(&loaded, "")
        .await
        .unwrap();
    assert_eq!(outcome.update.removed.len(), 1);
}
