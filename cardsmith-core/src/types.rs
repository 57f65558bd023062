//! Fundamental types for flashcard decks, critiques, quality reports, and
//! study sessions.
//!
//! Cards have no stable identifier. Everything that compares, removes, or
//! merges cards goes through [`CardKey`], a hash of the normalized card text,
//! so reformatting between pipeline stages does not duplicate or drop cards.

use crate::error::EngineError;
use crate::scoring;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

/// Separator placed between question and answer before hashing.
const KEY_SEPARATOR: char = '\u{1f}';

/// A single question/answer card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

impl Flashcard {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// Structural identity of this card.
    pub fn key(&self) -> CardKey {
        CardKey::of(&self.question, &self.answer)
    }
}

/// Value-equality key for a [`Flashcard`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardKey(String);

impl CardKey {
    /// Hash the whitespace-collapsed, lower-cased question and answer.
    pub fn of(question: &str, answer: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_text(question).as_bytes());
        hasher.update(KEY_SEPARATOR.to_string().as_bytes());
        hasher.update(normalize_text(answer).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// An ordered deck of cards.
///
/// Sets are never edited in place once produced; every operation returns a
/// new set. Serializes as `{"flashcards": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardSet {
    flashcards: Vec<Flashcard>,
}

impl FlashcardSet {
    pub fn new(flashcards: Vec<Flashcard>) -> Self {
        Self { flashcards }
    }

    pub fn cards(&self) -> &[Flashcard] {
        &self.flashcards
    }

    pub fn len(&self) -> usize {
        self.flashcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flashcards.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Flashcard> {
        self.flashcards.iter()
    }

    pub fn keys(&self) -> HashSet<CardKey> {
        self.flashcards.iter().map(Flashcard::key).collect()
    }

    pub fn contains(&self, card: &Flashcard) -> bool {
        let key = card.key();
        self.flashcards.iter().any(|c| c.key() == key)
    }

    /// Drop structural duplicates, keeping the first occurrence.
    pub fn dedup(&self) -> FlashcardSet {
        let mut seen = HashSet::new();
        self.flashcards
            .iter()
            .filter(|c| seen.insert(c.key()))
            .cloned()
            .collect()
    }

    /// A new set without any card whose key is in `keys`.
    pub fn without(&self, keys: &HashSet<CardKey>) -> FlashcardSet {
        self.flashcards
            .iter()
            .filter(|c| !keys.contains(&c.key()))
            .cloned()
            .collect()
    }

    /// Set union. Cards from `other` replace colliding cards from `self`
    /// and are appended after the surviving cards of `self`.
    pub fn union(&self, other: &FlashcardSet) -> FlashcardSet {
        let replaced = other.keys();
        let mut merged: Vec<Flashcard> = self.without(&replaced).dedup().flashcards;
        merged.extend(other.dedup().flashcards);
        FlashcardSet::new(merged)
    }

    /// Whether both sets contain exactly the same cards, ignoring order and
    /// duplicates.
    pub fn same_cards(&self, other: &FlashcardSet) -> bool {
        self.keys() == other.keys()
    }

    /// Render as `"1. Q: ... | A: ..."` lines.
    pub fn render_numbered(&self) -> String {
        self.flashcards
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. Q: {} | A: {}", i + 1, c.question, c.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<Vec<Flashcard>> for FlashcardSet {
    fn from(flashcards: Vec<Flashcard>) -> Self {
        Self::new(flashcards)
    }
}

impl FromIterator<Flashcard> for FlashcardSet {
    fn from_iter<I: IntoIterator<Item = Flashcard>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FlashcardSet {
    type Item = &'a Flashcard;
    type IntoIter = std::slice::Iter<'a, Flashcard>;

    fn into_iter(self) -> Self::IntoIter {
        self.flashcards.iter()
    }
}

/// Verdict of one critique pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueReport {
    pub is_acceptable: bool,
    pub feedback: String,
    #[serde(default)]
    pub issues: BTreeSet<String>,
}

impl CritiqueReport {
    pub fn accepted(feedback: impl Into<String>) -> Self {
        Self {
            is_acceptable: true,
            feedback: feedback.into(),
            issues: BTreeSet::new(),
        }
    }

    pub fn rejected<I, S>(feedback: impl Into<String>, issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_acceptable: false,
            feedback: feedback.into(),
            issues: issues.into_iter().map(Into::into).collect(),
        }
    }
}

/// Deck-quality metric names.
pub const DECK_METRICS: [&str; 4] = ["atomicity", "clarity", "learning_value", "accuracy"];

/// Personalization metric names.
pub const PERSONALIZATION_METRICS: [&str; 2] =
    ["gap_filling_effectiveness", "removal_effectiveness"];

/// What a [`QualityReport`] measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityKind {
    Deck,
    Personalization,
}

/// Sub-metric scores in `[0, 10]` plus their unweighted mean.
///
/// Only constructible through [`QualityReport::from_sub_metrics`]; the
/// deserializer recomputes `overall_score` as well, so
/// `overall_score == mean(sub_metrics)` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QualityReportRecord")]
pub struct QualityReport {
    kind: QualityKind,
    sub_metrics: BTreeMap<String, f64>,
    overall_score: f64,
    #[serde(default)]
    feedback: String,
}

#[derive(Deserialize)]
struct QualityReportRecord {
    kind: QualityKind,
    sub_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    feedback: String,
}

impl From<QualityReportRecord> for QualityReport {
    fn from(record: QualityReportRecord) -> Self {
        QualityReport::from_sub_metrics(record.kind, record.sub_metrics, record.feedback)
    }
}

impl QualityReport {
    pub fn from_sub_metrics<I, S>(kind: QualityKind, metrics: I, feedback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let sub_metrics: BTreeMap<String, f64> = metrics
            .into_iter()
            .map(|(name, score)| (name.into(), scoring::clamp_score(score)))
            .collect();
        let overall_score = scoring::mean(sub_metrics.values().copied());
        Self {
            kind,
            sub_metrics,
            overall_score,
            feedback: feedback.into(),
        }
    }

    pub fn kind(&self) -> QualityKind {
        self.kind
    }

    pub fn sub_metrics(&self) -> &BTreeMap<String, f64> {
        &self.sub_metrics
    }

    pub fn sub_metric(&self, name: &str) -> Option<f64> {
        self.sub_metrics.get(name).copied()
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    /// The overall score of a deck report.
    pub fn overall_deck_score(&self) -> f64 {
        self.overall_score
    }

    /// The overall score of a personalization report.
    pub fn overall_personalization(&self) -> f64 {
        self.overall_score
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    /// Overall score mapped from `[0, 10]` to `[0, 1]`.
    pub fn normalized(&self) -> f64 {
        scoring::normalize_to_unit(self.overall_score)
    }
}

/// A learner's self-rating for one card: 1 = mastered .. 5 = critical gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DifficultyRating(u8);

impl DifficultyRating {
    pub const MASTERED: DifficultyRating = DifficultyRating(1);
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn value(self) -> u8 {
        self.0
    }

    /// Fixed, total mapping from rating to performance bucket.
    pub fn bucket(self) -> PerformanceBucket {
        match self.0 {
            1 => PerformanceBucket::Mastered,
            2 | 3 => PerformanceBucket::Weak,
            _ => PerformanceBucket::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "know well",
            2 => "easy",
            3 => "moderate",
            4 => "difficult",
            _ => "very difficult",
        }
    }
}

impl TryFrom<u8> for DifficultyRating {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(EngineError::invalid(format!(
                "difficulty rating must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )))
        }
    }
}

impl From<DifficultyRating> for u8 {
    fn from(rating: DifficultyRating) -> Self {
        rating.0
    }
}

impl fmt::Display for DifficultyRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/5", self.0)
    }
}

/// Qualitative bucket a rating falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceBucket {
    /// Rated 1; candidate for removal.
    Mastered,
    /// Rated 2-3.
    Weak,
    /// Rated 4-5.
    Critical,
}

impl fmt::Display for PerformanceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceBucket::Mastered => write!(f, "mastered"),
            PerformanceBucket::Weak => write!(f, "weak"),
            PerformanceBucket::Critical => write!(f, "critical"),
        }
    }
}

/// One rating collected during a study session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRating {
    #[serde(rename = "flashcard_index")]
    pub card_index: usize,
    pub difficulty: DifficultyRating,
}

/// Raw study-session record as collected from the learner.
///
/// Not trusted to be complete; call [`StudySession::validate`] before any
/// analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySession {
    pub flashcards: Vec<Flashcard>,
    pub ratings: Vec<CardRating>,
    #[serde(default)]
    pub timestamp: String,
}

impl StudySession {
    /// Build a session rating `set[i]` with `ratings[i]`.
    pub fn from_ratings(set: &FlashcardSet, ratings: &[u8]) -> Result<Self, EngineError> {
        let ratings = ratings
            .iter()
            .enumerate()
            .map(|(card_index, &r)| {
                Ok(CardRating {
                    card_index,
                    difficulty: DifficultyRating::try_from(r)?,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Self {
            flashcards: set.cards().to_vec(),
            ratings,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn studied(&self) -> FlashcardSet {
        FlashcardSet::new(self.flashcards.clone())
    }

    /// Check that every studied card has exactly one rating.
    pub fn validate(&self) -> Result<StudySessionResult, EngineError> {
        let mut slots: Vec<Option<DifficultyRating>> = vec![None; self.flashcards.len()];
        for rating in &self.ratings {
            let slot = slots.get_mut(rating.card_index).ok_or_else(|| {
                EngineError::incomplete(format!(
                    "rating refers to card {} but only {} cards were studied",
                    rating.card_index + 1,
                    self.flashcards.len()
                ))
            })?;
            if slot.is_some() {
                return Err(EngineError::incomplete(format!(
                    "card {} was rated more than once",
                    rating.card_index + 1
                )));
            }
            *slot = Some(rating.difficulty);
        }

        let missing: Vec<String> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| (i + 1).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::incomplete(format!(
                "missing ratings for card(s) {}",
                missing.join(", ")
            )));
        }

        // Cards that share a key are one card to the rest of the pipeline, so
        // their ratings must agree. Agreeing copies collapse to the first.
        let mut seen: HashMap<CardKey, (usize, DifficultyRating)> = HashMap::new();
        let mut entries = Vec::with_capacity(self.flashcards.len());
        for (index, (card, slot)) in self.flashcards.iter().zip(slots).enumerate() {
            let Some(rating) = slot else { continue };
            match seen.get(&card.key()) {
                Some(&(first, earlier)) if earlier != rating => {
                    return Err(EngineError::invalid(format!(
                        "cards {} and {} are the same card but were rated {} and {}",
                        first + 1,
                        index + 1,
                        earlier,
                        rating
                    )));
                }
                Some(_) => continue,
                None => {
                    seen.insert(card.key(), (index, rating));
                    entries.push(RatedCard {
                        card: card.clone(),
                        rating,
                    });
                }
            }
        }
        Ok(StudySessionResult { entries })
    }
}

/// A studied card paired with its rating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatedCard {
    pub card: Flashcard,
    pub rating: DifficultyRating,
}

/// A complete study session: every studied card has exactly one rating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySessionResult {
    entries: Vec<RatedCard>,
}

impl StudySessionResult {
    pub fn from_pairs(pairs: Vec<(Flashcard, DifficultyRating)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(card, rating)| RatedCard { card, rating })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[RatedCard] {
        &self.entries
    }

    pub fn studied_set(&self) -> FlashcardSet {
        self.entries.iter().map(|e| e.card.clone()).collect()
    }

    pub fn cards_in(&self, bucket: PerformanceBucket) -> FlashcardSet {
        self.entries
            .iter()
            .filter(|e| e.rating.bucket() == bucket)
            .map(|e| e.card.clone())
            .collect()
    }

    pub fn distribution(&self) -> RatingDistribution {
        let mut counts = [0usize; 5];
        for entry in &self.entries {
            counts[usize::from(entry.rating.value() - 1)] += 1;
        }
        RatingDistribution { counts }
    }
}

/// Number of cards per rating value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDistribution {
    counts: [usize; 5],
}

impl RatingDistribution {
    pub fn count(&self, rating: DifficultyRating) -> usize {
        self.counts[usize::from(rating.value() - 1)]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

impl fmt::Display for RatingDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .counts
            .iter()
            .enumerate()
            .map(|(i, n)| format!("{}: {}", i + 1, n))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Qualitative performance summary produced by the gap-analysis role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGapAnalysis {
    #[serde(default)]
    pub strong_areas: Vec<String>,
    #[serde(default)]
    pub weak_areas: Vec<String>,
    #[serde(default)]
    pub critical_gaps: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub gap_report: String,
}

impl KnowledgeGapAnalysis {
    /// Areas that gap-filling cards should target.
    pub fn targeted_areas(&self, include_weak_areas: bool) -> Vec<String> {
        let mut areas = self.critical_gaps.clone();
        if include_weak_areas {
            areas.extend(self.weak_areas.iter().cloned());
        }
        areas
    }
}

/// Deck delta computed from a study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveUpdate {
    pub original_set: FlashcardSet,
    pub removed: FlashcardSet,
    pub added: FlashcardSet,
    pub final_set: FlashcardSet,
    #[serde(default)]
    pub gaps: KnowledgeGapAnalysis,
}

impl AdaptiveUpdate {
    /// `final_set == (original_set - removed) ∪ added`, by card key.
    pub fn satisfies_invariant(&self) -> bool {
        let removed = self.removed.keys();
        let mut expected: HashSet<CardKey> = self
            .original_set
            .keys()
            .into_iter()
            .filter(|k| !removed.contains(k))
            .collect();
        expected.extend(self.added.keys());
        expected == self.final_set.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn card(q: &str, a: &str) -> Flashcard {
        Flashcard::new(q, a)
    }

    #[test]
    fn test_card_key_ignores_case_and_spacing() {
        let a = card("What is  a monad?", "A monoid in the category of endofunctors");
        let b = card("what is a monad?", "A monoid  in the category of\nendofunctors ");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), card("What is a functor?", "A mapping").key());
    }

    #[test]
    fn test_card_key_separates_fields() {
        let a = card("ab", "c");
        let b = card("a", "bc");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_union_replaces_colliding_cards() {
        let base = FlashcardSet::new(vec![card("Q1", "A1"), card("Q2", "A2")]);
        let extra = FlashcardSet::new(vec![card("q2", "a2"), card("Q3", "A3")]);
        let merged = base.union(&extra);
        assert_eq!(merged.len(), 3);
        // Colliding card comes from `extra`, after the survivors of `base`.
        assert_eq!(merged.cards()[0].question, "Q1");
        assert_eq!(merged.cards()[1].question, "q2");
        assert_eq!(merged.cards()[2].question, "Q3");
    }

    #[test]
    fn test_without_and_dedup() {
        let set = FlashcardSet::new(vec![card("Q1", "A1"), card("Q1", "A1"), card("Q2", "A2")]);
        assert_eq!(set.dedup().len(), 2);
        let removed: HashSet<CardKey> = [card("q1", "a1").key()].into_iter().collect();
        let remaining = set.without(&removed);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.cards()[0].question, "Q2");
        // The source set is untouched.
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_render_numbered() {
        let set = FlashcardSet::new(vec![card("Q1", "A1"), card("Q2", "A2")]);
        assert_eq!(set.render_numbered(), "1. Q: Q1 | A: A1\n2. Q: Q2 | A: A2");
    }

    #[test]
    fn test_flashcard_set_json_shape() {
        let set = FlashcardSet::new(vec![card("Q", "A")]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["flashcards"][0]["question"], "Q");
        let back: FlashcardSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_quality_report_mean() {
        let report = QualityReport::from_sub_metrics(
            QualityKind::Deck,
            [("atomicity", 8.0), ("clarity", 6.0), ("learning_value", 7.0), ("accuracy", 9.0)],
            "",
        );
        assert!((report.overall_score() - 7.5).abs() < 1e-9);
        assert!((report.normalized() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_quality_report_clamps_scores() {
        let report = QualityReport::from_sub_metrics(
            QualityKind::Deck,
            [("clarity", 14.0), ("accuracy", -2.0)],
            "",
        );
        assert_eq!(report.sub_metric("clarity"), Some(10.0));
        assert_eq!(report.sub_metric("accuracy"), Some(0.0));
        assert!((report.overall_score() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_report_deserialize_recomputes_overall() {
        let json = r#"{
            "kind": "personalization",
            "sub_metrics": {"gap_filling_effectiveness": 8.0, "removal_effectiveness": 4.0},
            "overall_score": 1.0
        }"#;
        let report: QualityReport = serde_json::from_str(json).unwrap();
        assert!((report.overall_personalization() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_quality_report_scores_zero() {
        let report =
            QualityReport::from_sub_metrics(QualityKind::Personalization, Vec::<(String, f64)>::new(), "");
        assert_eq!(report.overall_score(), 0.0);
    }

    #[test]
    fn test_difficulty_rating_bounds() {
        assert!(DifficultyRating::try_from(0).is_err());
        assert!(DifficultyRating::try_from(6).is_err());
        for value in 1..=5 {
            assert!(DifficultyRating::try_from(value).is_ok());
        }
        let parsed: Result<DifficultyRating, _> = serde_json::from_str("7");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_bucket_mapping_is_total() {
        let buckets: Vec<PerformanceBucket> = (1..=5)
            .map(|v| DifficultyRating::try_from(v).unwrap().bucket())
            .collect();
        assert_eq!(
            buckets,
            vec![
                PerformanceBucket::Mastered,
                PerformanceBucket::Weak,
                PerformanceBucket::Weak,
                PerformanceBucket::Critical,
                PerformanceBucket::Critical,
            ]
        );
    }

    #[test]
    fn test_session_validate_complete() {
        let set = FlashcardSet::new(vec![card("Q1", "A1"), card("Q2", "A2")]);
        let session = StudySession::from_ratings(&set, &[1, 4]).unwrap();
        let result = session.validate().unwrap();
        assert_eq!(result.entries().len(), 2);
        assert_eq!(result.distribution().count(DifficultyRating::MASTERED), 1);
        assert_eq!(result.cards_in(PerformanceBucket::Critical).len(), 1);
    }

    #[test]
    fn test_session_validate_missing_rating() {
        let set = FlashcardSet::new(vec![card("Q1", "A1"), card("Q2", "A2"), card("Q3", "A3")]);
        let mut session = StudySession::from_ratings(&set, &[2, 2, 2]).unwrap();
        session.ratings.remove(1);
        let err = session.validate().unwrap_err();
        assert!(matches!(err, EngineError::IncompleteInput { .. }));
        assert!(err.to_string().contains("card(s) 2"));
    }

    #[test]
    fn test_session_validate_duplicate_and_out_of_range() {
        let set = FlashcardSet::new(vec![card("Q1", "A1")]);
        let mut session = StudySession::from_ratings(&set, &[3]).unwrap();
        session.ratings.push(session.ratings[0]);
        assert!(session.validate().is_err());

        let mut session = StudySession::from_ratings(&set, &[3]).unwrap();
        session.ratings[0].card_index = 4;
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_session_rejects_conflicting_ratings_for_same_card() {
        let set = FlashcardSet::new(vec![
            card("What is a monad?", "A monoid"),
            card("what is a  monad?", "a monoid"),
            card("Other", "Card"),
        ]);
        let session = StudySession::from_ratings(&set, &[1, 5, 3]).unwrap();
        let err = session.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
        assert!(err.to_string().contains("cards 1 and 2"));
    }

    #[test]
    fn test_session_collapses_agreeing_duplicates() {
        let set = FlashcardSet::new(vec![
            card("What is a monad?", "A monoid"),
            card("What is a monad? ", "A monoid"),
            card("Other", "Card"),
        ]);
        let session = StudySession::from_ratings(&set, &[4, 4, 1]).unwrap();
        let result = session.validate().unwrap();
        assert_eq!(result.entries().len(), 2);
        assert_eq!(result.entries()[0].card.question, "What is a monad?");
        assert_eq!(result.distribution().total(), 2);
        assert_eq!(result.cards_in(PerformanceBucket::Critical).len(), 1);
    }

    #[test]
    fn test_session_deserializes_original_format() {
        let json = r#"{
            "flashcards": [{"question": "Q1", "answer": "A1"}],
            "ratings": [{"flashcard_index": 0, "difficulty": 5}],
            "timestamp": "2024-11-01T12:00:00"
        }"#;
        let session: StudySession = serde_json::from_str(json).unwrap();
        let result = session.validate().unwrap();
        assert_eq!(result.entries()[0].rating.value(), 5);
    }

    #[test]
    fn test_targeted_areas() {
        let gaps = KnowledgeGapAnalysis {
            weak_areas: vec!["recursion".into()],
            critical_gaps: vec!["pointers".into()],
            ..Default::default()
        };
        assert_eq!(gaps.targeted_areas(false), vec!["pointers".to_string()]);
        assert_eq!(gaps.targeted_areas(true).len(), 2);
    }

    #[test]
    fn test_adaptive_update_invariant() {
        let original = FlashcardSet::new(vec![card("Q1", "A1"), card("Q2", "A2")]);
        let removed = FlashcardSet::new(vec![card("Q1", "A1")]);
        let added = FlashcardSet::new(vec![card("Q3", "A3")]);
        let good = AdaptiveUpdate {
            final_set: FlashcardSet::new(vec![card("Q2", "A2"), card("Q3", "A3")]),
            original_set: original.clone(),
            removed: removed.clone(),
            added: added.clone(),
            gaps: KnowledgeGapAnalysis::default(),
        };
        assert!(good.satisfies_invariant());

        let bad = AdaptiveUpdate {
            final_set: original.clone(),
            ..good
        };
        assert!(!bad.satisfies_invariant());
    }
}
