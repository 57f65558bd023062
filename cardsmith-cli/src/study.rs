//! Interactive study session: show each card, reveal the answer, collect a
//! 1-5 difficulty rating.

use cardsmith_core::types::{DifficultyRating, FlashcardSet, StudySession};
use dialoguer::{Input, Select};
use std::path::{Path, PathBuf};

/// Menu entries, index `i` meaning rating `i + 1`.
pub fn rating_items() -> Vec<String> {
    (DifficultyRating::MIN..=DifficultyRating::MAX)
        .filter_map(|v| DifficultyRating::try_from(v).ok())
        .map(|r| format!("{} - {}", r.value(), r.label()))
        .collect()
}

/// Default session path: `study_session.json` next to the deck.
pub fn default_session_path(deck: &Path) -> PathBuf {
    deck.parent()
        .unwrap_or_else(|| Path::new("."))
        .join("study_session.json")
}

/// Walk through `deck` and return the rated session.
pub fn run(deck: &FlashcardSet) -> anyhow::Result<StudySession> {
    let items = rating_items();
    let mut ratings = Vec::with_capacity(deck.len());

    println!(
        "\n  Studying {} cards. Rate each one: 1 = know it well, 5 = very difficult.\n",
        deck.len()
    );
    for (i, card) in deck.iter().enumerate() {
        println!("  Card {}/{}", i + 1, deck.len());
        println!("  Q: {}", card.question);
        let _: String = Input::new()
            .with_prompt("Press Enter to reveal the answer")
            .allow_empty(true)
            .interact_text()?;
        println!("  A: {}\n", card.answer);

        let selection = Select::new()
            .with_prompt("How difficult was this card?")
            .items(&items)
            .default(2)
            .interact()?;
        ratings.push(selection as u8 + DifficultyRating::MIN);
        println!();
    }

    Ok(StudySession::from_ratings(deck, &ratings)?)
}
