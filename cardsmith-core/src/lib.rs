//! # Cardsmith Core
//!
//! Core library for the Cardsmith flashcard engine.
//! Provides the convergence loop that critiques and revises decks, the
//! personalization engine that adapts a deck to a study session, the prompt
//! optimizer, the LLM-backed roles (brain), configuration, and fundamental types.

pub mod brain;
pub mod config;
pub mod convergence;
pub mod dataset;
pub mod error;
pub mod export;
pub mod mock;
pub mod optimizer;
pub mod personalization;
pub mod prompts;
pub mod providers;
pub mod scoring;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Generator, Scorer};
pub use config::{CardsmithConfig, load_config};
pub use convergence::{ConvergenceLoop, ImprovementOutcome, ReturnPolicy, Termination};
pub use dataset::{EvaluationExample, RunRecorder, load_examples};
pub use error::{BackendError, ConfigError, EngineError, Result};
pub use mock::{MockGenerator, MockScorer};
pub use optimizer::{PromptOptimizer, SearchOutcome};
pub use personalization::{AdaptationOutcome, PersonalizationEngine};
pub use prompts::{PromptConfiguration, PromptRole, PromptSet, PromptStore};
pub use types::{
    AdaptiveUpdate, CritiqueReport, DifficultyRating, Flashcard, FlashcardSet,
    KnowledgeGapAnalysis, QualityReport, StudySession,
};
