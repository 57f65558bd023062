//! Critique → revise loop.
//!
//! Each iteration critiques the working set. An acceptable critique ends the
//! loop; otherwise the set is revised, the revision is scored, and it becomes
//! the new working set whether or not it scored higher. The loop tracks the
//! best-scoring revision so that running out of budget can return it instead
//! of whatever the last revision happened to be.

use crate::brain::{Generator, Scorer, retry_once};
use crate::error::{BackendError, EngineError};
use crate::prompts::PromptSet;
use crate::types::{CritiqueReport, FlashcardSet, QualityReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to return when the budget runs out without an accepted critique.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnPolicy {
    /// The highest-scoring revision. Ties go to the later one.
    #[default]
    BestSoFar,
    /// The last working set.
    Last,
}

impl std::str::FromStr for ReturnPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" | "best_so_far" => Ok(ReturnPolicy::BestSoFar),
            "last" => Ok(ReturnPolicy::Last),
            other => Err(EngineError::invalid(format!(
                "unknown return policy '{other}', expected 'best' or 'last'"
            ))),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Accepted,
    BudgetExhausted,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Accepted => write!(f, "accepted"),
            Termination::BudgetExhausted => write!(f, "budget exhausted"),
        }
    }
}

/// Which set was handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// The working set at the point the loop stopped.
    Working,
    /// An earlier, higher-scoring revision.
    BestSoFar,
}

/// One iteration of the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: usize,
    pub critique: Option<CritiqueReport>,
    /// Score of the working set after this iteration.
    pub quality: Option<QualityReport>,
    /// Working set after this iteration.
    pub set: FlashcardSet,
    /// Error message when a sub-step failed twice.
    pub degraded: Option<String>,
}

impl IterationRecord {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn is_accepted(&self) -> bool {
        self.critique.as_ref().is_some_and(|c| c.is_acceptable)
    }
}

/// Result of [`ConvergenceLoop::improve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementOutcome {
    pub final_set: FlashcardSet,
    pub history: Vec<IterationRecord>,
    pub termination: Termination,
    pub selection: Selection,
}

impl ImprovementOutcome {
    /// Quality of the returned set, when it was scored.
    pub fn final_quality(&self) -> Option<&QualityReport> {
        self.history
            .iter()
            .rev()
            .filter(|r| r.set == self.final_set)
            .find_map(|r| r.quality.as_ref())
    }
}

/// Drives a [`Generator`] and [`Scorer`] through critique and revision.
pub struct ConvergenceLoop {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn Scorer>,
    prompts: PromptSet,
    policy: ReturnPolicy,
}

impl ConvergenceLoop {
    pub fn new(generator: Arc<dyn Generator>, scorer: Arc<dyn Scorer>, prompts: PromptSet) -> Self {
        Self {
            generator,
            scorer,
            prompts,
            policy: ReturnPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReturnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReturnPolicy {
        self.policy
    }

    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    /// Critique and revise `initial` for at most `max_iterations` rounds.
    pub async fn improve(
        &self,
        initial: &FlashcardSet,
        max_iterations: usize,
    ) -> Result<ImprovementOutcome, EngineError> {
        if max_iterations == 0 {
            return Err(EngineError::invalid("max_iterations must be at least 1"));
        }

        let mut working = initial.clone();
        let mut history: Vec<IterationRecord> = Vec::with_capacity(max_iterations);
        let mut best: Option<(f64, usize)> = None;
        let mut last_revision: Option<usize> = None;

        for iteration in 1..=max_iterations {
            debug!(iteration, cards = working.len(), "Critiquing working set");

            let critique = match retry_once("critique", || {
                self.generator.critique(&working, &self.prompts.critique)
            })
            .await
            {
                Ok(critique) => critique,
                Err(e) => {
                    history.push(degraded(iteration, None, &working, &e));
                    continue;
                }
            };

            if critique.is_acceptable {
                // Acceptance ends the loop even when the accepted set cannot be scored.
                let record = match retry_once("score", || self.scorer.evaluate_deck(&working)).await {
                    Ok(quality) => {
                        info!(
                            iteration,
                            score = quality.overall_deck_score(),
                            "Deck accepted"
                        );
                        IterationRecord {
                            iteration,
                            critique: Some(critique),
                            quality: Some(quality),
                            set: working.clone(),
                            degraded: None,
                        }
                    }
                    Err(e) => degraded(iteration, Some(critique), &working, &e),
                };
                history.push(record);
                return Ok(ImprovementOutcome {
                    final_set: working,
                    history,
                    termination: Termination::Accepted,
                    selection: Selection::Working,
                });
            }

            let revised = match retry_once("revise", || {
                self.generator
                    .revise(&working, &critique, &self.prompts.revise)
            })
            .await
            {
                Ok(revised) => revised,
                Err(e) => {
                    history.push(degraded(iteration, Some(critique), &working, &e));
                    continue;
                }
            };

            let quality = match retry_once("score", || self.scorer.evaluate_deck(&revised)).await {
                Ok(quality) => quality,
                Err(e) => {
                    history.push(degraded(iteration, Some(critique), &working, &e));
                    continue;
                }
            };

            let score = quality.overall_deck_score();
            info!(
                iteration,
                score,
                issues = critique.issues.len(),
                cards = revised.len(),
                "Revision scored"
            );
            if best.is_none_or(|(best_score, _)| score >= best_score) {
                best = Some((score, history.len()));
            }
            last_revision = Some(history.len());
            working = revised;
            history.push(IterationRecord {
                iteration,
                critique: Some(critique),
                quality: Some(quality),
                set: working.clone(),
                degraded: None,
            });
        }

        let (final_set, selection) = match (self.policy, best) {
            (ReturnPolicy::BestSoFar, Some((score, idx))) if Some(idx) != last_revision => {
                info!(
                    iteration = history[idx].iteration,
                    score, "Returning best-scoring revision"
                );
                (history[idx].set.clone(), Selection::BestSoFar)
            }
            _ => (working, Selection::Working),
        };

        warn!(
            max_iterations,
            degraded = history.iter().filter(|r| r.is_degraded()).count(),
            "Iteration budget exhausted without an accepted critique"
        );
        Ok(ImprovementOutcome {
            final_set,
            history,
            termination: Termination::BudgetExhausted,
            selection,
        })
    }
}

fn degraded(
    iteration: usize,
    critique: Option<CritiqueReport>,
    working: &FlashcardSet,
    error: &BackendError,
) -> IterationRecord {
    warn!(iteration, error = %error, "Iteration degraded; keeping previous working set");
    IterationRecord {
        iteration,
        critique,
        quality: None,
        set: working.clone(),
        degraded: Some(error.to_string()),
    }
}
