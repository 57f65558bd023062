//! Prompt optimization over recorded runs.
//!
//! [`PromptOptimizer::search`] walks an ordered chain of [`SearchStrategy`]
//! implementations. Each strategy is probed once per search; the first one
//! that is available and starts up cleanly produces the winning
//! configuration. Strategies that are skipped leave a notice for the caller.

pub mod fitness;
pub mod strategy;

use crate::brain::{Generator, Scorer};
use crate::config::{OptimizerConfig, PersonalizationConfig};
use crate::dataset::EvaluationExample;
use crate::error::{EngineError, OptimizerError};
use crate::prompts::{PromptConfiguration, PromptRole, PromptSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub use fitness::FitnessEvaluator;
pub use strategy::{BootstrapFewShot, GuidedSearch, InstructionProposer, select_winner};

/// Caps the number of candidate evaluations in one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    limit: usize,
    used: usize,
}

impl CallBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Spend one evaluation; `false` once the limit is reached.
    pub fn try_spend(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// How one candidate fared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Position in proposal order; 0 is the baseline.
    pub index: usize,
    pub configuration_id: Uuid,
    pub mean_fitness: f64,
    pub examples_evaluated: usize,
}

/// Everything a strategy needs for one search.
pub struct SearchContext<'a> {
    pub role: PromptRole,
    /// Examples compatible with `role`, in load order.
    pub examples: &'a [&'a EvaluationExample],
    pub baseline: &'a PromptConfiguration,
    pub candidate_budget: usize,
    pub max_examples: usize,
    pub fitness: &'a FitnessEvaluator,
}

/// What a strategy returns when it completes.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub configuration: PromptConfiguration,
    pub candidates: Vec<CandidateScore>,
}

/// One way of searching the prompt space.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that the strategy's dependencies are present.
    fn probe(&self) -> Result<(), OptimizerError>;

    /// Run the search. `StrategyUnavailable` means the strategy failed to
    /// start and the next one in the chain should run.
    async fn run(
        &self,
        ctx: &SearchContext<'_>,
        budget: &mut CallBudget,
    ) -> Result<StrategyResult, OptimizerError>;
}

/// Result of [`PromptOptimizer::search`].
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub configuration: PromptConfiguration,
    /// Name of the strategy that produced `configuration`.
    pub strategy: &'static str,
    pub candidates: Vec<CandidateScore>,
    /// Why earlier strategies were skipped.
    pub notices: Vec<String>,
}

impl SearchOutcome {
    /// Mean fitness of the winning candidate, if it was evaluated.
    pub fn best_fitness(&self) -> Option<f64> {
        self.candidates
            .iter()
            .find(|c| c.configuration_id == self.configuration.id())
            .map(|c| c.mean_fitness)
    }
}

/// Searches for better prompt configurations.
pub struct PromptOptimizer {
    strategies: Vec<Box<dyn SearchStrategy>>,
    fitness: FitnessEvaluator,
}

impl PromptOptimizer {
    pub fn new(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn Scorer>,
        baseline: PromptSet,
        personalization: PersonalizationConfig,
        strategies: Vec<Box<dyn SearchStrategy>>,
    ) -> Self {
        Self {
            strategies,
            fitness: FitnessEvaluator::new(generator, scorer, baseline, personalization),
        }
    }

    /// Guided search (when a proposer is given) falling back to bootstrap.
    pub fn standard(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn Scorer>,
        baseline: PromptSet,
        personalization: PersonalizationConfig,
        config: &OptimizerConfig,
        proposer: Option<Arc<dyn InstructionProposer>>,
    ) -> Self {
        let strategies: Vec<Box<dyn SearchStrategy>> = vec![
            Box::new(GuidedSearch::new(proposer, config.demos_per_candidate, config.seed)),
            Box::new(BootstrapFewShot::new(config.max_bootstrapped_demos)),
        ];
        Self::new(generator, scorer, baseline, personalization, strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn search(
        &self,
        role: PromptRole,
        examples: &[EvaluationExample],
        candidate_budget: usize,
        max_examples: usize,
    ) -> Result<SearchOutcome, EngineError> {
        if candidate_budget == 0 {
            return Err(EngineError::invalid("candidate budget must be at least 1"));
        }
        if max_examples == 0 {
            return Err(EngineError::invalid("max_examples must be at least 1"));
        }
        if examples.is_empty() {
            return Err(EngineError::incomplete("no evaluation examples provided"));
        }
        let compatible: Vec<&EvaluationExample> =
            examples.iter().filter(|e| e.supports(role)).collect();
        if compatible.is_empty() {
            return Err(EngineError::incomplete(
                OptimizerError::NoCompatibleExamples {
                    role: role.to_string(),
                }
                .to_string(),
            ));
        }

        let baseline = self.fitness.baseline().get(role).clone();
        let ctx = SearchContext {
            role,
            examples: &compatible,
            baseline: &baseline,
            candidate_budget,
            max_examples,
            fitness: &self.fitness,
        };
        let mut budget = CallBudget::new(candidate_budget.saturating_mul(max_examples));
        let mut notices = Vec::new();

        info!(
            role = %role,
            examples = compatible.len(),
            candidate_budget,
            max_examples,
            "Starting prompt search"
        );

        for strategy in &self.strategies {
            if let Err(e) = strategy.probe() {
                warn!(strategy = strategy.name(), error = %e, "Search strategy unavailable");
                notices.push(e.to_string());
                continue;
            }
            match strategy.run(&ctx, &mut budget).await {
                Ok(result) => {
                    info!(
                        strategy = strategy.name(),
                        candidates = result.candidates.len(),
                        evaluations = budget.used(),
                        "Prompt search finished"
                    );
                    return Ok(SearchOutcome {
                        configuration: result.configuration,
                        strategy: strategy.name(),
                        candidates: result.candidates,
                        notices,
                    });
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Search strategy failed to start");
                    notices.push(e.to_string());
                }
            }
        }

        Err(OptimizerError::Exhausted {
            message: notices.join("; "),
        }
        .into())
    }
}
