//! Search strategies: guided instruction search and bootstrap few-shot.

use super::{CallBudget, CandidateScore, SearchContext, SearchStrategy, StrategyResult};
use crate::dataset::EvaluationExample;
use crate::error::{BackendError, OptimizerError};
use crate::prompts::{FewShotDemo, PromptConfiguration, PromptRole};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Proposes alternative instructions for a role.
#[async_trait]
pub trait InstructionProposer: Send + Sync {
    /// Up to `count` new instruction texts derived from `baseline`.
    async fn propose(
        &self,
        baseline: &PromptConfiguration,
        examples: &[&EvaluationExample],
        count: usize,
    ) -> Result<Vec<String>, BackendError>;
}

/// Pick the best candidate: highest mean fitness, then most examples
/// evaluated, then earliest proposed.
pub fn select_winner(scores: &[CandidateScore]) -> Option<&CandidateScore> {
    scores.iter().fold(None, |best: Option<&CandidateScore>, score| match best {
        Some(b)
            if score.mean_fitness < b.mean_fitness
                || (score.mean_fitness == b.mean_fitness
                    && score.examples_evaluated <= b.examples_evaluated) =>
        {
            Some(b)
        }
        _ => Some(score),
    })
}

/// Evaluates the baseline plus proposed instructions with sampled demos.
pub struct GuidedSearch {
    proposer: Option<Arc<dyn InstructionProposer>>,
    demos_per_candidate: usize,
    seed: u64,
}

impl GuidedSearch {
    pub fn new(
        proposer: Option<Arc<dyn InstructionProposer>>,
        demos_per_candidate: usize,
        seed: u64,
    ) -> Self {
        Self {
            proposer,
            demos_per_candidate,
            seed,
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> OptimizerError {
        OptimizerError::StrategyUnavailable {
            strategy: self.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Candidate 0 is the baseline; the rest pair proposals with demos.
    async fn candidates(
        &self,
        ctx: &SearchContext<'_>,
    ) -> Result<Vec<PromptConfiguration>, OptimizerError> {
        let mut candidates = vec![ctx.baseline.clone()];
        let wanted = ctx.candidate_budget.saturating_sub(1);
        if wanted == 0 {
            return Ok(candidates);
        }
        let proposer = self
            .proposer
            .as_ref()
            .ok_or_else(|| self.unavailable("no instruction proposer configured"))?;
        let proposals = proposer
            .propose(ctx.baseline, ctx.examples, wanted)
            .await
            .map_err(|e| self.unavailable(format!("instruction proposer failed: {e}")))?;

        let pool: Vec<FewShotDemo> = ctx
            .examples
            .iter()
            .filter_map(|e| e.demo_for(ctx.role))
            .collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        for instructions in proposals
            .into_iter()
            .filter(|i| !i.trim().is_empty())
            .take(wanted)
        {
            let demos = pool
                .choose_multiple(&mut rng, self.demos_per_candidate)
                .cloned()
                .collect();
            candidates.push(ctx.baseline.derive(Some(instructions), demos));
        }
        debug!(
            candidates = candidates.len(),
            demo_pool = pool.len(),
            "Built guided search candidates"
        );
        Ok(candidates)
    }
}

#[async_trait]
impl SearchStrategy for GuidedSearch {
    fn name(&self) -> &'static str {
        "guided"
    }

    fn probe(&self) -> Result<(), OptimizerError> {
        match self.proposer {
            Some(_) => Ok(()),
            None => Err(self.unavailable("no instruction proposer configured")),
        }
    }

    async fn run(
        &self,
        ctx: &SearchContext<'_>,
        budget: &mut CallBudget,
    ) -> Result<StrategyResult, OptimizerError> {
        let candidates = self.candidates(ctx).await?;
        let mut scores = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.iter().enumerate() {
            let mut total = 0.0;
            let mut evaluated = 0;
            for example in ctx.examples.iter().take(ctx.max_examples) {
                if !budget.try_spend() {
                    break;
                }
                total += ctx.fitness.evaluate(candidate, example).await;
                evaluated += 1;
            }
            if evaluated == 0 {
                info!(index, "Evaluation budget exhausted, ending search");
                break;
            }
            let mean_fitness = total / evaluated as f64;
            info!(index, mean_fitness, examples = evaluated, "Candidate scored");
            scores.push(CandidateScore {
                index,
                configuration_id: candidate.id(),
                mean_fitness,
                examples_evaluated: evaluated,
            });
        }

        let configuration = select_winner(&scores)
            .and_then(|winner| candidates.get(winner.index))
            .unwrap_or(ctx.baseline)
            .clone();
        Ok(StrategyResult {
            configuration,
            candidates: scores,
        })
    }
}

/// Builds a configuration from the best recorded runs without calling the
/// backend.
pub struct BootstrapFewShot {
    max_demos: usize,
}

impl BootstrapFewShot {
    pub fn new(max_demos: usize) -> Self {
        Self { max_demos }
    }
}

/// Descending by reference score, unscored last.
fn by_reference_score(
    role: PromptRole,
) -> impl Fn(&&EvaluationExample, &&EvaluationExample) -> Ordering {
    move |a: &&EvaluationExample, b: &&EvaluationExample| {
        match (a.reference_score(role), b.reference_score(role)) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[async_trait]
impl SearchStrategy for BootstrapFewShot {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn probe(&self) -> Result<(), OptimizerError> {
        Ok(())
    }

    async fn run(
        &self,
        ctx: &SearchContext<'_>,
        _budget: &mut CallBudget,
    ) -> Result<StrategyResult, OptimizerError> {
        let mut ranked: Vec<&EvaluationExample> = ctx.examples.to_vec();
        ranked.sort_by(by_reference_score(ctx.role));
        let demos: Vec<FewShotDemo> = ranked
            .iter()
            .filter_map(|e| e.demo_for(ctx.role))
            .take(self.max_demos)
            .collect();
        info!(role = %ctx.role, demos = demos.len(), "Bootstrapped demos from recorded runs");
        Ok(StrategyResult {
            configuration: ctx.baseline.derive(None, demos),
            candidates: Vec::new(),
        })
    }
}
