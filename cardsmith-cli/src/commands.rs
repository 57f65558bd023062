//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, RoleArg};
use anyhow::Context;
use cardsmith_core::brain::retry_once;
use cardsmith_core::config::{CardsmithConfig, load_config};
use cardsmith_core::convergence::{ConvergenceLoop, ReturnPolicy};
use cardsmith_core::dataset::{RunRecorder, load_examples};
use cardsmith_core::export::{export_all, load_deck};
use cardsmith_core::optimizer::{InstructionProposer, PromptOptimizer};
use cardsmith_core::personalization::PersonalizationEngine;
use cardsmith_core::prompts::{PromptRole, PromptSet, PromptStore};
use cardsmith_core::providers::{LlmRoles, create_roles};
use cardsmith_core::types::{QualityReport, StudySession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    model: Option<&str>,
) -> anyhow::Result<()> {
    match command {
        Commands::Generate {
            input,
            iterations,
            policy,
            out,
            no_record,
        } => {
            let ctx = AppContext::load(workspace, model)?;
            handle_generate(&ctx, &input, iterations, policy, out, no_record).await
        }
        Commands::Study { deck, out, run } => handle_study(&deck, out, run),
        Commands::Adapt {
            session,
            source,
            out,
            run,
        } => {
            let ctx = AppContext::load(workspace, model)?;
            handle_adapt(&ctx, &session, source, out, run).await
        }
        Commands::Evaluate { deck, source, json } => {
            let ctx = AppContext::load(workspace, model)?;
            handle_evaluate(&ctx, &deck, source, json).await
        }
        Commands::Optimize {
            eval_data_dir,
            role,
            num_candidates,
            max_examples,
            output_dir,
            bootstrap_only,
        } => {
            let ctx = AppContext::load(workspace, model)?;
            handle_optimize(
                &ctx,
                eval_data_dir,
                role,
                num_candidates,
                max_examples,
                output_dir,
                bootstrap_only,
            )
            .await
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Loaded configuration plus the workspace it resolves paths against.
struct AppContext {
    config: CardsmithConfig,
    workspace: PathBuf,
}

impl AppContext {
    fn load(workspace: &Path, model: Option<&str>) -> anyhow::Result<Self> {
        let config = load_config(Some(workspace), None).context("Failed to load configuration")?;
        Ok(Self::new(config, workspace, model))
    }

    fn new(mut config: CardsmithConfig, workspace: &Path, model: Option<&str>) -> Self {
        if let Some(model) = model {
            config.llm.model = model.to_string();
        }
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Self {
            config,
            workspace: workspace.to_path_buf(),
        }
    }

    /// Resolve `path` against the workspace unless it is absolute.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    fn prompt_store(&self, dir: Option<PathBuf>) -> PromptStore {
        PromptStore::new(self.resolve(&dir.unwrap_or_else(|| self.config.prompts.dir.clone())))
    }

    fn prompts(&self) -> PromptSet {
        PromptSet::resolve(self.config.prompts.use_optimized, Some(&self.prompt_store(None)))
    }

    fn eval_data_dir(&self, dir: Option<PathBuf>) -> PathBuf {
        self.resolve(&dir.unwrap_or_else(|| self.config.optimizer.eval_data_dir.clone()))
    }

    fn output_dir(&self, out: Option<PathBuf>) -> PathBuf {
        self.resolve(&out.unwrap_or_else(|| PathBuf::from("output")))
    }

    fn roles(&self, source: Option<&str>) -> anyhow::Result<LlmRoles> {
        create_roles(
            &self.config.llm,
            source,
            self.config.personalization.source_excerpt_chars,
        )
        .context("Failed to create LLM backend")
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_report(title: &str, report: &QualityReport) {
    println!("\n  {title}: {:.2}/10", report.overall_score());
    for (name, score) in report.sub_metrics() {
        println!("    {name:<28} {score:.2}");
    }
    if !report.feedback().is_empty() {
        println!("  {}", report.feedback());
    }
}

async fn handle_generate(
    ctx: &AppContext,
    input: &Path,
    iterations: Option<usize>,
    policy: Option<ReturnPolicy>,
    out: Option<PathBuf>,
    no_record: bool,
) -> anyhow::Result<()> {
    let source = read_text(input)?;
    let roles = ctx.roles(Some(&source))?;
    let recorder = if no_record {
        None
    } else {
        Some(RunRecorder::create(&ctx.eval_data_dir(None))?)
    };

    let initial = retry_once("generate", || roles.generator.generate(&source))
        .await
        .context("Flashcard generation failed")?;
    println!("  Generated {} flashcards", initial.len());
    if let Some(recorder) = &recorder {
        recorder.record_source(&source)?;
        recorder.record_initial(&initial)?;
        match roles.scorer.evaluate_deck(&initial).await {
            Ok(report) => {
                recorder.record_evaluation("initial", &report)?;
            }
            Err(e) => warn!(error = %e, "Initial deck could not be scored"),
        }
    }

    let max_iterations = iterations.unwrap_or(ctx.config.convergence.max_iterations);
    let improver = ConvergenceLoop::new(roles.generator.clone(), roles.scorer.clone(), ctx.prompts())
        .with_policy(policy.unwrap_or(ctx.config.convergence.return_policy));
    let outcome = improver.improve(&initial, max_iterations).await?;

    println!(
        "  Improvement {} after {} iteration(s), {} cards",
        outcome.termination,
        outcome.history.len(),
        outcome.final_set.len()
    );
    if let Some(quality) = outcome.final_quality() {
        print_report("Deck quality", quality);
    }
    if let Some(recorder) = &recorder {
        recorder.record_revised(&outcome.final_set)?;
        recorder.record_history(&outcome.history)?;
        if let Some(quality) = outcome.final_quality() {
            recorder.record_evaluation("revised", quality)?;
        }
        println!("  Run recorded in {}", recorder.dir().display());
    }

    for path in export_all(&outcome.final_set, &ctx.output_dir(out), "flashcards")? {
        println!("  Wrote {}", path.display());
    }
    Ok(())
}

fn handle_study(deck_path: &Path, out: Option<PathBuf>, run: Option<PathBuf>) -> anyhow::Result<()> {
    let deck = load_deck(deck_path)
        .with_context(|| format!("Failed to load deck {}", deck_path.display()))?;
    if deck.is_empty() {
        anyhow::bail!("Deck {} has no cards", deck_path.display());
    }
    let session = crate::study::run(&deck)?;

    let path = out.unwrap_or_else(|| crate::study::default_session_path(deck_path));
    std::fs::write(&path, serde_json::to_string_pretty(&session)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  Study session saved to {}", path.display());
    if let Some(run) = run {
        RunRecorder::open(run)?.record_session(&session)?;
    }
    Ok(())
}

async fn handle_adapt(
    ctx: &AppContext,
    session_path: &Path,
    source: Option<PathBuf>,
    out: Option<PathBuf>,
    run: Option<PathBuf>,
) -> anyhow::Result<()> {
    let session: StudySession = serde_json::from_str(&read_text(session_path)?)
        .with_context(|| format!("Invalid study session {}", session_path.display()))?;
    let source = source.as_deref().map(read_text).transpose()?.unwrap_or_default();
    let roles = ctx.roles(Some(&source).filter(|s| !s.is_empty()).map(String::as_str))?;

    let engine = PersonalizationEngine::new(
        roles.generator,
        roles.scorer,
        ctx.prompts(),
        ctx.config.personalization.clone(),
    );
    let outcome = engine.adapt(&session, &source).await?;
    let update = &outcome.update;

    println!(
        "  Removed {} mastered card(s), added {} gap card(s), {} cards total",
        update.removed.len(),
        update.added.len(),
        update.final_set.len()
    );
    println!("  Ratings: {}", outcome.classification.distribution);
    if !update.gaps.gap_report.is_empty() {
        println!("\n  {}", update.gaps.gap_report);
    }
    match &outcome.report {
        Some(report) => print_report("Personalization", report),
        None => println!("  Adaptation was not scored"),
    }

    let recorder = match run {
        Some(dir) => RunRecorder::open(dir)?,
        None => RunRecorder::create(&ctx.eval_data_dir(None))?,
    };
    recorder.record_session(&session)?;
    recorder.record_update(update)?;
    if !source.is_empty() {
        recorder.record_source(&source)?;
    }
    if let Some(report) = &outcome.report {
        recorder.record_evaluation("adaptation", report)?;
    }
    info!(dir = %recorder.dir().display(), "Adaptation recorded");

    for path in export_all(&update.final_set, &ctx.output_dir(out), "flashcards_adapted")? {
        println!("  Wrote {}", path.display());
    }
    Ok(())
}

async fn handle_evaluate(
    ctx: &AppContext,
    deck_path: &Path,
    source: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let deck = load_deck(deck_path)
        .with_context(|| format!("Failed to load deck {}", deck_path.display()))?;
    let source = source.as_deref().map(read_text).transpose()?;
    let roles = ctx.roles(source.as_deref())?;
    let report = retry_once("score", || roles.scorer.evaluate_deck(&deck))
        .await
        .context("Deck evaluation failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&format!("{} ({} cards)", deck_path.display(), deck.len()), &report);
    }
    Ok(())
}

fn selected_roles(role: RoleArg) -> Vec<PromptRole> {
    match role {
        RoleArg::Critique => vec![PromptRole::Critique],
        RoleArg::Revise => vec![PromptRole::Revise],
        RoleArg::Adapt => vec![PromptRole::Adapt],
        RoleArg::All => PromptRole::ALL.to_vec(),
    }
}

async fn handle_optimize(
    ctx: &AppContext,
    eval_data_dir: Option<PathBuf>,
    role: RoleArg,
    num_candidates: Option<usize>,
    max_examples: Option<usize>,
    output_dir: Option<PathBuf>,
    bootstrap_only: bool,
) -> anyhow::Result<()> {
    let dir = ctx.eval_data_dir(eval_data_dir);
    let examples = load_examples(&dir)?;
    println!("  Loaded {} recorded run(s) from {}", examples.len(), dir.display());

    let roles = ctx.roles(None)?;
    let proposer: Option<Arc<dyn InstructionProposer>> =
        (!bootstrap_only).then(|| roles.proposer.clone());
    let optimizer = PromptOptimizer::standard(
        roles.generator,
        roles.scorer,
        ctx.prompts(),
        ctx.config.personalization.clone(),
        &ctx.config.optimizer,
        proposer,
    );
    let store = ctx.prompt_store(output_dir);
    let candidates = num_candidates.unwrap_or(ctx.config.optimizer.num_candidates);
    let max_examples = max_examples.unwrap_or(ctx.config.optimizer.max_examples);
    let targets = selected_roles(role);

    for target in &targets {
        println!("\n  Optimizing {target} prompts...");
        let outcome = match optimizer
            .search(*target, &examples, candidates, max_examples)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if targets.len() > 1 => {
                warn!(role = %target, error = %e, "Skipping role");
                println!("  Skipped {target}: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for notice in &outcome.notices {
            println!("  Note: {notice}");
        }
        match outcome.best_fitness() {
            Some(fitness) => println!(
                "  {} strategy picked version {} (fitness {:.3} over {} candidate(s))",
                outcome.strategy,
                outcome.configuration.version(),
                fitness,
                outcome.candidates.len()
            ),
            None => println!(
                "  {} strategy built version {} with {} demo(s)",
                outcome.strategy,
                outcome.configuration.version(),
                outcome.configuration.demos().len()
            ),
        }
        let path = store.save(&outcome.configuration)?;
        println!("  Saved {}", path.display());
    }
    if !ctx.config.prompts.use_optimized {
        println!("\n  Set prompts.use_optimized = true to run with the saved prompts.");
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".cardsmith");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&CardsmithConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config =
                load_config(Some(workspace), None).context("Failed to load configuration")?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
