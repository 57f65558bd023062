//! Prompt configurations for the tunable roles.
//!
//! A [`PromptConfiguration`] is immutable once built. The optimizer derives
//! new configurations from a parent instead of editing one, so every
//! configuration keeps a version and a link to the one it came from.
//! [`PromptStore`] persists winners; [`PromptSet::resolve`] is the single
//! place that decides whether stored configurations are used.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Built-in critique instructions.
pub const DEFAULT_CRITIQUE_INSTRUCTIONS: &str = "\
Evaluate flashcards against these pedagogical principles:
1. Atomicity: one concept per card
2. Clarity: unambiguous questions and answers
3. Difficulty: appropriate cognitive load
4. Avoid: yes/no questions and overly broad questions
5. Context: include the context needed to understand the card

Decide whether the flashcards are acceptable or need revision. List each
concrete issue separately.";

/// Built-in revision instructions.
pub const DEFAULT_REVISE_INSTRUCTIONS: &str = "\
You are an expert at refining flashcards based on pedagogical feedback.
Rewrite the deck so that every listed issue is resolved. Keep cards that
have no issues, split cards that cover several concepts, and never drop
material that the original deck covered.";

/// Built-in gap-filling instructions.
pub const DEFAULT_ADAPT_INSTRUCTIONS: &str = "\
You are an expert at creating targeted flashcards that help a student fill
specific knowledge gaps. Create focused cards that:
- address the exact gaps identified
- use simpler language where the student struggled
- break complex concepts into steps
- include examples where helpful
- scaffold learning by building up from the basics";

/// The roles whose prompts can be tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    Critique,
    Revise,
    Adapt,
}

impl PromptRole {
    pub const ALL: [PromptRole; 3] = [PromptRole::Critique, PromptRole::Revise, PromptRole::Adapt];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptRole::Critique => "critique",
            PromptRole::Revise => "revise",
            PromptRole::Adapt => "adapt",
        }
    }

    pub fn default_instructions(self) -> &'static str {
        match self {
            PromptRole::Critique => DEFAULT_CRITIQUE_INSTRUCTIONS,
            PromptRole::Revise => DEFAULT_REVISE_INSTRUCTIONS,
            PromptRole::Adapt => DEFAULT_ADAPT_INSTRUCTIONS,
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromptRole {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critique" => Ok(PromptRole::Critique),
            "revise" => Ok(PromptRole::Revise),
            "adapt" => Ok(PromptRole::Adapt),
            other => Err(EngineError::invalid(format!("unknown prompt role '{other}'"))),
        }
    }
}

/// A worked example shown to the model ahead of the real input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotDemo {
    pub input: String,
    pub output: String,
}

impl FewShotDemo {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Instructions plus demonstrations for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfiguration {
    id: Uuid,
    role: PromptRole,
    version: u32,
    parent: Option<Uuid>,
    instructions: String,
    #[serde(default)]
    demos: Vec<FewShotDemo>,
    created_at: DateTime<Utc>,
}

impl PromptConfiguration {
    /// The built-in configuration for `role`, version 1.
    pub fn baseline(role: PromptRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            version: 1,
            parent: None,
            instructions: role.default_instructions().to_string(),
            demos: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// A child configuration. `None` instructions keep the parent's.
    pub fn derive(&self, instructions: Option<String>, demos: Vec<FewShotDemo>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: self.role,
            version: self.version + 1,
            parent: Some(self.id),
            instructions: instructions.unwrap_or_else(|| self.instructions.clone()),
            demos,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> PromptRole {
        self.role
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn demos(&self) -> &[FewShotDemo] {
        &self.demos
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Instructions followed by any demos, ready for a system message.
    pub fn render_system_prompt(&self) -> String {
        if self.demos.is_empty() {
            return self.instructions.clone();
        }
        let mut prompt = self.instructions.clone();
        for (i, demo) in self.demos.iter().enumerate() {
            prompt.push_str(&format!(
                "\n\n--- Example {} ---\nExample input:\n{}\n\nExample output:\n{}",
                i + 1,
                demo.input,
                demo.output
            ));
        }
        prompt
    }
}

/// One configuration per tunable role.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub critique: PromptConfiguration,
    pub revise: PromptConfiguration,
    pub adapt: PromptConfiguration,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            critique: PromptConfiguration::baseline(PromptRole::Critique),
            revise: PromptConfiguration::baseline(PromptRole::Revise),
            adapt: PromptConfiguration::baseline(PromptRole::Adapt),
        }
    }
}

impl PromptSet {
    /// Choose the configuration for each role.
    ///
    /// With `use_optimized` set, a stored configuration replaces the baseline
    /// for each role that has one. Unreadable files fall back to the baseline.
    pub fn resolve(use_optimized: bool, store: Option<&PromptStore>) -> Self {
        let mut set = PromptSet::default();
        let Some(store) = store.filter(|_| use_optimized) else {
            debug!("Using built-in prompts");
            return set;
        };
        for role in PromptRole::ALL {
            match store.load(role) {
                Ok(Some(config)) => {
                    info!(role = %role, version = config.version(), "Loaded optimized prompt");
                    set = set.with(config);
                }
                Ok(None) => debug!(role = %role, "No optimized prompt stored"),
                Err(e) => warn!(role = %role, error = %e, "Ignoring unreadable optimized prompt"),
            }
        }
        set
    }

    pub fn get(&self, role: PromptRole) -> &PromptConfiguration {
        match role {
            PromptRole::Critique => &self.critique,
            PromptRole::Revise => &self.revise,
            PromptRole::Adapt => &self.adapt,
        }
    }

    /// A copy with `config` installed in its role's slot.
    pub fn with(&self, config: PromptConfiguration) -> Self {
        let mut set = self.clone();
        match config.role() {
            PromptRole::Critique => set.critique = config,
            PromptRole::Revise => set.revise = config,
            PromptRole::Adapt => set.adapt = config,
        }
        set
    }
}

/// Directory of `<role>_optimized.json` files.
#[derive(Debug, Clone)]
pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, role: PromptRole) -> PathBuf {
        self.dir.join(format!("{}_optimized.json", role.as_str()))
    }

    pub fn save(&self, config: &PromptConfiguration) -> Result<PathBuf, EngineError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(config.role());
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), role = %config.role(), "Saved prompt configuration");
        Ok(path)
    }

    /// Load the stored configuration for `role`, if there is one.
    pub fn load(&self, role: PromptRole) -> Result<Option<PromptConfiguration>, EngineError> {
        let path = self.path_for(role);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        let config: PromptConfiguration = serde_json::from_str(&json)?;
        if config.role() != role {
            return Err(EngineError::invalid(format!(
                "{} holds a '{}' prompt, expected '{}'",
                path.display(),
                config.role(),
                role
            )));
        }
        Ok(Some(config))
    }
}
