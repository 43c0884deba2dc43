//! Roles, role instructions and the fixed stage graph
//!
//! The graph is plain data: an ordered list of stage definitions, each naming
//! the role that runs it and the sources its input is assembled from. It is
//! validated on construction, independently of execution.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Separator placed between assembled input sources
pub const INPUT_SEPARATOR: &str = "\n\n";

/// The agent personas that stages are assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Boss,
    ProductManager,
    Architect,
    ProjectManager,
    Engineer,
    Qa,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Boss,
        Role::ProductManager,
        Role::Architect,
        Role::ProjectManager,
        Role::Engineer,
        Role::Qa,
    ];

    /// Configuration key, as used in `[prompts]`
    pub fn key(&self) -> &'static str {
        match self {
            Role::Boss => "boss",
            Role::ProductManager => "product_manager",
            Role::Architect => "architect",
            Role::ProjectManager => "project_manager",
            Role::Engineer => "engineer",
            Role::Qa => "qa",
        }
    }

    pub fn from_key(key: &str) -> Option<Role> {
        Self::ALL.into_iter().find(|role| role.key() == key)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Boss => "Boss",
            Role::ProductManager => "Product Manager",
            Role::Architect => "Architect",
            Role::ProjectManager => "Project Manager",
            Role::Engineer => "Engineer",
            Role::Qa => "QA",
        }
    }

    /// Built-in system framing and task template for the role
    pub fn default_instruction(&self) -> RoleInstruction {
        match self {
            Role::Boss => RoleInstruction::new(
                "You are the Project Boss. Read a user idea and produce a concise project goal and high-level scope.",
                "User idea",
                "Produce:\n- 1-2 sentence goal\n- key success criteria (3 bullets)\n- primary constraints (if any)\n",
            ),
            Role::ProductManager => RoleInstruction::new(
                "You are a Product Manager. Convert a project brief into a short PRD (scope, features, non-goals, success metrics).",
                "Project brief (from Boss)",
                "Return a small PRD containing:\n- Objective\n- Key features (bullet list)\n- Non-goals\n- Acceptance criteria / success metrics\n",
            ),
            Role::Architect => RoleInstruction::new(
                "You are a system architect. Produce a concise architecture diagram description, component list, and data flow.",
                "Product requirements",
                "Return:\n- High-level components\n- Data flow between components\n- Tech stack recommendations (brief)\n",
            ),
            Role::ProjectManager => RoleInstruction::new(
                "You are a Project Manager. Convert architecture into an actionable task list with estimates.",
                "Architecture summary",
                "Return a task breakdown (epics -> tasks) with rough estimates and priority ordering.\n",
            ),
            Role::Engineer => RoleInstruction::new(
                "You are a software engineer. Produce starter code, file structure, and short README for the tasks.",
                "Task list / plan",
                "Produce:\n- A minimal file tree\n- core code files (only include short, runnable snippets)\n- steps to run locally\n",
            ),
            Role::Qa => RoleInstruction::new(
                "You are a QA engineer. Review the engineer output, suggest tests, and produce a short QA report with risks and fixes.",
                "Implementation output / code snippets",
                "Return:\n- Quick QA checklist\n- Suggested unit/e2e tests (code outline)\n- Risks and recommended fixes\n",
            ),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// System framing plus the template that wraps a stage's input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleInstruction {
    pub system: String,
    pub input_label: String,
    pub directions: String,
}

impl RoleInstruction {
    pub fn new(
        system: impl Into<String>,
        input_label: impl Into<String>,
        directions: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            input_label: input_label.into(),
            directions: directions.into(),
        }
    }

    /// Wrap the assembled input in the role's task template
    pub fn render_prompt(&self, input: &str) -> String {
        format!("{}:\n{}\n\n{}", self.input_label, input, self.directions)
    }
}

/// One source of a stage's input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum StageInput {
    /// The job's original prompt
    Prompt,
    /// The output of an earlier stage
    Stage(String),
}

impl StageInput {
    pub fn stage(name: impl Into<String>) -> Self {
        StageInput::Stage(name.into())
    }
}

/// Static description of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    pub name: String,
    pub role: Role,
    pub instruction: RoleInstruction,
    pub inputs: Vec<StageInput>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, role: Role, inputs: Vec<StageInput>) -> Self {
        Self {
            name: name.into(),
            role,
            instruction: role.default_instruction(),
            inputs,
        }
    }
}

/// Structural problems in a stage graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("stage graph is empty")]
    Empty,
    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),
    #[error("stage '{0}' has no inputs")]
    NoInputs(String),
    #[error("stage '{stage}' reads '{source_stage}', which does not run before it")]
    UnknownSource { stage: String, source_stage: String },
}

/// Input assembly referenced a stage with no recorded output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no output recorded for stage '{0}'")]
pub struct MissingOutput(pub String);

/// Ordered, validated list of stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageGraph {
    stages: Vec<StageDefinition>,
}

impl StageGraph {
    /// Build a graph, rejecting forward or dangling references
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, GraphError> {
        let graph = Self { stages };
        graph.validate()?;
        Ok(graph)
    }

    /// The product team workflow with its three refinement loops
    pub fn reference() -> Self {
        use StageInput::Prompt;
        let from = |name: &str| StageInput::Stage(name.to_string());

        Self {
            stages: vec![
                StageDefinition::new("Boss", Role::Boss, vec![Prompt]),
                StageDefinition::new("Product Manager", Role::ProductManager, vec![from("Boss")]),
                StageDefinition::new(
                    "Architect",
                    Role::Architect,
                    vec![from("Boss"), from("Product Manager")],
                ),
                StageDefinition::new(
                    "Product Manager (Refined)",
                    Role::ProductManager,
                    vec![from("Architect"), from("Product Manager")],
                ),
                StageDefinition::new(
                    "Architect (Refined)",
                    Role::Architect,
                    vec![from("Product Manager (Refined)"), from("Architect")],
                ),
                StageDefinition::new(
                    "Project Manager",
                    Role::ProjectManager,
                    vec![from("Product Manager (Refined)"), from("Architect (Refined)")],
                ),
                StageDefinition::new(
                    "Architect (Final)",
                    Role::Architect,
                    vec![from("Project Manager"), from("Architect (Refined)")],
                ),
                StageDefinition::new(
                    "Project Manager (Refined)",
                    Role::ProjectManager,
                    vec![from("Architect (Final)"), from("Project Manager")],
                ),
                StageDefinition::new(
                    "Engineer",
                    Role::Engineer,
                    vec![from("Project Manager (Refined)"), from("Architect (Final)")],
                ),
                StageDefinition::new(
                    "QA",
                    Role::Qa,
                    vec![from("Engineer"), from("Project Manager (Refined)")],
                ),
                StageDefinition::new(
                    "Engineer (Final)",
                    Role::Engineer,
                    vec![from("QA"), from("Engineer")],
                ),
            ],
        }
    }

    /// Check names are unique and every input refers to an earlier stage
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if stage.inputs.is_empty() {
                return Err(GraphError::NoInputs(stage.name.clone()));
            }
            for input in &stage.inputs {
                if let StageInput::Stage(source) = input {
                    if !seen.contains(source.as_str()) {
                        return Err(GraphError::UnknownSource {
                            stage: stage.name.clone(),
                            source_stage: source.clone(),
                        });
                    }
                }
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
        }
        Ok(())
    }

    /// Replace the system framing of every stage run by an overridden role
    pub fn with_system_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (Role, String)>,
    {
        let overrides: HashMap<Role, String> = overrides.into_iter().collect();
        for stage in &mut self.stages {
            if let Some(system) = overrides.get(&stage.role) {
                stage.instruction.system = system.clone();
            }
        }
        self
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::reference()
    }
}

/// Join a stage's sources, in declared order, from the prompt and prior outputs
pub fn build_input(
    stage: &StageDefinition,
    prompt: &str,
    outputs: &HashMap<String, String>,
) -> Result<String, MissingOutput> {
    let parts = stage
        .inputs
        .iter()
        .map(|input| match input {
            StageInput::Prompt => Ok(prompt),
            StageInput::Stage(name) => outputs
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| MissingOutput(name.clone())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(parts.join(INPUT_SEPARATOR))
}
