// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key/value pairs given in a `WITH k="v", ...` clause.
pub type Fields = BTreeMap<String, String>;

// --- ACTIONS & RESOURCE KINDS ---

/// The verb of a command.
///
/// The variants cover every action the built-in plugins produce. Plugins that
/// introduce new verbs use `Custom`, which holds the upper-cased identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Create,
    Delete,
    Update,
    Get,
    List,
    Execute,
    CreateProject,
    CreateEnv,
    ListProjects,
    GetProject,
    UpdateProject,
    DropProject,
    DropEnv,
    UseProjectEnv,
    Custom(String),
}

impl Action {
    /// Interns an action identifier. Matching is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        match upper.as_str() {
            "CREATE" => Self::Create,
            "DELETE" => Self::Delete,
            "UPDATE" => Self::Update,
            "GET" => Self::Get,
            "LIST" => Self::List,
            "EXECUTE" => Self::Execute,
            "CREATE_PROJECT" => Self::CreateProject,
            "CREATE_ENV" => Self::CreateEnv,
            "LIST_PROJECTS" => Self::ListProjects,
            "GET_PROJECT" => Self::GetProject,
            "UPDATE_PROJECT" => Self::UpdateProject,
            "DROP_PROJECT" => Self::DropProject,
            "DROP_ENV" => Self::DropEnv,
            "USE_PROJECT_ENV" => Self::UseProjectEnv,
            _ => Self::Custom(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::Update => "UPDATE",
            Self::Get => "GET",
            Self::List => "LIST",
            Self::Execute => "EXECUTE",
            Self::CreateProject => "CREATE_PROJECT",
            Self::CreateEnv => "CREATE_ENV",
            Self::ListProjects => "LIST_PROJECTS",
            Self::GetProject => "GET_PROJECT",
            Self::UpdateProject => "UPDATE_PROJECT",
            Self::DropProject => "DROP_PROJECT",
            Self::DropEnv => "DROP_ENV",
            Self::UseProjectEnv => "USE_PROJECT_ENV",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The logical object a command operates on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Secret,
    ConfigMap,
    Parameter,
    Script,
    Project,
    Environment,
    Custom(String),
}

impl ResourceKind {
    /// Interns a resource-kind identifier. Matching is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        match upper.as_str() {
            "SECRET" => Self::Secret,
            "CONFIGMAP" => Self::ConfigMap,
            "PARAMETER" => Self::Parameter,
            "SCRIPT" => Self::Script,
            "PROJECT_LOGICAL" => Self::Project,
            "ENVIRONMENT_LOGICAL" => Self::Environment,
            _ => Self::Custom(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Secret => "SECRET",
            Self::ConfigMap => "CONFIGMAP",
            Self::Parameter => "PARAMETER",
            Self::Script => "SCRIPT",
            Self::Project => "PROJECT_LOGICAL",
            Self::Environment => "ENVIRONMENT_LOGICAL",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(action, resource kind)` pair a handler is registered under.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey {
    pub action: Action,
    pub kind: ResourceKind,
}

impl CommandKey {
    pub fn new(action: Action, kind: ResourceKind) -> Self {
        Self { action, kind }
    }

    /// A key is malformed when either half is an empty or space-containing identifier.
    pub fn is_well_formed(&self) -> bool {
        let valid = |s: &str| !s.is_empty() && !s.chars().any(char::is_whitespace);
        valid(self.action.as_str()) && valid(self.kind.as_str())
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.kind)
    }
}

// --- SCRIPT MODELS ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Python,
    PySpark,
    SqlSpark,
}

impl ScriptType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "PYTHON" => Some(Self::Python),
            "PYSPARK" => Some(Self::PySpark),
            "SQL_SPARK" => Some(Self::SqlSpark),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "PYTHON",
            Self::PySpark => "PYSPARK",
            Self::SqlSpark => "SQL_SPARK",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptEngine {
    #[default]
    K8sJob,
    SparkOperator,
}

impl ScriptEngine {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "K8S_JOB" => Some(Self::K8sJob),
            "SPARK_OPERATOR" => Some(Self::SparkOperator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::K8sJob => "K8S_JOB",
            Self::SparkOperator => "SPARK_OPERATOR",
        }
    }
}

/// Content fields of a script definition or update.
/// Unset fields are left untouched by an update.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptFields {
    pub code: Option<String>,
    pub code_from_file: Option<String>,
    pub params_spec: Option<String>,
    pub description: Option<String>,
    pub engine: Option<ScriptEngine>,
}

impl ScriptFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigMapParams {
    pub cm_name: String,
    pub key_prefix: Option<String>,
}

/// A `WITH SECRET s KEY "k" AS "/path"` clause.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
    pub secret_name: String,
    pub key: String,
    pub mount_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecuteOptions {
    pub custom_args: Fields,
    pub args_from_configmap: Option<ConfigMapParams>,
    pub secret_mounts: Vec<SecretMount>,
}

// --- PROJECT MODELS ---

/// How a command names its target project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    Named(String),
    /// `THIS PROJECT`: resolved against the session context by the handler.
    ThisProject,
}

// --- NORMALIZED COMMAND ---

/// Action-specific data carried by a [`Command`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Named(String),
    Fields {
        name: String,
        fields: Fields,
    },
    Script {
        name: String,
        script_type: ScriptType,
        content: ScriptFields,
    },
    ScriptUpdate {
        name: String,
        changes: ScriptFields,
    },
    Execute {
        name: String,
        options: ExecuteOptions,
    },
    Environment {
        name: String,
        project: Option<ProjectRef>,
        depends_on: Option<String>,
    },
    Project(ProjectRef),
    Rename {
        from: String,
        to: String,
    },
    UseProject {
        project: String,
        environment: String,
    },
    /// Loosely structured data from a plugin that builds records instead of payloads.
    Record(BTreeMap<String, Value>),
}

/// The normalized, transform-produced form of one DSL command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Command {
    pub action: Action,
    pub kind: ResourceKind,
    pub payload: Payload,
}

impl Command {
    pub fn new(action: Action, kind: ResourceKind, payload: Payload) -> Self {
        Self {
            action,
            kind,
            payload,
        }
    }

    pub fn key(&self) -> CommandKey {
        CommandKey::new(self.action.clone(), self.kind.clone())
    }

    /// The primary object name of the command, when it has one.
    pub fn name(&self) -> Option<&str> {
        match &self.payload {
            Payload::Named(name)
            | Payload::Fields { name, .. }
            | Payload::Script { name, .. }
            | Payload::ScriptUpdate { name, .. }
            | Payload::Execute { name, .. }
            | Payload::Environment { name, .. } => Some(name),
            Payload::Project(ProjectRef::Named(name)) => Some(name),
            Payload::Rename { from, .. } => Some(from),
            Payload::UseProject { project, .. } => Some(project),
            Payload::Record(map) => map.get("name").and_then(Value::as_str),
            Payload::None | Payload::Project(ProjectRef::ThisProject) => None,
        }
    }
}

// --- TRANSFORM VALUES ---

/// Intermediate values produced while transforming a parse tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    /// An absent optional clause.
    Missing,
    Str(String),
    List(Vec<Value>),
    Pair(String, Box<Value>),
    Record(BTreeMap<String, Value>),
    Command(Command),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Flattens a value into the list of its items. `Missing` is empty.
    pub fn into_items(self) -> Vec<Self> {
        match self {
            Self::List(items) => items,
            Self::Missing => Vec::new(),
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_and_kind_parsing_is_case_insensitive() {
        assert_eq!(Action::parse("create"), Action::Create);
        assert_eq!(Action::parse("use_project_env"), Action::UseProjectEnv);
        assert_eq!(Action::parse("rollout"), Action::Custom("ROLLOUT".to_string()));
        assert_eq!(ResourceKind::parse("configmap"), ResourceKind::ConfigMap);
        assert_eq!(ResourceKind::parse("PROJECT_LOGICAL"), ResourceKind::Project);
    }

    #[test]
    fn test_command_key_well_formedness() {
        assert!(CommandKey::new(Action::Create, ResourceKind::Secret).is_well_formed());
        assert!(!CommandKey::new(Action::Custom(String::new()), ResourceKind::Secret).is_well_formed());
        assert!(
            !CommandKey::new(Action::Create, ResourceKind::Custom("TWO WORDS".to_string()))
                .is_well_formed()
        );
    }

    #[test]
    fn test_command_name_extraction() {
        let command = Command::new(
            Action::UpdateProject,
            ResourceKind::Project,
            Payload::Rename {
                from: "old".to_string(),
                to: "new".to_string(),
            },
        );
        assert_eq!(command.name(), Some("old"));

        let this_project = Command::new(
            Action::GetProject,
            ResourceKind::Project,
            Payload::Project(ProjectRef::ThisProject),
        );
        assert_eq!(this_project.name(), None);
    }
}
