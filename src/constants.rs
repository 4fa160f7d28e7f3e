// src/constants.rs

/// The name of the configuration directory (inside the user config dir).
pub const APP_DIR_NAME: &str = "kubesol";

/// The name of the shell configuration file.
pub const CONFIG_FILENAME: &str = "config.toml";

/// The name of the line-editor history file.
pub const HISTORY_FILENAME: &str = "history.txt";

/// Namespace used when no project context is active.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Environment created alongside every new project.
pub const DEFAULT_PROJECT_ENVIRONMENT: &str = "dev";

/// Kubernetes object names are DNS labels.
pub const MAX_K8S_NAME_LEN: usize = 63;

// --- Grammar ---

/// Rules whose name ends with this suffix become alternatives of `command`.
pub const COMMAND_RULE_SUFFIX: &str = "_command";

/// Rule names no plugin may define.
pub const RESERVED_RULE_NAMES: &[&str] = &["start", "command", "NAME", "ESCAPED_STRING", "WS"];

// --- Scripts ---

pub const SCRIPT_CM_PREFIX: &str = "kubesol-script-";
pub const SCRIPT_CM_LABEL_ROLE: &str = "kubesol-role";
pub const SCRIPT_CM_LABEL_ROLE_VALUE: &str = "script";
pub const SCRIPT_CM_KEY_CODE: &str = "code";
pub const SCRIPT_CM_KEY_CODE_FROM_FILE: &str = "codeFromFilePath";
pub const SCRIPT_CM_KEY_TYPE: &str = "scriptType";
pub const SCRIPT_CM_KEY_ENGINE: &str = "engine";
pub const SCRIPT_CM_KEY_PARAMS_SPEC: &str = "paramsSpec";
pub const SCRIPT_CM_KEY_DESCRIPTION: &str = "description";
pub const SCRIPT_MOUNT_DIR: &str = "/kubesol_scripts";
pub const JOB_NAME_PREFIX: &str = "kubesol-exec-";

// --- Projects ---

pub const PROJECT_ID_PREFIX: &str = "proj-";
pub const PROJECT_ID_LABEL_KEY: &str = "kubesol.io/project-id";
pub const PROJECT_NAME_LABEL_KEY: &str = "kubesol.io/project-name";
pub const ENVIRONMENT_LABEL_KEY: &str = "kubesol.io/environment";
pub const ENVIRONMENT_DEPENDS_ON_LABEL_KEY: &str = "kubesol.io/depends-on";
pub const MAX_PROJECT_NAME_LEN: usize = 50;
pub const MAX_ENVIRONMENT_NAME_LEN: usize = 20;
