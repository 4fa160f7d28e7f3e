// src/core/render.rs

//! Renders a [`Command`] back into DSL text that parses to the same command.
//!
//! Only the shapes the built-in plugins produce are covered. Anything else,
//! or a value the grammar cannot spell (a name that is not a `NAME` token),
//! renders as `None`.

use super::transform::quote;
use crate::models::{
    Action, Command, ExecuteOptions, Fields, Payload, ProjectRef, ResourceKind, ScriptFields,
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^(?:[a-zA-Z0-9]([a-zA-Z0-9_.-]*[a-zA-Z0-9_])?)$").unwrap();
}

fn name(raw: &str) -> Option<&str> {
    NAME_RE.is_match(raw).then_some(raw)
}

fn assignments(fields: &Fields) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    let parts: Option<Vec<String>> = fields
        .iter()
        .map(|(key, value)| Some(format!("{}={}", name(key)?, quote(value))))
        .collect();
    Some(parts?.join(", "))
}

fn script_fields(fields: &ScriptFields, with_engine: bool) -> Option<String> {
    let mut parts = Vec::new();
    let text = [
        ("CODE", &fields.code),
        ("CODE_FROM_FILE", &fields.code_from_file),
        ("PARAMS_SPEC", &fields.params_spec),
        ("DESCRIPTION", &fields.description),
    ];
    for (key, value) in text {
        if let Some(value) = value {
            parts.push(format!("{}={}", key, quote(value)));
        }
    }
    if with_engine && let Some(engine) = fields.engine {
        parts.push(format!("ENGINE={}", engine.as_str()));
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn execute_clauses(options: &ExecuteOptions) -> Option<String> {
    let mut out = String::new();
    if !options.custom_args.is_empty() {
        out.push_str(&format!(" WITH ARGS ({})", assignments(&options.custom_args)?));
    }
    if let Some(params) = &options.args_from_configmap {
        out.push_str(&format!(" WITH PARAMS_FROM_CONFIGMAP {}", name(&params.cm_name)?));
        if let Some(prefix) = &params.key_prefix {
            out.push_str(&format!(" KEY_PREFIX {}", quote(prefix)));
        }
    }
    for mount in &options.secret_mounts {
        out.push_str(&format!(
            " WITH SECRET {} KEY {} AS {}",
            name(&mount.secret_name)?,
            quote(&mount.key),
            quote(&mount.mount_path)
        ));
    }
    Some(out)
}

fn project_ref(target: &ProjectRef) -> Option<String> {
    match target {
        ProjectRef::Named(project) => Some(format!("PROJECT {}", name(project)?)),
        ProjectRef::ThisProject => Some("THIS PROJECT".to_string()),
    }
}

fn resource_kind(kind: &ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Secret => Some("SECRET"),
        ResourceKind::ConfigMap => Some("CONFIGMAP"),
        ResourceKind::Parameter => Some("PARAMETER"),
        _ => None,
    }
}

/// DSL text for `command`, terminated by `;`.
pub fn render(command: &Command) -> Option<String> {
    let body = match (&command.action, &command.kind, &command.payload) {
        // Resources
        (Action::Create | Action::Update, kind, Payload::Fields { name: n, fields }) => format!(
            "{} {} {} WITH {}",
            command.action,
            resource_kind(kind)?,
            name(n)?,
            assignments(fields)?
        ),
        (Action::Delete, ResourceKind::Script, Payload::Named(n)) => format!("DELETE SCRIPT {}", name(n)?),
        (Action::Delete, kind, Payload::Named(n)) => format!("DELETE {} {}", resource_kind(kind)?, name(n)?),

        // Scripts
        (
            Action::Create,
            ResourceKind::Script,
            Payload::Script {
                name: n,
                script_type,
                content,
            },
        ) => {
            let engine = content
                .engine
                .map(|e| format!(" ENGINE {}", e.as_str()))
                .unwrap_or_default();
            format!(
                "CREATE SCRIPT {} TYPE {}{} WITH {}",
                name(n)?,
                script_type.as_str(),
                engine,
                script_fields(content, false)?
            )
        }
        (Action::Update, ResourceKind::Script, Payload::ScriptUpdate { name: n, changes }) => {
            format!("UPDATE SCRIPT {} SET {}", name(n)?, script_fields(changes, true)?)
        }
        (Action::Get, ResourceKind::Script, Payload::Named(n)) => format!("GET SCRIPT {}", name(n)?),
        (Action::List, ResourceKind::Script, Payload::None) => "LIST SCRIPTS".to_string(),
        (Action::Execute, ResourceKind::Script, Payload::Execute { name: n, options }) => {
            format!("EXECUTE SCRIPT {}{}", name(n)?, execute_clauses(options)?)
        }

        // Projects
        (Action::CreateProject, _, Payload::Named(n)) => format!("CREATE PROJECT {}", name(n)?),
        (
            Action::CreateEnv,
            _,
            Payload::Environment {
                name: n,
                project,
                depends_on,
            },
        ) => {
            let mut text = format!("CREATE ENV {}", name(n)?);
            if let Some(target) = project {
                text.push_str(&format!(" FOR {}", project_ref(target)?));
            }
            if let Some(dependency) = depends_on {
                text.push_str(&format!(" DEPENDS ON {}", name(dependency)?));
            }
            text
        }
        (Action::ListProjects, _, Payload::None) => "LIST PROJECTS".to_string(),
        (Action::GetProject, _, Payload::Project(target)) => format!("GET {}", project_ref(target)?),
        (Action::UpdateProject, _, Payload::Rename { from, to }) => {
            format!("UPDATE PROJECT {} TO {}", name(from)?, name(to)?)
        }
        (Action::DropProject, _, Payload::Named(n)) => format!("DROP PROJECT {}", name(n)?),
        (
            Action::DropEnv,
            _,
            Payload::Environment {
                name: n,
                project,
                depends_on: None,
            },
        ) => match project {
            Some(target) => format!("DROP ENV {} FOR {}", name(n)?, project_ref(target)?),
            None => format!("DROP ENV {}", name(n)?),
        },
        (Action::UseProjectEnv, _, Payload::UseProject { project, environment }) => {
            format!("USE PROJECT {} ENV {}", name(project)?, name(environment)?)
        }
        _ => return None,
    };
    Some(format!("{};", body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigMapParams, ScriptEngine, ScriptType, SecretMount};

    #[test]
    fn test_render_quotes_values() {
        let command = Command::new(
            Action::Create,
            ResourceKind::Secret,
            Payload::Fields {
                name: "db".to_string(),
                fields: Fields::from([("pass".to_string(), "a\"b".to_string())]),
            },
        );
        assert_eq!(render(&command).as_deref(), Some(r#"CREATE SECRET db WITH pass="a\"b";"#));
    }

    #[test]
    fn test_render_script_shapes() {
        let create = Command::new(
            Action::Create,
            ResourceKind::Script,
            Payload::Script {
                name: "etl".to_string(),
                script_type: ScriptType::Python,
                content: ScriptFields {
                    code: Some("print(1)".to_string()),
                    engine: Some(ScriptEngine::K8sJob),
                    ..ScriptFields::default()
                },
            },
        );
        assert_eq!(
            render(&create).as_deref(),
            Some(r#"CREATE SCRIPT etl TYPE PYTHON ENGINE K8S_JOB WITH CODE="print(1)";"#)
        );

        let execute = Command::new(
            Action::Execute,
            ResourceKind::Script,
            Payload::Execute {
                name: "etl".to_string(),
                options: ExecuteOptions {
                    custom_args: Fields::from([("day".to_string(), "mon".to_string())]),
                    args_from_configmap: Some(ConfigMapParams {
                        cm_name: "cfg".to_string(),
                        key_prefix: None,
                    }),
                    secret_mounts: vec![SecretMount {
                        secret_name: "db".to_string(),
                        key: "pass".to_string(),
                        mount_path: "/p".to_string(),
                    }],
                },
            },
        );
        assert_eq!(
            render(&execute).as_deref(),
            Some(r#"EXECUTE SCRIPT etl WITH ARGS (day="mon") WITH PARAMS_FROM_CONFIGMAP cfg WITH SECRET db KEY "pass" AS "/p";"#)
        );
    }

    #[test]
    fn test_unspellable_commands_render_as_none() {
        let empty_fields = Command::new(
            Action::Update,
            ResourceKind::ConfigMap,
            Payload::Fields {
                name: "cfg".to_string(),
                fields: Fields::new(),
            },
        );
        assert_eq!(render(&empty_fields), None);

        let bad_name = Command::new(Action::DropProject, ResourceKind::Project, Payload::Named("two words".to_string()));
        assert_eq!(render(&bad_name), None);

        let custom = Command::new(
            Action::Custom("EXPLODE".to_string()),
            ResourceKind::Custom("BOMB".to_string()),
            Payload::None,
        );
        assert_eq!(render(&custom), None);
    }
}
