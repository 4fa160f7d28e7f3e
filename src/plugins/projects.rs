// src/plugins/projects.rs

//! # Projects
//!
//! A project is a set of namespaces sharing a `kubesol.io/project-id` label,
//! one per environment, named `<project-id>-<environment>`.

use super::{constant_map, handler_map, keyword_transforms, keywords, rule_map};
use crate::constants::{
    DEFAULT_PROJECT_ENVIRONMENT, ENVIRONMENT_DEPENDS_ON_LABEL_KEY, ENVIRONMENT_LABEL_KEY, MAX_ENVIRONMENT_NAME_LEN,
    MAX_K8S_NAME_LEN, MAX_PROJECT_NAME_LEN, PROJECT_ID_LABEL_KEY, PROJECT_ID_PREFIX, PROJECT_NAME_LABEL_KEY,
};
use crate::core::plugin::{DispatchError, Handler, HandlerContext, Plugin, PluginMetadata, handler};
use crate::core::transform::{Args, TransformError, TransformFn, callback, describe};
use crate::models::{Action, Command, CommandKey, Payload, ProjectRef, ResourceKind, Value};
use crate::system::cluster::{ClusterApi, Labels, NamespaceInfo};
use anyhow::{Result, anyhow, bail};
use colored::Colorize;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const PLUGIN_NAME: &str = "projects";

lazy_static! {
    static ref PROJECT_NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*[a-zA-Z0-9]$|^[a-zA-Z0-9]$").unwrap();
    static ref ENVIRONMENT_NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]$|^[a-zA-Z0-9]$").unwrap();
    static ref NAMESPACE_UNSAFE_RE: Regex = Regex::new(r"[^a-z0-9-]+").unwrap();
}

const RULES: &[(&str, &str)] = &[
    ("create_project_command", "CREATE_KW PROJECT_KW NAME"),
    (
        "create_env_command",
        "CREATE_KW ENV_KW NAME [project_target_clause] [depends_on_clause]",
    ),
    ("list_projects_command", "LIST_KW PROJECTS_KW"),
    ("get_project_command", "GET_KW project_ref"),
    ("update_project_command", "UPDATE_KW PROJECT_KW NAME TO_KW NAME"),
    ("drop_project_command", "DROP_KW PROJECT_KW NAME"),
    ("drop_env_command", "DROP_KW ENV_KW NAME [project_target_clause]"),
    ("use_project_env_command", "USE_KW PROJECT_KW NAME ENV_KW NAME"),
    ("project_target_clause", "(FOR_KW | FROM_KW) project_ref"),
    ("project_ref", "named_project_ref | this_project_ref"),
    ("named_project_ref", "PROJECT_KW NAME"),
    ("this_project_ref", "THIS_KW PROJECT_KW"),
    ("depends_on_clause", "DEPENDS_KW ON_KW NAME"),
    ("PROJECT_KW", r"/PROJECT\b/i"),
    ("PROJECTS_KW", r"/PROJECTS?\b/i"),
    ("ENV_KW", r"/ENV\b/i | /ENVIRONMENT\b/i"),
    ("USE_KW", r"/USE\b/i"),
    ("DROP_KW", r"/DROP\b/i"),
    ("FOR_KW", r"/FOR\b/i"),
    ("FROM_KW", r"/FROM\b/i"),
    ("THIS_KW", r"/THIS\b/i"),
    ("TO_KW", r"/TO\b/i"),
    ("DEPENDS_KW", r"/DEPENDS\b/i"),
    ("ON_KW", r"/ON\b/i"),
];

const KEYWORD_TERMINALS: &[&str] = &[
    "PROJECT_KW",
    "PROJECTS_KW",
    "ENV_KW",
    "USE_KW",
    "DROP_KW",
    "FOR_KW",
    "FROM_KW",
    "THIS_KW",
    "TO_KW",
    "DEPENDS_KW",
    "ON_KW",
];

#[derive(Debug)]
pub struct ProjectsPlugin;

// --- Naming ---

pub fn generate_project_id() -> String {
    let hex: String = uuid::Uuid::new_v4().simple().to_string().chars().take(12).collect();
    format!("{}{}", PROJECT_ID_PREFIX, hex)
}

/// `<project-id>-<environment>`, reduced to a valid namespace name.
pub fn namespace_for(project_id: &str, environment: &str) -> String {
    let lowered = environment.to_lowercase();
    let sanitized = NAMESPACE_UNSAFE_RE.replace_all(&lowered, "-");
    let sanitized = sanitized.trim_matches('-');
    let env = if sanitized.is_empty() { "env" } else { sanitized };
    format!("{}-{}", project_id, env)
        .chars()
        .take(MAX_K8S_NAME_LEN)
        .collect()
}

pub fn validate_project_name(name: &str) -> Result<()> {
    if !PROJECT_NAME_RE.is_match(name) {
        bail!(t!("projects.error.invalid_project_name"), name = name);
    }
    if name.chars().count() > MAX_PROJECT_NAME_LEN {
        bail!(t!("projects.error.name_too_long"), name = name, max = MAX_PROJECT_NAME_LEN);
    }
    Ok(())
}

pub fn validate_environment_name(name: &str) -> Result<()> {
    if !ENVIRONMENT_NAME_RE.is_match(name) {
        bail!(t!("projects.error.invalid_environment_name"), name = name);
    }
    if name.chars().count() > MAX_ENVIRONMENT_NAME_LEN {
        bail!(t!("projects.error.name_too_long"), name = name, max = MAX_ENVIRONMENT_NAME_LEN);
    }
    Ok(())
}

// --- Transforms ---

fn project_command(action: Action, kind: ResourceKind, payload: Payload) -> Value {
    Value::Command(Command::new(action, kind, payload))
}

fn lowered(args: &mut Args) -> Result<String, TransformError> {
    Ok(args.string()?.to_lowercase())
}

/// Reads the optional target and dependency clauses of an environment command.
fn environment_clauses(rule: &str, values: Vec<Value>) -> Result<(Option<ProjectRef>, Option<String>), TransformError> {
    let mut project = None;
    let mut depends_on = None;
    for value in values {
        match value {
            Value::Pair(tag, inner) if tag == "project" => {
                project = Some(ProjectRef::Named(inner.as_str().unwrap_or_default().to_string()));
            }
            Value::Pair(tag, _) if tag == "this_project" => project = Some(ProjectRef::ThisProject),
            Value::Pair(tag, inner) if tag == "depends_on" => {
                depends_on = inner.as_str().map(str::to_string);
            }
            other => {
                return Err(TransformError::Shape {
                    rule: rule.to_string(),
                    expected: "a project or DEPENDS ON clause".to_string(),
                    found: describe(&other),
                });
            }
        }
    }
    Ok((project, depends_on))
}

fn tagged(tag: &str, value: Value) -> Value {
    Value::Pair(tag.to_string(), Box::new(value))
}

fn command_callbacks() -> Vec<(&'static str, TransformFn)> {
    vec![
        (
            "create_project_command",
            callback(|values| {
                let name = lowered(Args::new("create_project_command", values).skip(2))?;
                Ok(project_command(Action::CreateProject, ResourceKind::Project, Payload::Named(name)))
            }),
        ),
        (
            "create_env_command",
            callback(|values| {
                let mut args = Args::new("create_env_command", values);
                let name = lowered(args.skip(2))?;
                let (project, depends_on) = environment_clauses("create_env_command", args.rest())?;
                Ok(project_command(
                    Action::CreateEnv,
                    ResourceKind::Environment,
                    Payload::Environment {
                        name,
                        project,
                        depends_on,
                    },
                ))
            }),
        ),
        (
            "list_projects_command",
            callback(|_| Ok(project_command(Action::ListProjects, ResourceKind::Project, Payload::None))),
        ),
        (
            "get_project_command",
            callback(|values| {
                let (project, _) = environment_clauses("get_project_command", Args::new("get_project_command", values).skip(1).rest())?;
                let project = project.ok_or_else(|| TransformError::Shape {
                    rule: "get_project_command".to_string(),
                    expected: "a project".to_string(),
                    found: "nothing".to_string(),
                })?;
                Ok(project_command(Action::GetProject, ResourceKind::Project, Payload::Project(project)))
            }),
        ),
        (
            "update_project_command",
            callback(|values| {
                let mut args = Args::new("update_project_command", values);
                let from = lowered(args.skip(2))?;
                let to = lowered(args.skip(1))?;
                Ok(project_command(
                    Action::UpdateProject,
                    ResourceKind::Project,
                    Payload::Rename { from, to },
                ))
            }),
        ),
        (
            "drop_project_command",
            callback(|values| {
                let name = lowered(Args::new("drop_project_command", values).skip(2))?;
                Ok(project_command(Action::DropProject, ResourceKind::Project, Payload::Named(name)))
            }),
        ),
        (
            "drop_env_command",
            callback(|values| {
                let mut args = Args::new("drop_env_command", values);
                let name = lowered(args.skip(2))?;
                let (project, _) = environment_clauses("drop_env_command", args.rest())?;
                Ok(project_command(
                    Action::DropEnv,
                    ResourceKind::Environment,
                    Payload::Environment {
                        name,
                        project,
                        depends_on: None,
                    },
                ))
            }),
        ),
        (
            "use_project_env_command",
            callback(|values| {
                let mut args = Args::new("use_project_env_command", values);
                let project = lowered(args.skip(2))?;
                let environment = lowered(args.skip(1))?;
                Ok(project_command(
                    Action::UseProjectEnv,
                    ResourceKind::Project,
                    Payload::UseProject { project, environment },
                ))
            }),
        ),
        (
            "project_target_clause",
            callback(|values| Args::new("project_target_clause", values).skip(1).value()),
        ),
        (
            "named_project_ref",
            callback(|values| {
                let name = lowered(Args::new("named_project_ref", values).skip(1))?;
                Ok(tagged("project", Value::Str(name)))
            }),
        ),
        (
            "this_project_ref",
            callback(|_| Ok(tagged("this_project", Value::Missing))),
        ),
        (
            "depends_on_clause",
            callback(|values| {
                let name = lowered(Args::new("depends_on_clause", values).skip(2))?;
                Ok(tagged("depends_on", Value::Str(name)))
            }),
        ),
    ]
}

// --- Cluster lookups ---

fn has_project_id(ns: &NamespaceInfo) -> bool {
    ns.labels.contains_key(PROJECT_ID_LABEL_KEY)
}

fn label(ns: &NamespaceInfo, key: &str) -> String {
    ns.labels.get(key).cloned().unwrap_or_default()
}

/// Ids of the projects currently carrying `name`.
fn project_ids_named(cluster: &dyn ClusterApi, name: &str) -> Result<BTreeSet<String>> {
    let selector = Labels::from([(PROJECT_NAME_LABEL_KEY.to_string(), name.to_string())]);
    Ok(cluster
        .list_namespaces(&selector)?
        .iter()
        .filter(|ns| has_project_id(ns))
        .map(|ns| label(ns, PROJECT_ID_LABEL_KEY))
        .collect())
}

/// The unique project id for a display name.
fn resolve_project_id(cluster: &dyn ClusterApi, name: &str) -> Result<String> {
    let ids = project_ids_named(cluster, name)?;
    let mut iter = ids.iter();
    match (iter.next(), iter.next()) {
        (Some(id), None) => Ok(id.clone()),
        (None, _) => Err(anyhow!(t!("projects.error.project_not_found"), name = name)),
        (Some(_), Some(_)) => Err(anyhow!(
            t!("projects.error.ambiguous_project"),
            name = name,
            ids = ids.iter().cloned().collect::<Vec<_>>().join(", ")
        )),
    }
}

fn project_namespaces(cluster: &dyn ClusterApi, project_id: &str) -> Result<Vec<NamespaceInfo>> {
    let selector = Labels::from([(PROJECT_ID_LABEL_KEY.to_string(), project_id.to_string())]);
    Ok(cluster.list_namespaces(&selector)?)
}

/// `(project id, project name)` of an explicit target or the active project.
fn resolve_target(ctx: &HandlerContext<'_>, target: Option<&ProjectRef>) -> Result<(String, String)> {
    match target {
        Some(ProjectRef::Named(name)) => Ok((resolve_project_id(ctx.services.cluster.as_ref(), name)?, name.clone())),
        Some(ProjectRef::ThisProject) | None => {
            let scope = ctx
                .session
                .scope()
                .ok_or_else(|| anyhow!(t!("projects.error.no_active_project")))?;
            if target.is_none() {
                println!(
                    "{}",
                    format!(t!("projects.info.using_active_project"), name = scope.project_name).dimmed()
                );
            }
            Ok((scope.project_id.clone(), scope.project_name.clone()))
        }
    }
}

// --- Handlers ---

fn handle_create_project(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Named(name) = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    validate_project_name(name)?;
    let cluster = ctx.services.cluster.as_ref();

    // 1. Display names are unique.
    if let Some(existing) = project_ids_named(cluster, name)?.into_iter().next() {
        bail!(t!("projects.error.project_exists"), name = name, id = existing);
    }

    // 2. Create the default environment.
    let project_id = generate_project_id();
    let namespace = namespace_for(&project_id, DEFAULT_PROJECT_ENVIRONMENT);
    let labels = Labels::from([
        (PROJECT_ID_LABEL_KEY.to_string(), project_id.clone()),
        (PROJECT_NAME_LABEL_KEY.to_string(), name.clone()),
        (ENVIRONMENT_LABEL_KEY.to_string(), DEFAULT_PROJECT_ENVIRONMENT.to_string()),
    ]);
    cluster.create_namespace(&namespace, &labels)?;
    log::info!("Created project '{}' ({}) with namespace '{}'.", name, project_id, namespace);

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("projects.success.project_created"), name = name, id = project_id)
    );
    println!(
        "  {}",
        format!(
            t!("projects.info.default_environment"),
            env = DEFAULT_PROJECT_ENVIRONMENT,
            namespace = namespace
        )
    );

    // 3. Offer to switch to it.
    let prompt = format!(
        t!("projects.prompt.switch_context"),
        name = name,
        env = DEFAULT_PROJECT_ENVIRONMENT
    );
    if ctx.services.confirm(&prompt)? {
        ctx.session
            .enter(name, &project_id, DEFAULT_PROJECT_ENVIRONMENT, &namespace);
    }
    Ok(())
}

fn handle_create_env(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Environment {
        name,
        project,
        depends_on,
    } = &command.payload
    else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    validate_environment_name(name)?;
    let (project_id, project_name) = resolve_target(ctx, project.as_ref())?;
    let cluster = ctx.services.cluster.as_ref();

    let namespace = namespace_for(&project_id, name);
    if cluster.get_namespace(&namespace)?.is_some() {
        println!(
            "{}",
            format!(t!("projects.info.environment_exists"), env = name, project = project_name, namespace = namespace)
                .yellow()
        );
        return Ok(());
    }

    let mut labels = Labels::from([
        (PROJECT_ID_LABEL_KEY.to_string(), project_id.clone()),
        (PROJECT_NAME_LABEL_KEY.to_string(), project_name.clone()),
        (ENVIRONMENT_LABEL_KEY.to_string(), name.clone()),
    ]);
    if let Some(dependency) = depends_on {
        if cluster.get_namespace(&namespace_for(&project_id, dependency))?.is_none() {
            bail!(
                t!("projects.error.environment_not_found"),
                env = dependency,
                project = project_name
            );
        }
        labels.insert(ENVIRONMENT_DEPENDS_ON_LABEL_KEY.to_string(), dependency.clone());
    }
    cluster.create_namespace(&namespace, &labels)?;

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(
            t!("projects.success.environment_created"),
            env = name,
            project = project_name,
            namespace = namespace
        )
    );
    Ok(())
}

fn handle_list_projects(_command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let namespaces = ctx.services.cluster.list_namespaces(&Labels::new())?;

    // project id -> (display names, environments)
    let mut projects: BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
    for ns in namespaces.iter().filter(|ns| has_project_id(ns)) {
        let entry = projects.entry(label(ns, PROJECT_ID_LABEL_KEY)).or_default();
        if let Some(name) = ns.labels.get(PROJECT_NAME_LABEL_KEY) {
            entry.0.insert(name.clone());
        }
        if let Some(env) = ns.labels.get(ENVIRONMENT_LABEL_KEY) {
            entry.1.insert(env.clone());
        }
    }

    if projects.is_empty() {
        println!("{}", t!("projects.list.empty").dimmed());
        return Ok(());
    }

    let mut rows: Vec<(String, String, String)> = projects
        .into_iter()
        .map(|(id, (names, envs))| {
            let display = if names.is_empty() {
                "-".to_string()
            } else {
                names.into_iter().collect::<Vec<_>>().join(", ")
            };
            let envs = if envs.is_empty() {
                "-".to_string()
            } else {
                envs.into_iter().collect::<Vec<_>>().join(", ")
            };
            (display, id, envs)
        })
        .collect();
    rows.sort();

    println!("\n{}", t!("projects.list.header").bold());
    for (name, id, envs) in rows {
        println!("  {} {} {}", name.cyan().bold(), format!("({})", id).dimmed(), envs);
    }
    Ok(())
}

fn handle_get_project(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Project(target) = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    let (project_id, project_name) = resolve_target(ctx, Some(target))?;

    let mut namespaces = project_namespaces(ctx.services.cluster.as_ref(), &project_id)?;
    if namespaces.is_empty() {
        println!(
            "{}",
            format!(t!("projects.info.no_environments"), name = project_name).dimmed()
        );
        return Ok(());
    }
    namespaces.sort_by_key(|ns| label(ns, ENVIRONMENT_LABEL_KEY));

    println!(
        "\n{}",
        format!(t!("projects.get.header"), name = project_name, id = project_id).bold()
    );
    for ns in &namespaces {
        let depends = ns
            .labels
            .get(ENVIRONMENT_DEPENDS_ON_LABEL_KEY)
            .map(|d| format!(" <- {}", d))
            .unwrap_or_default();
        println!(
            "  {}{}  {}  {}  {}",
            label(ns, ENVIRONMENT_LABEL_KEY).cyan(),
            depends,
            ns.name,
            ns.phase,
            ns.created.dimmed()
        );
    }
    Ok(())
}

fn handle_update_project(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Rename { from, to } = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    validate_project_name(from)?;
    validate_project_name(to)?;
    if from == to {
        println!("{}", format!(t!("projects.info.same_name"), name = to).dimmed());
        return Ok(());
    }
    let cluster = ctx.services.cluster.as_ref();

    let project_id = resolve_project_id(cluster, from)?;
    if let Some(other) = project_ids_named(cluster, to)?
        .into_iter()
        .find(|id| *id != project_id)
    {
        bail!(t!("projects.error.project_exists"), name = to, id = other);
    }

    let relabel = Labels::from([(PROJECT_NAME_LABEL_KEY.to_string(), to.clone())]);
    let namespaces = project_namespaces(cluster, &project_id)?;
    for ns in &namespaces {
        log::debug!("Relabelling namespace '{}' to project name '{}'.", ns.name, to);
        cluster.label_namespace(&ns.name, &relabel)?;
    }

    if ctx.session.project_id() == Some(project_id.as_str()) {
        ctx.session.rename_project(to);
    }
    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("projects.success.project_renamed"), from = from, to = to, count = namespaces.len())
    );
    Ok(())
}

fn handle_drop_project(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Named(name) = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    let cluster = ctx.services.cluster.as_ref();
    let project_id = resolve_project_id(cluster, name)?;
    let namespaces = project_namespaces(cluster, &project_id)?;

    println!(
        "\n{}",
        format!(t!("projects.warning.drop_project_header"), name = name, id = project_id)
            .red()
            .bold()
    );
    for ns in &namespaces {
        println!("  - {} ({})", ns.name, label(ns, ENVIRONMENT_LABEL_KEY));
    }
    let prompt = format!(t!("projects.prompt.confirm_drop_project"), name = name);
    if !ctx.services.confirm(&prompt)? {
        println!("{}", t!("common.info.operation_cancelled").yellow());
        return Ok(());
    }

    for ns in &namespaces {
        cluster.delete_namespace(&ns.name)?;
    }
    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("projects.success.project_dropped"), name = name, count = namespaces.len())
    );

    if ctx.session.project_id() == Some(project_id.as_str()) {
        ctx.session.clear();
        println!("{}", t!("projects.info.context_cleared").dimmed());
    }
    Ok(())
}

fn handle_drop_env(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Environment { name, project, .. } = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    let (project_id, project_name) = resolve_target(ctx, project.as_ref())?;
    let cluster = ctx.services.cluster.as_ref();

    let namespace = namespace_for(&project_id, name);
    let ns = cluster.get_namespace(&namespace)?.ok_or_else(|| {
        anyhow!(
            t!("projects.error.environment_not_found"),
            env = name,
            project = project_name
        )
    })?;
    if ns.labels.get(PROJECT_ID_LABEL_KEY) != Some(&project_id) || ns.labels.get(ENVIRONMENT_LABEL_KEY) != Some(name) {
        bail!(t!("projects.error.label_mismatch"), namespace = namespace);
    }

    let prompt = format!(
        t!("projects.prompt.confirm_drop_env"),
        env = name,
        project = project_name,
        namespace = namespace
    );
    if !ctx.services.confirm(&prompt)? {
        println!("{}", t!("common.info.operation_cancelled").yellow());
        return Ok(());
    }
    cluster.delete_namespace(&namespace)?;
    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("projects.success.environment_dropped"), env = name, namespace = namespace)
    );

    if ctx.session.project_id() == Some(project_id.as_str()) && ctx.session.environment() == Some(name.as_str()) {
        ctx.session.clear();
        println!("{}", t!("projects.info.context_cleared").dimmed());
    }
    Ok(())
}

fn handle_use_project_env(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::UseProject { project, environment } = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    validate_project_name(project)?;
    validate_environment_name(environment)?;
    let cluster = ctx.services.cluster.as_ref();

    let project_id = resolve_project_id(cluster, project)?;
    let namespace = namespace_for(&project_id, environment);
    if cluster.get_namespace(&namespace)?.is_none() {
        bail!(
            t!("projects.error.environment_not_found"),
            env = environment,
            project = project
        );
    }

    ctx.session.enter(project, &project_id, environment, &namespace);
    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(
            t!("projects.success.context_switched"),
            project = project,
            env = environment,
            namespace = namespace
        )
    );
    Ok(())
}

impl Plugin for ProjectsPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            PLUGIN_NAME,
            env!("CARGO_PKG_VERSION"),
            "Projects and environments backed by labelled namespaces.",
            &[keywords::PLUGIN_NAME],
        )
    }

    fn grammar_rules(&self) -> BTreeMap<String, String> {
        rule_map(RULES)
    }

    fn command_handlers(&self) -> BTreeMap<CommandKey, Handler> {
        let project = |action| CommandKey::new(action, ResourceKind::Project);
        let environment = |action| CommandKey::new(action, ResourceKind::Environment);
        handler_map(vec![
            (project(Action::CreateProject), handler(handle_create_project)),
            (environment(Action::CreateEnv), handler(handle_create_env)),
            (project(Action::ListProjects), handler(handle_list_projects)),
            (project(Action::GetProject), handler(handle_get_project)),
            (project(Action::UpdateProject), handler(handle_update_project)),
            (project(Action::DropProject), handler(handle_drop_project)),
            (environment(Action::DropEnv), handler(handle_drop_env)),
            (project(Action::UseProjectEnv), handler(handle_use_project_env)),
        ])
    }

    fn constants(&self) -> BTreeMap<String, String> {
        constant_map(&[
            ("ACTION_CREATE_PROJECT", "CREATE_PROJECT"),
            ("ACTION_CREATE_ENV", "CREATE_ENV"),
            ("ACTION_LIST_PROJECTS", "LIST_PROJECTS"),
            ("ACTION_GET_PROJECT", "GET_PROJECT"),
            ("ACTION_UPDATE_PROJECT", "UPDATE_PROJECT"),
            ("ACTION_DROP_PROJECT", "DROP_PROJECT"),
            ("ACTION_DROP_ENV", "DROP_ENV"),
            ("ACTION_USE_PROJECT_ENV", "USE_PROJECT_ENV"),
            ("LOGICAL_TYPE_PROJECT", "PROJECT_LOGICAL"),
            ("LOGICAL_TYPE_ENVIRONMENT", "ENVIRONMENT_LOGICAL"),
            ("DEFAULT_PROJECT_ENVIRONMENT", DEFAULT_PROJECT_ENVIRONMENT),
            ("PROJECT_ID_LABEL_KEY", PROJECT_ID_LABEL_KEY),
            ("PROJECT_NAME_LABEL_KEY", PROJECT_NAME_LABEL_KEY),
            ("ENVIRONMENT_LABEL_KEY", ENVIRONMENT_LABEL_KEY),
            ("ENVIRONMENT_DEPENDS_ON_LABEL_KEY", ENVIRONMENT_DEPENDS_ON_LABEL_KEY),
        ])
    }

    fn transforms(&self) -> HashMap<String, TransformFn> {
        let mut transforms = keyword_transforms(KEYWORD_TERMINALS);
        transforms.extend(
            command_callbacks()
                .into_iter()
                .map(|(name, callback)| (name.to_string(), callback)),
        );
        transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::SessionContext;
    use crate::core::executor::Executor;
    use crate::plugins::test_support::harness;
    use crate::system::cluster::MemoryCluster;
    use std::sync::Arc;

    fn project_namespaces_of(cluster: &MemoryCluster, name: &str) -> Vec<NamespaceInfo> {
        let id = resolve_project_id(cluster, name).unwrap();
        project_namespaces(cluster, &id).unwrap()
    }

    /// A session inside project `shop`, environment `dev`.
    fn with_shop() -> (Executor, Arc<MemoryCluster>, SessionContext) {
        let (mut executor, cluster, mut session) = harness();
        assert!(executor.execute("CREATE PROJECT shop;", &mut session));
        (executor, cluster, session)
    }

    #[test]
    fn test_namespace_naming() {
        assert_eq!(namespace_for("proj-abc", "Dev"), "proj-abc-dev");
        assert_eq!(namespace_for("proj-abc", "__"), "proj-abc-env");
        assert!(namespace_for(&generate_project_id(), &"e".repeat(80)).len() <= MAX_K8S_NAME_LEN);

        let id = generate_project_id();
        assert!(id.starts_with("proj-"));
        assert_eq!(id.len(), "proj-".len() + 12);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_project_name("shop_2").is_ok());
        assert!(validate_project_name("a").is_ok());
        assert!(validate_project_name("shop_").is_err());
        assert!(validate_project_name(&"p".repeat(51)).is_err());
        assert!(validate_environment_name("qa-1").is_ok());
        assert!(validate_environment_name("qa_1").is_err());
        assert!(validate_environment_name(&"e".repeat(21)).is_err());
    }

    #[test]
    fn test_create_project_creates_dev_environment_and_enters_it() {
        let (_, cluster, session) = with_shop();

        let namespaces = project_namespaces_of(&cluster, "shop");
        assert_eq!(namespaces.len(), 1);
        let ns = &namespaces[0];
        assert_eq!(ns.labels.get(ENVIRONMENT_LABEL_KEY).map(String::as_str), Some("dev"));
        assert!(ns.name.ends_with("-dev"));

        assert!(session.is_project_context_active());
        assert_eq!(session.project_name(), Some("shop"));
        assert_eq!(session.current_namespace(), ns.name);
    }

    #[test]
    fn test_duplicate_and_invalid_project_names_fail() {
        let (mut executor, _, mut session) = with_shop();
        assert!(!executor.execute("CREATE PROJECT SHOP;", &mut session));
        assert!(!executor.execute("CREATE PROJECT bad_;", &mut session));
    }

    #[test]
    fn test_create_env_targets() {
        // --- Setup ---
        let (mut executor, cluster, mut session) = with_shop();

        // --- Execute ---
        assert!(executor.execute("CREATE ENV staging FOR THIS PROJECT DEPENDS ON dev;", &mut session));
        assert!(executor.execute("CREATE ENVIRONMENT qa FROM PROJECT shop;", &mut session));
        assert!(executor.execute("CREATE ENV prod;", &mut session));
        assert!(!executor.execute("CREATE ENV uat DEPENDS ON missing;", &mut session));

        // --- Assert ---
        let namespaces = project_namespaces_of(&cluster, "shop");
        let envs: BTreeSet<String> = namespaces.iter().map(|ns| label(ns, ENVIRONMENT_LABEL_KEY)).collect();
        assert_eq!(envs, BTreeSet::from(["dev", "prod", "qa", "staging"].map(String::from)));
        let staging = namespaces
            .iter()
            .find(|ns| label(ns, ENVIRONMENT_LABEL_KEY) == "staging")
            .unwrap();
        assert_eq!(label(staging, ENVIRONMENT_DEPENDS_ON_LABEL_KEY), "dev");
    }

    #[test]
    fn test_environment_commands_need_a_project() {
        let (mut executor, _, mut session) = harness();
        assert!(!executor.execute("CREATE ENV qa;", &mut session));
        assert!(!executor.execute("CREATE ENV qa FOR THIS PROJECT;", &mut session));
        assert!(!executor.execute("GET THIS PROJECT;", &mut session));
        assert!(!executor.execute("CREATE ENV qa FOR PROJECT nowhere;", &mut session));
    }

    #[test]
    fn test_list_and_get() {
        let (mut executor, _, mut session) = with_shop();
        assert!(executor.execute("LIST PROJECTS;", &mut session));
        assert!(executor.execute("list project", &mut session));
        assert!(executor.execute("GET PROJECT shop;", &mut session));
        assert!(executor.execute("GET THIS PROJECT;", &mut session));
        assert!(!executor.execute("GET PROJECT ghost;", &mut session));
    }

    #[test]
    fn test_rename_updates_labels_and_context() {
        let (mut executor, cluster, mut session) = with_shop();
        assert!(executor.execute("CREATE ENV qa;", &mut session));

        assert!(executor.execute("UPDATE PROJECT shop TO store;", &mut session));

        assert!(project_ids_named(cluster.as_ref(), "shop").unwrap().is_empty());
        assert_eq!(project_namespaces_of(&cluster, "store").len(), 2);
        assert_eq!(session.project_name(), Some("store"));

        assert!(executor.execute("CREATE PROJECT other;", &mut session));
        assert!(!executor.execute("UPDATE PROJECT other TO store;", &mut session));
    }

    #[test]
    fn test_use_project_env() {
        let (mut executor, _, mut session) = with_shop();
        assert!(executor.execute("CREATE ENV qa;", &mut session));
        session.clear();

        assert!(executor.execute("USE PROJECT shop ENV qa;", &mut session));
        assert_eq!(session.environment(), Some("qa"));
        assert!(session.current_namespace().ends_with("-qa"));

        assert!(!executor.execute("USE PROJECT shop ENV nope;", &mut session));
        assert_eq!(session.environment(), Some("qa"));
    }

    #[test]
    fn test_dropping_active_environment_clears_context() {
        let (mut executor, cluster, mut session) = with_shop();
        assert!(executor.execute("CREATE ENV qa;", &mut session));

        assert!(executor.execute("DROP ENV qa;", &mut session));
        assert!(session.is_project_context_active());

        assert!(executor.execute("DROP ENV dev FROM THIS PROJECT;", &mut session));
        assert!(!session.is_project_context_active());
        assert_eq!(session.current_namespace(), "default");
        assert!(resolve_project_id(cluster.as_ref(), "shop").is_err());
    }

    #[test]
    fn test_drop_project_removes_every_environment() {
        let (mut executor, cluster, mut session) = with_shop();
        assert!(executor.execute("CREATE ENV qa;", &mut session));

        assert!(executor.execute("DROP PROJECT shop;", &mut session));

        assert!(resolve_project_id(cluster.as_ref(), "shop").is_err());
        assert!(!session.is_project_context_active());
        assert!(!executor.execute("DROP PROJECT shop;", &mut session));
    }
}
