// src/plugins/scripts.rs

//! # Scripts
//!
//! Scripts live in config maps named `kubesol-script-<name>` and run as
//! Kubernetes Jobs that mount that config map.
//!
//! ```text
//! CREATE SCRIPT etl TYPE PYTHON [ENGINE K8S_JOB] WITH CODE="...", DESCRIPTION="..."
//! UPDATE SCRIPT etl SET CODE="...", ENGINE=K8S_JOB
//! EXECUTE SCRIPT etl WITH ARGS (day="mon") WITH PARAMS_FROM_CONFIGMAP cfg KEY_PREFIX "etl_"
//!     WITH SECRET db KEY "pass" AS "/etc/db/pass"
//! ```

use super::{constant_map, handler_map, keyword_transforms, keywords, rule_map};
use crate::constants::{
    SCRIPT_CM_KEY_CODE, SCRIPT_CM_KEY_CODE_FROM_FILE, SCRIPT_CM_KEY_DESCRIPTION, SCRIPT_CM_KEY_ENGINE,
    SCRIPT_CM_KEY_PARAMS_SPEC, SCRIPT_CM_KEY_TYPE, SCRIPT_CM_LABEL_ROLE, SCRIPT_CM_LABEL_ROLE_VALUE, SCRIPT_CM_PREFIX,
};
use crate::core::paths;
use crate::core::plugin::{DispatchError, Handler, HandlerContext, Plugin, PluginMetadata, handler};
use crate::core::transform::{Args, TransformError, TransformFn, callback, describe, list_callback, pair_callback};
use crate::models::{
    Action, Command, CommandKey, ConfigMapParams, ExecuteOptions, Fields, Payload, ResourceKind, ScriptEngine,
    ScriptFields, ScriptType, SecretMount, Value,
};
use crate::system::cluster::{Labels, ObjectKind, StoredObject};
use crate::system::job_runner::{self, JobOutcome, ScriptJob};
use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use std::collections::{BTreeMap, HashMap};
use std::fs;

pub const PLUGIN_NAME: &str = "scripts";

const RULES: &[(&str, &str)] = &[
    (
        "create_script_command",
        "CREATE_KW SCRIPT_KW NAME TYPE_KW SCRIPT_TYPE [script_engine_clause] WITH_KW script_content_fields",
    ),
    ("update_script_command", "UPDATE_KW SCRIPT_KW NAME SET_KW script_update_fields"),
    ("delete_script_command", "DELETE_KW SCRIPT_KW NAME"),
    ("get_script_command", "GET_KW SCRIPT_KW NAME"),
    ("list_scripts_command", "LIST_KW SCRIPTS_KW"),
    (
        "execute_script_command",
        "EXECUTE_KW SCRIPT_KW NAME [script_args_clause] [script_params_clause] script_secret_clause*",
    ),
    ("script_engine_clause", "ENGINE_KW SCRIPT_ENGINE"),
    ("script_content_fields", "script_content_field (\",\" script_content_field)*"),
    ("script_content_field", "SCRIPT_TEXT_KEY \"=\" ESCAPED_STRING"),
    ("script_update_fields", "script_update_field (\",\" script_update_field)*"),
    (
        "script_update_field",
        "SCRIPT_UPDATE_KEY \"=\" ESCAPED_STRING | ENGINE_KW \"=\" SCRIPT_ENGINE",
    ),
    ("script_args_clause", "WITH_KW ARGS_KW \"(\" script_args \")\""),
    ("script_args", "script_arg (\",\" script_arg)*"),
    ("script_arg", "NAME \"=\" ESCAPED_STRING"),
    (
        "script_params_clause",
        "WITH_KW PARAMS_FROM_CONFIGMAP_KW NAME [KEY_PREFIX_KW ESCAPED_STRING]",
    ),
    (
        "script_secret_clause",
        "WITH_KW SECRET_KW NAME KEY_KW ESCAPED_STRING AS_KW ESCAPED_STRING",
    ),
    ("SCRIPT_KW", r"/SCRIPT\b/i"),
    ("SCRIPTS_KW", r"/SCRIPTS?\b/i"),
    ("TYPE_KW", r"/TYPE\b/i"),
    ("ENGINE_KW", r"/ENGINE\b/i"),
    ("SET_KW", r"/SET\b/i"),
    ("ARGS_KW", r"/ARGS\b/i"),
    ("PARAMS_FROM_CONFIGMAP_KW", r"/PARAMS_FROM_CONFIGMAP\b/i"),
    ("KEY_PREFIX_KW", r"/KEY_PREFIX\b/i"),
    ("KEY_KW", r"/KEY\b/i"),
    ("AS_KW", r"/AS\b/i"),
    ("SCRIPT_TYPE", r"/PYTHON\b/i | /PYSPARK\b/i | /SQL_SPARK\b/i"),
    ("SCRIPT_ENGINE", r"/K8S_JOB\b/i | /SPARK_OPERATOR\b/i"),
    (
        "SCRIPT_TEXT_KEY",
        r"/CODE_FROM_FILE\b/i | /CODE\b/i | /PARAMS_SPEC\b/i | /DESCRIPTION\b/i",
    ),
    ("SCRIPT_UPDATE_KEY", r"/CODE\b/i | /PARAMS_SPEC\b/i | /DESCRIPTION\b/i"),
];

const KEYWORD_TERMINALS: &[&str] = &[
    "SCRIPT_KW",
    "SCRIPTS_KW",
    "TYPE_KW",
    "ENGINE_KW",
    "SET_KW",
    "ARGS_KW",
    "PARAMS_FROM_CONFIGMAP_KW",
    "KEY_PREFIX_KW",
    "KEY_KW",
    "AS_KW",
    "SCRIPT_TYPE",
    "SCRIPT_ENGINE",
    "SCRIPT_TEXT_KEY",
    "SCRIPT_UPDATE_KEY",
];

const SQL_KEYWORDS: &[&str] = &["SELECT", "FROM", "WHERE", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP"];

const CODE_PREVIEW_LINES: usize = 10;

#[derive(Debug)]
pub struct ScriptsPlugin;

pub fn configmap_name(script_name: &str) -> String {
    format!("{}{}", SCRIPT_CM_PREFIX, script_name)
}

// --- Transforms ---

fn invalid(what: &str, value: &str) -> TransformError {
    TransformError::InvalidValue {
        what: what.to_string(),
        value: value.to_string(),
    }
}

fn parse_engine(raw: &str) -> Result<ScriptEngine, TransformError> {
    ScriptEngine::parse(raw).ok_or_else(|| invalid("script engine", raw))
}

/// Folds `KEY = value` pairs into script fields.
fn script_fields(rule: &str, value: Value) -> Result<ScriptFields, TransformError> {
    let mut fields = ScriptFields::default();
    for item in value.into_items() {
        let Value::Pair(key, value) = item else {
            return Err(TransformError::Shape {
                rule: rule.to_string(),
                expected: "script fields".to_string(),
                found: describe(&item),
            });
        };
        let text = value.as_str().unwrap_or_default().to_string();
        match key.as_str() {
            "CODE" => fields.code = Some(text),
            "CODE_FROM_FILE" => fields.code_from_file = Some(text),
            "PARAMS_SPEC" => fields.params_spec = Some(text),
            "DESCRIPTION" => fields.description = Some(text),
            "ENGINE" => fields.engine = Some(parse_engine(&text)?),
            other => return Err(invalid("script field", other)),
        }
    }
    Ok(fields)
}

fn script_command(action: Action, payload: Payload) -> Value {
    Value::Command(Command::new(action, ResourceKind::Script, payload))
}

fn named_callback(rule: &'static str, action: Action) -> TransformFn {
    callback(move |values| {
        let name = Args::new(rule, values).skip(2).string()?.to_lowercase();
        Ok(script_command(action.clone(), Payload::Named(name)))
    })
}

fn create_callback() -> TransformFn {
    const RULE: &str = "create_script_command";
    callback(|values| {
        let mut args = Args::new(RULE, values);
        let name = args.skip(2).string()?.to_lowercase();
        let raw_type = args.skip(1).string()?;
        let script_type = ScriptType::parse(&raw_type).ok_or_else(|| invalid("script type", &raw_type))?;

        let mut engine = None;
        let mut content = ScriptFields::default();
        for value in args.rest() {
            match value {
                Value::Pair(tag, inner) if tag == "engine" => {
                    engine = Some(parse_engine(inner.as_str().unwrap_or_default())?);
                }
                Value::List(_) => content = script_fields(RULE, value)?,
                // WITH keyword
                Value::Str(_) => {}
                other => {
                    return Err(TransformError::Shape {
                        rule: RULE.to_string(),
                        expected: "an engine clause or script fields".to_string(),
                        found: describe(&other),
                    });
                }
            }
        }
        content.engine = engine;
        Ok(script_command(
            Action::Create,
            Payload::Script {
                name,
                script_type,
                content,
            },
        ))
    })
}

fn update_callback() -> TransformFn {
    const RULE: &str = "update_script_command";
    callback(|values| {
        let mut args = Args::new(RULE, values);
        let name = args.skip(2).string()?.to_lowercase();
        let changes = script_fields(RULE, args.skip(1).value()?)?;
        Ok(script_command(Action::Update, Payload::ScriptUpdate { name, changes }))
    })
}

fn execute_callback() -> TransformFn {
    const RULE: &str = "execute_script_command";
    callback(|values| {
        let mut args = Args::new(RULE, values);
        let name = args.skip(2).string()?.to_lowercase();

        let mut options = ExecuteOptions::default();
        for value in args.rest() {
            match value {
                Value::Pair(tag, inner) if tag == "args" => {
                    options.custom_args = crate::core::transform::fields_from(RULE, *inner)?;
                }
                Value::Pair(tag, inner) if tag == "params" => {
                    let mut record = match *inner {
                        Value::Record(record) => record,
                        other => return Err(invalid("configmap clause", &describe(&other))),
                    };
                    options.args_from_configmap = Some(ConfigMapParams {
                        cm_name: take_str(&mut record, "cm_name"),
                        key_prefix: record.remove("key_prefix").and_then(|v| v.as_str().map(str::to_string)),
                    });
                }
                Value::Pair(tag, inner) if tag == "secret" => {
                    let mut record = match *inner {
                        Value::Record(record) => record,
                        other => return Err(invalid("secret clause", &describe(&other))),
                    };
                    options.secret_mounts.push(SecretMount {
                        secret_name: take_str(&mut record, "secret_name"),
                        key: take_str(&mut record, "key"),
                        mount_path: take_str(&mut record, "mount_path"),
                    });
                }
                other => return Err(invalid("execute clause", &describe(&other))),
            }
        }
        Ok(script_command(Action::Execute, Payload::Execute { name, options }))
    })
}

fn take_str(record: &mut BTreeMap<String, Value>, key: &str) -> String {
    record
        .remove(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn tagged(tag: &str, value: Value) -> Value {
    Value::Pair(tag.to_string(), Box::new(value))
}

fn clause_callbacks() -> Vec<(&'static str, TransformFn)> {
    vec![
        (
            "script_engine_clause",
            callback(|values| {
                let engine = Args::new("script_engine_clause", values).skip(1).string()?;
                Ok(tagged("engine", Value::Str(engine)))
            }),
        ),
        (
            "script_args_clause",
            callback(|values| {
                let list = Args::new("script_args_clause", values).skip(2).value()?;
                Ok(tagged("args", list))
            }),
        ),
        (
            "script_params_clause",
            callback(|values| {
                let mut args = Args::new("script_params_clause", values);
                let cm_name = args.skip(2).string()?;
                let prefix = args.skip(1).optional_string()?;
                let mut record = BTreeMap::from([("cm_name".to_string(), Value::Str(cm_name))]);
                if let Some(prefix) = prefix {
                    record.insert("key_prefix".to_string(), Value::Str(prefix));
                }
                Ok(tagged("params", Value::Record(record)))
            }),
        ),
        (
            "script_secret_clause",
            callback(|values| {
                let mut args = Args::new("script_secret_clause", values);
                let secret_name = args.skip(2).string()?;
                let key = args.skip(1).string()?;
                let mount_path = args.skip(1).string()?;
                Ok(tagged(
                    "secret",
                    Value::Record(BTreeMap::from([
                        ("secret_name".to_string(), Value::Str(secret_name)),
                        ("key".to_string(), Value::Str(key)),
                        ("mount_path".to_string(), Value::Str(mount_path)),
                    ])),
                ))
            }),
        ),
        ("script_content_fields", list_callback()),
        ("script_content_field", pair_callback("script_content_field")),
        ("script_update_fields", list_callback()),
        ("script_update_field", pair_callback("script_update_field")),
        ("script_args", list_callback()),
        ("script_arg", pair_callback("script_arg")),
    ]
}

// --- Validation ---

/// Code must be non-blank; SQL code must contain at least one SQL keyword.
pub fn validate_code(script_type: ScriptType, code: &str) -> Result<()> {
    if code.trim().is_empty() {
        bail!(t!("scripts.error.empty_code"));
    }
    if script_type == ScriptType::SqlSpark {
        let upper = code.to_uppercase();
        if !SQL_KEYWORDS.iter().any(|k| upper.contains(k)) {
            bail!(t!("scripts.error.not_sql"));
        }
    }
    Ok(())
}

/// The script body: inline `CODE`, or the contents of `CODE_FROM_FILE`.
fn resolve_code(content: &ScriptFields) -> Result<String> {
    if let Some(code) = &content.code {
        return Ok(code.clone());
    }
    let Some(raw_path) = &content.code_from_file else {
        bail!(t!("scripts.error.code_required"));
    };
    let path = paths::expand_user_path(raw_path).map_err(|e| anyhow!(e))?;
    let code = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read script code from '{}'", path.display()))?;
    println!(
        "{}",
        format!(t!("scripts.info.code_loaded"), path = path.display()).dimmed()
    );
    Ok(code)
}

// --- Handlers ---

fn stored_script(ctx: &HandlerContext<'_>, name: &str) -> Result<StoredObject> {
    let namespace = ctx.session.current_namespace();
    ctx.services
        .cluster
        .get_object(ObjectKind::ConfigMap, namespace, &configmap_name(name))?
        .ok_or_else(|| anyhow!(t!("scripts.error.not_found"), name = name, namespace = namespace))
}

fn stored_type(script: &StoredObject) -> Result<ScriptType> {
    let raw = script.data.get(SCRIPT_CM_KEY_TYPE).map(String::as_str).unwrap_or_default();
    ScriptType::parse(raw).ok_or_else(|| anyhow!(t!("scripts.error.unknown_type"), script_type = raw))
}

fn handle_create(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Script {
        name,
        script_type,
        content,
    } = &command.payload
    else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };

    // 1. Resolve and validate the code.
    let code = resolve_code(content)?;
    validate_code(*script_type, &code)?;

    // 2. Build the config map.
    let mut data = Fields::from([
        (SCRIPT_CM_KEY_CODE.to_string(), code),
        (SCRIPT_CM_KEY_TYPE.to_string(), script_type.as_str().to_string()),
        (
            SCRIPT_CM_KEY_ENGINE.to_string(),
            content.engine.unwrap_or_default().as_str().to_string(),
        ),
    ]);
    if let Some(spec) = &content.params_spec {
        data.insert(SCRIPT_CM_KEY_PARAMS_SPEC.to_string(), spec.clone());
    }
    if let Some(description) = &content.description {
        data.insert(SCRIPT_CM_KEY_DESCRIPTION.to_string(), description.clone());
    }
    if content.code.is_none()
        && let Some(path) = &content.code_from_file
    {
        data.insert(SCRIPT_CM_KEY_CODE_FROM_FILE.to_string(), path.clone());
    }
    let labels = Labels::from([(
        SCRIPT_CM_LABEL_ROLE.to_string(),
        SCRIPT_CM_LABEL_ROLE_VALUE.to_string(),
    )]);

    // 3. Store it.
    let namespace = ctx.session.current_namespace();
    println!(
        "{}",
        format!(
            t!("scripts.info.creating"),
            name = name,
            script_type = script_type.as_str(),
            namespace = namespace
        )
    );
    ctx.services
        .cluster
        .create_object(ObjectKind::ConfigMap, namespace, &configmap_name(name), &data, &labels)?;

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("scripts.success.created"), name = name)
    );
    Ok(())
}

fn handle_update(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::ScriptUpdate { name, changes } = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    if changes.is_empty() {
        bail!(t!("scripts.error.no_updates"));
    }

    let current = stored_script(ctx, name)?;
    let mut data = Fields::new();
    if let Some(code) = &changes.code {
        validate_code(stored_type(&current)?, code)?;
        data.insert(SCRIPT_CM_KEY_CODE.to_string(), code.clone());
    }
    if let Some(engine) = changes.engine {
        data.insert(SCRIPT_CM_KEY_ENGINE.to_string(), engine.as_str().to_string());
    }
    if let Some(spec) = &changes.params_spec {
        data.insert(SCRIPT_CM_KEY_PARAMS_SPEC.to_string(), spec.clone());
    }
    if let Some(description) = &changes.description {
        data.insert(SCRIPT_CM_KEY_DESCRIPTION.to_string(), description.clone());
    }

    ctx.services.cluster.update_object(
        ObjectKind::ConfigMap,
        ctx.session.current_namespace(),
        &configmap_name(name),
        &data,
    )?;
    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("scripts.success.updated"), name = name)
    );
    Ok(())
}

fn handle_delete(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let name = command
        .name()
        .ok_or_else(|| DispatchError::UnexpectedPayload(command.key()))?;
    let namespace = ctx.session.current_namespace();

    let prompt = format!(t!("scripts.prompt.confirm_delete"), name = name, namespace = namespace);
    if !ctx.services.confirm(&prompt)? {
        println!("{}", t!("common.info.operation_cancelled").yellow());
        return Ok(());
    }
    ctx.services
        .cluster
        .delete_object(ObjectKind::ConfigMap, namespace, &configmap_name(name))?;

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("scripts.success.deleted"), name = name)
    );
    Ok(())
}

fn handle_get(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let name = command
        .name()
        .ok_or_else(|| DispatchError::UnexpectedPayload(command.key()))?;
    let script = stored_script(ctx, name)?;
    let field = |key: &str, default: &str| script.data.get(key).cloned().unwrap_or_else(|| default.to_string());

    println!("\n{} {}", t!("scripts.get.header").bold(), name.cyan());
    println!("  {}: {}", t!("scripts.get.type"), field(SCRIPT_CM_KEY_TYPE, "?"));
    println!(
        "  {}: {}",
        t!("scripts.get.engine"),
        field(SCRIPT_CM_KEY_ENGINE, ScriptEngine::default().as_str())
    );
    println!(
        "  {}: {}",
        t!("scripts.get.description"),
        field(SCRIPT_CM_KEY_DESCRIPTION, "-")
    );
    if let Some(spec) = script.data.get(SCRIPT_CM_KEY_PARAMS_SPEC) {
        println!("  {}: {}", t!("scripts.get.parameters"), spec);
    }

    let code = field(SCRIPT_CM_KEY_CODE, "");
    if !code.is_empty() {
        println!(
            "  {}",
            format!(t!("scripts.get.code_header"), chars = code.chars().count())
        );
        let lines: Vec<&str> = code.lines().collect();
        for line in lines.iter().take(CODE_PREVIEW_LINES) {
            println!("    {}", line.dimmed());
        }
        if lines.len() > CODE_PREVIEW_LINES {
            println!("    ...");
        }
    }
    Ok(())
}

fn handle_list(_command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let namespace = ctx.session.current_namespace();
    let selector = Labels::from([(
        SCRIPT_CM_LABEL_ROLE.to_string(),
        SCRIPT_CM_LABEL_ROLE_VALUE.to_string(),
    )]);
    let scripts = ctx
        .services
        .cluster
        .list_objects(ObjectKind::ConfigMap, namespace, &selector)?;

    if scripts.is_empty() {
        println!("{}", format!(t!("scripts.list.empty"), namespace = namespace).dimmed());
        return Ok(());
    }
    println!("\n{}", format!(t!("scripts.list.header"), namespace = namespace).bold());
    for script in &scripts {
        let get = |key: &str| script.data.get(key).map(String::as_str);
        println!(
            "  - {} ({}, {}): {}",
            script.name.strip_prefix(SCRIPT_CM_PREFIX).unwrap_or(&script.name).cyan(),
            get(SCRIPT_CM_KEY_TYPE).unwrap_or("?"),
            get(SCRIPT_CM_KEY_ENGINE).unwrap_or(ScriptEngine::default().as_str()),
            get(SCRIPT_CM_KEY_DESCRIPTION).unwrap_or("-")
        );
    }
    Ok(())
}

/// Custom arguments, overridden by the config map parameters. A key prefix
/// selects config map keys and is stripped from them.
fn resolve_parameters(ctx: &HandlerContext<'_>, options: &ExecuteOptions) -> Result<Fields> {
    let mut params = options.custom_args.clone();
    if let Some(source) = &options.args_from_configmap {
        let namespace = ctx.session.current_namespace();
        let cm = ctx
            .services
            .cluster
            .get_object(ObjectKind::ConfigMap, namespace, &source.cm_name)?
            .ok_or_else(|| {
                anyhow!(
                    t!("scripts.error.params_configmap_missing"),
                    name = source.cm_name,
                    namespace = namespace
                )
            })?;
        let prefix = source.key_prefix.as_deref().unwrap_or_default();
        for (key, value) in cm.data {
            if let Some(stripped) = key.strip_prefix(prefix)
                && !stripped.is_empty()
            {
                params.insert(stripped.to_string(), value);
            }
        }
    }
    Ok(params)
}

fn handle_execute(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let Payload::Execute { name, options } = &command.payload else {
        return Err(DispatchError::UnexpectedPayload(command.key()).into());
    };
    let namespace = ctx.session.current_namespace().to_string();

    // 1. Load the script and pick the image.
    let script = stored_script(ctx, name)?;
    let engine = script
        .data
        .get(SCRIPT_CM_KEY_ENGINE)
        .and_then(|e| ScriptEngine::parse(e))
        .unwrap_or_default();
    if engine != ScriptEngine::K8sJob {
        bail!(t!("scripts.error.engine_unsupported"), engine = engine.as_str());
    }
    let jobs = &ctx.services.settings.jobs;
    let image = match stored_type(&script)? {
        ScriptType::Python => jobs.python_image.as_str(),
        ScriptType::PySpark => {
            println!(
                "{}",
                format!(t!("scripts.warning.pyspark_image"), image = jobs.pyspark_image).yellow()
            );
            jobs.pyspark_image.as_str()
        }
        ScriptType::SqlSpark => bail!(
            t!("scripts.error.type_unsupported"),
            script_type = ScriptType::SqlSpark.as_str()
        ),
    };

    // 2. Resolve parameters and submit the Job.
    let params = resolve_parameters(ctx, options)?;
    let args = params
        .iter()
        .flat_map(|(key, value)| [format!("--{}", key), value.clone()])
        .collect();
    let configmap = configmap_name(name);
    let job = ScriptJob {
        job_name: job_runner::job_name(name),
        namespace: &namespace,
        script_name: name,
        configmap_name: &configmap,
        image,
        args,
        secret_mounts: &options.secret_mounts,
    };
    let manifest = job_runner::build_manifest(&job);
    log::debug!("Job manifest: {}", manifest);
    ctx.services.cluster.create_job(&namespace, &manifest)?;
    println!(
        "{}",
        format!(t!("scripts.info.job_submitted"), job = job.job_name, namespace = namespace)
    );

    // 3. Wait for it and show the logs.
    let outcome = job_runner::wait_for_job(
        ctx.services.cluster.as_ref(),
        &namespace,
        &job.job_name,
        &ctx.services.settings.jobs,
        &ctx.services.cancel,
    )?;
    if outcome != JobOutcome::TimedOut {
        match ctx.services.cluster.job_logs(&namespace, &job.job_name) {
            Ok(logs) => {
                println!("\n{}", t!("scripts.info.logs_header").bold());
                println!("{}", logs.trim_end());
            }
            Err(e) => log::warn!("Could not fetch logs of job '{}': {}", job.job_name, e),
        }
    }

    match outcome {
        JobOutcome::Succeeded => {
            println!(
                "{} {}",
                t!("common.success").green().bold(),
                format!(t!("scripts.success.executed"), name = name)
            );
            Ok(())
        }
        JobOutcome::Failed => Err(anyhow!(t!("scripts.error.job_failed"), job = job.job_name)),
        JobOutcome::TimedOut => Err(anyhow!(
            t!("scripts.error.job_timed_out"),
            job = job.job_name,
            secs = ctx.services.settings.jobs.timeout_secs
        )),
    }
}

impl Plugin for ScriptsPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            PLUGIN_NAME,
            env!("CARGO_PKG_VERSION"),
            "Scripts stored in config maps and executed as Jobs.",
            &[keywords::PLUGIN_NAME],
        )
    }

    fn grammar_rules(&self) -> BTreeMap<String, String> {
        rule_map(RULES)
    }

    fn command_handlers(&self) -> BTreeMap<CommandKey, Handler> {
        let key = |action| CommandKey::new(action, ResourceKind::Script);
        handler_map(vec![
            (key(Action::Create), handler(handle_create)),
            (key(Action::Update), handler(handle_update)),
            (key(Action::Delete), handler(handle_delete)),
            (key(Action::Get), handler(handle_get)),
            (key(Action::List), handler(handle_list)),
            (key(Action::Execute), handler(handle_execute)),
        ])
    }

    fn constants(&self) -> BTreeMap<String, String> {
        constant_map(&[
            ("RESOURCE_SCRIPT", "SCRIPT"),
            ("SCRIPT_TYPE_PYTHON", ScriptType::Python.as_str()),
            ("SCRIPT_TYPE_PYSPARK", ScriptType::PySpark.as_str()),
            ("SCRIPT_TYPE_SQL_SPARK", ScriptType::SqlSpark.as_str()),
            ("SCRIPT_ENGINE_K8S_JOB", ScriptEngine::K8sJob.as_str()),
            ("SCRIPT_ENGINE_SPARK_OPERATOR", ScriptEngine::SparkOperator.as_str()),
            ("SCRIPT_CM_PREFIX", SCRIPT_CM_PREFIX),
        ])
    }

    fn transforms(&self) -> HashMap<String, TransformFn> {
        let mut transforms = keyword_transforms(KEYWORD_TERMINALS);
        transforms.insert("create_script_command".to_string(), create_callback());
        transforms.insert("update_script_command".to_string(), update_callback());
        transforms.insert(
            "delete_script_command".to_string(),
            named_callback("delete_script_command", Action::Delete),
        );
        transforms.insert(
            "get_script_command".to_string(),
            named_callback("get_script_command", Action::Get),
        );
        transforms.insert(
            "list_scripts_command".to_string(),
            callback(|_| Ok(script_command(Action::List, Payload::None))),
        );
        transforms.insert("execute_script_command".to_string(), execute_callback());
        transforms.extend(
            clause_callbacks()
                .into_iter()
                .map(|(name, callback)| (name.to_string(), callback)),
        );
        transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::test_support::{executor_with, harness};
    use crate::system::cluster::{ClusterApi, MemoryCluster};
    use serde_json::Value as Json;
    use std::io::Write;
    use std::sync::Arc;

    fn container_command(job: &Json) -> Vec<String> {
        job["spec"]["template"]["spec"]["containers"][0]["command"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_parse_create_with_optional_engine() {
        let (mut executor, _, _) = harness();

        let with_engine = executor
            .debug(r#"create script ETL type pyspark engine spark_operator with code="x = 1", description="d";"#)
            .command
            .unwrap();
        let without = executor
            .debug(r#"CREATE SCRIPT etl TYPE PYTHON WITH CODE="x = 1";"#)
            .command
            .unwrap();

        let Payload::Script {
            name,
            script_type,
            content,
        } = with_engine.payload
        else {
            panic!("expected a script payload");
        };
        assert_eq!(name, "etl");
        assert_eq!(script_type, ScriptType::PySpark);
        assert_eq!(content.engine, Some(ScriptEngine::SparkOperator));
        assert_eq!(content.description.as_deref(), Some("d"));
        assert!(matches!(without.payload, Payload::Script { content, .. } if content.engine.is_none()));
    }

    #[test]
    fn test_parse_execute_clauses() {
        let (mut executor, _, _) = harness();

        let command = executor
            .debug(
                r#"EXECUTE SCRIPT etl WITH ARGS (day="mon", n="3") WITH PARAMS_FROM_CONFIGMAP cfg
                   WITH SECRET db KEY "pass" AS "/etc/db/pass" WITH SECRET api KEY "token" AS "/etc/api/token";"#,
            )
            .command
            .unwrap();

        let Payload::Execute { name, options } = command.payload else {
            panic!("expected an execute payload");
        };
        assert_eq!(name, "etl");
        assert_eq!(options.custom_args.len(), 2);
        assert_eq!(
            options.args_from_configmap,
            Some(ConfigMapParams {
                cm_name: "cfg".to_string(),
                key_prefix: None
            })
        );
        assert_eq!(options.secret_mounts.len(), 2);
        assert_eq!(options.secret_mounts[1].mount_path, "/etc/api/token");
    }

    #[test]
    fn test_list_accepts_singular_and_plural() {
        let (mut executor, _, _) = harness();
        assert!(executor.validate("LIST SCRIPTS;").valid);
        assert!(executor.validate("list script").valid);
        assert!(!executor.validate("LIST SCRIPTSS;").valid);
    }

    #[test]
    fn test_create_get_update_list_delete() {
        // --- Setup ---
        let (mut executor, cluster, mut session) = harness();

        // --- Execute ---
        assert!(executor.execute(
            r#"CREATE SCRIPT etl TYPE PYTHON WITH CODE="print(1)", PARAMS_SPEC="{}";"#,
            &mut session
        ));
        assert!(executor.execute(r#"UPDATE SCRIPT etl SET DESCRIPTION="Nightly", ENGINE=K8S_JOB;"#, &mut session));
        assert!(executor.execute("GET SCRIPT etl;", &mut session));
        assert!(executor.execute("LIST SCRIPTS;", &mut session));

        // --- Assert ---
        let stored = cluster
            .get_object(ObjectKind::ConfigMap, "default", "kubesol-script-etl")
            .unwrap()
            .unwrap();
        assert_eq!(stored.data.get(SCRIPT_CM_KEY_CODE).map(String::as_str), Some("print(1)"));
        assert_eq!(stored.data.get(SCRIPT_CM_KEY_TYPE).map(String::as_str), Some("PYTHON"));
        assert_eq!(stored.data.get(SCRIPT_CM_KEY_ENGINE).map(String::as_str), Some("K8S_JOB"));
        assert_eq!(stored.data.get(SCRIPT_CM_KEY_DESCRIPTION).map(String::as_str), Some("Nightly"));
        assert_eq!(stored.labels.get(SCRIPT_CM_LABEL_ROLE).map(String::as_str), Some("script"));

        assert!(executor.execute("DELETE SCRIPT etl;", &mut session));
        assert!(!executor.execute("GET SCRIPT etl;", &mut session));
    }

    #[test]
    fn test_code_validation() {
        assert!(validate_code(ScriptType::Python, "   ").is_err());
        assert!(validate_code(ScriptType::SqlSpark, "show me everything").is_err());
        assert!(validate_code(ScriptType::SqlSpark, "select * from t").is_ok());

        let (mut executor, cluster, mut session) = harness();
        assert!(!executor.execute(r#"CREATE SCRIPT q TYPE SQL_SPARK WITH CODE="hello";"#, &mut session));
        assert!(!executor.execute(r#"CREATE SCRIPT e TYPE PYTHON WITH DESCRIPTION="no code";"#, &mut session));
        assert!(cluster.list_objects(ObjectKind::ConfigMap, "default", &Labels::new()).unwrap().is_empty());
    }

    #[test]
    fn test_code_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "print('from file')").unwrap();
        let (mut executor, cluster, mut session) = harness();

        let input = format!(
            "CREATE SCRIPT loader TYPE PYTHON WITH CODE_FROM_FILE={};",
            crate::core::transform::quote(&file.path().to_string_lossy())
        );
        assert!(executor.execute(&input, &mut session));

        let stored = cluster
            .get_object(ObjectKind::ConfigMap, "default", "kubesol-script-loader")
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.data.get(SCRIPT_CM_KEY_CODE).map(String::as_str),
            Some("print('from file')\n")
        );
        assert!(!executor.execute(
            r#"CREATE SCRIPT other TYPE PYTHON WITH CODE_FROM_FILE="/definitely/not/here.py";"#,
            &mut session
        ));
    }

    #[test]
    fn test_execute_submits_job_with_parameters_and_mounts() {
        // --- Setup ---
        let (mut executor, cluster, mut session) = harness();
        assert!(executor.execute(r#"CREATE SCRIPT etl TYPE PYTHON WITH CODE="print(1)";"#, &mut session));
        assert!(executor.execute(
            r#"CREATE CONFIGMAP cfg WITH etl_day="tue", etl_mode="full", other="x";"#,
            &mut session
        ));

        // --- Execute ---
        let ok = executor.execute(
            r#"EXECUTE SCRIPT etl WITH ARGS (day="mon", force="yes") WITH PARAMS_FROM_CONFIGMAP cfg KEY_PREFIX "etl_" WITH SECRET db KEY "pass" AS "/etc/db/pass";"#,
            &mut session,
        );

        // --- Assert ---
        assert!(ok);
        let jobs = cluster.submitted_jobs();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert!(job["metadata"]["name"].as_str().unwrap().starts_with("kubesol-exec-etl-"));
        assert_eq!(
            container_command(job),
            vec![
                "python",
                "/kubesol_scripts/code",
                "--day",
                "tue",
                "--force",
                "yes",
                "--mode",
                "full"
            ]
        );
        let volumes = job["spec"]["template"]["spec"]["volumes"].as_array().unwrap();
        assert_eq!(volumes[0]["configMap"]["name"], "kubesol-script-etl");
        assert_eq!(volumes[1]["secret"]["secretName"], "db");
    }

    #[test]
    fn test_execute_failures() {
        let cluster = Arc::new(MemoryCluster::new().with_failing_jobs());
        let mut executor = executor_with(cluster.clone());
        let mut session = crate::core::context::SessionContext::default();

        assert!(!executor.execute("EXECUTE SCRIPT ghost;", &mut session));

        assert!(executor.execute(r#"CREATE SCRIPT etl TYPE PYTHON WITH CODE="print(1)";"#, &mut session));
        assert!(!executor.execute("EXECUTE SCRIPT etl;", &mut session));
        assert_eq!(cluster.submitted_jobs().len(), 1);

        assert!(executor.execute(
            r#"CREATE SCRIPT spark TYPE PYSPARK ENGINE SPARK_OPERATOR WITH CODE="print(2)";"#,
            &mut session
        ));
        assert!(!executor.execute("EXECUTE SCRIPT spark;", &mut session));
        assert_eq!(cluster.submitted_jobs().len(), 1);

        assert!(!executor.execute("EXECUTE SCRIPT etl WITH PARAMS_FROM_CONFIGMAP nope;", &mut session));
    }
}
