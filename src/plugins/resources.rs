// src/plugins/resources.rs

//! `CREATE|UPDATE|DELETE` for secrets, config maps and parameters.
//!
//! Parameters are stored as secrets.

use super::{constant_map, handler_map, keyword_transforms, keywords, rule_map};
use crate::core::plugin::{DispatchError, Handler, HandlerContext, Plugin, PluginMetadata, handler};
use crate::core::transform::{Args, TransformFn, callback, list_callback, pair_callback};
use crate::models::{Action, Command, CommandKey, Fields, Payload, ResourceKind, Value};
use crate::system::cluster::{Labels, ObjectKind};
use anyhow::{Result, anyhow};
use colored::Colorize;
use std::collections::{BTreeMap, HashMap};

pub const PLUGIN_NAME: &str = "resources";

const RULES: &[(&str, &str)] = &[
    (
        "create_resource_command",
        "CREATE_KW resource_kind NAME WITH_KW resource_fields",
    ),
    (
        "update_resource_command",
        "UPDATE_KW resource_kind NAME WITH_KW resource_fields",
    ),
    ("delete_resource_command", "DELETE_KW resource_kind NAME"),
    ("?resource_kind", "SECRET_KW | CONFIGMAP_KW | PARAMETER_KW"),
    ("resource_fields", "resource_field (\",\" resource_field)*"),
    ("resource_field", "NAME \"=\" ESCAPED_STRING"),
    ("CONFIGMAP_KW", r"/CONFIGMAP\b/i"),
    ("PARAMETER_KW", r"/PARAMETER\b/i"),
];

const KINDS: [ResourceKind; 3] = [ResourceKind::Secret, ResourceKind::ConfigMap, ResourceKind::Parameter];

#[derive(Debug)]
pub struct ResourcesPlugin;

/// Where a resource kind is stored.
fn storage_kind(kind: &ResourceKind) -> Option<ObjectKind> {
    match kind {
        ResourceKind::Secret | ResourceKind::Parameter => Some(ObjectKind::Secret),
        ResourceKind::ConfigMap => Some(ObjectKind::ConfigMap),
        _ => None,
    }
}

/// Display name of a resource kind in messages.
fn label(kind: &ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ConfigMap => "ConfigMap",
        ResourceKind::Parameter => "Parameter",
        _ => "Secret",
    }
}

fn command_callback(rule: &'static str, action: Action, with_fields: bool) -> TransformFn {
    callback(move |values| {
        let mut args = Args::new(rule, values);
        args.skip(1);
        let kind = ResourceKind::parse(&args.string()?);
        let name = args.string()?.to_lowercase();
        let payload = if with_fields {
            let fields = args.skip(1).fields()?;
            Payload::Fields { name, fields }
        } else {
            Payload::Named(name)
        };
        Ok(Value::Command(Command::new(action.clone(), kind, payload)))
    })
}

fn target<'c>(command: &'c Command) -> Result<(ObjectKind, &'c str)> {
    let kind = storage_kind(&command.kind).ok_or_else(|| DispatchError::UnexpectedPayload(command.key()))?;
    let name = command
        .name()
        .ok_or_else(|| DispatchError::UnexpectedPayload(command.key()))?;
    Ok((kind, name))
}

fn fields_of(command: &Command) -> Result<&Fields> {
    match &command.payload {
        Payload::Fields { fields, .. } if fields.is_empty() => Err(anyhow!(
            t!("resources.error.no_fields"),
            kind = label(&command.kind)
        )),
        Payload::Fields { fields, .. } => Ok(fields),
        _ => Err(DispatchError::UnexpectedPayload(command.key()).into()),
    }
}

fn handle_create(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let (kind, name) = target(command)?;
    let fields = fields_of(command)?;
    let namespace = ctx.session.current_namespace();

    println!(
        "{}",
        format!(t!("resources.info.creating"), kind = label(&command.kind), name = name, namespace = namespace)
    );
    ctx.services
        .cluster
        .create_object(kind, namespace, name, fields, &Labels::new())?;
    log::info!("Created {} '{}' in '{}'.", kind, name, namespace);

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("resources.success.created"), kind = label(&command.kind), name = name)
    );
    Ok(())
}

fn handle_update(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let (kind, name) = target(command)?;
    let fields = fields_of(command)?;
    let namespace = ctx.session.current_namespace();

    println!(
        "{}",
        format!(t!("resources.info.updating"), kind = label(&command.kind), name = name, namespace = namespace)
    );
    ctx.services.cluster.update_object(kind, namespace, name, fields)?;

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("resources.success.updated"), kind = label(&command.kind), name = name)
    );
    Ok(())
}

fn handle_delete(command: &Command, ctx: &mut HandlerContext<'_>) -> Result<()> {
    let (kind, name) = target(command)?;
    let namespace = ctx.session.current_namespace().to_string();

    let prompt = format!(
        t!("resources.prompt.confirm_delete"),
        kind = label(&command.kind),
        name = name,
        namespace = namespace
    );
    if !ctx.services.confirm(&prompt)? {
        println!("{}", t!("common.info.operation_cancelled").yellow());
        return Ok(());
    }

    ctx.services.cluster.delete_object(kind, &namespace, name)?;
    log::info!("Deleted {} '{}' from '{}'.", kind, name, namespace);

    println!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("resources.success.deleted"), kind = label(&command.kind), name = name)
    );
    Ok(())
}

impl Plugin for ResourcesPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            PLUGIN_NAME,
            env!("CARGO_PKG_VERSION"),
            "Secrets, config maps and parameters.",
            &[keywords::PLUGIN_NAME],
        )
    }

    fn grammar_rules(&self) -> BTreeMap<String, String> {
        rule_map(RULES)
    }

    fn command_handlers(&self) -> BTreeMap<CommandKey, Handler> {
        let mut entries = Vec::new();
        for kind in KINDS {
            entries.push((CommandKey::new(Action::Create, kind.clone()), handler(handle_create)));
            entries.push((CommandKey::new(Action::Update, kind.clone()), handler(handle_update)));
            entries.push((CommandKey::new(Action::Delete, kind), handler(handle_delete)));
        }
        handler_map(entries)
    }

    fn constants(&self) -> BTreeMap<String, String> {
        constant_map(&[
            ("RESOURCE_SECRET", "SECRET"),
            ("RESOURCE_CONFIGMAP", "CONFIGMAP"),
            ("RESOURCE_PARAMETER", "PARAMETER"),
        ])
    }

    fn transforms(&self) -> HashMap<String, TransformFn> {
        let mut transforms = keyword_transforms(&["CONFIGMAP_KW", "PARAMETER_KW"]);
        transforms.extend([
            (
                "create_resource_command".to_string(),
                command_callback("create_resource_command", Action::Create, true),
            ),
            (
                "update_resource_command".to_string(),
                command_callback("update_resource_command", Action::Update, true),
            ),
            (
                "delete_resource_command".to_string(),
                command_callback("delete_resource_command", Action::Delete, false),
            ),
            ("resource_fields".to_string(), list_callback()),
            ("resource_field".to_string(), pair_callback("resource_field")),
        ]);
        transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::test_support::harness;
    use crate::system::cluster::ClusterApi;

    #[test]
    fn test_create_update_delete_secret() {
        // --- Setup ---
        let (mut executor, cluster, mut session) = harness();

        // --- Execute ---
        assert!(executor.execute(r#"CREATE SECRET DB WITH user="admin", pass="x";"#, &mut session));
        assert!(executor.execute(r#"update secret db with pass="y";"#, &mut session));

        // --- Assert ---
        let stored = cluster
            .get_object(ObjectKind::Secret, "default", "db")
            .unwrap()
            .unwrap();
        assert_eq!(stored.data.get("user").map(String::as_str), Some("admin"));
        assert_eq!(stored.data.get("pass").map(String::as_str), Some("y"));

        assert!(executor.execute("DELETE SECRET db;", &mut session));
        assert!(cluster.get_object(ObjectKind::Secret, "default", "db").unwrap().is_none());
    }

    #[test]
    fn test_parameters_are_stored_as_secrets() {
        let (mut executor, cluster, mut session) = harness();

        assert!(executor.execute(r#"CREATE PARAMETER api WITH token="abc";"#, &mut session));

        assert!(cluster.get_object(ObjectKind::Secret, "default", "api").unwrap().is_some());
        assert!(cluster.get_object(ObjectKind::ConfigMap, "default", "api").unwrap().is_none());
    }

    #[test]
    fn test_configmap_goes_to_current_namespace() {
        let (mut executor, cluster, mut session) = harness();
        cluster.create_namespace("team", &Labels::new()).unwrap();
        session.set_namespace("team");

        assert!(executor.execute(r#"CREATE CONFIGMAP settings WITH mode="fast";"#, &mut session));

        assert!(cluster.get_object(ObjectKind::ConfigMap, "team", "settings").unwrap().is_some());
    }

    #[test]
    fn test_cluster_errors_fail_the_command() {
        let (mut executor, _, mut session) = harness();

        assert!(!executor.execute(r#"UPDATE SECRET ghost WITH a="b";"#, &mut session));
        assert!(!executor.execute("DELETE CONFIGMAP ghost;", &mut session));
        assert!(executor.execute(r#"CREATE SECRET twice WITH a="b";"#, &mut session));
        assert!(!executor.execute(r#"CREATE SECRET twice WITH a="b";"#, &mut session));
    }

    #[test]
    fn test_fields_are_required_by_the_grammar() {
        let (mut executor, _, _) = harness();

        assert!(!executor.validate("CREATE SECRET db WITH;").valid);
        assert!(!executor.validate("CREATE SECRET db;").valid);
        assert!(executor.validate(r#"CREATE SECRET db WITH a="";"#).valid);
    }

    #[test]
    fn test_names_are_lowercased() {
        let (mut executor, _, _) = harness();

        let report = executor.debug("DELETE CONFIGMAP MyConfig;");

        assert_eq!(report.command.as_ref().and_then(Command::name), Some("myconfig"));
        assert_eq!(report.handler_source.as_deref(), Some(PLUGIN_NAME));
    }
}
