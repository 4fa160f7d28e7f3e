// src/plugins/keywords.rs

use super::{constant_map, keyword_transforms, rule_map};
use crate::core::plugin::{Handler, Plugin, PluginMetadata};
use crate::core::transform::TransformFn;
use crate::models::CommandKey;
use std::collections::{BTreeMap, HashMap};

pub const PLUGIN_NAME: &str = "core";

/// Keyword terminals more than one plugin uses. Keywords end at a word
/// boundary so that `CREATEX` stays a name.
const KEYWORDS: &[(&str, &str)] = &[
    ("CREATE_KW", r"/CREATE\b/i"),
    ("DELETE_KW", r"/DELETE\b/i"),
    ("UPDATE_KW", r"/UPDATE\b/i"),
    ("GET_KW", r"/GET\b/i"),
    ("LIST_KW", r"/LIST\b/i"),
    ("EXECUTE_KW", r"/EXECUTE\b/i"),
    ("WITH_KW", r"/WITH\b/i"),
    ("SECRET_KW", r"/SECRET\b/i"),
];

#[derive(Debug)]
pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            PLUGIN_NAME,
            env!("CARGO_PKG_VERSION"),
            "Keywords shared by the built-in command set.",
            &[],
        )
    }

    fn grammar_rules(&self) -> BTreeMap<String, String> {
        rule_map(KEYWORDS)
    }

    fn command_handlers(&self) -> BTreeMap<CommandKey, Handler> {
        BTreeMap::new()
    }

    fn constants(&self) -> BTreeMap<String, String> {
        constant_map(&[
            ("ACTION_CREATE", "CREATE"),
            ("ACTION_DELETE", "DELETE"),
            ("ACTION_UPDATE", "UPDATE"),
            ("ACTION_GET", "GET"),
            ("ACTION_LIST", "LIST"),
            ("ACTION_EXECUTE", "EXECUTE"),
        ])
    }

    fn transforms(&self) -> HashMap<String, TransformFn> {
        let names: Vec<&str> = KEYWORDS.iter().map(|(name, _)| *name).collect();
        keyword_transforms(&names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::Grammar;
    use crate::core::transform::Transformer;
    use crate::models::Value;

    #[test]
    fn test_keywords_stop_at_word_boundaries() {
        let mut text = String::from("start: CREATE_KW NAME\nNAME: /[a-z]+/i\n%import common.WS\n%ignore WS\n");
        for (name, body) in CorePlugin.grammar_rules() {
            text.push_str(&format!("{}: {}\n", name, body));
        }
        let grammar = Grammar::from_text(&text).unwrap();

        let tree = grammar.parse("create thing").unwrap();
        let value = Transformer::new(CorePlugin.transforms()).transform(&tree).unwrap();
        assert_eq!(
            value,
            Value::List(vec![Value::Str("CREATE".to_string()), Value::Str("thing".to_string())])
        );

        assert!(grammar.parse("creatething").is_err());
    }
}
