// src/core/context.rs

use crate::constants::DEFAULT_NAMESPACE;
use colored::Colorize;
use std::fmt;

/// The project identity of a scoped session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope {
    pub project_name: String,
    pub project_id: String,
    pub environment: String,
}

/// Which project/environment/namespace the session is targeting.
///
/// Either all of the project identity is set (scoped) or none of it is;
/// the namespace is always set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    scope: Option<ProjectScope>,
    current_namespace: String,
    default_namespace: String,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl SessionContext {
    pub fn new(default_namespace: &str) -> Self {
        Self {
            scope: None,
            current_namespace: default_namespace.to_string(),
            default_namespace: default_namespace.to_string(),
        }
    }

    /// Enters a project environment.
    pub fn enter(&mut self, project_name: &str, project_id: &str, environment: &str, namespace: &str) {
        log::debug!(
            "Entering project '{}' ({}) env '{}' in namespace '{}'.",
            project_name,
            project_id,
            environment,
            namespace
        );
        self.scope = Some(ProjectScope {
            project_name: project_name.to_string(),
            project_id: project_id.to_string(),
            environment: environment.to_string(),
        });
        self.current_namespace = namespace.to_string();
    }

    /// Targets an explicit namespace. Any project identity is dropped, since
    /// an arbitrary namespace need not belong to a known project.
    pub fn set_namespace(&mut self, namespace: &str) {
        self.scope = None;
        self.current_namespace = namespace.to_string();
    }

    pub fn clear(&mut self) {
        self.scope = None;
        self.current_namespace = self.default_namespace.clone();
    }

    pub fn is_project_context_active(&self) -> bool {
        self.scope.is_some()
    }

    pub fn scope(&self) -> Option<&ProjectScope> {
        self.scope.as_ref()
    }

    pub fn project_name(&self) -> Option<&str> {
        self.scope.as_ref().map(|s| s.project_name.as_str())
    }

    pub fn project_id(&self) -> Option<&str> {
        self.scope.as_ref().map(|s| s.project_id.as_str())
    }

    pub fn environment(&self) -> Option<&str> {
        self.scope.as_ref().map(|s| s.environment.as_str())
    }

    pub fn current_namespace(&self) -> &str {
        &self.current_namespace
    }

    /// Renames the active project without changing its identity.
    pub fn rename_project(&mut self, new_name: &str) {
        if let Some(scope) = self.scope.as_mut() {
            scope.project_name = new_name.to_string();
        }
    }

    fn prefix(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}/{}", scope.project_name, scope.environment),
            None if self.current_namespace == self.default_namespace => "default".to_string(),
            None => self.current_namespace.clone(),
        }
    }

    pub fn prompt(&self) -> String {
        format!("({}) >> ", self.prefix())
    }

    pub fn continuation_prompt(&self) -> String {
        format!("({}) ... ", self.prefix())
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => {
                writeln!(f, "{} {}", "Project:".bold(), scope.project_name)?;
                writeln!(f, "{} {}", "Project ID:".bold(), scope.project_id)?;
                writeln!(f, "{} {}", "Environment:".bold(), scope.environment)?;
            }
            None => writeln!(f, "{}", "No project context is active.".dimmed())?,
        }
        write!(f, "{} {}", "Namespace:".bold(), self.current_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscoped_prompt_reads_default_for_configured_namespace() {
        let mut ctx = SessionContext::new("team");
        assert_eq!(ctx.current_namespace(), "team");
        assert_eq!(ctx.prompt(), "(default) >> ");

        ctx.set_namespace("batch");
        assert_eq!(ctx.prompt(), "(batch) >> ");
        assert_eq!(ctx.continuation_prompt(), "(batch) ... ");

        ctx.clear();
        assert_eq!(ctx.prompt(), "(default) >> ");
    }

    #[test]
    fn test_enter_and_clear_scenario() {
        let mut ctx = SessionContext::default();
        assert_eq!(ctx.current_namespace(), "default");
        assert_eq!(ctx.prompt(), "(default) >> ");
        assert!(!ctx.is_project_context_active());

        ctx.enter("proj", "id1", "dev", "proj-dev");
        assert_eq!(ctx.current_namespace(), "proj-dev");
        assert_eq!(ctx.prompt(), "(proj/dev) >> ");
        assert_eq!(ctx.continuation_prompt(), "(proj/dev) ... ");
        assert_eq!(ctx.project_id(), Some("id1"));

        ctx.clear();
        assert_eq!(ctx.current_namespace(), "default");
        assert_eq!(ctx.prompt(), "(default) >> ");
        assert_eq!(ctx.project_name(), None);
    }

    #[test]
    fn test_set_namespace_drops_project_identity() {
        let mut ctx = SessionContext::default();
        ctx.enter("proj", "id1", "dev", "proj-dev");

        ctx.set_namespace("monitoring");

        assert!(!ctx.is_project_context_active());
        assert_eq!(ctx.environment(), None);
        assert_eq!(ctx.current_namespace(), "monitoring");
        assert_eq!(ctx.prompt(), "(monitoring) >> ");
    }

    #[test]
    fn test_rename_keeps_scope() {
        let mut ctx = SessionContext::default();
        ctx.enter("old", "id1", "dev", "id1-dev");
        ctx.rename_project("new");
        assert_eq!(ctx.prompt(), "(new/dev) >> ");
        assert_eq!(ctx.current_namespace(), "id1-dev");
    }
}
