// src/system/cluster.rs

//! The cluster client handlers talk to, plus its two implementations.

use super::executor::{self, ExecutionError};
use crate::CancellationToken;
use crate::models::Fields;
use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub type Labels = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} '{name}' was not found in namespace '{namespace}'.")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },
    #[error("{kind} '{name}' already exists in namespace '{namespace}'.")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },
    #[error("Namespace '{0}' does not exist.")]
    NamespaceNotFound(String),
    #[error("Namespace '{0}' already exists.")]
    NamespaceExists(String),
    #[error("Cluster is unreachable: {0}")]
    Unreachable(String),
    #[error("Unexpected response from the cluster: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// The two namespaced object kinds handlers store data in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Secret,
    ConfigMap,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::ConfigMap => "configmap",
        }
    }

    fn manifest_kind(self) -> &'static str {
        match self {
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
        }
    }

    fn data_field(self) -> &'static str {
        match self {
            Self::Secret => "stringData",
            Self::ConfigMap => "data",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_kind())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    pub data: Fields,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: Labels,
    pub phase: String,
    pub created: String,
}

/// Pod counts reported on a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobStatus {
    pub active: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl JobStatus {
    pub fn is_succeeded(&self) -> bool {
        self.succeeded > 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed > 0 && self.active == 0
    }
}

/// Operations the built-in handlers need from a Kubernetes cluster.
pub trait ClusterApi: Send + Sync {
    /// A short human-readable description of the backend.
    fn describe(&self) -> String;

    fn check_connectivity(&self) -> Result<(), ClusterError>;

    fn create_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        data: &Fields,
        labels: &Labels,
    ) -> Result<(), ClusterError>;

    /// Merges `data` into an existing object.
    fn update_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &Fields) -> Result<(), ClusterError>;

    fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<(), ClusterError>;

    fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<StoredObject>, ClusterError>;

    /// Lists objects carrying every label in `selector`.
    fn list_objects(&self, kind: ObjectKind, namespace: &str, selector: &Labels) -> Result<Vec<StoredObject>, ClusterError>;

    fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), ClusterError>;

    fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, ClusterError>;

    fn list_namespaces(&self, selector: &Labels) -> Result<Vec<NamespaceInfo>, ClusterError>;

    /// Adds or overwrites labels on a namespace.
    fn label_namespace(&self, name: &str, labels: &Labels) -> Result<(), ClusterError>;

    fn create_job(&self, namespace: &str, manifest: &Json) -> Result<(), ClusterError>;

    fn job_status(&self, namespace: &str, name: &str) -> Result<JobStatus, ClusterError>;

    fn job_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError>;
}

fn selector_arg(selector: &Labels) -> Option<String> {
    if selector.is_empty() {
        return None;
    }
    Some(
        selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn string_map(value: Option<&Json>) -> BTreeMap<String, String> {
    value
        .and_then(Json::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn is_not_found(err: &ExecutionError) -> bool {
    matches!(err, ExecutionError::NonZeroExitStatus { stderr, .. }
        if stderr.contains("NotFound") || stderr.contains("not found"))
}

fn is_already_exists(err: &ExecutionError) -> bool {
    matches!(err, ExecutionError::NonZeroExitStatus { stderr, .. }
        if stderr.contains("AlreadyExists") || stderr.contains("already exists"))
}

// --- KUBECTL BACKEND ---

/// Drives a real cluster through the `kubectl` binary.
pub struct KubectlCluster {
    program: String,
    base_args: Vec<String>,
    cancel: CancellationToken,
}

impl fmt::Debug for KubectlCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubectlCluster")
            .field("program", &self.program)
            .field("base_args", &self.base_args)
            .finish()
    }
}

impl KubectlCluster {
    /// `command_line` is the configured kubectl invocation, e.g. `kubectl --context dev`.
    pub fn new(command_line: &str, cancel: CancellationToken) -> Result<Self, ClusterError> {
        let (program, base_args) = executor::split_command_line(command_line)?;
        Ok(Self {
            program,
            base_args,
            cancel,
        })
    }

    fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, ExecutionError> {
        let mut full: Vec<String> = self.base_args.clone();
        full.extend(args.iter().map(|a| a.to_string()));
        executor::execute_and_capture_output(&self.program, &full, stdin, &self.cancel)
    }

    fn run_json(&self, args: &[&str]) -> Result<Json, ClusterError> {
        let output = self.run(args, None)?;
        serde_json::from_str(&output).map_err(|e| ClusterError::InvalidResponse(e.to_string()))
    }

    fn apply_manifest(&self, manifest: &Json) -> Result<(), ExecutionError> {
        self.run(&["create", "-f", "-"], Some(&manifest.to_string()))
            .map(|_| ())
    }

    fn object_from_json(item: &Json) -> StoredObject {
        let metadata = item.get("metadata");
        StoredObject {
            name: metadata
                .and_then(|m| m.get("name"))
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
            // Secret values stay base64-encoded as the API returns them.
            data: string_map(item.get("data")),
            labels: string_map(metadata.and_then(|m| m.get("labels"))),
        }
    }

    fn namespace_from_json(item: &Json) -> NamespaceInfo {
        let metadata = item.get("metadata");
        let text = |value: Option<&Json>| value.and_then(Json::as_str).unwrap_or_default().to_string();
        NamespaceInfo {
            name: text(metadata.and_then(|m| m.get("name"))),
            labels: string_map(metadata.and_then(|m| m.get("labels"))),
            phase: text(item.get("status").and_then(|s| s.get("phase"))),
            created: text(metadata.and_then(|m| m.get("creationTimestamp"))),
        }
    }
}

impl ClusterApi for KubectlCluster {
    fn describe(&self) -> String {
        format!("kubectl ({})", self.program)
    }

    fn check_connectivity(&self) -> Result<(), ClusterError> {
        self.run(&["cluster-info", "--request-timeout=5s"], None)
            .map(|_| ())
            .map_err(|e| match e {
                ExecutionError::Cancelled => ClusterError::Execution(ExecutionError::Cancelled),
                other => ClusterError::Unreachable(other.to_string()),
            })
    }

    fn create_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        data: &Fields,
        labels: &Labels,
    ) -> Result<(), ClusterError> {
        let mut manifest = json!({
            "apiVersion": "v1",
            "kind": kind.manifest_kind(),
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
        });
        if let Some(object) = manifest.as_object_mut() {
            object.insert(kind.data_field().to_string(), json!(data));
            if kind == ObjectKind::Secret {
                object.insert("type".to_string(), json!("Opaque"));
            }
        }
        self.apply_manifest(&manifest).map_err(|e| {
            if is_already_exists(&e) {
                ClusterError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                }
            } else {
                e.into()
            }
        })
    }

    fn update_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &Fields) -> Result<(), ClusterError> {
        let patch = json!({ kind.data_field(): data }).to_string();
        self.run(
            &["patch", kind.as_str(), name, "-n", namespace, "--type", "merge", "-p", &patch],
            None,
        )
        .map(|_| ())
        .map_err(|e| self.not_found_or(e, kind, namespace, name))
    }

    fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.run(&["delete", kind.as_str(), name, "-n", namespace], None)
            .map(|_| ())
            .map_err(|e| self.not_found_or(e, kind, namespace, name))
    }

    fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<StoredObject>, ClusterError> {
        match self.run(&["get", kind.as_str(), name, "-n", namespace, "-o", "json"], None) {
            Ok(output) => {
                let item: Json =
                    serde_json::from_str(&output).map_err(|e| ClusterError::InvalidResponse(e.to_string()))?;
                Ok(Some(Self::object_from_json(&item)))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_objects(&self, kind: ObjectKind, namespace: &str, selector: &Labels) -> Result<Vec<StoredObject>, ClusterError> {
        let selector = selector_arg(selector);
        let mut args = vec!["get", kind.as_str(), "-n", namespace, "-o", "json"];
        if let Some(sel) = selector.as_deref() {
            args.extend(["-l", sel]);
        }
        let response = self.run_json(&args)?;
        Ok(response
            .get("items")
            .and_then(Json::as_array)
            .map(|items| items.iter().map(Self::object_from_json).collect())
            .unwrap_or_default())
    }

    fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), ClusterError> {
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": labels },
        });
        self.apply_manifest(&manifest).map_err(|e| {
            if is_already_exists(&e) {
                ClusterError::NamespaceExists(name.to_string())
            } else {
                e.into()
            }
        })
    }

    fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        self.run(&["delete", "namespace", name, "--wait=false"], None)
            .map(|_| ())
            .map_err(|e| {
                if is_not_found(&e) {
                    ClusterError::NamespaceNotFound(name.to_string())
                } else {
                    e.into()
                }
            })
    }

    fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, ClusterError> {
        match self.run(&["get", "namespace", name, "-o", "json"], None) {
            Ok(output) => {
                let item: Json =
                    serde_json::from_str(&output).map_err(|e| ClusterError::InvalidResponse(e.to_string()))?;
                Ok(Some(Self::namespace_from_json(&item)))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_namespaces(&self, selector: &Labels) -> Result<Vec<NamespaceInfo>, ClusterError> {
        let selector = selector_arg(selector);
        let mut args = vec!["get", "namespaces", "-o", "json"];
        if let Some(sel) = selector.as_deref() {
            args.extend(["-l", sel]);
        }
        let response = self.run_json(&args)?;
        Ok(response
            .get("items")
            .and_then(Json::as_array)
            .map(|items| items.iter().map(Self::namespace_from_json).collect())
            .unwrap_or_default())
    }

    fn label_namespace(&self, name: &str, labels: &Labels) -> Result<(), ClusterError> {
        let pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut args = vec!["label", "namespace", name, "--overwrite"];
        args.extend(pairs.iter().map(String::as_str));
        self.run(&args, None).map(|_| ()).map_err(|e| {
            if is_not_found(&e) {
                ClusterError::NamespaceNotFound(name.to_string())
            } else {
                e.into()
            }
        })
    }

    fn create_job(&self, namespace: &str, manifest: &Json) -> Result<(), ClusterError> {
        log::debug!("Creating job in namespace '{}'.", namespace);
        self.apply_manifest(manifest).map_err(ClusterError::from)
    }

    fn job_status(&self, namespace: &str, name: &str) -> Result<JobStatus, ClusterError> {
        let job = self.run_json(&["get", "job", name, "-n", namespace, "-o", "json"])?;
        let count = |field: &str| {
            job.get("status")
                .and_then(|s| s.get(field))
                .and_then(Json::as_u64)
                .unwrap_or(0)
        };
        Ok(JobStatus {
            active: count("active"),
            succeeded: count("succeeded"),
            failed: count("failed"),
        })
    }

    fn job_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let target = format!("job/{}", name);
        Ok(self.run(&["logs", &target, "-n", namespace], None)?)
    }
}

impl KubectlCluster {
    fn not_found_or(&self, err: ExecutionError, kind: ObjectKind, namespace: &str, name: &str) -> ClusterError {
        if is_not_found(&err) {
            ClusterError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }
        } else {
            err.into()
        }
    }
}

// --- IN-MEMORY BACKEND ---

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<(ObjectKind, String, String), StoredObject>,
    namespaces: BTreeMap<String, NamespaceInfo>,
    jobs: BTreeMap<(String, String), Json>,
}

/// A cluster held in process memory. Jobs complete immediately with the
/// configured outcome.
#[derive(Debug)]
pub struct MemoryCluster {
    state: Mutex<MemoryState>,
    reachable: bool,
    jobs_succeed: bool,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// A reachable cluster containing only the `default` namespace.
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.namespaces.insert(
            crate::constants::DEFAULT_NAMESPACE.to_string(),
            NamespaceInfo {
                name: crate::constants::DEFAULT_NAMESPACE.to_string(),
                labels: Labels::new(),
                phase: "Active".to_string(),
                created: String::new(),
            },
        );
        Self {
            state: Mutex::new(state),
            reachable: true,
            jobs_succeed: true,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// Makes every submitted job report a failure.
    pub fn with_failing_jobs(self) -> Self {
        Self {
            jobs_succeed: false,
            ..self
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Manifests of every job submitted so far, in name order.
    pub fn submitted_jobs(&self) -> Vec<Json> {
        self.lock().jobs.values().cloned().collect()
    }

    fn require_namespace(state: &MemoryState, namespace: &str) -> Result<(), ClusterError> {
        if state.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(ClusterError::NamespaceNotFound(namespace.to_string()))
        }
    }

    fn not_found(kind: ObjectKind, namespace: &str, name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

fn matches_selector(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

impl ClusterApi for MemoryCluster {
    fn describe(&self) -> String {
        "in-memory cluster".to_string()
    }

    fn check_connectivity(&self) -> Result<(), ClusterError> {
        if self.reachable {
            Ok(())
        } else {
            Err(ClusterError::Unreachable("the in-memory cluster is offline".to_string()))
        }
    }

    fn create_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        data: &Fields,
        labels: &Labels,
    ) -> Result<(), ClusterError> {
        let mut state = self.lock();
        Self::require_namespace(&state, namespace)?;
        let key = (kind, namespace.to_string(), name.to_string());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        state.objects.insert(
            key,
            StoredObject {
                name: name.to_string(),
                data: data.clone(),
                labels: labels.clone(),
            },
        );
        Ok(())
    }

    fn update_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &Fields) -> Result<(), ClusterError> {
        let mut state = self.lock();
        let object = state
            .objects
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| Self::not_found(kind, namespace, name))?;
        object.data.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.lock()
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(kind, namespace, name))
    }

    fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<StoredObject>, ClusterError> {
        Ok(self
            .lock()
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn list_objects(&self, kind: ObjectKind, namespace: &str, selector: &Labels) -> Result<Vec<StoredObject>, ClusterError> {
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), obj)| *k == kind && ns == namespace && matches_selector(&obj.labels, selector))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), ClusterError> {
        let mut state = self.lock();
        if state.namespaces.contains_key(name) {
            return Err(ClusterError::NamespaceExists(name.to_string()));
        }
        state.namespaces.insert(
            name.to_string(),
            NamespaceInfo {
                name: name.to_string(),
                labels: labels.clone(),
                phase: "Active".to_string(),
                created: String::new(),
            },
        );
        Ok(())
    }

    fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        if state.namespaces.remove(name).is_none() {
            return Err(ClusterError::NamespaceNotFound(name.to_string()));
        }
        state.objects.retain(|(_, ns, _), _| ns != name);
        state.jobs.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, ClusterError> {
        Ok(self.lock().namespaces.get(name).cloned())
    }

    fn list_namespaces(&self, selector: &Labels) -> Result<Vec<NamespaceInfo>, ClusterError> {
        Ok(self
            .lock()
            .namespaces
            .values()
            .filter(|ns| matches_selector(&ns.labels, selector))
            .cloned()
            .collect())
    }

    fn label_namespace(&self, name: &str, labels: &Labels) -> Result<(), ClusterError> {
        let mut state = self.lock();
        let namespace = state
            .namespaces
            .get_mut(name)
            .ok_or_else(|| ClusterError::NamespaceNotFound(name.to_string()))?;
        namespace
            .labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn create_job(&self, namespace: &str, manifest: &Json) -> Result<(), ClusterError> {
        let mut state = self.lock();
        Self::require_namespace(&state, namespace)?;
        let name = manifest
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Json::as_str)
            .ok_or_else(|| ClusterError::InvalidResponse("job manifest has no name".to_string()))?
            .to_string();
        state.jobs.insert((namespace.to_string(), name), manifest.clone());
        Ok(())
    }

    fn job_status(&self, namespace: &str, name: &str) -> Result<JobStatus, ClusterError> {
        if !self.lock().jobs.contains_key(&(namespace.to_string(), name.to_string())) {
            return Err(ClusterError::NotFound {
                kind: "Job".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        Ok(if self.jobs_succeed {
            JobStatus {
                succeeded: 1,
                ..JobStatus::default()
            }
        } else {
            JobStatus {
                failed: 1,
                ..JobStatus::default()
            }
        })
    }

    fn job_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        if self.lock().jobs.contains_key(&(namespace.to_string(), name.to_string())) {
            Ok(format!("[memory] job {} finished\n", name))
        } else {
            Err(ClusterError::NotFound {
                kind: "Job".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_memory_objects_lifecycle() {
        // --- Setup ---
        let cluster = MemoryCluster::new();
        let labels: Labels = fields(&[("app", "kubesol")]);

        // --- Execute ---
        cluster
            .create_object(ObjectKind::Secret, "default", "db", &fields(&[("user", "admin")]), &labels)
            .unwrap();
        let duplicate = cluster.create_object(ObjectKind::Secret, "default", "db", &Fields::new(), &labels);
        cluster
            .update_object(ObjectKind::Secret, "default", "db", &fields(&[("pass", "x")]))
            .unwrap();

        // --- Assert ---
        assert!(matches!(duplicate, Err(ClusterError::AlreadyExists { .. })));
        let stored = cluster.get_object(ObjectKind::Secret, "default", "db").unwrap().unwrap();
        assert_eq!(stored.data, fields(&[("pass", "x"), ("user", "admin")]));
        assert_eq!(cluster.list_objects(ObjectKind::Secret, "default", &labels).unwrap().len(), 1);
        assert!(cluster.list_objects(ObjectKind::ConfigMap, "default", &labels).unwrap().is_empty());

        cluster.delete_object(ObjectKind::Secret, "default", "db").unwrap();
        assert!(matches!(
            cluster.delete_object(ObjectKind::Secret, "default", "db"),
            Err(ClusterError::NotFound { .. })
        ));
    }

    #[test]
    fn test_memory_objects_need_an_existing_namespace() {
        let cluster = MemoryCluster::new();
        let result = cluster.create_object(ObjectKind::ConfigMap, "nowhere", "cm", &Fields::new(), &Labels::new());
        assert!(matches!(result, Err(ClusterError::NamespaceNotFound(ns)) if ns == "nowhere"));
    }

    #[test]
    fn test_memory_namespace_selector_and_delete_cascade() {
        let cluster = MemoryCluster::new();
        let labels = fields(&[("kubesol.io/project-id", "proj-1")]);
        cluster.create_namespace("proj-1-dev", &labels).unwrap();
        cluster
            .create_object(ObjectKind::ConfigMap, "proj-1-dev", "cm", &Fields::new(), &Labels::new())
            .unwrap();

        assert_eq!(cluster.list_namespaces(&labels).unwrap().len(), 1);
        assert_eq!(cluster.list_namespaces(&Labels::new()).unwrap().len(), 2);

        cluster.delete_namespace("proj-1-dev").unwrap();
        assert!(cluster.get_object(ObjectKind::ConfigMap, "proj-1-dev", "cm").unwrap().is_none());
        assert!(cluster.get_namespace("proj-1-dev").unwrap().is_none());
    }

    #[test]
    fn test_memory_jobs_report_configured_outcome() {
        let manifest = json!({ "metadata": { "name": "job-1" } });

        let ok = MemoryCluster::new();
        ok.create_job("default", &manifest).unwrap();
        assert!(ok.job_status("default", "job-1").unwrap().is_succeeded());
        assert_eq!(ok.submitted_jobs().len(), 1);

        let failing = MemoryCluster::new().with_failing_jobs();
        failing.create_job("default", &manifest).unwrap();
        assert!(failing.job_status("default", "job-1").unwrap().is_failed());
        assert!(failing.job_status("default", "missing").is_err());
    }

    #[test]
    fn test_unreachable_memory_cluster() {
        assert!(MemoryCluster::new().check_connectivity().is_ok());
        assert!(matches!(
            MemoryCluster::unreachable().check_connectivity(),
            Err(ClusterError::Unreachable(_))
        ));
    }

    #[test]
    fn test_selector_argument() {
        assert_eq!(selector_arg(&Labels::new()), None);
        let selector = fields(&[("a", "1"), ("b", "2")]);
        assert_eq!(selector_arg(&selector).as_deref(), Some("a=1,b=2"));
    }
}
