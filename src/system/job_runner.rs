// src/system/job_runner.rs

//! Builds script Jobs and waits for them to finish.

use super::cluster::{ClusterApi, ClusterError};
use super::executor::{self, ExecutionError};
use crate::CancellationToken;
use crate::constants::{JOB_NAME_PREFIX, MAX_K8S_NAME_LEN, SCRIPT_CM_KEY_CODE, SCRIPT_MOUNT_DIR};
use crate::core::config::JobSettings;
use crate::models::SecretMount;
use serde_json::{Value as Json, json};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// How a watched Job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Everything needed to render a script Job manifest.
#[derive(Debug, Clone)]
pub struct ScriptJob<'a> {
    pub job_name: String,
    pub namespace: &'a str,
    pub script_name: &'a str,
    pub configmap_name: &'a str,
    pub image: &'a str,
    /// Flattened `--key value` arguments.
    pub args: Vec<String>,
    pub secret_mounts: &'a [SecretMount],
}

/// Makes a string usable inside a Kubernetes object name.
pub fn sanitize_name(raw: &str) -> String {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    lowered.trim_matches('-').to_string()
}

fn truncate_name(name: &str) -> String {
    let truncated: String = name.chars().take(MAX_K8S_NAME_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}

/// `kubesol-exec-<script>-<8 hex>`, cut to a valid object name.
pub fn job_name(script_name: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    truncate_name(&format!("{}{}-{}", JOB_NAME_PREFIX, sanitize_name(script_name), suffix))
}

/// The Job manifest: the script ConfigMap mounted at the script directory,
/// one read-only volume per requested secret key.
pub fn build_manifest(job: &ScriptJob<'_>) -> Json {
    let script_volume = truncate_name(&format!("script-vol-{}", sanitize_name(job.configmap_name)));
    let mut volumes = vec![json!({
        "name": script_volume,
        "configMap": { "name": job.configmap_name },
    })];
    let mut mounts = vec![json!({
        "name": script_volume,
        "mountPath": SCRIPT_MOUNT_DIR,
        "readOnly": true,
    })];

    for (i, mount) in job.secret_mounts.iter().enumerate() {
        let target = Path::new(&mount.mount_path);
        let dir = target
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let file = target
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| mount.key.clone());
        let volume = truncate_name(&format!("secret-{}-{}", sanitize_name(&mount.secret_name), i));
        volumes.push(json!({
            "name": volume,
            "secret": {
                "secretName": mount.secret_name,
                "items": [{ "key": mount.key, "path": file }],
            },
        }));
        mounts.push(json!({ "name": volume, "mountPath": dir, "readOnly": true }));
    }

    let mut command = vec![
        "python".to_string(),
        format!("{}/{}", SCRIPT_MOUNT_DIR, SCRIPT_CM_KEY_CODE),
    ];
    command.extend(job.args.iter().cloned());

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job.job_name,
            "namespace": job.namespace,
            "labels": { "app": "kubesol", "kubesol-job": "true", "kubesol-script": sanitize_name(job.script_name) },
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": 3600,
            "template": {
                "metadata": { "labels": { "app": job.job_name, "kubesol-job": "true" } },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "script-runner",
                        "image": job.image,
                        "command": command,
                        "volumeMounts": mounts,
                    }],
                    "volumes": volumes,
                },
            },
        },
    })
}

/// Sleeps for `total`, waking every 100ms to honour cancellation.
fn interruptible_sleep(total: Duration, token: &CancellationToken) -> Result<(), ExecutionError> {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        executor::check_for_cancellation(token)?;
        thread::sleep(Duration::from_millis(100).min(deadline.saturating_duration_since(Instant::now())));
    }
    executor::check_for_cancellation(token)
}

/// Polls a Job until it succeeds, fails or the timeout elapses.
///
/// Cancellation abandons the loop and leaves the Job running.
pub fn wait_for_job(
    cluster: &dyn ClusterApi,
    namespace: &str,
    job_name: &str,
    settings: &JobSettings,
    token: &CancellationToken,
) -> Result<JobOutcome, ClusterError> {
    let started = Instant::now();
    let timeout = Duration::from_secs(settings.timeout_secs);
    let interval = Duration::from_secs(settings.poll_interval_secs);

    loop {
        executor::check_for_cancellation(token)?;
        let status = cluster.job_status(namespace, job_name)?;
        log::debug!(
            "Job '{}': active={} succeeded={} failed={}",
            job_name,
            status.active,
            status.succeeded,
            status.failed
        );
        if status.is_succeeded() {
            return Ok(JobOutcome::Succeeded);
        }
        if status.is_failed() {
            return Ok(JobOutcome::Failed);
        }
        if started.elapsed() >= timeout {
            return Ok(JobOutcome::TimedOut);
        }
        interruptible_sleep(interval, token)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::cluster::MemoryCluster;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn settings() -> JobSettings {
        JobSettings {
            poll_interval_secs: 0,
            timeout_secs: 1,
            ..JobSettings::default()
        }
    }

    #[test]
    fn test_job_name_shape() {
        let name = job_name("my_etl_script");
        assert!(name.starts_with("kubesol-exec-my-etl-script-"));
        assert_eq!(name.len(), "kubesol-exec-my-etl-script-".len() + 8);

        let long = job_name(&"x".repeat(100));
        assert!(long.len() <= MAX_K8S_NAME_LEN);
        assert!(!long.ends_with('-'));
    }

    #[test]
    fn test_manifest_mounts_script_and_secrets() {
        // --- Setup ---
        let mounts = vec![SecretMount {
            secret_name: "db_creds".to_string(),
            key: "password".to_string(),
            mount_path: "/etc/creds/db-pass".to_string(),
        }];
        let job = ScriptJob {
            job_name: "kubesol-exec-etl-1234abcd".to_string(),
            namespace: "default",
            script_name: "etl",
            configmap_name: "kubesol-script-etl",
            image: "python:3.9-slim",
            args: vec!["--date".to_string(), "today".to_string()],
            secret_mounts: &mounts,
        };

        // --- Execute ---
        let manifest = build_manifest(&job);

        // --- Assert ---
        let pod = &manifest["spec"]["template"]["spec"];
        assert_eq!(
            pod["containers"][0]["command"],
            json!(["python", "/kubesol_scripts/code", "--date", "today"])
        );
        assert_eq!(pod["volumes"][1]["secret"]["items"][0]["path"], json!("db-pass"));
        assert_eq!(pod["containers"][0]["volumeMounts"][1]["mountPath"], json!("/etc/creds"));
        assert_eq!(manifest["metadata"]["name"], json!("kubesol-exec-etl-1234abcd"));
    }

    #[test]
    fn test_wait_for_job_outcomes() {
        let token = Arc::new(AtomicBool::new(false));
        let manifest = json!({ "metadata": { "name": "job-1" } });

        let ok = MemoryCluster::new();
        ok.create_job("default", &manifest).unwrap();
        let outcome = wait_for_job(&ok, "default", "job-1", &settings(), &token).unwrap();
        assert_eq!(outcome, JobOutcome::Succeeded);

        let failing = MemoryCluster::new().with_failing_jobs();
        failing.create_job("default", &manifest).unwrap();
        let outcome = wait_for_job(&failing, "default", "job-1", &settings(), &token).unwrap();
        assert_eq!(outcome, JobOutcome::Failed);
    }

    #[test]
    fn test_wait_for_job_honours_cancellation() {
        let token = Arc::new(AtomicBool::new(true));
        let cluster = MemoryCluster::new();
        let result = wait_for_job(&cluster, "default", "job-1", &settings(), &token);
        assert!(matches!(result, Err(ClusterError::Execution(ExecutionError::Cancelled))));
    }
}
