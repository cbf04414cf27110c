//! Job submission, the completion wait protocol, and job-scoped helpers.
//!
//! Submitting a script or flow run is a single POST that returns an opaque job
//! id. Waiting on that id is the one place in the SDK with real state-machine
//! behavior: [`wait_job`] polls the completion probe at a fixed interval until
//! the job reaches a terminal state, enforcing an optional wall-clock deadline
//! and an at-most-once cancellation side effect via [`CancelGuard`].

use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{check_status, Client};
use crate::error::{Error, Result};

/// Fixed interval between completion polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Coarse job lifecycle as observed through polling. Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Running,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "WAITING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// One observation of the completion probe endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResultProbe {
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Value,
}

/// Options for [`wait_job`] and the synchronous run wrappers.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Wall-clock deadline measured from the call's start. `None` waits
    /// indefinitely.
    pub timeout: Option<Duration>,
    /// Log each poll observation.
    pub verbose: bool,
    /// Arm a [`CancelGuard`] so the job is cancelled if the wait is abandoned
    /// before a terminal state (panic, early drop, process teardown that runs
    /// destructors).
    pub cancel_on_drop: bool,
    /// Fail with [`Error::NullResult`] when a successful job produced a null
    /// result.
    pub assert_result_not_none: bool,
    /// Interval between polls. The contract value is
    /// [`DEFAULT_POLL_INTERVAL`]; override only for tests or latency-critical
    /// callers.
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        WaitOptions {
            timeout: None,
            verbose: false,
            cancel_on_drop: true,
            assert_result_not_none: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Scoped cancellation of a queued or running job.
///
/// While armed, dropping the guard issues a best-effort cancellation request
/// for the job. [`wait_job`] disarms the guard exactly once, immediately upon
/// observing a terminal state, so a stale cancellation can never fire after
/// success. Cancelling an already-completed job is a no-op on the server, so
/// a duplicate cancellation (e.g. guard drop after the timeout path already
/// cancelled) never raises.
pub struct CancelGuard<'a> {
    client: &'a Client,
    job_id: String,
    reason: &'static str,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    pub fn new(client: &'a Client, job_id: impl Into<String>) -> Self {
        CancelGuard {
            client,
            job_id: job_id.into(),
            reason: "parent script cancelled",
            armed: true,
        }
    }

    /// Release the guard without cancelling. Idempotent.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Cancelling abandoned job job_id={}", self.job_id);
            best_effort_cancel(self.client, &self.job_id, self.reason);
        }
    }
}

/// Issue a cancellation request, logging rather than raising on failure.
/// Used on the timeout path and by [`CancelGuard`]; must never mask the
/// primary error.
fn best_effort_cancel(client: &Client, job_id: &str, reason: &str) {
    let endpoint = format!("/w/{}/jobs_u/queue/cancel/{}", client.workspace(), job_id);
    match client.post_unchecked(&endpoint, &json!({ "reason": reason })) {
        Ok(resp) if !resp.status().is_success() => {
            warn!(
                "Cancel request rejected job_id={} status={}",
                job_id,
                resp.status().as_u16()
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Cancel request failed job_id={} error={}", job_id, e);
        }
    }
}

/// Cancel a queued or running job. Idempotent on the server side.
pub fn cancel_job(client: &Client, job_id: &str, reason: &str) -> Result<()> {
    let endpoint = format!("/w/{}/jobs_u/queue/cancel/{}", client.workspace(), job_id);
    client.post(&endpoint, &json!({ "reason": reason }))?;
    Ok(())
}

/// Block until `job_id` reaches a terminal state and return its result.
///
/// Polls the completion probe every `opts.poll_interval`. Terminal outcomes:
/// - completed successfully: returns the result (subject to
///   `assert_result_not_none`);
/// - completed unsuccessfully: [`Error::JobFailed`] carrying the server error
///   payload;
/// - deadline elapsed: one best-effort cancellation, then [`Error::Timeout`].
///
/// A transport failure during a poll propagates immediately; the armed guard
/// then cancels the job on unwind. One poll is in flight at a time.
pub fn wait_job(client: &Client, job_id: &str, opts: &WaitOptions) -> Result<Value> {
    let start = Instant::now();
    let endpoint = format!(
        "/w/{}/jobs_u/completed/get_result_maybe/{}",
        client.workspace(),
        job_id
    );
    let mut guard = opts
        .cancel_on_drop
        .then(|| CancelGuard::new(client, job_id));

    loop {
        let probe: JobResultProbe = client.get(&endpoint)?.json()?;

        if !probe.started && opts.verbose {
            info!("Job not started yet job_id={}", job_id);
        }

        if probe.completed {
            if let Some(guard) = guard.as_mut() {
                guard.disarm();
            }
            if probe.success {
                if probe.result.is_null() && opts.assert_result_not_none {
                    return Err(Error::NullResult {
                        job_id: job_id.to_string(),
                    });
                }
                return Ok(probe.result);
            }
            let error = match probe.result.get("error") {
                Some(error) => error.clone(),
                None => probe.result,
            };
            return Err(Error::JobFailed {
                job_id: job_id.to_string(),
                error,
            });
        }

        if let Some(timeout) = opts.timeout {
            if start.elapsed() > timeout {
                warn!(
                    "Job wait reached timeout job_id={} timeout_s={:.1}",
                    job_id,
                    timeout.as_secs_f64()
                );
                best_effort_cancel(client, job_id, "reached timeout");
                if let Some(guard) = guard.as_mut() {
                    guard.disarm();
                }
                return Err(Error::Timeout {
                    job_id: job_id.to_string(),
                });
            }
        }

        if opts.verbose {
            info!(
                "Job still pending job_id={} sleep_ms={}",
                job_id,
                opts.poll_interval.as_millis()
            );
        }
        thread::sleep(opts.poll_interval);
    }
}

enum RunKind<'a> {
    ScriptByPath(&'a str),
    ScriptByHash(&'a str),
    Flow(&'a str),
}

fn submit(
    client: &Client,
    kind: RunKind<'_>,
    args: &Value,
    scheduled_in_secs: Option<i64>,
    attach_parent: bool,
) -> Result<String> {
    let (selector, reference) = match kind {
        RunKind::ScriptByPath(path) => ("p", path),
        RunKind::ScriptByHash(hash) => ("h", hash),
        RunKind::Flow(path) => ("f", path),
    };
    let endpoint = format!(
        "/w/{}/jobs/run/{}/{}",
        client.workspace(),
        selector,
        reference
    );

    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(secs) = scheduled_in_secs {
        query.push(("scheduled_in_secs", secs.to_string()));
    }
    if attach_parent {
        if let Some(parent) = client.job_id() {
            query.push(("parent_job", parent.to_string()));
        }
        if let Some(root) = client.root_flow_job_id() {
            query.push(("root_job", root.to_string()));
        }
    }

    let job_id = client.post_with(&endpoint, args, &query)?.text()?;
    info!("Job submitted job_id={} reference={}", job_id, reference);
    Ok(job_id)
}

/// Submit a script run by path and return its job id.
pub fn run_script_by_path_async(
    client: &Client,
    path: &str,
    args: &Value,
    scheduled_in_secs: Option<i64>,
) -> Result<String> {
    submit(client, RunKind::ScriptByPath(path), args, scheduled_in_secs, true)
}

/// Submit a script run by hash and return its job id.
pub fn run_script_by_hash_async(
    client: &Client,
    hash: &str,
    args: &Value,
    scheduled_in_secs: Option<i64>,
) -> Result<String> {
    submit(client, RunKind::ScriptByHash(hash), args, scheduled_in_secs, true)
}

/// Submit a flow run by path and return its job id.
///
/// `track_in_parent` attaches the current job as the flow's parent. Only set
/// it when the flow is fully awaited and not concurrent with any other job;
/// a tracked child flow stores its state in the parent job, and concurrent
/// children corrupt each other's state there.
pub fn run_flow_async(
    client: &Client,
    path: &str,
    args: &Value,
    scheduled_in_secs: Option<i64>,
    track_in_parent: bool,
) -> Result<String> {
    submit(
        client,
        RunKind::Flow(path),
        args,
        scheduled_in_secs,
        track_in_parent,
    )
}

/// Run a script by path synchronously and return its result.
pub fn run_script_by_path(
    client: &Client,
    path: &str,
    args: &Value,
    opts: &WaitOptions,
) -> Result<Value> {
    if opts.verbose {
        info!("Running script synchronously path={}", path);
    }
    let job_id = run_script_by_path_async(client, path, args, None)?;
    wait_job(client, &job_id, opts)
}

/// Run a script by hash synchronously and return its result.
pub fn run_script_by_hash(
    client: &Client,
    hash: &str,
    args: &Value,
    opts: &WaitOptions,
) -> Result<Value> {
    if opts.verbose {
        info!("Running script synchronously hash={}", hash);
    }
    let job_id = run_script_by_hash_async(client, hash, args, None)?;
    wait_job(client, &job_id, opts)
}

/// Fetch the full job document.
pub fn get_job(client: &Client, job_id: &str) -> Result<Value> {
    let endpoint = format!("/w/{}/jobs_u/get/{}", client.workspace(), job_id);
    Ok(client.get(&endpoint)?.json()?)
}

/// Coarse status of a job, derived from its document.
pub fn get_job_status(client: &Client, job_id: &str) -> Result<JobStatus> {
    let job = get_job(client, job_id)?;
    let job_type = job.get("type").and_then(Value::as_str).unwrap_or_default();
    if job_type.is_empty() {
        warn!("Job document has no type job_id={}", job_id);
    }
    if job_type.eq_ignore_ascii_case("completedjob") {
        return Ok(JobStatus::Completed);
    }
    if job.get("running").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(JobStatus::Running);
    }
    Ok(JobStatus::Waiting)
}

/// Result of an already-completed job.
pub fn get_result(client: &Client, job_id: &str, assert_result_not_none: bool) -> Result<Value> {
    let endpoint = format!(
        "/w/{}/jobs_u/completed/get_result/{}",
        client.workspace(),
        job_id
    );
    let text = client.get(&endpoint)?.text()?;
    // Some result endpoints return raw text rather than JSON.
    let result = serde_json::from_str(&text).unwrap_or(Value::String(text));
    if result.is_null() && assert_result_not_none {
        return Err(Error::NullResult {
            job_id: job_id.to_string(),
        });
    }
    Ok(result)
}

/// The root job id of the flow containing `job_id` (defaults to the current
/// job from the ambient context).
pub fn get_root_job_id(client: &Client, job_id: Option<&str>) -> Result<String> {
    let job_id = job_id
        .map(str::to_string)
        .or_else(|| client.job_id().map(str::to_string))
        .ok_or_else(|| Error::Config("no job id given and none in the environment".into()))?;
    let endpoint = format!("/w/{}/jobs_u/get_root_job_id/{}", client.workspace(), job_id);
    let value: Value = client.get(&endpoint)?.json()?;
    match value {
        Value::String(id) => Ok(id),
        other => Ok(other.to_string()),
    }
}

/// Cancel other running executions of the current script path.
///
/// Returns the ids that were cancelled. The current job (from the ambient
/// context) is never cancelled.
pub fn cancel_running(client: &Client) -> Result<Vec<String>> {
    let script_path = client
        .script_path()
        .ok_or_else(|| Error::Config("no script path in the environment".into()))?;
    info!("Cancelling running executions path={}", script_path);

    let endpoint = format!("/w/{}/jobs/list", client.workspace());
    let jobs: Vec<Value> = client
        .get_with(
            &endpoint,
            &[
                ("running", "true".to_string()),
                ("script_path_exact", script_path.to_string()),
            ],
        )?
        .json()?;

    let current = client.job_id().unwrap_or_default();
    let mut cancelled = Vec::new();
    for job in &jobs {
        let Some(id) = job.get("id").and_then(Value::as_str) else {
            continue;
        };
        if id == current {
            continue;
        }
        cancel_job(client, id, "killed by `cancel_running`")?;
        cancelled.push(id.to_string());
    }
    if cancelled.is_empty() {
        info!("No previous executions to cancel");
    } else {
        info!("Executions cancelled count={}", cancelled.len());
    }
    Ok(cancelled)
}

/// Resume/cancel URLs for the current suspended step.
pub fn get_resume_urls(client: &Client, approver: Option<&str>) -> Result<Value> {
    let job_id = client.job_id().unwrap_or("NO_ID");
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let endpoint = format!(
        "/w/{}/jobs/resume_urls/{}/{}",
        client.workspace(),
        job_id,
        nonce
    );
    let mut query = Vec::new();
    if let Some(approver) = approver {
        query.push(("approver", approver.to_string()));
    }
    Ok(client.get_with(&endpoint, &query)?.json()?)
}

/// Report progress (0-100) for a job, attributed to its parent flow when one
/// exists.
pub fn set_progress(client: &Client, percent: i64, job_id: Option<&str>) -> Result<()> {
    let job_id = job_id
        .map(str::to_string)
        .or_else(|| client.job_id().map(str::to_string))
        .ok_or_else(|| Error::Config("no job id given and none in the environment".into()))?;
    let flow_job_id = match get_job(client, &job_id)?.get("parent_job").and_then(Value::as_str) {
        Some(parent) => Some(parent.to_string()),
        None => client.flow_job_id().map(str::to_string),
    };
    let endpoint = format!("/w/{}/job_metrics/set_progress/{}", client.workspace(), job_id);
    client.post(
        &endpoint,
        &json!({ "percent": percent, "flow_job_id": flow_job_id }),
    )?;
    Ok(())
}

/// Last reported progress for a job, or `None` when the job does not exist.
pub fn get_progress(client: &Client, job_id: Option<&str>) -> Result<Option<Value>> {
    let job_id = job_id
        .map(str::to_string)
        .or_else(|| client.job_id().map(str::to_string))
        .ok_or_else(|| Error::Config("no job id given and none in the environment".into()))?;
    let endpoint = format!("/w/{}/job_metrics/get_progress/{}", client.workspace(), job_id);
    let resp = client.get_unchecked(&endpoint)?;
    if resp.status().as_u16() == 404 {
        warn!("Job does not exist job_id={}", job_id);
        return Ok(None);
    }
    Ok(Some(check_status("GET", resp)?.json()?))
}

/// Set the user state of the enclosing flow at a given key.
pub fn set_flow_user_state(client: &Client, key: &str, value: &Value) -> Result<()> {
    let flow_id = get_root_job_id(client, None)?;
    let endpoint = format!(
        "/w/{}/jobs/flow/user_states/{}/{}",
        client.workspace(),
        flow_id,
        key
    );
    let resp = client.post_unchecked(&endpoint, value)?;
    if resp.status().as_u16() == 404 {
        warn!("Job does not exist or is not a flow job_id={}", flow_id);
        return Ok(());
    }
    check_status("POST", resp)?;
    Ok(())
}

/// Get the user state of the enclosing flow at a given key.
pub fn get_flow_user_state(client: &Client, key: &str) -> Result<Option<Value>> {
    let flow_id = get_root_job_id(client, None)?;
    let endpoint = format!(
        "/w/{}/jobs/flow/user_states/{}/{}",
        client.workspace(),
        flow_id,
        key
    );
    let resp = client.get_unchecked(&endpoint)?;
    if resp.status().as_u16() == 404 {
        warn!("Job does not exist or is not a flow job_id={}", flow_id);
        return Ok(None);
    }
    Ok(Some(check_status("GET", resp)?.json()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Waiting.to_string(), "WAITING");
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
        assert_eq!(JobStatus::Completed.to_string(), "COMPLETED");
    }

    #[test]
    fn test_probe_defaults_for_missing_fields() {
        let probe: JobResultProbe = serde_json::from_str("{}").unwrap();
        assert!(!probe.started);
        assert!(!probe.completed);
        assert!(!probe.success);
        assert!(probe.result.is_null());
    }

    #[test]
    fn test_wait_options_defaults() {
        let opts = WaitOptions::default();
        assert_eq!(opts.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(opts.timeout.is_none());
        assert!(opts.cancel_on_drop);
        assert!(!opts.assert_result_not_none);
    }
}
