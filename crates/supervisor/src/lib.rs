//! Launches, tracks, and stops runtime serving processes by stable identity.
//!
//! Generalizes `ProcessHandle` (`rt/native.rs`) and the
//! `generate_running_process_status_handle` helper (`sources/binary.rs`): a
//! spawned child, a phase pushed through shared state by a watcher task
//! selecting over `Child::wait()` and a control channel, and an `identity`-keyed
//! registry guarding the at-most-one-non-terminal-instance guarantee (§8,
//! property 5).

pub mod error;
pub mod model;

pub use error::{Error, Result};
pub use model::{EndpointInstance, Phase};

use aim_materializer::LaunchSpec;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

enum Control {
    Stop { grace: Duration, done: oneshot::Sender<()> },
}

struct Managed {
    state: Arc<Mutex<EndpointInstance>>,
    ctrl_tx: mpsc::Sender<Control>,
}

/// Process-wide registry of serving instances (§5: "in-memory map guarded by
/// a single mutex for identity insertions and phase transitions").
#[derive(Clone, Default)]
pub struct Supervisor {
    registry: Arc<Mutex<HashMap<String, Managed>>>,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `spec` as a child process. Rejects if an instance with the same
    /// `identity` is already non-terminal (§4.6, §8 property 5).
    pub async fn launch(&self, spec: &LaunchSpec) -> Result<EndpointInstance> {
        let mut registry = self.registry.lock().await;

        if let Some(existing) = registry.get(&spec.identity) {
            let snapshot = existing.state.lock().await;
            if !snapshot.phase.is_terminal() {
                return Err(Error::AlreadyExists(spec.identity.clone()));
            }
        }

        let Some(program) = spec.command.first() else {
            return Err(Error::LaunchError {
                identity: spec.identity.clone(),
                reason: "empty command".to_string(),
            });
        };

        let mut command = Command::new(program);
        command
            .args(&spec.command[1..])
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .process_group(0);

        let mut child = command.spawn().map_err(|err| Error::LaunchError {
            identity: spec.identity.clone(),
            reason: err.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| Error::LaunchError {
            identity: spec.identity.clone(),
            reason: "child exited before its pid could be observed".to_string(),
        })?;
        let pid_signed = i32::try_from(pid).map_err(|_| Error::LaunchError {
            identity: spec.identity.clone(),
            reason: format!("pid {pid} does not fit in a signed process id"),
        })?;

        let endpoint_url = spec
            .port_bindings
            .first()
            .map(|p| format!("http://127.0.0.1:{}", p.host_port))
            .unwrap_or_default();

        let instance = EndpointInstance {
            identity: spec.identity.clone(),
            endpoint_url,
            phase: Phase::Starting,
            pid: Some(pid),
            started_at: chrono::Utc::now(),
            last_health_at: None,
            failure_reason: None,
        };
        let state = Arc::new(Mutex::new(instance.clone()));
        let (ctrl_tx, ctrl_rx) = mpsc::channel(4);

        registry.insert(
            spec.identity.clone(),
            Managed {
                state: state.clone(),
                ctrl_tx,
            },
        );
        drop(registry);

        info!(identity = %spec.identity, pid, "instance launched");
        tokio::spawn(run_watcher(child, state, ctrl_rx, pid_signed));

        Ok(instance)
    }

    /// Send a termination signal, escalating to `SIGKILL` after `grace_period`.
    /// Returns once the child has been reaped and `identity` is reusable (§5).
    pub async fn stop(&self, identity: &str, grace_period: Duration) -> Result<()> {
        let ctrl_tx = {
            let registry = self.registry.lock().await;
            let managed = registry.get(identity).ok_or_else(|| Error::NotFound(identity.to_string()))?;
            managed.ctrl_tx.clone()
        };

        let (done_tx, done_rx) = oneshot::channel();
        if ctrl_tx.send(Control::Stop { grace: grace_period, done: done_tx }).await.is_err() {
            // Watcher already exited (e.g. process died and nobody polled since) — nothing to signal.
            return Ok(());
        }
        let _ = done_rx.await;
        Ok(())
    }

    pub async fn status(&self, identity: &str) -> Result<EndpointInstance> {
        let registry = self.registry.lock().await;
        let managed = registry.get(identity).ok_or_else(|| Error::NotFound(identity.to_string()))?;
        Ok(managed.state.lock().await.clone())
    }

    pub async fn list(&self) -> Vec<EndpointInstance> {
        let registry = self.registry.lock().await;
        let mut out = Vec::with_capacity(registry.len());
        for managed in registry.values() {
            out.push(managed.state.lock().await.clone());
        }
        out
    }

    /// Called by the Reconciler once Endpoint Probe reports the instance ready.
    pub async fn mark_ready(&self, identity: &str) -> Result<()> {
        self.transition(identity, Phase::Ready, None).await
    }

    /// Called by the Reconciler on readiness timeout or a post-Ready health failure.
    pub async fn mark_failed(&self, identity: &str, reason: String) -> Result<()> {
        self.transition(identity, Phase::Failed, Some(reason)).await
    }

    async fn transition(&self, identity: &str, phase: Phase, reason: Option<String>) -> Result<()> {
        let registry = self.registry.lock().await;
        let managed = registry.get(identity).ok_or_else(|| Error::NotFound(identity.to_string()))?;
        let mut state = managed.state.lock().await;
        if state.phase.is_terminal() {
            return Ok(());
        }
        state.phase = phase;
        if reason.is_some() {
            state.failure_reason = reason;
        }
        Ok(())
    }
}

async fn run_watcher(mut child: tokio::process::Child, state: Arc<Mutex<EndpointInstance>>, mut ctrl_rx: mpsc::Receiver<Control>, pid: i32) {
    let mut exited = false;

    loop {
        if !exited {
            tokio::select! {
                status = child.wait() => {
                    exited = true;
                    let mut s = state.lock().await;
                    if !s.phase.is_terminal() {
                        s.phase = Phase::Failed;
                        s.failure_reason = Some(describe_exit(status));
                    }
                }
                Some(ctrl) = ctrl_rx.recv() => {
                    exited = true;
                    handle_stop(ctrl, &mut child, &state, pid).await;
                    return;
                }
                else => return,
            }
        } else {
            match ctrl_rx.recv().await {
                Some(Control::Stop { done, .. }) => {
                    state.lock().await.phase = Phase::Terminated;
                    let _ = done.send(());
                    return;
                }
                None => return,
            }
        }
    }
}

async fn handle_stop(ctrl: Control, child: &mut tokio::process::Child, state: &Arc<Mutex<EndpointInstance>>, pid: i32) {
    let Control::Stop { grace, done } = ctrl;
    {
        state.lock().await.phase = Phase::Terminating;
    }

    // SAFETY: `pid` was obtained from this child's own `Child::id()`; the
    // process group was created by launch()'s `process_group(0)`.
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid, "grace period elapsed, escalating to SIGKILL");
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
        let _ = child.wait().await;
    }

    state.lock().await.phase = Phase::Terminated;
    let _ = done.send(());
}

fn describe_exit(status: std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => format!("process exited: {status}"),
        Err(err) => format!("failed to observe exit status: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_materializer::PortBinding;
    use std::collections::HashMap as StdHashMap;

    fn spec(identity: &str, command: Vec<&str>) -> LaunchSpec {
        LaunchSpec {
            command: command.into_iter().map(String::from).collect(),
            environment: StdHashMap::new(),
            mounts: Vec::new(),
            port_bindings: vec![PortBinding { host_port: 8000, container_port: 8000 }],
            device_assignments: vec![],
            identity: identity.to_string(),
        }
    }

    #[tokio::test]
    async fn launch_rejects_duplicate_identity_while_non_terminal() {
        let supervisor = Supervisor::new();
        let s = spec("aim-test-1", vec!["sleep", "5"]);
        supervisor.launch(&s).await.unwrap();

        let result = supervisor.launch(&s).await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        supervisor.stop("aim-test-1", Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_reaps_and_frees_identity_for_reuse() {
        let supervisor = Supervisor::new();
        let s = spec("aim-test-2", vec!["sleep", "5"]);
        supervisor.launch(&s).await.unwrap();

        supervisor.stop("aim-test-2", Duration::from_millis(200)).await.unwrap();
        let status = supervisor.status("aim-test-2").await.unwrap();
        assert_eq!(status.phase, Phase::Terminated);

        // Identity is reusable once terminal.
        supervisor.launch(&s).await.unwrap();
        supervisor.stop("aim-test-2", Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn spontaneous_exit_transitions_to_failed() {
        let supervisor = Supervisor::new();
        let s = spec("aim-test-3", vec!["true"]);
        supervisor.launch(&s).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = supervisor.status("aim-test-3").await.unwrap();
        assert_eq!(status.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn launch_error_on_missing_binary_is_synchronous() {
        let supervisor = Supervisor::new();
        let s = spec("aim-test-4", vec!["/definitely/not/a/real/binary"]);
        let result = supervisor.launch(&s).await;
        assert!(matches!(result, Err(Error::LaunchError { .. })));
        assert!(supervisor.status("aim-test-4").await.is_err());
    }

    #[tokio::test]
    async fn mark_ready_then_list_reflects_phase() {
        let supervisor = Supervisor::new();
        let s = spec("aim-test-5", vec!["sleep", "5"]);
        supervisor.launch(&s).await.unwrap();
        supervisor.mark_ready("aim-test-5").await.unwrap();

        let all = supervisor.list().await;
        assert!(all.iter().any(|i| i.identity == "aim-test-5" && i.phase == Phase::Ready));

        supervisor.stop("aim-test-5", Duration::from_millis(200)).await.unwrap();
    }
}
