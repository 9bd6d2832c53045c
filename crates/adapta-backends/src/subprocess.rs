use adapta_core::{
    extract_text, AdaptaError, AdaptaResult, AgentAdapter, BackendError, BackendResult,
    CancellableAdapter,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INPUT: &str = "{{input}}";
const SESSION_ID: &str = "{{session_id}}";
const CONTEXT_ID: &str = "{{context_id}}";
const AGENT_ID: &str = "{{agent_id}}";
const THINKING: &str = "{{thinking}}";

/// How much stderr is kept in a `BackendFault` message.
const STDERR_LIMIT: usize = 2_000;

/// Configuration for [`SubprocessAdapter`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubprocessConfig {
    /// Executable to run, looked up on `PATH` when not absolute.
    #[serde(alias = "openclaw_path")]
    pub command: String,
    /// Argument templates. `{{input}}`, `{{session_id}}`, `{{context_id}}`,
    /// `{{agent_id}}` and `{{thinking}}` are substituted per invocation.
    pub args: Vec<String>,
    /// Backend session id; generated once per adapter when unset.
    pub session_id: Option<String>,
    /// Backend agent to route to.
    pub agent_id: Option<String>,
    /// Reasoning level passed through to the backend.
    pub thinking: Option<String>,
    /// Wall-clock limit per invocation in seconds, output collection included.
    #[serde(alias = "timeout")]
    pub timeout_secs: u64,
    /// Working directory for the child.
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables for the child.
    #[serde(alias = "env_vars")]
    pub env: HashMap<String, String>,
    /// When set, the last JSON line of stdout is parsed and this key extracted.
    pub output_key: Option<String>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            command: "openclaw".to_string(),
            args: [
                "agent",
                "--message",
                INPUT,
                "--session-id",
                SESSION_ID,
                "--agent",
                AGENT_ID,
                "--thinking",
                THINKING,
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            session_id: None,
            agent_id: None,
            thinking: None,
            timeout_secs: 300,
            working_directory: None,
            env: HashMap::new(),
            output_key: None,
        }
    }
}

impl SubprocessConfig {
    /// Runs `command` with `args` and defaults for everything else.
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }
}

/// How the wait on a child ended.
enum Exit {
    /// Exited and both pipes reached EOF.
    Finished {
        status: std::io::Result<std::process::ExitStatus>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
    Killed,
}

/// Adapter for agents that run as an external binary (OpenClaw and similar).
///
/// Single-flight: invocations on one instance are serialised, and
/// [`CancellableAdapter::cancel`] and [`AgentAdapter::close`] terminate the
/// one currently running. The session id is fixed for the adapter's lifetime
/// so consecutive invocations continue the same backend conversation.
pub struct SubprocessAdapter {
    config: SubprocessConfig,
    session_id: String,
    flight: tokio::sync::Mutex<()>,
    current: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl SubprocessAdapter {
    /// Validates `config`; generates a session id if none is configured.
    pub fn new(config: SubprocessConfig) -> AdaptaResult<Self> {
        if config.command.trim().is_empty() {
            return Err(AdaptaError::Config("command must not be empty".into()));
        }
        if config.timeout_secs == 0 {
            return Err(AdaptaError::Config("timeout_secs must be at least 1".into()));
        }
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| format!("a2a-{}", Uuid::new_v4()));
        Ok(Self {
            config,
            session_id,
            flight: tokio::sync::Mutex::new(()),
            current: parking_lot::Mutex::new(None),
        })
    }

    /// The backend session id every invocation is sent with.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Renders the argument templates. Returns the args and whether the input
    /// still has to go through stdin.
    fn render_args(&self, input: &str, context_id: Option<&str>) -> (Vec<String>, bool) {
        // Input last, so placeholders inside user text are left alone.
        let values = [
            (SESSION_ID, Some(self.session_id.as_str())),
            (CONTEXT_ID, context_id),
            (AGENT_ID, self.config.agent_id.as_deref()),
            (THINKING, self.config.thinking.as_deref()),
            (INPUT, Some(input)),
        ];

        let mut args: Vec<String> = Vec::with_capacity(self.config.args.len());
        let mut prev_kept = false;
        let mut input_in_args = false;

        for template in &self.config.args {
            let unset = values
                .iter()
                .any(|(placeholder, value)| value.is_none() && template.contains(placeholder));
            if unset {
                if prev_kept && args.last().is_some_and(|prev| prev.starts_with('-')) {
                    args.pop();
                }
                prev_kept = false;
                continue;
            }

            let mut arg = template.clone();
            for (placeholder, value) in &values {
                if let Some(value) = value {
                    arg = arg.replace(placeholder, value);
                }
            }
            input_in_args |= template.contains(INPUT);
            args.push(arg);
            prev_kept = true;
        }

        (args, !input_in_args)
    }

    fn parse_output(&self, stdout: &str) -> BackendResult<String> {
        let Some(key) = self.config.output_key.as_deref() else {
            let text = stdout.trim();
            if text.is_empty() {
                return Err(BackendError::invalid_response(
                    "process exited successfully but wrote nothing to stdout",
                ));
            }
            return Ok(text.to_string());
        };

        let value: serde_json::Value = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
            .ok_or_else(|| {
                BackendError::invalid_response(format!(
                    "no JSON line in process output: {}",
                    &stdout[..floor_char_boundary(stdout, 500)]
                ))
            })?;
        extract_text(&value, Some(key))
    }

    fn fire_kill(&self) -> bool {
        match self.current.lock().take() {
            Some(kill) => kill.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl AgentAdapter for SubprocessAdapter {
    fn kind(&self) -> &str {
        "openclaw"
    }

    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String> {
        let _flight = self.flight.lock().await;

        let (args, use_stdin) = self.render_args(input, context_id);
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&args)
            .envs(&self.config.env)
            .stdin(if use_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_directory {
            cmd.current_dir(dir);
        }

        info!(
            command = %self.config.command,
            session_id = %self.session_id,
            input_len = input.len(),
            "Spawning agent process"
        );

        let mut child = cmd.spawn().map_err(|e| {
            BackendError::unreachable(format!(
                "failed to spawn '{}': {e}",
                self.config.command
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = input.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&bytes).await {
                    debug!(error = %e, "Agent process closed stdin early");
                }
            });
        }
        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.current.lock() = Some(kill_tx);

        // The deadline covers pipe EOF too: a descendant can hold stdout open
        // after the child itself has exited.
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let exit = {
            let finished = async {
                let status = child.wait().await;
                let stdout = (&mut stdout_task).await.unwrap_or_default();
                let stderr = (&mut stderr_task).await.unwrap_or_default();
                (status, stdout, stderr)
            };
            tokio::select! {
                (status, stdout, stderr) = finished => Exit::Finished { status, stdout, stderr },
                _ = tokio::time::sleep(timeout) => Exit::TimedOut,
                _ = kill_rx => Exit::Killed,
            }
        };
        self.current.lock().take();

        let timed_out = matches!(exit, Exit::TimedOut);
        let (status, stdout, stderr) = match exit {
            Exit::Finished {
                status,
                stdout,
                stderr,
            } => (status, stdout, stderr),
            Exit::TimedOut | Exit::Killed => {
                if matches!(child.try_wait(), Ok(None)) {
                    if let Err(e) = child.kill().await {
                        warn!(pid = ?child.id(), error = %e, "Failed to kill agent process");
                    }
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(if timed_out {
                    warn!(timeout_secs = self.config.timeout_secs, "Agent process timed out");
                    BackendError::timeout(format!(
                        "'{}' did not finish within {}s",
                        self.config.command, self.config.timeout_secs
                    ))
                } else {
                    info!(command = %self.config.command, "Agent process killed on request");
                    BackendError::fault("agent process was terminated by a cancel request")
                });
            }
        };

        let status = status
            .map_err(|e| BackendError::fault(format!("failed to wait for agent process: {e}")))?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            warn!(exit_code = code, "Agent process failed");
            return Err(BackendError::fault(format!(
                "'{}' exited with code {code}: {}",
                self.config.command,
                stderr[..floor_char_boundary(&stderr, STDERR_LIMIT)].trim()
            )));
        }

        debug!(stdout_len = stdout.len(), "Agent process finished");
        self.parse_output(&stdout)
    }

    fn cancellation(&self) -> Option<&dyn CancellableAdapter> {
        Some(self)
    }

    fn single_flight(&self) -> bool {
        true
    }

    async fn close(&self) {
        if self.fire_kill() {
            info!(command = %self.config.command, "Terminated running agent process on close");
        }
    }
}

#[async_trait]
impl CancellableAdapter for SubprocessAdapter {
    async fn cancel(&self) {
        if !self.fire_kill() {
            debug!("Cancel requested with no agent process running");
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Error reading agent process pipe");
        }
    }
    buf
}

fn floor_char_boundary(s: &str, max_len: usize) -> usize {
    if s.len() <= max_len {
        return s.len();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use adapta_core::BackendErrorKind;
    use std::sync::Arc;
    use std::time::Instant;

    fn sh(script: &str) -> SubprocessConfig {
        SubprocessConfig::new("sh", &["-c", script])
    }

    #[test]
    fn test_config_defaults() {
        let config: SubprocessConfig = serde_json::from_value(serde_json::json!({
            "thinking": "low"
        }))
        .unwrap();
        assert_eq!(config.command, "openclaw");
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.thinking.as_deref(), Some("low"));
    }

    #[test]
    fn test_config_accepts_legacy_key_names() {
        let config: SubprocessConfig = serde_json::from_value(serde_json::json!({
            "openclaw_path": "/opt/openclaw/bin/openclaw",
            "timeout": 120,
            "env_vars": {"OPENCLAW_HOME": "/tmp/oc"}
        }))
        .unwrap();
        assert_eq!(config.command, "/opt/openclaw/bin/openclaw");
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.env["OPENCLAW_HOME"], "/tmp/oc");
    }

    #[test]
    fn test_session_id_generated_once() {
        let adapter = SubprocessAdapter::new(SubprocessConfig::default()).unwrap();
        assert!(adapter.session_id().starts_with("a2a-"));

        let config = SubprocessConfig {
            session_id: Some("demo-session".into()),
            ..SubprocessConfig::default()
        };
        let adapter = SubprocessAdapter::new(config).unwrap();
        assert_eq!(adapter.session_id(), "demo-session");
    }

    #[test]
    fn test_rejects_empty_command_and_zero_timeout() {
        assert!(SubprocessAdapter::new(SubprocessConfig::new(" ", &[])).is_err());
        let config = SubprocessConfig {
            timeout_secs: 0,
            ..SubprocessConfig::default()
        };
        assert!(SubprocessAdapter::new(config).is_err());
    }

    #[test]
    fn test_render_drops_unset_values_with_their_flag() {
        let config = SubprocessConfig {
            session_id: Some("s-1".into()),
            thinking: Some("low".into()),
            ..SubprocessConfig::default()
        };
        let adapter = SubprocessAdapter::new(config).unwrap();
        let (args, use_stdin) = adapter.render_args("hello", None);
        assert_eq!(
            args,
            vec![
                "agent",
                "--message",
                "hello",
                "--session-id",
                "s-1",
                "--thinking",
                "low"
            ]
        );
        assert!(!use_stdin);
    }

    #[test]
    fn test_render_leaves_placeholders_in_input() {
        let adapter =
            SubprocessAdapter::new(SubprocessConfig::new("echo", &["{{input}}"])).unwrap();
        let (args, _) = adapter.render_args("say {{agent_id}}", Some("ctx"));
        assert_eq!(args, vec!["say {{agent_id}}"]);
    }

    #[test]
    fn test_render_without_input_uses_stdin() {
        let adapter = SubprocessAdapter::new(SubprocessConfig::new(
            "agent",
            &["--context", "{{context_id}}", "--json"],
        ))
        .unwrap();
        let (args, use_stdin) = adapter.render_args("hi", Some("c-9"));
        assert_eq!(args, vec!["--context", "c-9", "--json"]);
        assert!(use_stdin);

        let (args, _) = adapter.render_args("hi", None);
        assert_eq!(args, vec!["--json"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_via_stdin() {
        let adapter = SubprocessAdapter::new(SubprocessConfig::new("cat", &[])).unwrap();
        assert_eq!(adapter.invoke("ping", None).await.unwrap(), "ping");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_via_args() {
        let adapter =
            SubprocessAdapter::new(sh("echo \"got: $0\"").with_args_suffix("{{input}}")).unwrap();
        assert_eq!(adapter.invoke("hello", None).await.unwrap(), "got: hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_fault_with_stderr() {
        let adapter = SubprocessAdapter::new(sh("echo boom >&2; exit 3")).unwrap();
        let err = adapter.invoke("x", None).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::BackendFault);
        assert!(err.message.contains("code 3"), "got: {}", err.message);
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unreachable() {
        let adapter = SubprocessAdapter::new(SubprocessConfig::new(
            "/nonexistent/agent-binary",
            &[],
        ))
        .unwrap();
        let err = adapter.invoke("x", None).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unreachable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_key_reads_last_json_line() {
        let mut config = sh(r#"echo "starting"; echo '{"result": "done", "cost": 0}'"#);
        config.output_key = Some("result".into());
        let adapter = SubprocessAdapter::new(config).unwrap();
        assert_eq!(adapter.invoke("x", None).await.unwrap(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh("echo \"$AGENT_MODE $(pwd)\"");
        config.env.insert("AGENT_MODE".into(), "test".into());
        config.working_directory = Some(dir.path().to_path_buf());
        let adapter = SubprocessAdapter::new(config).unwrap();

        let out = adapter.invoke("x", None).await.unwrap();
        let dir_name = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(out.starts_with("test "));
        assert!(out.ends_with(dir_name), "got: {out}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let mut config = sh(&format!("echo $$ > {}; exec sleep 30", pid_file.display()));
        config.timeout_secs = 1;
        let adapter = SubprocessAdapter::new(config).unwrap();

        let err = adapter.invoke("x", None).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(!alive, "process {} still running", pid.trim());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        let adapter = Arc::new(SubprocessAdapter::new(sh("exec sleep 30")).unwrap());
        let running = Arc::clone(&adapter);
        let start = Instant::now();
        let handle = tokio::spawn(async move { running.invoke("x", None).await });

        while adapter.current.lock().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        adapter.cancellation().unwrap().cancel().await;

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::BackendFault);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_inherited_stdout() {
        // The background sleep keeps stdout open after the shell exits.
        let mut config = sh("sleep 5 & echo hi");
        config.timeout_secs = 1;
        let adapter = SubprocessAdapter::new(config).unwrap();

        let start = Instant::now();
        let err = adapter.invoke("x", None).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
        assert!(start.elapsed() < Duration::from_secs(4), "took {:?}", start.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_while_output_still_open() {
        let adapter = Arc::new(SubprocessAdapter::new(sh("sleep 30 & echo hi")).unwrap());
        let running = Arc::clone(&adapter);
        let start = Instant::now();
        let handle = tokio::spawn(async move { running.invoke("x", None).await });

        // Past the shell's own exit, so only the pipe keeps the call open.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(adapter.current.lock().is_some());
        adapter.cancellation().unwrap().cancel().await;

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::BackendFault);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_declares_single_flight() {
        let adapter = SubprocessAdapter::new(SubprocessConfig::default()).unwrap();
        assert!(adapter.single_flight());
    }

    #[tokio::test]
    async fn test_close_without_invocation_is_noop() {
        let adapter = SubprocessAdapter::new(SubprocessConfig::default()).unwrap();
        adapter.close().await;
        adapter.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invocations_are_serialised() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let script = format!(
            "echo start >> {log}; sleep 0.2; echo end >> {log}; echo ok",
            log = log.display()
        );
        let adapter = Arc::new(SubprocessAdapter::new(sh(&script)).unwrap());

        let a = Arc::clone(&adapter);
        let b = Arc::clone(&adapter);
        let (ra, rb) = tokio::join!(a.invoke("1", None), b.invoke("2", None));
        assert_eq!(ra.unwrap(), "ok");
        assert_eq!(rb.unwrap(), "ok");

        let lines: Vec<String> = std::fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(lines, vec!["start", "end", "start", "end"]);
    }

    impl SubprocessConfig {
        fn with_args_suffix(mut self, arg: &str) -> Self {
            self.args.push(arg.to_string());
            self
        }
    }
}
