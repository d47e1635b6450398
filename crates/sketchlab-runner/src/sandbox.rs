//! Isolated execution of one trial command.
//!
//! [`DockerSandbox`] pins the trial to one CPU with a hard memory ceiling and
//! no swap. [`LocalSandbox`] runs the same command as a plain child process
//! and is meant for hosts without docker; it does not enforce limits.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to invoke {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("docker {op} failed: {message}")]
    Docker { op: &'static str, message: String },

    #[error("unknown sandbox handle: {0}")]
    UnknownHandle(String),

    #[error("empty command")]
    EmptyCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub cpu: usize,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub status_code: Option<i64>,
    /// Runtime-reported failure text, if any.
    pub error: Option<String>,
    pub timed_out: bool,
}

impl ExitInfo {
    pub fn exited(code: i64) -> Self {
        Self {
            status_code: Some(code),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            error: Some("trial exceeded its timeout".to_string()),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub trait Sandbox {
    /// Image or environment name recorded with every trial.
    fn identity(&self) -> &str;

    fn launch(
        &mut self,
        argv: &[String],
        limits: &SandboxLimits,
    ) -> Result<SandboxHandle, SandboxError>;

    /// Blocks until the trial exits, or kills it once `timeout` elapses.
    fn wait(
        &mut self,
        handle: &SandboxHandle,
        timeout: Option<Duration>,
    ) -> Result<ExitInfo, SandboxError>;

    fn logs(&mut self, handle: &SandboxHandle) -> Result<CapturedLogs, SandboxError>;

    fn remove(&mut self, handle: &SandboxHandle) -> Result<(), SandboxError>;
}

impl<S: Sandbox + ?Sized> Sandbox for Box<S> {
    fn identity(&self) -> &str {
        (**self).identity()
    }

    fn launch(
        &mut self,
        argv: &[String],
        limits: &SandboxLimits,
    ) -> Result<SandboxHandle, SandboxError> {
        (**self).launch(argv, limits)
    }

    fn wait(
        &mut self,
        handle: &SandboxHandle,
        timeout: Option<Duration>,
    ) -> Result<ExitInfo, SandboxError> {
        (**self).wait(handle, timeout)
    }

    fn logs(&mut self, handle: &SandboxHandle) -> Result<CapturedLogs, SandboxError> {
        (**self).logs(handle)
    }

    fn remove(&mut self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        (**self).remove(handle)
    }
}

/// `Ok(None)` means the deadline passed and the child was killed.
fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn status_code(status: ExitStatus) -> ExitInfo {
    match status.code() {
        Some(code) => ExitInfo::exited(i64::from(code)),
        None => ExitInfo {
            error: Some("terminated by signal".to_string()),
            ..ExitInfo::default()
        },
    }
}

pub struct DockerSandbox {
    image: String,
    docker: String,
}

impl DockerSandbox {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            docker: "docker".to_string(),
        }
    }

    /// Alternative client binary, e.g. `podman`.
    pub fn with_client(mut self, docker: &str) -> Self {
        self.docker = docker.to_string();
        self
    }

    pub fn run_args(&self, argv: &[String], limits: &SandboxLimits) -> Vec<String> {
        let memory = limits.memory_bytes.to_string();
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--cpuset-cpus".to_string(),
            limits.cpu.to_string(),
            "--memory".to_string(),
            memory.clone(),
            "--memory-swappiness".to_string(),
            "0".to_string(),
            // swap limit equal to the memory limit: no swap at all
            "--memory-swap".to_string(),
            memory,
            self.image.clone(),
        ];
        args.extend(argv.iter().cloned());
        args
    }

    fn docker_output(&self, op: &'static str, args: &[&str]) -> Result<std::process::Output, SandboxError> {
        let output = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SandboxError::Spawn {
                program: self.docker.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SandboxError::Docker {
                op,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Sandbox for DockerSandbox {
    fn identity(&self) -> &str {
        &self.image
    }

    fn launch(
        &mut self,
        argv: &[String],
        limits: &SandboxLimits,
    ) -> Result<SandboxHandle, SandboxError> {
        if argv.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }
        let args = self.run_args(argv, limits);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.docker_output("run", &args)?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(SandboxError::Docker {
                op: "run",
                message: "no container id returned".to_string(),
            });
        }
        debug!(container = %id, "container started");
        Ok(SandboxHandle(id))
    }

    fn wait(
        &mut self,
        handle: &SandboxHandle,
        timeout: Option<Duration>,
    ) -> Result<ExitInfo, SandboxError> {
        let spawn_err = |source: io::Error| SandboxError::Spawn {
            program: self.docker.clone(),
            source,
        };
        let mut child = Command::new(&self.docker)
            .args(["wait", handle.0.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;
        let status = wait_with_deadline(&mut child, timeout).map_err(spawn_err)?;
        let Some(status) = status else {
            let _ = self.docker_output("kill", &["kill", handle.0.as_str()]);
            return Ok(ExitInfo::timed_out());
        };
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }
        if !status.success() {
            return Err(SandboxError::Docker {
                op: "wait",
                message: stderr.trim().to_string(),
            });
        }
        match stdout.trim().parse::<i64>() {
            Ok(code) => Ok(ExitInfo::exited(code)),
            Err(_) => Ok(ExitInfo {
                error: Some(format!("unexpected docker wait output: {}", stdout.trim())),
                ..ExitInfo::default()
            }),
        }
    }

    fn logs(&mut self, handle: &SandboxHandle) -> Result<CapturedLogs, SandboxError> {
        let output = self.docker_output("logs", &["logs", handle.0.as_str()])?;
        Ok(CapturedLogs {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn remove(&mut self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.docker_output("rm", &["rm", "-f", handle.0.as_str()])?;
        Ok(())
    }
}

struct LocalTrial {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl LocalTrial {
    /// The trial leads its own process group; take the whole pipeline down.
    fn kill_group(&mut self) {
        if let Ok(pid) = i32::try_from(self.child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    reader.map(|mut r| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf);
            buf
        })
    })
}

#[derive(Default)]
pub struct LocalSandbox {
    next_id: u64,
    trials: BTreeMap<String, LocalTrial>,
}

impl LocalSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn trial(&mut self, handle: &SandboxHandle) -> Result<&mut LocalTrial, SandboxError> {
        self.trials
            .get_mut(&handle.0)
            .ok_or_else(|| SandboxError::UnknownHandle(handle.0.clone()))
    }
}

impl Sandbox for LocalSandbox {
    fn identity(&self) -> &str {
        "local"
    }

    fn launch(
        &mut self,
        argv: &[String],
        limits: &SandboxLimits,
    ) -> Result<SandboxHandle, SandboxError> {
        let (program, args) = argv.split_first().ok_or(SandboxError::EmptyCommand)?;
        debug!(
            cpu = limits.cpu,
            memory_bytes = limits.memory_bytes,
            "local sandbox does not enforce resource limits"
        );
        let mut child = Command::new(program)
            .args(args)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        self.next_id += 1;
        let id = format!("local_{}_{}", child.id(), self.next_id);
        self.trials.insert(
            id.clone(),
            LocalTrial {
                child,
                stdout,
                stderr,
            },
        );
        Ok(SandboxHandle(id))
    }

    fn wait(
        &mut self,
        handle: &SandboxHandle,
        timeout: Option<Duration>,
    ) -> Result<ExitInfo, SandboxError> {
        let trial = self.trial(handle)?;
        let status = wait_with_deadline(&mut trial.child, timeout).map_err(|source| {
            SandboxError::Spawn {
                program: handle.0.clone(),
                source,
            }
        })?;
        match status {
            Some(status) => Ok(status_code(status)),
            None => {
                trial.kill_group();
                Ok(ExitInfo::timed_out())
            }
        }
    }

    fn logs(&mut self, handle: &SandboxHandle) -> Result<CapturedLogs, SandboxError> {
        let trial = self.trial(handle)?;
        let join = |h: Option<JoinHandle<Vec<u8>>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
        Ok(CapturedLogs {
            stdout: join(trial.stdout.take()),
            stderr: join(trial.stderr.take()),
        })
    }

    fn remove(&mut self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let mut trial = self
            .trials
            .remove(&handle.0)
            .ok_or_else(|| SandboxError::UnknownHandle(handle.0.clone()))?;
        if trial.child.try_wait().ok().flatten().is_none() {
            trial.kill_group();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: SandboxLimits = SandboxLimits {
        cpu: 3,
        memory_bytes: 1 << 30,
    };

    fn bash(script: &str) -> Vec<String> {
        vec!["/bin/bash".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn docker_run_args_pin_cpu_and_disable_swap() {
        let sandbox = DockerSandbox::new("hyperlogloglog");
        let args = sandbox.run_args(&bash("true"), &LIMITS);
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --cpuset-cpus 3 --memory 1073741824"));
        assert!(joined.contains("--memory-swappiness 0 --memory-swap 1073741824 hyperlogloglog"));
        assert_eq!(&args[args.len() - 3..], bash("true").as_slice());
    }

    #[test]
    fn local_sandbox_captures_streams_and_status() {
        let mut sandbox = LocalSandbox::new();
        let handle = sandbox
            .launch(&bash("echo time 1; echo oops >&2; exit 3"), &LIMITS)
            .expect("launch");
        let exit = sandbox.wait(&handle, None).expect("wait");
        assert_eq!(exit, ExitInfo::exited(3));
        assert!(!exit.success());
        let logs = sandbox.logs(&handle).expect("logs");
        assert_eq!(logs.stdout, b"time 1\n");
        assert_eq!(logs.stderr, b"oops\n");
        sandbox.remove(&handle).expect("remove");
        assert!(sandbox.logs(&handle).is_err());
    }

    #[test]
    fn local_sandbox_enforces_timeout() {
        let mut sandbox = LocalSandbox::new();
        let handle = sandbox.launch(&bash("sleep 30"), &LIMITS).expect("launch");
        let started = Instant::now();
        let exit = sandbox
            .wait(&handle, Some(Duration::from_millis(200)))
            .expect("wait");
        assert!(exit.timed_out);
        let logs = sandbox.logs(&handle).expect("logs after kill");
        assert!(logs.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
        sandbox.remove(&handle).expect("remove");
    }

    #[test]
    fn launch_failures_are_reported() {
        let mut sandbox = LocalSandbox::new();
        let err = sandbox
            .launch(&["/nonexistent/sketchlab-binary".to_string()], &LIMITS)
            .expect_err("missing binary");
        assert!(matches!(err, SandboxError::Spawn { .. }));
        assert!(matches!(
            sandbox.launch(&[], &LIMITS),
            Err(SandboxError::EmptyCommand)
        ));
    }
}
