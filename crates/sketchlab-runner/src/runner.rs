use crate::command::{CommandProfile, TrialCommand};
use crate::sandbox::{ExitInfo, Sandbox, SandboxError, SandboxLimits};
use crate::store::ResultStore;
use chrono::Local;
use sketchlab_core::{FormatError, Instance};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why one repetition produced no record.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("sandbox failure: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("trial exited with status {status}: {stderr_tail}")]
    Exit { status: String, stderr_tail: String },

    #[error("trial killed after {0:?}")]
    Timeout(Duration),

    #[error("malformed trial output: {0}")]
    Format(#[from] FormatError),

    #[error("failed to write trial artifacts: {0}")]
    Artifact(#[from] io::Error),
}

impl TrialError {
    /// Artifact I/O means the results filesystem is failing; stop the campaign.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrialError::Artifact(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialOutput {
    pub exit: ExitInfo,
    pub stdout: String,
    pub stderr: String,
}

impl TrialOutput {
    /// Stdout of a successful trial, or the exit failure.
    pub fn into_stdout(self, timeout: Option<Duration>) -> Result<String, TrialError> {
        if self.exit.timed_out {
            return Err(TrialError::Timeout(timeout.unwrap_or_default()));
        }
        if self.exit.success() {
            return Ok(self.stdout);
        }
        let status = match (&self.exit.status_code, &self.exit.error) {
            (Some(code), _) => code.to_string(),
            (None, Some(err)) => err.clone(),
            (None, None) => "unknown".to_string(),
        };
        let stderr_tail = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .to_string();
        Err(TrialError::Exit {
            status,
            stderr_tail,
        })
    }
}

/// Append-only diagnostic files of one instance: `.log`, `.stdout`, `.stderr`.
pub struct InstanceArtifacts {
    log: File,
    stdout: File,
    stderr: File,
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl InstanceArtifacts {
    pub fn open(store: &ResultStore, instance: &Instance) -> io::Result<Self> {
        Ok(Self {
            log: append(&store.artifact_path(instance, "log"))?,
            stdout: append(&store.artifact_path(instance, "stdout"))?,
            stderr: append(&store.artifact_path(instance, "stderr"))?,
        })
    }

    fn log_line(&mut self, key: &str, value: impl std::fmt::Display) -> io::Result<()> {
        writeln!(self.log, "{} {}", key, value)
    }
}

pub struct SandboxRunner<S> {
    sandbox: S,
    limits: SandboxLimits,
    timeout: Option<Duration>,
    profile: CommandProfile,
    hostname: String,
}

impl<S: Sandbox> SandboxRunner<S> {
    pub fn new(
        sandbox: S,
        limits: SandboxLimits,
        timeout: Option<Duration>,
        profile: CommandProfile,
        hostname: &str,
    ) -> Self {
        Self {
            sandbox,
            limits,
            timeout,
            profile,
            hostname: hostname.to_string(),
        }
    }

    pub fn sandbox_identity(&self) -> &str {
        self.sandbox.identity()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs one repetition and returns its raw exit status and streams.
    ///
    /// Any exit status is `Ok`; `Err` means the sandbox itself failed or the
    /// artifacts could not be written. Every attempt is logged either way.
    pub fn run(
        &mut self,
        instance: &Instance,
        repetition: usize,
        seed: u64,
        artifacts: &mut InstanceArtifacts,
    ) -> Result<TrialOutput, TrialError> {
        let command = TrialCommand::build(instance, seed, &self.profile);
        let script = command.script();
        artifacts.log_line("start", Local::now())?;
        artifacts.log_line("rep", repetition)?;
        artifacts.log_line("seed", seed)?;
        artifacts.log_line("container", self.sandbox.identity())?;
        artifacts.log_line("cmd", &script)?;
        artifacts.log_line("hostname", &self.hostname)?;
        artifacts.log.flush()?;
        debug!(instance = %instance, repetition, seed, cmd = %script, "launching trial");

        let result = self.execute(&command.argv());
        match &result {
            Ok(output) => {
                let error = output.exit.error.as_deref().unwrap_or("None");
                artifacts.log_line("Error:", error)?;
                let code = output
                    .exit
                    .status_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "None".to_string());
                artifacts.log_line("StatusCode:", code)?;
                artifacts.stdout.write_all(output.stdout.as_bytes())?;
                artifacts.stderr.write_all(output.stderr.as_bytes())?;
                artifacts.stdout.flush()?;
                artifacts.stderr.flush()?;
            }
            Err(e) => artifacts.log_line("Error:", e)?,
        }
        artifacts.log_line("end", Local::now())?;
        artifacts.log.flush()?;
        result.map_err(TrialError::from)
    }

    fn execute(&mut self, argv: &[String]) -> Result<TrialOutput, SandboxError> {
        let handle = self.sandbox.launch(argv, &self.limits)?;
        let outcome = self
            .sandbox
            .wait(&handle, self.timeout)
            .and_then(|exit| self.sandbox.logs(&handle).map(|logs| (exit, logs)));
        if let Err(e) = self.sandbox.remove(&handle) {
            warn!(handle = %handle.0, error = %e, "failed to remove finished trial");
        }
        let (exit, logs) = outcome?;
        Ok(TrialOutput {
            exit,
            stdout: String::from_utf8_lossy(&logs.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&logs.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::LocalSandbox;
    use chrono::Utc;
    use sketchlab_core::{Algorithm, Datatype, Mode};
    use std::fs;

    #[test]
    fn into_stdout_classifies_exits() {
        let ok = TrialOutput {
            exit: ExitInfo::exited(0),
            stdout: "time 1".to_string(),
            stderr: String::new(),
        };
        assert_eq!(ok.into_stdout(None).expect("success"), "time 1");

        let failed = TrialOutput {
            exit: ExitInfo::exited(137),
            stdout: String::new(),
            stderr: "allocating\nKilled\n\n".to_string(),
        };
        match failed.into_stdout(None) {
            Err(TrialError::Exit {
                status,
                stderr_tail,
            }) => {
                assert_eq!(status, "137");
                assert_eq!(stderr_tail, "Killed");
            }
            other => panic!("expected exit error, got {:?}", other),
        }

        let hung = TrialOutput {
            exit: ExitInfo::timed_out(),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(matches!(
            hung.into_stdout(Some(Duration::from_secs(5))),
            Err(TrialError::Timeout(d)) if d == Duration::from_secs(5)
        ));
    }

    #[test]
    fn only_artifact_errors_are_fatal() {
        assert!(TrialError::Artifact(io::Error::new(io::ErrorKind::Other, "disk full")).is_fatal());
        assert!(!TrialError::Format(FormatError::Empty).is_fatal());
        assert!(!TrialError::Sandbox(SandboxError::EmptyCommand).is_fatal());
    }

    #[test]
    fn run_writes_log_and_appends_streams() {
        let root = std::env::temp_dir().join(format!(
            "sketchlab_runner_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let store = ResultStore::open(&root).expect("store");
        let instance = Instance {
            mode: Mode::Query,
            algorithm: Algorithm::HyperLogLog,
            datatype: Datatype::UInt64,
            m: 16,
            n: 16,
        };
        let mut artifacts = InstanceArtifacts::open(&store, &instance).expect("artifacts");
        let limits = SandboxLimits {
            cpu: 0,
            memory_bytes: 1 << 30,
        };
        let mut runner = SandboxRunner::new(
            LocalSandbox::new(),
            limits,
            None,
            CommandProfile::default(),
            "testhost",
        );
        // the measurement binaries are not installed here, so bash reports 127
        let output = runner
            .run(&instance, 0, 99, &mut artifacts)
            .expect("sandbox launches bash");
        assert!(!output.exit.success());
        runner
            .run(&instance, 1, 100, &mut artifacts)
            .expect("second repetition");

        let log = fs::read_to_string(store.artifact_path(&instance, "log")).expect("log");
        assert!(log.contains("rep 0\n"));
        assert!(log.contains("rep 1\n"));
        assert!(log.contains("seed 99\n"));
        assert!(log.contains("container local\n"));
        assert!(log.contains("hostname testhost\n"));
        assert!(log.contains("cmd inputgenerator/inputgenerator 16 uint64 99 | "));
        assert_eq!(log.matches("StatusCode:").count(), 2);
        assert!(store.artifact_path(&instance, "stderr").exists());
        let _ = fs::remove_dir_all(root);
    }
}
