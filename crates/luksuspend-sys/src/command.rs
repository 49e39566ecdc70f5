//! Spawns host binaries (`cryptsetup`, `systemctl`, `mount`, ...) with
//! timeouts and turns their exit codes into `LuksError`s.

use luksuspend_core::error::{LuksError, LuksResult};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Wraps a concrete binary path and the timeout used for non-interactive runs.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
}

/// Collects stdout, stderr, and exit status from a finished command.
#[derive(Debug)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl Output {
    /// Whichever stream has something to say, stderr first.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

impl CommandRunner {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// Use `configured` when set, otherwise the first of `defaults` that exists.
    pub fn locate(
        name: &str,
        configured: Option<&str>,
        defaults: &[&str],
        timeout: Duration,
    ) -> LuksResult<Self> {
        if let Some(path) = configured {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(LuksError::InvalidConfig(format!(
                    "{name} binary not found at {}",
                    path.display()
                )));
            }
            return Ok(Self::new(path, timeout));
        }

        defaults
            .iter()
            .map(Path::new)
            .find(|candidate| candidate.exists())
            .map(|found| Self::new(found.to_path_buf(), timeout))
            .ok_or_else(|| {
                LuksError::InvalidConfig(format!(
                    "unable to locate {name} binary; tried {defaults:?}"
                ))
            })
    }

    pub fn binary(&self) -> &Path {
        &self.path
    }

    /// Execute the binary with piped output and wait at most the timeout.
    pub fn run(&self, args: &[&str]) -> LuksResult<Output> {
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    /// Like [`run`](Self::run), but a non-zero exit becomes an error.
    pub fn run_checked(&self, args: &[&str]) -> LuksResult<Output> {
        let out = self.run(args)?;
        if out.status != 0 {
            return Err(self.failure(args, out.status, out.diagnostic()));
        }
        Ok(out)
    }

    /// Run with the caller's terminal attached and no timeout, for commands
    /// that may prompt. Returns the exit code.
    pub fn run_interactive(&self, args: &[&str]) -> LuksResult<i32> {
        let status = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Build the error reported for a failed invocation.
    pub fn failure(&self, args: &[&str], status: i32, diagnostic: &str) -> LuksError {
        LuksError::ExternalCommand {
            command: format!("{} {}", self.path.display(), args.join(" ")),
            status,
            diagnostic: if diagnostic.is_empty() {
                "no additional output".to_string()
            } else {
                diagnostic.to_string()
            },
        }
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> LuksResult<Output> {
        let start = Instant::now();
        let stdout_handle = Self::spawn_output_reader(stdout_pipe);
        let stderr_handle = Self::spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(exit_status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LuksError::ExternalCommand {
                command: self.path.display().to_string(),
                status: -1,
                diagnostic: format!("timed out after {:?}", self.timeout),
            });
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| LuksError::Protocol("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| LuksError::Protocol("stderr reader thread panicked".into()))??;

        Ok(Output {
            stdout,
            stderr,
            status: exit_status.code().unwrap_or(-1),
        })
    }

    /// Drain a pipe on a helper thread so a chatty child cannot block on it.
    fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<LuksResult<String>>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || -> LuksResult<String> {
            let mut buf = Vec::new();
            if let Some(mut reader) = pipe {
                reader.read_to_end(&mut buf)?;
            }
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{fake_binary, test_lock};
    use tempfile::tempdir;

    #[test]
    fn run_checked_reports_stderr() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "tool", "echo 'device busy' >&2\nexit 5\n");
        let runner = CommandRunner::new(bin, Duration::from_secs(5));

        match runner.run_checked(&["stop", "x"]).unwrap_err() {
            LuksError::ExternalCommand {
                command,
                status,
                diagnostic,
            } => {
                assert!(command.ends_with("tool stop x"));
                assert_eq!(status, 5);
                assert_eq!(diagnostic, "device busy");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn run_kills_on_timeout() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "slow", "sleep 5\n");
        let runner = CommandRunner::new(bin, Duration::from_millis(100));
        let err = runner.run(&[]).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn locate_prefers_configured_path() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "cryptsetup", "exit 0\n");
        let configured = bin.to_string_lossy().into_owned();

        let runner =
            CommandRunner::locate("cryptsetup", Some(&configured), &[], Duration::ZERO).unwrap();
        assert_eq!(runner.binary(), bin.as_path());

        let missing = dir.path().join("missing").to_string_lossy().into_owned();
        assert!(matches!(
            CommandRunner::locate("cryptsetup", Some(&missing), &[], Duration::ZERO),
            Err(LuksError::InvalidConfig(_))
        ));
    }

    #[test]
    fn locate_walks_default_paths() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "systemctl", "exit 0\n");
        let absent = dir.path().join("absent").to_string_lossy().into_owned();
        let present = bin.to_string_lossy().into_owned();

        let runner = CommandRunner::locate(
            "systemctl",
            None,
            &[absent.as_str(), present.as_str()],
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(runner.binary(), bin.as_path());

        assert!(CommandRunner::locate("systemctl", None, &[absent.as_str()], Duration::ZERO)
            .is_err());
    }
}
