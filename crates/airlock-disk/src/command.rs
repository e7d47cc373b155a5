//! Execution wrapper for the host binaries an export session drives.
//!
//! Shell integration stays isolated here so the sequencing logic remains
//! testable (fake providers, deterministic stdout parsing). Every command
//! runs under a watchdog timeout; a hung binary is killed rather than
//! stalling the export indefinitely.

use airlock_core::error::{AirlockError, AirlockResult};
use airlock_provider::UnlockOutcome;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// One host binary plus the policy for invoking it.
#[derive(Debug, Clone)]
pub(crate) struct HostCommand {
    binary: PathBuf,
    timeout: Duration,
    /// Whether this binary needs elevated privileges when we are not root.
    escalate: bool,
    sudo: Option<PathBuf>,
}

#[derive(Debug)]
pub(crate) struct Output {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
}

impl HostCommand {
    pub(crate) fn new(
        binary: PathBuf,
        timeout: Duration,
        escalate: bool,
        sudo: Option<PathBuf>,
    ) -> Self {
        Self {
            binary,
            timeout,
            escalate,
            sudo,
        }
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }

    pub(crate) fn run(&self, args: &[&str], input: Option<&[u8]>) -> AirlockResult<Output> {
        let mut command = if self.escalate && !running_as_root() {
            let Some(sudo) = &self.sudo else {
                return Err(AirlockError::Privilege(format!(
                    "{} requires root and no sudo binary is available",
                    self.binary.display()
                )));
            };
            let mut command = Command::new(sudo);
            command.arg("-n").arg(&self.binary);
            command
        } else {
            Command::new(&self.binary)
        };

        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if input.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command
            .spawn()
            .map_err(|err| AirlockError::Device(format!("{}: {err}", self.binary.display())))?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(payload)
                    .map_err(|err| AirlockError::Device(format!("passing input: {err}")))?;
                stdin.flush().ok();
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> AirlockResult<Output> {
        let start = Instant::now();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AirlockError::Device(format!(
                "{} timed out after {:?}",
                self.binary.display(),
                self.timeout
            )));
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| AirlockError::Device("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| AirlockError::Device("stderr reader thread panicked".into()))??;

        Ok(Output {
            stdout,
            stderr,
            status: status.code().unwrap_or(-1),
        })
    }
}

/// Cryptsetup verbs used across the volume lifecycle.
#[derive(Debug, Clone)]
pub(crate) struct CryptsetupCommand {
    command: HostCommand,
}

impl CryptsetupCommand {
    pub(crate) fn new(command: HostCommand) -> Self {
        Self { command }
    }

    /// `isLuks` exits zero for a LUKS volume and nonzero otherwise; the
    /// nonzero case is a classification, not a failure.
    pub(crate) fn probe_luks(&self, device: &str) -> AirlockResult<bool> {
        let out = self.command.run(&["isLuks", device], None)?;
        Ok(out.status == 0)
    }

    pub(crate) fn header_dump(&self, device: &str) -> AirlockResult<String> {
        let out = self.command.run(&["luksDump", device], None)?;
        if out.status != 0 {
            return Err(AirlockError::Device(format!(
                "cryptsetup luksDump {device} exited with code {}: {}",
                out.status,
                output_diagnostic(&out)
            )));
        }
        Ok(out.stdout)
    }

    pub(crate) fn mapping_active(&self, name: &str) -> bool {
        dev_mapper_node_exists(name)
    }

    /// Open the mapping, passing the passphrase on stdin. A nonzero exit is
    /// reported as a rejected passphrase; the caller re-prompts.
    pub(crate) fn open(
        &self,
        device: &str,
        name: &str,
        passphrase: &[u8],
    ) -> AirlockResult<UnlockOutcome> {
        let args = ["luksOpen", "--key-file", "-", device, name];
        let out = self.command.run(&args, Some(passphrase))?;
        if out.status == 0 {
            Ok(UnlockOutcome::Unlocked)
        } else {
            Ok(UnlockOutcome::BadPassphrase)
        }
    }

    /// Close the mapping. A mapping that is already gone is success.
    pub(crate) fn close(&self, name: &str) -> AirlockResult<()> {
        if !dev_mapper_node_exists(name) {
            return Ok(());
        }

        let out = self.command.run(&["luksClose", name], None)?;
        if out.status == 0 {
            return Ok(());
        }

        let diagnostic = output_diagnostic(&out);
        let lower = diagnostic.to_ascii_lowercase();
        if lower.contains("does not exist")
            || lower.contains("doesn't exist")
            || lower.contains("not active")
        {
            return Ok(());
        }

        Err(AirlockError::Device(format!(
            "cryptsetup failed to close mapping `{name}`: {diagnostic} (exit code {})",
            out.status
        )))
    }
}

pub(crate) fn dev_mapper_node_exists(name: &str) -> bool {
    let root = Path::new("/dev/mapper");
    root.is_dir() && root.join(name).exists()
}

pub(crate) fn output_diagnostic(output: &Output) -> String {
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();
    if !stderr.is_empty() {
        stderr.to_string()
    } else {
        stdout.to_string()
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<AirlockResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> AirlockResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}

#[cfg(unix)]
pub(crate) fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub(crate) fn running_as_root() -> bool {
    true
}
