use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio::process::Command;
use tracing::debug;

/// An external program invocation, built up front so it can be logged and
/// inspected before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    /// Variables set on top of the inherited environment.
    pub envs: Vec<(OsString, OsString)>,
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Runs the process to completion and captures its output.
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    /// Failing to spawn the program at all is.
    pub async fn output(&self) -> anyhow::Result<CommandOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command.envs(self.envs.iter().map(|(key, value)| (key, value)));

        debug!(command = %self, "spawning");
        let start = Instant::now();
        let output = command
            .output()
            .await
            .with_context(|| format!("failed to spawn `{}`", self.program.to_string_lossy()))?;

        Ok(CommandOutcome {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        })
    }

    /// Runs the process and requires a zero exit status.
    pub async fn run_checked(&self) -> anyhow::Result<CommandOutcome> {
        let outcome = self.output().await?;
        anyhow::ensure!(
            outcome.success(),
            "`{self}` exited with {}: {}",
            outcome.exit_label(),
            outcome.stderr_tail(20)
        );
        Ok(outcome)
    }
}

fn quote(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.into_owned()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.envs {
            write!(f, "{}={} ", key.to_string_lossy(), quote(value))?;
        }
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn exit_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "signal".to_string(),
        }
    }

    /// Last `lines` lines of stderr, the part that usually explains a failure.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.trim_end().lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Resolves `bin` on `PATH`.
pub fn ensure_in_path(bin: &str) -> anyhow::Result<PathBuf> {
    which::which(bin).with_context(|| format!("`{bin}` not found in PATH"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let spec = CommandSpec::new("ffmpeg")
            .arg("-i")
            .arg("my video.mp4")
            .arg("");
        assert_eq!(spec.to_string(), "ffmpeg -i \"my video.mp4\" \"\"");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let outcome = CommandOutcome {
            code: Some(1),
            stdout: String::new(),
            stderr: "a\nb\nc\n".to_string(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(outcome.stderr_tail(2), "b\nc");
        assert_eq!(outcome.stderr_tail(10), "a\nb\nc");
        assert!(!outcome.success());
        assert_eq!(outcome.exit_label(), "exit code 1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_captures_exit_code_and_stderr() -> anyhow::Result<()> {
        let outcome = CommandSpec::new("sh")
            .args(["-c", "echo out; echo broken >&2; exit 3"])
            .output()
            .await?;

        assert_eq!(outcome.code, Some(3));
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "broken");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_runs_in_current_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("marker.txt"), "x")?;

        let outcome = CommandSpec::new("sh")
            .args(["-c", "test -f marker.txt"])
            .current_dir(dir.path())
            .output()
            .await?;

        assert!(outcome.success());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_reaches_the_child() -> anyhow::Result<()> {
        let spec = CommandSpec::new("sh")
            .args(["-c", "test \"$LIPSYNC_TEST_VAR\" = on"])
            .env("LIPSYNC_TEST_VAR", "on");
        assert_eq!(
            spec.to_string(),
            "LIPSYNC_TEST_VAR=on sh -c \"test \"$LIPSYNC_TEST_VAR\" = on\""
        );
        assert!(spec.output().await?.success());
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let result = CommandSpec::new("lipsync-definitely-not-a-program")
            .output()
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_checked_rejects_non_zero_exit() {
        let err = CommandSpec::new("sh")
            .args(["-c", "echo nope >&2; exit 2"])
            .run_checked()
            .await
            .unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("exit code 2"), "{message}");
        assert!(message.contains("nope"), "{message}");
    }
}
